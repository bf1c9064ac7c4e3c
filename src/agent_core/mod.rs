//! Agent Core: the tool loop and the state it runs on.
//!
//! Submodules:
//! - `tool_loop`: Generate / execute / confirm state machine driving a turn
//! - `active`: Per-session abort controllers
//! - `generation`: Model-provider seam (`Generator`) and streamed events
//! - `store`: Session persistence seam plus an in-memory store
//! - `database`: SQLite-backed session store
//! - `types`: Messages, tool calls, stream events and turn outcomes
//! - `errors`: Agent-level and generation error types

pub mod active;
pub mod database;
pub mod errors;
pub mod generation;
pub mod store;
pub mod tool_loop;
pub mod types;

// Re-exports for convenience
pub use active::{ActiveTurn, ActiveTurns};
pub use database::SqliteSessionStore;
pub use errors::{AgentError, GenerationError};
pub use generation::{
    GeneratedImage, GenerationEvent, GenerationOptions, GenerationRequest, GenerationStream,
    Generator, ModelInfo, IMAGE_GENERATION_CAPABILITY,
};
pub use store::{MemorySessionStore, SessionStore};
pub use tool_loop::{RespondOutcome, ToolLoop};
pub use types::{
    Approval, ConversationMessage, FinishReason, LoopState, Role, Session, StreamEvent,
    StreamSink, ToolCall, ToolCallPatch, ToolCallStatus, TurnOutcome, TurnRequest,
};
