//! Sandbox and permission gate.
//!
//! Submodules:
//! - `boundary`: Boundary resolution, containment checks, `check_access`
//! - `gate`: Pending-request store with the ask/respond protocol
//! - `types`: Permission request/response types
//! - `errors`: Permission error types

pub mod boundary;
pub mod errors;
pub mod gate;
pub mod types;

pub use boundary::{canonicalize_lenient, check_access, is_contained, resolve_boundary, AccessScope};
pub use errors::PermissionError;
pub use gate::{PermissionGate, PermissionTicket};
pub use types::{NewPermissionRequest, PermissionKind, PermissionRequest, PermissionResponse};
