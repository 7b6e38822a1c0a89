//! Typed wrappers over the backend's REST resources. All calls go through
//! [`AuthClient`](crate::client::AuthClient) and so share its refresh
//! handling.

pub mod coach;
pub mod libraries;
pub mod module_sessions;

pub use coach::{ChatMessage, CoachApi};
pub use libraries::{Library, LibrariesApi};
pub use module_sessions::{ModuleSession, ModuleSessionsApi};
