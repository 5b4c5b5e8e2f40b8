//! External collaborators the stages talk to: artifacts, status, notifications.
//!
//! Every stage receives these as trait objects at construction, so tests swap
//! in in-memory versions and deployments swap in real services.

pub mod artifacts;
pub mod notify;
pub mod status;

pub use artifacts::{ArtifactStore, ObjectStoreArtifacts};
pub use notify::{ChannelSink, LogSink, Notification, NotificationSink, PAGES_READY_TOPIC};
pub use status::{FileStatusStore, MemoryStatusStore, StatusStore};
