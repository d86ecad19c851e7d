// Storage backend session management
pub mod backend;
pub mod http;
pub mod manager;

pub use backend::{StorageBackend, StorageSession, StoredObject, UploadMetadata};
pub use http::HttpStorageBackend;
pub use manager::{ConnectionManager, SessionDiagnostics, SessionSettings, SessionState};
