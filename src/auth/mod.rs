// Authentication module
// Manages the credential lifecycle: storage, cookie mirror and token refresh

mod manager;
pub mod mirror;
pub mod normalize;
mod refresh;
pub mod store;
mod types;

pub use manager::{in_refresh_window, Bearer, SessionManager, DEFAULT_REFRESH_THRESHOLD};
pub use mirror::{CookieFile, CookieJar, SessionMirror};
pub use refresh::REFRESH_PATH;
pub use store::{CredentialStore, FileStore, MemoryStore};
pub use types::{
    token_preview, CredentialRecord, SessionEvent, SessionGrant, SignUpOutcome, UserSnapshot,
};
