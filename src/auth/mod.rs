pub mod accounts;
pub mod password;
pub mod sessions;

pub use accounts::{AccountManager, AuthError};
pub use sessions::SessionManager;
