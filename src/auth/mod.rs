//! OAuth 2.0 flows and encrypted token storage.

pub mod device_code;
pub mod error;
pub mod local_server;
pub mod service;
pub mod store;
pub mod token;

pub use device_code::{DeviceAuthorizationFlow, DevicePoll, DeviceSession};
pub use error::AuthError;
pub use local_server::{LocalServerFlow, PendingAuthorization};
pub use service::AuthService;
pub use store::{EncryptedFileTokenStore, TokenStore, TokenStoreConfig};
pub use token::TokenRecord;
