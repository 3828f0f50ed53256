pub mod auth;
pub mod config;
pub mod draft;
pub mod error;
pub mod paths;

pub use auth::{
    convert_raw_cookies, resolve_auth_source, AuthSource, StorageState, AUTH_ENV,
    DEFAULT_AUTH_FILE,
};
pub use config::Config;
pub use draft::{BodyBlock, DraftPayload};
pub use error::{Error, Result};
pub use paths::Paths;
