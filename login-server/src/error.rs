use std::fmt;
use std::io;

/// Startup-fatal errors. Per-connection and per-handler failures are
/// handled locally (logged and the connection/handler dropped) and never
/// surface as this type.
#[derive(Debug)]
pub enum ServerError {
    Config(String),
    RsaKey(crate::crypto::RsaKeyError),
    Bind(io::Error),
    Modules(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Config(msg) => write!(f, "configuration error: {}", msg),
            ServerError::RsaKey(e) => write!(f, "RSA key error: {}", e),
            ServerError::Bind(e) => write!(f, "failed to bind listener: {}", e),
            ServerError::Modules(msg) => write!(f, "module load error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<crate::crypto::RsaKeyError> for ServerError {
    fn from(e: crate::crypto::RsaKeyError) -> Self {
        ServerError::RsaKey(e)
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Bind(e)
    }
}
