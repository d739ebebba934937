//! TLS bootstrap errors.

use weft_store::StoreError;

#[derive(Debug)]
pub enum TlsError {
    /// Reading or writing a secret failed.
    Store(StoreError),
    /// Key generation, parsing or signing failed.
    Crypto(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Store(err) => write!(f, "{err}"),
            TlsError::Crypto(msg) => write!(f, "TLS material error: {msg}"),
        }
    }
}

impl std::error::Error for TlsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TlsError::Store(err) => Some(err),
            TlsError::Crypto(_) => None,
        }
    }
}

impl From<StoreError> for TlsError {
    fn from(err: StoreError) -> Self {
        TlsError::Store(err)
    }
}

impl From<rcgen::Error> for TlsError {
    fn from(err: rcgen::Error) -> Self {
        TlsError::Crypto(err.to_string())
    }
}
