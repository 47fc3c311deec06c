use crate::alert::Alert;

/// TLS protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// Malformed wire input at any layer.
    #[error("decode error: {0}")]
    Decode(String),
    /// Semantically invalid message sequence or field value.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Signature, MAC, or key-derivation failure.
    #[error("crypto error: {0}")]
    Crypto(String),
    /// AEAD open failure on a record. Kept separate from [`TlsError::Crypto`]
    /// so that early-data skipping can recognise undecryptable records.
    #[error("decrypt error: {0}")]
    Decrypt(String),
    /// Caller-visible misconfiguration.
    #[error("configuration error: {0}")]
    Config(String),
    /// Internal invariant violation (maps to an internal_error alert).
    #[error("internal error: {0}")]
    Internal(String),
    /// Underlying transport failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Non-blocking surface only: retry once more bytes are available.
    #[error("operation would block")]
    WouldBlock,
    /// The peer sent a fatal alert.
    #[error("alert received: {0}")]
    AlertReceived(Alert),
}

impl TlsError {
    /// Map an error to the alert sent to the peer before tearing down.
    pub fn to_alert(&self) -> Alert {
        match self {
            TlsError::Decode(_) => Alert::DecodeError,
            TlsError::Protocol(_) => Alert::UnexpectedMessage,
            TlsError::Crypto(_) => Alert::HandshakeFailure,
            TlsError::Decrypt(_) => Alert::BadRecordMac,
            TlsError::Config(_) => Alert::InternalError,
            TlsError::Internal(_) => Alert::InternalError,
            TlsError::Io(_) => Alert::InternalError,
            TlsError::WouldBlock => Alert::WouldBlock,
            TlsError::AlertReceived(a) => *a,
        }
    }
}
