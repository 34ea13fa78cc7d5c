//! Error types shared across the crate.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, WxError>;

/// Unified error type for webhook parsing, reply rendering and API calls.
#[derive(Debug, Error)]
pub enum WxError {
    /// The webhook payload is not well-formed XML.
    #[error("malformed xml payload: {reason}")]
    Parse { reason: String },

    /// `MsgType` or `Event` names a type outside the known variant set.
    #[error("unsupported message or event type: {0}")]
    UnsupportedType(String),

    /// A variant invariant was violated (discriminator mismatch, missing or
    /// malformed required field, bad ticket prefix, out-of-range argument).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The platform answered with a non-zero `errcode`.
    #[error("wechat api error {errcode}: {errmsg}")]
    Api { errcode: i64, errmsg: String },

    /// Transport-level failure.
    #[error("http request failed")]
    Http(#[from] reqwest::Error),

    /// Missing or invalid environment configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl WxError {
    pub(crate) fn parse(reason: impl Into<String>) -> Self {
        WxError::Parse {
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        WxError::Validation(message.into())
    }
}
