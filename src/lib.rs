//! WeChat Official Account (公众号) SDK
//!
//! Parses inbound webhook payloads into typed message and event values,
//! renders typed replies into the platform's wire XML, and wraps the
//! account-management HTTP API (menus, groups, users, media, QR codes,
//! customer-service messages).
//!
//! # Architecture
//!
//! ```text
//! WeChat Server ──POST xml──▶ your webhook handler
//!                                │  message::parse
//!                                ▼
//!                          typed Incoming ──▶ business logic ──▶ Reply
//!                                                                 │ render
//! WeChat Server ◀──xml or "success"───────────────────────────────┘
//!
//! MpClient ──HTTPS──▶ api.weixin.qq.com   (token cache, REST calls)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use wxmp::prelude::*;
//!
//! fn handle(body: &[u8]) -> wxmp::Result<String> {
//!     let incoming = wxmp::message::parse_bytes(body)?;
//!     let reply = match &incoming {
//!         Incoming::Text(text) => Reply::text(&text.envelope, "received")?,
//!         other => Reply::empty(other.envelope())?,
//!     };
//!     Ok(reply.render())
//! }
//! ```
//!
//! Parsing and rendering are pure and synchronous; one payload in, one
//! response body out. The components keep no state between invocations and
//! can run concurrently without locking. Only [`MpClient`] holds shared
//! state (the access-token cache), and it synchronizes internally.

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod reply;
pub mod sign;

pub use client::{Group, MediaKind, MpClient, QrScene, QrTicket};
pub use config::MpConfig;
pub use error::{Result, WxError};
pub use message::{Envelope, Incoming};
pub use reply::{Article, Reply};

/// Prelude for common imports
pub mod prelude {
    pub use crate::client::{MediaKind, MpClient, QrScene};
    pub use crate::config::MpConfig;
    pub use crate::error::{Result, WxError};
    pub use crate::message::{Envelope, Incoming};
    pub use crate::reply::{Article, Reply};
}
