//! Configuration management

use serde::{Deserialize, Serialize};

use crate::error::{Result, WxError};

/// Official Account credentials and webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpConfig {
    /// AppID of the Official Account
    pub app_id: String,

    /// AppSecret used for access-token refresh
    pub app_secret: String,

    /// Token shared with the platform for webhook signature verification
    pub token: String,
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| WxError::Config(format!("{name} is required")))
}

impl MpConfig {
    /// Load configuration from environment variables
    /// (`WECHAT_APP_ID`, `WECHAT_APP_SECRET`, `WECHAT_TOKEN`).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            app_id: required_var("WECHAT_APP_ID")?,
            app_secret: required_var("WECHAT_APP_SECRET")?,
            token: required_var("WECHAT_TOKEN")?,
        })
    }
}
