//! Platform API client for an Official Account.
//!
//! Handles:
//! - Access token management (cached, refreshed before expiry)
//! - Customer service messages (within the 48h reply window)
//! - Menu, group and user management
//! - Media upload/download
//! - Promotional QR-code tickets

use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::MpConfig;
use crate::error::{Result, WxError};

// =============================================================================
// API endpoints
// =============================================================================

const API_BASE: &str = "https://api.weixin.qq.com/cgi-bin";
const SHOW_QRCODE_URL: &str = "https://mp.weixin.qq.com/cgi-bin/showqrcode";

/// Longest lifetime of a temporary QR scene (30 days).
pub const MAX_QR_EXPIRE_SECS: u32 = 2_592_000;

// =============================================================================
// Access token management
// =============================================================================

/// Cached access token with expiry tracking.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn new(access_token: String, expires_in_secs: u64) -> Self {
        // Refresh a minute before the platform expires the token
        let buffer_secs = 60;
        let effective_expiry = expires_in_secs.saturating_sub(buffer_secs);
        Self {
            access_token,
            expires_at: Instant::now() + Duration::from_secs(effective_expiry),
        }
    }

    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

// =============================================================================
// Response plumbing
// =============================================================================

/// `errcode`/`errmsg` pair present in most platform responses. A missing
/// errcode means success.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiStatus {
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
}

impl ApiStatus {
    fn check(&self) -> Result<()> {
        if self.errcode != 0 {
            return Err(WxError::Api {
                errcode: self.errcode,
                errmsg: self.errmsg.clone(),
            });
        }
        Ok(())
    }
}

fn check_value(value: &serde_json::Value) -> Result<()> {
    if let Some(errcode) = value.get("errcode").and_then(|c| c.as_i64()) {
        if errcode != 0 {
            let errmsg = value
                .get("errmsg")
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_string();
            return Err(WxError::Api { errcode, errmsg });
        }
    }
    Ok(())
}

// =============================================================================
// Typed response fragments
// =============================================================================

/// A user group.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Group {
    pub id: i64,
    pub name: String,
    /// Number of users in the group; only present on listing.
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Deserialize)]
struct GroupResponse {
    #[serde(flatten)]
    status: ApiStatus,
    #[serde(default)]
    group: Option<Group>,
}

#[derive(Debug, Deserialize)]
struct GroupListResponse {
    #[serde(flatten)]
    status: ApiStatus,
    #[serde(default)]
    groups: Vec<Group>,
}

#[derive(Debug, Deserialize)]
struct GroupIdResponse {
    #[serde(flatten)]
    status: ApiStatus,
    #[serde(default)]
    groupid: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct FollowerData {
    #[serde(default)]
    openid: Vec<String>,
}

/// One page of the follower listing.
#[derive(Debug, Deserialize)]
struct FollowerPage {
    #[serde(flatten)]
    status: ApiStatus,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    count: u64,
    #[serde(default)]
    data: Option<FollowerData>,
    #[serde(default)]
    next_openid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(flatten)]
    status: ApiStatus,
    #[serde(default)]
    media_id: Option<String>,
}

/// Result of creating a QR code: the ticket is exchanged for the image.
#[derive(Debug, Clone, Deserialize)]
pub struct QrTicket {
    pub ticket: String,
    #[serde(default)]
    pub expire_seconds: Option<u64>,
    /// Direct content URL the QR code encodes, when the platform returns it.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QrTicketResponse {
    #[serde(flatten)]
    status: ApiStatus,
    #[serde(default)]
    ticket: Option<String>,
    #[serde(default)]
    expire_seconds: Option<u64>,
    #[serde(default)]
    url: Option<String>,
}

// =============================================================================
// QR scenes
// =============================================================================

/// Scene attached to a promotional QR code.
#[derive(Debug, Clone, PartialEq)]
pub enum QrScene {
    /// Expiring scene; `expire_seconds` is capped at 30 days.
    Temporary { scene_id: u32, expire_seconds: u32 },
    /// Permanent numeric scene; the platform allots ids 1..=100000.
    Permanent { scene_id: u32 },
    /// Permanent string scene, up to 64 characters.
    PermanentStr { scene_str: String },
}

impl QrScene {
    fn to_request(&self) -> Result<serde_json::Value> {
        match self {
            QrScene::Temporary {
                scene_id,
                expire_seconds,
            } => {
                if *expire_seconds == 0 || *expire_seconds > MAX_QR_EXPIRE_SECS {
                    return Err(WxError::validation(format!(
                        "temporary scene expiry must be within 1..={MAX_QR_EXPIRE_SECS} seconds"
                    )));
                }
                Ok(serde_json::json!({
                    "expire_seconds": expire_seconds,
                    "action_name": "QR_SCENE",
                    "action_info": { "scene": { "scene_id": scene_id } }
                }))
            }
            QrScene::Permanent { scene_id } => {
                if !(1..=100_000).contains(scene_id) {
                    return Err(WxError::validation(
                        "permanent scene id must be within 1..=100000",
                    ));
                }
                Ok(serde_json::json!({
                    "action_name": "QR_LIMIT_SCENE",
                    "action_info": { "scene": { "scene_id": scene_id } }
                }))
            }
            QrScene::PermanentStr { scene_str } => {
                if scene_str.is_empty() || scene_str.len() > 64 {
                    return Err(WxError::validation(
                        "permanent scene string must be 1..=64 characters",
                    ));
                }
                Ok(serde_json::json!({
                    "action_name": "QR_LIMIT_STR_SCENE",
                    "action_info": { "scene": { "scene_str": scene_str } }
                }))
            }
        }
    }
}

// =============================================================================
// Media
// =============================================================================

/// Media category accepted by the upload endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Thumb,
    Voice,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Thumb => "thumb",
            MediaKind::Voice => "voice",
            MediaKind::Video => "video",
        }
    }

    /// Platform-side limits, checked before spending the upload.
    fn validate_upload(self, filename: &str, size: usize) -> Result<()> {
        let lower = filename.to_ascii_lowercase();
        let (extension_ok, max_size) = match self {
            MediaKind::Image => (lower.ends_with(".jpg"), 128 * 1024),
            MediaKind::Thumb => (lower.ends_with(".jpg"), 64 * 1024),
            MediaKind::Voice => (
                lower.ends_with(".amr") || lower.ends_with(".mp3"),
                256 * 1024,
            ),
            MediaKind::Video => (lower.ends_with(".mp4"), 1024 * 1024),
        };
        if !extension_ok {
            return Err(WxError::validation(format!(
                "file {filename} has an unsupported extension for {} upload",
                self.as_str()
            )));
        }
        if size > max_size {
            return Err(WxError::validation(format!(
                "{} upload is limited to {max_size} bytes, got {size}",
                self.as_str()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Client
// =============================================================================

/// Official Account API client.
#[derive(Clone)]
pub struct MpClient {
    app_id: String,
    app_secret: String,
    http: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl MpClient {
    /// Create a new client for the given account credentials.
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            http: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Create a client from loaded configuration.
    pub fn from_config(config: &MpConfig) -> Self {
        Self::new(config.app_id.clone(), config.app_secret.clone())
    }

    // -------------------------------------------------------------------------
    // Access token
    // -------------------------------------------------------------------------

    /// Get a valid access token, refreshing if the cached one expired.
    pub async fn get_access_token(&self) -> Result<String> {
        {
            let guard = self.cached_token.read();
            if let Some(token) = guard.as_ref() {
                if token.is_valid() {
                    debug!("using cached access token");
                    return Ok(token.access_token.clone());
                }
            }
        }
        self.refresh_token().await
    }

    async fn refresh_token(&self) -> Result<String> {
        debug!("refreshing access token");

        let url = format!(
            "{API_BASE}/token?grant_type=client_credential&appid={}&secret={}",
            self.app_id, self.app_secret
        );
        let response: TokenResponse = self.http.get(&url).send().await?.json().await?;

        if response.errcode != 0 {
            return Err(WxError::Api {
                errcode: response.errcode,
                errmsg: response.errmsg,
            });
        }
        let access_token = response.access_token.ok_or(WxError::Api {
            errcode: -1,
            errmsg: "token response carried no access_token".to_string(),
        })?;

        {
            let mut guard = self.cached_token.write();
            *guard = Some(CachedToken::new(access_token.clone(), response.expires_in));
        }

        info!(
            "refreshed access token (expires in {}s)",
            response.expires_in
        );
        Ok(access_token)
    }

    // -------------------------------------------------------------------------
    // Request helpers
    // -------------------------------------------------------------------------

    async fn api_get<T: DeserializeOwned>(&self, url: &str, params: &[(&str, &str)]) -> Result<T> {
        let token = self.get_access_token().await?;
        let mut query: Vec<(&str, String)> = vec![("access_token", token)];
        for &(k, v) in params {
            query.push((k, v.to_string()));
        }
        Ok(self
            .http
            .get(url)
            .query(&query)
            .send()
            .await?
            .json()
            .await?)
    }

    async fn api_post<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let token = self.get_access_token().await?;
        Ok(self
            .http
            .post(url)
            .query(&[("access_token", token)])
            .json(body)
            .send()
            .await?
            .json()
            .await?)
    }

    // -------------------------------------------------------------------------
    // Customer service
    // -------------------------------------------------------------------------

    /// Send a customer-service text message.
    ///
    /// Only accepted by the platform within 48h of the user's last message;
    /// later replies need a template message instead.
    pub async fn send_custom_text(&self, open_id: &str, content: &str) -> Result<()> {
        let url = format!("{API_BASE}/message/custom/send");
        let body = serde_json::json!({
            "touser": open_id,
            "msgtype": "text",
            "text": { "content": content }
        });
        let status: ApiStatus = self.api_post(&url, &body).await?;
        status.check()?;
        info!(open_id, "customer service message sent");
        Ok(())
    }

    /// Register a customer-service account.
    pub async fn add_kf_account(
        &self,
        account: &str,
        nickname: &str,
        password: &str,
    ) -> Result<()> {
        let url = "https://api.weixin.qq.com/customservice/kfaccount/add";
        let body = serde_json::json!({
            "kf_account": account,
            "nickname": nickname,
            "password": password
        });
        let status: ApiStatus = self.api_post(url, &body).await?;
        status.check()
    }

    // -------------------------------------------------------------------------
    // Menu management
    // -------------------------------------------------------------------------

    /// Install a custom menu. The menu JSON follows the platform schema
    /// (`{"button": [...]}`).
    pub async fn create_menu(&self, menu: &serde_json::Value) -> Result<()> {
        let url = format!("{API_BASE}/menu/create");
        let status: ApiStatus = self.api_post(&url, menu).await?;
        status.check()?;
        info!("menu installed");
        Ok(())
    }

    /// Fetch the currently installed menu.
    pub async fn get_menu(&self) -> Result<serde_json::Value> {
        let url = format!("{API_BASE}/menu/get");
        let value: serde_json::Value = self.api_get(&url, &[]).await?;
        check_value(&value)?;
        Ok(value)
    }

    /// Remove the custom menu.
    pub async fn delete_menu(&self) -> Result<()> {
        let url = format!("{API_BASE}/menu/delete");
        let status: ApiStatus = self.api_get(&url, &[]).await?;
        status.check()?;
        info!("menu removed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Group management
    // -------------------------------------------------------------------------

    /// Create a user group (name limited to 30 characters by the platform).
    pub async fn create_group(&self, name: &str) -> Result<Group> {
        let url = format!("{API_BASE}/groups/create");
        let body = serde_json::json!({ "group": { "name": name } });
        let response: GroupResponse = self.api_post(&url, &body).await?;
        response.status.check()?;
        let group = response.group.ok_or(WxError::Api {
            errcode: -1,
            errmsg: "create_group response carried no group".to_string(),
        })?;
        info!(group_id = group.id, group_name = %group.name, "group created");
        Ok(group)
    }

    /// Rename an existing group.
    pub async fn update_group(&self, group_id: i64, name: &str) -> Result<()> {
        let url = format!("{API_BASE}/groups/update");
        let body = serde_json::json!({ "group": { "id": group_id, "name": name } });
        let status: ApiStatus = self.api_post(&url, &body).await?;
        status.check()
    }

    /// List all groups of the account.
    pub async fn get_groups(&self) -> Result<Vec<Group>> {
        let url = format!("{API_BASE}/groups/get");
        let response: GroupListResponse = self.api_get(&url, &[]).await?;
        response.status.check()?;
        Ok(response.groups)
    }

    /// Move a user into another group.
    pub async fn move_user_to_group(&self, open_id: &str, group_id: i64) -> Result<()> {
        let url = format!("{API_BASE}/groups/members/update");
        let body = serde_json::json!({ "openid": open_id, "to_groupid": group_id });
        let status: ApiStatus = self.api_post(&url, &body).await?;
        status.check()
    }

    /// Group a user currently belongs to.
    pub async fn group_of_user(&self, open_id: &str) -> Result<i64> {
        let url = format!("{API_BASE}/groups/getid");
        let body = serde_json::json!({ "openid": open_id });
        let response: GroupIdResponse = self.api_post(&url, &body).await?;
        response.status.check()?;
        response.groupid.ok_or(WxError::Api {
            errcode: -1,
            errmsg: "groups/getid response carried no groupid".to_string(),
        })
    }

    // -------------------------------------------------------------------------
    // User management
    // -------------------------------------------------------------------------

    /// Fetch a user profile. `lang` defaults to `zh_CN`.
    pub async fn get_user_info(
        &self,
        open_id: &str,
        lang: Option<&str>,
    ) -> Result<serde_json::Value> {
        let url = format!("{API_BASE}/user/info");
        let lang = lang.unwrap_or("zh_CN");
        let value: serde_json::Value = self
            .api_get(&url, &[("openid", open_id), ("lang", lang)])
            .await?;
        check_value(&value)?;
        Ok(value)
    }

    /// Fetch the open IDs of all followers.
    ///
    /// Standard cursor pagination: each page lists up to 10000 open IDs and
    /// names the cursor for the next one; the walk stops when the cursor
    /// runs out or the accumulated count reaches the reported total.
    pub async fn get_followers(&self) -> Result<Vec<String>> {
        let url = format!("{API_BASE}/user/get");
        let mut all_users: Vec<String> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params: Vec<(&str, &str)> = match cursor.as_deref() {
                Some(c) => vec![("next_openid", c)],
                None => Vec::new(),
            };
            let page: FollowerPage = self.api_get(&url, &params).await?;
            page.status.check()?;

            debug!(count = page.count, total = page.total, "follower page");
            if let Some(data) = page.data {
                all_users.extend(data.openid);
            }

            let next = page.next_openid.unwrap_or_default();
            if next.is_empty() || all_users.len() as u64 >= page.total {
                break;
            }
            cursor = Some(next);
        }

        info!("fetched {} followers", all_users.len());
        Ok(all_users)
    }

    // -------------------------------------------------------------------------
    // Media
    // -------------------------------------------------------------------------

    /// Upload a media file, returning its `media_id`.
    pub async fn upload_media(
        &self,
        kind: MediaKind,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        kind.validate_upload(filename, data.len())?;

        let token = self.get_access_token().await?;
        let url = format!("{API_BASE}/media/upload");
        let part = reqwest::multipart::Part::bytes(data).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("media", part);

        let response: UploadResponse = self
            .http
            .post(&url)
            .query(&[("access_token", token.as_str()), ("type", kind.as_str())])
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        response.status.check()?;

        let media_id = response.media_id.ok_or(WxError::Api {
            errcode: -1,
            errmsg: "upload response carried no media_id".to_string(),
        })?;
        info!(media_id, "media uploaded");
        Ok(media_id)
    }

    /// Download a media file by `media_id`.
    pub async fn download_media(&self, media_id: &str) -> Result<Vec<u8>> {
        let token = self.get_access_token().await?;
        let url = format!("{API_BASE}/media/get");
        let bytes = self
            .http
            .get(&url)
            .query(&[("access_token", token.as_str()), ("media_id", media_id)])
            .send()
            .await?
            .bytes()
            .await?;

        // The endpoint answers errors as a JSON body instead of media bytes.
        if bytes.first() == Some(&b'{') {
            if let Ok(status) = serde_json::from_slice::<ApiStatus>(&bytes) {
                if status.errcode != 0 {
                    warn!(media_id, errcode = status.errcode, "media download failed");
                    status.check()?;
                }
            }
        }
        Ok(bytes.to_vec())
    }

    // -------------------------------------------------------------------------
    // QR codes
    // -------------------------------------------------------------------------

    /// Create a promotional QR code for a scene.
    pub async fn create_qrcode(&self, scene: &QrScene) -> Result<QrTicket> {
        let url = format!("{API_BASE}/qrcode/create");
        let body = scene.to_request()?;
        let response: QrTicketResponse = self.api_post(&url, &body).await?;
        response.status.check()?;

        let ticket = response.ticket.ok_or(WxError::Api {
            errcode: -1,
            errmsg: "qrcode/create response carried no ticket".to_string(),
        })?;
        info!(ticket, "qr code created");
        Ok(QrTicket {
            ticket,
            expire_seconds: response.expire_seconds,
            url: response.url,
        })
    }

    /// URL that serves the QR-code image for a ticket. Whether to hand the
    /// URL out or download the image is up to the caller.
    pub fn qrcode_image_url(ticket: &str) -> Result<String> {
        let url = reqwest::Url::parse_with_params(SHOW_QRCODE_URL, &[("ticket", ticket)])
            .map_err(|e| WxError::validation(format!("invalid qr ticket: {e}")))?;
        Ok(url.to_string())
    }
}
