//! Typed model for inbound webhook messages and events.
//!
//! The platform posts a flat XML document to the webhook endpoint: tag/value
//! pairs under a root `<xml>` element, discriminated by `MsgType` (and
//! `Event` for event pushes). [`parse`] turns one payload into exactly one
//! [`Incoming`] value or fails; it never guesses.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::Event as XmlEvent;
use tracing::{error, warn};

use crate::error::{Result, WxError};

/// Ticket prefix that marks a QR-scene subscription.
pub const QR_SCENE_PREFIX: &str = "qrscene_";

// =============================================================================
// Flat XML mapping
// =============================================================================

/// Flat tag → text mapping of a webhook payload.
///
/// Webhook payloads carry no nested structure; a single reader pass over the
/// children of the root element is enough. Values may arrive as plain text
/// or CDATA, both are accepted.
#[derive(Debug, Clone, Default)]
pub struct FlatXml {
    fields: HashMap<String, String>,
}

impl FlatXml {
    /// Parse a payload into the flat mapping.
    ///
    /// Malformed XML fails with [`WxError::Parse`]; the offending payload is
    /// logged so the broken request can be diagnosed later.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut fields = HashMap::new();
        let mut depth = 0usize;
        let mut current: Option<String> = None;

        loop {
            match reader.read_event() {
                Ok(XmlEvent::Start(e)) => {
                    depth += 1;
                    if depth == 2 {
                        current = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    }
                }
                Ok(XmlEvent::Empty(e)) => {
                    if depth == 1 {
                        let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        fields.entry(tag).or_insert_with(String::new);
                    }
                }
                Ok(XmlEvent::Text(t)) => {
                    if depth == 2 {
                        if let Some(tag) = &current {
                            let text = t
                                .unescape()
                                .map_err(|e| WxError::parse(e.to_string()))?
                                .into_owned();
                            fields.insert(tag.clone(), text);
                        }
                    }
                }
                Ok(XmlEvent::CData(t)) => {
                    if depth == 2 {
                        if let Some(tag) = &current {
                            let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                            fields.insert(tag.clone(), text);
                        }
                    }
                }
                Ok(XmlEvent::End(_)) => {
                    if depth == 2 {
                        if let Some(tag) = current.take() {
                            // <Tag></Tag> counts as present-but-empty
                            fields.entry(tag).or_insert_with(String::new);
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                Ok(XmlEvent::Eof) => {
                    if depth != 0 {
                        error!(payload = xml, "webhook payload truncated");
                        return Err(WxError::parse("unexpected end of document"));
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(payload = xml, "failed to parse webhook payload: {e}");
                    return Err(WxError::parse(e.to_string()));
                }
            }
        }

        Ok(Self { fields })
    }

    /// Text of a tag, if present.
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields.get(tag).map(String::as_str)
    }

    fn required(&self, tag: &str) -> Result<&str> {
        self.get(tag)
            .ok_or_else(|| WxError::validation(format!("missing required field {tag}")))
    }

    fn required_i64(&self, tag: &str) -> Result<i64> {
        self.required(tag)?
            .parse()
            .map_err(|_| WxError::validation(format!("field {tag} is not an integer")))
    }

    fn required_f64(&self, tag: &str) -> Result<f64> {
        self.required(tag)?
            .parse()
            .map_err(|_| WxError::validation(format!("field {tag} is not a number")))
    }
}

// =============================================================================
// Common envelope
// =============================================================================

/// Fields common to every inbound message and event.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Open ID of the sending user.
    pub from_id: String,
    /// Account identifier of the receiving Official Account.
    pub to_id: String,
    /// Unix timestamp the platform attached to the push.
    pub time: i64,
}

impl Envelope {
    fn from_xml(xml: &FlatXml) -> Result<Self> {
        Ok(Self {
            from_id: xml.required("FromUserName")?.to_string(),
            to_id: xml.required("ToUserName")?.to_string(),
            time: xml.required_i64("CreateTime")?,
        })
    }
}

fn msg_type(xml: &FlatXml) -> Result<String> {
    Ok(xml.required("MsgType")?.to_ascii_lowercase())
}

fn expect_msg_type(xml: &FlatXml, expected: &str) -> Result<()> {
    let actual = msg_type(xml)?;
    if actual != expected {
        return Err(WxError::validation(format!(
            "expected MsgType {expected}, got {actual}"
        )));
    }
    Ok(())
}

fn expect_event(xml: &FlatXml, expected: &str) -> Result<()> {
    expect_msg_type(xml, "event")?;
    let actual = xml.required("Event")?.to_ascii_lowercase();
    if actual != expected {
        return Err(WxError::validation(format!(
            "expected Event {expected}, got {actual}"
        )));
    }
    Ok(())
}

fn message_header(xml: &FlatXml) -> Result<(Envelope, i64)> {
    Ok((Envelope::from_xml(xml)?, xml.required_i64("MsgId")?))
}

// =============================================================================
// Message variants (carry a MsgId)
// =============================================================================

/// Plain text message.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMessage {
    pub envelope: Envelope,
    pub message_id: i64,
    pub content: String,
}

impl TextMessage {
    pub fn from_xml(xml: &FlatXml) -> Result<Self> {
        expect_msg_type(xml, "text")?;
        let (envelope, message_id) = message_header(xml)?;
        Ok(Self {
            envelope,
            message_id,
            content: xml.required("Content")?.to_string(),
        })
    }
}

/// Image message; the platform hosts the image at `image_link`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMessage {
    pub envelope: Envelope,
    pub message_id: i64,
    pub media_id: String,
    pub image_link: String,
}

impl ImageMessage {
    pub fn from_xml(xml: &FlatXml) -> Result<Self> {
        expect_msg_type(xml, "image")?;
        let (envelope, message_id) = message_header(xml)?;
        Ok(Self {
            envelope,
            message_id,
            media_id: xml.required("MediaId")?.to_string(),
            image_link: xml.required("PicUrl")?.to_string(),
        })
    }
}

/// Voice message. `recognition` is the platform's speech-to-text result and
/// is only present when the account has that feature enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceMessage {
    pub envelope: Envelope,
    pub message_id: i64,
    pub media_id: String,
    pub format: String,
    pub recognition: Option<String>,
}

impl VoiceMessage {
    pub fn from_xml(xml: &FlatXml) -> Result<Self> {
        expect_msg_type(xml, "voice")?;
        let (envelope, message_id) = message_header(xml)?;
        Ok(Self {
            envelope,
            message_id,
            media_id: xml.required("MediaId")?.to_string(),
            format: xml.required("Format")?.to_string(),
            recognition: xml.get("Recognition").map(str::to_string),
        })
    }
}

/// Video message.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMessage {
    pub envelope: Envelope,
    pub message_id: i64,
    pub media_id: String,
    pub thumb_media_id: String,
}

impl VideoMessage {
    pub fn from_xml(xml: &FlatXml) -> Result<Self> {
        expect_msg_type(xml, "video")?;
        let (envelope, message_id) = message_header(xml)?;
        Ok(Self {
            envelope,
            message_id,
            media_id: xml.required("MediaId")?.to_string(),
            thumb_media_id: xml.required("ThumbMediaId")?.to_string(),
        })
    }
}

/// Shared-location message.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationMessage {
    pub envelope: Envelope,
    pub message_id: i64,
    /// Latitude.
    pub x: f64,
    /// Longitude.
    pub y: f64,
    /// Map zoom level.
    pub scale: i64,
    /// Human-readable place label.
    pub label: String,
}

impl LocationMessage {
    pub fn from_xml(xml: &FlatXml) -> Result<Self> {
        expect_msg_type(xml, "location")?;
        let (envelope, message_id) = message_header(xml)?;
        Ok(Self {
            envelope,
            message_id,
            x: xml.required_f64("Location_X")?,
            y: xml.required_f64("Location_Y")?,
            scale: xml.required_i64("Scale")?,
            label: xml.required("Label")?.to_string(),
        })
    }
}

/// Shared-link message.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkMessage {
    pub envelope: Envelope,
    pub message_id: i64,
    pub title: String,
    pub description: String,
    pub link: String,
}

impl LinkMessage {
    pub fn from_xml(xml: &FlatXml) -> Result<Self> {
        expect_msg_type(xml, "link")?;
        let (envelope, message_id) = message_header(xml)?;
        Ok(Self {
            envelope,
            message_id,
            title: xml.required("Title")?.to_string(),
            description: xml.required("Description")?.to_string(),
            link: xml.required("Url")?.to_string(),
        })
    }
}

// =============================================================================
// Event variants (no MsgId)
// =============================================================================

/// User followed the account. A non-empty `event_key` marks a QR-scene
/// subscription and must come with a `qrscene_`-prefixed ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeEvent {
    pub envelope: Envelope,
    pub event_key: Option<String>,
    pub ticket: Option<String>,
}

impl SubscribeEvent {
    pub fn from_xml(xml: &FlatXml) -> Result<Self> {
        expect_event(xml, "subscribe")?;
        // The platform sends an empty EventKey CDATA on plain subscribes;
        // treat that the same as no key at all.
        let event_key = xml.get("EventKey").filter(|k| !k.is_empty());
        let ticket = xml.get("Ticket").filter(|t| !t.is_empty());
        if event_key.is_some() {
            match ticket {
                Some(t) if t.starts_with(QR_SCENE_PREFIX) => {}
                _ => {
                    return Err(WxError::validation(format!(
                        "subscribe with EventKey requires a {QR_SCENE_PREFIX}-prefixed Ticket"
                    )));
                }
            }
        }
        Ok(Self {
            envelope: Envelope::from_xml(xml)?,
            event_key: event_key.map(str::to_string),
            ticket: ticket.map(str::to_string),
        })
    }
}

/// User unfollowed the account.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsubscribeEvent {
    pub envelope: Envelope,
}

impl UnsubscribeEvent {
    pub fn from_xml(xml: &FlatXml) -> Result<Self> {
        expect_event(xml, "unsubscribe")?;
        Ok(Self {
            envelope: Envelope::from_xml(xml)?,
        })
    }
}

/// Already-subscribed user scanned a QR code.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEvent {
    pub envelope: Envelope,
    pub event_key: String,
    pub ticket: String,
}

impl ScanEvent {
    pub fn from_xml(xml: &FlatXml) -> Result<Self> {
        expect_event(xml, "scan")?;
        Ok(Self {
            envelope: Envelope::from_xml(xml)?,
            event_key: xml.required("EventKey")?.to_string(),
            ticket: xml.required("Ticket")?.to_string(),
        })
    }
}

/// User tapped a custom-menu button.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickEvent {
    pub envelope: Envelope,
    pub event_key: String,
}

impl ClickEvent {
    pub fn from_xml(xml: &FlatXml) -> Result<Self> {
        expect_event(xml, "click")?;
        Ok(Self {
            envelope: Envelope::from_xml(xml)?,
            event_key: xml.required("EventKey")?.to_string(),
        })
    }
}

/// User tapped a custom-menu link; `event_key` is the target URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewEvent {
    pub envelope: Envelope,
    pub event_key: String,
}

impl ViewEvent {
    pub fn from_xml(xml: &FlatXml) -> Result<Self> {
        expect_event(xml, "view")?;
        Ok(Self {
            envelope: Envelope::from_xml(xml)?,
            event_key: xml.required("EventKey")?.to_string(),
        })
    }
}

/// Periodic location report. Same field names as [`LocationMessage`] but
/// different semantics: `scale` is the reported precision, not a zoom level.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationEvent {
    pub envelope: Envelope,
    /// Latitude.
    pub x: f64,
    /// Longitude.
    pub y: f64,
    /// Location precision.
    pub scale: f64,
}

impl LocationEvent {
    pub fn from_xml(xml: &FlatXml) -> Result<Self> {
        expect_event(xml, "location")?;
        Ok(Self {
            envelope: Envelope::from_xml(xml)?,
            x: xml.required_f64("Latitude")?,
            y: xml.required_f64("Longitude")?,
            scale: xml.required_f64("Precision")?,
        })
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// One parsed webhook payload: a user message or a platform event.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Text(TextMessage),
    Image(ImageMessage),
    Voice(VoiceMessage),
    Video(VideoMessage),
    Location(LocationMessage),
    Link(LinkMessage),
    Subscribe(SubscribeEvent),
    Unsubscribe(UnsubscribeEvent),
    Scan(ScanEvent),
    Click(ClickEvent),
    View(ViewEvent),
    LocationReport(LocationEvent),
}

impl Incoming {
    /// Common envelope of any variant.
    pub fn envelope(&self) -> &Envelope {
        match self {
            Incoming::Text(m) => &m.envelope,
            Incoming::Image(m) => &m.envelope,
            Incoming::Voice(m) => &m.envelope,
            Incoming::Video(m) => &m.envelope,
            Incoming::Location(m) => &m.envelope,
            Incoming::Link(m) => &m.envelope,
            Incoming::Subscribe(e) => &e.envelope,
            Incoming::Unsubscribe(e) => &e.envelope,
            Incoming::Scan(e) => &e.envelope,
            Incoming::Click(e) => &e.envelope,
            Incoming::View(e) => &e.envelope,
            Incoming::LocationReport(e) => &e.envelope,
        }
    }

    /// Message ID, for message variants.
    pub fn message_id(&self) -> Option<i64> {
        match self {
            Incoming::Text(m) => Some(m.message_id),
            Incoming::Image(m) => Some(m.message_id),
            Incoming::Voice(m) => Some(m.message_id),
            Incoming::Video(m) => Some(m.message_id),
            Incoming::Location(m) => Some(m.message_id),
            Incoming::Link(m) => Some(m.message_id),
            _ => None,
        }
    }
}

/// Parse one webhook payload into a typed [`Incoming`] value.
///
/// A payload with a `MsgId` is a user message dispatched on `MsgType`;
/// anything else must carry `MsgType` `event` and is dispatched on `Event`.
/// Unknown discriminators fail with [`WxError::UnsupportedType`].
pub fn parse(xml: &str) -> Result<Incoming> {
    let fields = FlatXml::parse(xml)?;

    if fields.get("MsgId").is_some() {
        let ty = msg_type(&fields)?;
        match ty.as_str() {
            "text" => Ok(Incoming::Text(TextMessage::from_xml(&fields)?)),
            "image" => Ok(Incoming::Image(ImageMessage::from_xml(&fields)?)),
            "voice" => Ok(Incoming::Voice(VoiceMessage::from_xml(&fields)?)),
            "video" => Ok(Incoming::Video(VideoMessage::from_xml(&fields)?)),
            "link" => Ok(Incoming::Link(LinkMessage::from_xml(&fields)?)),
            "location" => Ok(Incoming::Location(LocationMessage::from_xml(&fields)?)),
            other => {
                warn!(payload = xml, msg_type = other, "unknown message type");
                Err(WxError::UnsupportedType(other.to_string()))
            }
        }
    } else {
        if fields.get("MsgType") != Some("event") {
            let ty = fields.get("MsgType").unwrap_or("").to_string();
            warn!(payload = xml, "payload is neither a message nor an event");
            return Err(WxError::UnsupportedType(ty));
        }
        let event = fields.required("Event")?.to_ascii_lowercase();
        match event.as_str() {
            "subscribe" => Ok(Incoming::Subscribe(SubscribeEvent::from_xml(&fields)?)),
            "unsubscribe" => Ok(Incoming::Unsubscribe(UnsubscribeEvent::from_xml(&fields)?)),
            "scan" => Ok(Incoming::Scan(ScanEvent::from_xml(&fields)?)),
            "click" => Ok(Incoming::Click(ClickEvent::from_xml(&fields)?)),
            "view" => Ok(Incoming::View(ViewEvent::from_xml(&fields)?)),
            "location" => Ok(Incoming::LocationReport(LocationEvent::from_xml(&fields)?)),
            other => {
                warn!(payload = xml, event = other, "unknown event type");
                Err(WxError::UnsupportedType(other.to_string()))
            }
        }
    }
}

/// [`parse`] for a raw request body. The platform sends UTF-8.
pub fn parse_bytes(payload: &[u8]) -> Result<Incoming> {
    let xml = std::str::from_utf8(payload).map_err(|e| {
        error!("webhook payload is not valid utf-8: {e}");
        WxError::parse(format!("payload is not valid utf-8: {e}"))
    })?;
    parse(xml)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_xml(content: &str) -> String {
        format!(
            "<xml>\
             <ToUserName><![CDATA[gh_account]]></ToUserName>\
             <FromUserName><![CDATA[openid123]]></FromUserName>\
             <CreateTime>1348831860</CreateTime>\
             <MsgType><![CDATA[text]]></MsgType>\
             <Content><![CDATA[{content}]]></Content>\
             <MsgId>1234567890123456</MsgId>\
             </xml>"
        )
    }

    #[test]
    fn test_text_message() {
        let msg = parse(&text_xml("this is a test")).unwrap();
        let Incoming::Text(text) = msg else {
            panic!("expected text message");
        };
        assert_eq!(text.content, "this is a test");
        assert_eq!(text.envelope.from_id, "openid123");
        assert_eq!(text.envelope.to_id, "gh_account");
        assert_eq!(text.envelope.time, 1348831860);
        assert_eq!(text.message_id, 1234567890123456);
    }

    #[test]
    fn test_text_without_cdata() {
        let xml = "<xml>\
                   <ToUserName>gh_account</ToUserName>\
                   <FromUserName>openid123</FromUserName>\
                   <CreateTime>1348831860</CreateTime>\
                   <MsgType>text</MsgType>\
                   <Content>hello &amp; goodbye</Content>\
                   <MsgId>42</MsgId>\
                   </xml>";
        let Incoming::Text(text) = parse(xml).unwrap() else {
            panic!("expected text message");
        };
        assert_eq!(text.content, "hello & goodbye");
    }

    #[test]
    fn test_image_message() {
        let xml = "<xml>\
                   <ToUserName><![CDATA[gh_account]]></ToUserName>\
                   <FromUserName><![CDATA[openid123]]></FromUserName>\
                   <CreateTime>1348831860</CreateTime>\
                   <MsgType><![CDATA[image]]></MsgType>\
                   <PicUrl><![CDATA[http://example.com/pic.jpg]]></PicUrl>\
                   <MediaId><![CDATA[media_001]]></MediaId>\
                   <MsgId>7</MsgId>\
                   </xml>";
        let Incoming::Image(img) = parse(xml).unwrap() else {
            panic!("expected image message");
        };
        assert_eq!(img.media_id, "media_001");
        assert_eq!(img.image_link, "http://example.com/pic.jpg");
    }

    #[test]
    fn test_voice_message_with_and_without_recognition() {
        let base = "<xml>\
                    <ToUserName><![CDATA[gh_account]]></ToUserName>\
                    <FromUserName><![CDATA[openid123]]></FromUserName>\
                    <CreateTime>1348831860</CreateTime>\
                    <MsgType><![CDATA[voice]]></MsgType>\
                    <MediaId><![CDATA[voice_001]]></MediaId>\
                    <Format><![CDATA[amr]]></Format>\
                    <MsgId>8</MsgId>\
                    </xml>";
        let Incoming::Voice(voice) = parse(base).unwrap() else {
            panic!("expected voice message");
        };
        assert_eq!(voice.format, "amr");
        assert_eq!(voice.recognition, None);

        let with_reco = base.replace(
            "<MsgId>8</MsgId>",
            "<Recognition><![CDATA[你好]]></Recognition><MsgId>8</MsgId>",
        );
        let Incoming::Voice(voice) = parse(&with_reco).unwrap() else {
            panic!("expected voice message");
        };
        assert_eq!(voice.recognition.as_deref(), Some("你好"));
    }

    #[test]
    fn test_video_message() {
        let xml = "<xml>\
                   <ToUserName><![CDATA[gh_account]]></ToUserName>\
                   <FromUserName><![CDATA[openid123]]></FromUserName>\
                   <CreateTime>1348831860</CreateTime>\
                   <MsgType><![CDATA[video]]></MsgType>\
                   <MediaId><![CDATA[video_001]]></MediaId>\
                   <ThumbMediaId><![CDATA[thumb_001]]></ThumbMediaId>\
                   <MsgId>9</MsgId>\
                   </xml>";
        let Incoming::Video(video) = parse(xml).unwrap() else {
            panic!("expected video message");
        };
        assert_eq!(video.thumb_media_id, "thumb_001");
    }

    #[test]
    fn test_location_message() {
        let xml = "<xml>\
                   <ToUserName><![CDATA[gh_account]]></ToUserName>\
                   <FromUserName><![CDATA[openid123]]></FromUserName>\
                   <CreateTime>1348831860</CreateTime>\
                   <MsgType><![CDATA[location]]></MsgType>\
                   <Location_X>23.134521</Location_X>\
                   <Location_Y>113.358803</Location_Y>\
                   <Scale>20</Scale>\
                   <Label><![CDATA[somewhere]]></Label>\
                   <MsgId>10</MsgId>\
                   </xml>";
        let Incoming::Location(loc) = parse(xml).unwrap() else {
            panic!("expected location message");
        };
        assert_eq!(loc.x, 23.134521);
        assert_eq!(loc.y, 113.358803);
        assert_eq!(loc.scale, 20);
        assert_eq!(loc.label, "somewhere");
    }

    #[test]
    fn test_link_message() {
        let xml = "<xml>\
                   <ToUserName><![CDATA[gh_account]]></ToUserName>\
                   <FromUserName><![CDATA[openid123]]></FromUserName>\
                   <CreateTime>1348831860</CreateTime>\
                   <MsgType><![CDATA[link]]></MsgType>\
                   <Title><![CDATA[a page]]></Title>\
                   <Description><![CDATA[about something]]></Description>\
                   <Url><![CDATA[http://example.com]]></Url>\
                   <MsgId>11</MsgId>\
                   </xml>";
        let Incoming::Link(link) = parse(xml).unwrap() else {
            panic!("expected link message");
        };
        assert_eq!(link.title, "a page");
        assert_eq!(link.link, "http://example.com");
    }

    fn event_xml(body: &str) -> String {
        format!(
            "<xml>\
             <ToUserName><![CDATA[gh_account]]></ToUserName>\
             <FromUserName><![CDATA[openid123]]></FromUserName>\
             <CreateTime>1348831860</CreateTime>\
             <MsgType><![CDATA[event]]></MsgType>\
             {body}\
             </xml>"
        )
    }

    #[test]
    fn test_plain_subscribe() {
        let xml = event_xml("<Event><![CDATA[subscribe]]></Event>");
        let Incoming::Subscribe(sub) = parse(&xml).unwrap() else {
            panic!("expected subscribe event");
        };
        assert_eq!(sub.event_key, None);
        assert_eq!(sub.ticket, None);
    }

    #[test]
    fn test_subscribe_with_empty_event_key() {
        let xml = event_xml(
            "<Event><![CDATA[subscribe]]></Event>\
             <EventKey><![CDATA[]]></EventKey>",
        );
        let Incoming::Subscribe(sub) = parse(&xml).unwrap() else {
            panic!("expected subscribe event");
        };
        assert_eq!(sub.event_key, None);
    }

    #[test]
    fn test_qr_scene_subscribe() {
        let xml = event_xml(
            "<Event><![CDATA[subscribe]]></Event>\
             <EventKey><![CDATA[qrscene_123123]]></EventKey>\
             <Ticket><![CDATA[qrscene_TICKET]]></Ticket>",
        );
        let Incoming::Subscribe(sub) = parse(&xml).unwrap() else {
            panic!("expected subscribe event");
        };
        assert_eq!(sub.event_key.as_deref(), Some("qrscene_123123"));
        assert_eq!(sub.ticket.as_deref(), Some("qrscene_TICKET"));
    }

    #[test]
    fn test_subscribe_with_bad_ticket_prefix_fails() {
        let xml = event_xml(
            "<Event><![CDATA[subscribe]]></Event>\
             <EventKey><![CDATA[qrscene_123123]]></EventKey>\
             <Ticket><![CDATA[TICKET]]></Ticket>",
        );
        assert!(matches!(parse(&xml), Err(WxError::Validation(_))));
    }

    #[test]
    fn test_subscribe_with_key_but_no_ticket_fails() {
        let xml = event_xml(
            "<Event><![CDATA[subscribe]]></Event>\
             <EventKey><![CDATA[qrscene_123123]]></EventKey>",
        );
        assert!(matches!(parse(&xml), Err(WxError::Validation(_))));
    }

    #[test]
    fn test_unsubscribe() {
        let xml = event_xml("<Event><![CDATA[unsubscribe]]></Event>");
        assert!(matches!(parse(&xml), Ok(Incoming::Unsubscribe(_))));
    }

    #[test]
    fn test_scan_event() {
        let xml = event_xml(
            "<Event><![CDATA[SCAN]]></Event>\
             <EventKey><![CDATA[123123]]></EventKey>\
             <Ticket><![CDATA[TICKET]]></Ticket>",
        );
        let Incoming::Scan(scan) = parse(&xml).unwrap() else {
            panic!("expected scan event");
        };
        assert_eq!(scan.event_key, "123123");
        assert_eq!(scan.ticket, "TICKET");
    }

    #[test]
    fn test_scan_event_missing_ticket_fails() {
        let xml = event_xml(
            "<Event><![CDATA[SCAN]]></Event>\
             <EventKey><![CDATA[123123]]></EventKey>",
        );
        assert!(matches!(parse(&xml), Err(WxError::Validation(_))));
    }

    #[test]
    fn test_click_and_view_events() {
        let xml = event_xml(
            "<Event><![CDATA[CLICK]]></Event>\
             <EventKey><![CDATA[MENU_KEY_1]]></EventKey>",
        );
        let Incoming::Click(click) = parse(&xml).unwrap() else {
            panic!("expected click event");
        };
        assert_eq!(click.event_key, "MENU_KEY_1");

        let xml = event_xml(
            "<Event><![CDATA[VIEW]]></Event>\
             <EventKey><![CDATA[http://example.com]]></EventKey>",
        );
        let Incoming::View(view) = parse(&xml).unwrap() else {
            panic!("expected view event");
        };
        assert_eq!(view.event_key, "http://example.com");
    }

    #[test]
    fn test_location_event() {
        let xml = event_xml(
            "<Event><![CDATA[LOCATION]]></Event>\
             <Latitude>23.137466</Latitude>\
             <Longitude>113.352425</Longitude>\
             <Precision>119.385040</Precision>",
        );
        let Incoming::LocationReport(loc) = parse(&xml).unwrap() else {
            panic!("expected location event");
        };
        assert_eq!(loc.x, 23.137466);
        assert_eq!(loc.y, 113.352425);
        assert_eq!(loc.scale, 119.385040);
    }

    #[test]
    fn test_unknown_message_type() {
        let xml = "<xml>\
                   <ToUserName><![CDATA[gh_account]]></ToUserName>\
                   <FromUserName><![CDATA[openid123]]></FromUserName>\
                   <CreateTime>1348831860</CreateTime>\
                   <MsgType><![CDATA[bogus]]></MsgType>\
                   <MsgId>12</MsgId>\
                   </xml>";
        match parse(xml) {
            Err(WxError::UnsupportedType(ty)) => assert_eq!(ty, "bogus"),
            other => panic!("expected UnsupportedType, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let xml = event_xml("<Event><![CDATA[bogus]]></Event>");
        match parse(&xml) {
            Err(WxError::UnsupportedType(ty)) => assert_eq!(ty, "bogus"),
            other => panic!("expected UnsupportedType, got {other:?}"),
        }
    }

    #[test]
    fn test_non_event_without_msg_id() {
        // No MsgId and MsgType is not "event": not a known shape at all.
        let xml = "<xml>\
                   <ToUserName><![CDATA[gh_account]]></ToUserName>\
                   <FromUserName><![CDATA[openid123]]></FromUserName>\
                   <CreateTime>1348831860</CreateTime>\
                   <MsgType><![CDATA[bogus]]></MsgType>\
                   </xml>";
        assert!(matches!(parse(xml), Err(WxError::UnsupportedType(_))));
    }

    #[test]
    fn test_missing_required_field() {
        let xml = "<xml>\
                   <ToUserName><![CDATA[gh_account]]></ToUserName>\
                   <FromUserName><![CDATA[openid123]]></FromUserName>\
                   <CreateTime>1348831860</CreateTime>\
                   <MsgType><![CDATA[text]]></MsgType>\
                   <MsgId>13</MsgId>\
                   </xml>";
        assert!(matches!(parse(xml), Err(WxError::Validation(_))));
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            parse("<xml><Content>oops"),
            Err(WxError::Parse { .. })
        ));
        assert!(matches!(
            parse("<xml><a></b></xml>"),
            Err(WxError::Parse { .. })
        ));
    }

    #[test]
    fn test_discriminator_revalidation() {
        // Constructing a variant directly from a mismatched mapping fails.
        let fields = FlatXml::parse(&text_xml("hi")).unwrap();
        assert!(matches!(
            ImageMessage::from_xml(&fields),
            Err(WxError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_bytes_rejects_invalid_utf8() {
        assert!(matches!(
            parse_bytes(&[0xff, 0xfe, 0x00]),
            Err(WxError::Parse { .. })
        ));
    }
}
