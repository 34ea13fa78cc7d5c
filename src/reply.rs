//! Reply construction and wire-XML rendering.
//!
//! Replies to webhook pushes go back in the HTTP response body, either as the
//! literal `success` marker (nothing to say) or as an XML document the
//! platform matches byte for byte: fixed field order, user-supplied strings
//! wrapped in CDATA, integers bare.

use tracing::warn;

use crate::error::{Result, WxError};
use crate::message::Envelope;

/// Literal response body for a reply with no content.
pub const EMPTY_REPLY_BODY: &str = "success";

/// Maximum number of articles in a news reply, fixed by the platform.
pub const MAX_NEWS_ARTICLES: usize = 8;

// =============================================================================
// XML node tree
// =============================================================================

#[derive(Debug, Clone)]
enum XmlValue {
    Int(i64),
    Text(String),
    Fragment(XmlNode),
}

/// Ordered XML tree with an optional enclosing tag.
///
/// A `(Some(tag), value)` child is a tagged leaf; `(None, value)` splices the
/// value in place without a wrapper, which is how sub-trees (article lists)
/// and bare counters are composed into a parent.
#[derive(Debug, Clone)]
struct XmlNode {
    root: Option<&'static str>,
    children: Vec<(Option<&'static str>, XmlValue)>,
}

impl XmlNode {
    fn new(root: Option<&'static str>) -> Self {
        Self {
            root,
            children: Vec::new(),
        }
    }

    fn add(&mut self, tag: Option<&'static str>, value: XmlValue) {
        self.children.push((tag, value));
    }

    fn add_text(&mut self, tag: &'static str, value: impl Into<String>) {
        self.add(Some(tag), XmlValue::Text(value.into()));
    }

    fn add_int(&mut self, tag: &'static str, value: i64) {
        self.add(Some(tag), XmlValue::Int(value));
    }

    fn add_fragment(&mut self, node: XmlNode) {
        self.add(None, XmlValue::Fragment(node));
    }

    fn render_into(&self, out: &mut String) {
        if let Some(root) = self.root {
            out.push('<');
            out.push_str(root);
            out.push('>');
        }
        for (tag, value) in &self.children {
            match (tag, value) {
                (Some(tag), XmlValue::Int(n)) => {
                    out.push_str(&format!("<{tag}>{n}</{tag}>"));
                }
                (Some(tag), XmlValue::Text(s)) => {
                    out.push_str(&format!("<{tag}><![CDATA[{s}]]></{tag}>"));
                }
                (None, XmlValue::Int(n)) => {
                    out.push_str(&n.to_string());
                }
                (None, XmlValue::Text(s)) => {
                    out.push_str(s);
                }
                (None, XmlValue::Fragment(node)) => {
                    node.render_into(out);
                }
                // A tagged sub-tree has no defined wire shape. Keep rendering
                // so one odd node cannot take the reply down, but make the
                // regression visible.
                (Some(tag), XmlValue::Fragment(_)) => {
                    warn!(tag, "skipping node with no wire representation");
                }
            }
        }
        if let Some(root) = self.root {
            out.push_str("</");
            out.push_str(root);
            out.push('>');
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }
}

// =============================================================================
// Reply envelope
// =============================================================================

/// Addressing for a reply: the inbound envelope with the endpoints swapped
/// and a fresh timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEnvelope {
    /// Open ID of the user the reply goes to (the inbound `from_id`).
    pub to_id: String,
    /// Account identifier the reply is sent as (the inbound `to_id`).
    pub from_id: String,
    /// Unix timestamp of construction.
    pub time: i64,
}

impl ReplyEnvelope {
    /// Build the reply addressing from the event being answered.
    ///
    /// Fails at construction if either endpoint is empty; a reply with a
    /// blank address would be rejected by the platform at delivery time,
    /// which is far harder to trace back.
    pub fn for_sender(sender: &Envelope) -> Result<Self> {
        if sender.from_id.is_empty() {
            return Err(WxError::validation("sender FromUserName is empty"));
        }
        if sender.to_id.is_empty() {
            return Err(WxError::validation("sender ToUserName is empty"));
        }
        Ok(Self {
            to_id: sender.from_id.clone(),
            from_id: sender.to_id.clone(),
            time: chrono::Utc::now().timestamp(),
        })
    }
}

// =============================================================================
// Reply variants
// =============================================================================

/// One article of a news reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub link: String,
}

impl Article {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        image_url: impl Into<String>,
        link: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            image_url: image_url.into(),
            link: link.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ReplyBody {
    Empty,
    Text {
        content: String,
    },
    Image {
        media_id: String,
    },
    Voice {
        media_id: String,
    },
    Video {
        media_id: String,
        title: String,
        description: String,
    },
    Music {
        title: String,
        description: String,
        music_url: String,
        music_url_hq: String,
        thumb_media_id: String,
    },
    News {
        articles: Vec<Article>,
    },
}

/// A reply to an inbound message or event. Constructed once, rendered once.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    envelope: ReplyEnvelope,
    body: ReplyBody,
}

impl Reply {
    /// No-content reply; renders as the literal success marker.
    pub fn empty(sender: &Envelope) -> Result<Self> {
        Ok(Self {
            envelope: ReplyEnvelope::for_sender(sender)?,
            body: ReplyBody::Empty,
        })
    }

    pub fn text(sender: &Envelope, content: impl Into<String>) -> Result<Self> {
        Ok(Self {
            envelope: ReplyEnvelope::for_sender(sender)?,
            body: ReplyBody::Text {
                content: content.into(),
            },
        })
    }

    pub fn image(sender: &Envelope, media_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            envelope: ReplyEnvelope::for_sender(sender)?,
            body: ReplyBody::Image {
                media_id: media_id.into(),
            },
        })
    }

    pub fn voice(sender: &Envelope, media_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            envelope: ReplyEnvelope::for_sender(sender)?,
            body: ReplyBody::Voice {
                media_id: media_id.into(),
            },
        })
    }

    pub fn video(
        sender: &Envelope,
        media_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            envelope: ReplyEnvelope::for_sender(sender)?,
            body: ReplyBody::Video {
                media_id: media_id.into(),
                title: title.into(),
                description: description.into(),
            },
        })
    }

    pub fn music(
        sender: &Envelope,
        title: impl Into<String>,
        description: impl Into<String>,
        music_url: impl Into<String>,
        music_url_hq: impl Into<String>,
        thumb_media_id: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            envelope: ReplyEnvelope::for_sender(sender)?,
            body: ReplyBody::Music {
                title: title.into(),
                description: description.into(),
                music_url: music_url.into(),
                music_url_hq: music_url_hq.into(),
                thumb_media_id: thumb_media_id.into(),
            },
        })
    }

    /// News reply with its first article. More can be appended with
    /// [`Reply::push_article`].
    pub fn news(sender: &Envelope, first: Article) -> Result<Self> {
        Ok(Self {
            envelope: ReplyEnvelope::for_sender(sender)?,
            body: ReplyBody::News {
                articles: vec![first],
            },
        })
    }

    /// Append an article to a news reply.
    ///
    /// The platform caps a news reply at eight articles; extras are dropped
    /// with a warning rather than failing the whole reply. Calling this on a
    /// non-news reply is also a warning, not an error.
    pub fn push_article(&mut self, article: Article) {
        match &mut self.body {
            ReplyBody::News { articles } => {
                if articles.len() >= MAX_NEWS_ARTICLES {
                    warn!(
                        max = MAX_NEWS_ARTICLES,
                        dropped_title = article.title,
                        "news reply is full, dropping article"
                    );
                    return;
                }
                articles.push(article);
            }
            _ => warn!("push_article called on a non-news reply, ignoring"),
        }
    }

    /// Reply addressing (useful for logging and for asserting on output).
    pub fn envelope(&self) -> &ReplyEnvelope {
        &self.envelope
    }

    fn msg_type(&self) -> Option<&'static str> {
        match &self.body {
            ReplyBody::Empty => None,
            ReplyBody::Text { .. } => Some("text"),
            ReplyBody::Image { .. } => Some("image"),
            ReplyBody::Voice { .. } => Some("voice"),
            ReplyBody::Video { .. } => Some("video"),
            ReplyBody::Music { .. } => Some("music"),
            ReplyBody::News { .. } => Some("news"),
        }
    }

    fn body_node(&self) -> XmlNode {
        match &self.body {
            ReplyBody::Empty => XmlNode::new(None),
            ReplyBody::Text { content } => {
                let mut node = XmlNode::new(None);
                node.add_text("Content", content.clone());
                node
            }
            ReplyBody::Image { media_id } => {
                let mut node = XmlNode::new(Some("Image"));
                node.add_text("MediaId", media_id.clone());
                node
            }
            ReplyBody::Voice { media_id } => {
                let mut node = XmlNode::new(Some("Voice"));
                node.add_text("MediaId", media_id.clone());
                node
            }
            ReplyBody::Video {
                media_id,
                title,
                description,
            } => {
                let mut node = XmlNode::new(Some("Video"));
                node.add_text("MediaId", media_id.clone());
                node.add_text("Title", title.clone());
                node.add_text("Description", description.clone());
                node
            }
            ReplyBody::Music {
                title,
                description,
                music_url,
                music_url_hq,
                thumb_media_id,
            } => {
                let mut node = XmlNode::new(Some("Music"));
                node.add_text("Title", title.clone());
                node.add_text("Description", description.clone());
                node.add_text("MusicUrl", music_url.clone());
                node.add_text("HQMusicUrl", music_url_hq.clone());
                node.add_text("ThumbMediaId", thumb_media_id.clone());
                node
            }
            ReplyBody::News { articles } => {
                let mut count = XmlNode::new(Some("ArticleCount"));
                count.add(None, XmlValue::Int(articles.len() as i64));
                let mut list = XmlNode::new(Some("Articles"));
                for article in articles {
                    let mut item = XmlNode::new(Some("item"));
                    item.add_text("Title", article.title.clone());
                    item.add_text("Description", article.description.clone());
                    item.add_text("PicUrl", article.image_url.clone());
                    item.add_text("Url", article.link.clone());
                    list.add_fragment(item);
                }
                let mut node = XmlNode::new(None);
                node.add_fragment(count);
                node.add_fragment(list);
                node
            }
        }
    }

    /// Render the reply into the HTTP response body.
    pub fn render(&self) -> String {
        let Some(msg_type) = self.msg_type() else {
            return EMPTY_REPLY_BODY.to_string();
        };

        let mut root = XmlNode::new(Some("xml"));
        root.add_text("FromUserName", self.envelope.from_id.clone());
        root.add_text("ToUserName", self.envelope.to_id.clone());
        root.add_int("CreateTime", self.envelope.time);
        root.add_text("MsgType", msg_type);
        root.add_fragment(self.body_node());
        root.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Envelope {
        Envelope {
            from_id: "openid123".to_string(),
            to_id: "gh_account".to_string(),
            time: 1348831860,
        }
    }

    fn header(reply: &Reply, msg_type: &str) -> String {
        format!(
            "<xml>\
             <FromUserName><![CDATA[gh_account]]></FromUserName>\
             <ToUserName><![CDATA[openid123]]></ToUserName>\
             <CreateTime>{}</CreateTime>\
             <MsgType><![CDATA[{msg_type}]]></MsgType>",
            reply.envelope().time
        )
    }

    #[test]
    fn test_address_swap() {
        let reply = Reply::text(&sender(), "hi").unwrap();
        assert_eq!(reply.envelope().to_id, "openid123");
        assert_eq!(reply.envelope().from_id, "gh_account");
    }

    #[test]
    fn test_empty_sender_ids_rejected() {
        let mut bad = sender();
        bad.from_id.clear();
        assert!(matches!(
            Reply::text(&bad, "hi"),
            Err(WxError::Validation(_))
        ));

        let mut bad = sender();
        bad.to_id.clear();
        assert!(matches!(Reply::empty(&bad), Err(WxError::Validation(_))));
    }

    #[test]
    fn test_empty_reply_renders_success() {
        let reply = Reply::empty(&sender()).unwrap();
        assert_eq!(reply.render(), "success");
    }

    #[test]
    fn test_text_reply_render() {
        let reply = Reply::text(&sender(), "hello <&> world").unwrap();
        let expected = format!(
            "{}<Content><![CDATA[hello <&> world]]></Content></xml>",
            header(&reply, "text")
        );
        assert_eq!(reply.render(), expected);
    }

    #[test]
    fn test_image_and_voice_reply_render() {
        let reply = Reply::image(&sender(), "media_001").unwrap();
        let expected = format!(
            "{}<Image><MediaId><![CDATA[media_001]]></MediaId></Image></xml>",
            header(&reply, "image")
        );
        assert_eq!(reply.render(), expected);

        let reply = Reply::voice(&sender(), "voice_001").unwrap();
        let expected = format!(
            "{}<Voice><MediaId><![CDATA[voice_001]]></MediaId></Voice></xml>",
            header(&reply, "voice")
        );
        assert_eq!(reply.render(), expected);
    }

    #[test]
    fn test_video_reply_render() {
        let reply = Reply::video(&sender(), "video_001", "a title", "a description").unwrap();
        let expected = format!(
            "{}<Video>\
             <MediaId><![CDATA[video_001]]></MediaId>\
             <Title><![CDATA[a title]]></Title>\
             <Description><![CDATA[a description]]></Description>\
             </Video></xml>",
            header(&reply, "video")
        );
        assert_eq!(reply.render(), expected);
    }

    #[test]
    fn test_music_reply_field_order() {
        let reply = Reply::music(
            &sender(),
            "song",
            "an old song",
            "http://example.com/lo.mp3",
            "http://example.com/hq.mp3",
            "thumb_001",
        )
        .unwrap();
        let expected = format!(
            "{}<Music>\
             <Title><![CDATA[song]]></Title>\
             <Description><![CDATA[an old song]]></Description>\
             <MusicUrl><![CDATA[http://example.com/lo.mp3]]></MusicUrl>\
             <HQMusicUrl><![CDATA[http://example.com/hq.mp3]]></HQMusicUrl>\
             <ThumbMediaId><![CDATA[thumb_001]]></ThumbMediaId>\
             </Music></xml>",
            header(&reply, "music")
        );
        assert_eq!(reply.render(), expected);
    }

    #[test]
    fn test_news_reply_render() {
        let reply = Reply::news(&sender(), Article::new("T1", "D1", "P1", "L1")).unwrap();
        let expected = format!(
            "{}<ArticleCount>1</ArticleCount>\
             <Articles><item>\
             <Title><![CDATA[T1]]></Title>\
             <Description><![CDATA[D1]]></Description>\
             <PicUrl><![CDATA[P1]]></PicUrl>\
             <Url><![CDATA[L1]]></Url>\
             </item></Articles></xml>",
            header(&reply, "news")
        );
        assert_eq!(reply.render(), expected);
    }

    #[test]
    fn test_news_article_order_preserved() {
        let mut reply = Reply::news(&sender(), Article::new("T1", "D1", "P1", "L1")).unwrap();
        reply.push_article(Article::new("T2", "D2", "P2", "L2"));
        let rendered = reply.render();
        assert!(rendered.contains("<ArticleCount>2</ArticleCount>"));
        let first = rendered.find("T1").unwrap();
        let second = rendered.find("T2").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_ninth_article_dropped() {
        let mut reply = Reply::news(&sender(), Article::new("T1", "D1", "P1", "L1")).unwrap();
        for i in 2..=9 {
            reply.push_article(Article::new(
                format!("T{i}"),
                format!("D{i}"),
                format!("P{i}"),
                format!("L{i}"),
            ));
        }
        let rendered = reply.render();
        assert!(rendered.contains("<ArticleCount>8</ArticleCount>"));
        assert!(rendered.contains("T8"));
        assert!(!rendered.contains("T9"));
    }

    #[test]
    fn test_push_article_on_text_reply_is_ignored() {
        let mut reply = Reply::text(&sender(), "hi").unwrap();
        reply.push_article(Article::new("T1", "D1", "P1", "L1"));
        assert!(!reply.render().contains("Articles"));
    }
}
