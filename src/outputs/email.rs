//! Turning a final summary into an email.
//!
//! The summary is lightly formatted Markdown as returned by the model. Each
//! line is classified into a [`BodyLine`], and two renderers build the plain
//! text and HTML alternatives from the same classification. The word cloud
//! is attached inline and referenced from the HTML as `cid:image1`.

use crate::error::MailError;
use crate::models::{Notification, Topic};
use chrono::NaiveDate;
use lettre::Message;
use lettre::message::header::{ContentDisposition, ContentId, ContentType};
use lettre::message::{Mailbox, MultiPart, SinglePart};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument};

/// Content-ID of the inline word cloud.
pub const IMAGE_CID: &str = "image1";

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,3})\s+(.*)$").expect("static regex"));
static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+\.)\s+(.*)$").expect("static regex"));
static BOLD_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyLine {
    Blank,
    Heading { level: u8, text: String },
    ListItem { ordered: bool, marker: String, text: String },
    Paragraph(String),
}

impl BodyLine {
    pub fn classify(raw: &str) -> Self {
        let line = raw.trim();
        if line.is_empty() {
            return BodyLine::Blank;
        }
        if let Some(c) = HEADING.captures(line) {
            return BodyLine::Heading {
                level: c[1].len() as u8,
                text: c[2].trim().to_string(),
            };
        }
        if let Some(c) = NUMBERED.captures(line) {
            return BodyLine::ListItem {
                ordered: true,
                marker: c[1].to_string(),
                text: c[2].trim().to_string(),
            };
        }
        for bullet in ["- ", "* ", "• "] {
            if let Some(rest) = line.strip_prefix(bullet) {
                return BodyLine::ListItem {
                    ordered: false,
                    marker: bullet.trim().to_string(),
                    text: rest.trim().to_string(),
                };
            }
        }
        BodyLine::Paragraph(line.to_string())
    }
}

/// Splits a model reply into classified lines.
///
/// # Arguments
///
/// * `body` - the final summary as returned by the model
///
/// # Returns
///
/// One [`BodyLine`] per input line, blank lines included.
pub fn classify(body: &str) -> Vec<BodyLine> {
    body.lines().map(BodyLine::classify).collect()
}

/// Plain text alternative: heading markers and bold markers dropped, list
/// markers kept.
pub fn render_plain(lines: &[BodyLine]) -> String {
    lines
        .iter()
        .map(|line| match line {
            BodyLine::Blank => String::new(),
            BodyLine::Heading { text, .. } | BodyLine::Paragraph(text) => strip_bold(text),
            BodyLine::ListItem { marker, text, .. } => format!("{} {}", marker, strip_bold(text)),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// HTML alternative with the inline image appended.
pub fn render_html(lines: &[BodyLine]) -> String {
    let mut html = String::from("<html><body>");
    let mut open_list: Option<bool> = None;

    for line in lines {
        let ordered_here = match line {
            BodyLine::ListItem { ordered, .. } => Some(*ordered),
            _ => None,
        };
        if open_list.is_some() && open_list != ordered_here {
            html.push_str(list_tag(open_list, true));
            open_list = None;
        }

        match line {
            BodyLine::Blank => html.push_str("<br>"),
            BodyLine::Heading { level, text } => {
                html.push_str(&format!("<h{level}>{}</h{level}>", inline_html(text)));
            }
            BodyLine::ListItem { ordered, text, .. } => {
                if open_list.is_none() {
                    open_list = Some(*ordered);
                    html.push_str(list_tag(open_list, false));
                }
                html.push_str(&format!("<li>{}</li>", inline_html(text)));
            }
            BodyLine::Paragraph(text) => {
                html.push_str(&format!("<p>{}</p>", inline_html(text)));
            }
        }
    }
    if open_list.is_some() {
        html.push_str(list_tag(open_list, true));
    }

    html.push_str(&format!("<br><img src=\"cid:{IMAGE_CID}\">"));
    html.push_str("</body></html>");
    html
}

fn list_tag(ordered: Option<bool>, close: bool) -> &'static str {
    match (ordered, close) {
        (Some(true), false) => "<ol>",
        (Some(true), true) => "</ol>",
        (_, false) => "<ul>",
        (_, true) => "</ul>",
    }
}

fn strip_bold(text: &str) -> String {
    BOLD_SPAN.replace_all(text, "$1").into_owned()
}

fn inline_html(text: &str) -> String {
    BOLD_SPAN
        .replace_all(&escape_html(text), "<strong>$1</strong>")
        .into_owned()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Fills `{title}` and `{date}` in the subject template.
pub fn subject(template: &str, topic: &Topic, date: NaiveDate) -> String {
    template
        .replace("{title}", &topic.subject_title())
        .replace("{date}", &date.format("%Y-%m-%d").to_string())
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Builds the MIME message:
///
/// ```text
/// multipart/related
/// ├── multipart/alternative
/// │   ├── text/plain
/// │   └── text/html
/// └── image/png (inline, Content-ID <image1>, named `image_name`)
/// ```
pub fn compose_message(
    sender: &str,
    recipient: &str,
    subject: &str,
    body: &str,
    image_png: Vec<u8>,
    image_name: &str,
) -> Result<Message, MailError> {
    let lines = classify(body);
    let png = ContentType::parse("image/png").map_err(|e| MailError::Message(e.to_string()))?;

    Message::builder()
        .from(mailbox(sender)?)
        .to(mailbox(recipient)?)
        .subject(subject)
        .multipart(
            MultiPart::related()
                .multipart(
                    MultiPart::alternative()
                        .singlepart(SinglePart::plain(render_plain(&lines)))
                        .singlepart(SinglePart::html(render_html(&lines))),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(png)
                        .header(ContentDisposition::inline_with_name(image_name))
                        .header(ContentId::from(format!("<{IMAGE_CID}>")))
                        .body(image_png),
                ),
        )
        .map_err(|e| MailError::Message(e.to_string()))
}

/// Reads the notification's image and returns the RFC 5322 bytes.
#[instrument(level = "info", skip_all, fields(recipient = %notification.recipient, image = %notification.image_path.display()))]
pub async fn compose(sender: &str, notification: &Notification) -> Result<Vec<u8>, MailError> {
    let image = tokio::fs::read(&notification.image_path).await?;
    let image_name = notification
        .image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "wordcloud.png".to_string());
    let message = compose_message(
        sender,
        &notification.recipient,
        &notification.subject,
        &notification.body,
        image,
        &image_name,
    )?;
    let raw = message.formatted();
    debug!(bytes = raw.len(), "Composed message");
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_lines() {
        assert_eq!(BodyLine::classify("   "), BodyLine::Blank);
        assert_eq!(
            BodyLine::classify("### Fő témák"),
            BodyLine::Heading {
                level: 3,
                text: "Fő témák".into()
            }
        );
        assert_eq!(
            BodyLine::classify("# Cím"),
            BodyLine::Heading {
                level: 1,
                text: "Cím".into()
            }
        );
        assert_eq!(
            BodyLine::classify("12. Tizenkettedik"),
            BodyLine::ListItem {
                ordered: true,
                marker: "12.".into(),
                text: "Tizenkettedik".into()
            }
        );
        assert_eq!(
            BodyLine::classify("  - pont"),
            BodyLine::ListItem {
                ordered: false,
                marker: "-".into(),
                text: "pont".into()
            }
        );
        assert_eq!(
            BodyLine::classify("#### Alcím"),
            BodyLine::Paragraph("#### Alcím".into())
        );
        assert_eq!(
            BodyLine::classify("#hashtag szöveg"),
            BodyLine::Paragraph("#hashtag szöveg".into())
        );
        assert_eq!(
            BodyLine::classify("2025-ben nőtt"),
            BodyLine::Paragraph("2025-ben nőtt".into())
        );
    }

    #[test]
    fn test_render_html_structure() {
        let body = "## Összegzés\n\n1. Első\n2. **Második**\n- pont\nZárás <ok>";
        let html = render_html(&classify(body));
        assert_eq!(
            html,
            "<html><body><h2>Összegzés</h2><br>\
             <ol><li>Első</li><li><strong>Második</strong></li></ol>\
             <ul><li>pont</li></ul>\
             <p>Zárás &lt;ok&gt;</p>\
             <br><img src=\"cid:image1\"></body></html>"
        );
    }

    #[test]
    fn test_render_plain() {
        let body = "## Összegzés\n\n1. Első\n- **pont**\nZárás";
        assert_eq!(
            render_plain(&classify(body)),
            "Összegzés\n\n1. Első\n- pont\nZárás"
        );
    }

    #[test]
    fn test_subject() {
        let topic = Topic::new("kulfold", "Külföld");
        let d = NaiveDate::from_ymd_opt(2025, 6, 12).unwrap();
        assert_eq!(
            subject("Heti hírösszefoglaló {title} témakörben, {date}", &topic, d),
            "Heti hírösszefoglaló KÜLFÖLD témakörben, 2025-06-12"
        );
    }

    #[test]
    fn test_compose_message_parts() {
        let msg = compose_message(
            "digest@example.com",
            "reader@example.com",
            "Weekly digest",
            "# Title\n- item",
            vec![0x89, b'P', b'N', b'G'],
            "wordcloud.png",
        )
        .unwrap();
        let raw = String::from_utf8_lossy(&msg.formatted()).to_string();
        assert!(raw.contains("multipart/related"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("image/png"));
        assert!(raw.contains("<image1>"));
        assert!(raw.contains("Content-Disposition: inline;"));
        assert!(raw.contains("filename=\"wordcloud.png\""));
        assert!(raw.contains("Subject: Weekly digest"));
    }

    #[test]
    fn test_compose_rejects_bad_address() {
        let err = compose_message("not an address", "reader@example.com", "s", "b", vec![], "x.png")
            .unwrap_err();
        assert!(matches!(err, MailError::Address { .. }));
    }

    #[tokio::test]
    async fn test_compose_reads_image() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("wordcloud_kulfold_2025-06-12.png");
        std::fs::write(&image_path, b"png-bytes").unwrap();
        let n = Notification {
            recipient: "reader@example.com".into(),
            subject: "s".into(),
            body: "b".into(),
            image_path,
        };
        let raw = compose("digest@example.com", &n).await.unwrap();
        let text = String::from_utf8_lossy(&raw);
        assert!(text.contains("filename=\"wordcloud_kulfold_2025-06-12.png\""));

        let missing = Notification {
            image_path: dir.path().join("missing.png"),
            ..n
        };
        assert!(matches!(
            compose("digest@example.com", &missing).await,
            Err(MailError::Io(_))
        ));
    }
}
