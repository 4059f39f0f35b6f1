use chrono::DateTime;
use google_gmail1::api::Message;
use mail_parser::MessageParser;
use regex::Regex;

const RE_WHITESPACE_STR: &str = r"[\r\t\n]+";
const RE_LONG_SPACE_STR: &str = r" {2,}";
const RE_DIVIDERS_STR: &str = r"[-=_]{3,}";

lazy_static::lazy_static!(
    static ref RE_WHITESPACE: Regex = Regex::new(RE_WHITESPACE_STR).unwrap();
    static ref RE_LONG_SPACE: Regex = Regex::new(RE_LONG_SPACE_STR).unwrap();
    static ref RE_DIVIDERS: Regex = Regex::new(RE_DIVIDERS_STR).unwrap();
);

/// A fetched Gmail message reduced to what classification needs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MailContent {
    pub id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub sender: Option<String>,
    pub body: String,
    /// Calendar date (`YYYY-MM-DD`, UTC) the message was received.
    pub date: Option<String>,
}

impl MailContent {
    pub fn from_gmail_message(msg: Message) -> anyhow::Result<Self> {
        let id = msg.id.clone().unwrap_or_default();
        let date = msg
            .internal_date
            .and_then(DateTime::from_timestamp_millis)
            .map(|dt| dt.format("%Y-%m-%d").to_string());

        let raw = msg
            .raw
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No raw message found for {}", id))?;
        let parsed = MessageParser::default()
            .parse(raw.as_slice())
            .ok_or_else(|| anyhow::anyhow!("Could not parse raw message {}", id))?;

        let subject = parsed.subject().map(collapse_whitespace).unwrap_or_default();
        let sender = parsed.from().and_then(|from| from.first()).map(|addr| {
            match (addr.name(), addr.address()) {
                (Some(name), Some(address)) => format!("{} <{}>", name, address),
                (None, Some(address)) => address.to_string(),
                (Some(name), None) => name.to_string(),
                (None, None) => String::new(),
            }
        });
        let body = plaintext_body(&parsed);
        let date = date.or_else(|| {
            parsed
                .date()
                .map(|d| d.to_rfc3339().chars().take(10).collect::<String>())
        });

        Ok(MailContent {
            id,
            thread_id: msg.thread_id,
            subject,
            sender: sender.filter(|s| !s.is_empty()),
            body,
            date,
        })
    }
}

/// Prefers text/plain parts, falling back to rendered HTML.
fn plaintext_body(msg: &mail_parser::Message) -> String {
    let text = if !msg.text_body.is_empty() {
        msg.body_text(0).map(|b| b.to_string())
    } else {
        msg.body_html(0)
            .map(|html| html2text::from_read(html.as_bytes(), 400))
    };

    text.map(|b| {
        let b = RE_DIVIDERS.replace_all(&b, " ");
        collapse_whitespace(&b)
    })
    .unwrap_or_default()
}

fn collapse_whitespace(text: &str) -> String {
    let t = RE_WHITESPACE.replace_all(text, " ");
    let t = RE_LONG_SPACE.replace_all(&t, " ");
    t.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::common::raw_gmail_message;

    #[test]
    fn test_plain_text_message() {
        let msg = raw_gmail_message(
            "m1",
            "From: Alice Smith <alice@example.com>\r\nSubject: Team   lunch\r\nContent-Type: text/plain\r\n\r\nSee you\r\nat noon\r\n-----\r\nAlice\r\n",
        );

        let content = MailContent::from_gmail_message(msg).unwrap();

        assert_eq!(content.id, "m1");
        assert_eq!(content.thread_id.as_deref(), Some("t-m1"));
        assert_eq!(content.subject, "Team lunch");
        assert_eq!(content.sender.as_deref(), Some("Alice Smith <alice@example.com>"));
        assert_eq!(content.body, "See you at noon Alice");
        assert_eq!(content.date.as_deref(), Some("2025-10-17"));
    }

    #[test]
    fn test_html_only_message() {
        let msg = raw_gmail_message(
            "m2",
            "From: news@example.com\r\nSubject: Weekly\r\nContent-Type: text/html\r\n\r\n<html><body><p>Hello</p><p>world</p></body></html>\r\n",
        );

        let content = MailContent::from_gmail_message(msg).unwrap();

        assert_eq!(content.sender.as_deref(), Some("news@example.com"));
        assert!(content.body.contains("Hello"));
        assert!(content.body.contains("world"));
        assert!(!content.body.contains("<p>"));
    }

    #[test]
    fn test_missing_raw_is_an_error() {
        let msg = Message {
            id: Some("m3".to_string()),
            ..Default::default()
        };
        assert!(MailContent::from_gmail_message(msg).is_err());
    }
}
