//! RFC 822 郵件解析：標頭解碼、地址、內文、附件與日期。

use crate::domain::model::{Attachment, IncomingEmail};
use crate::utils::error::{Result, SupportError};
use chrono::{DateTime, TimeZone, Utc};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use regex::Regex;
use sha2::{Digest, Sha256};

pub struct MessageParser {
    html_tags: Regex,
}

impl MessageParser {
    pub fn new() -> Result<Self> {
        let html_tags = Regex::new(r"<[^<]+?>").map_err(|e| SupportError::ConfigError {
            message: format!("invalid html pattern: {}", e),
        })?;
        Ok(Self { html_tags })
    }

    /// 解析原始訊息；`fallback_to` 用於缺少 To 標頭的郵件
    pub fn parse(&self, raw: &[u8], fallback_to: &str) -> Result<IncomingEmail> {
        let mail = mailparse::parse_mail(raw).map_err(|e| SupportError::MailParseError {
            message: e.to_string(),
        })?;

        let header = |name: &str| {
            mail.headers
                .get_first_value(name)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let subject = header("Subject");
        let (from_email, from_name) = parse_address(&header("From"));
        let (to_email, _) = parse_address(&header("To"));
        let date_header = header("Date");
        let received_at = parse_date(&date_header);

        let message_id = match header("Message-ID") {
            id if !id.is_empty() => id,
            _ => synthetic_message_id(&from_email, &subject, &date_header),
        };

        let (text_body, html_body) = self.extract_body(&mail);
        let (has_attachments, attachments) = collect_attachments(&mail);

        Ok(IncomingEmail {
            message_id,
            from_email,
            from_name,
            to_email: if to_email.is_empty() {
                fallback_to.to_string()
            } else {
                to_email
            },
            subject,
            body: text_body,
            body_html: html_body,
            received_at,
            attachments,
            has_attachments,
            thread_id: header("Thread-Index"),
            in_reply_to: header("In-Reply-To"),
        })
    }

    /// 取第一個 text/plain 與 text/html 部分，略過附件
    fn extract_body(&self, mail: &ParsedMail) -> (String, String) {
        let mut text_body = String::new();
        let mut html_body = String::new();

        if mail.subparts.is_empty() {
            let payload = mail.get_body().unwrap_or_else(|e| {
                tracing::warn!("Error extracting body: {}", e);
                String::new()
            });
            if mail.ctype.mimetype.eq_ignore_ascii_case("text/html") {
                html_body = payload;
            } else {
                text_body = payload;
            }
        } else {
            let mut parts = Vec::new();
            flatten_parts(mail, &mut parts);

            for part in parts {
                if is_attachment(part) {
                    continue;
                }

                let content_type = part.ctype.mimetype.to_lowercase();
                if content_type != "text/plain" && content_type != "text/html" {
                    continue;
                }

                match part.get_body() {
                    Ok(payload) if !payload.is_empty() => {
                        if content_type == "text/plain" && text_body.is_empty() {
                            text_body = payload;
                        } else if content_type == "text/html" && html_body.is_empty() {
                            html_body = payload;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Error extracting body part: {}", e),
                }
            }
        }

        if text_body.trim().is_empty() && !html_body.is_empty() {
            text_body = self.html_to_text(&html_body);
        }

        (text_body.trim().to_string(), html_body.trim().to_string())
    }

    pub fn html_to_text(&self, html: &str) -> String {
        self.html_tags.replace_all(html, "").replace("&nbsp;", " ")
    }
}

fn flatten_parts<'a>(mail: &'a ParsedMail<'a>, out: &mut Vec<&'a ParsedMail<'a>>) {
    out.push(mail);
    for sub in &mail.subparts {
        flatten_parts(sub, out);
    }
}

fn is_attachment(part: &ParsedMail) -> bool {
    matches!(
        part.get_content_disposition().disposition,
        DispositionType::Attachment
    )
}

fn collect_attachments(mail: &ParsedMail) -> (bool, Vec<Attachment>) {
    let mut parts = Vec::new();
    flatten_parts(mail, &mut parts);

    let mut has_attachments = false;
    let mut attachments = Vec::new();

    for part in parts {
        let disposition = part.get_content_disposition();
        if !matches!(disposition.disposition, DispositionType::Attachment) {
            continue;
        }
        has_attachments = true;

        let filename = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"))
            .cloned();

        if let Some(filename) = filename {
            attachments.push(Attachment {
                filename,
                content_type: part.ctype.mimetype.clone(),
                size: part.get_body_raw().map(|b| b.len()).unwrap_or(0),
            });
        }
    }

    (has_attachments, attachments)
}

/// 回傳 (地址, 顯示名稱)
pub fn parse_address(header: &str) -> (String, String) {
    if header.trim().is_empty() {
        return (String::new(), String::new());
    }

    match mailparse::addrparse(header) {
        Ok(list) => match list.iter().next() {
            Some(MailAddr::Single(info)) => (
                info.addr.clone(),
                info.display_name.clone().unwrap_or_default(),
            ),
            Some(MailAddr::Group(group)) => group
                .addrs
                .first()
                .map(|info| {
                    (
                        info.addr.clone(),
                        info.display_name.clone().unwrap_or_default(),
                    )
                })
                .unwrap_or_default(),
            None => (String::new(), String::new()),
        },
        Err(_) => (header.trim().to_string(), String::new()),
    }
}

/// 無法解析的日期視為現在
pub fn parse_date(value: &str) -> DateTime<Utc> {
    if value.trim().is_empty() {
        return Utc::now();
    }

    mailparse::dateparse(value)
        .ok()
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or_else(Utc::now)
}

/// 缺少 Message-ID 時以 SHA-256 產生固定值
fn synthetic_message_id(from: &str, subject: &str, date: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(from.as_bytes());
    hasher.update([0u8]);
    hasher.update(subject.as_bytes());
    hasher.update([0u8]);
    hasher.update(date.as_bytes());
    let digest = hasher.finalize();

    let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("<generated-{}@support-mail-agent>", hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = "Message-ID: <plain-1@example.com>\r\n\
From: \"Jane Doe\" <jane@example.com>\r\n\
To: support@example.com\r\n\
Subject: Cannot log in\r\n\
Date: Tue, 04 Mar 2025 10:15:00 +0000\r\n\
In-Reply-To: <earlier@example.com>\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Hello, I cannot log in to my account.\r\n";

    const MULTIPART: &str = "Message-ID: <multi-1@example.com>\r\n\
From: Bob <bob@example.com>\r\n\
Subject: =?UTF-8?B?UmVmdW5kIHJlcXVlc3Q=?=\r\n\
Date: Wed, 05 Mar 2025 09:00:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Please refund order 991.\r\n\
--inner\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Please refund order <b>991</b>.</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
SGVsbG8=\r\n\
--outer--\r\n";

    const HTML_ONLY: &str = "Message-ID: <html-1@example.com>\r\n\
From: carol@example.com\r\n\
Subject: Pricing\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<div>What&nbsp;does the <i>pro</i> plan cost?</div>\r\n\
--b--\r\n";

    #[test]
    fn test_parse_plain_message() {
        let parser = MessageParser::new().unwrap();
        let email = parser.parse(PLAIN.as_bytes(), "fallback@example.com").unwrap();

        assert_eq!(email.message_id, "<plain-1@example.com>");
        assert_eq!(email.from_email, "jane@example.com");
        assert_eq!(email.from_name, "Jane Doe");
        assert_eq!(email.to_email, "support@example.com");
        assert_eq!(email.subject, "Cannot log in");
        assert_eq!(email.body, "Hello, I cannot log in to my account.");
        assert_eq!(email.in_reply_to, "<earlier@example.com>");
        assert_eq!(
            email.received_at,
            Utc.with_ymd_and_hms(2025, 3, 4, 10, 15, 0).unwrap()
        );
        assert!(!email.has_attachments);
    }

    #[test]
    fn test_parse_multipart_with_attachment() {
        let parser = MessageParser::new().unwrap();
        let email = parser.parse(MULTIPART.as_bytes(), "support@example.com").unwrap();

        assert_eq!(email.subject, "Refund request");
        assert_eq!(email.from_name, "Bob");
        assert_eq!(email.to_email, "support@example.com");
        assert_eq!(email.body, "Please refund order 991.");
        assert_eq!(email.body_html, "<p>Please refund order <b>991</b>.</p>");
        assert!(email.has_attachments);
        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].filename, "invoice.pdf");
        assert_eq!(email.attachments[0].content_type, "application/pdf");
        assert_eq!(email.attachments[0].size, 5);
    }

    #[test]
    fn test_html_only_message_derives_text() {
        let parser = MessageParser::new().unwrap();
        let email = parser.parse(HTML_ONLY.as_bytes(), "support@example.com").unwrap();

        assert_eq!(email.body, "What does the pro plan cost?");
        assert_eq!(email.from_email, "carol@example.com");
        assert_eq!(email.from_name, "");
    }

    #[test]
    fn test_missing_message_id_is_deterministic() {
        let raw = "From: dave@example.com\r\nSubject: Hi\r\nDate: Tue, 04 Mar 2025 10:15:00 +0000\r\n\r\nbody\r\n";
        let parser = MessageParser::new().unwrap();
        let first = parser.parse(raw.as_bytes(), "support@example.com").unwrap();
        let second = parser.parse(raw.as_bytes(), "support@example.com").unwrap();

        assert_eq!(first.message_id, second.message_id);
        assert_eq!(
            first.message_id,
            "<generated-093ffa727f553b0e@support-mail-agent>"
        );
    }

    #[test]
    fn test_parse_address_variants() {
        assert_eq!(
            parse_address("\"Support Team\" <support@example.com>"),
            ("support@example.com".to_string(), "Support Team".to_string())
        );
        assert_eq!(
            parse_address("plain@example.com"),
            ("plain@example.com".to_string(), String::new())
        );
        assert_eq!(parse_address(""), (String::new(), String::new()));
    }

    #[test]
    fn test_parse_date_fallback() {
        let before = Utc::now();
        let parsed = parse_date("not a date");
        assert!(parsed >= before);
    }
}
