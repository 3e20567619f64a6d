use crate::config::toml_config::SmtpConfig;
use crate::domain::ports::{ConnectionReport, MailSender, OutgoingMail};
use crate::utils::error::{Result, SupportError};
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tokio::sync::OnceCell;

/// SMTP 寄件；連線設定在第一次寄信時才建立
pub struct SmtpMailSender {
    config: SmtpConfig,
    credentials: Credentials,
    transport: OnceCell<AsyncSmtpTransport<Tokio1Executor>>,
}

fn smtp_error(e: impl std::fmt::Display) -> SupportError {
    SupportError::SmtpError {
        message: e.to_string(),
    }
}

/// 535 或明確的驗證失敗訊息視為帳密錯誤
fn is_auth_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("535") || lower.contains("authentication") || lower.contains("auth failed")
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse::<Mailbox>()
        .map_err(|e| SupportError::validation(format!("Invalid email address {}: {}", address, e)))
}

/// 組出 lettre 郵件；有 HTML 時使用 multipart/alternative
pub fn build_message(from: &str, mail: &OutgoingMail) -> Result<Message> {
    let mut builder = Message::builder()
        .from(parse_mailbox(from)?)
        .to(parse_mailbox(&mail.to)?)
        .subject(mail.subject.clone());

    for cc in &mail.cc {
        builder = builder.cc(parse_mailbox(cc)?);
    }
    for bcc in &mail.bcc {
        builder = builder.bcc(parse_mailbox(bcc)?);
    }
    if let Some(id) = &mail.in_reply_to {
        builder = builder.in_reply_to(id.clone());
    }
    if let Some(references) = &mail.references {
        builder = builder.references(references.clone());
    }

    let message = match &mail.html_body {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            mail.text_body.clone(),
            html.clone(),
        )),
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(mail.text_body.clone()),
    };
    message.map_err(smtp_error)
}

impl SmtpMailSender {
    pub fn new(config: &SmtpConfig, username: &str, password: &str) -> Self {
        Self {
            config: config.clone(),
            credentials: Credentials::new(username.to_string(), password.to_string()),
            transport: OnceCell::new(),
        }
    }

    async fn transport(&self) -> Result<&AsyncSmtpTransport<Tokio1Executor>> {
        self.transport
            .get_or_try_init(|| async {
                let builder = if self.config.use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
                        .map_err(smtp_error)?
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.host)
                };

                Ok::<_, SupportError>(builder
                    .port(self.config.port)
                    .credentials(self.credentials.clone())
                    .timeout(Some(Duration::from_secs(self.config.timeout_secs)))
                    .build())
            })
            .await
    }
}

#[async_trait]
impl MailSender for SmtpMailSender {
    fn from_address(&self) -> &str {
        &self.config.from_address
    }

    async fn send(&self, mail: OutgoingMail) -> Result<()> {
        let message = build_message(&self.config.from_address, &mail)?;

        match self.transport().await?.send(message).await {
            Ok(_) => {
                tracing::info!("Email sent to {}", mail.to);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!("Error sending email to {}: {}", mail.to, message);
                if is_auth_failure(&message) {
                    Err(SupportError::SmtpAuthError { message })
                } else {
                    Err(SupportError::SmtpError { message })
                }
            }
        }
    }

    async fn test_connection(&self) -> ConnectionReport {
        let transport = match self.transport().await {
            Ok(transport) => transport,
            Err(e) => {
                return ConnectionReport {
                    success: false,
                    message: e.to_string(),
                    folders: Vec::new(),
                }
            }
        };

        match transport.test_connection().await {
            Ok(true) => ConnectionReport {
                success: true,
                message: "Connection successful".to_string(),
                folders: Vec::new(),
            },
            Ok(false) => ConnectionReport {
                success: false,
                message: "SMTP server did not accept the connection".to_string(),
                folders: Vec::new(),
            },
            Err(e) => ConnectionReport {
                success: false,
                message: e.to_string(),
                folders: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing(html: Option<&str>) -> OutgoingMail {
        OutgoingMail {
            to: "customer@example.com".to_string(),
            cc: vec!["lead@example.com".to_string()],
            bcc: vec![],
            subject: "Re: Refund".to_string(),
            text_body: "Hello,\n\nDone.".to_string(),
            html_body: html.map(str::to_string),
            in_reply_to: Some("<abc@mail.example.com>".to_string()),
            references: Some("<abc@mail.example.com>".to_string()),
        }
    }

    #[test]
    fn test_build_message_threads_reply() {
        let message = build_message("support@example.com", &outgoing(Some("<p>Done.</p>"))).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("In-Reply-To: <abc@mail.example.com>"));
        assert!(raw.contains("References: <abc@mail.example.com>"));
        assert!(raw.contains("Cc: lead@example.com"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("Subject: Re: Refund"));
    }

    #[test]
    fn test_build_message_plain_only() {
        let message = build_message("support@example.com", &outgoing(None)).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(!raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
    }

    #[test]
    fn test_invalid_recipient_is_validation_error() {
        let mut mail = outgoing(None);
        mail.to = "not an address".to_string();
        let err = build_message("support@example.com", &mail).unwrap_err();
        assert!(matches!(err, SupportError::ValidationError { .. }));
    }

    #[tokio::test]
    async fn test_transport_is_built_on_first_send() {
        let sender = SmtpMailSender::new(&SmtpConfig::default(), "", "");
        assert!(sender.transport.get().is_none());

        // 地址錯誤時不會建立連線設定
        let mut mail = outgoing(None);
        mail.to = "not an address".to_string();
        let err = sender.send(mail).await.unwrap_err();
        assert!(matches!(err, SupportError::ValidationError { .. }));
        assert!(sender.transport.get().is_none());
    }

    #[test]
    fn test_auth_failure_detection() {
        assert!(is_auth_failure("permanent error (535): 5.7.8 Username and Password not accepted"));
        assert!(!is_auth_failure("Connection refused"));
    }
}
