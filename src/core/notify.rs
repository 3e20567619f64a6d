//! 寄出客服回覆與內部通知。

use crate::core::store::SupportStore;
use crate::domain::model::{Email, EmailStatus, ReplyStatus};
use crate::domain::ports::{MailSender, OutgoingMail, Storage};
use crate::utils::error::{Result, SupportError};
use chrono::Utc;
use std::sync::Arc;

const BODY_PREVIEW_CHARS: usize = 500;

pub struct Outbox<S: Storage> {
    store: Arc<SupportStore<S>>,
    sender: Arc<dyn MailSender>,
    dashboard_url: String,
}

impl<S: Storage> Outbox<S> {
    pub fn new(
        store: Arc<SupportStore<S>>,
        sender: Arc<dyn MailSender>,
        dashboard_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            sender,
            dashboard_url: dashboard_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// 寄出回覆；成功後回覆標記為 sent、郵件標記為 replied
    ///
    /// 不檢查回覆狀態，呼叫端負責確認已核准。
    pub async fn send_reply(&self, reply_id: u64, cc: &[String], bcc: &[String]) -> Result<()> {
        let (email, body) = self
            .store
            .read(|s| {
                let reply = s.reply(reply_id)?;
                let email = s.email(reply.email_id)?;
                Ok::<_, SupportError>((email.clone(), reply.body.clone()))
            })
            .await?;

        let mail = self.reply_mail(&email, &body, cc, bcc);

        tracing::info!("Sending reply {} to {}", reply_id, email.from_email);
        self.sender.send(mail).await?;

        let now = Utc::now();
        self.store
            .write(|s| {
                let reply = s.reply_mut(reply_id)?;
                reply.status = ReplyStatus::Sent;
                reply.sent_at = Some(now);

                let email = s.email_mut(email.id)?;
                email.status = EmailStatus::Replied;
                email.replied_at = Some(now);
                Ok(())
            })
            .await?;

        tracing::info!("Email sent successfully to {}", email.from_email);
        Ok(())
    }

    fn reply_mail(&self, email: &Email, body: &str, cc: &[String], bcc: &[String]) -> OutgoingMail {
        let thread_id = (!email.message_id.is_empty()).then(|| email.message_id.clone());

        OutgoingMail {
            to: email.from_email.clone(),
            cc: cc.to_vec(),
            bcc: bcc.to_vec(),
            subject: format!("Re: {}", email.subject),
            text_body: body.to_string(),
            html_body: Some(render_reply_html(body, self.sender.from_address())),
            in_reply_to: thread_id.clone(),
            references: thread_id,
        }
    }

    /// 寄送通知信，失敗只記錄不回傳錯誤
    pub async fn send_notification(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        html_body: Option<String>,
    ) -> bool {
        let mail = OutgoingMail {
            to: to.to_string(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.to_string(),
            text_body: body.to_string(),
            html_body,
            in_reply_to: None,
            references: None,
        };

        match self.sender.send(mail).await {
            Ok(()) => {
                tracing::info!("Notification sent to {}", to);
                true
            }
            Err(e) => {
                tracing::error!("Error sending notification: {}", e);
                false
            }
        }
    }

    /// 通知所有在職的客服主管，回傳成功寄出的數量
    pub async fn notify_escalation(&self, email_id: u64) -> Result<usize> {
        let (email, recipients) = self
            .store
            .read(|s| {
                let email = s.email(email_id)?.clone();
                let recipients: Vec<String> = s
                    .active_staff()
                    .into_iter()
                    .map(|a| a.email.trim().to_string())
                    .filter(|addr| !addr.is_empty())
                    .collect();
                Ok::<_, SupportError>((email, recipients))
            })
            .await?;

        if recipients.is_empty() {
            tracing::warn!("No admin emails found for escalation notification");
            return Ok(0);
        }

        let subject = format!("[ESCALATION] {}", email.subject);
        let body = escalation_body(&email, &self.dashboard_url);

        let mut delivered = 0;
        for recipient in &recipients {
            if self.send_notification(recipient, &subject, &body, None).await {
                delivered += 1;
            }
        }

        tracing::info!(
            "Escalation notification sent for email {} ({}/{})",
            email_id,
            delivered,
            recipients.len()
        );
        Ok(delivered)
    }
}

pub fn escalation_body(email: &Email, dashboard_url: &str) -> String {
    let category = email
        .category
        .map(|c| c.label().to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let sentiment = email
        .ai_sentiment
        .map(|s| s.label().to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let preview: String = email.body.chars().take(BODY_PREVIEW_CHARS).collect();

    format!(
        "An email has been escalated and requires immediate attention.\n\n\
         From: {} ({})\n\
         Subject: {}\n\
         Priority: {}\n\
         Category: {}\n\
         Reason: {}\n\n\
         Sentiment: {}\n\
         Received: {}\n\n\
         View email: {}/dashboard/email/{}/\n\n\
         ---\n\
         Email Body:\n\
         {}...\n",
        email.from_name,
        email.from_email,
        email.subject,
        email.priority.label(),
        category,
        email.escalation_reason,
        sentiment,
        email.received_at.format("%Y-%m-%d %H:%M:%S"),
        dashboard_url,
        email.id,
        preview
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn render_reply_html(body: &str, from_address: &str) -> String {
    let html_body = escape_html(body).replace('\n', "<br>");
    let from_address = escape_html(from_address);

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px; }}
        .email-body {{ margin: 20px 0; font-size: 14px; }}
        .signature {{ margin-top: 30px; padding-top: 20px; border-top: 1px solid #e0e0e0; font-size: 13px; color: #666; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #999; text-align: center; }}
    </style>
</head>
<body>
    <div class="email-body">
        {html_body}
    </div>
    <div class="signature">
        <strong>Support Team</strong><br>
        {from_address}<br>
    </div>
    <div class="footer">
        <p>This is an automated response from our support system.</p>
        <p>If you need further assistance, please reply to this email.</p>
    </div>
</body>
</html>
"#
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::ports::{ConnectionReport, MailSender, OutgoingMail};
    use crate::utils::error::{Result, SupportError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    /// 記錄寄出郵件的假 SMTP
    #[derive(Default)]
    pub struct RecordingSender {
        pub sent: Mutex<Vec<OutgoingMail>>,
        pub fail: AtomicBool,
    }

    impl RecordingSender {
        pub fn failing() -> Self {
            let sender = Self::default();
            sender.fail.store(true, Ordering::SeqCst);
            sender
        }

        pub async fn sent(&self) -> Vec<OutgoingMail> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl MailSender for RecordingSender {
        fn from_address(&self) -> &str {
            "support@example.com"
        }

        async fn send(&self, mail: OutgoingMail) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SupportError::SmtpError {
                    message: "connection refused".to_string(),
                });
            }
            self.sent.lock().await.push(mail);
            Ok(())
        }

        async fn test_connection(&self) -> ConnectionReport {
            ConnectionReport {
                success: true,
                message: "SMTP connection successful".to_string(),
                folders: vec![],
            }
        }
    }
}
