//! 從信箱抓取未讀郵件並存入系統。

use crate::core::parser::MessageParser;
use crate::core::store::SupportStore;
use crate::domain::model::IncomingEmail;
use crate::domain::ports::{MailSource, Storage};
use crate::utils::error::Result;
use chrono::Utc;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub mailbox: String,
    pub fetch_limit: usize,
    pub mark_seen: bool,
    /// 郵件缺少 To 標頭時使用的收件地址
    pub account: String,
}

pub struct MailIngestor<S: Storage> {
    store: Arc<SupportStore<S>>,
    source: Arc<dyn MailSource>,
    parser: MessageParser,
    settings: IngestSettings,
}

impl<S: Storage> MailIngestor<S> {
    pub fn new(
        store: Arc<SupportStore<S>>,
        source: Arc<dyn MailSource>,
        settings: IngestSettings,
    ) -> Result<Self> {
        Ok(Self {
            store,
            source,
            parser: MessageParser::new()?,
            settings,
        })
    }

    /// 回傳新存入郵件的 id；已存在的 Message-ID 會略過
    pub async fn fetch_new_emails(&self) -> Result<Vec<u64>> {
        tracing::info!("Starting email fetch from {}", self.settings.mailbox);

        let messages = self
            .source
            .fetch_unseen(&self.settings.mailbox, self.settings.fetch_limit)
            .await?;
        tracing::debug!("Mailbox returned {} unseen messages", messages.len());

        let mut parsed: Vec<IncomingEmail> = Vec::new();
        let mut uids = Vec::new();
        for message in &messages {
            match self.parser.parse(&message.rfc822, &self.settings.account) {
                Ok(email) => {
                    parsed.push(email);
                    uids.push(message.uid);
                }
                Err(e) => tracing::error!("Error processing message {}: {}", message.uid, e),
            }
        }

        let now = Utc::now();
        let new_ids = self
            .store
            .write(|s| {
                let mut ids = Vec::new();
                for email in parsed {
                    let message_id = email.message_id.clone();
                    match s.insert_email(email, now) {
                        Some(id) => {
                            tracing::info!("New email saved: {}", message_id);
                            ids.push(id);
                        }
                        None => tracing::debug!("Email {} already exists, skipping", message_id),
                    }
                }
                Ok(ids)
            })
            .await?;

        if self.settings.mark_seen && !uids.is_empty() {
            if let Err(e) = self.source.mark_seen(&self.settings.mailbox, &uids).await {
                tracing::warn!("Could not mark messages as seen: {}", e);
            }
        }

        tracing::info!("Fetched {} new emails", new_ids.len());
        Ok(new_ids)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::ports::{ConnectionReport, MailSource, RawMessage};
    use crate::utils::error::{Result, SupportError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// 固定內容的假信箱
    #[derive(Default)]
    pub struct StaticMailbox {
        pub messages: Vec<RawMessage>,
        /// 前 N 次抓取回傳錯誤
        pub failures_before_success: usize,
        pub fetch_calls: AtomicUsize,
        pub seen: Mutex<Vec<u32>>,
    }

    impl StaticMailbox {
        pub fn with_messages(raw: &[&str]) -> Self {
            Self {
                messages: raw
                    .iter()
                    .enumerate()
                    .map(|(i, body)| RawMessage {
                        uid: i as u32 + 1,
                        rfc822: body.as_bytes().to_vec(),
                    })
                    .collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl MailSource for StaticMailbox {
        async fn fetch_unseen(&self, _mailbox: &str, limit: usize) -> Result<Vec<RawMessage>> {
            let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(SupportError::ImapError {
                    message: "connection reset".to_string(),
                });
            }
            Ok(self.messages.iter().take(limit).cloned().collect())
        }

        async fn mark_seen(&self, _mailbox: &str, uids: &[u32]) -> Result<()> {
            self.seen.lock().await.extend_from_slice(uids);
            Ok(())
        }

        async fn test_connection(&self) -> ConnectionReport {
            ConnectionReport {
                success: true,
                message: "Connection successful".to_string(),
                folders: vec!["INBOX".to_string()],
            }
        }
    }

    pub fn raw_message(message_id: &str, subject: &str) -> String {
        format!(
            "Message-ID: {}\r\nFrom: \"Casey\" <casey@example.com>\r\nTo: support@example.com\r\nSubject: {}\r\nDate: Tue, 04 Mar 2025 10:15:00 +0000\r\n\r\nPlease help with {}.\r\n",
            message_id, subject, subject
        )
    }
}
