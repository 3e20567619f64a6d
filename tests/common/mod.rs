#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use support_mail_agent::config::toml_config::ArticleSeed;
use support_mail_agent::domain::model::{Agent, CategoryName};
use support_mail_agent::domain::ports::{
    ConnectionReport, MailSender, MailSource, OutgoingMail, RawMessage,
};
use support_mail_agent::{Adapters, ClaudeEmailAgent, LocalStorage, Result, SupportConfig, SupportEngine};
use tokio::sync::Mutex;

/// 固定回傳訊息的信箱
pub struct FakeMailbox {
    messages: Vec<RawMessage>,
}

impl FakeMailbox {
    pub fn new(raw: &[String]) -> Self {
        Self {
            messages: raw
                .iter()
                .enumerate()
                .map(|(i, body)| RawMessage {
                    uid: i as u32 + 1,
                    rfc822: body.as_bytes().to_vec(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl MailSource for FakeMailbox {
    async fn fetch_unseen(&self, _mailbox: &str, limit: usize) -> Result<Vec<RawMessage>> {
        Ok(self.messages.iter().take(limit).cloned().collect())
    }

    async fn mark_seen(&self, _mailbox: &str, _uids: &[u32]) -> Result<()> {
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

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl RecordingSender {
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
        self.sent.lock().await.push(mail);
        Ok(())
    }

    async fn test_connection(&self) -> ConnectionReport {
        ConnectionReport {
            success: true,
            message: "Connection successful".to_string(),
            folders: Vec::new(),
        }
    }
}

pub fn raw_message(message_id: &str, from: &str, subject: &str) -> String {
    format!(
        "Message-ID: {}\r\nFrom: \"Casey Customer\" <{}>\r\nTo: support@example.com\r\nSubject: {}\r\nDate: Tue, 04 Mar 2025 10:15:00 +0000\r\nContent-Type: text/plain; charset=utf-8\r\n\r\nPlease help with {}.\r\n",
        message_id, from, subject, subject
    )
}

pub fn test_config(base_url: &str) -> SupportConfig {
    let mut config = SupportConfig::default();
    config.mailbox.username = "support@example.com".to_string();
    config.anthropic.api_key = "test-key".to_string();
    config.anthropic.base_url = base_url.to_string();
    config.tasks.retry_base_secs = 0;
    config.agents = vec![Agent {
        id: 1,
        name: "Lee Lead".to_string(),
        email: "lead@example.com".to_string(),
        is_staff: true,
        is_active: true,
    }];
    config.knowledge_base = vec![ArticleSeed {
        category: CategoryName::Billing,
        title: "Refund policy".to_string(),
        content: "Refunds are issued within 5 business days.".to_string(),
        keywords: vec!["refund".to_string()],
    }];
    config
}

pub async fn build_engine(
    config: SupportConfig,
    storage: LocalStorage,
    messages: &[String],
    sender: Arc<RecordingSender>,
) -> SupportEngine<LocalStorage> {
    let agent = ClaudeEmailAgent::new(&config.anthropic).unwrap();
    SupportEngine::new(
        config,
        storage,
        Adapters {
            source: Arc::new(FakeMailbox::new(messages)),
            sender,
            agent: Arc::new(agent),
        },
    )
    .await
    .unwrap()
}

pub fn claude_text(text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "msg_test",
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "text", "text": text }],
    })
}
