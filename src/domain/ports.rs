use crate::domain::model::{CategoryName, ExtractedInfo, KnowledgeArticle, Priority, Sentiment};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// 信箱中尚未讀取的原始訊息
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub rfc822: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub folders: Vec<String>,
}

#[async_trait]
pub trait MailSource: Send + Sync {
    async fn fetch_unseen(&self, mailbox: &str, limit: usize) -> Result<Vec<RawMessage>>;
    async fn mark_seen(&self, mailbox: &str, uids: &[u32]) -> Result<()>;
    async fn test_connection(&self) -> ConnectionReport;
}

/// 待寄出的郵件
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub to: String,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

impl OutgoingMail {
    pub fn recipients(&self) -> Vec<&str> {
        std::iter::once(self.to.as_str())
            .chain(self.cc.iter().map(String::as_str))
            .chain(self.bcc.iter().map(String::as_str))
            .collect()
    }
}

#[async_trait]
pub trait MailSender: Send + Sync {
    fn from_address(&self) -> &str;
    async fn send(&self, mail: OutgoingMail) -> Result<()>;
    async fn test_connection(&self) -> ConnectionReport;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// 模型回傳的分類名稱（小寫）
    pub category: String,
    pub confidence: f64,
    pub priority: Priority,
    pub sentiment: Sentiment,
    pub requires_escalation: bool,
    pub escalation_reason: String,
    pub extracted_info: ExtractedInfo,
}

impl Classification {
    /// 模型輸出無法解析時採用的保守分類
    pub fn fallback() -> Self {
        Self {
            category: CategoryName::General.as_str().to_string(),
            confidence: 0.5,
            priority: Priority::Medium,
            sentiment: Sentiment::Neutral,
            requires_escalation: false,
            escalation_reason: String::new(),
            extracted_info: ExtractedInfo {
                issue_summary: "Classification failed".to_string(),
                ..ExtractedInfo::default()
            },
        }
    }

    pub fn category_name(&self) -> Option<CategoryName> {
        CategoryName::parse(&self.category)
    }
}

#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub subject: String,
    pub body: String,
    pub category: String,
    pub customer_name: Option<String>,
    pub articles: Vec<KnowledgeArticle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyDraft {
    pub reply: String,
    pub confidence: f64,
    pub requires_review: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub used_articles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReport {
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub urgency_level: u8,
    #[serde(default)]
    pub emotion_tags: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl SentimentReport {
    pub fn fallback() -> Self {
        Self {
            sentiment: Sentiment::Neutral,
            confidence: 0.5,
            urgency_level: 3,
            emotion_tags: Vec::new(),
            reasoning: String::new(),
        }
    }
}

/// 郵件分類與回覆草稿的 AI 服務
#[async_trait]
pub trait EmailAgent: Send + Sync {
    async fn classify(
        &self,
        subject: &str,
        body: &str,
        categories: &[CategoryName],
    ) -> Result<Classification>;
    async fn generate_reply(&self, request: ReplyRequest) -> Result<ReplyDraft>;
    async fn analyze_sentiment(&self, text: &str) -> SentimentReport;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipients_include_cc_and_bcc() {
        let mail = OutgoingMail {
            to: "customer@example.com".to_string(),
            cc: vec!["lead@example.com".to_string()],
            bcc: vec!["audit@example.com".to_string()],
            subject: "Re: hi".to_string(),
            text_body: "hi".to_string(),
            html_body: None,
            in_reply_to: None,
            references: None,
        };
        assert_eq!(
            mail.recipients(),
            vec!["customer@example.com", "lead@example.com", "audit@example.com"]
        );
    }

    #[test]
    fn test_fallback_classification() {
        let fallback = Classification::fallback();
        assert_eq!(fallback.category_name(), Some(CategoryName::General));
        assert_eq!(fallback.confidence, 0.5);
        assert_eq!(fallback.extracted_info.issue_summary, "Classification failed");
    }
}
