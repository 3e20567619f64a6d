use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// 郵件分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryName {
    Billing,
    Technical,
    Sales,
    General,
    Complaint,
    FeatureRequest,
    Other,
}

impl CategoryName {
    pub const ALL: [CategoryName; 7] = [
        CategoryName::Billing,
        CategoryName::Technical,
        CategoryName::Sales,
        CategoryName::General,
        CategoryName::Complaint,
        CategoryName::FeatureRequest,
        CategoryName::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Billing => "billing",
            Self::Technical => "technical",
            Self::Sales => "sales",
            Self::General => "general",
            Self::Complaint => "complaint",
            Self::FeatureRequest => "feature_request",
            Self::Other => "other",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Billing => "Billing",
            Self::Technical => "Technical Issue",
            Self::Sales => "Sales Inquiry",
            Self::General => "General Inquiry",
            Self::Complaint => "Complaint",
            Self::FeatureRequest => "Feature Request",
            Self::Other => "Other",
        }
    }

    /// 不分大小寫解析，未知名稱回傳 None
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|c| c.as_str() == normalized)
    }
}

impl fmt::Display for CategoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    New,
    Processing,
    PendingReview,
    Replied,
    Escalated,
    Closed,
    Spam,
}

impl EmailStatus {
    pub const ALL: [EmailStatus; 7] = [
        EmailStatus::New,
        EmailStatus::Processing,
        EmailStatus::PendingReview,
        EmailStatus::Replied,
        EmailStatus::Escalated,
        EmailStatus::Closed,
        EmailStatus::Spam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Processing => "processing",
            Self::PendingReview => "pending_review",
            Self::Replied => "replied",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
            Self::Spam => "spam",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|s| s.as_str() == normalized)
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Urgent => "Urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "positive" => Some(Self::Positive),
            "neutral" => Some(Self::Neutral),
            "negative" => Some(Self::Negative),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Positive => "Positive",
            Self::Neutral => "Neutral",
            Self::Negative => "Negative",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Ai,
    Human,
    AiModified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Draft,
    PendingApproval,
    Approved,
    Sent,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailCategory {
    pub name: CategoryName,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub auto_reply_enabled: bool,
    #[serde(default)]
    pub escalation_required: bool,
    #[serde(default = "default_sla_hours")]
    pub sla_hours: u32,
}

fn default_sla_hours() -> u32 {
    24
}

impl EmailCategory {
    pub fn new(name: CategoryName) -> Self {
        Self {
            name,
            description: String::new(),
            keywords: Vec::new(),
            auto_reply_enabled: false,
            escalation_required: false,
            sla_hours: default_sla_hours(),
        }
    }

    /// 預設的七個分類
    pub fn defaults() -> Vec<Self> {
        CategoryName::ALL.into_iter().map(Self::new).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeArticle {
    pub id: u64,
    pub category: CategoryName,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub use_count: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<u64>,
}

/// 客服人員
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: u64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
}

/// AI 從郵件擷取的結構化資訊
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub customer_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub order_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub account_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub issue_summary: String,
    #[serde(deserialize_with = "null_as_default")]
    pub key_points: Vec<String>,
}

/// JSON `null` 視同欄位缺漏，回傳預設值
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 從信箱解析出、尚未入庫的郵件
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingEmail {
    pub message_id: String,
    pub from_email: String,
    pub from_name: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
    pub body_html: String,
    pub received_at: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
    pub has_attachments: bool,
    pub thread_id: String,
    pub in_reply_to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: u64,
    pub message_id: String,
    pub from_email: String,
    pub from_name: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
    pub body_html: String,

    pub category: Option<CategoryName>,
    pub status: EmailStatus,
    pub priority: Priority,

    pub ai_classification_confidence: Option<f64>,
    pub ai_sentiment: Option<Sentiment>,
    #[serde(default)]
    pub ai_extracted_info: ExtractedInfo,
    pub requires_escalation: bool,
    #[serde(default)]
    pub escalation_reason: String,

    pub assigned_to: Option<u64>,
    pub assigned_at: Option<DateTime<Utc>>,

    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub has_attachments: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub in_reply_to: String,
}

impl Email {
    pub fn from_incoming(id: u64, incoming: IncomingEmail, now: DateTime<Utc>) -> Self {
        Self {
            id,
            message_id: incoming.message_id,
            from_email: incoming.from_email,
            from_name: incoming.from_name,
            to_email: incoming.to_email,
            subject: incoming.subject,
            body: incoming.body,
            body_html: incoming.body_html,
            category: None,
            status: EmailStatus::New,
            priority: Priority::Medium,
            ai_classification_confidence: None,
            ai_sentiment: None,
            ai_extracted_info: ExtractedInfo::default(),
            requires_escalation: false,
            escalation_reason: String::new(),
            assigned_to: None,
            assigned_at: None,
            received_at: incoming.received_at,
            processed_at: None,
            replied_at: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
            has_attachments: incoming.has_attachments,
            attachments: incoming.attachments,
            thread_id: incoming.thread_id,
            in_reply_to: incoming.in_reply_to,
        }
    }

    /// 回覆時間（小時）
    pub fn response_time_hours(&self) -> Option<f64> {
        self.replied_at
            .map(|replied| (replied - self.received_at).num_milliseconds() as f64 / 3_600_000.0)
    }

    /// 依分類 SLA 判斷是否逾期；已回覆或已結案的郵件不算逾期
    pub fn is_overdue(&self, now: DateTime<Utc>, sla_hours: Option<u32>) -> bool {
        if matches!(self.status, EmailStatus::Replied | EmailStatus::Closed) {
            return false;
        }

        match sla_hours {
            Some(hours) if hours > 0 => now > self.received_at + Duration::hours(hours as i64),
            _ => false,
        }
    }

    pub fn short_subject(&self) -> String {
        self.subject.chars().take(50).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailReply {
    pub id: u64,
    pub email_id: u64,
    pub body: String,
    pub source: ReplySource,
    pub status: ReplyStatus,
    pub ai_confidence: Option<f64>,
    #[serde(default)]
    pub knowledge_articles: Vec<u64>,
    pub created_by: Option<u64>,
    pub reviewed_by: Option<u64>,
    #[serde(default)]
    pub review_notes: String,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 處理步驟的稽核紀錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingLog {
    pub id: u64,
    pub email_id: u64,
    pub step: String,
    pub status: LogStatus,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default)]
    pub error_message: String,
    pub processing_time_secs: Option<f64>,
    pub created_at: DateTime<Utc>,
}
