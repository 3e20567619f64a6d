use crate::domain::model::{Agent, CategoryName, EmailCategory};
use crate::utils::error::{Result, SupportError};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupportConfig {
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub categories: Vec<EmailCategory>,
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub knowledge_base: Vec<ArticleSeed>,
}

/// IMAP 收件設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
    pub fetch_limit: usize,
    /// 擷取後是否標記為已讀（預設保留未讀）
    pub mark_seen: bool,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 993,
            username: String::new(),
            password: String::new(),
            mailbox: "INBOX".to_string(),
            fetch_limit: 50,
            mark_seen: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// 空白時沿用 mailbox.username
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub use_tls: bool,
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            use_tls: true,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5-20250929".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub auto_reply_threshold: f64,
    /// 每封郵件帶入的知識庫文章數
    pub knowledge_base_limit: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            auto_reply_threshold: 0.85,
            knowledge_base_limit: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

/// cron 表示式（秒 分 時 日 月 週）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub fetch_emails: String,
    pub daily_metrics: String,
    pub cleanup_logs: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fetch_emails: "0 * * * * *".to_string(),
            daily_metrics: "0 5 0 * * *".to_string(),
            cleanup_logs: "0 0 2 * * Sun".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub max_retries: u32,
    pub retry_base_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// 每封 AI 核准回覆估計節省的人工分鐘數
    pub minutes_per_email: f64,
    pub hourly_rate: f64,
    pub log_retention_days: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            minutes_per_email: 10.0,
            hourly_rate: 30.0,
            log_retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub dashboard_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            dashboard_url: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

/// 設定檔中預先載入的知識庫文章
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleSeed {
    pub category: CategoryName,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl SupportConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(SupportError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| SupportError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${ANTHROPIC_API_KEY})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| SupportError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 設定檔覆寫後的完整分類清單
    pub fn effective_categories(&self) -> Vec<EmailCategory> {
        let mut categories = EmailCategory::defaults();
        for configured in &self.categories {
            if let Some(existing) = categories.iter_mut().find(|c| c.name == configured.name) {
                *existing = configured.clone();
            }
        }
        categories
    }

    pub fn smtp_username(&self) -> &str {
        if self.smtp.username.is_empty() {
            &self.mailbox.username
        } else {
            &self.smtp.username
        }
    }

    pub fn smtp_password(&self) -> &str {
        if self.smtp.password.is_empty() {
            &self.mailbox.password
        } else {
            &self.smtp.password
        }
    }

    /// 擷取郵件前必須具備 IMAP 設定
    pub fn require_mailbox(&self) -> Result<()> {
        validation::validate_host("mailbox.host", &self.mailbox.host)?;
        validation::validate_non_empty_string("mailbox.username", &self.mailbox.username)
            .map_err(|_| missing("mailbox.username"))?;
        validation::validate_non_empty_string("mailbox.password", &self.mailbox.password)
            .map_err(|_| missing("mailbox.password"))?;
        Ok(())
    }

    pub fn require_smtp(&self) -> Result<()> {
        validation::validate_host("smtp.host", &self.smtp.host)?;
        validation::validate_email_address("smtp.from_address", &self.smtp.from_address)?;
        validation::validate_non_empty_string("smtp.username", self.smtp_username())
            .map_err(|_| missing("smtp.username"))?;
        Ok(())
    }

    pub fn require_anthropic(&self) -> Result<()> {
        if self.anthropic.api_key.is_empty() || self.anthropic.api_key.starts_with("${") {
            return Err(missing("anthropic.api_key"));
        }
        Ok(())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_url("anthropic.base_url", &self.anthropic.base_url)?;
        validation::validate_non_empty_string("anthropic.model", &self.anthropic.model)?;
        validation::validate_url(
            "notifications.dashboard_url",
            &self.notifications.dashboard_url,
        )?;
        validation::validate_path("storage.data_dir", &self.storage.data_dir)?;
        validation::validate_positive_number("mailbox.fetch_limit", self.mailbox.fetch_limit, 1)?;
        validation::validate_non_empty_string("mailbox.mailbox", &self.mailbox.mailbox)?;
        validation::validate_range(
            "processing.auto_reply_threshold",
            self.processing.auto_reply_threshold,
            0.0,
            1.0,
        )?;
        validation::validate_range(
            "analytics.log_retention_days",
            self.analytics.log_retention_days,
            1,
            3650,
        )?;

        if !self.mailbox.host.is_empty() {
            validation::validate_host("mailbox.host", &self.mailbox.host)?;
        }
        if !self.smtp.host.is_empty() {
            validation::validate_host("smtp.host", &self.smtp.host)?;
        }
        if !self.smtp.from_address.is_empty() {
            validation::validate_email_address("smtp.from_address", &self.smtp.from_address)?;
        }

        validation::validate_cron_expression("schedule.fetch_emails", &self.schedule.fetch_emails)?;
        validation::validate_cron_expression(
            "schedule.daily_metrics",
            &self.schedule.daily_metrics,
        )?;
        validation::validate_cron_expression("schedule.cleanup_logs", &self.schedule.cleanup_logs)?;

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id) {
                return Err(SupportError::InvalidConfigValueError {
                    field: "agents.id".to_string(),
                    value: agent.id.to_string(),
                    reason: "Agent ids must be unique".to_string(),
                });
            }
        }

        Ok(())
    }

    /// 是否啟用資源監控
    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.enabled
    }
}

fn missing(field: &str) -> SupportError {
    SupportError::MissingConfigError {
        field: field.to_string(),
    }
}

impl Validate for SupportConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[mailbox]
host = "imap.example.com"
username = "support@example.com"
password = "secret"

[smtp]
host = "smtp.example.com"
from_address = "support@example.com"

[anthropic]
api_key = "sk-test"

[processing]
auto_reply_threshold = 0.9

[[categories]]
name = "billing"
sla_hours = 4
escalation_required = true

[[agents]]
id = 1
name = "Alice"
email = "alice@example.com"
is_staff = true

[[knowledge_base]]
category = "billing"
title = "Refund policy"
content = "Refunds are processed within 5 business days."
keywords = ["refund"]
"#;

        let config = SupportConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.mailbox.port, 993);
        assert_eq!(config.mailbox.mailbox, "INBOX");
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.smtp_username(), "support@example.com");
        assert_eq!(config.smtp_password(), "secret");
        assert_eq!(config.processing.auto_reply_threshold, 0.9);
        assert_eq!(config.processing.knowledge_base_limit, 3);
        assert_eq!(config.agents.len(), 1);
        assert!(config.agents[0].is_active);
        assert_eq!(config.knowledge_base[0].category, CategoryName::Billing);

        let categories = config.effective_categories();
        assert_eq!(categories.len(), 7);
        let billing = categories
            .iter()
            .find(|c| c.name == CategoryName::Billing)
            .unwrap();
        assert_eq!(billing.sla_hours, 4);
        assert!(billing.escalation_required);

        assert!(config.validate().is_ok());
        assert!(config.require_mailbox().is_ok());
        assert!(config.require_smtp().is_ok());
        assert!(config.require_anthropic().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SupportConfig::from_toml_str("").unwrap();
        assert_eq!(config.processing.auto_reply_threshold, 0.85);
        assert_eq!(config.analytics.log_retention_days, 90);
        assert_eq!(config.tasks.max_retries, 3);
        assert!(config.validate().is_ok());
        assert!(config.require_anthropic().is_err());
        assert!(config.require_mailbox().is_err());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SUPPORT_TEST_API_KEY", "sk-from-env");

        let toml_content = r#"
[anthropic]
api_key = "${SUPPORT_TEST_API_KEY}"
"#;

        let config = SupportConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.anthropic.api_key, "sk-from-env");

        std::env::remove_var("SUPPORT_TEST_API_KEY");
    }

    #[test]
    fn test_unresolved_env_var_is_missing_key() {
        let toml_content = r#"
[anthropic]
api_key = "${SUPPORT_TEST_UNSET_VARIABLE}"
"#;
        let config = SupportConfig::from_toml_str(toml_content).unwrap();
        assert!(config.require_anthropic().is_err());
    }

    #[test]
    fn test_config_validation_rejects_bad_threshold() {
        let toml_content = r#"
[processing]
auto_reply_threshold = 1.5
"#;

        let config = SupportConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_bad_cron() {
        let toml_content = r#"
[schedule]
fetch_emails = "every minute"
"#;

        let config = SupportConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();

        let toml_content = r#"
[storage]
data_dir = "/tmp/support-agent"
"#;

        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = SupportConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.storage.data_dir, "/tmp/support-agent");
    }
}
