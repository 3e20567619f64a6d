use crate::core::review::{EmailFilter, ReviewAction};
use crate::domain::model::{CategoryName, EmailStatus, Priority};
use crate::utils::error::{Result, SupportError};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Parser)]
#[command(name = "support-agent")]
#[command(about = "Email support assistant: fetch, classify, draft and review customer mail")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "support-agent.toml")]
    pub config: String,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit JSON formatted logs")]
    pub json_logs: bool,

    /// Override monitoring setting from config
    #[arg(long)]
    pub monitor: Option<bool>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the task worker and the periodic scheduler until interrupted
    Serve,
    /// Fetch new mail and process it inline once
    RunOnce,
    /// Fetch unseen mail from the IMAP mailbox
    Fetch,
    /// Classify and draft a reply for one email
    Process { email_id: u64 },
    /// Process several emails in sequence
    Bulk {
        #[arg(value_delimiter = ',')]
        email_ids: Vec<u64>,
    },
    /// List stored emails
    Emails(EmailFilterArgs),
    /// Show one email with its replies and processing history
    Show { email_id: u64 },
    /// Assign an email to an agent
    Assign { email_id: u64, agent_id: u64 },
    /// Escalate an email manually
    Escalate {
        email_id: u64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Mark an email as spam
    Spam { email_id: u64 },
    /// Close an email
    Close { email_id: u64 },
    /// Reset an email and run it through the AI pipeline again
    Reprocess { email_id: u64 },
    /// Write a human reply draft
    Reply {
        email_id: u64,
        #[arg(long)]
        body: String,
        #[arg(long)]
        author: Option<u64>,
    },
    /// Approve, reject or modify a reply
    Review(ReviewArgs),
    /// Send an approved reply
    Send {
        reply_id: u64,
        #[arg(long, value_delimiter = ',')]
        cc: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        bcc: Vec<String>,
    },
    /// Email counts by status, category and priority
    Stats,
    /// Generate daily, category and agent metrics (defaults to yesterday)
    Metrics {
        #[arg(long)]
        date: Option<chrono::NaiveDate>,
    },
    /// Dashboard overview for the last N days
    Dashboard {
        #[arg(long, default_value = "7")]
        days: u32,
    },
    /// Estimated cost savings for the last N days
    Savings {
        #[arg(long, default_value = "30")]
        days: u32,
    },
    /// Export metrics as a ZIP archive in the data directory
    Export {
        #[arg(long, default_value = "30")]
        days: u32,
    },
    /// Delete processing logs older than the retention period
    Cleanup,
    /// Knowledge base maintenance
    #[command(subcommand)]
    Kb(KbCommand),
    /// Run a detailed sentiment analysis for an email
    Sentiment { email_id: u64 },
    /// Check IMAP and SMTP connectivity
    TestConnection,
}

#[derive(Debug, Clone, Default, Args)]
pub struct EmailFilterArgs {
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub priority: Option<String>,
    #[arg(long)]
    pub assigned_to: Option<u64>,
    #[arg(long)]
    pub escalated: Option<bool>,
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub overdue: bool,
    #[arg(long, default_value = "50")]
    pub limit: usize,
}

pub fn parse_category(value: &str) -> Result<CategoryName> {
    CategoryName::parse(value)
        .ok_or_else(|| SupportError::validation(format!("Unknown category: {}", value)))
}

impl EmailFilterArgs {
    pub fn to_filter(&self) -> Result<EmailFilter> {
        let status = self
            .status
            .as_deref()
            .map(|s| {
                EmailStatus::parse(s)
                    .ok_or_else(|| SupportError::validation(format!("Unknown status: {}", s)))
            })
            .transpose()?;
        let priority = self
            .priority
            .as_deref()
            .map(|p| {
                Priority::parse(p)
                    .ok_or_else(|| SupportError::validation(format!("Unknown priority: {}", p)))
            })
            .transpose()?;

        Ok(EmailFilter {
            status,
            category: self.category.as_deref().map(parse_category).transpose()?,
            priority,
            assigned_to: self.assigned_to,
            requires_escalation: self.escalated,
            search: self.search.clone().filter(|s| !s.trim().is_empty()),
            overdue_only: self.overdue,
            limit: Some(self.limit),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReviewDecision {
    Approve,
    Reject,
    Modify,
}

#[derive(Debug, Clone, Args)]
pub struct ReviewArgs {
    pub reply_id: u64,
    #[arg(value_enum)]
    pub decision: ReviewDecision,
    /// Reviewing agent id
    #[arg(long)]
    pub reviewer: u64,
    #[arg(long)]
    pub notes: Option<String>,
    /// Replacement body when modifying
    #[arg(long)]
    pub body: Option<String>,
    #[arg(long)]
    pub send_immediately: bool,
}

impl ReviewArgs {
    pub fn action(&self) -> Result<ReviewAction> {
        let notes = self.notes.clone();
        Ok(match self.decision {
            ReviewDecision::Approve => ReviewAction::Approve {
                notes,
                send_immediately: self.send_immediately,
            },
            ReviewDecision::Reject => ReviewAction::Reject { notes },
            ReviewDecision::Modify => ReviewAction::Modify {
                body: self.body.clone().ok_or_else(|| {
                    SupportError::validation("Modified body is required when modifying reply")
                })?,
                notes,
                send_immediately: self.send_immediately,
            },
        })
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum KbCommand {
    Add {
        #[arg(long)]
        category: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,
        #[arg(long)]
        author: Option<u64>,
    },
    List {
        #[arg(long)]
        category: Option<String>,
    },
    Search {
        #[arg(value_delimiter = ',')]
        keywords: Vec<String>,
    },
    Deactivate { article_id: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_review_command() {
        let cli = CliConfig::try_parse_from([
            "support-agent",
            "review",
            "12",
            "modify",
            "--reviewer",
            "3",
            "--body",
            "Thanks for reaching out",
            "--send-immediately",
        ])
        .unwrap();

        match cli.command {
            Command::Review(args) => {
                assert_eq!(args.reply_id, 12);
                assert_eq!(args.decision, ReviewDecision::Modify);
                assert_eq!(args.reviewer, 3);
                assert!(args.send_immediately);
                assert_eq!(args.body.as_deref(), Some("Thanks for reaching out"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_filter_args_parse_enums() {
        let cli = CliConfig::try_parse_from([
            "support-agent",
            "emails",
            "--status",
            "pending_review",
            "--category",
            "feature-request",
            "--overdue",
        ])
        .unwrap();

        let Command::Emails(args) = cli.command else {
            panic!("expected emails command");
        };
        let filter = args.to_filter().unwrap();
        assert_eq!(filter.status, Some(EmailStatus::PendingReview));
        assert_eq!(filter.category, Some(CategoryName::FeatureRequest));
        assert!(filter.overdue_only);
        assert_eq!(filter.limit, Some(50));

        let bad = EmailFilterArgs {
            status: Some("archived".to_string()),
            ..EmailFilterArgs::default()
        };
        assert!(bad.to_filter().is_err());
    }

    #[test]
    fn test_modify_without_body_is_rejected() {
        let cli = CliConfig::try_parse_from([
            "support-agent",
            "review",
            "4",
            "modify",
            "--reviewer",
            "1",
        ])
        .unwrap();
        let Command::Review(args) = cli.command else {
            panic!("expected review command");
        };
        assert!(args.action().is_err());
    }

    #[test]
    fn test_parse_bulk_ids() {
        let cli = CliConfig::try_parse_from(["support-agent", "bulk", "1,2,3"]).unwrap();
        match cli.command {
            Command::Bulk { email_ids } => assert_eq!(email_ids, vec![1, 2, 3]),
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.config, "support-agent.toml");
    }
}
