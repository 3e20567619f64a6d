// 外部系統的具體實作：IMAP、SMTP、Anthropic API、本機儲存

pub mod anthropic;
pub mod mailbox;
pub mod smtp;
pub mod storage;

pub use anthropic::ClaudeEmailAgent;
pub use mailbox::ImapMailSource;
pub use smtp::SmtpMailSender;
pub use storage::LocalStorage;
