pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::SupportConfig;

pub use adapters::{ClaudeEmailAgent, ImapMailSource, LocalStorage, SmtpMailSender};
pub use core::{Adapters, RunSummary, SupportEngine};
pub use utils::error::{Result, SupportError};
