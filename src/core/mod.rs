pub mod analytics;
pub mod engine;
pub mod export;
pub mod ingest;
pub mod masking;
pub mod notify;
pub mod parser;
pub mod processor;
pub mod review;
pub mod scheduler;
pub mod store;
pub mod tasks;

pub use crate::domain::ports::{EmailAgent, MailSender, MailSource, Storage};
pub use crate::utils::error::Result;
pub use engine::{Adapters, RunSummary, SupportEngine};
