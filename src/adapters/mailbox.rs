//! IMAP 收件（TLS）。imap crate 為同步 API，在 blocking 執行緒中執行。

use crate::config::toml_config::MailboxConfig;
use crate::domain::ports::{ConnectionReport, MailSource, RawMessage};
use crate::utils::error::{Result, SupportError};
use async_trait::async_trait;
use std::fmt::Display;
use std::net::TcpStream;

type ImapSession = imap::Session<native_tls::TlsStream<TcpStream>>;

pub struct ImapMailSource {
    config: MailboxConfig,
}

fn imap_error(e: impl Display) -> SupportError {
    SupportError::ImapError {
        message: e.to_string(),
    }
}

/// 保留 UID 最大（最新）的 `limit` 筆，由舊到新排序
pub fn newest_uids(uids: impl IntoIterator<Item = u32>, limit: usize) -> Vec<u32> {
    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();
    let skip = uids.len().saturating_sub(limit);
    uids.split_off(skip)
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl ImapMailSource {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }

    fn connect(config: &MailboxConfig) -> Result<ImapSession> {
        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(imap_error)?;
        let client = imap::connect((config.host.as_str(), config.port), &config.host, &tls)
            .map_err(imap_error)?;
        client
            .login(&config.username, &config.password)
            .map_err(|(e, _)| imap_error(e))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(MailboxConfig) -> Result<T> + Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || f(config))
            .await
            .map_err(|e| SupportError::TaskError {
                message: format!("IMAP worker panicked: {}", e),
            })?
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    async fn fetch_unseen(&self, mailbox: &str, limit: usize) -> Result<Vec<RawMessage>> {
        let mailbox = mailbox.to_string();
        self.blocking(move |config| {
            tracing::debug!("Connecting to IMAP {}:{}", config.host, config.port);
            let mut session = Self::connect(&config)?;
            session.select(&mailbox).map_err(imap_error)?;

            let unseen = session.uid_search("UNSEEN").map_err(imap_error)?;
            let uids = newest_uids(unseen, limit);
            tracing::info!("Found {} unseen messages in {}", uids.len(), mailbox);

            let mut messages = Vec::new();
            if !uids.is_empty() {
                // BODY.PEEK 不會設定 \Seen
                let fetches = session
                    .uid_fetch(uid_set(&uids), "(UID BODY.PEEK[] FLAGS INTERNALDATE)")
                    .map_err(imap_error)?;
                for fetch in fetches.iter() {
                    match (fetch.uid, fetch.body()) {
                        (Some(uid), Some(body)) => messages.push(RawMessage {
                            uid,
                            rfc822: body.to_vec(),
                        }),
                        _ => tracing::warn!("Skipping fetch response without UID or body"),
                    }
                }
            }

            if let Err(e) = session.logout() {
                tracing::debug!("IMAP logout failed: {}", e);
            }
            Ok(messages)
        })
        .await
    }

    async fn mark_seen(&self, mailbox: &str, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let mailbox = mailbox.to_string();
        let set = uid_set(uids);
        self.blocking(move |config| {
            let mut session = Self::connect(&config)?;
            session.select(&mailbox).map_err(imap_error)?;
            session
                .uid_store(&set, "+FLAGS (\\Seen)")
                .map_err(imap_error)?;
            let _ = session.logout();
            Ok(())
        })
        .await
    }

    async fn test_connection(&self) -> ConnectionReport {
        let result = self
            .blocking(|config| {
                let mut session = Self::connect(&config)?;
                let names = session.list(None, Some("*")).map_err(imap_error)?;
                let folders = names.iter().map(|n| n.name().to_string()).collect();
                let _ = session.logout();
                Ok(folders)
            })
            .await;

        match result {
            Ok(folders) => ConnectionReport {
                success: true,
                message: "Connection successful".to_string(),
                folders,
            },
            Err(e) => {
                tracing::error!("IMAP connection test failed: {}", e);
                ConnectionReport {
                    success: false,
                    message: e.to_string(),
                    folders: Vec::new(),
                }
            }
        }
    }
}
