//! 人工審核流程、郵件操作與查詢。

use crate::core::notify::Outbox;
use crate::core::store::{StoreState, SupportStore};
use crate::domain::model::{
    CategoryName, Email, EmailReply, EmailStatus, KnowledgeArticle, Priority, ProcessingLog,
    ReplySource, ReplyStatus,
};
use crate::domain::ports::Storage;
use crate::utils::error::{Result, SupportError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewAction {
    Approve {
        notes: Option<String>,
        send_immediately: bool,
    },
    Reject {
        notes: Option<String>,
    },
    Modify {
        body: String,
        notes: Option<String>,
        send_immediately: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewResult {
    /// 審核後生效的回覆；修改時為新建立的回覆
    pub reply: EmailReply,
    pub sent: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EmailFilter {
    pub status: Option<EmailStatus>,
    pub category: Option<CategoryName>,
    pub priority: Option<Priority>,
    pub assigned_to: Option<u64>,
    pub requires_escalation: Option<bool>,
    pub search: Option<String>,
    pub overdue_only: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmailStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailDetail {
    pub email: Email,
    pub is_overdue: bool,
    pub replies: Vec<EmailReply>,
    pub logs: Vec<ProcessingLog>,
}

pub struct ReviewDesk<S: Storage> {
    store: Arc<SupportStore<S>>,
    outbox: Arc<Outbox<S>>,
}

impl<S: Storage> ReviewDesk<S> {
    pub fn new(store: Arc<SupportStore<S>>, outbox: Arc<Outbox<S>>) -> Self {
        Self { store, outbox }
    }

    pub async fn review(
        &self,
        reply_id: u64,
        action: ReviewAction,
        reviewer: u64,
    ) -> Result<ReviewResult> {
        let now = Utc::now();

        let (target_id, send_immediately) = self
            .store
            .write(|s| {
                s.agent(reviewer)?;
                if s.reply(reply_id)?.status == ReplyStatus::Sent {
                    return Err(SupportError::invalid_state(format!(
                        "Reply {} has already been sent",
                        reply_id
                    )));
                }
                match action {
                    ReviewAction::Approve {
                        notes,
                        send_immediately,
                    } => {
                        let reply = s.reply_mut(reply_id)?;
                        reply.status = ReplyStatus::Approved;
                        reply.reviewed_by = Some(reviewer);
                        reply.reviewed_at = Some(now);
                        reply.review_notes = notes.unwrap_or_default();
                        Ok((reply_id, send_immediately))
                    }
                    ReviewAction::Reject { notes } => {
                        let reply = s.reply_mut(reply_id)?;
                        reply.status = ReplyStatus::Rejected;
                        reply.reviewed_by = Some(reviewer);
                        reply.reviewed_at = Some(now);
                        reply.review_notes = notes.unwrap_or_default();
                        Ok((reply_id, false))
                    }
                    ReviewAction::Modify {
                        body,
                        notes,
                        send_immediately,
                    } => {
                        if body.trim().is_empty() {
                            return Err(SupportError::validation(
                                "Modified body is required when modifying reply",
                            ));
                        }

                        let original = s.reply_mut(reply_id)?;
                        original.status = ReplyStatus::Rejected;
                        original.review_notes = "Modified version created".to_string();
                        let email_id = original.email_id;

                        let new_id = s.add_reply(EmailReply {
                            id: 0,
                            email_id,
                            body,
                            source: ReplySource::AiModified,
                            status: ReplyStatus::Approved,
                            ai_confidence: None,
                            knowledge_articles: Vec::new(),
                            created_by: Some(reviewer),
                            reviewed_by: Some(reviewer),
                            review_notes: notes
                                .unwrap_or_else(|| "Modified from AI suggestion".to_string()),
                            reviewed_at: Some(now),
                            sent_at: None,
                            created_at: now,
                            updated_at: now,
                        });
                        Ok((new_id, send_immediately))
                    }
                }
            })
            .await?;

        tracing::info!("Reply {} reviewed by agent {}", reply_id, reviewer);

        if send_immediately {
            self.outbox.send_reply(target_id, &[], &[]).await?;
        }

        let reply = self.store.read(|s| s.reply(target_id).cloned()).await?;
        Ok(ReviewResult {
            reply,
            sent: send_immediately,
        })
    }

    /// 只允許寄出已核准的回覆
    pub async fn send(&self, reply_id: u64, cc: &[String], bcc: &[String]) -> Result<EmailReply> {
        let status = self.store.read(|s| s.reply(reply_id).map(|r| r.status)).await?;
        if status != ReplyStatus::Approved {
            return Err(SupportError::validation(
                "Reply must be approved before sending",
            ));
        }

        self.outbox.send_reply(reply_id, cc, bcc).await?;
        self.store.read(|s| s.reply(reply_id).cloned()).await
    }

    /// 人工撰寫的回覆草稿
    pub async fn create_reply(&self, email_id: u64, body: &str, author: Option<u64>) -> Result<u64> {
        if body.trim().is_empty() {
            return Err(SupportError::validation("Reply body must not be empty"));
        }
        let now = Utc::now();

        self.store
            .write(|s| {
                s.email(email_id)?;
                if let Some(author) = author {
                    s.agent(author)?;
                }
                Ok(s.add_reply(EmailReply {
                    id: 0,
                    email_id,
                    body: body.to_string(),
                    source: ReplySource::Human,
                    status: ReplyStatus::Draft,
                    ai_confidence: None,
                    knowledge_articles: Vec::new(),
                    created_by: author,
                    reviewed_by: None,
                    review_notes: String::new(),
                    reviewed_at: None,
                    sent_at: None,
                    created_at: now,
                    updated_at: now,
                }))
            })
            .await
    }

    pub async fn assign(&self, email_id: u64, agent_id: u64) -> Result<Email> {
        self.store
            .write(|s| {
                let agent_name = s.agent(agent_id)?.name.clone();
                let email = s.email_mut(email_id)?;
                email.assigned_to = Some(agent_id);
                email.assigned_at = Some(Utc::now());
                email.status = EmailStatus::Processing;
                tracing::info!("Email {} assigned to {}", email_id, agent_name);
                Ok(email.clone())
            })
            .await
    }

    pub async fn escalate(&self, email_id: u64, reason: Option<String>) -> Result<Email> {
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "Manual escalation".to_string());

        self.store
            .write(|s| {
                let email = s.email_mut(email_id)?;
                email.requires_escalation = true;
                email.escalation_reason = reason;
                email.status = EmailStatus::Escalated;
                Ok(email.clone())
            })
            .await
    }

    pub async fn mark_spam(&self, email_id: u64) -> Result<Email> {
        self.set_status(email_id, EmailStatus::Spam).await
    }

    pub async fn close(&self, email_id: u64) -> Result<Email> {
        self.store
            .write(|s| {
                let email = s.email_mut(email_id)?;
                email.status = EmailStatus::Closed;
                email.closed_at = Some(Utc::now());
                Ok(email.clone())
            })
            .await
    }

    /// 確認郵件存在並重設為 new，由呼叫端排入處理佇列
    pub async fn prepare_reprocess(&self, email_id: u64) -> Result<()> {
        self.set_status(email_id, EmailStatus::New).await?;
        tracing::info!("Email {} queued for reprocessing", email_id);
        Ok(())
    }

    async fn set_status(&self, email_id: u64, status: EmailStatus) -> Result<Email> {
        self.store
            .write(|s| {
                let email = s.email_mut(email_id)?;
                email.status = status;
                Ok(email.clone())
            })
            .await
    }

    // ---- queries ----

    pub async fn list_emails(&self, filter: &EmailFilter) -> Vec<Email> {
        let now = Utc::now();
        self.store.read(|s| filter_emails(s, filter, now)).await
    }

    pub async fn email_detail(&self, email_id: u64) -> Result<EmailDetail> {
        let now = Utc::now();
        self.store
            .read(|s| {
                let email = s.email(email_id)?.clone();
                let sla = email
                    .category
                    .and_then(|c| s.category(c))
                    .map(|c| c.sla_hours);
                Ok(EmailDetail {
                    is_overdue: email.is_overdue(now, sla),
                    replies: s.replies_for(email_id).into_iter().cloned().collect(),
                    logs: s.logs_for(email_id).into_iter().cloned().collect(),
                    email,
                })
            })
            .await
    }

    pub async fn email_stats(&self) -> EmailStats {
        self.store.read(email_stats).await
    }

    pub async fn overdue_emails(&self, now: DateTime<Utc>) -> Vec<Email> {
        let filter = EmailFilter {
            overdue_only: true,
            ..EmailFilter::default()
        };
        self.store.read(|s| filter_emails(s, &filter, now)).await
    }

    // ---- knowledge base ----

    pub async fn add_article(
        &self,
        category: CategoryName,
        title: &str,
        content: &str,
        keywords: Vec<String>,
        author: Option<u64>,
    ) -> Result<u64> {
        if title.trim().is_empty() || content.trim().is_empty() {
            return Err(SupportError::validation(
                "Knowledge article requires a title and content",
            ));
        }
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        self.store
            .write(|s| {
                Ok(s.add_article(category, title.trim(), content.trim(), keywords, author, Utc::now()))
            })
            .await
    }

    pub async fn list_articles(&self, category: Option<CategoryName>) -> Vec<KnowledgeArticle> {
        self.store
            .read(|s| {
                s.articles_ordered()
                    .into_iter()
                    .filter(|a| category.map_or(true, |c| a.category == c))
                    .cloned()
                    .collect()
            })
            .await
    }

    pub async fn search_by_keywords(&self, keywords: &[String]) -> Vec<KnowledgeArticle> {
        self.store
            .read(|s| s.search_articles(keywords).into_iter().cloned().collect())
            .await
    }

    pub async fn deactivate_article(&self, article_id: u64) -> Result<()> {
        self.store
            .write(|s| {
                s.article_mut(article_id)?.is_active = false;
                Ok(())
            })
            .await
    }
}

fn filter_emails(state: &StoreState, filter: &EmailFilter, now: DateTime<Utc>) -> Vec<Email> {
    let needle = filter
        .search
        .as_ref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut emails: Vec<&Email> = state
        .emails
        .values()
        .filter(|e| filter.status.map_or(true, |s| e.status == s))
        .filter(|e| filter.category.map_or(true, |c| e.category == Some(c)))
        .filter(|e| filter.priority.map_or(true, |p| e.priority == p))
        .filter(|e| filter.assigned_to.map_or(true, |a| e.assigned_to == Some(a)))
        .filter(|e| {
            filter
                .requires_escalation
                .map_or(true, |flag| e.requires_escalation == flag)
        })
        .filter(|e| match &needle {
            Some(needle) => {
                e.from_email.to_lowercase().contains(needle)
                    || e.from_name.to_lowercase().contains(needle)
                    || e.subject.to_lowercase().contains(needle)
                    || e.body.to_lowercase().contains(needle)
            }
            None => true,
        })
        .filter(|e| {
            if !filter.overdue_only {
                return true;
            }
            let sla = e
                .category
                .and_then(|c| state.category(c))
                .map(|c| c.sla_hours);
            e.is_overdue(now, sla)
        })
        .collect();

    emails.sort_by(|a, b| b.received_at.cmp(&a.received_at).then(b.id.cmp(&a.id)));

    emails
        .into_iter()
        .take(filter.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

fn email_stats(state: &StoreState) -> EmailStats {
    let mut stats = EmailStats {
        total: state.emails.len(),
        ..EmailStats::default()
    };

    for status in EmailStatus::ALL {
        stats.by_status.insert(status.as_str().to_string(), 0);
    }

    for email in state.emails.values() {
        *stats
            .by_status
            .entry(email.status.as_str().to_string())
            .or_default() += 1;
        let category = email
            .category
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| "uncategorized".to_string());
        *stats.by_category.entry(category).or_default() += 1;
        *stats
            .by_priority
            .entry(email.priority.as_str().to_string())
            .or_default() += 1;
    }

    stats
}
