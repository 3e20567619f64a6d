//! 單封郵件的 AI 處理流程：分類、草擬回覆、自動寄送或升級。

use crate::core::notify::Outbox;
use crate::core::store::SupportStore;
use crate::domain::model::{
    CategoryName, EmailReply, EmailStatus, LogStatus, ReplySource, ReplyStatus,
};
use crate::domain::ports::{Classification, EmailAgent, ReplyRequest, Storage};
use crate::utils::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct ProcessingSettings {
    pub auto_reply_threshold: f64,
    pub knowledge_base_limit: usize,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            auto_reply_threshold: 0.85,
            knowledge_base_limit: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub email_id: u64,
    pub category: String,
    pub confidence: f64,
    pub requires_escalation: bool,
    pub reply_id: Option<u64>,
    pub auto_sent: bool,
}

pub struct EmailProcessor<S: Storage> {
    store: Arc<SupportStore<S>>,
    agent: Arc<dyn EmailAgent>,
    outbox: Arc<Outbox<S>>,
    settings: ProcessingSettings,
}

impl<S: Storage> EmailProcessor<S> {
    pub fn new(
        store: Arc<SupportStore<S>>,
        agent: Arc<dyn EmailAgent>,
        outbox: Arc<Outbox<S>>,
        settings: ProcessingSettings,
    ) -> Self {
        Self {
            store,
            agent,
            outbox,
            settings,
        }
    }

    /// 處理一封郵件；失敗時記錄稽核、狀態重設為 new 並回傳錯誤
    pub async fn process_email(&self, email_id: u64) -> Result<ProcessOutcome> {
        let subject = self
            .store
            .read(|s| s.email(email_id).map(|e| e.short_subject()))
            .await?;
        tracing::info!("Processing email {}: {}", email_id, subject);

        match self.run(email_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!("Error processing email {}: {}", email_id, e);
                let message = e.to_string();
                let reset = self
                    .store
                    .write(|s| {
                        s.add_log(email_id, "processing", LogStatus::Failed, json!({}))
                            .error_message = message;
                        s.email_mut(email_id)?.status = EmailStatus::New;
                        Ok(())
                    })
                    .await;
                if let Err(reset_err) = reset {
                    tracing::warn!("Could not record processing failure: {}", reset_err);
                }
                Err(e)
            }
        }
    }

    async fn run(&self, email_id: u64) -> Result<ProcessOutcome> {
        let started = Instant::now();

        let (subject, body, categories) = self
            .store
            .write(|s| {
                let categories = s.category_names();
                let email = s.email_mut(email_id)?;
                email.status = EmailStatus::Processing;
                let snapshot = (email.subject.clone(), email.body.clone(), categories);
                s.add_log(
                    email_id,
                    "classification",
                    LogStatus::Started,
                    json!({ "started_at": Utc::now().to_rfc3339() }),
                );
                Ok(snapshot)
            })
            .await?;

        let mut classification = self.agent.classify(&subject, &body, &categories).await?;
        classification.confidence = classification.confidence.clamp(0.0, 1.0);
        let category = self.apply_classification(email_id, &classification, started).await?;

        tracing::info!(
            "Email classified as: {} (confidence: {})",
            classification.category,
            classification.confidence
        );

        let mut outcome = ProcessOutcome {
            email_id,
            category: classification.category.clone(),
            confidence: classification.confidence,
            requires_escalation: classification.requires_escalation,
            reply_id: None,
            auto_sent: false,
        };

        if classification.requires_escalation {
            self.store
                .write(|s| {
                    s.email_mut(email_id)?.status = EmailStatus::Escalated;
                    Ok(())
                })
                .await?;
            tracing::info!("Email escalated: {}", subject.chars().take(50).collect::<String>());
            return Ok(outcome);
        }

        let (reply_id, auto_send) = self
            .draft_reply(email_id, &classification, category, &subject, &body)
            .await?;
        outcome.reply_id = Some(reply_id);

        if auto_send {
            outcome.auto_sent = self.auto_send(email_id, reply_id).await?;
        } else {
            self.store
                .write(|s| {
                    s.email_mut(email_id)?.status = EmailStatus::PendingReview;
                    Ok(())
                })
                .await?;
            tracing::info!("Email {} marked for review", email_id);
        }

        Ok(outcome)
    }

    async fn apply_classification(
        &self,
        email_id: u64,
        classification: &Classification,
        started: Instant,
    ) -> Result<Option<CategoryName>> {
        let details = serde_json::to_value(classification)?;
        let elapsed = started.elapsed().as_secs_f64();

        self.store
            .write(|s| {
                let category = classification
                    .category_name()
                    .filter(|name| s.category(*name).is_some());

                let email = s.email_mut(email_id)?;
                email.category = category;
                email.priority = classification.priority;
                email.ai_sentiment = Some(classification.sentiment);
                email.ai_classification_confidence = Some(classification.confidence);
                email.requires_escalation = classification.requires_escalation;
                email.escalation_reason = classification.escalation_reason.clone();
                email.ai_extracted_info = classification.extracted_info.clone();
                email.processed_at = Some(Utc::now());

                s.add_log(email_id, "classification", LogStatus::Completed, details)
                    .processing_time_secs = Some(elapsed);
                Ok(category)
            })
            .await
    }

    /// 回傳 (回覆 id, 是否符合自動寄送條件)
    async fn draft_reply(
        &self,
        email_id: u64,
        classification: &Classification,
        category: Option<CategoryName>,
        subject: &str,
        body: &str,
    ) -> Result<(u64, bool)> {
        let started = Instant::now();
        let limit = self.settings.knowledge_base_limit;

        let (articles, from_name) = self
            .store
            .write(|s| {
                s.add_log(
                    email_id,
                    "reply_generation",
                    LogStatus::Started,
                    json!({ "started_at": Utc::now().to_rfc3339() }),
                );
                let articles = category
                    .map(|c| s.top_articles(c, limit))
                    .unwrap_or_default();
                Ok((articles, s.email(email_id)?.from_name.clone()))
            })
            .await?;

        let extracted_name = classification.extracted_info.customer_name.trim();
        let customer_name = if !extracted_name.is_empty() {
            Some(extracted_name.to_string())
        } else if !from_name.trim().is_empty() {
            Some(from_name.trim().to_string())
        } else {
            None
        };

        let article_ids: Vec<u64> = articles.iter().map(|a| a.id).collect();
        let draft = self
            .agent
            .generate_reply(ReplyRequest {
                subject: subject.to_string(),
                body: body.to_string(),
                category: classification.category.clone(),
                customer_name,
                articles,
            })
            .await?;

        let elapsed = started.elapsed().as_secs_f64();
        let now = Utc::now();
        let details = json!({
            "confidence": draft.confidence,
            "requires_review": draft.requires_review,
            "used_articles": draft.used_articles,
        });

        let reply_id = self
            .store
            .write(|s| {
                let reply_id = s.add_reply(EmailReply {
                    id: 0,
                    email_id,
                    body: draft.reply.clone(),
                    source: ReplySource::Ai,
                    status: if draft.requires_review {
                        ReplyStatus::PendingApproval
                    } else {
                        ReplyStatus::Draft
                    },
                    ai_confidence: Some(draft.confidence),
                    knowledge_articles: article_ids.clone(),
                    created_by: None,
                    reviewed_by: None,
                    review_notes: String::new(),
                    reviewed_at: None,
                    sent_at: None,
                    created_at: now,
                    updated_at: now,
                });
                for id in &article_ids {
                    s.article_mut(*id)?.use_count += 1;
                }
                s.add_log(email_id, "reply_generation", LogStatus::Completed, details)
                    .processing_time_secs = Some(elapsed);
                Ok(reply_id)
            })
            .await?;

        tracing::info!("Reply generated with confidence: {}", draft.confidence);

        let auto_send =
            draft.confidence >= self.settings.auto_reply_threshold && !draft.requires_review;
        Ok((reply_id, auto_send))
    }

    /// 寄送失敗不中斷流程，郵件改為待審核
    async fn auto_send(&self, email_id: u64, reply_id: u64) -> Result<bool> {
        self.store
            .write(|s| {
                s.reply_mut(reply_id)?.status = ReplyStatus::Approved;
                Ok(())
            })
            .await?;

        match self.outbox.send_reply(reply_id, &[], &[]).await {
            Ok(()) => {
                tracing::info!("Reply {} auto-sent for email {}", reply_id, email_id);
                self.store
                    .write(|s| {
                        s.add_log(
                            email_id,
                            "auto_send",
                            LogStatus::Completed,
                            json!({ "reply_id": reply_id }),
                        );
                        Ok(())
                    })
                    .await?;
                Ok(true)
            }
            Err(send_err) => {
                tracing::error!("Error auto-sending reply: {}", send_err);
                let message = send_err.to_string();
                self.store
                    .write(|s| {
                        s.add_log(
                            email_id,
                            "auto_send",
                            LogStatus::Failed,
                            json!({ "reply_id": reply_id }),
                        )
                        .error_message = message;
                        s.email_mut(email_id)?.status = EmailStatus::PendingReview;
                        Ok(())
                    })
                    .await?;
                Ok(false)
            }
        }
    }
}

/// 測試用的假 AI 服務
#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::model::{CategoryName, ExtractedInfo, Priority, Sentiment};
    use crate::domain::ports::{
        Classification, EmailAgent, ReplyDraft, ReplyRequest, SentimentReport,
    };
    use crate::utils::error::{Result, SupportError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    pub struct ScriptedAgent {
        pub classification: Classification,
        pub draft: ReplyDraft,
        pub fail_classify: bool,
        pub classify_calls: AtomicUsize,
        pub requests: Mutex<Vec<ReplyRequest>>,
    }

    impl ScriptedAgent {
        pub fn new(category: CategoryName, confidence: f64, requires_review: bool) -> Self {
            Self {
                classification: Classification {
                    category: category.as_str().to_string(),
                    confidence: 0.92,
                    priority: Priority::High,
                    sentiment: Sentiment::Neutral,
                    requires_escalation: false,
                    escalation_reason: String::new(),
                    extracted_info: ExtractedInfo::default(),
                },
                draft: ReplyDraft {
                    reply: "Dear Casey,\n\nThanks for writing in.".to_string(),
                    confidence,
                    requires_review,
                    reasoning: String::new(),
                    used_articles: vec![],
                },
                fail_classify: false,
                classify_calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn escalating(reason: &str) -> Self {
            let mut agent = Self::new(CategoryName::Complaint, 0.9, false);
            agent.classification.requires_escalation = true;
            agent.classification.escalation_reason = reason.to_string();
            agent.classification.sentiment = Sentiment::Negative;
            agent
        }

        pub fn failing() -> Self {
            let mut agent = Self::new(CategoryName::General, 0.9, false);
            agent.fail_classify = true;
            agent
        }
    }

    #[async_trait]
    impl EmailAgent for ScriptedAgent {
        async fn classify(
            &self,
            _subject: &str,
            _body: &str,
            _categories: &[CategoryName],
        ) -> Result<Classification> {
            self.classify_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_classify {
                return Err(SupportError::AiServiceError {
                    message: "upstream unavailable".to_string(),
                });
            }
            Ok(self.classification.clone())
        }

        async fn generate_reply(&self, request: ReplyRequest) -> Result<ReplyDraft> {
            self.requests.lock().await.push(request);
            Ok(self.draft.clone())
        }

        async fn analyze_sentiment(&self, _text: &str) -> SentimentReport {
            SentimentReport::fallback()
        }
    }
}
