use crate::config::toml_config::SupportConfig;
use crate::core::analytics::{AnalyticsService, AnalyticsSettings};
use crate::core::export::MetricsExporter;
use crate::core::ingest::{IngestSettings, MailIngestor};
use crate::core::notify::Outbox;
use crate::core::processor::{EmailProcessor, ProcessOutcome, ProcessingSettings};
use crate::core::review::ReviewDesk;
use crate::core::scheduler::CronScheduler;
use crate::core::store::{StoreSeed, SupportStore};
use crate::core::tasks::{task_channel, RetryPolicy, Task, TaskQueue, TaskReport, TaskRunner};
use crate::domain::ports::{
    ConnectionReport, EmailAgent, MailSender, MailSource, SentimentReport, Storage,
};
use crate::utils::error::Result;
use crate::utils::monitor::ProcessMonitor;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 一次 run-once 的結果統計
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub fetched: usize,
    pub processed: usize,
    pub auto_sent: usize,
    pub pending_review: usize,
    pub escalated: usize,
    pub failed: usize,
}

/// 外部系統的連線實作
pub struct Adapters {
    pub source: Arc<dyn MailSource>,
    pub sender: Arc<dyn MailSender>,
    pub agent: Arc<dyn EmailAgent>,
}

pub struct SupportEngine<S: Storage> {
    config: SupportConfig,
    store: Arc<SupportStore<S>>,
    adapters: Adapters,
    ingestor: Arc<MailIngestor<S>>,
    analytics: Arc<AnalyticsService<S>>,
    review: ReviewDesk<S>,
    exporter: MetricsExporter<S>,
    runner: Arc<TaskRunner<S>>,
    monitor: ProcessMonitor,
}

fn seed_from(config: &SupportConfig) -> StoreSeed {
    StoreSeed {
        categories: config.effective_categories(),
        agents: config.agents.clone(),
        articles: config
            .knowledge_base
            .iter()
            .map(|a| {
                (
                    a.category,
                    a.title.clone(),
                    a.content.clone(),
                    a.keywords.clone(),
                )
            })
            .collect(),
    }
}

impl<S: Storage + 'static> SupportEngine<S> {
    pub async fn new(config: SupportConfig, storage: S, adapters: Adapters) -> Result<Self> {
        let store = Arc::new(SupportStore::open(storage, &seed_from(&config)).await?);

        let outbox = Arc::new(Outbox::new(
            store.clone(),
            adapters.sender.clone(),
            config.notifications.dashboard_url.clone(),
        ));
        let ingestor = Arc::new(MailIngestor::new(
            store.clone(),
            adapters.source.clone(),
            IngestSettings {
                mailbox: config.mailbox.mailbox.clone(),
                fetch_limit: config.mailbox.fetch_limit,
                mark_seen: config.mailbox.mark_seen,
                account: config.mailbox.username.clone(),
            },
        )?);
        let processor = Arc::new(EmailProcessor::new(
            store.clone(),
            adapters.agent.clone(),
            outbox.clone(),
            ProcessingSettings {
                auto_reply_threshold: config.processing.auto_reply_threshold,
                knowledge_base_limit: config.processing.knowledge_base_limit,
            },
        ));
        let analytics = Arc::new(AnalyticsService::new(
            store.clone(),
            AnalyticsSettings {
                minutes_per_email: config.analytics.minutes_per_email,
                hourly_rate: config.analytics.hourly_rate,
                log_retention_days: config.analytics.log_retention_days,
            },
        ));
        let runner = Arc::new(TaskRunner::new(
            ingestor.clone(),
            processor,
            outbox.clone(),
            analytics.clone(),
        ));

        let monitor = ProcessMonitor::new(config.monitoring_enabled());

        Ok(Self {
            review: ReviewDesk::new(store.clone(), outbox),
            exporter: MetricsExporter::new(store.clone()),
            config,
            store,
            adapters,
            ingestor,
            analytics,
            runner,
            monitor,
        })
    }

    pub fn config(&self) -> &SupportConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SupportStore<S>> {
        &self.store
    }

    pub fn review(&self) -> &ReviewDesk<S> {
        &self.review
    }

    pub fn analytics(&self) -> &AnalyticsService<S> {
        &self.analytics
    }

    pub fn exporter(&self) -> &MetricsExporter<S> {
        &self.exporter
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.tasks.max_retries,
            base_delay: Duration::from_secs(self.config.tasks.retry_base_secs),
        }
    }

    pub async fn fetch_new_emails(&self) -> Result<Vec<u64>> {
        self.ingestor.fetch_new_emails().await
    }

    /// 在目前流程中執行任務與所有後續任務
    pub async fn run_task(&self, task: Task) -> Vec<TaskReport> {
        self.runner.run_inline(task, &self.retry_policy()).await
    }

    /// 擷取新郵件後逐封處理
    pub async fn run_once(&self) -> Result<RunSummary> {
        tracing::info!("Starting processing cycle");
        self.monitor.log_phase("Start");

        let ids = self.fetch_new_emails().await?;
        self.monitor.log_phase("Fetch");

        let mut summary = RunSummary {
            fetched: ids.len(),
            ..RunSummary::default()
        };

        let policy = self.retry_policy();
        for email_id in ids {
            let reports = self
                .runner
                .run_inline(Task::ProcessEmail { email_id }, &policy)
                .await;
            tally(&mut summary, &reports);
        }
        self.monitor.log_phase("Process");

        tracing::info!(
            "Cycle complete: {} fetched, {} processed, {} auto-sent, {} escalated, {} failed",
            summary.fetched,
            summary.processed,
            summary.auto_sent,
            summary.escalated,
            summary.failed
        );
        self.monitor.log_summary();
        Ok(summary)
    }

    /// 啟動任務 worker 與排程，直到取消
    pub async fn serve(&self, cancel: CancellationToken) -> Result<()> {
        let scheduler = if self.config.schedule.enabled {
            Some(CronScheduler::from_config(&self.config.schedule)?)
        } else {
            tracing::info!("Scheduler disabled, worker only");
            None
        };

        let (queue, worker) = task_channel(self.runner.clone(), self.retry_policy());
        let worker_handle = tokio::spawn(worker.run(cancel.clone()));
        let scheduler_handle = scheduler
            .map(|scheduler| tokio::spawn(scheduler.run(queue.clone(), cancel.clone())));

        self.prime(&queue);
        tracing::info!("Support agent running");
        cancel.cancelled().await;

        if let Err(e) = worker_handle.await {
            tracing::error!("Task worker ended abnormally: {}", e);
        }
        if let Some(handle) = scheduler_handle {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    fn prime(&self, queue: &TaskQueue) {
        if let Err(e) = queue.enqueue(Task::FetchEmails) {
            tracing::warn!("Could not queue initial fetch: {}", e);
        }
    }

    pub async fn analyze_sentiment(&self, email_id: u64) -> Result<SentimentReport> {
        let text = self
            .store
            .read(|s| {
                s.email(email_id)
                    .map(|e| format!("Subject: {}\n\n{}", e.subject, e.body))
            })
            .await?;
        let report = self.adapters.agent.analyze_sentiment(&text).await;

        self.store
            .write(|s| {
                s.email_mut(email_id)?.ai_sentiment = Some(report.sentiment);
                Ok(())
            })
            .await?;
        Ok(report)
    }

    pub async fn test_connections(&self) -> (ConnectionReport, ConnectionReport) {
        let imap = self.adapters.source.test_connection().await;
        let smtp = self.adapters.sender.test_connection().await;
        (imap, smtp)
    }
}

fn tally(summary: &mut RunSummary, reports: &[TaskReport]) {
    for report in reports {
        match report.task.as_str() {
            "process_email" if report.success => {
                summary.processed += 1;
                if let Ok(outcome) = serde_json::from_value::<ProcessOutcome>(report.details.clone())
                {
                    if outcome.auto_sent {
                        summary.auto_sent += 1;
                    } else if outcome.requires_escalation {
                        summary.escalated += 1;
                    } else {
                        summary.pending_review += 1;
                    }
                }
            }
            "process_email" if !report.retry_scheduled => summary.failed += 1,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ingest::test_support::{raw_message, StaticMailbox};
    use crate::core::notify::test_support::RecordingSender;
    use crate::core::processor::test_support::ScriptedAgent;
    use crate::core::store::test_support::MockStorage;
    use crate::domain::model::{CategoryName, EmailStatus};

    async fn engine(messages: &[&str], agent: ScriptedAgent) -> SupportEngine<MockStorage> {
        let mut config = SupportConfig::default();
        config.mailbox.username = "support@example.com".to_string();
        config.tasks.retry_base_secs = 0;

        SupportEngine::new(
            config,
            MockStorage::new(),
            Adapters {
                source: Arc::new(StaticMailbox::with_messages(messages)),
                sender: Arc::new(RecordingSender::default()),
                agent: Arc::new(agent),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_run_once_summarizes_cycle() {
        let first = raw_message("<1@x>", "Invoice copy");
        let second = raw_message("<2@x>", "Invoice again");
        let engine = engine(
            &[first.as_str(), second.as_str()],
            ScriptedAgent::new(CategoryName::Billing, 0.6, false),
        )
        .await;

        let summary = engine.run_once().await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                fetched: 2,
                processed: 2,
                pending_review: 2,
                ..RunSummary::default()
            }
        );

        let again = engine.run_once().await.unwrap();
        assert_eq!(again.fetched, 0);
    }

    #[tokio::test]
    async fn test_run_once_counts_failures() {
        let message = raw_message("<f@x>", "Help");
        let mut engine = engine(&[message.as_str()], ScriptedAgent::failing()).await;
        engine.config.tasks.max_retries = 0;

        let summary = engine.run_once().await.unwrap();
        assert_eq!(summary.failed, 1);
        let status = engine.store().read(|s| s.email(1).map(|e| e.status)).await.unwrap();
        assert_eq!(status, EmailStatus::New);
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let message = raw_message("<s@x>", "Serve");
        let engine = Arc::new(
            engine(&[message.as_str()], ScriptedAgent::new(CategoryName::General, 0.95, false)).await,
        );
        let cancel = CancellationToken::new();

        let handle = {
            let engine = engine.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.serve(cancel).await })
        };

        for _ in 0..100 {
            let replied = engine
                .store()
                .read(|s| s.emails.values().any(|e| e.status == EmailStatus::Replied))
                .await;
            if replied {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let status = engine.store().read(|s| s.email(1).map(|e| e.status)).await.unwrap();
        assert_eq!(status, EmailStatus::Replied);
    }

    #[tokio::test]
    async fn test_sentiment_is_stored() {
        let message = raw_message("<m@x>", "Mood");
        let engine = engine(&[message.as_str()], ScriptedAgent::new(CategoryName::General, 0.5, false)).await;
        engine.fetch_new_emails().await.unwrap();

        let report = engine.analyze_sentiment(1).await.unwrap();
        let stored = engine.store().read(|s| s.email(1).map(|e| e.ai_sentiment)).await.unwrap();
        assert_eq!(stored, Some(report.sentiment));
        assert!(engine.analyze_sentiment(99).await.is_err());
    }
}
