//! 背景任務：定義、執行、重試與 mpsc 工作佇列。

use crate::core::analytics::AnalyticsService;
use crate::core::ingest::MailIngestor;
use crate::core::notify::Outbox;
use crate::core::processor::EmailProcessor;
use crate::domain::ports::Storage;
use crate::utils::error::{Result, SupportError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    FetchEmails,
    ProcessEmail { email_id: u64 },
    BulkProcess { email_ids: Vec<u64> },
    EscalationNotification { email_id: u64 },
    CleanupLogs,
    DailyMetrics { date: Option<NaiveDate> },
    CategoryMetrics { date: NaiveDate },
    AgentPerformance { date: NaiveDate },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchEmails => "fetch_emails",
            Self::ProcessEmail { .. } => "process_email",
            Self::BulkProcess { .. } => "bulk_process_emails",
            Self::EscalationNotification { .. } => "send_escalation_notification",
            Self::CleanupLogs => "cleanup_old_logs",
            Self::DailyMetrics { .. } => "generate_daily_metrics",
            Self::CategoryMetrics { .. } => "generate_category_metrics",
            Self::AgentPerformance { .. } => "generate_agent_performance",
        }
    }

    /// 只有抓信與處理郵件會重試
    pub fn retries(&self) -> bool {
        matches!(self, Self::FetchEmails | Self::ProcessEmail { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task: String,
    pub success: bool,
    /// 已執行次數（含本次）
    pub attempts: u32,
    pub retry_scheduled: bool,
    #[serde(default)]
    pub details: Value,
    pub error: Option<String>,
}

impl TaskReport {
    /// 失敗且不會再重試
    pub fn is_terminal_failure(&self) -> bool {
        !self.success && !self.retry_scheduled
    }
}

/// 有任一任務最終失敗時回傳錯誤，供 CLI 決定結束碼
pub fn ensure_completed(reports: &[TaskReport]) -> Result<()> {
    let failed: Vec<String> = reports
        .iter()
        .filter(|r| r.is_terminal_failure())
        .map(|r| {
            format!(
                "{} ({})",
                r.task,
                r.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();

    if failed.is_empty() {
        Ok(())
    } else {
        Err(SupportError::TaskError {
            message: failed.join(", "),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// 第 `retries` 次重試前的等待時間：base · 2^retries
    pub fn delay_for(&self, retries: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retries.min(16)))
    }

    fn should_retry(&self, task: &Task, retries: u32, err: &SupportError) -> bool {
        task.retries() && err.is_retryable() && retries < self.max_retries
    }
}

/// 執行單一任務並回傳結果與後續任務
pub struct TaskRunner<S: Storage> {
    ingestor: Arc<MailIngestor<S>>,
    processor: Arc<EmailProcessor<S>>,
    outbox: Arc<Outbox<S>>,
    analytics: Arc<AnalyticsService<S>>,
}

impl<S: Storage> TaskRunner<S> {
    pub fn new(
        ingestor: Arc<MailIngestor<S>>,
        processor: Arc<EmailProcessor<S>>,
        outbox: Arc<Outbox<S>>,
        analytics: Arc<AnalyticsService<S>>,
    ) -> Self {
        Self {
            ingestor,
            processor,
            outbox,
            analytics,
        }
    }

    pub async fn execute(&self, task: &Task) -> Result<(Value, Vec<Task>)> {
        tracing::debug!("Executing task {}", task.name());

        match task {
            Task::FetchEmails => {
                let ids = self.ingestor.fetch_new_emails().await?;
                let details = json!({
                    "emails_fetched": ids.len(),
                    "email_ids": ids,
                    "message": format!("Successfully fetched {} emails", ids.len()),
                });
                let follow_ups = ids
                    .into_iter()
                    .map(|email_id| Task::ProcessEmail { email_id })
                    .collect();
                Ok((details, follow_ups))
            }
            Task::ProcessEmail { email_id } => {
                let outcome = self.processor.process_email(*email_id).await?;
                let follow_ups = if outcome.requires_escalation {
                    vec![Task::EscalationNotification {
                        email_id: *email_id,
                    }]
                } else {
                    Vec::new()
                };
                Ok((serde_json::to_value(&outcome)?, follow_ups))
            }
            Task::BulkProcess { email_ids } => {
                let follow_ups = email_ids
                    .iter()
                    .map(|&email_id| Task::ProcessEmail { email_id })
                    .collect();
                Ok((json!({ "queued": email_ids.len() }), follow_ups))
            }
            Task::EscalationNotification { email_id } => {
                let notified = self.outbox.notify_escalation(*email_id).await?;
                Ok((json!({ "email_id": email_id, "notified": notified }), Vec::new()))
            }
            Task::CleanupLogs => {
                let deleted = self.analytics.cleanup_old_logs().await?;
                Ok((json!({ "deleted_count": deleted }), Vec::new()))
            }
            Task::DailyMetrics { date } => {
                let date = date.unwrap_or_else(AnalyticsService::<S>::yesterday);
                let metrics = self.analytics.generate_daily_metrics(date).await?;
                let details = json!({
                    "date": date.to_string(),
                    "metrics": {
                        "total_received": metrics.total_emails_received,
                        "ai_approved": metrics.ai_approved_replies,
                        "time_saved_hours": (metrics.estimated_time_saved_hours * 100.0).round() / 100.0,
                    }
                });
                Ok((details, Vec::new()))
            }
            Task::CategoryMetrics { date } => {
                let count = self.analytics.generate_category_metrics(*date).await?;
                Ok((json!({ "date": date.to_string(), "categories": count }), Vec::new()))
            }
            Task::AgentPerformance { date } => {
                let count = self.analytics.generate_agent_performance(*date).await?;
                Ok((json!({ "date": date.to_string(), "agents": count }), Vec::new()))
            }
        }
    }

    /// 在目前的 task 中執行任務與其後續任務，重試時直接等待
    pub async fn run_inline(&self, task: Task, policy: &RetryPolicy) -> Vec<TaskReport> {
        let mut queue: VecDeque<Job> = VecDeque::from([Job::new(task)]);
        let mut reports = Vec::new();

        while let Some(job) = queue.pop_front() {
            match self.execute(&job.task).await {
                Ok((details, follow_ups)) => {
                    reports.push(job.succeeded(details));
                    queue.extend(follow_ups.into_iter().map(Job::new));
                }
                Err(e) if policy.should_retry(&job.task, job.retries, &e) => {
                    let delay = policy.delay_for(job.retries);
                    tracing::warn!(
                        "Task {} failed ({}), retrying in {:?}",
                        job.task.name(),
                        e,
                        delay
                    );
                    reports.push(job.failed(&e, true));
                    tokio::time::sleep(delay).await;
                    queue.push_front(job.retry());
                }
                Err(e) => {
                    tracing::error!("Task {} failed: {}", job.task.name(), e);
                    reports.push(job.failed(&e, false));
                }
            }
        }

        reports
    }
}

#[derive(Debug, Clone)]
struct Job {
    task: Task,
    retries: u32,
}

impl Job {
    fn new(task: Task) -> Self {
        Self { task, retries: 0 }
    }

    fn retry(self) -> Self {
        Self {
            task: self.task,
            retries: self.retries + 1,
        }
    }

    fn succeeded(&self, details: Value) -> TaskReport {
        TaskReport {
            task: self.task.name().to_string(),
            success: true,
            attempts: self.retries + 1,
            retry_scheduled: false,
            details,
            error: None,
        }
    }

    fn failed(&self, err: &SupportError, retry_scheduled: bool) -> TaskReport {
        TaskReport {
            task: self.task.name().to_string(),
            success: false,
            attempts: self.retries + 1,
            retry_scheduled,
            details: serde_json::to_value(&self.task).unwrap_or(Value::Null),
            error: Some(err.to_string()),
        }
    }
}

/// 任務佇列的傳送端
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl TaskQueue {
    pub fn enqueue(&self, task: Task) -> Result<()> {
        tracing::debug!("Queued task {}", task.name());
        self.tx
            .send(Job::new(task))
            .map_err(|_| SupportError::TaskError {
                message: "task queue is closed".to_string(),
            })
    }
}

pub struct TaskWorker<S: Storage> {
    runner: Arc<TaskRunner<S>>,
    policy: RetryPolicy,
    tx: mpsc::UnboundedSender<Job>,
    rx: mpsc::UnboundedReceiver<Job>,
    reports: Option<mpsc::UnboundedSender<TaskReport>>,
}

pub fn task_channel<S: Storage + 'static>(
    runner: Arc<TaskRunner<S>>,
    policy: RetryPolicy,
) -> (TaskQueue, TaskWorker<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        TaskQueue { tx: tx.clone() },
        TaskWorker {
            runner,
            policy,
            tx,
            rx,
            reports: None,
        },
    )
}

impl<S: Storage + 'static> TaskWorker<S> {
    /// 每個任務完成後送出報告
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<TaskReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// 依序執行佇列中的任務直到取消
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Task worker started");

        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let report = self.handle(job, &cancel).await;
            if let Some(reports) = &self.reports {
                let _ = reports.send(report);
            }
        }

        tracing::info!("Task worker stopped");
    }

    async fn handle(&self, job: Job, cancel: &CancellationToken) -> TaskReport {
        match self.runner.execute(&job.task).await {
            Ok((details, follow_ups)) => {
                for task in follow_ups {
                    if self.tx.send(Job::new(task)).is_err() {
                        tracing::warn!("Task queue closed, dropping follow-up task");
                    }
                }
                job.succeeded(details)
            }
            Err(e) if self.policy.should_retry(&job.task, job.retries, &e) => {
                let delay = self.policy.delay_for(job.retries);
                tracing::warn!(
                    "Task {} failed ({}), retrying in {:?}",
                    job.task.name(),
                    e,
                    delay
                );
                let report = job.failed(&e, true);

                let tx = self.tx.clone();
                let cancel = cancel.clone();
                let next = job.retry();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            let _ = tx.send(next);
                        }
                    }
                });
                report
            }
            Err(e) => {
                tracing::error!("Task {} failed: {}", job.task.name(), e);
                job.failed(&e, false)
            }
        }
    }
}
