//! 週期性任務排程：依 cron 表示式把任務送進佇列。

use crate::config::toml_config::ScheduleConfig;
use crate::core::tasks::{Task, TaskQueue};
use crate::utils::error::{Result, SupportError};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

pub struct ScheduledJob {
    pub name: String,
    schedule: Schedule,
    task: Task,
}

impl ScheduledJob {
    pub fn new(name: &str, expr: &str, task: Task) -> Result<Self> {
        let schedule = Schedule::from_str(expr).map_err(|e| SupportError::InvalidConfigValueError {
            field: format!("schedule.{}", name),
            value: expr.to_string(),
            reason: format!("Invalid cron expression: {}", e),
        })?;
        Ok(Self {
            name: name.to_string(),
            schedule,
            task,
        })
    }

    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }
}

pub struct CronScheduler {
    jobs: Vec<ScheduledJob>,
}

impl CronScheduler {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self {
            jobs: vec![
                ScheduledJob::new("fetch_emails", &config.fetch_emails, Task::FetchEmails)?,
                ScheduledJob::new(
                    "daily_metrics",
                    &config.daily_metrics,
                    Task::DailyMetrics { date: None },
                )?,
                ScheduledJob::new("cleanup_logs", &config.cleanup_logs, Task::CleanupLogs)?,
            ],
        })
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// 最早到期的時間與該時間要執行的任務
    pub fn next_due(&self, after: &DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<Task>)> {
        let upcoming: Vec<(DateTime<Utc>, &ScheduledJob)> = self
            .jobs
            .iter()
            .filter_map(|job| job.next_after(after).map(|at| (at, job)))
            .collect();

        let earliest = upcoming.iter().map(|(at, _)| *at).min()?;
        let tasks = upcoming
            .into_iter()
            .filter(|(at, _)| *at == earliest)
            .map(|(_, job)| job.task.clone())
            .collect();
        Some((earliest, tasks))
    }

    pub async fn run(self, queue: TaskQueue, cancel: CancellationToken) {
        for job in &self.jobs {
            if let Some(next) = job.next_after(&Utc::now()) {
                tracing::info!("Scheduled {} next at {}", job.name, next);
            }
        }

        let mut cursor = Utc::now();
        loop {
            let Some((due, tasks)) = self.next_due(&cursor) else {
                tracing::warn!("No further scheduled runs");
                break;
            };

            let wait = (due - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            for task in tasks {
                tracing::info!("Scheduler queued {}", task.name());
                if let Err(e) = queue.enqueue(task) {
                    tracing::error!("Scheduler could not queue task: {}", e);
                }
            }
            cursor = due;
        }

        tracing::info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_schedule_next_runs() {
        let scheduler = CronScheduler::from_config(&ScheduleConfig::default()).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 3, 8, 23, 59, 30).unwrap();

        let (due, tasks) = scheduler.next_due(&after).unwrap();
        assert_eq!(due, Utc.with_ymd_and_hms(2025, 3, 9, 0, 0, 0).unwrap());
        assert_eq!(tasks, vec![Task::FetchEmails]);

        let daily = &scheduler.jobs()[1];
        assert_eq!(
            daily.next_after(&after),
            Some(Utc.with_ymd_and_hms(2025, 3, 9, 0, 5, 0).unwrap())
        );

        // 2025-03-09 是週日
        let cleanup = &scheduler.jobs()[2];
        assert_eq!(
            cleanup.next_after(&after),
            Some(Utc.with_ymd_and_hms(2025, 3, 9, 2, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_jobs_due_together_fire_together() {
        let config = ScheduleConfig {
            enabled: true,
            fetch_emails: "0 0 * * * *".to_string(),
            daily_metrics: "0 0 0 * * *".to_string(),
            cleanup_logs: "0 30 3 * * *".to_string(),
        };
        let scheduler = CronScheduler::from_config(&config).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 3, 8, 23, 10, 0).unwrap();

        let (_, tasks) = scheduler.next_due(&after).unwrap();
        assert_eq!(tasks, vec![Task::FetchEmails, Task::DailyMetrics { date: None }]);
    }

    #[test]
    fn test_invalid_expression_names_field() {
        let config = ScheduleConfig {
            fetch_emails: "every minute".to_string(),
            ..ScheduleConfig::default()
        };
        let err = CronScheduler::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("schedule.fetch_emails"));
    }
}
