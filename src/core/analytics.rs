//! 每日、分類與客服人員指標，以及儀表板與節省成本統計。

use crate::core::store::{StoreState, SupportStore};
use crate::domain::analytics::{
    AgentPerformance, AiPerformance, CategoryCount, CategoryMetrics, CostSavings, DailyMetrics,
    DashboardStats, StatusOverview, TrendPoint,
};
use crate::domain::model::{
    CategoryName, EmailReply, EmailStatus, ReplySource, ReplyStatus,
};
use crate::domain::ports::Storage;
use crate::utils::error::Result;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AnalyticsSettings {
    pub minutes_per_email: f64,
    pub hourly_rate: f64,
    pub log_retention_days: i64,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            minutes_per_email: 10.0,
            hourly_rate: 30.0,
            log_retention_days: 90,
        }
    }
}

pub struct AnalyticsService<S: Storage> {
    store: Arc<SupportStore<S>>,
    settings: AnalyticsSettings,
}

impl<S: Storage> AnalyticsService<S> {
    pub fn new(store: Arc<SupportStore<S>>, settings: AnalyticsSettings) -> Self {
        Self { store, settings }
    }

    pub fn yesterday() -> NaiveDate {
        Utc::now().date_naive() - Duration::days(1)
    }

    /// 產生指定日期的每日指標，並接著更新分類與客服人員指標
    pub async fn generate_daily_metrics(&self, date: NaiveDate) -> Result<DailyMetrics> {
        tracing::info!("Generating metrics for {}", date);

        let metrics = self
            .store
            .write(|s| {
                let metrics = compute_daily_metrics(s, date, &self.settings);
                let created = s.upsert_daily_metrics(metrics.clone());
                tracing::info!(
                    "{} metrics for {}",
                    if created { "Created" } else { "Updated" },
                    date
                );
                Ok(metrics)
            })
            .await?;

        self.generate_category_metrics(date).await?;
        self.generate_agent_performance(date).await?;
        Ok(metrics)
    }

    /// 回傳產生的分類數
    pub async fn generate_category_metrics(&self, date: NaiveDate) -> Result<usize> {
        let count = self
            .store
            .write(|s| {
                let rows = compute_category_metrics(s, date);
                let count = rows.len();
                for row in rows {
                    s.upsert_category_metrics(row);
                }
                Ok(count)
            })
            .await?;
        tracing::info!("Generated category metrics for {} ({} categories)", date, count);
        Ok(count)
    }

    /// 回傳產生的客服人員數
    pub async fn generate_agent_performance(&self, date: NaiveDate) -> Result<usize> {
        let count = self
            .store
            .write(|s| {
                let rows = compute_agent_performance(s, date);
                let count = rows.len();
                for row in rows {
                    s.upsert_agent_performance(row);
                }
                Ok(count)
            })
            .await?;
        tracing::info!("Generated agent performance metrics for {} ({} agents)", date, count);
        Ok(count)
    }

    pub async fn dashboard(&self, days: u32) -> DashboardStats {
        let today = Utc::now().date_naive();
        self.store.read(|s| compute_dashboard(s, days, today)).await
    }

    pub async fn cost_savings(&self, days: u32) -> CostSavings {
        let today = Utc::now().date_naive();
        self.store.read(|s| compute_cost_savings(s, days, today)).await
    }

    /// 刪除超過保存期限的處理紀錄
    pub async fn cleanup_old_logs(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(self.settings.log_retention_days);
        let deleted = self
            .store
            .write(|s| Ok(s.remove_logs_before(cutoff)))
            .await?;
        tracing::info!("Cleaned up {} old processing logs", deleted);
        Ok(deleted)
    }
}

fn is_ai_approved(reply: &EmailReply) -> bool {
    reply.source == ReplySource::Ai
        && matches!(reply.status, ReplyStatus::Approved | ReplyStatus::Sent)
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn compute_daily_metrics(
    state: &StoreState,
    date: NaiveDate,
    settings: &AnalyticsSettings,
) -> DailyMetrics {
    let emails: Vec<_> = state
        .emails
        .values()
        .filter(|e| e.received_at.date_naive() == date)
        .collect();
    let replies: Vec<_> = state
        .replies
        .values()
        .filter(|r| r.created_at.date_naive() == date)
        .collect();

    let response_times: Vec<f64> = emails
        .iter()
        .filter_map(|e| e.response_time_hours())
        .collect();

    let ai_approved = replies.iter().filter(|r| is_ai_approved(r)).count() as u32;
    let time_saved_hours = ai_approved as f64 * settings.minutes_per_email / 60.0;

    DailyMetrics {
        date,
        total_emails_received: emails.len() as u32,
        total_emails_processed: emails.iter().filter(|e| e.processed_at.is_some()).count() as u32,
        total_emails_replied: emails
            .iter()
            .filter(|e| e.status == EmailStatus::Replied)
            .count() as u32,
        ai_suggested_replies: replies
            .iter()
            .filter(|r| r.source == ReplySource::Ai)
            .count() as u32,
        ai_approved_replies: ai_approved,
        ai_modified_replies: replies
            .iter()
            .filter(|r| r.source == ReplySource::AiModified)
            .count() as u32,
        ai_rejected_replies: replies
            .iter()
            .filter(|r| r.source == ReplySource::Ai && r.status == ReplyStatus::Rejected)
            .count() as u32,
        avg_response_time: mean(&response_times),
        median_response_time: median(&response_times),
        total_escalations: emails.iter().filter(|e| e.requires_escalation).count() as u32,
        estimated_time_saved_hours: time_saved_hours,
        estimated_cost_saved: round_cents(time_saved_hours * settings.hourly_rate),
    }
}

/// 當天沒有郵件的分類不列出
pub fn compute_category_metrics(state: &StoreState, date: NaiveDate) -> Vec<CategoryMetrics> {
    let mut rows = Vec::new();

    for category in state.category_names() {
        let emails: Vec<_> = state
            .emails
            .values()
            .filter(|e| e.received_at.date_naive() == date && e.category == Some(category))
            .collect();
        if emails.is_empty() {
            continue;
        }

        let response_times: Vec<f64> = emails
            .iter()
            .filter_map(|e| e.response_time_hours())
            .collect();

        let ai_replies: Vec<_> = state
            .replies
            .values()
            .filter(|r| r.source == ReplySource::Ai)
            .filter(|r| emails.iter().any(|e| e.id == r.email_id))
            .collect();
        let approved = ai_replies.iter().filter(|r| is_ai_approved(r)).count();
        let ai_success_rate = if ai_replies.is_empty() {
            0.0
        } else {
            approved as f64 / ai_replies.len() as f64 * 100.0
        };

        let escalations = emails.iter().filter(|e| e.requires_escalation).count();

        rows.push(CategoryMetrics {
            date,
            category,
            email_count: emails.len() as u32,
            avg_response_time: mean(&response_times),
            ai_success_rate,
            escalation_rate: escalations as f64 / emails.len() as f64 * 100.0,
        });
    }

    rows
}

pub fn compute_agent_performance(state: &StoreState, date: NaiveDate) -> Vec<AgentPerformance> {
    state
        .active_staff()
        .into_iter()
        .map(|agent| {
            let emails_handled = state
                .emails
                .values()
                .filter(|e| e.assigned_to == Some(agent.id))
                .filter(|e| e.assigned_at.map(|t| t.date_naive()) == Some(date))
                .count() as u32;

            let reviewed: Vec<_> = state
                .replies
                .values()
                .filter(|r| r.reviewed_by == Some(agent.id))
                .filter(|r| r.reviewed_at.map(|t| t.date_naive()) == Some(date))
                .collect();

            let review_minutes: Vec<f64> = reviewed
                .iter()
                .filter_map(|r| {
                    r.reviewed_at
                        .map(|t| (t - r.created_at).num_milliseconds() as f64 / 60_000.0)
                })
                .collect();

            let manual_replies = state
                .replies
                .values()
                .filter(|r| r.source == ReplySource::Human)
                .filter(|r| r.created_by == Some(agent.id))
                .filter(|r| r.created_at.date_naive() == date)
                .count() as u32;

            AgentPerformance {
                agent_id: agent.id,
                date,
                emails_handled,
                ai_replies_approved: reviewed.iter().filter(|r| is_ai_approved(r)).count() as u32,
                ai_replies_modified: reviewed
                    .iter()
                    .filter(|r| r.source == ReplySource::AiModified)
                    .count() as u32,
                ai_replies_rejected: reviewed
                    .iter()
                    .filter(|r| r.source == ReplySource::Ai && r.status == ReplyStatus::Rejected)
                    .count() as u32,
                manual_replies,
                avg_review_time: mean(&review_minutes),
            }
        })
        .collect()
}

pub fn compute_dashboard(state: &StoreState, days: u32, today: NaiveDate) -> DashboardStats {
    let start = today - Duration::days(days as i64);

    let emails: Vec<_> = state
        .emails
        .values()
        .filter(|e| e.received_at.date_naive() >= start)
        .collect();
    let replies: Vec<_> = state
        .replies
        .values()
        .filter(|r| r.created_at.date_naive() >= start)
        .collect();

    let count_status = |status: EmailStatus| emails.iter().filter(|e| e.status == status).count();

    let overview = StatusOverview {
        total_emails: emails.len(),
        new: count_status(EmailStatus::New),
        processing: count_status(EmailStatus::Processing),
        replied: count_status(EmailStatus::Replied),
        escalated: count_status(EmailStatus::Escalated),
    };

    let ai_performance = AiPerformance {
        total_suggestions: replies.iter().filter(|r| r.source == ReplySource::Ai).count(),
        approved: replies.iter().filter(|r| is_ai_approved(r)).count(),
        modified: replies
            .iter()
            .filter(|r| r.source == ReplySource::AiModified)
            .count(),
        rejected: replies
            .iter()
            .filter(|r| r.source == ReplySource::Ai && r.status == ReplyStatus::Rejected)
            .count(),
    };

    let response_times: Vec<f64> = emails
        .iter()
        .filter_map(|e| e.response_time_hours())
        .collect();

    let mut by_category: HashMap<Option<CategoryName>, usize> = HashMap::new();
    for email in &emails {
        *by_category.entry(email.category).or_default() += 1;
    }
    let mut categories: Vec<CategoryCount> = by_category
        .into_iter()
        .map(|(category, count)| CategoryCount { category, count })
        .collect();
    categories.sort_by(|a, b| b.count.cmp(&a.count).then(a.category.cmp(&b.category)));

    let mut daily_trend: Vec<TrendPoint> = state
        .daily_metrics
        .iter()
        .filter(|m| m.date >= start)
        .map(|m| TrendPoint {
            date: m.date,
            total_emails_received: m.total_emails_received,
            total_emails_replied: m.total_emails_replied,
            ai_approved_replies: m.ai_approved_replies,
            automation_rate: m.automation_rate(),
        })
        .collect();
    daily_trend.sort_by_key(|p| p.date);

    DashboardStats {
        period_days: days,
        overview,
        ai_performance,
        average_response_hours: mean(&response_times),
        categories,
        daily_trend,
    }
}

/// `average_per_day` 為每日平均節省時數
pub fn compute_cost_savings(state: &StoreState, days: u32, today: NaiveDate) -> CostSavings {
    let start = today - Duration::days(days as i64);
    let window: Vec<_> = state
        .daily_metrics
        .iter()
        .filter(|m| m.date >= start)
        .collect();

    let total_hours: f64 = window.iter().map(|m| m.estimated_time_saved_hours).sum();
    let total_cost: f64 = window.iter().map(|m| m.estimated_cost_saved).sum();

    CostSavings {
        period_days: days,
        total_hours_saved: total_hours,
        total_cost_saved: round_cents(total_cost),
        average_per_day: if days == 0 {
            0.0
        } else {
            total_hours / days as f64
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_support::{incoming, open_store, staff};
    use crate::core::store::StoreSeed;
    use chrono::{DateTime, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    fn reply(email_id: u64, source: ReplySource, status: ReplyStatus, created: DateTime<Utc>) -> EmailReply {
        EmailReply {
            id: 0,
            email_id,
            body: "reply".to_string(),
            source,
            status,
            ai_confidence: None,
            knowledge_articles: vec![],
            created_by: None,
            reviewed_by: None,
            review_notes: String::new(),
            reviewed_at: None,
            sent_at: None,
            created_at: created,
            updated_at: created,
        }
    }

    /// 3 月 10 日：三封信，一封已回覆（2 小時）、一封升級
    fn populated_state() -> StoreState {
        let mut state = StoreState::default();
        state.agents.push(staff(1, "lead@example.com"));

        let a = state
            .insert_email(incoming("<a@x>", "A", at(10, 8)), at(10, 8))
            .unwrap();
        let b = state
            .insert_email(incoming("<b@x>", "B", at(10, 9)), at(10, 9))
            .unwrap();
        let c = state
            .insert_email(incoming("<c@x>", "C", at(10, 10)), at(10, 10))
            .unwrap();
        state
            .insert_email(incoming("<d@x>", "D", at(11, 10)), at(11, 10))
            .unwrap();

        for id in [a, b, c] {
            let email = state.emails.get_mut(&id).unwrap();
            email.processed_at = Some(email.received_at);
            email.category = Some(CategoryName::Billing);
        }
        {
            let email = state.emails.get_mut(&a).unwrap();
            email.status = EmailStatus::Replied;
            email.replied_at = Some(at(10, 10));
            email.assigned_to = Some(1);
            email.assigned_at = Some(at(10, 9));
        }
        state.emails.get_mut(&c).unwrap().requires_escalation = true;

        let mut sent = reply(a, ReplySource::Ai, ReplyStatus::Sent, at(10, 8));
        sent.reviewed_by = Some(1);
        sent.reviewed_at = Some(at(10, 9));
        state.add_reply(sent);

        let mut rejected = reply(b, ReplySource::Ai, ReplyStatus::Rejected, at(10, 9));
        rejected.reviewed_by = Some(1);
        rejected.reviewed_at = Some(at(10, 10));
        state.add_reply(rejected);

        let mut modified = reply(b, ReplySource::AiModified, ReplyStatus::Approved, at(10, 10));
        modified.created_by = Some(1);
        modified.reviewed_by = Some(1);
        modified.reviewed_at = Some(at(10, 10));
        state.add_reply(modified);

        let mut human = reply(c, ReplySource::Human, ReplyStatus::Draft, at(10, 11));
        human.created_by = Some(1);
        state.add_reply(human);

        state
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_daily_metrics_counts() {
        let state = populated_state();
        let metrics = compute_daily_metrics(&state, day(10), &AnalyticsSettings::default());

        assert_eq!(metrics.total_emails_received, 3);
        assert_eq!(metrics.total_emails_processed, 3);
        assert_eq!(metrics.total_emails_replied, 1);
        assert_eq!(metrics.ai_suggested_replies, 2);
        assert_eq!(metrics.ai_approved_replies, 1);
        assert_eq!(metrics.ai_modified_replies, 1);
        assert_eq!(metrics.ai_rejected_replies, 1);
        assert_eq!(metrics.total_escalations, 1);
        assert_eq!(metrics.avg_response_time, Some(2.0));
        assert_eq!(metrics.median_response_time, Some(2.0));
        assert!((metrics.estimated_time_saved_hours - 10.0 / 60.0).abs() < 1e-9);
        assert_eq!(metrics.estimated_cost_saved, 5.0);
    }

    #[test]
    fn test_category_metrics_skip_empty_categories() {
        let state = populated_state();
        let rows = compute_category_metrics(&state, day(10));

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category, CategoryName::Billing);
        assert_eq!(rows[0].email_count, 3);
        assert_eq!(rows[0].ai_success_rate, 50.0);
        assert!((rows[0].escalation_rate - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_agent_performance() {
        let state = populated_state();
        let rows = compute_agent_performance(&state, day(10));

        assert_eq!(rows.len(), 1);
        let perf = &rows[0];
        assert_eq!(perf.emails_handled, 1);
        assert_eq!(perf.ai_replies_approved, 1);
        assert_eq!(perf.ai_replies_modified, 1);
        assert_eq!(perf.ai_replies_rejected, 1);
        assert_eq!(perf.manual_replies, 1);
        // 60 + 60 + 0 分鐘
        assert_eq!(perf.avg_review_time, Some(40.0));
    }

    #[test]
    fn test_dashboard_and_savings() {
        let mut state = populated_state();
        let metrics = compute_daily_metrics(&state, day(10), &AnalyticsSettings::default());
        state.upsert_daily_metrics(metrics);

        let dashboard = compute_dashboard(&state, 7, day(12));
        assert_eq!(dashboard.overview.total_emails, 4);
        assert_eq!(dashboard.overview.new, 3);
        assert_eq!(dashboard.overview.replied, 1);
        assert_eq!(dashboard.ai_performance.total_suggestions, 2);
        assert_eq!(dashboard.categories[0].category, Some(CategoryName::Billing));
        assert_eq!(dashboard.categories[0].count, 3);
        assert_eq!(dashboard.categories[1].category, None);
        assert_eq!(dashboard.average_response_hours, Some(2.0));
        assert_eq!(dashboard.daily_trend.len(), 1);

        let savings = compute_cost_savings(&state, 30, day(12));
        assert_eq!(savings.total_cost_saved, 5.0);
        assert!((savings.average_per_day - (10.0 / 60.0) / 30.0).abs() < 1e-9);

        let outside = compute_cost_savings(&state, 1, day(20));
        assert_eq!(outside.total_cost_saved, 0.0);
    }

    #[test]
    fn test_median_even_count() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[tokio::test]
    async fn test_generate_daily_metrics_upserts_by_date() {
        let (_, store) = open_store(StoreSeed::default()).await;
        let store = Arc::new(store);
        let service = AnalyticsService::new(store.clone(), AnalyticsSettings::default());
        let date = day(10);

        store
            .write(|s| Ok(s.insert_email(incoming("<m@x>", "M", at(10, 8)), at(10, 8))))
            .await
            .unwrap();

        let first = service.generate_daily_metrics(date).await.unwrap();
        assert_eq!(first.total_emails_received, 1);

        store
            .write(|s| Ok(s.insert_email(incoming("<n@x>", "N", at(10, 9)), at(10, 9))))
            .await
            .unwrap();
        let second = service.generate_daily_metrics(date).await.unwrap();
        assert_eq!(second.total_emails_received, 2);

        assert_eq!(store.read(|s| s.daily_metrics.len()).await, 1);
    }
}
