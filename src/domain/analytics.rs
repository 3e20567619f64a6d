use crate::domain::model::CategoryName;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 每日彙總指標
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub date: NaiveDate,

    pub total_emails_received: u32,
    pub total_emails_processed: u32,
    pub total_emails_replied: u32,

    pub ai_suggested_replies: u32,
    pub ai_approved_replies: u32,
    pub ai_modified_replies: u32,
    pub ai_rejected_replies: u32,

    /// 小時
    pub avg_response_time: Option<f64>,
    pub median_response_time: Option<f64>,

    pub total_escalations: u32,

    pub estimated_time_saved_hours: f64,
    pub estimated_cost_saved: f64,
}

impl DailyMetrics {
    pub fn ai_approval_rate(&self) -> f64 {
        if self.ai_suggested_replies == 0 {
            return 0.0;
        }
        self.ai_approved_replies as f64 / self.ai_suggested_replies as f64 * 100.0
    }

    pub fn automation_rate(&self) -> f64 {
        if self.total_emails_processed == 0 {
            return 0.0;
        }
        self.ai_approved_replies as f64 / self.total_emails_processed as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMetrics {
    pub date: NaiveDate,
    pub category: CategoryName,
    pub email_count: u32,
    pub avg_response_time: Option<f64>,
    pub ai_success_rate: f64,
    pub escalation_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub agent_id: u64,
    pub date: NaiveDate,
    pub emails_handled: u32,
    pub ai_replies_approved: u32,
    pub ai_replies_modified: u32,
    pub ai_replies_rejected: u32,
    pub manual_replies: u32,
    /// 分鐘
    pub avg_review_time: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusOverview {
    pub total_emails: usize,
    pub new: usize,
    pub processing: usize,
    pub replied: usize,
    pub escalated: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiPerformance {
    pub total_suggestions: usize,
    pub approved: usize,
    pub modified: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    /// 未分類的郵件為 None
    pub category: Option<CategoryName>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub total_emails_received: u32,
    pub total_emails_replied: u32,
    pub ai_approved_replies: u32,
    pub automation_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub period_days: u32,
    pub overview: StatusOverview,
    pub ai_performance: AiPerformance,
    pub average_response_hours: Option<f64>,
    pub categories: Vec<CategoryCount>,
    pub daily_trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSavings {
    pub period_days: u32,
    pub total_hours_saved: f64,
    pub total_cost_saved: f64,
    pub average_per_day: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(suggested: u32, approved: u32, processed: u32) -> DailyMetrics {
        DailyMetrics {
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            total_emails_received: processed,
            total_emails_processed: processed,
            total_emails_replied: 0,
            ai_suggested_replies: suggested,
            ai_approved_replies: approved,
            ai_modified_replies: 0,
            ai_rejected_replies: 0,
            avg_response_time: None,
            median_response_time: None,
            total_escalations: 0,
            estimated_time_saved_hours: 0.0,
            estimated_cost_saved: 0.0,
        }
    }

    #[test]
    fn test_rates_with_zero_denominators() {
        let m = metrics(0, 0, 0);
        assert_eq!(m.ai_approval_rate(), 0.0);
        assert_eq!(m.automation_rate(), 0.0);
    }

    #[test]
    fn test_rates() {
        let m = metrics(4, 3, 6);
        assert_eq!(m.ai_approval_rate(), 75.0);
        assert_eq!(m.automation_rate(), 50.0);
    }
}
