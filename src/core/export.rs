//! 指標匯出：CSV、TSV 與儀表板 JSON 打包成 ZIP。

use crate::core::analytics::compute_dashboard;
use crate::core::store::SupportStore;
use crate::domain::analytics::{DailyMetrics, DashboardStats};
use crate::domain::ports::Storage;
use crate::utils::error::{Result, SupportError};
use chrono::{Duration, NaiveDate, Utc};
use std::io::Write;
use std::sync::Arc;
use zip::write::{FileOptions, ZipWriter};

const HEADER: [&str; 16] = [
    "date",
    "total_emails_received",
    "total_emails_processed",
    "total_emails_replied",
    "ai_suggested_replies",
    "ai_approved_replies",
    "ai_modified_replies",
    "ai_rejected_replies",
    "ai_approval_rate",
    "automation_rate",
    "avg_response_time",
    "median_response_time",
    "total_escalations",
    "estimated_time_saved_hours",
    "estimated_cost_saved",
    "category_rows",
];

pub struct MetricsExporter<S: Storage> {
    store: Arc<SupportStore<S>>,
}

impl<S: Storage> MetricsExporter<S> {
    pub fn new(store: Arc<SupportStore<S>>) -> Self {
        Self { store }
    }

    /// 匯出最近 `days` 天的指標，回傳寫入的檔名
    pub async fn export(&self, days: u32) -> Result<String> {
        let today = Utc::now().date_naive();
        self.export_as_of(days, today).await
    }

    pub async fn export_as_of(&self, days: u32, today: NaiveDate) -> Result<String> {
        let start = today - Duration::days(days as i64);

        let (rows, dashboard) = self
            .store
            .read(|s| {
                let mut rows: Vec<(DailyMetrics, usize)> = s
                    .daily_metrics
                    .iter()
                    .filter(|m| m.date >= start)
                    .map(|m| {
                        let category_rows = s
                            .category_metrics
                            .iter()
                            .filter(|c| c.date == m.date)
                            .count();
                        (m.clone(), category_rows)
                    })
                    .collect();
                rows.sort_by_key(|(m, _)| m.date);
                (rows, compute_dashboard(s, days, today))
            })
            .await;

        let file_name = format!("metrics_export_{}.zip", today.format("%Y%m%d"));
        tracing::debug!("Creating ZIP file with {} daily rows", rows.len());

        let zip_data = build_archive(&rows, &dashboard)?;

        tracing::debug!("Writing ZIP file ({} bytes) to storage", zip_data.len());
        self.store.storage().write_file(&file_name, &zip_data).await?;

        tracing::info!("Exported metrics to {}", file_name);
        Ok(file_name)
    }
}

fn build_archive(rows: &[(DailyMetrics, usize)], dashboard: &DashboardStats) -> Result<Vec<u8>> {
    let csv_output = render_table(rows, b',')?;
    let tsv_output = render_table(rows, b'\t')?;
    let dashboard_json = serde_json::to_string_pretty(dashboard)?;

    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));

    zip.start_file::<_, ()>("daily_metrics.csv", FileOptions::default())?;
    zip.write_all(&csv_output)?;

    zip.start_file::<_, ()>("daily_metrics.tsv", FileOptions::default())?;
    zip.write_all(&tsv_output)?;

    zip.start_file::<_, ()>("dashboard.json", FileOptions::default())?;
    zip.write_all(dashboard_json.as_bytes())?;

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

fn render_table(rows: &[(DailyMetrics, usize)], delimiter: u8) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());

    writer.write_record(HEADER)?;

    let optional = |value: Option<f64>| value.map(|v| format!("{:.2}", v)).unwrap_or_default();

    for (m, category_rows) in rows {
        writer.write_record([
            m.date.to_string(),
            m.total_emails_received.to_string(),
            m.total_emails_processed.to_string(),
            m.total_emails_replied.to_string(),
            m.ai_suggested_replies.to_string(),
            m.ai_approved_replies.to_string(),
            m.ai_modified_replies.to_string(),
            m.ai_rejected_replies.to_string(),
            format!("{:.2}", m.ai_approval_rate()),
            format!("{:.2}", m.automation_rate()),
            optional(m.avg_response_time),
            optional(m.median_response_time),
            m.total_escalations.to_string(),
            format!("{:.2}", m.estimated_time_saved_hours),
            format!("{:.2}", m.estimated_cost_saved),
            category_rows.to_string(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| SupportError::IoError(e.into_error()))
}
