//! 支援系統狀態：郵件、回覆、稽核紀錄、知識庫與指標。
//!
//! 狀態保存在記憶體中，每次寫入後透過 [`Storage`] 以 JSON 快照持久化。

use crate::domain::analytics::{AgentPerformance, CategoryMetrics, DailyMetrics};
use crate::domain::model::{
    Agent, CategoryName, Email, EmailCategory, EmailReply, IncomingEmail, KnowledgeArticle,
    LogStatus, ProcessingLog,
};
use crate::domain::ports::Storage;
use crate::utils::error::{Result, SupportError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

pub const SNAPSHOT_FILE: &str = "support_state.json";

/// 啟動時由設定檔帶入的資料
#[derive(Debug, Clone, Default)]
pub struct StoreSeed {
    pub categories: Vec<EmailCategory>,
    pub agents: Vec<Agent>,
    pub articles: Vec<(CategoryName, String, String, Vec<String>)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreState {
    next_email_id: u64,
    next_reply_id: u64,
    next_log_id: u64,
    next_article_id: u64,

    pub emails: BTreeMap<u64, Email>,
    pub replies: BTreeMap<u64, EmailReply>,
    pub logs: Vec<ProcessingLog>,
    pub categories: Vec<EmailCategory>,
    pub articles: BTreeMap<u64, KnowledgeArticle>,
    pub agents: Vec<Agent>,

    #[serde(default)]
    pub daily_metrics: Vec<DailyMetrics>,
    #[serde(default)]
    pub category_metrics: Vec<CategoryMetrics>,
    #[serde(default)]
    pub agent_performance: Vec<AgentPerformance>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            next_email_id: 1,
            next_reply_id: 1,
            next_log_id: 1,
            next_article_id: 1,
            emails: BTreeMap::new(),
            replies: BTreeMap::new(),
            logs: Vec::new(),
            categories: EmailCategory::defaults(),
            articles: BTreeMap::new(),
            agents: Vec::new(),
            daily_metrics: Vec::new(),
            category_metrics: Vec::new(),
            agent_performance: Vec::new(),
        }
    }
}

fn take_id(counter: &mut u64) -> u64 {
    let id = *counter;
    *counter += 1;
    id
}

impl StoreState {
    /// 套用設定檔：分類與客服人員以設定為準，知識庫只補上缺少的文章
    pub fn apply_seed(&mut self, seed: &StoreSeed, now: DateTime<Utc>) {
        if !seed.categories.is_empty() {
            self.categories = seed.categories.clone();
        }

        for agent in &seed.agents {
            match self.agents.iter_mut().find(|a| a.id == agent.id) {
                Some(existing) => *existing = agent.clone(),
                None => self.agents.push(agent.clone()),
            }
        }

        for (category, title, content, keywords) in &seed.articles {
            let exists = self
                .articles
                .values()
                .any(|a| a.category == *category && a.title == *title);
            if !exists {
                self.add_article(*category, title, content, keywords.clone(), None, now);
            }
        }
    }

    // ---- emails ----

    pub fn contains_message_id(&self, message_id: &str) -> bool {
        self.emails.values().any(|e| e.message_id == message_id)
    }

    /// Message-ID 已存在時回傳 None
    pub fn insert_email(&mut self, incoming: IncomingEmail, now: DateTime<Utc>) -> Option<u64> {
        if self.contains_message_id(&incoming.message_id) {
            return None;
        }
        let id = take_id(&mut self.next_email_id);
        self.emails.insert(id, Email::from_incoming(id, incoming, now));
        Some(id)
    }

    pub fn email(&self, id: u64) -> Result<&Email> {
        self.emails
            .get(&id)
            .ok_or_else(|| SupportError::not_found("Email", id))
    }

    pub fn email_mut(&mut self, id: u64) -> Result<&mut Email> {
        let email = self
            .emails
            .get_mut(&id)
            .ok_or_else(|| SupportError::not_found("Email", id))?;
        email.updated_at = Utc::now();
        Ok(email)
    }

    // ---- replies ----

    pub fn add_reply(&mut self, mut reply: EmailReply) -> u64 {
        let id = take_id(&mut self.next_reply_id);
        reply.id = id;
        self.replies.insert(id, reply);
        id
    }

    pub fn reply(&self, id: u64) -> Result<&EmailReply> {
        self.replies
            .get(&id)
            .ok_or_else(|| SupportError::not_found("Reply", id))
    }

    pub fn reply_mut(&mut self, id: u64) -> Result<&mut EmailReply> {
        let reply = self
            .replies
            .get_mut(&id)
            .ok_or_else(|| SupportError::not_found("Reply", id))?;
        reply.updated_at = Utc::now();
        Ok(reply)
    }

    /// 依建立時間由新到舊
    pub fn replies_for(&self, email_id: u64) -> Vec<&EmailReply> {
        let mut replies: Vec<&EmailReply> = self
            .replies
            .values()
            .filter(|r| r.email_id == email_id)
            .collect();
        replies.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        replies
    }

    // ---- processing logs ----

    pub fn add_log(
        &mut self,
        email_id: u64,
        step: &str,
        status: LogStatus,
        details: serde_json::Value,
    ) -> &mut ProcessingLog {
        let id = take_id(&mut self.next_log_id);
        self.logs.push(ProcessingLog {
            id,
            email_id,
            step: step.to_string(),
            status,
            details,
            error_message: String::new(),
            processing_time_secs: None,
            created_at: Utc::now(),
        });
        let last = self.logs.len() - 1;
        &mut self.logs[last]
    }

    pub fn logs_for(&self, email_id: u64) -> Vec<&ProcessingLog> {
        self.logs.iter().filter(|l| l.email_id == email_id).collect()
    }

    pub fn remove_logs_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.logs.len();
        self.logs.retain(|log| log.created_at >= cutoff);
        before - self.logs.len()
    }

    // ---- categories & agents ----

    pub fn category(&self, name: CategoryName) -> Option<&EmailCategory> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn category_names(&self) -> Vec<CategoryName> {
        let mut names: Vec<CategoryName> = self.categories.iter().map(|c| c.name).collect();
        names.sort();
        names
    }

    pub fn agent(&self, id: u64) -> Result<&Agent> {
        self.agents
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| SupportError::not_found("Agent", id))
    }

    pub fn active_staff(&self) -> Vec<&Agent> {
        self.agents
            .iter()
            .filter(|a| a.is_staff && a.is_active)
            .collect()
    }

    // ---- knowledge base ----

    pub fn add_article(
        &mut self,
        category: CategoryName,
        title: &str,
        content: &str,
        keywords: Vec<String>,
        created_by: Option<u64>,
        now: DateTime<Utc>,
    ) -> u64 {
        let id = take_id(&mut self.next_article_id);
        self.articles.insert(
            id,
            KnowledgeArticle {
                id,
                category,
                title: title.to_string(),
                content: content.to_string(),
                keywords,
                use_count: 0,
                is_active: true,
                created_at: now,
                updated_at: now,
                created_by,
            },
        );
        id
    }

    pub fn article_mut(&mut self, id: u64) -> Result<&mut KnowledgeArticle> {
        let article = self
            .articles
            .get_mut(&id)
            .ok_or_else(|| SupportError::not_found("Knowledge article", id))?;
        article.updated_at = Utc::now();
        Ok(article)
    }

    /// 依使用次數、建立時間排序
    pub fn articles_ordered(&self) -> Vec<&KnowledgeArticle> {
        let mut articles: Vec<&KnowledgeArticle> = self.articles.values().collect();
        articles.sort_by(|a, b| {
            b.use_count
                .cmp(&a.use_count)
                .then(b.created_at.cmp(&a.created_at))
        });
        articles
    }

    pub fn top_articles(&self, category: CategoryName, limit: usize) -> Vec<KnowledgeArticle> {
        self.articles_ordered()
            .into_iter()
            .filter(|a| a.is_active && a.category == category)
            .take(limit)
            .cloned()
            .collect()
    }

    /// 關鍵字任一重疊即符合（不分大小寫）
    pub fn search_articles(&self, keywords: &[String]) -> Vec<&KnowledgeArticle> {
        let wanted: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        self.articles_ordered()
            .into_iter()
            .filter(|a| a.is_active)
            .filter(|a| {
                a.keywords
                    .iter()
                    .any(|k| wanted.contains(&k.trim().to_lowercase()))
            })
            .collect()
    }

    // ---- metrics ----

    /// 回傳 true 代表新建
    pub fn upsert_daily_metrics(&mut self, metrics: DailyMetrics) -> bool {
        match self
            .daily_metrics
            .iter_mut()
            .find(|m| m.date == metrics.date)
        {
            Some(existing) => {
                *existing = metrics;
                false
            }
            None => {
                self.daily_metrics.push(metrics);
                self.daily_metrics.sort_by(|a, b| b.date.cmp(&a.date));
                true
            }
        }
    }

    pub fn upsert_category_metrics(&mut self, metrics: CategoryMetrics) {
        match self
            .category_metrics
            .iter_mut()
            .find(|m| m.date == metrics.date && m.category == metrics.category)
        {
            Some(existing) => *existing = metrics,
            None => self.category_metrics.push(metrics),
        }
    }

    pub fn upsert_agent_performance(&mut self, performance: AgentPerformance) {
        match self
            .agent_performance
            .iter_mut()
            .find(|p| p.date == performance.date && p.agent_id == performance.agent_id)
        {
            Some(existing) => *existing = performance,
            None => self.agent_performance.push(performance),
        }
    }
}

pub struct SupportStore<S: Storage> {
    storage: S,
    state: RwLock<StoreState>,
}

impl<S: Storage> SupportStore<S> {
    /// 載入快照；快照不存在時建立新的狀態
    pub async fn open(storage: S, seed: &StoreSeed) -> Result<Self> {
        let mut state = match storage.read_file(SNAPSHOT_FILE).await {
            Ok(bytes) => serde_json::from_slice::<StoreState>(&bytes)?,
            Err(SupportError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No existing state snapshot, starting fresh");
                StoreState::default()
            }
            Err(e) => return Err(e),
        };

        state.apply_seed(seed, Utc::now());

        tracing::debug!(
            "Store loaded: {} emails, {} replies, {} articles",
            state.emails.len(),
            state.replies.len(),
            state.articles.len()
        );

        Ok(Self {
            storage,
            state: RwLock::new(state),
        })
    }

    pub async fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        let state = self.state.read().await;
        f(&state)
    }

    /// 套用變更並寫入快照；閉包失敗時不寫入
    pub async fn write<R>(&self, f: impl FnOnce(&mut StoreState) -> Result<R>) -> Result<R> {
        let mut state = self.state.write().await;
        let mut draft = state.clone();
        let result = f(&mut draft)?;
        let snapshot = serde_json::to_vec_pretty(&draft)?;
        self.storage.write_file(SNAPSHOT_FILE, &snapshot).await?;
        *state = draft;
        Ok(result)
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    pub struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned()
        }
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned().ok_or_else(|| {
                SupportError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                ))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            let mut files = self.files.lock().await;
            files.insert(path.to_string(), data.to_vec());
            Ok(())
        }
    }

    pub fn incoming(message_id: &str, subject: &str, received_at: DateTime<Utc>) -> IncomingEmail {
        IncomingEmail {
            message_id: message_id.to_string(),
            from_email: "customer@example.com".to_string(),
            from_name: "Casey Customer".to_string(),
            to_email: "support@example.com".to_string(),
            subject: subject.to_string(),
            body: format!("Body of {}", subject),
            body_html: String::new(),
            received_at,
            attachments: vec![],
            has_attachments: false,
            thread_id: String::new(),
            in_reply_to: String::new(),
        }
    }

    pub fn staff(id: u64, email: &str) -> Agent {
        Agent {
            id,
            name: format!("Agent {}", id),
            email: email.to_string(),
            is_staff: true,
            is_active: true,
        }
    }

    pub async fn open_store(seed: StoreSeed) -> (MockStorage, SupportStore<MockStorage>) {
        let storage = MockStorage::new();
        let store = SupportStore::open(storage.clone(), &seed).await.unwrap();
        (storage, store)
    }
}
