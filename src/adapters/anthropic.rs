//! Anthropic Messages API 實作的郵件 AI 服務。

use crate::config::toml_config::AnthropicConfig;
use crate::core::masking::SensitiveDataMasker;
use crate::domain::model::{null_as_default, CategoryName, ExtractedInfo, Priority, Sentiment};
use crate::domain::ports::{
    Classification, EmailAgent, ReplyDraft, ReplyRequest, SentimentReport,
};
use crate::utils::error::{Result, SupportError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::OnceCell;

const API_VERSION: &str = "2023-06-01";
const CLASSIFY_MAX_TOKENS: u32 = 1500;
const REPLY_MAX_TOKENS: u32 = 2000;
const SENTIMENT_MAX_TOKENS: u32 = 500;
const MAX_PROMPT_ARTICLES: usize = 5;

pub struct ClaudeEmailAgent {
    client: OnceCell<Client>,
    timeout: Duration,
    api_key: String,
    base_url: String,
    model: String,
    masker: SensitiveDataMasker,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct RawClassification {
    #[serde(default, deserialize_with = "null_as_default")]
    category: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    priority: String,
    #[serde(default, deserialize_with = "null_as_default")]
    sentiment: String,
    #[serde(default, deserialize_with = "null_as_default")]
    requires_escalation: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    escalation_reason: String,
    #[serde(default, deserialize_with = "null_as_default")]
    extracted_info: ExtractedInfo,
}

#[derive(Deserialize)]
struct RawSentiment {
    #[serde(default, deserialize_with = "null_as_default")]
    sentiment: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    urgency_level: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    emotion_tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    reasoning: String,
}

const DEFAULT_CONFIDENCE: f64 = 0.5;
const DEFAULT_URGENCY: i64 = 3;

impl ClaudeEmailAgent {
    pub fn new(config: &AnthropicConfig) -> Result<Self> {
        Ok(Self {
            client: OnceCell::new(),
            timeout: Duration::from_secs(config.timeout_secs),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            masker: SensitiveDataMasker::new()?,
        })
    }

    /// HTTP client 在第一次呼叫 API 時才建立
    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                Ok::<_, SupportError>(Client::builder().timeout(self.timeout).build()?)
            })
            .await
    }

    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{ "role": "user", "content": user }],
        });

        let response = self
            .client()
            .await?
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SupportError::AiServiceError {
                message: format!("HTTP {}: {}", status.as_u16(), body),
            });
        }

        let message: MessagesResponse = response.json().await?;
        let text = message
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .unwrap_or_default();

        Ok(strip_code_fence(&text).to_string())
    }
}

/// 去除模型常包在外層的 markdown 程式碼區塊
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn classification_prompt(categories: &[CategoryName]) -> String {
    let names: Vec<&str> = categories.iter().map(|c| c.as_str()).collect();
    format!(
        r#"You are an expert email classification system for customer support.

Your task is to analyze incoming support emails and provide structured classification.

Available categories: {}

You must respond with ONLY valid JSON in this exact format:
{{
    "category": "one of the available categories",
    "confidence": 0.0 to 1.0,
    "priority": "low/medium/high/urgent",
    "sentiment": "positive/neutral/negative",
    "requires_escalation": true/false,
    "escalation_reason": "reason if escalation needed, empty string otherwise",
    "extracted_info": {{
        "customer_name": "extracted or empty",
        "order_id": "extracted or empty",
        "account_id": "extracted or empty",
        "issue_summary": "brief summary",
        "key_points": ["point1", "point2"]
    }}
}}

Classification Guidelines:
- billing: Payment issues, invoices, refunds, pricing questions
- technical: Product not working, bugs, errors, technical problems
- sales: Product inquiries, pricing, demos, purchase questions
- general: FAQs, general questions, information requests
- complaint: Dissatisfaction, complaints, negative feedback
- feature_request: Suggestions, feature requests, improvements

Priority Guidelines:
- urgent: System down, payment failed, security issue, angry customer
- high: Significant impact, time-sensitive, frustrated customer
- medium: Standard issues, normal concerns
- low: General questions, minor issues

Escalation Guidelines (requires_escalation = true):
- Legal threats or demands
- Requests for refunds over $500
- Security or privacy concerns
- Regulatory compliance issues
- Extremely negative sentiment with threat to leave
- Complex technical issues beyond standard troubleshooting

CRITICAL: Respond ONLY with the JSON object. No other text before or after."#,
        names.join(", ")
    )
}

fn reply_prompt(category: &str, knowledge: &str) -> String {
    format!(
        r#"You are a professional customer support agent responding to customer emails.

Category: {}

Guidelines:
- Be professional, empathetic, and helpful
- Use the customer's name if provided
- Address all points raised in the email
- Provide clear, actionable solutions
- Be concise but thorough
- Use knowledge base articles when available
- Maintain a friendly but professional tone
- If you cannot fully resolve the issue, explain next steps clearly

{}

IMPORTANT:
- Do not make promises you cannot keep
- Do not provide refunds or discounts without proper authority
- For complex issues, suggest escalation to specialized team
- Do not include any sensitive information in the response

Respond with ONLY valid JSON:
{{
    "reply": "the email reply text",
    "confidence": 0.0 to 1.0,
    "requires_review": true/false,
    "reasoning": "brief explanation of confidence level",
    "used_articles": ["article title 1", "article title 2"]
}}

Confidence Guidelines:
- 0.9-1.0: Standard FAQ or simple question with clear KB article
- 0.7-0.89: Common issue with good KB coverage
- 0.5-0.69: Moderate complexity, some uncertainty
- Below 0.5: Complex issue, requires human review (set requires_review: true)

Requires Review (true) if:
- Confidence below 0.7
- Involves refunds, discounts, or compensation
- Legal or compliance issues
- Technical issue without clear solution
- Negative sentiment with potential churn risk"#,
        category, knowledge
    )
}

const SENTIMENT_PROMPT: &str = r#"Analyze the sentiment and urgency of this customer email.

Respond with ONLY valid JSON:
{
    "sentiment": "positive/neutral/negative",
    "confidence": 0.0 to 1.0,
    "urgency_level": 1 to 5,
    "emotion_tags": ["frustrated", "angry", "confused", etc.],
    "reasoning": "brief explanation"
}

Urgency Levels:
1 - No urgency, general question
2 - Minor issue, can wait
3 - Moderate issue, needs response soon
4 - Important issue, time-sensitive
5 - Critical issue, immediate attention needed"#;

fn knowledge_context(request: &ReplyRequest) -> String {
    if request.articles.is_empty() {
        return String::new();
    }
    let mut context = String::from("\n\nKnowledge Base Articles:\n");
    for article in request.articles.iter().take(MAX_PROMPT_ARTICLES) {
        context.push_str(&format!(
            "\n--- Article: {} ---\n{}\n",
            article.title, article.content
        ));
    }
    context
}

fn parse_classification(text: &str) -> Classification {
    match serde_json::from_str::<RawClassification>(text) {
        Ok(raw) => Classification {
            category: raw.category.trim().to_lowercase(),
            confidence: raw.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0),
            priority: Priority::parse(&raw.priority).unwrap_or_default(),
            sentiment: Sentiment::parse(&raw.sentiment).unwrap_or_default(),
            requires_escalation: raw.requires_escalation,
            escalation_reason: raw.escalation_reason,
            extracted_info: raw.extracted_info,
        },
        Err(e) => {
            tracing::error!("Failed to parse classification response: {}", e);
            tracing::debug!("Response text: {}", text);
            Classification::fallback()
        }
    }
}

fn parse_sentiment(text: &str) -> Option<SentimentReport> {
    let raw: RawSentiment = serde_json::from_str(text).ok()?;
    Some(SentimentReport {
        sentiment: Sentiment::parse(&raw.sentiment).unwrap_or_default(),
        confidence: raw.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0),
        urgency_level: raw.urgency_level.unwrap_or(DEFAULT_URGENCY).clamp(1, 5) as u8,
        emotion_tags: raw.emotion_tags,
        reasoning: raw.reasoning,
    })
}

#[async_trait]
impl EmailAgent for ClaudeEmailAgent {
    async fn classify(
        &self,
        subject: &str,
        body: &str,
        categories: &[CategoryName],
    ) -> Result<Classification> {
        let (masked_body, _) = self.masker.mask(body);
        let user_prompt = format!(
            "Subject: {}\n\nBody:\n{}\n\nAnalyze this email and provide classification.",
            subject, masked_body
        );

        let text = self
            .complete(
                &classification_prompt(categories),
                &user_prompt,
                CLASSIFY_MAX_TOKENS,
            )
            .await?;

        let classification = parse_classification(&text);
        tracing::info!(
            "Email classified: {} (confidence: {})",
            classification.category,
            classification.confidence
        );
        Ok(classification)
    }

    async fn generate_reply(&self, request: ReplyRequest) -> Result<ReplyDraft> {
        let (masked_body, mapping) = self.masker.mask(&request.body);
        let system = reply_prompt(&request.category, &knowledge_context(&request));
        let user_prompt = format!(
            "Customer Email:\nSubject: {}\nBody: {}\n\nGenerate a professional reply to this customer email.",
            request.subject, masked_body
        );

        let text = self.complete(&system, &user_prompt, REPLY_MAX_TOKENS).await?;
        let mut draft: ReplyDraft =
            serde_json::from_str(&text).map_err(|e| SupportError::AiResponseError {
                message: e.to_string(),
            })?;

        let greeting = match request.customer_name.as_deref() {
            Some(name) if !name.trim().is_empty() => format!("Dear {},", name.trim()),
            _ => "Hello,".to_string(),
        };
        draft.reply = format!("{}\n\n{}", greeting, self.masker.unmask(&draft.reply, &mapping));
        draft.confidence = draft.confidence.clamp(0.0, 1.0);

        tracing::info!("Reply generated with confidence: {}", draft.confidence);
        Ok(draft)
    }

    async fn analyze_sentiment(&self, text: &str) -> SentimentReport {
        let (masked, _) = self.masker.mask(text);
        match self
            .complete(SENTIMENT_PROMPT, &masked, SENTIMENT_MAX_TOKENS)
            .await
        {
            Ok(response) => parse_sentiment(&response).unwrap_or_else(|| {
                tracing::error!("Failed to parse sentiment response");
                SentimentReport::fallback()
            }),
            Err(e) => {
                tracing::error!("Error analyzing sentiment: {}", e);
                SentimentReport::fallback()
            }
        }
    }
}
