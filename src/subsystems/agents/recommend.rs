//! Follow-up question recommendations.
//!
//! Two LLM calls: one extracts topic, intent and keywords from the
//! conversation, the other proposes candidate questions.  Candidates are
//! then scored locally:
//!
//! ```text
//! relevance     = 0.5 + 0.1 per context keyword + 0.2 if the topic appears   (≤ 1)
//! answerability = 0.5 + 0.2 if > 20 chars + 0.1 if a '?' + 0.2 if specific   (≤ 1)
//! confidence    = 0.6 × relevance + 0.4 × answerability                      (≤ 1)
//! score         = 0.4 × relevance + 0.3 × answerability + 0.3 × interest
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::llm::{ChatMessage, ChatRequest};
use crate::subsystems::agents::AgentsState;
use crate::subsystems::agents::core::json::parse_loose;
use crate::subsystems::agents::core::prompt::PromptBuilder;
use crate::subsystems::memory::ratings::round;

const RECOMMEND_TEMPERATURE: f32 = 0.3;
const DEFAULT_INTEREST: f64 = 0.5;
const HISTORY_SUMMARY_ITEMS: usize = 3;
const HISTORY_SUMMARY_CHARS: usize = 100;
const MAX_RECOMMENDATIONS: usize = 10;

/// Words that mark a question as specific.
const SPECIFIC_WORDS: &[&str] = &["如何", "怎样", "什么", "哪个", "为什么", "how", "what", "which", "why"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    FollowUp,
    Related,
    Clarification,
    KnowledgeBased,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryItem {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

fn default_count() -> usize {
    3
}

fn yes() -> bool {
    true
}

/// Body of `agents/recommend`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationRequest {
    pub session_id: String,
    pub current_message: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryItem>,
    #[serde(default = "default_count")]
    pub num_recommendations: usize,
    #[serde(default = "yes")]
    pub include_follow_ups: bool,
    #[serde(default = "yes")]
    pub include_related: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContextAnalysis {
    pub main_topic: String,
    pub user_intent: String,
    pub keywords: Vec<String>,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub id: String,
    pub question: String,
    pub reason: String,
    pub kind: RecommendationType,
    pub relevance: f64,
    pub answerability: f64,
    pub interest: f64,
    pub confidence: f64,
}

impl Recommendation {
    pub fn score(&self) -> f64 {
        0.4 * self.relevance + 0.3 * self.answerability + 0.3 * self.interest
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "question": self.question,
            "reason": self.reason,
            "type": self.kind,
            "score": round(self.score(), 3),
            "relevance_score": round(self.relevance, 3),
            "answerability_score": round(self.answerability, 3),
            "confidence": round(self.confidence, 3),
        })
    }
}

#[derive(Deserialize)]
struct Candidates {
    #[serde(default)]
    recommendations: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    question: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    reason: String,
}

pub fn relevance(question: &str, context: &ContextAnalysis) -> f64 {
    let q = question.to_lowercase();
    let matches = context.keywords.iter().filter(|k| !k.is_empty() && q.contains(&k.to_lowercase())).count();
    let mut score = 0.5 + 0.1 * matches as f64;
    let topic = context.main_topic.trim().to_lowercase();
    if !topic.is_empty() && q.contains(&topic) {
        score += 0.2;
    }
    score.min(1.0)
}

pub fn answerability(question: &str) -> f64 {
    let mut score = 0.5;
    if question.chars().count() > 20 {
        score += 0.2;
    }
    if question.contains('?') || question.contains('？') {
        score += 0.1;
    }
    let lower = question.to_lowercase();
    if SPECIFIC_WORDS.iter().any(|w| lower.contains(w)) {
        score += 0.2;
    }
    f64::min(score, 1.0)
}

fn summarize(history: &[HistoryItem]) -> String {
    if history.is_empty() {
        return "no conversation history".to_string();
    }
    history[history.len().saturating_sub(HISTORY_SUMMARY_ITEMS)..]
        .iter()
        .map(|h| {
            let role = if h.role.is_empty() { "unknown" } else { &h.role };
            let content: String = h.content.chars().take(HISTORY_SUMMARY_CHARS).collect();
            format!("{role}: {content}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Question recommender.  Ids are `rec-N`, unique for the process lifetime.
#[derive(Default)]
pub struct QuestionRecommender {
    counter: AtomicU64,
}

impl QuestionRecommender {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        format!("rec-{}", self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn ask(state: &AgentsState, layer: &str, vars: &[(&str, String)]) -> Result<String, String> {
        let system = PromptBuilder::new(&state.config.prompts_dir).layer("recommend.md").build();
        let user = vars
            .iter()
            .fold(PromptBuilder::new(&state.config.prompts_dir).layer(layer), |b, (k, v)| b.var(k, v.clone()))
            .build();
        let request = ChatRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
            .with_temperature(RECOMMEND_TEMPERATURE);
        state.llm_chat(request).await.map(|r| r.text).map_err(|e| e.to_string())
    }

    /// Topic, intent and keywords.  Empty analysis when the model fails.
    pub async fn analyze_context(&self, state: &AgentsState, message: &str, history: &[HistoryItem]) -> ContextAnalysis {
        let vars = [("message", message.to_string()), ("history", summarize(history))];
        let parsed = Self::ask(state, "recommend_context.md", &vars)
            .await
            .and_then(|text| parse_loose::<ContextAnalysis>(&text));
        match parsed {
            Ok(mut c) => {
                if c.user_intent.is_empty() {
                    c.user_intent = "inquiry".into();
                }
                c
            }
            Err(e) => {
                warn!(error = %e, "context analysis failed");
                ContextAnalysis { user_intent: "inquiry".into(), ..Default::default() }
            }
        }
    }

    async fn candidates(
        &self,
        state: &AgentsState,
        message: &str,
        context: &ContextAnalysis,
        count: usize,
    ) -> Vec<Recommendation> {
        let vars = [
            ("count", count.to_string()),
            ("message", message.to_string()),
            ("topic", context.main_topic.clone()),
            ("intent", context.user_intent.clone()),
            ("keywords", context.keywords.join(", ")),
        ];
        let parsed = Self::ask(state, "recommend_candidates.md", &vars)
            .await
            .and_then(|text| parse_loose::<Candidates>(&text));
        let raw = match parsed {
            Ok(c) => c.recommendations,
            Err(e) => {
                warn!(error = %e, "candidate generation failed");
                return Vec::new();
            }
        };
        raw.into_iter()
            .filter(|c| !c.question.trim().is_empty())
            .filter_map(|c| {
                let kind_name = c.kind.unwrap_or_else(|| "follow_up".into());
                let Ok(kind) = serde_json::from_value::<RecommendationType>(json!(kind_name)) else {
                    warn!(kind = %kind_name, "skipping candidate with unknown type");
                    return None;
                };
                let relevance = relevance(&c.question, context);
                let answerability = answerability(&c.question);
                Some(Recommendation {
                    id: self.next_id(),
                    confidence: (relevance * 0.6 + answerability * 0.4).min(1.0),
                    question: c.question,
                    reason: c.reason,
                    kind,
                    relevance,
                    answerability,
                    interest: DEFAULT_INTEREST,
                })
            })
            .collect()
    }

    /// Best `count` candidates, highest score first.
    pub async fn generate(
        &self,
        state: &AgentsState,
        message: &str,
        history: &[HistoryItem],
        count: usize,
    ) -> Vec<Recommendation> {
        let context = self.analyze_context(state, message, history).await;
        let mut recs = self.candidates(state, message, &context, count).await;
        recs.sort_by(|a, b| b.score().total_cmp(&a.score()));
        recs.truncate(count);
        recs
    }

    /// Full `agents/recommend` reply.
    pub async fn recommend(&self, state: &AgentsState, req: RecommendationRequest) -> Result<Value, String> {
        if req.current_message.trim().is_empty() {
            return Err("current_message must not be empty".into());
        }
        if !(1..=MAX_RECOMMENDATIONS).contains(&req.num_recommendations) {
            return Err(format!("num_recommendations must be between 1 and {MAX_RECOMMENDATIONS}"));
        }
        info!(session_id = %req.session_id, message_len = req.current_message.len(), "recommendations requested");

        let recs: Vec<Recommendation> = self
            .generate(state, &req.current_message, &req.conversation_history, req.num_recommendations)
            .await
            .into_iter()
            .filter(|r| req.include_follow_ups || r.kind != RecommendationType::FollowUp)
            .filter(|r| req.include_related || r.kind != RecommendationType::Related)
            .collect();

        let mut summary = format!(
            "user asked: {}",
            req.current_message.chars().take(HISTORY_SUMMARY_CHARS).collect::<String>()
        );
        if !req.conversation_history.is_empty() {
            summary.push_str(&format!(" (conversation depth: {})", req.conversation_history.len()));
        }
        let average = if recs.is_empty() {
            0.0
        } else {
            recs.iter().map(|r| round(r.score(), 3)).sum::<f64>() / recs.len() as f64
        };

        Ok(json!({
            "session_id": req.session_id,
            "recommendations": recs.iter().map(Recommendation::to_json).collect::<Vec<_>>(),
            "context_summary": summary,
            "metadata": {
                "recommendation_count": recs.len(),
                "average_score": round(average, 3),
            },
        }))
    }
}
