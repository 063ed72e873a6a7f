//! User feedback on recommended follow-up questions, appended to
//! `{work_dir}/data/recommendation_feedback.jsonl` when persistence is on.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::error::AppError;

use super::jsonl::JsonlLog;
use super::now;
use super::ratings::round;

pub const FEEDBACK_FILE: &str = "recommendation_feedback.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Helpful,
    NotHelpful,
    Irrelevant,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    Clicked,
    Ignored,
    Dismissed,
}

fn label<T: Serialize>(v: &T) -> String {
    serde_json::to_value(v).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationFeedback {
    pub recommendation_id: String,
    pub session_id: String,
    pub feedback_type: FeedbackType,
    pub user_action: UserAction,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub user_comment: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackSubmission {
    pub recommendation_id: String,
    pub session_id: String,
    #[serde(alias = "feedback")]
    pub feedback_type: FeedbackType,
    pub user_action: UserAction,
    #[serde(default)]
    pub user_comment: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub struct FeedbackManager {
    log: JsonlLog<RecommendationFeedback>,
}

impl FeedbackManager {
    pub fn in_memory() -> Self {
        Self { log: JsonlLog::in_memory() }
    }

    pub fn open(dir: &Path) -> Result<Self, AppError> {
        Ok(Self { log: JsonlLog::open(dir.join(FEEDBACK_FILE))? })
    }

    pub async fn submit(&self, sub: FeedbackSubmission) -> Result<RecommendationFeedback, AppError> {
        if sub.recommendation_id.trim().is_empty() {
            return Err(AppError::InvalidInput("recommendation_id must not be empty".into()));
        }
        let feedback = RecommendationFeedback {
            recommendation_id: sub.recommendation_id,
            session_id: sub.session_id,
            feedback_type: sub.feedback_type,
            user_action: sub.user_action,
            timestamp: now(),
            user_comment: sub.user_comment,
            metadata: sub.metadata.unwrap_or_else(|| json!({})),
        };
        self.log.append(feedback.clone()).await?;
        info!(
            recommendation_id = %feedback.recommendation_id,
            feedback_type = ?feedback.feedback_type,
            user_action = ?feedback.user_action,
            "recommendation feedback recorded"
        );
        Ok(feedback)
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn stats(&self) -> Value {
        self.log.with(|all| {
            if all.is_empty() {
                return json!({
                    "total_feedback": 0,
                    "feedback_types": {},
                    "user_actions": {},
                    "helpful_rate": 0.0,
                    "click_rate": 0.0,
                    "average_feedback_per_session": 0.0,
                });
            }
            let total = all.len() as f64;
            let (types, actions) = tally(all);
            let sessions: HashSet<&str> = all.iter().map(|f| f.session_id.as_str()).collect();
            let rate = |n: Option<&usize>| round(n.copied().unwrap_or(0) as f64 / total, 3);
            json!({
                "total_feedback": all.len(),
                "helpful_rate": rate(types.get(&label(&FeedbackType::Helpful))),
                "click_rate": rate(actions.get(&label(&UserAction::Clicked))),
                "feedback_types": types,
                "user_actions": actions,
                "average_feedback_per_session": round(total / sessions.len() as f64, 2),
            })
        })
    }

    pub fn session_feedback(&self, session_id: &str) -> Vec<RecommendationFeedback> {
        self.log.with(|all| all.iter().filter(|f| f.session_id == session_id).cloned().collect())
    }

    pub fn recommendation_feedback(&self, recommendation_id: &str) -> Vec<RecommendationFeedback> {
        self.log.with(|all| all.iter().filter(|f| f.recommendation_id == recommendation_id).cloned().collect())
    }

    /// Distribution of the latest `limit` feedback entries.
    pub fn trends(&self, limit: usize) -> Value {
        self.log.with(|all| {
            let recent = &all[all.len().saturating_sub(limit)..];
            if recent.is_empty() {
                return json!({ "message": "no feedback yet" });
            }
            let total = recent.len() as f64;
            let (types, actions) = tally(recent);
            let share = |m: &BTreeMap<String, usize>| -> BTreeMap<String, f64> {
                m.iter().map(|(k, n)| (k.clone(), round(*n as f64 / total, 3))).collect()
            };
            // Ties go to the label that sorts first.
            let most_common = |m: &BTreeMap<String, usize>| {
                m.iter().fold(None::<(&String, usize)>, |best, (k, n)| match best {
                    Some((_, b)) if b >= *n => best,
                    _ => Some((k, *n)),
                })
                .map(|(k, _)| k.clone())
            };
            json!({
                "analyzed_feedback_count": recent.len(),
                "feedback_type_distribution": share(&types),
                "user_action_distribution": share(&actions),
                "most_common_feedback": most_common(&types),
                "most_common_action": most_common(&actions),
            })
        })
    }
}

fn tally(entries: &[RecommendationFeedback]) -> (BTreeMap<String, usize>, BTreeMap<String, usize>) {
    let mut types = BTreeMap::new();
    let mut actions = BTreeMap::new();
    for f in entries {
        *types.entry(label(&f.feedback_type)).or_insert(0) += 1;
        *actions.entry(label(&f.user_action)).or_insert(0) += 1;
    }
    (types, actions)
}
