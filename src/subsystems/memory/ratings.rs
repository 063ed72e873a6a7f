//! Answer quality ratings.
//!
//! Each rating scores one answer on five dimensions (0-100).  The composite
//! score is always computed with the *current* weights, so changing the
//! weights re-ranks history without rewriting it.  Ratings are appended to
//! `{work_dir}/data/answer_quality_ratings.jsonl` when persistence is on.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::config::RatingWeights;
use crate::error::AppError;

use super::jsonl::JsonlLog;
use super::now;

pub const RATINGS_FILE: &str = "answer_quality_ratings.jsonl";

/// Composite scores below this count as low.
const LOW_SCORE: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRating {
    pub rating_id: String,
    pub session_id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub accuracy_score: f64,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub completeness_score: f64,
    #[serde(default)]
    pub clarity_score: f64,
    #[serde(default)]
    pub usefulness_score: f64,
    #[serde(default)]
    pub response_time: Option<f64>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub user_comment: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

impl AnswerRating {
    pub fn scores(&self) -> [f64; 5] {
        [self.accuracy_score, self.relevance_score, self.completeness_score, self.clarity_score, self.usefulness_score]
    }
}

/// Caller-supplied part of a rating; id and timestamp are assigned on submit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RatingSubmission {
    #[serde(default)]
    pub rating_id: Option<String>,
    pub session_id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub accuracy_score: f64,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub completeness_score: f64,
    #[serde(default)]
    pub clarity_score: f64,
    #[serde(default)]
    pub usefulness_score: f64,
    #[serde(default)]
    pub response_time: Option<f64>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub user_comment: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub struct RatingManager {
    log: JsonlLog<AnswerRating>,
    weights: Mutex<RatingWeights>,
}

impl RatingManager {
    pub fn in_memory(weights: RatingWeights) -> Self {
        Self { log: JsonlLog::in_memory(), weights: Mutex::new(weights) }
    }

    /// Load ratings from `dir/answer_quality_ratings.jsonl`.
    pub fn open(dir: &Path, weights: RatingWeights) -> Result<Self, AppError> {
        Ok(Self { log: JsonlLog::open(dir.join(RATINGS_FILE))?, weights: Mutex::new(weights) })
    }

    fn lock_weights(&self) -> MutexGuard<'_, RatingWeights> {
        self.weights.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn weights(&self) -> RatingWeights {
        *self.lock_weights()
    }

    pub fn update_weights(&self, weights: RatingWeights) -> Result<(), AppError> {
        weights.validate().map_err(AppError::InvalidInput)?;
        *self.lock_weights() = weights;
        info!(?weights, "rating weights updated");
        Ok(())
    }

    pub fn composite(&self, rating: &AnswerRating) -> f64 {
        self.weights().composite(rating.scores())
    }

    /// Validate and store a rating.  Every score must lie in 0..=100.
    pub async fn submit(&self, sub: RatingSubmission) -> Result<AnswerRating, AppError> {
        let scores = [
            sub.accuracy_score,
            sub.relevance_score,
            sub.completeness_score,
            sub.clarity_score,
            sub.usefulness_score,
        ];
        if let Some(bad) = scores.iter().find(|s| !(0.0..=100.0).contains(*s)) {
            return Err(AppError::InvalidInput(format!("scores must be between 0 and 100, got {bad}")));
        }

        let rating = AnswerRating {
            rating_id: sub.rating_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            session_id: sub.session_id,
            question: sub.question,
            answer: sub.answer,
            accuracy_score: sub.accuracy_score,
            relevance_score: sub.relevance_score,
            completeness_score: sub.completeness_score,
            clarity_score: sub.clarity_score,
            usefulness_score: sub.usefulness_score,
            response_time: sub.response_time,
            user_id: sub.user_id,
            agent_name: sub.agent_name,
            timestamp: now(),
            user_comment: sub.user_comment,
            metadata: sub.metadata.unwrap_or_else(|| json!({})),
        };
        self.log.append(rating.clone()).await?;
        info!(rating_id = %rating.rating_id, composite = self.composite(&rating), "rating submitted");
        Ok(rating)
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn stats(&self) -> Value {
        let weights = self.weights();
        self.log.with(|ratings| {
            if ratings.is_empty() {
                return json!({
                    "total_ratings": 0,
                    "average_composite_score": 0.0,
                    "dimension_averages": {},
                    "score_distribution": {},
                    "low_score_count": 0,
                    "low_score_rate": 0.0,
                });
            }

            let total = ratings.len() as f64;
            let composites: Vec<f64> = ratings.iter().map(|r| weights.composite(r.scores())).collect();
            let mut sums = [0.0; 5];
            for r in ratings {
                for (sum, s) in sums.iter_mut().zip(r.scores()) {
                    *sum += s;
                }
            }
            let dimension_averages: BTreeMap<&str, f64> = ["accuracy", "relevance", "completeness", "clarity", "usefulness"]
                .into_iter()
                .zip(sums)
                .map(|(name, sum)| (name, round(sum / total, 2)))
                .collect();

            let band = |lo: f64, hi: f64| composites.iter().filter(|c| **c >= lo && **c < hi).count();
            let low = composites.iter().filter(|c| **c < LOW_SCORE).count();

            json!({
                "total_ratings": ratings.len(),
                "average_composite_score": round(composites.iter().sum::<f64>() / total, 2),
                "dimension_averages": dimension_averages,
                "score_distribution": {
                    "excellent": band(80.0, f64::INFINITY),
                    "good": band(60.0, 80.0),
                    "fair": band(40.0, 60.0),
                    "poor": band(f64::NEG_INFINITY, 40.0),
                },
                "low_score_count": low,
                "low_score_rate": round(low as f64 / total, 3),
            })
        })
    }
}

pub(crate) fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn submission(scores: [f64; 5]) -> RatingSubmission {
        RatingSubmission {
            session_id: "s1".into(),
            question: "q".into(),
            answer: "a".into(),
            accuracy_score: scores[0],
            relevance_score: scores[1],
            completeness_score: scores[2],
            clarity_score: scores[3],
            usefulness_score: scores[4],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn out_of_range_scores_are_rejected() {
        let m = RatingManager::in_memory(RatingWeights::default());
        for bad in [[101.0, 0.0, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0, -1.0]] {
            assert!(matches!(m.submit(submission(bad)).await, Err(AppError::InvalidInput(_))));
        }
        assert!(m.is_empty());
    }

    #[tokio::test]
    async fn stats_bucket_composites_by_current_weights() {
        let m = RatingManager::in_memory(RatingWeights::default());
        let r = m.submit(submission([95.0; 5])).await.unwrap();
        assert!(!r.rating_id.is_empty());
        m.submit(submission([75.0; 5])).await.unwrap();
        m.submit(submission([55.0; 5])).await.unwrap();
        m.submit(submission([15.0; 5])).await.unwrap();

        let stats = m.stats();
        assert_eq!(stats["total_ratings"], 4);
        assert_eq!(stats["average_composite_score"], 60.0);
        assert_eq!(stats["dimension_averages"]["clarity"], 60.0);
        assert_eq!(stats["score_distribution"], json!({"excellent": 1, "good": 1, "fair": 1, "poor": 1}));
        assert_eq!(stats["low_score_count"], 2);
        assert_eq!(stats["low_score_rate"], 0.5);
    }

    #[tokio::test]
    async fn weight_changes_apply_to_existing_ratings() {
        let m = RatingManager::in_memory(RatingWeights::default());
        let r = m.submit(submission([100.0, 0.0, 0.0, 0.0, 0.0])).await.unwrap();
        assert!((m.composite(&r) - 30.0).abs() < 1e-9);

        let bad = RatingWeights { accuracy: 0.9, ..RatingWeights::default() };
        assert!(matches!(m.update_weights(bad), Err(AppError::InvalidInput(_))));

        let all_accuracy =
            RatingWeights { accuracy: 1.0, relevance: 0.0, completeness: 0.0, clarity: 0.0, usefulness: 0.0 };
        m.update_weights(all_accuracy).unwrap();
        assert!((m.composite(&r) - 100.0).abs() < 1e-9);
        assert_eq!(m.weights(), all_accuracy);
    }

    #[tokio::test]
    async fn ratings_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let m = RatingManager::open(dir.path(), RatingWeights::default()).unwrap();
        m.submit(submission([80.0; 5])).await.unwrap();
        assert!(dir.path().join(RATINGS_FILE).exists());

        let reopened = RatingManager::open(dir.path(), RatingWeights::default()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.stats()["score_distribution"]["excellent"], 1);
    }

    #[test]
    fn empty_stats_are_zeroed() {
        let stats = RatingManager::in_memory(RatingWeights::default()).stats();
        assert_eq!(stats["total_ratings"], 0);
        assert_eq!(stats["average_composite_score"], 0.0);
    }
}
