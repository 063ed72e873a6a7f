//! Quality worker: scores an answer on five dimensions and rewrites weak ones.
//! Every parsed evaluation is recorded with the rating manager, whose
//! weights produce the composite score.

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::RatingWeights;
use crate::llm::{ChatMessage, ChatRequest};
use crate::subsystems::memory::RatingSubmission;
use crate::subsystems::agents::AgentsState;
use crate::subsystems::agents::core::json::object_span;
use crate::subsystems::agents::core::prompt::{self, PromptBuilder};

use super::{FAILURE_REPLY, WorkerKind};

const DEFAULT_CRITERIA: &str = "accuracy, relevance, completeness, clarity, usefulness";

const AGENT_NAME: &str = "quality_agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityMode {
    Evaluate,
    Optimize,
    EvaluateAndOptimize,
}

impl QualityMode {
    /// Keyword detection on the instruction.  Evaluation keywords win over
    /// optimisation ones; neither → combined.
    pub fn detect(instruction: &str) -> Self {
        let lower = instruction.to_lowercase();
        let has = |keys: &[&str]| keys.iter().any(|k| lower.contains(k));
        if has(&["evaluate", "assess", "score", "评估", "评分"]) {
            QualityMode::Evaluate
        } else if has(&["optimize", "optimise", "improve", "优化", "改进"]) {
            QualityMode::Optimize
        } else {
            QualityMode::EvaluateAndOptimize
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Evaluation {
    #[serde(alias = "accuracy_score")]
    pub accuracy: f64,
    #[serde(alias = "relevance_score")]
    pub relevance: f64,
    #[serde(alias = "completeness_score")]
    pub completeness: f64,
    #[serde(alias = "clarity_score")]
    pub clarity: f64,
    #[serde(alias = "usefulness_score")]
    pub usefulness: f64,
    pub strengths: Vec<String>,
    #[serde(alias = "issues")]
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
}

impl Evaluation {
    /// Extract the greedy `{ … }` span and clamp every score to 0..=100.
    pub fn parse(text: &str) -> Result<Self, String> {
        let span = object_span(text).ok_or_else(|| "no JSON object in evaluation reply".to_string())?;
        let mut eval: Evaluation = serde_json::from_str(span).map_err(|e| e.to_string())?;
        for score in [
            &mut eval.accuracy,
            &mut eval.relevance,
            &mut eval.completeness,
            &mut eval.clarity,
            &mut eval.usefulness,
        ] {
            *score = if score.is_finite() { score.clamp(0.0, 100.0) } else { 0.0 };
        }
        Ok(eval)
    }

    pub fn scores(&self) -> [f64; 5] {
        [self.accuracy, self.relevance, self.completeness, self.clarity, self.usefulness]
    }

    pub fn composite(&self, weights: &RatingWeights) -> f64 {
        weights.composite(self.scores())
    }

    pub fn report(&self, weights: &RatingWeights) -> String {
        let labels = ["Accuracy", "Relevance", "Completeness", "Clarity", "Usefulness"];
        let mut out = format!("## Quality evaluation\n\n**Composite score**: {:.1}/100\n\n", self.composite(weights));
        for (label, score) in labels.iter().zip(self.scores()) {
            out.push_str(&format!("- {label}: {score:.0}/100\n"));
        }
        for (title, items) in [
            ("Strengths", &self.strengths),
            ("Weaknesses", &self.weaknesses),
            ("Suggestions", &self.suggestions),
        ] {
            out.push_str(&format!("\n### {title}\n{}\n", bullet_list(items)));
        }
        out
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "None".to_string();
    }
    items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
}

/// Result of one evaluation call.  `Unparsed` keeps the raw model text.
enum Assessment {
    Parsed(Evaluation),
    Unparsed { error: String, raw: String },
}

impl Assessment {
    fn report(&self, weights: &RatingWeights) -> String {
        match self {
            Assessment::Parsed(e) => e.report(weights),
            Assessment::Unparsed { error, raw } => {
                format!("The evaluation finished but its result could not be parsed ({error}).\n\nRaw evaluation:\n{raw}")
            }
        }
    }
}

/// Text under review and the criteria to judge it by.
struct Subject {
    content: String,
    criteria: String,
    question: String,
    answer: String,
}

fn subject(instruction: &str, conversation: &[ChatMessage]) -> Subject {
    let answer_idx = conversation
        .iter()
        .rposition(|m| m.role == "assistant" && m.tool_calls.is_empty() && !m.content.trim().is_empty());
    match answer_idx {
        Some(idx) => {
            let question = conversation[..idx]
                .iter()
                .rev()
                .find(|m| m.role == "user")
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let answer = conversation[idx].content.clone();
            Subject {
                content: format!("Question:\n{question}\n\nAnswer:\n{answer}"),
                criteria: format!("{instruction}\n\nDimensions: {DEFAULT_CRITERIA}"),
                question,
                answer,
            }
        }
        None => Subject {
            content: instruction.to_string(),
            criteria: DEFAULT_CRITERIA.to_string(),
            question: instruction.to_string(),
            answer: instruction.to_string(),
        },
    }
}

async fn record(state: &AgentsState, subject: &Subject, eval: &Evaluation, session_id: Option<&str>) {
    let submission = RatingSubmission {
        session_id: session_id.unwrap_or("unknown").to_string(),
        question: subject.question.clone(),
        answer: subject.answer.clone(),
        accuracy_score: eval.accuracy,
        relevance_score: eval.relevance,
        completeness_score: eval.completeness,
        clarity_score: eval.clarity,
        usefulness_score: eval.usefulness,
        agent_name: Some(AGENT_NAME.to_string()),
        ..Default::default()
    };
    if let Err(e) = state.ratings.submit(submission).await {
        warn!(error = %e, "could not record quality rating");
    }
}

pub async fn run(
    state: &AgentsState,
    instruction: &str,
    conversation: &[ChatMessage],
    session_id: Option<&str>,
) -> String {
    let mode = QualityMode::detect(instruction);
    info!(?mode, "quality mode selected");
    let subject = subject(instruction, conversation);
    let system = prompt::preamble(&state.config.prompts_dir, &[])
        .layer(&WorkerKind::Quality.prompt_file())
        .build();

    let assessment = match evaluate(state, &system, &subject.content, &subject.criteria).await {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(error = %e, "quality evaluation failed");
            return FAILURE_REPLY.to_string();
        }
    };
    if let Assessment::Parsed(eval) = &assessment {
        record(state, &subject, eval, session_id).await;
    }
    let weights = state.ratings.weights();

    let needs_rewrite = match (&mode, &assessment) {
        (QualityMode::Evaluate, _) => false,
        (QualityMode::Optimize, _) => true,
        (QualityMode::EvaluateAndOptimize, Assessment::Parsed(e)) => {
            let score = e.composite(&weights);
            let low = score < state.config.quality_threshold;
            if low {
                info!(score, threshold = state.config.quality_threshold, "low quality score, optimising");
            }
            low
        }
        (QualityMode::EvaluateAndOptimize, Assessment::Unparsed { .. }) => false,
    };
    let report = assessment.report(&weights);
    if !needs_rewrite {
        return report;
    }

    match optimize(state, &system, &subject.content, &report).await {
        Ok(improved) => format!("## Optimized answer\n\n{improved}\n\n---\n\n{report}"),
        Err(e) => {
            warn!(error = %e, "quality optimisation failed, returning evaluation only");
            report
        }
    }
}

async fn evaluate(state: &AgentsState, system: &str, content: &str, criteria: &str) -> Result<Assessment, String> {
    let user = PromptBuilder::new(&state.config.prompts_dir)
        .layer("quality_evaluate.md")
        .var("content", content)
        .var("criteria", criteria)
        .build();
    let text = ask(state, system, user).await?;
    Ok(match Evaluation::parse(&text) {
        Ok(e) => Assessment::Parsed(e),
        Err(error) => {
            warn!(%error, "evaluation reply unparsable");
            Assessment::Unparsed { error, raw: text }
        }
    })
}

async fn optimize(state: &AgentsState, system: &str, content: &str, feedback: &str) -> Result<String, String> {
    let user = PromptBuilder::new(&state.config.prompts_dir)
        .layer("quality_optimize.md")
        .var("content", content)
        .var("feedback", feedback)
        .build();
    ask(state, system, user).await
}

async fn ask(state: &AgentsState, system: &str, user: String) -> Result<String, String> {
    let request = ChatRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
        .with_temperature(WorkerKind::Quality.temperature());
    state.llm_chat(request).await.map(|r| r.text).map_err(|e| e.to_string())
}
