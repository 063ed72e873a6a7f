//! Decision engine: should a query go to the knowledge base, plain chat,
//! or a combination of tools?
//!
//! The LLM classifies the query first.  When its reply cannot be used the
//! engine falls back to keyword matching, which only picks the knowledge
//! base when more than 30% of the knowledge keywords appear in the query.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, ChatRequest};
use crate::subsystems::agents::AgentsState;
use crate::subsystems::agents::core::json::parse_loose;
use crate::subsystems::agents::core::prompt::PromptBuilder;
use crate::subsystems::tools::KB_SEARCH;

const DECISION_TEMPERATURE: f32 = 0.3;

/// Keyword score above which the fallback routes to the knowledge base.
const KEYWORD_THRESHOLD: f64 = 0.3;

const FALLBACK_CONFIDENCE: f64 = 0.5;

const KNOWLEDGE_KEYWORDS: &[&str] = &[
    "文档", "资料", "手册", "规范", "标准", "说明", "指南",
    "api", "接口", "功能", "配置", "参数", "属性",
    "如何", "怎么", "什么是", "怎样", "方法", "步骤",
    "教程", "流程", "定义", "概念", "术语", "解释",
    "知识库", "查询", "搜索", "查找", "了解", "学习",
    "文件", "文本", "内容", "信息", "数据", "记录",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    KnowledgeBase,
    GeneralChat,
    MultiTool,
}

impl DecisionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "knowledge_base" => Some(Self::KnowledgeBase),
            "general_chat" => Some(Self::GeneralChat),
            "multi_tool" => Some(Self::MultiTool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub decision_type: DecisionType,
    pub confidence: f64,
    pub reasoning: String,
    pub recommended_tools: Vec<String>,
    pub should_search_kb: bool,
}

/// The classifier's reply.  Missing fields take neutral defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Analysis {
    primary_type: Option<String>,
    confidence: Option<f64>,
    reasoning: String,
    secondary_types: Vec<String>,
    should_search_kb: bool,
}

/// Share of knowledge keywords found in `query` (case-insensitive), 0..=1.
pub fn keyword_score(query: &str) -> f64 {
    let lower = query.to_lowercase();
    let matched = KNOWLEDGE_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();
    (matched as f64 / KNOWLEDGE_KEYWORDS.len() as f64).min(1.0)
}

fn from_keywords(kb_score: f64) -> Decision {
    if kb_score > KEYWORD_THRESHOLD {
        Decision {
            decision_type: DecisionType::KnowledgeBase,
            confidence: kb_score,
            reasoning: "keyword match suggests knowledge_base".into(),
            recommended_tools: vec![KB_SEARCH.to_string()],
            should_search_kb: true,
        }
    } else {
        Decision {
            decision_type: DecisionType::GeneralChat,
            confidence: FALLBACK_CONFIDENCE,
            reasoning: "no specific tool matched, using general chat".into(),
            recommended_tools: Vec::new(),
            should_search_kb: false,
        }
    }
}

fn from_analysis(analysis: Analysis) -> Decision {
    let primary = analysis.primary_type.as_deref().unwrap_or("general_chat");
    let Some(decision_type) = DecisionType::parse(primary) else {
        return Decision {
            decision_type: DecisionType::GeneralChat,
            confidence: FALLBACK_CONFIDENCE,
            reasoning: format!("unsupported decision type: {primary}"),
            recommended_tools: Vec::new(),
            should_search_kb: false,
        };
    };
    let recommended_tools = match decision_type {
        DecisionType::KnowledgeBase => vec![KB_SEARCH.to_string()],
        DecisionType::MultiTool if analysis.secondary_types.iter().any(|t| t == "knowledge_base") => {
            vec![KB_SEARCH.to_string()]
        }
        _ => Vec::new(),
    };
    Decision {
        decision_type,
        confidence: analysis.confidence.filter(|c| c.is_finite()).unwrap_or(FALLBACK_CONFIDENCE).clamp(0.0, 1.0),
        reasoning: analysis.reasoning,
        recommended_tools,
        should_search_kb: analysis.should_search_kb || decision_type == DecisionType::KnowledgeBase,
    }
}

async fn analyze(state: &AgentsState, query: &str) -> Option<Analysis> {
    let system = PromptBuilder::new(&state.config.prompts_dir).layer("decision.md").build();
    let user = PromptBuilder::new(&state.config.prompts_dir)
        .layer("decision_analyze.md")
        .var("query", query)
        .build();
    let request = ChatRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
        .with_temperature(DECISION_TEMPERATURE);
    let text = match state.llm_chat(request).await {
        Ok(r) => r.text,
        Err(e) => {
            warn!(error = %e, "decision analysis call failed");
            return None;
        }
    };
    match parse_loose::<Analysis>(&text) {
        Ok(a) => Some(a),
        Err(e) => {
            warn!(error = %e, "decision analysis unparsable");
            None
        }
    }
}

/// Classify `query`.  Never fails: an unusable analysis falls back to
/// keyword matching.
pub async fn decide(state: &AgentsState, query: &str) -> Decision {
    let kb_score = keyword_score(query);
    debug!(kb_score, "keyword score");
    let decision = match analyze(state, query).await {
        Some(analysis) => from_analysis(analysis),
        None => from_keywords(kb_score),
    };
    info!(
        decision_type = ?decision.decision_type,
        confidence = decision.confidence,
        tools = ?decision.recommended_tools,
        "decision made"
    );
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmResponse;
    use crate::subsystems::agents::test_support::Harness;

    const MANY_KEYWORDS: &str = "API 文档 资料 手册 规范 标准 说明 指南 接口 功能 配置 参数";

    #[test]
    fn keyword_score_is_case_insensitive() {
        assert_eq!(keyword_score("hello"), 0.0);
        assert_eq!(keyword_score("API"), keyword_score("api"));
        assert!(keyword_score(MANY_KEYWORDS) > KEYWORD_THRESHOLD);
        assert!(keyword_score("如何配置API") < KEYWORD_THRESHOLD);
    }

    #[tokio::test]
    async fn knowledge_base_decision_from_analysis() {
        let h = Harness::start([LlmResponse::text(
            r#"```json
{"primary_type": "knowledge_base", "confidence": 0.95, "reasoning": "config question", "should_search_kb": false}
```"#,
        )])
        .await;
        let d = decide(&h.state, "how do I configure the API?").await;
        assert_eq!(d.decision_type, DecisionType::KnowledgeBase);
        assert_eq!(d.confidence, 0.95);
        assert_eq!(d.recommended_tools, vec![KB_SEARCH.to_string()]);
        assert!(d.should_search_kb);
        h.stop().await;
    }

    #[tokio::test]
    async fn general_chat_decision_from_analysis() {
        let h = Harness::start([LlmResponse::text(
            r#"{"primary_type": "general_chat", "confidence": 0.8, "reasoning": "small talk"}"#,
        )])
        .await;
        let d = decide(&h.state, "good morning").await;
        assert_eq!(d.decision_type, DecisionType::GeneralChat);
        assert!(d.recommended_tools.is_empty());
        assert!(!d.should_search_kb);
        assert_eq!(d.reasoning, "small talk");
        h.stop().await;
    }

    #[tokio::test]
    async fn multi_tool_decision_picks_secondary_tools() {
        let h = Harness::start([
            LlmResponse::text(
                r#"{"primary_type": "multi_tool", "confidence": 0.7, "secondary_types": ["knowledge_base", "calculator"], "should_search_kb": true}"#,
            ),
            LlmResponse::text(r#"{"primary_type": "multi_tool", "secondary_types": ["calculator"]}"#),
        ])
        .await;
        let d = decide(&h.state, "look up the rate and compute the total").await;
        assert_eq!(d.decision_type, DecisionType::MultiTool);
        assert_eq!(d.recommended_tools, vec![KB_SEARCH.to_string()]);
        assert!(d.should_search_kb);

        let d = decide(&h.state, "compute things").await;
        assert_eq!(d.decision_type, DecisionType::MultiTool);
        assert!(d.recommended_tools.is_empty());
        assert!(!d.should_search_kb);
        assert_eq!(d.confidence, FALLBACK_CONFIDENCE);
        h.stop().await;
    }

    #[tokio::test]
    async fn unsupported_type_becomes_general_chat() {
        let h = Harness::start([LlmResponse::text(r#"{"primary_type": "calculator", "confidence": 0.9}"#)]).await;
        let d = decide(&h.state, "2 + 2").await;
        assert_eq!(d.decision_type, DecisionType::GeneralChat);
        assert_eq!(d.confidence, FALLBACK_CONFIDENCE);
        assert!(d.reasoning.contains("calculator"));
        h.stop().await;
    }

    #[tokio::test]
    async fn unparsable_analysis_falls_back_to_keywords() {
        let h = Harness::start([LlmResponse::text("I think it is a lookup."), LlmResponse::text("chat, probably")]).await;
        let d = decide(&h.state, MANY_KEYWORDS).await;
        assert_eq!(d.decision_type, DecisionType::KnowledgeBase);
        assert!((d.confidence - 12.0 / 37.0).abs() < 1e-9);
        assert_eq!(d.recommended_tools, vec![KB_SEARCH.to_string()]);

        let d = decide(&h.state, "tell me a joke").await;
        assert_eq!(d.decision_type, DecisionType::GeneralChat);
        assert_eq!(d.confidence, FALLBACK_CONFIDENCE);
        assert!(!d.should_search_kb);
        h.stop().await;
    }
}
