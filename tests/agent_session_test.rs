//! Full agent turns over real components: scripted model, real tool
//! registry, real retriever and memory.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use common::{harness, house};
use griya::abtest::{ExperimentConfig, MethodRouter, SearchMethod};
use griya::agent::tools::NoKnowledge;
use griya::agent::{Agent, AgentEvent, ToolRegistry};
use griya::config::{AgentConfig, GeocodingConfig, MemoryConfig};
use griya::geocode::Geocoder;
use griya::llm::{ChatCompletion, ChatMessage, ChatModel, ToolCall, ToolSpec};
use griya::memory::ConversationMemory;
use griya::metrics::MetricsSink;
use griya::Result;

/// Model scripted per call index; repeats the last step when exhausted.
struct ScriptedModel {
    steps: Mutex<Vec<ChatCompletion>>,
}

impl ScriptedModel {
    fn new(mut steps: Vec<ChatCompletion>) -> Self {
        steps.reverse();
        Self {
            steps: Mutex::new(steps),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<ChatCompletion> {
        let mut steps = self.steps.lock();
        if steps.len() > 1 {
            Ok(steps.pop().unwrap())
        } else {
            Ok(steps.last().cloned().unwrap_or_default())
        }
    }
}

fn search_call(args: serde_json::Value) -> ChatCompletion {
    ChatCompletion {
        content: String::new(),
        tool_calls: vec![ToolCall {
            id: "call_search".to_string(),
            name: "search_properties".to_string(),
            arguments: args,
        }],
    }
}

fn final_answer(text: &str) -> ChatCompletion {
    ChatCompletion {
        content: text.to_string(),
        tool_calls: Vec::new(),
    }
}

async fn build_agent(
    model: Arc<dyn ChatModel>,
) -> (Arc<Agent>, Arc<ConversationMemory>, common::Harness) {
    let corpus = vec![
        house(1, "sunggal-1", 900_000_000.0, 3.0, "Sunggal"),
        house(2, "sunggal-2", 1_100_000_000.0, 3.0, "Sunggal"),
        house(3, "helvetia-1", 800_000_000.0, 2.0, "Helvetia"),
    ];
    let harness = harness(corpus, true).await;
    let geocoder = Arc::new(Geocoder::new(&GeocodingConfig::default(), Vec::new()));
    let metrics = Arc::new(MetricsSink::disabled());
    let registry = Arc::new(ToolRegistry::new(
        harness.retriever.clone(),
        harness.backend.clone(),
        Arc::new(NoKnowledge),
        geocoder,
        metrics.clone(),
    ));
    let memory = Arc::new(ConversationMemory::open_in_memory(MemoryConfig::default()).unwrap());
    let agent = Arc::new(Agent::new(
        model,
        registry,
        memory.clone(),
        metrics,
        AgentConfig::default(),
    ));
    (agent, memory, harness)
}

#[tokio::test]
async fn search_turn_streams_tool_events_and_persists_the_turn() {
    let model = Arc::new(ScriptedModel::new(vec![
        search_call(serde_json::json!({
            "property_type": "rumah",
            "bedrooms_min": 3,
            "limit": 5
        })),
        final_answer("Saya menemukan 2 rumah di Sunggal."),
    ]));
    let (agent, memory, _harness) = build_agent(model).await;

    let mut stream = agent.chat_stream(
        "cari rumah 3 kamar".to_string(),
        "thread-1".to_string(),
        "agent-007".to_string(),
        None,
    );

    let mut tool_result_payload = None;
    let mut final_text = None;
    while let Some(event) = stream.recv().await {
        match event {
            AgentEvent::ToolResult { content, .. } => tool_result_payload = Some(content),
            AgentEvent::ResponseToken { text } => final_text = Some(text),
            _ => {}
        }
    }

    let payload: serde_json::Value =
        serde_json::from_str(&tool_result_payload.expect("tool result emitted")).unwrap();
    assert_eq!(payload["returned"], 2);
    assert_eq!(payload["properties"][0]["property_type"], "house");
    assert_eq!(final_text.as_deref(), Some("Saya menemukan 2 rumah di Sunggal."));

    // The whole turn is on disk as adjacent assistant/tool pairs.
    let context = memory.context("thread-1", "agent-007").unwrap();
    assert_eq!(context.len(), 4);
    assert_eq!(context[1].tool_calls[0].name, "search_properties");
    assert_eq!(context[2].tool_call_id.as_deref(), Some("call_search"));
}

#[tokio::test]
async fn invalid_model_criteria_surface_as_tool_errors_not_crashes() {
    let model = Arc::new(ScriptedModel::new(vec![
        search_call(serde_json::json!({"made_up_field": true})),
        final_answer("Maaf, bisa ulangi kriterianya?"),
    ]));
    let (agent, _memory, _harness) = build_agent(model).await;

    // The unknown key fails closed inside the tool; the loop reports the
    // error back to the model, which still produces a final answer.
    let reply = agent
        .chat("cari rumah", "thread-2", "agent-007", None)
        .await
        .unwrap();
    assert_eq!(reply, "Maaf, bisa ulangi kriterianya?");
}

#[tokio::test]
async fn ab_assignment_is_stable_for_a_user_across_a_thousand_calls() {
    let config = ExperimentConfig {
        name: "hybrid-vs-api".to_string(),
        description: String::new(),
        start: chrono::Utc::now().date_naive() - chrono::Duration::days(1),
        end: None,
        weights: vec![
            (SearchMethod::Hybrid6040, 0.5),
            (SearchMethod::ApiOnly, 0.5),
        ],
        consistent_per_user: true,
        enabled: true,
    };
    let router = MethodRouter::new(Some(config), SearchMethod::Hybrid).unwrap();

    let first = router.method_for(Some("abc"));
    for _ in 0..1000 {
        assert_eq!(router.method_for(Some("abc")), first);
    }
}

#[tokio::test]
async fn search_metrics_are_written_when_the_sink_is_enabled() {
    let corpus = vec![house(1, "sunggal-1", 900_000_000.0, 3.0, "Sunggal")];
    let harness = harness(corpus, false).await;

    let dir = tempfile::tempdir().unwrap();
    let metrics = Arc::new(MetricsSink::new(dir.path(), true));
    // Rebuild a retriever with the enabled sink.
    let geocoder = Arc::new(Geocoder::new(&GeocodingConfig::default(), Vec::new()));
    let retriever = griya::retrieve::HybridRetriever::new(
        harness.backend.clone(),
        harness.store.clone(),
        harness.embedder.clone(),
        geocoder,
        Arc::new(MethodRouter::fixed(SearchMethod::ApiOnly)),
        metrics,
        griya::config::RetrievalConfig::default(),
    );

    let criteria = griya::property::SearchCriteria {
        limit: 5,
        ..Default::default()
    };
    retriever.retrieve(&criteria, Some("agent-007")).await.unwrap();

    let date = chrono::Utc::now().format("%Y-%m-%d");
    let path = dir.path().join(format!("search_{date}.jsonl"));
    let content = std::fs::read_to_string(path).unwrap();
    assert_eq!(content.lines().count(), 1);
    let record: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(record["method"], "api_only");
    assert_eq!(record["user_id"], "agent-007");
}
