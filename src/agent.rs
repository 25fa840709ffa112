//! Tool-calling agent loop.
//!
//! One user turn runs a PLAN -> EXECUTE loop: the model either answers or
//! requests tool calls; executed tool results are appended and the model
//! plans again. A hop ceiling caps runaway loops and forces a fixed final
//! answer. Only this loop writes to memory, and it writes a whole turn as a
//! single commit.
//!
//! - [`events`] - stream event kinds
//! - [`tools`] - the bounded tool registry

pub mod events;
pub mod tools;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::abtest::SearchMethod;
use crate::config::AgentConfig;
use crate::error::{GriyaError, Result};
use crate::llm::{ChatMessage, ChatModel};
use crate::memory::ConversationMemory;
use crate::metrics::{MetricsSink, SessionRecord};

pub use self::events::AgentEvent;
pub use self::tools::{KnowledgeHit, KnowledgeIndex, ToolRegistry};

/// Fixed reply when the hop ceiling is exceeded. Surfaced as a normal final
/// response, never as a 5xx.
const HOP_EXHAUSTED_REPLY: &str = "Maaf, saya belum berhasil menyelesaikan permintaan ini. \
Coba persempit kriteria pencarian Anda atau ajukan pertanyaan yang lebih spesifik.";

const SYSTEM_PROMPT: &str = "Anda adalah asisten pencarian properti untuk agen real estate di Indonesia.\n\
\n\
ATURAN BAHASA:\n\
- Selalu ikuti bahasa pengguna (Indonesia/Inggris/campuran) dan gaya bicaranya.\n\
\n\
PANDUAN JAWABAN:\n\
- Gunakan tool search_properties untuk setiap pencarian properti; jangan mengarang data.\n\
- Sertakan harga, lokasi, kamar tidur, dan luas untuk setiap properti.\n\
- Untuk pencarian dekat landmark, sebutkan konteks landmark-nya.\n\
- Untuk pertanyaan pengetahuan (sertifikat, pajak, proses jual beli), gunakan get_knowledge.\n\
- Jika kriteria pengguna belum jelas, ajukan satu pertanyaan klarifikasi.";

/// The agent: model + tools + memory, glued by the turn loop.
pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    memory: Arc<ConversationMemory>,
    metrics: Arc<MetricsSink>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        memory: Arc<ConversationMemory>,
        metrics: Arc<MetricsSink>,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            tools,
            memory,
            metrics,
            config,
        }
    }

    /// Run one turn to completion and return the final assistant text.
    pub async fn chat(
        &self,
        message: &str,
        thread_id: &str,
        user_id: &str,
        method: Option<SearchMethod>,
    ) -> Result<String> {
        let (sink, mut drain) = mpsc::channel(64);
        // Drain events nobody is listening to.
        tokio::spawn(async move { while drain.recv().await.is_some() {} });
        self.run_turn(message, thread_id, user_id, method, sink).await
    }

    /// Run one turn, streaming events. The stream ends with `Done` (possibly
    /// preceded by `Error`). Dropping the receiver cancels the turn.
    pub fn chat_stream(
        self: &Arc<Self>,
        message: String,
        thread_id: String,
        user_id: String,
        method: Option<SearchMethod>,
    ) -> mpsc::Receiver<AgentEvent> {
        let (sink, stream) = mpsc::channel(64);
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            let result = agent
                .run_turn(&message, &thread_id, &user_id, method, sink.clone())
                .await;
            if let Err(err) = result {
                let _ = sink
                    .send(AgentEvent::Error {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    })
                    .await;
                let _ = sink.send(AgentEvent::Done).await;
            }
        });
        stream
    }

    async fn run_turn(
        &self,
        message: &str,
        thread_id: &str,
        user_id: &str,
        method: Option<SearchMethod>,
        sink: mpsc::Sender<AgentEvent>,
    ) -> Result<String> {
        let deadline = Duration::from_millis(self.config.turn_deadline_ms);
        let turn = self.turn_loop(message, thread_id, user_id, method, &sink);
        match tokio::time::timeout(deadline, turn).await {
            Ok(result) => result,
            Err(_) => Err(GriyaError::timeout("turn deadline exceeded")),
        }
    }

    async fn turn_loop(
        &self,
        message: &str,
        thread_id: &str,
        user_id: &str,
        method: Option<SearchMethod>,
        sink: &mpsc::Sender<AgentEvent>,
    ) -> Result<String> {
        let started = Instant::now();
        let _ = sink
            .send(AgentEvent::UserInput {
                text: message.to_string(),
            })
            .await;

        // Message assembly: system prompt, summary + window from memory,
        // then the current user turn.
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        messages.extend(self.memory.context(thread_id, user_id)?);
        messages.push(ChatMessage::user(message));

        // Everything this turn appends to memory, committed at the end as
        // one transaction.
        let mut turn_messages = vec![ChatMessage::user(message)];
        let mut tools_used: Vec<String> = Vec::new();
        let specs = self.tools.specs();
        let tool_deadline = Duration::from_millis(self.config.tool_deadline_ms);

        let mut hops = 0usize;
        let final_text = loop {
            if sink.is_closed() {
                // Caller disconnected: stop planning, discard the turn.
                return Err(GriyaError::internal("client disconnected"));
            }
            let completion = self.model.complete(&messages, &specs).await?;

            if completion.tool_calls.is_empty() {
                // RESPOND.
                let _ = sink
                    .send(AgentEvent::ResponseToken {
                        text: completion.content.clone(),
                    })
                    .await;
                turn_messages.push(ChatMessage::assistant(completion.content.clone()));
                break completion.content;
            }

            hops += 1;
            if hops > self.config.max_tool_hops {
                // Ceiling exceeded: force RESPOND with the fixed reply. The
                // model's pending tool requests are discarded.
                log::warn!(
                    "tool hop ceiling ({}) exceeded for thread '{thread_id}'",
                    self.config.max_tool_hops
                );
                let _ = sink
                    .send(AgentEvent::ResponseToken {
                        text: HOP_EXHAUSTED_REPLY.to_string(),
                    })
                    .await;
                turn_messages.push(ChatMessage::assistant(HOP_EXHAUSTED_REPLY));
                break HOP_EXHAUSTED_REPLY.to_string();
            }

            // EXECUTE: run the requested tools, in request order, each under
            // the per-tool deadline.
            let assistant = ChatMessage::assistant_with_tools(
                completion.content.clone(),
                completion.tool_calls.clone(),
            );
            messages.push(assistant.clone());
            turn_messages.push(assistant);

            for call in &completion.tool_calls {
                let _ = sink
                    .send(AgentEvent::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        args: call.arguments.clone(),
                    })
                    .await;
                tools_used.push(call.name.clone());

                let user = if user_id.is_empty() { None } else { Some(user_id) };
                let executed =
                    tokio::time::timeout(tool_deadline, self.tools.execute(call, user, method))
                        .await
                        .map_err(|_| GriyaError::timeout(format!("tool '{}'", call.name)))
                        .and_then(|inner| inner);

                // Tool failures are reported to the model, which may retry
                // differently or explain; they do not abort the turn.
                let content = match executed {
                    Ok(content) => content,
                    Err(err) => {
                        log::warn!("tool '{}' failed: {err}", call.name);
                        serde_json::json!({ "error": err.kind(), "message": err.to_string() })
                            .to_string()
                    }
                };

                let _ = sink
                    .send(AgentEvent::ToolResult {
                        id: call.id.clone(),
                        content: content.clone(),
                    })
                    .await;
                let tool_message = ChatMessage::tool(call.id.clone(), call.name.clone(), content);
                messages.push(tool_message.clone());
                turn_messages.push(tool_message);
            }
            // Back to PLAN.
        };

        // Single-commit memory write, then rolling summarization.
        self.memory.append_turn(thread_id, user_id, &turn_messages)?;
        if let Err(err) = self
            .memory
            .maybe_summarize(thread_id, user_id, self.model.as_ref())
            .await
        {
            log::warn!("summarization failed for thread '{thread_id}': {err}");
        }

        self.metrics.log_session(&SessionRecord {
            timestamp: MetricsSink::now_iso(),
            user_id: user_id.to_string(),
            thread_id: thread_id.to_string(),
            tool_hops: hops,
            tools_used,
            turn_latency_ms: started.elapsed().as_millis() as u64,
            completed: true,
        });

        let _ = sink.send(AgentEvent::Done).await;
        Ok(final_text)
    }
}
