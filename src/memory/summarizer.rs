//! Rolling conversation summarization.
//!
//! Summaries feed the context window as a single system message, so they
//! must stay short and carry the facts a follow-up turn needs: what the user
//! is looking for, constraints already stated, and where the conversation
//! left off.

use crate::error::Result;
use crate::llm::{ChatMessage, ChatModel};

const SUMMARIZATION_PROMPT: &str = "Anda merangkum percakapan chatbot properti.\n\
Buat ringkasan 2-3 kalimat yang mempertahankan: kriteria pencarian yang sudah \
disebut pengguna (lokasi, budget, tipe properti, jumlah kamar), properti yang \
sudah dibahas, dan status percakapan. Gunakan bahasa Indonesia bila percakapan \
berbahasa Indonesia. Jawab hanya dengan ringkasannya.";

/// Summarize `[existing_summary?, older_tail]` into a fresh rolling summary.
pub async fn summarize(
    model: &dyn ChatModel,
    existing_summary: Option<&str>,
    transcript: &[(String, String)],
) -> Result<String> {
    if transcript.is_empty() {
        return Ok(existing_summary.unwrap_or_default().to_string());
    }

    let mut body = String::new();
    if let Some(summary) = existing_summary.filter(|s| !s.is_empty()) {
        body.push_str("Ringkasan sebelumnya:\n");
        body.push_str(summary);
        body.push_str("\n\nPercakapan lanjutan:\n");
    } else {
        body.push_str("Percakapan:\n");
    }
    for (role, content) in transcript {
        let speaker = match role.as_str() {
            "user" => "Pengguna",
            "assistant" => "Asisten",
            other => other,
        };
        // Tool payloads are noise at summary granularity.
        if role == "tool" {
            continue;
        }
        body.push_str(speaker);
        body.push_str(": ");
        body.push_str(content);
        body.push('\n');
    }

    let messages = [
        ChatMessage::system(SUMMARIZATION_PROMPT),
        ChatMessage::user(body),
    ];
    let completion = model.complete(&messages, &[]).await?;
    let summary = completion.content.trim().to_string();

    if summary.is_empty() {
        // A silent model must not wipe the existing summary.
        return Ok(existing_summary.unwrap_or_default().to_string());
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatCompletion, ToolSpec};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct CapturingModel {
        seen: Mutex<String>,
        reply: String,
    }

    #[async_trait]
    impl ChatModel for CapturingModel {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<ChatCompletion> {
            *self.seen.lock() = messages.last().unwrap().content.clone();
            Ok(ChatCompletion {
                content: self.reply.clone(),
                tool_calls: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn includes_previous_summary_and_skips_tool_rows() {
        let model = CapturingModel {
            seen: Mutex::new(String::new()),
            reply: "Ringkasan baru.".to_string(),
        };
        let transcript = vec![
            ("user".to_string(), "cari rumah 3 kamar".to_string()),
            ("tool".to_string(), "{\"results\": []}".to_string()),
            ("assistant".to_string(), "ini hasilnya".to_string()),
        ];
        let summary = summarize(&model, Some("Pengguna menyapa."), &transcript)
            .await
            .unwrap();

        assert_eq!(summary, "Ringkasan baru.");
        let seen = model.seen.lock().clone();
        assert!(seen.contains("Ringkasan sebelumnya:"));
        assert!(seen.contains("Pengguna: cari rumah 3 kamar"));
        assert!(!seen.contains("results"));
    }

    #[tokio::test]
    async fn empty_model_reply_keeps_the_old_summary() {
        let model = CapturingModel {
            seen: Mutex::new(String::new()),
            reply: "  ".to_string(),
        };
        let transcript = vec![("user".to_string(), "halo".to_string())];
        let summary = summarize(&model, Some("Lama."), &transcript).await.unwrap();
        assert_eq!(summary, "Lama.");
    }
}
