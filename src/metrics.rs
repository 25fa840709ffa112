//! Append-only JSONL metrics.
//!
//! One file per record kind per calendar day
//! (`metrics/{kind}_{YYYY-MM-DD}.jsonl`). Writes are serialized under a
//! single mutex and the collector can be disabled for tests without touching
//! call sites.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metrics for a single retrieval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRecord {
    pub timestamp: String,
    pub user_id: String,
    pub thread_id: String,

    pub query: String,
    pub method: String,

    pub api_results: usize,
    pub api_latency_ms: u64,
    pub vector_results: usize,
    pub vector_latency_ms: u64,

    pub final_results: usize,
    pub total_latency_ms: u64,

    pub rerank_applied: bool,
    /// Positions that changed between backend order and final order.
    pub rerank_changes: usize,

    pub embedding_cache_hit: bool,
    pub geo_fallback: bool,
}

/// Metrics for one tool execution inside the agent loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRecord {
    pub timestamp: String,
    pub user_id: String,
    pub thread_id: String,

    pub tool_name: String,
    pub success: bool,
    pub error_kind: String,
    pub latency_ms: u64,
    pub result_count: usize,
}

/// Metrics for one finished conversation turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    pub timestamp: String,
    pub user_id: String,
    pub thread_id: String,

    pub tool_hops: usize,
    pub tools_used: Vec<String>,
    pub turn_latency_ms: u64,
    pub completed: bool,
}

/// Thread-safe JSONL sink.
pub struct MetricsSink {
    dir: PathBuf,
    enabled: bool,
    lock: Mutex<()>,
}

impl MetricsSink {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
            lock: Mutex::new(()),
        }
    }

    /// A sink that drops everything; for tests and disabled deployments.
    pub fn disabled() -> Self {
        Self::new("metrics", false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current timestamp in the format every record carries.
    pub fn now_iso() -> String {
        Utc::now().to_rfc3339()
    }

    fn file_path(&self, kind: &str) -> PathBuf {
        let date = Utc::now().format("%Y-%m-%d");
        self.dir.join(format!("{kind}_{date}.jsonl"))
    }

    fn write_line(&self, kind: &str, line: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let _guard = self.lock.lock();
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(kind))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    pub fn log_search(&self, record: &SearchRecord) {
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(err) = self.write_line("search", &line) {
                    log::error!("metrics write failed (search): {err}");
                }
            }
            Err(err) => log::error!("metrics serialize failed (search): {err}"),
        }
    }

    pub fn log_tool(&self, record: &ToolRecord) {
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(err) = self.write_line("tool", &line) {
                    log::error!("metrics write failed (tool): {err}");
                }
            }
            Err(err) => log::error!("metrics serialize failed (tool): {err}"),
        }
    }

    pub fn log_session(&self, record: &SessionRecord) {
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(err) = self.write_line("session", &line) {
                    log::error!("metrics write failed (session): {err}");
                }
            }
            Err(err) => log::error!("metrics serialize failed (session): {err}"),
        }
    }
}
