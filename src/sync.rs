//! Vector index synchronization.
//!
//! Pulls `need_ingest` records from the Property Backend, builds the
//! embedding document for each, embeds, upserts into the vector store and
//! acknowledges successfully indexed records. Unacknowledged records stay
//! pending and reappear next cycle, so every step is safe to retry.
//!
//! Cycles are strictly sequential per process; the scheduler runs an initial
//! pass on startup and then one cycle every N minutes.

pub mod document;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::backend::{IngestKey, PropertyBackend};
use crate::embedding::CachedEmbedder;
use crate::error::Result;
use crate::vector::store::{EntryMetadata, IndexEntry, VectorStore};

pub use self::document::build_embedding_document;

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub attempted: usize,
    pub upserted: usize,
    pub failed: usize,
    pub deleted: usize,
}

/// Flag-based incremental sync pipeline.
pub struct SyncPipeline {
    backend: Arc<dyn PropertyBackend>,
    embedder: Arc<CachedEmbedder>,
    store: Arc<VectorStore>,
    batch_limit: usize,
    deletion_cursor: Mutex<Option<String>>,
}

impl SyncPipeline {
    pub fn new(
        backend: Arc<dyn PropertyBackend>,
        embedder: Arc<CachedEmbedder>,
        store: Arc<VectorStore>,
        batch_limit: usize,
    ) -> Self {
        Self {
            backend,
            embedder,
            store,
            batch_limit: batch_limit.max(1),
            deletion_cursor: Mutex::new(None),
        }
    }

    /// Run a single cycle: fetch, embed, upsert, acknowledge, clean up.
    ///
    /// A failed embed or upsert for one record does not block the rest; the
    /// record stays pending and is retried next cycle. A failed
    /// acknowledgement is logged but not fatal (duplicate upserts are
    /// harmless).
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let pending = self.backend.pending_ingest(self.batch_limit).await?;
        let mut report = CycleReport {
            attempted: pending.len(),
            ..Default::default()
        };

        let mut entries = Vec::new();
        let mut keys: Vec<(String, IngestKey)> = Vec::new();
        for property in &pending {
            let text = build_embedding_document(property);
            match self.embedder.embed(&text).await {
                Ok((embedding, _cache_hit)) => {
                    entries.push(IndexEntry {
                        slug: property.slug.clone(),
                        source_kind: property.source_kind,
                        embedding,
                        metadata: EntryMetadata::from_property(property),
                    });
                    keys.push((
                        property.slug.clone(),
                        IngestKey {
                            source: property.source_kind,
                            id: property.id,
                        },
                    ));
                }
                Err(err) => {
                    report.failed += 1;
                    log::warn!("embed failed for {}: {err}", property.slug);
                }
            }
        }

        let mut acked = Vec::new();
        if !entries.is_empty() {
            let results = self.store.upsert_batch(entries)?;
            for (slug, outcome) in results {
                match outcome {
                    Ok(()) => {
                        report.upserted += 1;
                        if let Some((_, key)) = keys.iter().find(|(s, _)| *s == slug) {
                            acked.push(key.clone());
                        }
                    }
                    Err(err) => {
                        report.failed += 1;
                        log::warn!("upsert failed for {slug}: {err}");
                    }
                }
            }
        }

        if !acked.is_empty()
            && let Err(err) = self.backend.mark_ingested(&acked).await
        {
            // The records will be re-fetched and re-upserted next cycle.
            log::warn!("mark_ingested failed for {} records: {err}", acked.len());
        }

        report.deleted = self.apply_deletions().await?;

        log::info!(
            "sync cycle: attempted={} upserted={} failed={} deleted={}",
            report.attempted,
            report.upserted,
            report.failed,
            report.deleted
        );
        Ok(report)
    }

    async fn apply_deletions(&self) -> Result<usize> {
        let cursor = self.deletion_cursor.lock().clone();
        let slugs = match self.backend.deleted_since(cursor.as_deref()).await {
            Ok(slugs) => slugs,
            Err(err) => {
                log::warn!("deleted_since failed: {err}");
                return Ok(0);
            }
        };
        let mut deleted = 0;
        for slug in &slugs {
            self.store.delete(slug)?;
            deleted += 1;
        }
        if let Some(last) = slugs.last() {
            *self.deletion_cursor.lock() = Some(last.clone());
        }
        Ok(deleted)
    }

    /// Full reindex: republish every record, clear the collection, then
    /// drain pending batches until the backend reports nothing left.
    pub async fn reindex_all(&self) -> Result<CycleReport> {
        self.backend.reset_ingest().await?;
        self.store.clear()?;

        let mut total = CycleReport::default();
        loop {
            let report = self.run_cycle().await?;
            total.attempted += report.attempted;
            total.upserted += report.upserted;
            total.failed += report.failed;
            total.deleted += report.deleted;
            if report.attempted == 0 {
                break;
            }
        }
        Ok(total)
    }

    /// Scheduler loop: one pass immediately, then every `interval`.
    ///
    /// Cycles never overlap; an error is logged and the loop keeps going.
    pub async fn run_scheduler(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_cycle().await {
                log::error!("sync cycle failed: {err}");
            }
        }
    }
}
