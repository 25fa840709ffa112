//! Slug-keyed persistent vector store.
//!
//! The store owns one collection directory per embedding model so
//! side-by-side model comparisons never collide. State is a snapshot JSON
//! file plus a manifest recording the vector dimension and model id; both
//! are written atomically (tmp file, fsync, rename). The full entry map is
//! held in memory under a `RwLock`, which gives read-your-write visibility:
//! an upsert is observable by the next search.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{GriyaError, Result};
use crate::property::{
    ListingType, NumRange, Property, PropertyStatus, PropertyType, SourceKind,
};
use crate::vector::filter::MetadataFilter;

const MANIFEST_FILE: &str = "manifest.json";
const SNAPSHOT_FILE: &str = "entries.json";
const MANIFEST_VERSION: u32 = 1;

/// Filterable metadata mirrored from the property snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub property_type: PropertyType,
    pub listing_type: ListingType,
    pub source_kind: SourceKind,
    pub status: PropertyStatus,
    pub city: String,
    pub district: String,
    pub area: String,
    pub price: NumRange,
    pub bedrooms: Option<NumRange>,
    pub bathrooms: Option<NumRange>,
    pub floors: Option<NumRange>,
    pub land_area: Option<NumRange>,
    pub building_area: Option<NumRange>,
    pub in_complex: bool,
    pub facing: Option<String>,
}

impl EntryMetadata {
    /// Mirror the filterable fields of a property snapshot.
    pub fn from_property(property: &Property) -> Self {
        Self {
            property_type: property.property_type,
            listing_type: property.listing_type,
            source_kind: property.source_kind,
            status: property.status,
            city: property.city.clone(),
            district: property.district.clone(),
            area: property.area.clone(),
            price: property.price,
            bedrooms: property.bedrooms,
            bathrooms: property.bathrooms,
            floors: property.floors,
            land_area: property.land_area,
            building_area: property.building_area,
            in_complex: property.in_complex(),
            facing: property.facing.clone(),
        }
    }
}

/// One indexed property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub slug: String,
    pub source_kind: SourceKind,
    pub embedding: Vec<f32>,
    pub metadata: EntryMetadata,
}

/// Collection statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStats {
    pub count: usize,
    pub dim: usize,
    pub model_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    model_id: String,
    dim: usize,
    count: usize,
}

/// Persistent dense-vector index with metadata filtering.
pub struct VectorStore {
    dir: PathBuf,
    model_id: String,
    entries: RwLock<HashMap<String, IndexEntry>>,
    dim: RwLock<Option<usize>>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("dir", &self.dir)
            .field("model_id", &self.model_id)
            .field("count", &self.entries.read().len())
            .finish()
    }
}

impl VectorStore {
    /// Open (or create) the collection for `model_id` under `root`.
    ///
    /// The directory name carries the model id so different embedding models
    /// persist side by side: `<root>/<collection>-<model_id>/`.
    pub fn open(root: impl AsRef<Path>, collection: &str, model_id: &str) -> Result<Self> {
        let sanitized_model = model_id.replace('/', "-");
        let dir = root.as_ref().join(format!("{collection}-{sanitized_model}"));
        fs::create_dir_all(&dir)
            .map_err(|err| GriyaError::vector_io(format!("create {dir:?}: {err}")))?;

        let store = Self {
            dir,
            model_id: model_id.to_string(),
            entries: RwLock::new(HashMap::new()),
            dim: RwLock::new(None),
        };
        store.load()?;
        Ok(store)
    }

    fn load(&self) -> Result<()> {
        let manifest_path = self.dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Ok(());
        }

        let manifest_bytes = fs::read(&manifest_path)
            .map_err(|err| GriyaError::vector_io(format!("read manifest: {err}")))?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|err| GriyaError::vector_io(format!("parse manifest: {err}")))?;

        if manifest.version != MANIFEST_VERSION {
            return Err(GriyaError::vector_io(format!(
                "manifest version mismatch: expected {MANIFEST_VERSION}, found {}",
                manifest.version
            )));
        }
        if manifest.model_id != self.model_id {
            return Err(GriyaError::vector_io(format!(
                "collection was built with model '{}', opened with '{}'",
                manifest.model_id, self.model_id
            )));
        }

        let snapshot_path = self.dir.join(SNAPSHOT_FILE);
        if snapshot_path.exists() {
            let bytes = fs::read(&snapshot_path)
                .map_err(|err| GriyaError::vector_io(format!("read snapshot: {err}")))?;
            let list: Vec<IndexEntry> = serde_json::from_slice(&bytes)
                .map_err(|err| GriyaError::vector_io(format!("parse snapshot: {err}")))?;
            let mut entries = self.entries.write();
            for entry in list {
                entries.insert(entry.slug.clone(), entry);
            }
        }

        if manifest.dim > 0 {
            *self.dim.write() = Some(manifest.dim);
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let entries = self.entries.read();
        let list: Vec<&IndexEntry> = entries.values().collect();
        let snapshot = serde_json::to_vec(&list)?;
        let manifest = serde_json::to_vec(&Manifest {
            version: MANIFEST_VERSION,
            model_id: self.model_id.clone(),
            dim: self.dim.read().unwrap_or(0),
            count: entries.len(),
        })?;
        drop(entries);

        self.write_atomic(SNAPSHOT_FILE, &snapshot)?;
        self.write_atomic(MANIFEST_FILE, &manifest)
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let tmp_path = self.dir.join(format!("{name}.tmp"));
        let final_path = self.dir.join(name);

        let mut file = File::create(&tmp_path)
            .map_err(|err| GriyaError::vector_io(format!("create {tmp_path:?}: {err}")))?;
        file.write_all(bytes)
            .map_err(|err| GriyaError::vector_io(format!("write {tmp_path:?}: {err}")))?;
        file.sync_all()
            .map_err(|err| GriyaError::vector_io(format!("sync {tmp_path:?}: {err}")))?;
        drop(file);

        fs::rename(&tmp_path, &final_path)
            .map_err(|err| GriyaError::vector_io(format!("rename to {final_path:?}: {err}")))
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            return Err(GriyaError::vector_io("embedding must not be empty"));
        }
        let mut dim = self.dim.write();
        match *dim {
            Some(expected) if expected != embedding.len() => Err(GriyaError::vector_io(format!(
                "dimension mismatch: collection is {expected}, got {}",
                embedding.len()
            ))),
            Some(_) => Ok(()),
            None => {
                *dim = Some(embedding.len());
                Ok(())
            }
        }
    }

    /// Insert or replace the entry for `entry.slug`. Idempotent: re-upserting
    /// the same entry leaves the observable state unchanged.
    pub fn upsert(&self, entry: IndexEntry) -> Result<()> {
        self.check_dimension(&entry.embedding)?;
        self.entries.write().insert(entry.slug.clone(), entry);
        self.persist()
    }

    /// Upsert a batch, reporting per-item results. A failing item does not
    /// abort the rest; the snapshot is persisted once at the end.
    pub fn upsert_batch(&self, batch: Vec<IndexEntry>) -> Result<Vec<(String, Result<()>)>> {
        let mut results = Vec::with_capacity(batch.len());
        for entry in batch {
            let slug = entry.slug.clone();
            let outcome = self.check_dimension(&entry.embedding).map(|()| {
                self.entries.write().insert(slug.clone(), entry);
            });
            results.push((slug, outcome));
        }
        self.persist()?;
        Ok(results)
    }

    /// Remove the entry for `slug`. Succeeds whether or not it existed.
    pub fn delete(&self, slug: &str) -> Result<()> {
        self.entries.write().remove(slug);
        self.persist()
    }

    /// Drop every entry and reset the recorded dimension.
    pub fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        *self.dim.write() = None;
        self.persist()
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.entries.read().contains_key(slug)
    }

    pub fn get(&self, slug: &str) -> Option<IndexEntry> {
        self.entries.read().get(slug).cloned()
    }

    /// Nearest-neighbor search.
    ///
    /// Returns up to `k` `(slug, score)` pairs sorted by descending cosine
    /// similarity normalized into `[0, 1]`, ties broken by slug so ordering
    /// is stable. An entry participates only when `filter` (if any) accepts
    /// its metadata.
    pub fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(String, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if let Some(dim) = *self.dim.read()
            && vector.len() != dim
        {
            return Err(GriyaError::vector_io(format!(
                "query dimension mismatch: collection is {dim}, got {}",
                vector.len()
            )));
        }

        let entries = self.entries.read();
        let mut hits: Vec<(String, f32)> = entries
            .values()
            .filter(|entry| filter.is_none_or(|f| f.matches(&entry.metadata)))
            .map(|entry| {
                let score = normalized_cosine(vector, &entry.embedding);
                (entry.slug.clone(), score)
            })
            .collect();
        drop(entries);

        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(k);
        Ok(hits)
    }

    pub fn stats(&self) -> VectorStats {
        VectorStats {
            count: self.entries.read().len(),
            dim: self.dim.read().unwrap_or(0),
            model_id: self.model_id.clone(),
        }
    }
}

/// Cosine similarity mapped from `[-1, 1]` into `[0, 1]`.
fn normalized_cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(slug: &str, embedding: Vec<f32>) -> IndexEntry {
        let mut property = crate::property::tests::sample_property();
        property.slug = slug.to_string();
        IndexEntry {
            slug: slug.to_string(),
            source_kind: SourceKind::Listing,
            embedding,
            metadata: EntryMetadata::from_property(&property),
        }
    }

    #[test]
    fn upsert_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path(), "properties", "test-model").unwrap();

        store.upsert(entry("a", vec![1.0, 0.0])).unwrap();
        store.upsert(entry("a", vec![1.0, 0.0])).unwrap();

        let stats = store.stats();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.dim, 2);
    }

    #[test]
    fn dimension_mismatch_is_refused() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path(), "properties", "test-model").unwrap();

        store.upsert(entry("a", vec![1.0, 0.0, 0.0])).unwrap();
        let err = store.upsert(entry("b", vec![1.0, 0.0])).unwrap_err();
        assert_eq!(err.kind(), "vector_io");
        assert_eq!(store.stats().count, 1);
    }

    #[test]
    fn search_orders_by_similarity_with_stable_ties() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path(), "properties", "test-model").unwrap();

        store.upsert(entry("far", vec![0.0, 1.0])).unwrap();
        store.upsert(entry("near-b", vec![1.0, 0.0])).unwrap();
        store.upsert(entry("near-a", vec![1.0, 0.0])).unwrap();

        let hits = store.search(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, "near-a");
        assert_eq!(hits[1].0, "near-b");
        assert_eq!(hits[2].0, "far");
        assert!(hits[0].1 > hits[2].1);
        for (_, score) in &hits {
            assert!((0.0..=1.0).contains(score));
        }
    }

    #[test]
    fn search_applies_metadata_filter() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path(), "properties", "test-model").unwrap();

        let mut rental = entry("rental", vec![1.0, 0.0]);
        rental.metadata.listing_type = ListingType::Rent;
        store.upsert(rental).unwrap();
        store.upsert(entry("sale", vec![1.0, 0.0])).unwrap();

        let filter = MetadataFilter {
            listing_type: Some(ListingType::Sale),
            ..Default::default()
        };
        let hits = store.search(&[1.0, 0.0], 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "sale");
    }

    #[test]
    fn delete_is_silent_for_missing_slugs() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path(), "properties", "test-model").unwrap();
        store.delete("never-existed").unwrap();
        store.upsert(entry("a", vec![1.0, 0.0])).unwrap();
        store.delete("a").unwrap();
        assert_eq!(store.stats().count, 0);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = VectorStore::open(dir.path(), "properties", "test-model").unwrap();
            store.upsert(entry("a", vec![0.5, 0.5])).unwrap();
        }
        let store = VectorStore::open(dir.path(), "properties", "test-model").unwrap();
        let stats = store.stats();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.dim, 2);
        assert!(store.contains("a"));
    }

    #[test]
    fn collections_are_partitioned_by_model() {
        let dir = TempDir::new().unwrap();
        let small = VectorStore::open(dir.path(), "properties", "model-small").unwrap();
        let large = VectorStore::open(dir.path(), "properties", "model-large").unwrap();

        small.upsert(entry("a", vec![1.0, 0.0])).unwrap();
        large.upsert(entry("a", vec![1.0, 0.0, 0.0])).unwrap();

        assert_eq!(small.stats().dim, 2);
        assert_eq!(large.stats().dim, 3);

        // Reopening under the recorded model id works; neither collection
        // sees the other's entries.
        drop(small);
        let reopened = VectorStore::open(dir.path(), "properties", "model-small").unwrap();
        assert_eq!(reopened.stats().count, 1);
        assert_eq!(reopened.stats().dim, 2);
    }

    #[test]
    fn batch_reports_per_item_outcomes() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path(), "properties", "test-model").unwrap();

        let results = store
            .upsert_batch(vec![
                entry("good", vec![1.0, 0.0]),
                entry("bad", vec![1.0, 0.0, 0.0]),
                entry("also-good", vec![0.0, 1.0]),
            ])
            .unwrap();

        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert!(results[2].1.is_ok());
        assert_eq!(store.stats().count, 2);
    }
}
