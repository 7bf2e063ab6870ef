//! Canonical entity storage.
//!
//! [`EntityStore`] is the boundary the dedup engine works against.
//! [`MemoryEntityStore`] keeps everything in process and persists to a JSON
//! snapshot between runs.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use insightgraph_common::{CanonicalEntity, DedupConfig, IdentityHash};

use crate::bloom::ScalableBloomFilter;
use crate::index::VectorIndex;

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<CanonicalEntity>>;

    /// Full replace. Also refreshes the entity's vector in the similarity index.
    async fn put(&self, entity: CanonicalEntity) -> Result<()>;

    /// Nearest canonical entities by cosine similarity, best first.
    async fn query_approximate(&self, embedding: &[f32], k: usize) -> Result<Vec<(Uuid, f64)>>;

    /// Membership check. `false` means the identity was never recorded.
    async fn might_contain_identity(&self, identity: &IdentityHash) -> bool;

    async fn find_by_identity(&self, identity: &IdentityHash) -> Result<Option<Uuid>>;

    async fn record_identity(&self, identity: IdentityHash, id: Uuid) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryEntityStore
// ---------------------------------------------------------------------------

pub struct MemoryEntityStore {
    entities: RwLock<HashMap<Uuid, CanonicalEntity>>,
    identities: RwLock<HashMap<IdentityHash, Uuid>>,
    bloom: Mutex<ScalableBloomFilter>,
    index: RwLock<VectorIndex>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    saved_at: DateTime<Utc>,
    entities: Vec<CanonicalEntity>,
    /// Identity hash (hex) → canonical id.
    identities: Vec<(String, Uuid)>,
}

impl MemoryEntityStore {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            identities: RwLock::new(HashMap::new()),
            bloom: Mutex::new(ScalableBloomFilter::new(
                config.bloom_expected_items,
                config.bloom_false_positive_rate,
            )),
            index: RwLock::new(VectorIndex::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entities.read().expect("entity lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every canonical entity, in creation order.
    pub fn all(&self) -> Vec<CanonicalEntity> {
        let mut all: Vec<CanonicalEntity> = self
            .entities
            .read()
            .expect("entity lock poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|e| e.id);
        all
    }

    /// Most mentioned entities first; equal counts order by name.
    pub fn top_by_mentions(&self, limit: usize) -> Vec<CanonicalEntity> {
        let mut all = self.all();
        all.sort_by(|a, b| {
            b.mention_count
                .cmp(&a.mention_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        all.truncate(limit);
        all
    }

    /// Write a JSON snapshot. The file is written to a temp file in the same
    /// directory and renamed into place, so readers never see a torn file.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            saved_at: Utc::now(),
            entities: self.all(),
            identities: self
                .identities
                .read()
                .expect("identity lock poisoned")
                .iter()
                .map(|(hash, id)| (hash.to_hex(), *id))
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create snapshot dir {}", dir.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;

        info!(
            path = %path.display(),
            entities = snapshot.entities.len(),
            "Saved entity snapshot"
        );
        Ok(())
    }

    /// Load a snapshot, rebuilding the bloom filter and vector index.
    pub fn load_snapshot(path: &Path, config: &DedupConfig) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;

        let sized = DedupConfig {
            bloom_expected_items: config
                .bloom_expected_items
                .max(snapshot.identities.len() * 2),
            ..config.clone()
        };
        let store = Self::new(&sized);
        {
            let mut entities = store.entities.write().expect("entity lock poisoned");
            let mut index = store.index.write().expect("index lock poisoned");
            for entity in snapshot.entities {
                if !entity.embedding.is_empty() {
                    if let Err(e) = index.upsert(entity.id, entity.embedding.clone()) {
                        warn!(entity_id = %entity.id, error = %e, "Snapshot vector not indexed");
                    }
                }
                entities.insert(entity.id, entity);
            }
        }
        {
            let mut identities = store.identities.write().expect("identity lock poisoned");
            let mut bloom = store.bloom.lock().expect("bloom lock poisoned");
            for (hex, id) in snapshot.identities {
                let Some(hash) = IdentityHash::from_hex(&hex) else {
                    warn!(identity = hex.as_str(), "Skipping malformed identity in snapshot");
                    continue;
                };
                bloom.insert(&hash);
                identities.insert(hash, id);
            }
        }

        info!(
            path = %path.display(),
            entities = store.len(),
            saved_at = %snapshot.saved_at,
            "Loaded entity snapshot"
        );
        Ok(store)
    }
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new(&DedupConfig::default())
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn get(&self, id: Uuid) -> Result<Option<CanonicalEntity>> {
        Ok(self
            .entities
            .read()
            .expect("entity lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn put(&self, entity: CanonicalEntity) -> Result<()> {
        {
            let mut index = self.index.write().expect("index lock poisoned");
            if entity.embedding.is_empty() {
                index.remove(&entity.id);
            } else {
                index.upsert(entity.id, entity.embedding.clone())?;
            }
        }
        self.entities
            .write()
            .expect("entity lock poisoned")
            .insert(entity.id, entity);
        Ok(())
    }

    async fn query_approximate(&self, embedding: &[f32], k: usize) -> Result<Vec<(Uuid, f64)>> {
        Ok(self
            .index
            .read()
            .expect("index lock poisoned")
            .query(embedding, k))
    }

    async fn might_contain_identity(&self, identity: &IdentityHash) -> bool {
        self.bloom.lock().expect("bloom lock poisoned").contains(identity)
    }

    async fn find_by_identity(&self, identity: &IdentityHash) -> Result<Option<Uuid>> {
        Ok(self
            .identities
            .read()
            .expect("identity lock poisoned")
            .get(identity)
            .copied())
    }

    async fn record_identity(&self, identity: IdentityHash, id: Uuid) -> Result<()> {
        let mut identities = self.identities.write().expect("identity lock poisoned");
        if identities.insert(identity.clone(), id).is_none() {
            self.bloom.lock().expect("bloom lock poisoned").insert(&identity);
        }
        Ok(())
    }
}
