use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Content ---

/// Scalar metadata attached to a content item by the plugin that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// One piece of content yielded by a source plugin. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// `<source_id>_<native_id>`, globally unique.
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl ContentItem {
    pub fn new(
        source_id: &str,
        native_id: &str,
        title: impl Into<String>,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("{source_id}_{native_id}"),
            source_id: source_id.to_string(),
            title: title.into(),
            body: body.into(),
            created_at,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

// --- Entities ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Company,
    Technology,
    Product,
    Institution,
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Company => "company",
            EntityType::Technology => "technology",
            EntityType::Product => "product",
            EntityType::Institution => "institution",
            EntityType::Other => "other",
        }
    }

    /// Lenient parse of extractor output. Unknown labels map to `Other`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        match label.as_str() {
            "person" | "people" | "individual" | "researcher" | "founder" => EntityType::Person,
            "company" | "companies" | "organization" | "organisation" | "startup" | "vendor"
            | "msp" => EntityType::Company,
            "technology" | "technologies" | "tech" | "framework" | "technique" => {
                EntityType::Technology
            }
            "product" | "products" | "service" | "services" | "product/service" => {
                EntityType::Product
            }
            "institution" | "institutions" | "research institution" | "university" | "lab"
            | "research lab" => EntityType::Institution,
            _ => EntityType::Other,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An entity mention extracted from one content item, not yet reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub source_id: String,
    pub source_item_id: String,
    pub confidence: f64,
    pub context_snippet: String,
}

impl CandidateEntity {
    /// Build a candidate attributed to `item`. Confidence is clamped to [0, 1].
    pub fn from_item(
        item: &ContentItem,
        name: impl Into<String>,
        entity_type: EntityType,
        confidence: f64,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type,
            source_id: item.source_id.clone(),
            source_item_id: item.id.clone(),
            confidence: clamp_confidence(confidence),
            context_snippet: String::new(),
        }
    }

    pub fn with_context(mut self, snippet: impl Into<String>) -> Self {
        self.context_snippet = snippet.into();
        self
    }
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Deduplicated, merged representation of every mention of one real-world entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: Uuid,
    pub name: String,
    pub entity_type: EntityType,
    pub aliases: BTreeSet<String>,
    /// Highest confidence observed across all merged mentions.
    pub confidence: f64,
    pub mention_count: u64,
    pub source_ids: BTreeSet<String>,
    /// Empty only when the entity was created without an embedding.
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub degraded: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl CanonicalEntity {
    /// A fresh canonical record seeded from its first mention.
    pub fn from_candidate(candidate: &CandidateEntity, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: candidate.name.trim().to_string(),
            entity_type: candidate.entity_type,
            aliases: BTreeSet::from([candidate.name.trim().to_string()]),
            confidence: clamp_confidence(candidate.confidence),
            mention_count: 1,
            source_ids: BTreeSet::from([candidate.source_id.clone()]),
            degraded: embedding.is_empty(),
            embedding,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Fold another mention into this record.
    pub fn absorb(&mut self, candidate: &CandidateEntity) {
        let alias = candidate.name.trim();
        if !alias.is_empty() {
            self.aliases.insert(alias.to_string());
        }
        self.mention_count += 1;
        self.confidence = self.confidence.max(clamp_confidence(candidate.confidence));
        self.source_ids.insert(candidate.source_id.clone());
        self.last_seen = Utc::now();
    }
}

// --- Plugins ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Search,
    Stream,
    Historical,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Search => write!(f, "search"),
            Capability::Stream => write!(f, "stream"),
            Capability::Historical => write!(f, "historical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests_per_minute: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
        }
    }
}

/// What a registered source declares about itself. Read-only after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub source_id: String,
    pub capabilities: BTreeSet<Capability>,
    pub requires_auth: bool,
    pub rate_limit: RateLimit,
}

impl PluginDescriptor {
    pub fn new(source_id: &str, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            source_id: source_id.to_string(),
            capabilities: capabilities.into_iter().collect(),
            requires_auth: false,
            rate_limit: RateLimit::default(),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Per-source registration record, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub source_id: String,
    /// Which built-in plugin serves this source (`feed`, `youtube`, `reddit`).
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub auth: BTreeMap<String, String>,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    pub fn new(source_id: &str, kind: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            kind: kind.to_string(),
            enabled: true,
            auth: BTreeMap::new(),
            rate_limit: RateLimit::default(),
            settings: BTreeMap::new(),
        }
    }

    pub fn with_setting(mut self, key: &str, value: &str) -> Self {
        self.settings.insert(key.to_string(), value.to_string());
        self
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}
