//! HTTP adapter for an external entity-extraction service.
//!
//! The service receives one content item as JSON and answers with a list of
//! entities, either as a bare array or wrapped in `{"entities": [...]}`:
//!
//! ```json
//! [{"name": "OpenAI", "type": "company", "subtype": "AI vendor", "confidence": 0.95}]
//! ```

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use insightgraph_common::{
    normalize_name, CandidateEntity, ContentItem, EntityExtractor, EntityType, InsightError,
};

/// Rows without a confidence get this value.
const DEFAULT_CONFIDENCE: f64 = 0.7;

#[derive(Serialize)]
struct ExtractRequest<'a> {
    id: &'a str,
    source_id: &'a str,
    title: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExtractResponse {
    Bare(Vec<RawEntity>),
    Wrapped { entities: Vec<RawEntity> },
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    entity_type: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    context: Option<String>,
}

/// Parse an extractor response into candidates attributed to `item`.
/// Nameless rows are dropped, and repeated (name, type) pairs within one
/// response collapse to the highest-confidence row.
pub fn parse_candidates(
    item: &ContentItem,
    body: &[u8],
) -> Result<Vec<CandidateEntity>, InsightError> {
    let response: ExtractResponse = serde_json::from_slice(body)
        .map_err(|e| InsightError::ExtractionFailed(format!("malformed extractor response: {e}")))?;
    let rows = match response {
        ExtractResponse::Bare(rows) | ExtractResponse::Wrapped { entities: rows } => rows,
    };

    let mut out: Vec<CandidateEntity> = Vec::with_capacity(rows.len());
    let mut seen: HashMap<(String, EntityType), usize> = HashMap::new();
    for row in rows {
        let Some(name) = row.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) else {
            continue;
        };
        let entity_type = row
            .entity_type
            .as_deref()
            .map(EntityType::from_label)
            .unwrap_or(EntityType::Other);
        let snippet = row.context.or(row.subtype).unwrap_or_default();
        let candidate = CandidateEntity::from_item(
            item,
            name,
            entity_type,
            row.confidence.unwrap_or(DEFAULT_CONFIDENCE),
        )
        .with_context(snippet);

        let key = (normalize_name(&candidate.name), entity_type);
        match seen.get(&key) {
            Some(&idx) if out[idx].confidence >= candidate.confidence => {}
            Some(&idx) => out[idx] = candidate,
            None => {
                seen.insert(key, out.len());
                out.push(candidate);
            }
        }
    }
    Ok(out)
}

pub struct HttpEntityExtractor {
    http: reqwest::Client,
    url: String,
}

impl HttpEntityExtractor {
    pub fn new(url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl EntityExtractor for HttpEntityExtractor {
    async fn extract(&self, item: &ContentItem) -> Result<Vec<CandidateEntity>, InsightError> {
        let failed = |e: reqwest::Error| InsightError::ExtractionFailed(e.to_string());
        let response = self
            .http
            .post(&self.url)
            .json(&ExtractRequest {
                id: &item.id,
                source_id: &item.source_id,
                title: &item.title,
                body: &item.body,
            })
            .send()
            .await
            .map_err(failed)?;

        let status = response.status();
        if !status.is_success() {
            return Err(InsightError::ExtractionFailed(format!(
                "extractor returned {status}"
            )));
        }
        let body = response.bytes().await.map_err(failed)?;
        let candidates = parse_candidates(item, &body)?;
        debug!(item_id = item.id.as_str(), candidates = candidates.len(), "Extracted entities");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn item() -> ContentItem {
        ContentItem::new("yt", "abc", "AI news", "OpenAI and Microsoft...", Utc::now())
    }

    #[test]
    fn parses_bare_array() {
        let body = br#"[
            {"name": "OpenAI", "type": "company", "subtype": "AI vendor", "confidence": 0.95, "sme_relevance": true},
            {"name": "Retrieval-Augmented Generation", "type": "technology", "confidence": 0.85}
        ]"#;
        let candidates = parse_candidates(&item(), body).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name, "OpenAI");
        assert_eq!(candidates[0].entity_type, EntityType::Company);
        assert_eq!(candidates[0].source_id, "yt");
        assert_eq!(candidates[0].source_item_id, "yt_abc");
        assert_eq!(candidates[0].context_snippet, "AI vendor");
        assert_eq!(candidates[1].entity_type, EntityType::Technology);
    }

    #[test]
    fn parses_wrapped_object_and_drops_nameless_rows() {
        let body = br#"{"entities": [{"type": "person"}, {"name": "  ", "type": "person"}, {"name": "Dario Amodei", "type": "person"}]}"#;
        let candidates = parse_candidates(&item(), body).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "Dario Amodei");
        assert_eq!(candidates[0].confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn repeated_entities_keep_highest_confidence() {
        let body = br#"[
            {"name": "GPT-4", "type": "product", "confidence": 0.6},
            {"name": "gpt 4", "type": "product", "confidence": 0.9},
            {"name": "GPT-4", "type": "technology", "confidence": 0.5}
        ]"#;
        let candidates = parse_candidates(&item(), body).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name, "gpt 4");
        assert_eq!(candidates[0].confidence, 0.9);
    }

    #[test]
    fn empty_list_is_valid() {
        assert!(parse_candidates(&item(), b"[]").unwrap().is_empty());
    }

    #[test]
    fn malformed_response_is_extraction_failure() {
        let err = parse_candidates(&item(), b"Sorry, I can't help").unwrap_err();
        assert!(matches!(err, InsightError::ExtractionFailed(_)));
    }
}
