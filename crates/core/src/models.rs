use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::chunking::ChunkingConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum BenefitsType {
    #[default]
    Financial,
    Subsidy,
    Insurance,
    Service,
}

impl std::str::FromStr for BenefitsType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "financial" => Ok(Self::Financial),
            "subsidy" => Ok(Self::Subsidy),
            "insurance" => Ok(Self::Insurance),
            "service" => Ok(Self::Service),
            other => Err(format!(
                "unknown benefits type '{other}', expected one of Financial, Subsidy, Insurance, Service"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Benefits {
    #[serde(rename = "type")]
    pub kind: BenefitsType,
    pub max_value: f64,
    pub description: String,
}

/// Allow-lists per demographic axis. An empty list means the scheme places
/// no restriction on that axis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SchemeFilters {
    #[serde(default)]
    pub state: Vec<String>,
    #[serde(default)]
    pub gender: Vec<String>,
    #[serde(default)]
    pub caste: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_index: u32,
    pub content: String,
    pub vector: Vec<f32>,
    pub source_page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scheme {
    pub id: String,
    pub name: String,
    pub benefits: Benefits,
    pub required_documents: Vec<String>,
    pub filters: SchemeFilters,
    pub original_source_ref: String,
    pub text_chunks: Vec<Chunk>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scheme {
    pub fn summary(&self) -> SchemeSummary {
        SchemeSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            benefits: self.benefits.clone(),
            chunk_count: self.text_chunks.len(),
        }
    }

    pub fn is_searchable(&self) -> bool {
        !self.text_chunks.is_empty()
    }

    /// Every chunk's content in stored order, separated by blank lines.
    pub fn aggregated_content(&self) -> String {
        self.text_chunks
            .iter()
            .map(|chunk| chunk.content.trim())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Metadata supplied by the uploader; chunks and identity are assigned
/// during ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NewScheme {
    pub name: String,
    pub benefits: Benefits,
    pub required_documents: Vec<String>,
    pub filters: SchemeFilters,
}

/// A fully assembled scheme handed to the repository in one write. The id
/// is fixed before the write so a retried write targets the same record.
#[derive(Debug, Clone)]
pub struct SchemeDraft {
    pub id: String,
    pub metadata: NewScheme,
    pub original_source_ref: String,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemeSummary {
    pub id: String,
    pub name: String,
    pub benefits: Benefits,
    pub chunk_count: usize,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserProfile {
    pub state: Option<String>,
    pub gender: Option<String>,
    #[serde(alias = "caste", alias = "socialCategory")]
    pub social_category: Option<String>,
    /// Anything else the user told us (age, income, land holding, ...).
    #[serde(default, flatten)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub scheme: SchemeSummary,
    pub snippet: String,
    pub score: f64,
    pub source_page: u32,
}

/// One chunk returned by a repository vector search, already joined with
/// its owning scheme's summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMatch {
    pub scheme: SchemeSummary,
    pub chunk_index: u32,
    pub content: String,
    pub source_page: u32,
    pub score: f64,
}

impl SchemeDraft {
    pub fn into_scheme(self, now: DateTime<Utc>) -> Scheme {
        Scheme {
            id: self.id,
            name: self.metadata.name,
            benefits: self.metadata.benefits,
            required_documents: self.metadata.required_documents,
            filters: self.metadata.filters,
            original_source_ref: self.original_source_ref,
            text_chunks: self.chunks,
            created_at: now,
            updated_at: now,
        }
    }
}

impl ChunkMatch {
    pub fn into_hit(self) -> SearchHit {
        SearchHit {
            scheme: self.scheme,
            snippet: self.content,
            score: self.score,
            source_page: self.source_page,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorSearchOptions {
    pub limit: usize,
    pub num_candidates: usize,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunking: ChunkingConfig,
    pub embedding_concurrency: usize,
    pub embedding_batch_size: usize,
    pub timeout: Duration,
    pub storage_retry: RetryPolicy,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            embedding_concurrency: 5,
            embedding_batch_size: 16,
            timeout: Duration::from_secs(300),
            storage_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub num_candidates: usize,
    pub timeout: Duration,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            num_candidates: 50,
            timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benefits_type_parses_case_insensitively() {
        assert_eq!("subsidy".parse::<BenefitsType>(), Ok(BenefitsType::Subsidy));
        assert_eq!(" Insurance ".parse::<BenefitsType>(), Ok(BenefitsType::Insurance));
        assert!("loan".parse::<BenefitsType>().is_err());
    }

    #[test]
    fn profile_accepts_caste_alias_and_keeps_extra_attributes() {
        let profile: UserProfile = serde_json::from_str(
            r#"{"state":"Punjab","caste":"OBC","landHolding":"2 acres","age":34}"#,
        )
        .expect("profile json should parse");

        assert_eq!(profile.state.as_deref(), Some("Punjab"));
        assert_eq!(profile.social_category.as_deref(), Some("OBC"));
        assert_eq!(
            profile.attributes.get("landHolding").and_then(|value| value.as_str()),
            Some("2 acres")
        );
        assert_eq!(profile.attributes.get("age"), Some(&serde_json::json!(34)));
    }

    #[test]
    fn camel_case_social_category_drives_the_caste_filter() {
        let profile: UserProfile =
            serde_json::from_str(r#"{"state":"Kerala","socialCategory":"SC"}"#)
                .expect("profile json should parse");

        assert_eq!(profile.social_category.as_deref(), Some("SC"));
        assert!(profile.attributes.is_empty());

        let filter = crate::filter::SchemeFilter::from_profile(&profile);
        let tribes_only = SchemeFilters {
            caste: vec!["ST".to_string()],
            ..SchemeFilters::default()
        };
        let castes_only = SchemeFilters {
            caste: vec!["SC".to_string()],
            ..SchemeFilters::default()
        };
        assert!(!filter.matches(&tribes_only));
        assert!(filter.matches(&castes_only));
    }
}
