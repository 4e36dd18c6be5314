use crate::filter::SchemeFilter;
use crate::models::{ChunkMatch, Scheme, SchemeDraft, SchemeSummary, UserProfile, VectorSearchOptions};
use crate::SchemeError;
use async_trait::async_trait;

/// Storage boundary for schemes and their chunk vectors. Chunks are only
/// ever written together with their scheme and never modified afterwards.
#[async_trait]
pub trait SchemeRepository: Send + Sync {
    /// Persists the scheme and all of its chunks as one unit. Either every
    /// chunk becomes searchable together with the scheme or nothing does.
    async fn create_scheme(&self, draft: &SchemeDraft) -> Result<Scheme, SchemeError>;

    async fn get_scheme(&self, id: &str) -> Result<Option<Scheme>, SchemeError>;

    async fn list_schemes(&self) -> Result<Vec<SchemeSummary>, SchemeError>;

    /// Nearest chunks to `query_vector` whose owning scheme passes `filter`,
    /// best first, at most one per scheme.
    async fn search_chunks(
        &self,
        query_vector: &[f32],
        filter: &SchemeFilter,
        options: VectorSearchOptions,
    ) -> Result<Vec<ChunkMatch>, SchemeError>;
}

/// External reasoning collaborator that turns scheme text plus a profile
/// into a free-form eligibility verdict.
#[async_trait]
pub trait EligibilityJudge: Send + Sync {
    async fn judge(
        &self,
        scheme: &Scheme,
        scheme_text: &str,
        profile: &UserProfile,
    ) -> Result<String, SchemeError>;
}
