use crate::embeddings::EmbeddingClient;
use crate::filter::SchemeFilter;
use crate::models::{RetrievalOptions, SchemeSummary, SearchHit, VectorSearchOptions};
use crate::requests::{JudgeRequest, SearchRequest};
use crate::traits::{EligibilityJudge, SchemeRepository};
use crate::SchemeError;
use std::sync::Arc;
use tracing::{debug, info};

/// Query side of the system: semantic search narrowed by the caller's
/// demographic profile, plus per-scheme eligibility verdicts.
#[derive(Clone)]
pub struct RetrievalService {
    embeddings: EmbeddingClient,
    repository: Arc<dyn SchemeRepository>,
    judge: Option<Arc<dyn EligibilityJudge>>,
    options: RetrievalOptions,
}

impl RetrievalService {
    pub fn new(
        embeddings: EmbeddingClient,
        repository: Arc<dyn SchemeRepository>,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            embeddings,
            repository,
            judge: None,
            options,
        }
    }

    pub fn with_judge(mut self, judge: Arc<dyn EligibilityJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, SchemeError> {
        request.validate()?;

        let timeout = self.options.timeout;
        tokio::time::timeout(timeout, self.run_search(request))
            .await
            .map_err(|_| SchemeError::Timeout(timeout))?
    }

    async fn run_search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, SchemeError> {
        let query_vector = self.embeddings.embed(request.query.trim()).await?;

        let filter = request
            .user_profile
            .as_ref()
            .map_or_else(SchemeFilter::unrestricted, SchemeFilter::from_profile);

        let limit = request.top_k.unwrap_or(self.options.top_k);
        let options = VectorSearchOptions {
            limit,
            num_candidates: self.options.num_candidates.max(limit),
        };

        debug!(
            predicates = filter.predicates().len(),
            limit,
            num_candidates = options.num_candidates,
            "vector search"
        );

        let matches = self
            .repository
            .search_chunks(&query_vector, &filter, options)
            .await?;

        info!(query = %request.query, hits = matches.len(), "search complete");
        Ok(matches.into_iter().map(|found| found.into_hit()).collect())
    }

    /// Loads the scheme, hands its full text and the profile to the judge
    /// and returns the verdict unchanged.
    pub async fn judge(&self, request: &JudgeRequest) -> Result<String, SchemeError> {
        request.validate()?;

        let judge = self.judge.as_ref().ok_or_else(|| SchemeError::Judge {
            details: "no eligibility judge is configured".to_string(),
            transient: false,
        })?;

        let scheme_id = request.scheme_id.trim();
        let scheme = self
            .repository
            .get_scheme(scheme_id)
            .await?
            .ok_or_else(|| SchemeError::NotFound(scheme_id.to_string()))?;

        let scheme_text = scheme.aggregated_content();
        let verdict = judge
            .judge(&scheme, &scheme_text, &request.user_profile)
            .await?;

        info!(scheme_id, "eligibility verdict produced");
        Ok(verdict)
    }

    pub async fn list_schemes(&self) -> Result<Vec<SchemeSummary>, SchemeError> {
        self.repository.list_schemes().await
    }
}
