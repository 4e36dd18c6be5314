//! In-process [`SchemeRepository`] backed by a `RwLock`.
//!
//! Vector search is brute force: every stored chunk is scored against the
//! query, each scheme is represented by its best chunk, the best
//! `num_candidates` schemes form the candidate pool, and the demographic
//! filter is applied to that pool.

use crate::filter::SchemeFilter;
use crate::models::{ChunkMatch, Scheme, SchemeDraft, SchemeSummary, VectorSearchOptions};
use crate::store::{check_dimensions, compare_matches, rank_matches, relevance};
use crate::traits::SchemeRepository;
use crate::SchemeError;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const BACKEND: &str = "memory";

#[derive(Default)]
struct State {
    schemes: Vec<Scheme>,
    dimensions: Option<usize>,
}

#[derive(Default)]
pub struct InMemorySchemeRepository {
    state: RwLock<State>,
}

impl InMemorySchemeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, SchemeError> {
        self.state
            .read()
            .map_err(|_| SchemeError::storage(BACKEND, "lock poisoned", false))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, SchemeError> {
        self.state
            .write()
            .map_err(|_| SchemeError::storage(BACKEND, "lock poisoned", false))
    }
}

#[async_trait]
impl SchemeRepository for InMemorySchemeRepository {
    async fn create_scheme(&self, draft: &SchemeDraft) -> Result<Scheme, SchemeError> {
        if draft.metadata.name.trim().is_empty() {
            return Err(SchemeError::validation("scheme name is required"));
        }

        let mut state = self.write()?;
        if state.schemes.iter().any(|scheme| scheme.id == draft.id) {
            return Err(SchemeError::storage(
                BACKEND,
                format!("scheme {} already exists", draft.id),
                false,
            ));
        }

        let dimensions = check_dimensions(&draft.chunks, state.dimensions)?;
        let scheme = draft.clone().into_scheme(Utc::now());

        state.dimensions = dimensions;
        state.schemes.push(scheme.clone());
        Ok(scheme)
    }

    async fn get_scheme(&self, id: &str) -> Result<Option<Scheme>, SchemeError> {
        let state = self.read()?;
        Ok(state.schemes.iter().find(|scheme| scheme.id == id).cloned())
    }

    async fn list_schemes(&self) -> Result<Vec<SchemeSummary>, SchemeError> {
        let state = self.read()?;
        Ok(state.schemes.iter().map(Scheme::summary).collect())
    }

    async fn search_chunks(
        &self,
        query_vector: &[f32],
        filter: &SchemeFilter,
        options: VectorSearchOptions,
    ) -> Result<Vec<ChunkMatch>, SchemeError> {
        let state = self.read()?;

        if let Some(expected) = state.dimensions {
            if expected != query_vector.len() {
                return Err(SchemeError::DimensionMismatch {
                    expected,
                    found: query_vector.len(),
                });
            }
        }

        let mut pool: Vec<(ChunkMatch, &Scheme)> = state
            .schemes
            .iter()
            .filter_map(|scheme| {
                scheme
                    .text_chunks
                    .iter()
                    .map(|chunk| ChunkMatch {
                        scheme: scheme.summary(),
                        chunk_index: chunk.chunk_index,
                        content: chunk.content.clone(),
                        source_page: chunk.source_page,
                        score: relevance(query_vector, &chunk.vector),
                    })
                    .min_by(compare_matches)
                    .map(|best| (best, scheme))
            })
            .collect();

        pool.sort_by(|(left, _), (right, _)| compare_matches(left, right));
        pool.truncate(options.num_candidates.max(options.limit));

        let admitted = pool
            .into_iter()
            .filter(|(_, scheme)| filter.matches(&scheme.filters))
            .map(|(candidate, _)| candidate)
            .collect();

        Ok(rank_matches(admitted, options.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, NewScheme, SchemeFilters, UserProfile};

    fn draft(id: &str, state: &[&str], vectors: &[Vec<f32>]) -> SchemeDraft {
        SchemeDraft {
            id: id.to_string(),
            metadata: NewScheme {
                name: format!("Scheme {id}"),
                filters: SchemeFilters {
                    state: state.iter().map(|value| (*value).to_string()).collect(),
                    ..SchemeFilters::default()
                },
                ..NewScheme::default()
            },
            original_source_ref: format!("sha256:{id}"),
            chunks: vectors
                .iter()
                .enumerate()
                .map(|(index, vector)| Chunk {
                    chunk_index: index as u32,
                    content: format!("{id} chunk {index}"),
                    vector: vector.clone(),
                    source_page: 1,
                })
                .collect(),
        }
    }

    fn options() -> VectorSearchOptions {
        VectorSearchOptions {
            limit: 5,
            num_candidates: 50,
        }
    }

    fn state_filter(state: &str) -> SchemeFilter {
        SchemeFilter::from_profile(&UserProfile {
            state: Some(state.to_string()),
            ..UserProfile::default()
        })
    }

    #[tokio::test]
    async fn schemes_round_trip_with_their_chunks() {
        let repository = InMemorySchemeRepository::new();
        let created = repository
            .create_scheme(&draft("a", &[], &[vec![1.0, 0.0], vec![0.0, 1.0]]))
            .await
            .expect("create succeeds");

        let loaded = repository
            .get_scheme("a")
            .await
            .expect("read succeeds")
            .expect("scheme exists");
        assert_eq!(loaded, created);
        assert_eq!(loaded.text_chunks.len(), 2);
        assert!(repository.get_scheme("missing").await.expect("read succeeds").is_none());
    }

    #[tokio::test]
    async fn state_filter_excludes_restricted_schemes() {
        let repository = InMemorySchemeRepository::new();
        repository
            .create_scheme(&draft("punjab", &["Punjab"], &[vec![1.0, 0.0]]))
            .await
            .expect("create succeeds");
        repository
            .create_scheme(&draft("open", &[], &[vec![0.9, 0.1]]))
            .await
            .expect("create succeeds");

        let kerala = repository
            .search_chunks(&[1.0, 0.0], &state_filter("Kerala"), options())
            .await
            .expect("search succeeds");
        let ids: Vec<&str> = kerala.iter().map(|hit| hit.scheme.id.as_str()).collect();
        assert_eq!(ids, vec!["open"]);

        let punjab = repository
            .search_chunks(&[1.0, 0.0], &state_filter("Punjab"), options())
            .await
            .expect("search succeeds");
        let ids: Vec<&str> = punjab.iter().map(|hit| hit.scheme.id.as_str()).collect();
        assert_eq!(ids, vec!["punjab", "open"]);
    }

    #[tokio::test]
    async fn schemes_without_chunks_are_listed_but_never_matched() {
        let repository = InMemorySchemeRepository::new();
        repository
            .create_scheme(&draft("empty", &[], &[]))
            .await
            .expect("create succeeds");

        let listed = repository.list_schemes().await.expect("list succeeds");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].chunk_count, 0);

        let hits = repository
            .search_chunks(&[1.0, 0.0], &SchemeFilter::unrestricted(), options())
            .await
            .expect("search succeeds");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn heterogeneous_dimensions_are_fatal() {
        let repository = InMemorySchemeRepository::new();
        repository
            .create_scheme(&draft("a", &[], &[vec![1.0, 0.0]]))
            .await
            .expect("create succeeds");

        let result = repository
            .create_scheme(&draft("b", &[], &[vec![1.0, 0.0, 0.0]]))
            .await;
        assert!(matches!(result, Err(SchemeError::DimensionMismatch { .. })));
        assert_eq!(repository.list_schemes().await.expect("list succeeds").len(), 1);
    }

    #[tokio::test]
    async fn candidate_pool_is_cut_before_filtering() {
        let repository = InMemorySchemeRepository::new();
        repository
            .create_scheme(&draft("near", &["Punjab"], &[vec![1.0, 0.0]]))
            .await
            .expect("create succeeds");
        repository
            .create_scheme(&draft("far", &[], &[vec![0.0, 1.0]]))
            .await
            .expect("create succeeds");

        let narrow = VectorSearchOptions {
            limit: 1,
            num_candidates: 1,
        };
        let hits = repository
            .search_chunks(&[1.0, 0.0], &state_filter("Kerala"), narrow)
            .await
            .expect("search succeeds");
        assert!(hits.is_empty());

        let hits = repository
            .search_chunks(&[1.0, 0.0], &state_filter("Kerala"), options())
            .await
            .expect("search succeeds");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].scheme.id, "far");
    }

    #[tokio::test]
    async fn long_schemes_do_not_crowd_out_others() {
        let repository = InMemorySchemeRepository::new();
        let many = vec![vec![1.0, 0.0]; 60];
        repository
            .create_scheme(&draft("big", &[], &many))
            .await
            .expect("create succeeds");
        repository
            .create_scheme(&draft("small", &[], &[vec![0.9, 0.1]]))
            .await
            .expect("create succeeds");

        let hits = repository
            .search_chunks(&[1.0, 0.0], &SchemeFilter::unrestricted(), options())
            .await
            .expect("search succeeds");

        let ids: Vec<&str> = hits.iter().map(|hit| hit.scheme.id.as_str()).collect();
        assert_eq!(ids, vec!["big", "small"]);
        assert_eq!(hits[0].chunk_index, 0);
    }
}
