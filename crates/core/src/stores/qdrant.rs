use crate::error::status_is_transient;
use crate::filter::SchemeFilter;
use crate::models::{
    Chunk, ChunkMatch, Scheme, SchemeDraft, SchemeSummary, VectorSearchOptions,
};
use crate::store::{check_dimensions, rank_matches};
use crate::traits::SchemeRepository;
use crate::SchemeError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const BACKEND: &str = "qdrant";
const UPSERT_BATCH: usize = 64;
const SCROLL_PAGE: usize = 256;

/// Connection settings for a Qdrant instance.
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub endpoint: String,
    /// Chunk collection; scheme records go to `{collection}_schemes`.
    pub collection: String,
    pub vector_size: usize,
    /// Bound on every HTTP request, so a hung server surfaces as a
    /// transient storage error.
    pub timeout: Duration,
}

/// Schemes and chunks in two Qdrant collections: `{collection}` holds one
/// point per chunk with the owning scheme's summary and filters in its
/// payload, `{collection}_schemes` holds one vectorless point per scheme.
///
/// Chunk points are written with `committed = false` and only flipped to
/// `true` once the scheme point exists, and search only sees committed
/// points. A failed write deletes whatever it already wrote.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(config: QdrantConfig) -> Result<Self, SchemeError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| SchemeError::storage(BACKEND, error.to_string(), false))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            collection: config.collection,
            client,
            vector_size: config.vector_size,
        })
    }

    fn schemes_collection(&self) -> String {
        format!("{}_schemes", self.collection)
    }

    fn collection_url(&self, collection: &str, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, collection, suffix)
    }

    /// Creates both collections when they are missing. An existing chunk
    /// collection with a different vector size is an error.
    pub async fn ensure_collections(&self) -> Result<(), SchemeError> {
        let chunk_collection = self.collection.clone();
        self.ensure_collection(
            &chunk_collection,
            json!({ "vectors": { "size": self.vector_size, "distance": "Cosine" } }),
        )
        .await?;

        let existing = self.collection_info(&chunk_collection).await?;
        if let Some(size) = existing
            .pointer("/result/config/params/vectors/size")
            .and_then(Value::as_u64)
        {
            if size as usize != self.vector_size {
                return Err(SchemeError::DimensionMismatch {
                    expected: size as usize,
                    found: self.vector_size,
                });
            }
        }

        self.ensure_collection(&self.schemes_collection(), json!({ "vectors": {} }))
            .await?;

        self.create_payload_index(&chunk_collection, "scheme_id", "keyword").await?;
        self.create_payload_index(&chunk_collection, "committed", "bool").await
    }

    async fn collection_info(&self, collection: &str) -> Result<Value, SchemeError> {
        let response = self
            .client
            .get(self.collection_url(collection, ""))
            .send()
            .await
            .map_err(network_error)?;
        parse_json(expect_success(response).await?).await
    }

    async fn ensure_collection(&self, collection: &str, body: Value) -> Result<(), SchemeError> {
        let response = self
            .client
            .get(self.collection_url(collection, ""))
            .send()
            .await
            .map_err(network_error)?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            expect_success(response).await?;
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url(collection, ""))
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        expect_success(response).await?;
        info!(collection, "created qdrant collection");
        Ok(())
    }

    async fn create_payload_index(
        &self,
        collection: &str,
        field: &str,
        schema: &str,
    ) -> Result<(), SchemeError> {
        let response = self
            .client
            .put(self.collection_url(collection, "/index?wait=true"))
            .json(&json!({ "field_name": field, "field_schema": schema }))
            .send()
            .await
            .map_err(network_error)?;
        expect_success(response).await.map(|_| ())
    }

    async fn upsert_points(&self, collection: &str, points: &[Value]) -> Result<(), SchemeError> {
        for batch in points.chunks(UPSERT_BATCH) {
            let response = self
                .client
                .put(self.collection_url(collection, "/points?wait=true"))
                .json(&json!({ "points": batch }))
                .send()
                .await
                .map_err(network_error)?;
            expect_success(response).await?;
        }
        Ok(())
    }

    async fn write_scheme(&self, scheme: &Scheme) -> Result<(), SchemeError> {
        let points = scheme
            .text_chunks
            .iter()
            .map(|chunk| chunk_point(scheme, chunk))
            .collect::<Vec<_>>();
        self.upsert_points(&self.collection, &points).await?;

        self.upsert_points(&self.schemes_collection(), &[scheme_point(scheme)?])
            .await?;

        if scheme.text_chunks.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.collection_url(&self.collection, "/points/payload?wait=true"))
            .json(&json!({
                "payload": { "committed": true },
                "filter": scheme_id_filter(&scheme.id),
            }))
            .send()
            .await
            .map_err(network_error)?;
        expect_success(response).await.map(|_| ())
    }

    async fn delete_scheme_points(&self, scheme_id: &str) -> Result<(), SchemeError> {
        for collection in [self.collection.clone(), self.schemes_collection()] {
            let response = self
                .client
                .post(self.collection_url(&collection, "/points/delete?wait=true"))
                .json(&json!({ "filter": scheme_id_filter(scheme_id) }))
                .send()
                .await
                .map_err(network_error)?;
            expect_success(response).await?;
        }
        Ok(())
    }

    async fn scroll(&self, collection: &str, body: Value) -> Result<Vec<Value>, SchemeError> {
        let mut points = Vec::new();
        let mut offset = Value::Null;

        loop {
            let mut request = body.clone();
            request["limit"] = json!(SCROLL_PAGE);
            if !offset.is_null() {
                request["offset"] = offset.clone();
            }

            let response = self
                .client
                .post(self.collection_url(collection, "/points/scroll"))
                .json(&request)
                .send()
                .await
                .map_err(network_error)?;
            let parsed = parse_json(expect_success(response).await?).await?;

            if let Some(page) = parsed.pointer("/result/points").and_then(Value::as_array) {
                points.extend(page.iter().cloned());
            }

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() {
                return Ok(points);
            }
        }
    }

    async fn load_chunks(&self, scheme_id: &str) -> Result<Vec<Chunk>, SchemeError> {
        let points = self
            .scroll(
                &self.collection,
                json!({
                    "filter": scheme_id_filter(scheme_id),
                    "with_payload": true,
                    "with_vector": true,
                }),
            )
            .await?;

        let mut chunks = points
            .iter()
            .map(chunk_from_point)
            .collect::<Result<Vec<_>, _>>()?;
        chunks.sort_by_key(|chunk| chunk.chunk_index);
        Ok(chunks)
    }
}

#[async_trait]
impl SchemeRepository for QdrantStore {
    async fn create_scheme(&self, draft: &SchemeDraft) -> Result<Scheme, SchemeError> {
        if draft.metadata.name.trim().is_empty() {
            return Err(SchemeError::validation("scheme name is required"));
        }
        if Uuid::parse_str(&draft.id).is_err() {
            return Err(SchemeError::validation(format!(
                "scheme id {} is not a uuid",
                draft.id
            )));
        }
        check_dimensions(&draft.chunks, Some(self.vector_size))?;

        let scheme = draft.clone().into_scheme(Utc::now());

        if let Err(error) = self.write_scheme(&scheme).await {
            if let Err(cleanup) = self.delete_scheme_points(&scheme.id).await {
                warn!(scheme_id = %scheme.id, %cleanup, "could not remove partially written scheme");
            }
            return Err(error);
        }

        Ok(scheme)
    }

    async fn get_scheme(&self, id: &str) -> Result<Option<Scheme>, SchemeError> {
        if Uuid::parse_str(id).is_err() {
            return Ok(None);
        }

        let response = self
            .client
            .get(self.collection_url(&self.schemes_collection(), &format!("/points/{id}")))
            .send()
            .await
            .map_err(network_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let parsed = parse_json(expect_success(response).await?).await?;
        let payload = parsed
            .pointer("/result/payload")
            .cloned()
            .ok_or_else(|| malformed("scheme point has no payload"))?;

        let mut scheme: Scheme = serde_json::from_value(payload)
            .map_err(|error| malformed(&format!("scheme payload: {error}")))?;
        scheme.text_chunks = self.load_chunks(id).await?;
        Ok(Some(scheme))
    }

    async fn list_schemes(&self) -> Result<Vec<SchemeSummary>, SchemeError> {
        let points = self
            .scroll(
                &self.schemes_collection(),
                json!({ "with_payload": true, "with_vector": false }),
            )
            .await?;

        let mut summaries = points
            .iter()
            .map(|point| {
                let payload = point.get("payload").cloned().unwrap_or(Value::Null);
                serde_json::from_value::<StoredScheme>(payload)
                    .map(StoredScheme::into_summary)
                    .map_err(|error| malformed(&format!("scheme payload: {error}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        summaries.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(summaries)
    }

    async fn search_chunks(
        &self,
        query_vector: &[f32],
        filter: &SchemeFilter,
        options: VectorSearchOptions,
    ) -> Result<Vec<ChunkMatch>, SchemeError> {
        if query_vector.len() != self.vector_size {
            return Err(SchemeError::DimensionMismatch {
                expected: self.vector_size,
                found: query_vector.len(),
            });
        }

        let pool = options.num_candidates.max(options.limit);
        let response = self
            .client
            .post(self.collection_url(&self.collection, "/points/search/groups"))
            .json(&json!({
                "vector": query_vector,
                "group_by": "scheme_id",
                "group_size": 1,
                "limit": options.limit,
                "filter": filter_to_qdrant(filter),
                "with_payload": true,
                "params": { "hnsw_ef": pool },
            }))
            .send()
            .await
            .map_err(network_error)?;

        let parsed = parse_json(expect_success(response).await?).await?;
        let matches = matches_from_groups(&parsed)?;
        Ok(rank_matches(matches, options.limit))
    }
}

/// Best hit of every group in a `search/groups` response.
fn matches_from_groups(parsed: &Value) -> Result<Vec<ChunkMatch>, SchemeError> {
    let groups = parsed
        .pointer("/result/groups")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("group search response has no groups"))?;

    groups
        .iter()
        .filter_map(|group| group.pointer("/hits/0"))
        .map(match_from_hit)
        .collect()
}

/// Scheme point payload: the scheme without its chunks, plus a chunk count
/// so listing does not need to touch the chunk collection.
#[derive(serde::Deserialize)]
struct StoredScheme {
    #[serde(flatten)]
    scheme: Scheme,
    #[serde(default)]
    chunk_count: usize,
}

impl StoredScheme {
    fn into_summary(self) -> SchemeSummary {
        SchemeSummary {
            chunk_count: self.chunk_count,
            ..self.scheme.summary()
        }
    }
}

fn scheme_point(scheme: &Scheme) -> Result<Value, SchemeError> {
    let mut payload = serde_json::to_value(Scheme {
        text_chunks: Vec::new(),
        ..scheme.clone()
    })
    .map_err(|error| SchemeError::storage(BACKEND, error.to_string(), false))?;
    payload["chunk_count"] = json!(scheme.text_chunks.len());

    Ok(json!({
        "id": scheme.id,
        "vector": {},
        "payload": payload,
    }))
}

fn chunk_point(scheme: &Scheme, chunk: &Chunk) -> Value {
    json!({
        "id": chunk_point_id(&scheme.id, chunk.chunk_index).to_string(),
        "vector": chunk.vector,
        "payload": {
            "scheme_id": scheme.id,
            "scheme": scheme.summary(),
            "filters": scheme.filters,
            "chunk_index": chunk.chunk_index,
            "content": chunk.content,
            "source_page": chunk.source_page,
            "committed": false,
        },
    })
}

/// Stable point id so a retried write overwrites instead of duplicating.
fn chunk_point_id(scheme_id: &str, chunk_index: u32) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(scheme_id.as_bytes());
    hasher.update(chunk_index.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn scheme_id_filter(scheme_id: &str) -> Value {
    json!({ "must": [{ "key": "scheme_id", "match": { "value": scheme_id } }] })
}

/// Each axis predicate becomes a nested `should`: the allow-list is empty,
/// or it contains one of the accepted values. The predicates are `must`ed
/// together with the commit marker.
fn filter_to_qdrant(filter: &SchemeFilter) -> Value {
    let mut must = vec![json!({ "key": "committed", "match": { "value": true } })];
    for predicate in filter.predicates() {
        let key = format!("filters.{}", predicate.axis.field());
        must.push(json!({
            "should": [
                { "is_empty": { "key": key } },
                { "key": key, "match": { "any": predicate.accepted } },
            ]
        }));
    }
    json!({ "must": must })
}

fn chunk_from_point(point: &Value) -> Result<Chunk, SchemeError> {
    let vector = point
        .get("vector")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("chunk point has no vector"))?
        .iter()
        .map(|value| value.as_f64().map(|number| number as f32))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| malformed("chunk vector holds a non-number"))?;

    Ok(Chunk {
        chunk_index: payload_u32(point, "/payload/chunk_index")?,
        content: payload_str(point, "/payload/content")?,
        vector,
        source_page: payload_u32(point, "/payload/source_page")?,
    })
}

fn match_from_hit(hit: &Value) -> Result<ChunkMatch, SchemeError> {
    let scheme = hit
        .pointer("/payload/scheme")
        .cloned()
        .ok_or_else(|| malformed("hit has no scheme summary"))?;
    let scheme: SchemeSummary = serde_json::from_value(scheme)
        .map_err(|error| malformed(&format!("scheme summary: {error}")))?;
    let cosine = hit
        .get("score")
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed("hit has no score"))?;

    Ok(ChunkMatch {
        scheme,
        chunk_index: payload_u32(hit, "/payload/chunk_index")?,
        content: payload_str(hit, "/payload/content")?,
        source_page: payload_u32(hit, "/payload/source_page")?,
        score: ((1.0 + cosine) / 2.0).clamp(0.0, 1.0),
    })
}

fn payload_u32(point: &Value, pointer: &str) -> Result<u32, SchemeError> {
    point
        .pointer(pointer)
        .and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| malformed(&format!("missing integer at {pointer}")))
}

fn payload_str(point: &Value, pointer: &str) -> Result<String, SchemeError> {
    point
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| malformed(&format!("missing string at {pointer}")))
}

fn malformed(details: &str) -> SchemeError {
    SchemeError::storage(BACKEND, format!("malformed response: {details}"), false)
}

fn network_error(error: reqwest::Error) -> SchemeError {
    SchemeError::storage(BACKEND, error.to_string(), true)
}

async fn expect_success(response: Response) -> Result<Response, SchemeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SchemeError::storage(
        BACKEND,
        format!("{status}: {body}"),
        status_is_transient(status),
    ))
}

async fn parse_json(response: Response) -> Result<Value, SchemeError> {
    response
        .json()
        .await
        .map_err(|error| malformed(&error.to_string()))
}
