use crate::chunking::split;
use crate::embeddings::EmbeddingClient;
use crate::extractor::{ExtractedDocument, PdfExtractor};
use crate::models::{Chunk, IngestionOptions, NewScheme, Scheme, SchemeDraft};
use crate::requests::ValidUpload;
use crate::traits::SchemeRepository;
use crate::SchemeError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Result of ingesting one document.
#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    pub scheme: Scheme,
    pub chunks_processed: usize,
}

impl IngestionOutcome {
    /// False when the document had no text layer; the scheme exists but
    /// can never be returned by a search.
    pub fn is_searchable(&self) -> bool {
        self.scheme.is_searchable()
    }
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub ingested: Vec<IngestionOutcome>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Extract, split, embed, store. Any failing step aborts the whole
/// document; the repository is written once, at the very end.
#[derive(Clone)]
pub struct IngestionPipeline {
    extractor: Arc<dyn PdfExtractor>,
    embeddings: EmbeddingClient,
    repository: Arc<dyn SchemeRepository>,
    options: IngestionOptions,
}

impl IngestionPipeline {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        embeddings: EmbeddingClient,
        repository: Arc<dyn SchemeRepository>,
        options: IngestionOptions,
    ) -> Self {
        let embeddings =
            embeddings.with_batching(options.embedding_batch_size, options.embedding_concurrency);
        Self {
            extractor,
            embeddings,
            repository,
            options,
        }
    }

    pub async fn ingest_upload(&self, upload: ValidUpload) -> Result<IngestionOutcome, SchemeError> {
        self.ingest_named(upload.bytes, upload.file_name.as_deref(), upload.scheme)
            .await
    }

    pub async fn ingest(&self, bytes: Vec<u8>, scheme: NewScheme) -> Result<IngestionOutcome, SchemeError> {
        self.ingest_named(bytes, None, scheme).await
    }

    /// Ingests an uploaded file and removes it afterwards, whether or not
    /// ingestion succeeded.
    pub async fn ingest_file(&self, path: &Path, scheme: NewScheme) -> Result<IngestionOutcome, SchemeError> {
        let result = match tokio::fs::read(path).await {
            Ok(bytes) => {
                let file_name = path.file_name().and_then(|name| name.to_str());
                self.ingest_named(bytes, file_name, scheme).await
            }
            Err(error) => Err(SchemeError::Io(error)),
        };

        if let Err(error) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), %error, "could not remove processed upload");
        }

        result
    }

    /// Ingests every PDF below `folder` as its own scheme, named after the
    /// file stem. Failures are collected instead of stopping the batch.
    pub async fn ingest_folder(
        &self,
        folder: &Path,
        template: &NewScheme,
    ) -> Result<IngestionReport, SchemeError> {
        let files = discover_pdf_files(folder);

        if files.is_empty() {
            return Err(SchemeError::validation(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut ingested = Vec::new();
        let mut skipped_files = Vec::new();

        for path in files {
            let build_result = async {
                let bytes = tokio::fs::read(&path).await?;
                let scheme = NewScheme {
                    name: scheme_name_from_path(&path)?,
                    ..template.clone()
                };
                let file_name = path.file_name().and_then(|name| name.to_str());
                self.ingest_named(bytes, file_name, scheme).await
            }
            .await;

            match build_result {
                Ok(outcome) => ingested.push(outcome),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipped pdf");
                    skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(IngestionReport {
            ingested,
            skipped_files,
        })
    }

    async fn ingest_named(
        &self,
        bytes: Vec<u8>,
        file_name: Option<&str>,
        scheme: NewScheme,
    ) -> Result<IngestionOutcome, SchemeError> {
        if scheme.name.trim().is_empty() {
            return Err(SchemeError::validation("scheme name is required"));
        }

        let source_ref = source_reference(&bytes, file_name);
        let timeout = self.options.timeout;

        let chunks = tokio::time::timeout(timeout, self.prepare_chunks(bytes))
            .await
            .map_err(|_| SchemeError::Timeout(timeout))??;

        let draft = SchemeDraft {
            id: Uuid::new_v4().to_string(),
            metadata: scheme,
            original_source_ref: source_ref,
            chunks,
        };

        let repository = &self.repository;
        let draft_ref = &draft;
        let stored = self
            .options
            .storage_retry
            .run("create_scheme", move || repository.create_scheme(draft_ref))
            .await?;

        let chunks_processed = stored.text_chunks.len();
        if chunks_processed == 0 {
            warn!(
                scheme_id = %stored.id,
                name = %stored.name,
                "document has no extractable text; scheme stored without searchable chunks"
            );
        } else {
            info!(scheme_id = %stored.id, name = %stored.name, chunks_processed, "scheme ingested");
        }

        Ok(IngestionOutcome {
            scheme: stored,
            chunks_processed,
        })
    }

    async fn prepare_chunks(&self, bytes: Vec<u8>) -> Result<Vec<Chunk>, SchemeError> {
        let extractor = Arc::clone(&self.extractor);
        let extracted: ExtractedDocument =
            tokio::task::spawn_blocking(move || extractor.extract_pages(&bytes))
                .await
                .map_err(|error| SchemeError::Extraction(format!("extractor task failed: {error}")))??;

        if !extracted.has_text() {
            warn!(pages = extracted.pages.len(), "document has no text layer");
            return Ok(Vec::new());
        }

        let layout = extracted.layout();
        let passages = split(&layout.text, self.options.chunking)?;
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = passages.iter().map(|passage| passage.text.clone()).collect();
        let vectors = self.embeddings.embed_all(&texts).await?;

        passages
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (passage, vector))| {
                Ok(Chunk {
                    chunk_index: u32::try_from(index)
                        .map_err(|_| SchemeError::validation("document has too many chunks"))?,
                    source_page: layout.page_at(passage.offset),
                    content: passage.text,
                    vector,
                })
            })
            .collect()
    }
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// `sha256:<digest>` of the document, followed by its file name when known.
pub fn source_reference(bytes: &[u8], file_name: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = format!("sha256:{:x}", hasher.finalize());
    match file_name {
        Some(name) if !name.trim().is_empty() => format!("{digest}:{name}"),
        _ => digest,
    }
}

fn scheme_name_from_path(path: &Path) -> Result<String, SchemeError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.replace(['_', '-'], " ").trim().to_string())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| SchemeError::validation(format!("path has no file name: {}", path.display())))
}
