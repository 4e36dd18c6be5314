pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod ingest;
pub mod judge;
pub mod models;
pub mod requests;
pub mod retrieval;
pub mod retry;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{normalize_whitespace, split, ChunkingConfig, Passage};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingClient, EmbeddingConfig, HttpEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::SchemeError;
pub use extractor::{ExtractedDocument, LopdfExtractor, PageText, PdfExtractor};
pub use filter::{AxisPredicate, FilterAxis, SchemeFilter};
pub use ingest::{
    discover_pdf_files, IngestionOutcome, IngestionPipeline, IngestionReport, SkippedPdf,
};
pub use judge::{ChatCompletionJudge, JudgeConfig};
pub use models::{
    Benefits, BenefitsType, Chunk, IngestionOptions, NewScheme, RetrievalOptions, Scheme,
    SchemeDraft, SchemeFilters, SchemeSummary, SearchHit, UserProfile,
};
pub use requests::{JudgeRequest, SearchRequest, UploadRequest, ValidUpload};
pub use retrieval::RetrievalService;
pub use retry::RetryPolicy;
pub use stores::{InMemorySchemeRepository, QdrantConfig, QdrantStore};
pub use traits::{EligibilityJudge, SchemeRepository};
