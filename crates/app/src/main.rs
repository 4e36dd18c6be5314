use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use scheme_search_core::{
    BenefitsType, CharacterNgramEmbedder, ChatCompletionJudge, ChunkingConfig, Embedder,
    EmbeddingClient, EmbeddingConfig, HttpEmbedder, IngestionOptions, IngestionPipeline,
    JudgeConfig, JudgeRequest, LopdfExtractor, NewScheme, QdrantConfig, QdrantStore,
    RetrievalOptions, RetrievalService, RetryPolicy, SchemeError, SchemeFilters, SearchRequest,
    UploadRequest, UserProfile, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "scheme-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant chunk collection; scheme records go to `<name>_schemes`.
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "scheme_chunks")]
    qdrant_collection: String,

    /// Seconds allowed for one Qdrant request.
    #[arg(long, env = "QDRANT_TIMEOUT_SECS", default_value = "30")]
    qdrant_timeout_secs: u64,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    judge: JudgeArgs,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Local character n-gram hashing, no network.
    Ngram,
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
}

#[derive(Args)]
struct EmbeddingArgs {
    #[arg(long, env = "SCHEME_EMBEDDER", value_enum, default_value = "ngram")]
    embedder: EmbedderKind,

    #[arg(long, env = "EMBEDDING_ENDPOINT", default_value = "https://api.openai.com/v1")]
    embedding_endpoint: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Vector size; must match the model for the http embedder.
    #[arg(long, env = "EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,

    #[arg(long, env = "EMBEDDING_TIMEOUT_SECS", default_value = "30")]
    embedding_timeout_secs: u64,
}

#[derive(Args)]
struct JudgeArgs {
    #[arg(long, env = "JUDGE_ENDPOINT", default_value = "https://api.openai.com/v1")]
    judge_endpoint: String,

    #[arg(long, env = "JUDGE_MODEL", default_value = "gpt-4o-mini")]
    judge_model: String,

    #[arg(long, env = "JUDGE_API_KEY", hide_env_values = true)]
    judge_api_key: Option<String>,

    /// Scheme text beyond this many characters is left out of the prompt.
    #[arg(long, env = "JUDGE_MAX_CONTEXT_CHARS", default_value = "24000")]
    judge_max_context_chars: usize,

    #[arg(long, env = "JUDGE_TIMEOUT_SECS", default_value = "60")]
    judge_timeout_secs: u64,
}

#[derive(Args)]
struct TuningArgs {
    #[arg(long, env = "CHUNK_MAX_CHARS", default_value = "1000")]
    chunk_max_chars: usize,

    #[arg(long, env = "CHUNK_OVERLAP_CHARS", default_value = "200")]
    chunk_overlap_chars: usize,

    #[arg(long, env = "EMBEDDING_CONCURRENCY", default_value = "5")]
    embedding_concurrency: usize,

    #[arg(long, env = "EMBEDDING_BATCH_SIZE", default_value = "16")]
    embedding_batch_size: usize,

    /// Attempts per network call, including the first.
    #[arg(long, env = "MAX_ATTEMPTS", default_value = "3")]
    max_attempts: u32,

    /// Seconds allowed for extracting and embedding one document.
    #[arg(long, env = "INGEST_TIMEOUT_SECS", default_value = "300")]
    ingest_timeout_secs: u64,

    /// Seconds allowed for one search.
    #[arg(long, env = "SEARCH_TIMEOUT_SECS", default_value = "30")]
    search_timeout_secs: u64,

    #[arg(long, env = "SEARCH_NUM_CANDIDATES", default_value = "50")]
    num_candidates: usize,
}

#[derive(Args)]
struct SchemeArgs {
    #[arg(long, value_parser = parse_benefits_type, default_value = "Financial")]
    benefits_type: BenefitsType,

    #[arg(long, default_value = "0")]
    benefits_value: f64,

    #[arg(long, default_value = "")]
    benefits_description: String,

    /// Required document; repeat for several.
    #[arg(long = "document")]
    required_documents: Vec<String>,

    /// States the scheme is limited to; repeat for several.
    #[arg(long = "scheme-state")]
    states: Vec<String>,

    #[arg(long = "scheme-gender")]
    genders: Vec<String>,

    #[arg(long = "scheme-caste")]
    castes: Vec<String>,
}

impl SchemeArgs {
    fn filters(&self) -> SchemeFilters {
        SchemeFilters {
            state: self.states.clone(),
            gender: self.genders.clone(),
            caste: self.castes.clone(),
        }
    }
}

#[derive(Args)]
struct ProfileArgs {
    #[arg(long)]
    state: Option<String>,

    #[arg(long)]
    gender: Option<String>,

    #[arg(long)]
    caste: Option<String>,
}

impl ProfileArgs {
    fn into_profile(self) -> UserProfile {
        UserProfile {
            state: self.state,
            gender: self.gender,
            social_category: self.caste,
            ..UserProfile::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.state.is_none() && self.gender.is_none() && self.caste.is_none()
    }
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one scheme PDF.
    Ingest {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        name: String,
        #[command(flatten)]
        scheme: SchemeArgs,
    },
    /// Ingest every PDF under a folder, one scheme per file.
    IngestFolder {
        #[arg(long)]
        folder: PathBuf,
        #[command(flatten)]
        scheme: SchemeArgs,
    },
    /// Semantic search over schemes the profile is eligible to see.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
        #[command(flatten)]
        profile: ProfileArgs,
        /// Print hits as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Ask the eligibility judge about one scheme.
    Judge {
        #[arg(long)]
        scheme_id: String,
        #[command(flatten)]
        profile: ProfileArgs,
    },
    /// List stored schemes.
    List,
}

fn parse_benefits_type(value: &str) -> Result<BenefitsType, String> {
    value.parse()
}

fn embedder(args: &EmbeddingArgs) -> Result<Arc<dyn Embedder>, SchemeError> {
    match args.embedder {
        EmbedderKind::Ngram => Ok(Arc::new(CharacterNgramEmbedder::new(
            args.embedding_dimensions
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
        ))),
        EmbedderKind::Http => {
            let dimensions = args.embedding_dimensions.ok_or_else(|| {
                SchemeError::validation("--embedding-dimensions is required for the http embedder")
            })?;
            Ok(Arc::new(HttpEmbedder::new(EmbeddingConfig {
                endpoint: args.embedding_endpoint.clone(),
                model: args.embedding_model.clone(),
                api_key: args.embedding_api_key.clone(),
                dimensions,
                timeout: Duration::from_secs(args.embedding_timeout_secs),
            })?))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "scheme-search boot"
    );

    let tuning = &cli.tuning;
    let retry = RetryPolicy {
        max_attempts: tuning.max_attempts.max(1),
        ..RetryPolicy::default()
    };
    let embedder = embedder(&cli.embedding)?;
    let dimensions = embedder.dimensions();
    let embeddings = EmbeddingClient::new(embedder).with_retry(retry);

    let store = Arc::new(QdrantStore::new(QdrantConfig {
        endpoint: cli.qdrant_url.clone(),
        collection: cli.qdrant_collection.clone(),
        vector_size: dimensions,
        timeout: Duration::from_secs(cli.qdrant_timeout_secs),
    })?);
    store
        .ensure_collections()
        .await
        .context("could not prepare qdrant collections")?;

    match cli.command {
        Command::Ingest { file, name, scheme } => {
            let pipeline = ingestion_pipeline(&cli.tuning, retry, embeddings, store)?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("could not read {}", file.display()))?;

            let upload = UploadRequest {
                file: Some(bytes),
                file_name: file
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string),
                scheme_name: Some(name),
                benefits_type: scheme.benefits_type,
                benefits_value: scheme.benefits_value,
                benefits_description: scheme.benefits_description.clone(),
                required_documents: scheme.required_documents.clone(),
                filters: scheme.filters(),
            }
            .validate()?;

            let outcome = pipeline.ingest_upload(upload).await?;
            if !outcome.is_searchable() {
                warn!(scheme_id = %outcome.scheme.id, "no text extracted; scheme will not appear in search");
            }
            println!(
                "{} ingested as {} with {} chunks",
                outcome.scheme.name, outcome.scheme.id, outcome.chunks_processed
            );
        }
        Command::IngestFolder { folder, scheme } => {
            let pipeline = ingestion_pipeline(&cli.tuning, retry, embeddings, store)?;
            let template = NewScheme {
                name: String::new(),
                benefits: scheme_search_core::Benefits {
                    kind: scheme.benefits_type,
                    max_value: scheme.benefits_value,
                    description: scheme.benefits_description.clone(),
                },
                required_documents: scheme.required_documents.clone(),
                filters: scheme.filters(),
            };

            let report = pipeline.ingest_folder(&folder, &template).await?;

            if !report.skipped_files.is_empty() {
                warn!(
                    "skipped_files={} for folder={}",
                    report.skipped_files.len(),
                    folder.display()
                );
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                }
            }

            for outcome in &report.ingested {
                println!(
                    "{} ingested as {} with {} chunks",
                    outcome.scheme.name, outcome.scheme.id, outcome.chunks_processed
                );
            }
            println!(
                "{} schemes ingested, {} skipped at {}",
                report.ingested.len(),
                report.skipped_files.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Search {
            query,
            top_k,
            profile,
            json,
        } => {
            let service = retrieval_service(&cli.tuning, embeddings, store);
            let mut request = SearchRequest {
                top_k: Some(top_k),
                ..SearchRequest::new(query)
            };
            if !profile.is_empty() {
                request = request.with_profile(profile.into_profile());
            }

            let hits = match service.search(&request).await {
                Ok(hits) => hits,
                Err(error) => {
                    warn!(%error, "search failed");
                    anyhow::bail!(error.user_message());
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("no matching schemes");
            } else {
                for hit in hits {
                    println!(
                        "score={:.4} scheme={} id={} page={}",
                        hit.score, hit.scheme.name, hit.scheme.id, hit.source_page
                    );
                    println!("  {}", hit.snippet);
                }
            }
        }
        Command::Judge { scheme_id, profile } => {
            let judge = ChatCompletionJudge::new(JudgeConfig {
                endpoint: cli.judge.judge_endpoint.clone(),
                model: cli.judge.judge_model.clone(),
                api_key: cli.judge.judge_api_key.clone(),
                timeout: Duration::from_secs(cli.judge.judge_timeout_secs),
                max_context_chars: cli.judge.judge_max_context_chars,
            })?;
            let service = retrieval_service(&cli.tuning, embeddings, store).with_judge(Arc::new(judge));

            let verdict = service
                .judge(&JudgeRequest {
                    scheme_id,
                    user_profile: profile.into_profile(),
                })
                .await?;
            println!("{verdict}");
        }
        Command::List => {
            let service = retrieval_service(&cli.tuning, embeddings, store);
            for summary in service.list_schemes().await? {
                println!(
                    "{} {} chunks={} benefit={:?} up to {}",
                    summary.id,
                    summary.name,
                    summary.chunk_count,
                    summary.benefits.kind,
                    summary.benefits.max_value
                );
            }
        }
    }

    Ok(())
}

fn ingestion_pipeline(
    tuning: &TuningArgs,
    retry: RetryPolicy,
    embeddings: EmbeddingClient,
    store: Arc<QdrantStore>,
) -> Result<IngestionPipeline, SchemeError> {
    let chunking = ChunkingConfig {
        max_chars: tuning.chunk_max_chars,
        overlap_chars: tuning.chunk_overlap_chars,
    };
    chunking.validate()?;

    Ok(IngestionPipeline::new(
        Arc::new(LopdfExtractor),
        embeddings,
        store,
        IngestionOptions {
            chunking,
            embedding_concurrency: tuning.embedding_concurrency,
            embedding_batch_size: tuning.embedding_batch_size,
            timeout: Duration::from_secs(tuning.ingest_timeout_secs),
            storage_retry: retry,
        },
    ))
}

fn retrieval_service(
    tuning: &TuningArgs,
    embeddings: EmbeddingClient,
    store: Arc<QdrantStore>,
) -> RetrievalService {
    RetrievalService::new(
        embeddings,
        store,
        RetrievalOptions {
            num_candidates: tuning.num_candidates,
            timeout: Duration::from_secs(tuning.search_timeout_secs),
            ..RetrievalOptions::default()
        },
    )
}
