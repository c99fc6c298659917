mod backend;

use backend::{EmbedderBackend, IndexBackend, SynthesizerBackend};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use newsiq_core::embeddings::{DEFAULT_EMBEDDING_MODEL, DEFAULT_OPENAI_BASE_URL};
use newsiq_core::sources::default_feeds;
use newsiq_core::synthesis::DEFAULT_CHAT_MODEL;
use newsiq_core::{
    ArticleSource, CharacterNgramEmbedder, Embedder, HackerNewsSource, IngestionPipeline,
    MemoryArticleStore, MemoryVectorIndex, NewsApiSource, OpenAiEmbedder, OpenAiSynthesizer, QdrantStore,
    QueryFilters, QueryRequest, RagService, RagSettings, RssSource,
};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "newsiq", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the article and vector snapshots.
    #[arg(long, env = "NEWSIQ_DATA_DIR", default_value = ".newsiq")]
    data_dir: PathBuf,

    /// OpenAI API key. Without it embeddings are computed locally and `ask` cannot synthesize.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    #[arg(long, env = "OPENAI_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    #[arg(long, env = "OPENAI_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Use local character n-gram embeddings even when an OpenAI key is set.
    #[arg(long, default_value_t = false)]
    local_embeddings: bool,

    /// NewsAPI key for top headlines.
    #[arg(long, env = "NEWSAPI_KEY", hide_env_values = true)]
    newsapi_key: Option<String>,

    /// Qdrant base URL. When unset the vector index lives in the data directory.
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "news_chunks")]
    qdrant_collection: String,

    #[arg(long, env = "NEWSIQ_CHUNK_SIZE", default_value = "600")]
    chunk_size: usize,

    #[arg(long, env = "NEWSIQ_CHUNK_OVERLAP", default_value = "120")]
    chunk_overlap: usize,

    /// Disable keyword-based category inference for questions without a category.
    #[arg(long, default_value_t = false)]
    no_infer_category: bool,

    /// Disable the unfiltered retry when a category search returns too few hits.
    #[arg(long, default_value_t = false)]
    no_category_fallback: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    Hackernews,
    Rss,
    Newsapi,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch articles from the configured sources and index them.
    Ingest {
        /// Sources to fetch; all of them when omitted.
        #[arg(long = "source", value_enum)]
        sources: Vec<SourceKind>,
        /// Stories to take from the Hacker News top list.
        #[arg(long)]
        hacker_news_limit: Option<usize>,
        /// Fetch each RSS item's page and keep its text when longer than the summary.
        #[arg(long, default_value_t = false)]
        rss_full_text: bool,
    },
    /// Answer a question from the indexed articles with numbered citations.
    Ask {
        question: String,
        #[arg(long)]
        category: Option<String>,
        /// Earliest publish time, RFC 3339 or YYYY-MM-DD.
        #[arg(long, value_parser = parse_date_from)]
        date_from: Option<DateTime<Utc>>,
        /// Latest publish time, RFC 3339 or YYYY-MM-DD (inclusive of that day).
        #[arg(long, value_parser = parse_date_to)]
        date_to: Option<DateTime<Utc>>,
        #[arg(long, default_value = "8")]
        top_k: usize,
        /// Emit server-sent events on stdout as the answer is generated.
        #[arg(long, default_value_t = false)]
        stream: bool,
        /// Print the blocking response as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn parse_date(raw: &str, time: NaiveTime) -> Result<DateTime<Utc>, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_time(time).and_utc())
        .map_err(|error| format!("expected RFC 3339 or YYYY-MM-DD: {error}"))
}

fn parse_date_from(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_date(raw, NaiveTime::MIN)
}

fn parse_date_to(raw: &str) -> Result<DateTime<Utc>, String> {
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).ok_or("invalid end of day")?;
    parse_date(raw, end_of_day)
}

impl Cli {
    fn settings(&self) -> RagSettings {
        RagSettings {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            infer_category: !self.no_infer_category,
            category_fallback: !self.no_category_fallback,
            ..RagSettings::default()
        }
    }

    fn api_key(&self) -> Option<&str> {
        self.openai_api_key.as_deref().filter(|key| !key.trim().is_empty())
    }

    fn embedder(&self) -> EmbedderBackend {
        match self.api_key() {
            Some(key) if !self.local_embeddings => EmbedderBackend::OpenAi(OpenAiEmbedder::new(
                key,
                &self.openai_base_url,
                &self.embedding_model,
            )),
            _ => EmbedderBackend::Local(CharacterNgramEmbedder::default()),
        }
    }

    fn synthesizer(&self) -> SynthesizerBackend {
        match self.api_key() {
            Some(key) => SynthesizerBackend::OpenAi(OpenAiSynthesizer::new(key, &self.openai_base_url, &self.chat_model)),
            None => SynthesizerBackend::Unconfigured,
        }
    }

    async fn index(&self, dimensions: usize) -> anyhow::Result<IndexBackend> {
        match &self.qdrant_url {
            Some(url) => {
                let store = QdrantStore::new(url, &self.qdrant_collection, dimensions);
                store.ensure_collection().await?;
                Ok(IndexBackend::Qdrant(store))
            }
            None => Ok(IndexBackend::Memory(
                MemoryVectorIndex::open(self.data_dir.join("vectors.json")).await?,
            )),
        }
    }

    async fn article_store(&self) -> anyhow::Result<MemoryArticleStore> {
        Ok(MemoryArticleStore::open(self.data_dir.join("articles.json")).await?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = cli.settings();
    tokio::fs::create_dir_all(&cli.data_dir).await?;

    let embedder = cli.embedder();
    let index = cli.index(embedder.dimensions()).await?;
    let articles = cli.article_store().await?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        embedder = embedder.label(),
        data_dir = %cli.data_dir.display(),
        "newsiq boot"
    );

    match &cli.command {
        Command::Ingest {
            sources,
            hacker_news_limit,
            rss_full_text,
        } => {
            let client = http_client()?;
            let selected = if sources.is_empty() {
                vec![SourceKind::Hackernews, SourceKind::Rss, SourceKind::Newsapi]
            } else {
                sources.clone()
            };

            let mut active: Vec<Box<dyn ArticleSource>> = Vec::new();
            for kind in selected {
                match kind {
                    SourceKind::Hackernews => {
                        let limit = hacker_news_limit.unwrap_or(settings.hacker_news_limit);
                        active.push(Box::new(HackerNewsSource::new(client.clone(), limit)?))
                    }
                    SourceKind::Rss => active.push(Box::new(
                        RssSource::new(client.clone(), default_feeds())?.with_full_text(*rss_full_text),
                    )),
                    SourceKind::Newsapi => {
                        active.push(Box::new(NewsApiSource::new(client.clone(), cli.newsapi_key.clone())?))
                    }
                }
            }

            let pipeline = IngestionPipeline::new(&embedder, &index, &articles, &settings);
            let report = pipeline.run(&active).await;

            articles.save().await?;
            index.persist().await?;

            for skipped in &report.skipped_sources {
                warn!(source = %skipped.name, reason = %skipped.reason, "skipped source");
            }
            if !report.skipped_articles.is_empty() {
                warn!(count = report.skipped_articles.len(), "some articles were skipped");
            }
            println!(
                "{} articles ingested, {} chunks indexed at {}",
                report.articles,
                report.chunks,
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask {
            question,
            category,
            date_from,
            date_to,
            top_k,
            stream,
            json,
        } => {
            let request = QueryRequest::new(question.clone())
                .with_filters(QueryFilters {
                    category: category.clone(),
                    date_from: *date_from,
                    date_to: *date_to,
                })
                .with_top_k(*top_k);
            let service = RagService::new(embedder, index, cli.synthesizer(), articles, &settings);

            if *stream {
                let mut stdout = tokio::io::stdout();
                let started = service.answer_stream(&request).await;
                newsiq_core::write_event_stream(started, &mut stdout).await?;
                stdout.flush().await?;
                return Ok(());
            }

            let response = service.answer(&request).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }

            println!("{}\n", response.answer);
            for (position, article) in response.articles.iter().enumerate() {
                println!(
                    "[{}] {} ({}, {})\n    {}",
                    position + 1,
                    article.title,
                    article.source,
                    article.published_at.format("%Y-%m-%d"),
                    article.url
                );
            }
        }
    }

    Ok(())
}

fn http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("newsiq/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(20))
        .build()?)
}
