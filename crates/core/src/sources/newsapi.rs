use crate::chunking::HtmlCleaner;
use crate::error::IngestError;
use crate::models::ArticleCandidate;
use crate::traits::ArticleSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

pub const NEWSAPI_BASE_URL: &str = "https://newsapi.org/v2";
pub const DEFAULT_CATEGORIES: [&str; 4] = ["technology", "sports", "business", "general"];

const PAGE_SIZE: u32 = 20;

#[derive(Debug, Deserialize)]
struct HeadlinesResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<Headline>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Headline {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url_to_image: Option<String>,
    #[serde(default)]
    source: Option<HeadlineSource>,
}

#[derive(Debug, Deserialize)]
struct HeadlineSource {
    #[serde(default)]
    name: Option<String>,
}

/// NewsAPI top headlines, one request per category. Without a key the
/// source is a no-op.
pub struct NewsApiSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    categories: Vec<String>,
    cleaner: HtmlCleaner,
}

impl NewsApiSource {
    pub fn new(client: Client, api_key: Option<String>) -> Result<Self, IngestError> {
        Ok(Self {
            client,
            base_url: NEWSAPI_BASE_URL.to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            cleaner: HtmlCleaner::new()?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    async fn headlines(&self, api_key: &str, category: &str) -> Result<Vec<ArticleCandidate>, IngestError> {
        let page_size = PAGE_SIZE.to_string();
        let response = self
            .client
            .get(format!("{}/top-headlines", self.base_url))
            .query(&[
                ("apiKey", api_key),
                ("category", category),
                ("pageSize", page_size.as_str()),
                ("language", "en"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body: HeadlinesResponse = response.json().await?;
        if !status.is_success() || body.status != "ok" {
            return Err(IngestError::SourceResponse {
                source_name: self.name().to_string(),
                details: body.message.unwrap_or_else(|| status.to_string()),
            });
        }

        Ok(body
            .articles
            .into_iter()
            .filter_map(|headline| self.to_candidate(headline, category))
            .collect())
    }

    fn to_candidate(&self, headline: Headline, category: &str) -> Option<ArticleCandidate> {
        let title = headline.title?.trim().to_string();
        let url = headline.url?.trim().to_string();
        // NewsAPI marks pulled stories with this placeholder url.
        if url == "https://removed.com" {
            return None;
        }

        let content = [headline.content, headline.description]
            .into_iter()
            .flatten()
            .map(|text| self.cleaner.clean(&text))
            .find(|text| !text.is_empty())
            .unwrap_or_else(|| title.clone());
        let published_at = headline
            .published_at
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|date| date.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let source = headline
            .source
            .and_then(|source| source.name)
            .unwrap_or_else(|| "NewsAPI".to_string());

        let candidate = ArticleCandidate {
            title,
            source,
            url,
            published_at,
            category: category.to_string(),
            content,
            image_url: headline.url_to_image,
        };
        candidate.is_well_formed().then_some(candidate)
    }
}

#[async_trait]
impl ArticleSource for NewsApiSource {
    fn name(&self) -> &str {
        "newsapi"
    }

    async fn fetch(&self) -> Result<Vec<ArticleCandidate>, IngestError> {
        let Some(api_key) = self.api_key.as_deref() else {
            info!("no NewsAPI key configured, skipping");
            return Ok(Vec::new());
        };

        let mut candidates = Vec::new();
        for category in &self.categories {
            match self.headlines(api_key, category).await {
                Ok(items) => candidates.extend(items),
                Err(error) => warn!(category = %category, %error, "headline request failed"),
            }
        }
        Ok(candidates)
    }
}
