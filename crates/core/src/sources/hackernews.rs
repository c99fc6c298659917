use crate::chunking::HtmlCleaner;
use crate::error::IngestError;
use crate::models::ArticleCandidate;
use crate::traits::ArticleSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

pub const HACKER_NEWS_API: &str = "https://hacker-news.firebaseio.com/v0";

#[derive(Debug, Deserialize)]
struct Story {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    time: Option<i64>,
}

/// Top stories from the Hacker News Firebase API, filed under technology.
pub struct HackerNewsSource {
    client: Client,
    base_url: String,
    limit: usize,
    cleaner: HtmlCleaner,
}

impl HackerNewsSource {
    pub fn new(client: Client, limit: usize) -> Result<Self, IngestError> {
        Ok(Self {
            client,
            base_url: HACKER_NEWS_API.to_string(),
            limit,
            cleaner: HtmlCleaner::new()?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn story(&self, id: u64) -> Result<Option<Story>, IngestError> {
        let response = self
            .client
            .get(format!("{}/item/{id}.json", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    fn to_candidate(&self, story: Story) -> Option<ArticleCandidate> {
        let title = story.title?.trim().to_string();
        let url = story.url?.trim().to_string();
        let body = story
            .text
            .map(|text| self.cleaner.clean(&text))
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| title.clone());
        let published_at = story
            .time
            .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
            .unwrap_or_else(Utc::now);

        let candidate = ArticleCandidate {
            title,
            source: "Hacker News".to_string(),
            url,
            published_at,
            category: "technology".to_string(),
            content: body,
            image_url: None,
        };
        candidate.is_well_formed().then_some(candidate)
    }
}

#[async_trait]
impl ArticleSource for HackerNewsSource {
    fn name(&self) -> &str {
        "hackernews"
    }

    async fn fetch(&self) -> Result<Vec<ArticleCandidate>, IngestError> {
        let response = self
            .client
            .get(format!("{}/topstories.json", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(IngestError::SourceResponse {
                source_name: self.name().to_string(),
                details: response.status().to_string(),
            });
        }
        let ids: Vec<u64> = response.json().await?;

        let mut candidates = Vec::new();
        for id in ids.into_iter().take(self.limit) {
            match self.story(id).await {
                Ok(Some(story)) => candidates.extend(self.to_candidate(story)),
                Ok(None) => {}
                Err(error) => debug!(id, %error, "skipping story"),
            }
        }

        Ok(candidates)
    }
}
