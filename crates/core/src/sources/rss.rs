use super::page::extract_article_text;
use crate::chunking::HtmlCleaner;
use crate::error::IngestError;
use crate::models::ArticleCandidate;
use crate::traits::ArticleSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub url: String,
    pub category: String,
    pub source: String,
}

impl FeedConfig {
    pub fn new(url: impl Into<String>, category: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            category: category.into(),
            source: source.into(),
        }
    }
}

pub fn default_feeds() -> Vec<FeedConfig> {
    vec![
        FeedConfig::new("https://feeds.arstechnica.com/arstechnica/index", "technology", "Ars Technica"),
        FeedConfig::new("https://www.espn.com/espn/rss/news", "sports", "ESPN"),
        FeedConfig::new("https://www.thehindu.com/news/national/feeder/default.rss", "general", "The Hindu"),
        FeedConfig::new("https://indianexpress.com/section/india/feed/", "general", "The Indian Express"),
    ]
}

struct FeedPatterns {
    item: Regex,
    title: Regex,
    link: Regex,
    description: Regex,
    encoded: Regex,
    pub_date: Regex,
    cdata: Regex,
    media_url: Regex,
    enclosure: Regex,
    img_src: Regex,
}

fn element(tag: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*?)</{tag}>"))
}

impl FeedPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            item: element("item")?,
            title: element("title")?,
            link: element("link")?,
            description: element("description")?,
            encoded: element("content:encoded")?,
            pub_date: element("pubDate")?,
            cdata: Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>")?,
            media_url: Regex::new(r#"(?i)<media:(?:content|thumbnail)\b[^>]*\burl=["']([^"']+)["']"#)?,
            enclosure: Regex::new(r#"(?i)<enclosure\b[^>]*\btype=["']image/[^>]*>"#)?,
            img_src: Regex::new(r#"(?i)<img\b[^>]*\bsrc=["']([^"']+)["']"#)?,
        })
    }

    fn inner(&self, pattern: &Regex, item: &str) -> Option<String> {
        let raw = pattern.captures(item)?.get(1)?.as_str();
        Some(self.cdata.replace_all(raw, "$1").trim().to_string())
    }

    fn image(&self, item: &str, body_html: &str) -> Option<String> {
        if let Some(captures) = self.media_url.captures(item) {
            return Some(captures[1].to_string());
        }
        if let Some(tag) = self.enclosure.find(item) {
            if let Some(url) = attribute(tag.as_str(), "url") {
                return Some(url);
            }
        }
        self.img_src
            .captures(body_html)
            .map(|captures| captures[1].to_string())
    }
}

fn attribute(tag: &str, name: &str) -> Option<String> {
    let start = tag.find(&format!("{name}="))? + name.len() + 1;
    let rest = &tag[start..];
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let rest = &rest[1..];
    rest.find(quote).map(|end| rest[..end].to_string())
}

fn unescape_markup(html: &str) -> String {
    html.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Fetches each configured RSS 2.0 feed. One unreachable feed is logged and
/// skipped; the source only fails when every feed does.
pub struct RssSource {
    client: Client,
    feeds: Vec<FeedConfig>,
    cleaner: HtmlCleaner,
    patterns: FeedPatterns,
    full_text: bool,
}

impl RssSource {
    pub fn new(client: Client, feeds: Vec<FeedConfig>) -> Result<Self, IngestError> {
        Ok(Self {
            client,
            feeds,
            cleaner: HtmlCleaner::new()?,
            patterns: FeedPatterns::new()?,
            full_text: false,
        })
    }

    /// Replace feed summaries with the linked page's text when it is longer.
    pub fn with_full_text(mut self, enabled: bool) -> Self {
        self.full_text = enabled;
        self
    }

    /// Feed bodies are often HTML escaped inside XML, so markup is stripped
    /// once more after the first unescape.
    fn plain_text(&self, html: &str) -> String {
        self.cleaner.clean(&self.cleaner.clean(html))
    }

    pub fn parse_feed(&self, xml: &str, feed: &FeedConfig) -> Vec<ArticleCandidate> {
        let patterns = &self.patterns;
        patterns
            .item
            .captures_iter(xml)
            .filter_map(|captures| {
                let item = captures.get(1)?.as_str();
                let title = self.plain_text(&patterns.inner(&patterns.title, item)?);
                let url = patterns.inner(&patterns.link, item)?;
                let body_html = patterns
                    .inner(&patterns.encoded, item)
                    .or_else(|| patterns.inner(&patterns.description, item))
                    .unwrap_or_default();
                let content = self.plain_text(&body_html);
                if content.is_empty() {
                    return None;
                }

                let published_at = patterns
                    .inner(&patterns.pub_date, item)
                    .and_then(|raw| DateTime::parse_from_rfc2822(&raw).ok())
                    .map(|date| date.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                let image_url = patterns.image(item, &unescape_markup(&body_html));

                let candidate = ArticleCandidate {
                    title,
                    source: feed.source.clone(),
                    url,
                    published_at,
                    category: feed.category.clone(),
                    content,
                    image_url,
                };
                candidate.is_well_formed().then_some(candidate)
            })
            .collect()
    }

    async fn page_text(&self, url: &str) -> Result<String, IngestError> {
        let html = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(extract_article_text(&html))
    }

    async fn fetch_feed(&self, feed: &FeedConfig) -> Result<Vec<ArticleCandidate>, IngestError> {
        let response = self.client.get(&feed.url).send().await?;
        if !response.status().is_success() {
            return Err(IngestError::FeedParse {
                feed: feed.url.clone(),
                details: response.status().to_string(),
            });
        }
        let xml = response.text().await?;
        let mut candidates = self.parse_feed(&xml, feed);

        if self.full_text {
            for candidate in &mut candidates {
                match self.page_text(&candidate.url).await {
                    Ok(text) if text.len() > candidate.content.len() => candidate.content = text,
                    Ok(_) => {}
                    Err(error) => debug!(url = %candidate.url, %error, "keeping feed summary"),
                }
            }
        }

        Ok(candidates)
    }
}

#[async_trait]
impl ArticleSource for RssSource {
    fn name(&self) -> &str {
        "rss"
    }

    async fn fetch(&self) -> Result<Vec<ArticleCandidate>, IngestError> {
        let mut candidates = Vec::new();
        let mut last_error = None;
        let mut reached = 0usize;

        for feed in &self.feeds {
            match self.fetch_feed(feed).await {
                Ok(items) => {
                    reached += 1;
                    debug!(feed = %feed.url, items = items.len(), "parsed feed");
                    candidates.extend(items);
                }
                Err(error) => {
                    warn!(feed = %feed.url, %error, "feed unavailable");
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) if reached == 0 => Err(error),
            _ => Ok(candidates),
        }
    }
}
