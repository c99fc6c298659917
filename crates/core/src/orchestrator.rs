use crate::context::{CitationMapping, ContextBuilder, GroundingContext, NO_RELEVANT_ARTICLES, SYSTEM_PROMPT};
use crate::embeddings::Embedder;
use crate::error::RagError;
use crate::events::QueryResponse;
use crate::models::{QueryArticle, QueryFilters, RagSettings, RetrievalRecord, SearchQuery};
use crate::query::{merge_with_fallback, prepare_query};
use crate::synthesis::{TokenStream, NO_ANSWER_GENERATED};
use crate::traits::{AnswerSynthesizer, ArticleStore, VectorIndex};
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub question: String,
    pub filters: QueryFilters,
    pub top_k: Option<usize>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            filters: QueryFilters::default(),
            top_k: None,
        }
    }

    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// Answers questions over the indexed corpus. Every call builds its own
/// records, context and citation mapping; nothing is shared between queries.
pub struct RagService<E, V, S, A>
where
    E: Embedder,
    V: VectorIndex,
    S: AnswerSynthesizer,
    A: ArticleStore,
{
    embedder: E,
    index: V,
    synthesizer: S,
    articles: A,
    settings: RagSettings,
}

impl<E, V, S, A> RagService<E, V, S, A>
where
    E: Embedder,
    V: VectorIndex,
    S: AnswerSynthesizer,
    A: ArticleStore,
{
    pub fn new(embedder: E, index: V, synthesizer: S, articles: A, settings: &RagSettings) -> Self {
        Self {
            embedder,
            index,
            synthesizer,
            articles,
            settings: settings.clone(),
        }
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn index(&self) -> &V {
        &self.index
    }

    pub fn synthesizer(&self) -> &S {
        &self.synthesizer
    }

    pub fn articles(&self) -> &A {
        &self.articles
    }

    pub async fn retrieve(&self, request: &QueryRequest) -> Result<Vec<RetrievalRecord>, RagError> {
        if request.question.trim().is_empty() {
            return Err(RagError::InvalidQuery("question is empty".to_string()));
        }
        let top_k = request.top_k.unwrap_or(self.settings.top_k);
        if top_k == 0 {
            return Err(RagError::InvalidQuery("top_k must be at least 1".to_string()));
        }

        let prepared = prepare_query(
            &request.question,
            request.filters.category.as_deref(),
            &self.settings,
        );
        debug!(
            category = prepared.category.as_deref().unwrap_or("-"),
            inferred = prepared.category_inferred,
            "prepared query"
        );

        let query_vector = self
            .embedder
            .embed(&[prepared.embedding_text])
            .await
            .map_err(|error| RagError::GenerationUnavailable(error.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RagError::GenerationUnavailable("embedder returned no vector for the question".to_string())
            })?;

        let mut query = SearchQuery::from_filters(top_k, &request.filters);
        query.category = prepared.category;

        let records = self.index.search_vector(&query_vector, &query).await?;
        if query.category.is_none() || !self.settings.category_fallback || records.len() >= top_k {
            return Ok(records);
        }

        info!(
            category = query.category.as_deref().unwrap_or_default(),
            found = records.len(),
            top_k,
            "category search came up short, broadening"
        );
        let unfiltered = self
            .index
            .search_vector(&query_vector, &query.without_category())
            .await?;
        Ok(merge_with_fallback(records, unfiltered, top_k))
    }

    pub async fn answer(&self, request: &QueryRequest) -> Result<QueryResponse, RagError> {
        let context = ContextBuilder::build(self.retrieve(request).await?);
        if context.is_empty() {
            info!("no relevant records, skipping synthesis");
            return Ok(QueryResponse {
                answer: NO_RELEVANT_ARTICLES.to_string(),
                articles: Vec::new(),
            });
        }

        let prompt = context.user_prompt(&request.question);
        let answer = self.synthesizer.generate(SYSTEM_PROMPT, &prompt).await?;
        let articles = resolve_articles(&self.articles, &context).await?;

        Ok(QueryResponse { answer, articles })
    }

    pub async fn answer_stream(&self, request: &QueryRequest) -> Result<AnswerStream<'_, A>, RagError> {
        let context = ContextBuilder::build(self.retrieve(request).await?);
        if context.is_empty() {
            info!("no relevant records, skipping synthesis");
            return Ok(AnswerStream::no_data(&self.articles));
        }

        let prompt = context.user_prompt(&request.question);
        let tokens = self.synthesizer.generate_stream(SYSTEM_PROMPT, &prompt).await?;
        Ok(AnswerStream::streaming(&self.articles, context, tokens))
    }
}

/// Citation metadata for each distinct article in first-ordinal order. Ids
/// the store no longer knows fall back to the chunk's denormalized fields.
pub async fn resolve_articles<A: ArticleStore + ?Sized>(
    store: &A,
    context: &GroundingContext,
) -> Result<Vec<QueryArticle>, RagError> {
    let ids = context.mapping().distinct_article_ids();
    let found: HashMap<i64, QueryArticle> = store
        .get_articles_by_ids(&ids)
        .await?
        .iter()
        .map(|article| (article.id, QueryArticle::from(article)))
        .collect();

    Ok(ids
        .into_iter()
        .filter_map(|id| {
            found.get(&id).cloned().or_else(|| {
                context
                    .excerpts()
                    .iter()
                    .find(|item| item.record.article_id == id)
                    .map(|item| QueryArticle {
                        id,
                        title: item.record.metadata.title.clone(),
                        source: item.record.metadata.source.clone(),
                        url: item.record.metadata.url.clone(),
                        published_at: item.record.metadata.published_at,
                        category: item.record.metadata.category.clone(),
                    })
            })
        })
        .collect())
}

/// One emission of a streamed answer. `content` is the whole answer so far.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerEvent {
    pub content: String,
    pub articles: Option<Vec<QueryArticle>>,
    pub article_mapping: CitationMapping,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    NoData,
    Streaming,
    Finished,
}

/// Pull-driven answer stream. Each `next_event` call pulls at most what is
/// needed for one emission from the synthesizer; dropping the stream stops
/// generation.
pub struct AnswerStream<'a, A: ?Sized> {
    articles: &'a A,
    context: GroundingContext,
    tokens: Option<TokenStream>,
    answer: String,
    state: StreamState,
}

impl<'a, A> AnswerStream<'a, A>
where
    A: ArticleStore + ?Sized,
{
    fn no_data(articles: &'a A) -> Self {
        Self {
            articles,
            context: GroundingContext::default(),
            tokens: None,
            answer: String::new(),
            state: StreamState::NoData,
        }
    }

    fn streaming(articles: &'a A, context: GroundingContext, tokens: TokenStream) -> Self {
        Self {
            articles,
            context,
            tokens: Some(tokens),
            answer: String::new(),
            state: StreamState::Streaming,
        }
    }

    pub fn mapping(&self) -> &CitationMapping {
        self.context.mapping()
    }

    pub fn answer_so_far(&self) -> &str {
        &self.answer
    }

    pub fn is_terminal(&self) -> bool {
        self.state == StreamState::Finished
    }

    pub fn has_next(&self) -> bool {
        !self.is_terminal()
    }

    fn finish(&mut self) {
        self.state = StreamState::Finished;
        self.tokens = None;
    }

    fn event(&self, articles: Option<Vec<QueryArticle>>, done: bool) -> AnswerEvent {
        AnswerEvent {
            content: self.answer.clone(),
            articles,
            article_mapping: self.context.mapping().clone(),
            done,
        }
    }

    /// `None` once terminal. An `Err` is itself terminal.
    pub async fn next_event(&mut self) -> Option<Result<AnswerEvent, RagError>> {
        match self.state {
            StreamState::Finished => None,
            StreamState::NoData => {
                self.finish();
                Some(Ok(AnswerEvent {
                    content: NO_RELEVANT_ARTICLES.to_string(),
                    articles: Some(Vec::new()),
                    article_mapping: CitationMapping::default(),
                    done: true,
                }))
            }
            StreamState::Streaming => loop {
                let next = match self.tokens.as_mut() {
                    Some(tokens) => tokens.next().await,
                    None => None,
                };

                match next {
                    Some(Ok(fragment)) => {
                        if fragment.is_empty() {
                            continue;
                        }
                        self.answer.push_str(&fragment);
                        return Some(Ok(self.event(None, false)));
                    }
                    Some(Err(error)) => {
                        self.finish();
                        return Some(Err(error));
                    }
                    None => {
                        self.tokens = None;
                        if self.answer.is_empty() {
                            self.answer.push_str(NO_ANSWER_GENERATED);
                        }
                        let resolved = resolve_articles(self.articles, &self.context).await;
                        let event = resolved.map(|articles| self.event(Some(articles), true));
                        self.finish();
                        return Some(event);
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{chunk_id, ArticleCreate, ChunkMetadata, IndexedChunk};
    use crate::stores::{MemoryArticleStore, MemoryVectorIndex};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct ScriptedSynthesizer {
        tokens: Vec<&'static str>,
        fail_after_tokens: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AnswerSynthesizer for ScriptedSynthesizer {
        async fn generate(&self, _system_prompt: &str, user_prompt: &str) -> Result<String, RagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(user_prompt.contains("Article 1:"));
            Ok(self.tokens.concat())
        }

        async fn generate_stream(&self, _system_prompt: &str, _user_prompt: &str) -> Result<TokenStream, RagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut items: Vec<Result<String, RagError>> =
                self.tokens.iter().map(|token| Ok(token.to_string())).collect();
            if self.fail_after_tokens {
                items.push(Err(RagError::GenerationUnavailable("backend dropped".to_string())));
            }
            Ok(stream::iter(items).boxed())
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        fn dimensions(&self) -> usize {
            4
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
            Err(RagError::EmbeddingUnavailable("401 unauthorized".to_string()))
        }
    }

    type TestService = RagService<CharacterNgramEmbedder, MemoryVectorIndex, ScriptedSynthesizer, MemoryArticleStore>;

    fn service(tokens: Vec<&'static str>) -> TestService {
        RagService::new(
            CharacterNgramEmbedder::default(),
            MemoryVectorIndex::new(),
            ScriptedSynthesizer {
                tokens,
                ..Default::default()
            },
            MemoryArticleStore::new(),
            &RagSettings::default(),
        )
    }

    async fn add_article(service: &TestService, slug: &str, category: &str, text: &str) -> i64 {
        let article = service
            .articles()
            .upsert_article_by_url(ArticleCreate {
                title: format!("Story {slug}"),
                source: "Unit".to_string(),
                url: format!("https://example.com/{slug}"),
                published_at: Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap(),
                category: category.to_string(),
                content: text.to_string(),
                image_url: None,
            })
            .await
            .unwrap();

        let chunk = IndexedChunk {
            chunk_id: chunk_id(article.id, 0),
            article_id: article.id,
            chunk_index: 0,
            text: text.to_string(),
            snippet: text.to_string(),
            metadata: ChunkMetadata::from(&article),
        };
        let vectors = service.embedder().embed(&[text.to_string()]).await.unwrap();
        service
            .index()
            .upsert_article_chunks(article.id, &[chunk], &vectors)
            .await
            .unwrap();
        article.id
    }

    #[tokio::test]
    async fn empty_corpus_short_circuits_without_synthesis() -> Result<(), RagError> {
        let service = service(vec!["never"]);

        let response = service.answer(&QueryRequest::new("Who won the election?")).await?;
        assert_eq!(response.answer, NO_RELEVANT_ARTICLES);
        assert!(response.articles.is_empty());

        let mut stream = service.answer_stream(&QueryRequest::new("Who won the election?")).await?;
        let event = stream.next_event().await.unwrap()?;
        assert_eq!(event.content, NO_RELEVANT_ARTICLES);
        assert!(event.done);
        assert!(stream.next_event().await.is_none());

        assert_eq!(service.synthesizer().calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn mapping_is_identical_in_every_emission() -> Result<(), RagError> {
        let service = service(vec!["Rates ", "rose ", "(Article 1)."]);
        let first = add_article(&service, "a", "business", "Central bank raised interest rates").await;
        let second = add_article(&service, "b", "business", "Bank earnings beat estimates").await;

        let request = QueryRequest::new("interest rates bank").with_top_k(2);
        let mut stream = service.answer_stream(&request).await?;

        let mut events = Vec::new();
        while let Some(event) = stream.next_event().await {
            events.push(event?);
        }

        assert_eq!(events.len(), 4);
        let mapping = events[0].article_mapping.clone();
        assert_eq!(mapping.len(), 2);
        assert!(events.iter().all(|event| event.article_mapping == mapping));
        assert_eq!(events[0].content, "Rates ");
        assert_eq!(events[2].content, "Rates rose (Article 1).");
        assert!(events.windows(2).all(|pair| pair[1].content.starts_with(&pair[0].content)));
        assert!(events[..3].iter().all(|event| event.articles.is_none() && !event.done));

        let last = events.last().unwrap();
        assert!(last.done);
        let ids: Vec<i64> = last.articles.as_ref().unwrap().iter().map(|article| article.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first) && ids.contains(&second));
        assert_eq!(ids[0], mapping.get(1).unwrap());
        assert!(stream.is_terminal());
        Ok(())
    }

    #[tokio::test]
    async fn midstream_failure_is_terminal_and_distinct() -> Result<(), RagError> {
        let service = RagService::new(
            CharacterNgramEmbedder::default(),
            MemoryVectorIndex::new(),
            ScriptedSynthesizer {
                tokens: vec!["Partial"],
                fail_after_tokens: true,
                ..Default::default()
            },
            MemoryArticleStore::new(),
            &RagSettings::default(),
        );
        let article = service
            .articles()
            .upsert_article_by_url(ArticleCreate {
                title: "Outage".to_string(),
                source: "Unit".to_string(),
                url: "https://example.com/outage".to_string(),
                published_at: Utc::now(),
                category: "technology".to_string(),
                content: "Cloud outage hits region".to_string(),
                image_url: None,
            })
            .await?;
        let chunk = IndexedChunk {
            chunk_id: chunk_id(article.id, 0),
            article_id: article.id,
            chunk_index: 0,
            text: article.content.clone(),
            snippet: article.content.clone(),
            metadata: ChunkMetadata::from(&article),
        };
        let vectors = service.embedder().embed(&[article.content.clone()]).await?;
        service.index().upsert_article_chunks(article.id, &[chunk], &vectors).await?;

        let mut stream = service.answer_stream(&QueryRequest::new("cloud outage")).await?;
        let partial = stream.next_event().await.unwrap()?;
        assert_eq!(partial.content, "Partial");
        assert!(matches!(
            stream.next_event().await,
            Some(Err(RagError::GenerationUnavailable(_)))
        ));
        assert!(stream.is_terminal());
        assert!(stream.next_event().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn thousand_char_article_keeps_one_citation_throughout() -> Result<(), Box<dyn std::error::Error>> {
        let service = service(vec!["Output rose ", "(Article 1)."]);
        let sentence = "Solar panel output rose sharply this quarter. ";
        let content: String = sentence.repeat(30).chars().take(1000).collect();
        assert_eq!(content.chars().count(), 1000);

        let pipeline = crate::ingest::IngestionPipeline::new(
            service.embedder(),
            service.index(),
            service.articles(),
            service.settings(),
        );
        let (article, chunk_count) = pipeline
            .ingest_article(ArticleCreate {
                title: "Solar".to_string(),
                source: "Unit".to_string(),
                url: "https://example.com/solar".to_string(),
                published_at: Utc::now(),
                category: "science".to_string(),
                content: content.clone(),
                image_url: None,
            })
            .await?;
        assert_eq!(chunk_count, 2);
        assert_eq!(service.index().chunk_ids_for(article.id).await.len(), 2);

        let mut stream = service
            .answer_stream(&QueryRequest::new("solar panel output").with_top_k(1))
            .await?;
        let first = stream.next_event().await.unwrap()?;
        let mut last = first.clone();
        while let Some(event) = stream.next_event().await {
            last = event?;
        }

        assert_eq!(first.article_mapping.iter().collect::<Vec<_>>(), vec![(1, article.id)]);
        assert_eq!(last.article_mapping, first.article_mapping);
        assert!(last.done);
        let articles = last.articles.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].id, article.id);
        assert_eq!(articles[0].title, "Solar");
        Ok(())
    }

    #[tokio::test]
    async fn embedder_outage_fails_fast_as_generation_unavailable() {
        let service = RagService::new(
            DownEmbedder,
            MemoryVectorIndex::new(),
            ScriptedSynthesizer::default(),
            MemoryArticleStore::new(),
            &RagSettings::default(),
        );

        let result = service.answer(&QueryRequest::new("anything")).await;
        assert!(matches!(result, Err(RagError::GenerationUnavailable(_))));
        assert_eq!(service.synthesizer().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn short_category_results_are_broadened_without_duplicates() -> Result<(), RagError> {
        let service = service(vec!["ok"]);
        let sports = add_article(&service, "s", "sports", "League final ends in penalties").await;
        let _other = add_article(&service, "g", "general", "City council approves league budget").await;
        let _third = add_article(&service, "t", "technology", "Streaming rights for the league").await;

        let request = QueryRequest::new("league final")
            .with_filters(QueryFilters {
                category: Some("sports".to_string()),
                ..Default::default()
            })
            .with_top_k(2);
        let records = service.retrieve(&request).await?;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].article_id, sports);
        assert_ne!(records[1].article_id, sports);
        Ok(())
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let service = service(vec![]);
        let result = service.retrieve(&QueryRequest::new("   ")).await;
        assert!(matches!(result, Err(RagError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_pulling_tokens() -> Result<(), RagError> {
        struct CountingSynthesizer {
            pulled: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl AnswerSynthesizer for CountingSynthesizer {
            async fn generate(&self, _s: &str, _u: &str) -> Result<String, RagError> {
                Ok(String::new())
            }

            async fn generate_stream(&self, _s: &str, _u: &str) -> Result<TokenStream, RagError> {
                let pulled = Arc::clone(&self.pulled);
                Ok(stream::iter(0..1_000)
                    .map(move |index| {
                        pulled.fetch_add(1, Ordering::SeqCst);
                        Ok(format!("t{index} "))
                    })
                    .boxed())
            }
        }

        let pulled = Arc::new(AtomicUsize::new(0));
        let service = RagService::new(
            CharacterNgramEmbedder::default(),
            MemoryVectorIndex::new(),
            CountingSynthesizer {
                pulled: Arc::clone(&pulled),
            },
            MemoryArticleStore::new(),
            &RagSettings::default(),
        );
        let article = service
            .articles()
            .upsert_article_by_url(ArticleCreate {
                title: "Long".to_string(),
                source: "Unit".to_string(),
                url: "https://example.com/long".to_string(),
                published_at: Utc::now(),
                category: "general".to_string(),
                content: "A long running story".to_string(),
                image_url: None,
            })
            .await?;
        let chunk = IndexedChunk {
            chunk_id: chunk_id(article.id, 0),
            article_id: article.id,
            chunk_index: 0,
            text: article.content.clone(),
            snippet: article.content.clone(),
            metadata: ChunkMetadata::from(&article),
        };
        let vectors = service.embedder().embed(&[article.content.clone()]).await?;
        service.index().upsert_article_chunks(article.id, &[chunk], &vectors).await?;

        let mut stream = service.answer_stream(&QueryRequest::new("long story")).await?;
        for _ in 0..3 {
            stream.next_event().await.unwrap()?;
        }
        drop(stream);

        assert_eq!(pulled.load(Ordering::SeqCst), 3);
        Ok(())
    }
}
