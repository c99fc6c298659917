use crate::context::CitationMapping;
use crate::error::RagError;
use crate::models::QueryArticle;
use crate::orchestrator::{AnswerEvent, AnswerStream};
use crate::traits::ArticleStore;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Blocking query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub articles: Vec<QueryArticle>,
}

/// Events on the wire, one JSON object per `data:` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Chunk {
        content: String,
        articles: Option<Vec<QueryArticle>>,
        article_mapping: Option<CitationMapping>,
        done: bool,
    },
    Done,
    Error {
        message: String,
    },
}

impl From<AnswerEvent> for StreamEvent {
    fn from(event: AnswerEvent) -> Self {
        let article_mapping = if event.article_mapping.is_empty() {
            None
        } else {
            Some(event.article_mapping)
        };

        StreamEvent::Chunk {
            content: event.content,
            articles: event.articles,
            article_mapping,
            done: event.done,
        }
    }
}

impl From<&RagError> for StreamEvent {
    fn from(error: &RagError) -> Self {
        StreamEvent::Error {
            message: error.to_string(),
        }
    }
}

impl StreamEvent {
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

async fn send<W>(writer: &mut W, event: &StreamEvent) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(event.to_sse_frame()?.as_bytes()).await?;
    writer.flush().await
}

/// Drives an answer stream into `writer` as server-sent events, ending with
/// either `done` or a single `error`. A write failure drops the stream, which
/// stops generation.
pub async fn write_event_stream<A, W>(
    started: Result<AnswerStream<'_, A>, RagError>,
    writer: &mut W,
) -> std::io::Result<()>
where
    A: ArticleStore + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut stream = match started {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%error, "answer stream could not start");
            return send(writer, &StreamEvent::from(&error)).await;
        }
    };

    let mut emitted = 0usize;
    while let Some(item) = stream.next_event().await {
        match item {
            Ok(event) => {
                send(writer, &StreamEvent::from(event)).await?;
                emitted += 1;
            }
            Err(error) => {
                warn!(%error, emitted, "answer stream failed");
                return send(writer, &StreamEvent::from(&error)).await;
            }
        }
    }

    debug!(emitted, "answer stream complete");
    send(writer, &StreamEvent::Done).await
}
