use crate::error::RagError;
use crate::traits::AnswerSynthesizer;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const NO_ANSWER_GENERATED: &str = "No answer generated.";

/// Answer fragments in generation order. Exhaustion means the answer is
/// complete; an `Err` item is terminal.
pub type TokenStream = BoxStream<'static, Result<String, RagError>>;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<ChatContent>,
}

#[derive(Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiSynthesizer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiSynthesizer {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.2,
        }
    }

    async fn send(&self, system_prompt: &str, user_prompt: &str, stream: bool) -> Result<reqwest::Response, RagError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: self.temperature,
            stream,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|error| RagError::GenerationUnavailable(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::GenerationUnavailable(format!("{status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl AnswerSynthesizer for OpenAiSynthesizer {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, RagError> {
        let response = self.send(system_prompt, user_prompt, false).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|error| RagError::GenerationUnavailable(error.to_string()))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .unwrap_or_else(|| NO_ANSWER_GENERATED.to_string()))
    }

    async fn generate_stream(&self, system_prompt: &str, user_prompt: &str) -> Result<TokenStream, RagError> {
        let response = self.send(system_prompt, user_prompt, true).await?;
        Ok(sse_tokens(response.bytes_stream()).boxed())
    }
}

struct SseState<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, RagError>>,
    finished: bool,
}

impl<S> SseState<S> {
    /// Moves every complete line out of the buffer. Stops at `[DONE]` or at
    /// the first malformed event.
    fn drain_lines(&mut self) {
        while !self.finished {
            let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') else {
                return;
            };
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, raw: &[u8]) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim_end_matches(['\r', '\n']),
            Err(error) => return self.fail(format!("stream was not utf-8: {error}")),
        };
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.finished = true;
            return;
        }

        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) if chunk.error.is_some() => {
                let details = chunk.error.map(|error| error.to_string()).unwrap_or_default();
                self.fail(format!("backend reported: {details}"));
            }
            Ok(chunk) => {
                let content = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta)
                    .and_then(|delta| delta.content)
                    .filter(|content| !content.is_empty());
                if let Some(content) = content {
                    self.pending.push_back(Ok(content));
                }
            }
            Err(error) => self.fail(format!("malformed stream event: {error}")),
        }
    }

    fn fail(&mut self, details: String) {
        self.pending.push_back(Err(RagError::GenerationUnavailable(details)));
        self.finished = true;
    }
}

/// Decodes `data:` server-sent events carrying chat completion deltas. A body
/// that ends without `data: [DONE]` yields a terminal error.
pub fn sse_tokens<S, B, E>(inner: S) -> impl Stream<Item = Result<String, RagError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = SseState {
        inner: Box::pin(inner),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.inner.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(bytes.as_ref());
                    state.drain_lines();
                }
                Some(Err(error)) => state.fail(error.to_string()),
                None => {
                    state.buffer.push(b'\n');
                    state.drain_lines();
                    if !state.finished {
                        state.fail("stream ended before [DONE]".to_string());
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn delta(content: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({ "choices": [{ "delta": { "content": content } }] })
        )
    }

    async fn collect(chunks: Vec<Result<String, String>>) -> Vec<Result<String, RagError>> {
        sse_tokens(stream::iter(chunks)).collect().await
    }

    #[tokio::test]
    async fn fragments_split_across_reads_are_reassembled() {
        let body = format!("{}{}data: [DONE]\n\n", delta("Hello"), delta(" world"));
        let (head, tail) = body.split_at(17);

        let tokens = collect(vec![Ok(head.to_string()), Ok(tail.to_string())]).await;
        let tokens: Vec<String> = tokens.into_iter().map(|token| token.unwrap()).collect();

        assert_eq!(tokens, vec!["Hello".to_string(), " world".to_string()]);
    }

    #[tokio::test]
    async fn nothing_is_read_after_done() {
        let body = format!("{}data: [DONE]\n\n{}", delta("only"), delta("ignored"));
        let tokens = collect(vec![Ok(body)]).await;
        assert_eq!(tokens.len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_is_terminal_error() {
        let tokens = collect(vec![Ok(delta("partial")), Err("connection reset".to_string())]).await;

        assert_eq!(tokens.len(), 2);
        assert!(matches!(&tokens[0], Ok(token) if token == "partial"));
        assert!(matches!(&tokens[1], Err(RagError::GenerationUnavailable(_))));
    }

    #[tokio::test]
    async fn body_ending_without_done_is_an_error() {
        let tokens = collect(vec![Ok(delta("partial"))]).await;

        assert_eq!(tokens.len(), 2);
        assert!(matches!(&tokens[0], Ok(token) if token == "partial"));
        assert!(matches!(
            &tokens[1],
            Err(RagError::GenerationUnavailable(details)) if details.contains("[DONE]")
        ));
    }

    #[tokio::test]
    async fn malformed_event_stops_the_stream() {
        let body = format!("data: {{not json\n\n{}", delta("late"));
        let tokens = collect(vec![Ok(body)]).await;

        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].is_err());
    }

    #[tokio::test]
    async fn blocking_generation_reads_first_choice() -> Result<(), RagError> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({ "model": "gpt-4o-mini", "temperature": 0.2 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "Grounded (Article 1)." } }]
            })))
            .mount(&server)
            .await;

        let synthesizer = OpenAiSynthesizer::new("key", server.uri(), DEFAULT_CHAT_MODEL);
        let answer = synthesizer.generate("system", "user").await?;

        assert_eq!(answer, "Grounded (Article 1).");
        Ok(())
    }

    #[tokio::test]
    async fn empty_choices_fall_back_to_fixed_text() -> Result<(), RagError> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let synthesizer = OpenAiSynthesizer::new("key", server.uri(), DEFAULT_CHAT_MODEL);
        assert_eq!(synthesizer.generate("s", "u").await?, NO_ANSWER_GENERATED);
        Ok(())
    }

    #[tokio::test]
    async fn streaming_endpoint_yields_deltas() -> Result<(), RagError> {
        let server = MockServer::start().await;
        let body = format!("{}{}data: [DONE]\n\n", delta("Rates "), delta("rose (Article 1)."));
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({ "stream": true })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let synthesizer = OpenAiSynthesizer::new("key", server.uri(), DEFAULT_CHAT_MODEL);
        let mut tokens = synthesizer.generate_stream("s", "u").await?;
        let mut answer = String::new();
        while let Some(token) = tokens.next().await {
            answer.push_str(&token?);
        }

        assert_eq!(answer, "Rates rose (Article 1).");
        Ok(())
    }

    #[tokio::test]
    async fn auth_failure_is_generation_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let synthesizer = OpenAiSynthesizer::new("bad", server.uri(), DEFAULT_CHAT_MODEL);
        let result = synthesizer.generate_stream("s", "u").await;
        assert!(matches!(result, Err(RagError::GenerationUnavailable(_))));
    }
}
