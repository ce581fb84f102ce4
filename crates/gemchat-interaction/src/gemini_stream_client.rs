//! GeminiStreamClient - streaming REST client for the Gemini API.
//!
//! Sends the conversation history to `:streamGenerateContent?alt=sse`, drives
//! a [`FrameDecoder`] over the response body and hands every text delta to
//! the caller as it arrives. Titles are generated through the non-streaming
//! `:generateContent` endpoint.

use async_trait::async_trait;
use futures::StreamExt;
use gemchat_core::completion::{CompletionOptions, CompletionService};
use gemchat_core::config::GeminiSettings;
use gemchat_core::conversation::Message;
use gemchat_core::error::{ChatError, Result};
use reqwest::{Client, Response, StatusCode, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::sse::{Frame, FrameDecoder, FrameError};

/// Header carrying the API key, so it never appears in request URLs.
const API_KEY_HEADER: &str = "x-goog-api-key";

const TITLE_PROMPT: &str = "Write a short title (at most six words) for the conversation below. \
Reply with the title only, without quotes or punctuation at the end.";

/// Longest title accepted from the model, in characters.
const MAX_TITLE_CHARS: usize = 80;

/// Completion client that talks to the Gemini HTTP API.
#[derive(Clone)]
pub struct GeminiStreamClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    title_model: String,
}

impl GeminiStreamClient {
    /// Creates a client for `model` against the public Gemini endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let settings = GeminiSettings {
            model: model.into(),
            ..GeminiSettings::default()
        };
        Self::from_settings(&settings, api_key)
    }

    /// Creates a client from configuration.
    pub fn from_settings(settings: &GeminiSettings, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            title_model: settings.title_model().to_string(),
        }
    }

    /// Overrides the endpoint base URL (everything before `/{model}:method`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Overrides the model used for title generation.
    pub fn with_title_model(mut self, model: impl Into<String>) -> Self {
        self.title_model = model.into();
        self
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{}", self.base_url, model, method)
    }

    async fn post(&self, url: String, query: &[(&str, &str)], body: &GenerateContentRequest) -> Result<Response> {
        let response = self
            .client
            .post(url)
            .query(query)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(body)
            .send()
            .await
            .map_err(|err| ChatError::network(describe("Gemini API request failed", err)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            return Err(map_http_error(status, body_text));
        }

        Ok(response)
    }

    /// Reads an SSE body to its end, emitting deltas.
    async fn read_event_stream(
        response: Response,
        options: &CompletionOptions,
        on_delta: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String> {
        // The body is owned by this function; every return path drops it and
        // releases the connection.
        let mut body = response.bytes_stream();
        let mut decoder = FrameDecoder::new();
        let mut accumulated = String::new();
        let mut deltas = 0usize;
        let mut skipped = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = options.cancel.cancelled() => {
                    tracing::debug!(deltas, "Stream cancelled");
                    return Err(ChatError::Cancelled);
                }
                next = body.next() => next,
            };

            let frames = match next {
                Some(Ok(chunk)) => decoder.feed(&chunk),
                Some(Err(err)) => {
                    return Err(ChatError::network(describe(
                        "Gemini stream interrupted",
                        err,
                    )));
                }
                None => decoder.finish().into_iter().collect(),
            };

            for frame in frames {
                match frame {
                    Frame::Data(payload) => match parse_delta(&payload) {
                        Ok(delta) if delta.is_empty() => {}
                        Ok(delta) => {
                            on_delta(&delta);
                            accumulated.push_str(&delta);
                            deltas += 1;
                        }
                        Err(FrameError::MissingText) => {
                            tracing::debug!("Frame without text skipped");
                        }
                        Err(err) => {
                            skipped += 1;
                            tracing::warn!("Skipping malformed frame: {}", err);
                        }
                    },
                    Frame::Done => break,
                }
            }

            if decoder.is_finished() {
                break;
            }
        }

        tracing::debug!(deltas, skipped, chars = accumulated.len(), "Stream finished");
        Ok(accumulated)
    }

    /// Handles endpoints that answer with a single JSON object.
    async fn read_single_response(response: Response, options: &CompletionOptions) -> Result<String> {
        let bytes = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => return Err(ChatError::Cancelled),
            bytes = response.bytes() => bytes
                .map_err(|err| ChatError::network(describe("Failed to read Gemini response", err)))?,
        };

        match serde_json::from_slice::<GenerateContentResponse>(&bytes) {
            Ok(parsed) => Ok(first_text(&parsed).unwrap_or_default().to_string()),
            Err(err) => {
                tracing::warn!("Non-streaming response could not be parsed: {}", err);
                Ok(String::new())
            }
        }
    }
}

#[async_trait]
impl CompletionService for GeminiStreamClient {
    async fn stream_completion(
        &self,
        history: &[Message],
        options: &CompletionOptions,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String> {
        if history.is_empty() {
            return Err(ChatError::invalid_input("history must not be empty"));
        }

        let request = GenerateContentRequest::from_history(history, options.search_enabled);
        let url = self.endpoint(&self.model, "streamGenerateContent");

        tracing::debug!(
            model = %self.model,
            messages = history.len(),
            search = options.search_enabled,
            "Opening completion stream"
        );

        let response = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => return Err(ChatError::Cancelled),
            response = self.post(url, &[("alt", "sse")], &request) => response?,
        };

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));

        if is_json {
            Self::read_single_response(response, options).await
        } else {
            Self::read_event_stream(response, options, on_delta).await
        }
    }

    async fn generate_title(&self, history: &[Message]) -> Result<String> {
        if history.is_empty() {
            return Err(ChatError::invalid_input("history must not be empty"));
        }

        let transcript = history
            .iter()
            .map(|message| format!("{}: {}", message.sender.wire_role(), message.text))
            .collect::<Vec<_>>()
            .join("\n");

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: format!("{TITLE_PROMPT}\n\n{transcript}"),
                }],
            }],
            tools: None,
        };

        let url = self.endpoint(&self.title_model, "generateContent");
        let response = self.post(url, &[], &request).await?;
        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| ChatError::frame_parse(describe("Failed to parse Gemini response", err)))?;

        first_text(&parsed)
            .and_then(clean_title)
            .ok_or_else(|| ChatError::frame_parse("Gemini API returned no title text"))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

impl GenerateContentRequest {
    fn from_history(history: &[Message], search_enabled: bool) -> Self {
        Self {
            contents: history
                .iter()
                .map(|message| Content {
                    role: message.sender.wire_role().to_string(),
                    parts: vec![Part {
                        text: message.text.clone(),
                    }],
                })
                .collect(),
            tools: search_enabled.then(|| {
                vec![Tool {
                    google_search: GoogleSearch {},
                }]
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

/// Text at `candidates[0].content.parts[0].text`.
fn first_text(response: &GenerateContentResponse) -> Option<&str> {
    response
        .candidates
        .as_ref()?
        .first()?
        .content
        .as_ref()?
        .parts
        .first()?
        .text
        .as_deref()
}

/// Extracts the text delta from one SSE payload.
fn parse_delta(payload: &str) -> std::result::Result<String, FrameError> {
    let parsed: GenerateContentResponse = serde_json::from_str(payload)
        .map_err(|err| FrameError::InvalidJson(err.to_string()))?;
    first_text(&parsed)
        .map(str::to_string)
        .ok_or(FrameError::MissingText)
}

/// Normalizes a model-written title: first line, no quotes or markdown.
fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let trimmed = line
        .trim_start_matches(['#', '*', '"', '\'', '`', ' '])
        .trim_end_matches(['*', '"', '\'', '`', '.', ' ']);
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_TITLE_CHARS).collect())
}

/// Error text without the request URL.
fn describe(context: &str, err: reqwest::Error) -> String {
    format!("{context}: {}", err.without_url())
}

fn map_http_error(status: StatusCode, body: String) -> ChatError {
    let message = serde_json::from_str::<ErrorWrapper>(&body)
        .map(|wrapper| {
            let status_text = wrapper.error.status.unwrap_or_default();
            let msg = wrapper.error.message.unwrap_or_else(|| body.clone());
            if status_text.is_empty() {
                msg
            } else {
                format!("{status_text}: {msg}")
            }
        })
        .unwrap_or_else(|_| body.clone());

    ChatError::transport(status.as_u16(), message)
}
