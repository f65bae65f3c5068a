//! # Completion client
//!
//! Sends a built [`PromptTemplate`] to the completion service and exposes the
//! answer as a stream of cumulative snapshots.
//!
//! ## Wire protocol
//! - `POST {base_url}/text` with a JSON body `{model, template, variables}` and
//!   an `Identifier` header chosen by the caller.
//! - The response body is streamed. Each chunk, decoded as UTF-8, holds one or
//!   more concatenated JSON objects mapping slot names to their text so far.
//!   Only the last complete object in a chunk counts.
//!
//! ## Merge
//! Slot values are cumulative, not deltas: every key of a chunk's object
//! replaces the accumulator's value for that key, and the whole accumulator is
//! yielded as the next [`Snapshot`]. A chunk without a complete object fails
//! the stream; snapshots already yielded stay valid.
//!
//! ```no_run
//! use awful_rp::api::CompletionClient;
//! use awful_rp::template::PromptTemplate;
//! use futures::StreamExt;
//!
//! # async fn run(prompt: PromptTemplate) -> Result<(), awful_rp::error::RpError> {
//! let client = CompletionClient::new("http://localhost:8080", "my-model", "session-1");
//! let mut stream = client.stream(&prompt).await?;
//! while let Some(snapshot) = stream.next().await {
//!     println!("{:?}", snapshot?.get("text"));
//! }
//! # Ok(())
//! # }
//! ```

use std::io::{Write, stdout};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, SetAttribute, SetForegroundColor},
};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::config::RpConfig;
use crate::error::RpError;
use crate::template::{GenerationVariables, PromptTemplate, TemplateVariables};

/// Slot name → latest generated text.
pub type Snapshot = GenerationVariables;

pub type SnapshotStream = BoxStream<'static, Result<Snapshot, RpError>>;

/// Body of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub template: String,
    pub variables: TemplateVariables,
}

/// One entry of the process-wide completion log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRecord {
    pub model: String,
    pub template: String,
    pub variables: TemplateVariables,
    pub timestamp: DateTime<Utc>,
}

static COMPLETION_HISTORY: Lazy<Mutex<Vec<CompletionRecord>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn record_completion(request: &CompletionRequest) {
    let record = CompletionRecord {
        model: request.model.clone(),
        template: request.template.clone(),
        variables: request.variables.clone(),
        timestamp: Utc::now(),
    };
    let mut history = COMPLETION_HISTORY
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    history.push(record);
}

/// Every request sent by this process, oldest first. Append-only.
pub fn completion_history() -> Vec<CompletionRecord> {
    COMPLETION_HISTORY
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// HTTP client for the completion service.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    identifier: String,
}

impl CompletionClient {
    pub fn new(base_url: &str, model: &str, identifier: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            identifier: identifier.to_string(),
        }
    }

    /// Client for the service named in `config`. Without a configured
    /// identifier, one is derived from the current time.
    pub fn from_config(config: &RpConfig) -> Self {
        let identifier = config
            .identifier
            .clone()
            .unwrap_or_else(|| format!("rp-{}", Utc::now().timestamp_millis()));
        Self::new(&config.service_base_url, &config.model, &identifier)
    }

    /// Send `prompt` and stream the generated slots.
    ///
    /// # Errors
    /// Transport errors, and [`RpError::Status`] when the service answers with
    /// a non-success status. Errors inside the body surface as stream items.
    pub async fn stream(&self, prompt: &PromptTemplate) -> Result<SnapshotStream, RpError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            template: prompt.template.clone(),
            variables: prompt.variables.clone(),
        };
        record_completion(&request);

        let url = format!("{}/text", self.base_url);
        debug!(
            url = %url,
            model = %self.model,
            total_tokens = prompt.total_tokens,
            "Sending completion request"
        );

        let response = self
            .http
            .post(&url)
            .header("Identifier", &self.identifier)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Completion request failed");
            return Err(RpError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(snapshot_stream(response.bytes_stream()))
    }

    /// Send `prompt` and wait for the final snapshot.
    pub async fn complete(&self, prompt: &PromptTemplate) -> Result<Snapshot, RpError> {
        let mut stream = self.stream(prompt).await?;
        let mut last = Snapshot::new();
        while let Some(snapshot) = stream.next().await {
            last = snapshot?;
        }
        Ok(last)
    }
}

/// Turn raw body chunks into cumulative snapshots.
///
/// Empty chunks are skipped. A non-empty chunk without a complete JSON object
/// ends the stream with [`RpError::MissingJsonObject`].
pub fn snapshot_stream<S, B, E>(chunks: S) -> SnapshotStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<RpError> + Send + 'static,
{
    stream::try_unfold(
        (Box::pin(chunks), Snapshot::new()),
        |(mut chunks, mut snapshot)| async move {
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.map_err(Into::<RpError>::into)?;
                if chunk.as_ref().is_empty() {
                    continue;
                }

                let text = String::from_utf8_lossy(chunk.as_ref()).into_owned();
                let object = last_json_object(&text)
                    .ok_or_else(|| RpError::MissingJsonObject(text.clone()))?;
                for (key, value) in object {
                    let value = match value {
                        Value::String(text) => text,
                        other => other.to_string(),
                    };
                    snapshot.insert(key, value);
                }
                debug!(slots = snapshot.len(), "Received completion chunk");

                return Ok(Some((snapshot.clone(), (chunks, snapshot))));
            }
            Ok::<_, RpError>(None)
        },
    )
    .boxed()
}

/// The last complete JSON object in `text`, if any.
///
/// One backward scan pairs every `}` with its `{`, skipping string contents.
/// The pairs are then tried from the rightmost end leftwards until one parses
/// as an object.
fn last_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let bytes = text.as_bytes();
    let mut open_ends = Vec::new();
    let mut candidates = Vec::new();
    let mut in_string = false;

    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b'"' if !is_escaped(bytes, i) => in_string = !in_string,
            b'}' if !in_string => open_ends.push(i),
            b'{' if !in_string => {
                if let Some(end) = open_ends.pop() {
                    candidates.push((i, end));
                }
            }
            _ => {}
        }
    }

    candidates.sort_unstable_by(|a, b| b.1.cmp(&a.1));
    candidates
        .into_iter()
        .find_map(|(start, end)| match serde_json::from_str::<Value>(&text[start..=end]) {
            Ok(Value::Object(object)) => Some(object),
            _ => None,
        })
}

fn is_escaped(bytes: &[u8], index: usize) -> bool {
    bytes[..index]
        .iter()
        .rev()
        .take_while(|&&b| b == b'\\')
        .count()
        % 2
        == 1
}

/// Drain `stream`, printing the growth of `slot` to stdout, and return the
/// final snapshot.
pub async fn print_stream(mut stream: SnapshotStream, slot: &str) -> Result<Snapshot, RpError> {
    let mut stdout = stdout();
    stdout.execute(SetForegroundColor(Color::Blue))?;
    stdout.execute(SetAttribute(Attribute::Bold))?;

    let mut printed = String::new();
    let mut last = Snapshot::new();
    let result = loop {
        match stream.next().await {
            Some(Ok(snapshot)) => {
                if let Some(value) = snapshot.get(slot) {
                    match value.strip_prefix(printed.as_str()) {
                        Some(suffix) => write!(stdout, "{suffix}")?,
                        None => write!(stdout, "\n{value}")?,
                    }
                    stdout.flush()?;
                    printed = value.clone();
                }
                last = snapshot;
            }
            Some(Err(err)) => {
                error!("Completion stream failed: {}", err);
                break Err(err);
            }
            None => break Ok(()),
        }
    };

    stdout.execute(SetAttribute(Attribute::Reset))?;
    stdout.execute(SetForegroundColor(Color::Reset))?;
    writeln!(stdout)?;

    result.map(|_| last)
}
