//! Rate-limited, retrying access to the classification service
//!
//! [`ModelWrapper`] is built once per run and shared as `Arc<ModelWrapper>`.
//! Every request passes through a fixed-size admission gate; a permit is held
//! for exactly one remote attempt, so callers sleeping between retries do not
//! occupy capacity.

use crate::backend::ClassificationBackend;
use crate::classifier::Classification;
use crate::label::{Label, LabelSchema};
use convoclass_core::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Exponential backoff for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (zero-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry.min(64) as i32);
        let secs = (self.initial_backoff.as_secs_f64() * factor).min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Point-in-time view of the wrapper's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModelStats {
    /// Remote attempts, including retries
    pub attempts: u64,

    /// Calls that produced a schema-valid label
    pub successes: u64,

    /// Calls that ended in an error
    pub failures: u64,

    /// Retries scheduled after transient failures
    pub retries: u64,

    /// Attempts currently holding a permit
    pub in_flight: usize,

    /// Highest `in_flight` observed
    pub peak_in_flight: usize,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a> {
    counters: &'a Counters,
}

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared gateway to the classification service
pub struct ModelWrapper {
    backend: Arc<dyn ClassificationBackend>,
    gate: Semaphore,
    max_concurrent: usize,
    retry: RetryPolicy,
    counters: Counters,
}

impl ModelWrapper {
    /// Create a wrapper admitting at most `max_concurrent` simultaneous requests
    pub fn new(backend: Arc<dyn ClassificationBackend>, max_concurrent: usize) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(Error::config("max_concurrent must be at least 1"));
        }

        Ok(Self {
            backend,
            gate: Semaphore::new(max_concurrent),
            max_concurrent,
            retry: RetryPolicy::default(),
            counters: Counters::default(),
        })
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Admission gate capacity
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Snapshot the call counters
    pub fn stats(&self) -> ModelStats {
        ModelStats {
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.counters.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    /// Classify a rendered prompt against `schema`
    ///
    /// # Errors
    ///
    /// - [`Error::Classification`] when retries are exhausted or the response
    ///   does not name a schema token
    /// - any non-transient backend error, unretried
    pub async fn classify(&self, prompt: &str, schema: &LabelSchema) -> Result<Classification> {
        let mut retry = 0u32;

        loop {
            match self.attempt(prompt).await {
                Ok(raw) => {
                    return match parse_response(&raw, schema) {
                        Ok(classification) => {
                            self.counters.successes.fetch_add(1, Ordering::Relaxed);
                            debug!(
                                backend = self.backend.name(),
                                label = %classification.label,
                                confidence = ?classification.confidence,
                                "Classified"
                            );
                            Ok(classification)
                        }
                        Err(e) => Err(self.fail("unparseable", e)),
                    };
                }

                Err(e) if e.is_transient() && retry < self.retry.max_retries => {
                    let delay = self.retry.backoff_for(retry);
                    retry += 1;
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("convoclass_retries_total").increment(1);
                    warn!(
                        backend = self.backend.name(),
                        error = %e,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        "Transient service error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }

                Err(e) if e.is_transient() => {
                    let e = Error::classification(format!(
                        "gave up after {} attempts: {}",
                        retry + 1,
                        e
                    ));
                    return Err(self.fail("exhausted", e));
                }

                Err(e) => return Err(self.fail("backend", e)),
            }
        }
    }

    /// One remote attempt under an admission permit
    async fn attempt(&self, prompt: &str) -> Result<String> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::internal("admission gate closed"))?;
        let _in_flight = InFlight::enter(&self.counters);

        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("convoclass_requests_total").increment(1);

        let start = Instant::now();
        let result = self.backend.complete(prompt).await;
        metrics::histogram!("convoclass_request_latency_us")
            .record(start.elapsed().as_micros() as f64);

        result
    }

    fn fail(&self, kind: &'static str, err: Error) -> Error {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("convoclass_request_errors_total", "kind" => kind).increment(1);
        debug!(backend = self.backend.name(), kind, error = %err, "Classification failed");
        err
    }
}

/// Parse raw service text into a schema-valid classification
///
/// Accepted shapes: a bare token (`"Yes."`, `**fact_checking**`), a token with a
/// confidence (`yes, 4` or `yes (confidence 0.8)`), an optional
/// `label:`/`classification:` prefix, or a JSON object with `label` (or
/// `classification`) and `confidence`, optionally inside a code fence.
pub fn parse_response(raw: &str, schema: &LabelSchema) -> Result<Classification> {
    let text = strip_code_fence(raw.trim());
    if text.is_empty() {
        return Err(Error::classification("empty response"));
    }

    let (candidates, confidence) = if text.starts_with('{') {
        let (label, confidence) = parse_json(text)?;
        (vec![label], confidence)
    } else {
        parse_plain(text)
    };

    let label = candidates
        .iter()
        .find_map(|c| resolve(c, schema))
        .ok_or_else(|| {
            Error::classification(format!(
                "response '{}' is not one of [{}]",
                preview(raw),
                schema
            ))
        })?;

    Ok(Classification {
        label,
        confidence: confidence.and_then(normalize_confidence),
    })
}

fn strip_code_fence(text: &str) -> &str {
    match text.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
            body.trim_end().trim_end_matches("```").trim()
        }
        None => text,
    }
}

fn parse_json(text: &str) -> Result<(String, Option<f32>)> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::classification(format!("malformed JSON response: {}", e)))?;

    let label = value
        .get("label")
        .or_else(|| value.get("classification"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::classification("JSON response has no label"))?
        .to_string();

    let confidence = value.get("confidence").and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_f64().map(|f| f as f32),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });

    Ok((label, confidence))
}

/// Candidate label strings, most specific first, plus any confidence found
fn parse_plain(text: &str) -> (Vec<String>, Option<f32>) {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let line = strip_prefix(line);

    let split_at = line
        .find(|c: char| c == ',' || c == '(' || c == ';' || c.is_whitespace())
        .unwrap_or(line.len());
    let (head, rest) = line.split_at(split_at);

    let candidates = vec![clean(line).to_string(), clean(head).to_string()];
    (candidates, first_number(rest))
}

fn strip_prefix(line: &str) -> &str {
    for prefix in ["classification:", "label:", "answer:"] {
        if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
            return line[prefix.len()..].trim_start();
        }
    }
    line
}

fn clean(token: &str) -> &str {
    token.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '*' | '.' | '!' | '?' | ':')
    })
}

fn first_number(text: &str) -> Option<f32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let tail = &text[start..];
    let end = tail
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(tail.len());
    tail[..end].trim_end_matches('.').parse().ok()
}

fn resolve(candidate: &str, schema: &LabelSchema) -> Option<Label> {
    schema.parse(candidate).or_else(|| {
        if !schema.is_boolean() {
            return None;
        }
        match candidate.to_ascii_lowercase().as_str() {
            "yes" => schema.parse("true"),
            "no" => schema.parse("false"),
            _ => None,
        }
    })
}

/// Map a reported confidence into `[0, 1]`; 1–5 scale values are divided by 5
fn normalize_confidence(value: f32) -> Option<f32> {
    if !value.is_finite() || value < 0.0 {
        None
    } else if value <= 1.0 {
        Some(value)
    } else if value <= 5.0 {
        Some(value / 5.0)
    } else {
        None
    }
}

fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(80) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
