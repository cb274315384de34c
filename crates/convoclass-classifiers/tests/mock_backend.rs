//! Mock classification service for testing
//!
//! Answers by classifier: prompts rendered with the `"{classifier_name}\n{snippet}"`
//! template carry the classifier name on their first line.

use async_trait::async_trait;
use convoclass_classifiers::ClassificationBackend;
use convoclass_core::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Template that makes prompts routable by [`MockBackend`]
pub const TEMPLATE: &str = "{classifier_name}\n{snippet}";

/// A configurable mock service
pub struct MockBackend {
    answers: HashMap<String, String>,
    default_answer: String,
    fail_when: Vec<String>,
    latency: Option<Duration>,
    call_count: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    /// Answer `default_answer` to every classifier without a specific answer
    pub fn new(default_answer: &str) -> Self {
        Self {
            answers: HashMap::new(),
            default_answer: default_answer.to_string(),
            fail_when: Vec::new(),
            latency: None,
            call_count: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer `response` to prompts for `classifier`
    pub fn with_answer(mut self, classifier: &str, response: &str) -> Self {
        self.answers.insert(classifier.to_string(), response.to_string());
        self
    }

    /// Fail with a non-transient error whenever the prompt contains `needle`
    pub fn failing_when(mut self, needle: &str) -> Self {
        self.fail_when.push(needle.to_string());
        self
    }

    /// Set simulated latency per request
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Get the number of requests received
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Classifier names of the requests received, in arrival order
    pub fn classifiers_called(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.lines().next().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl ClassificationBackend for MockBackend {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.fail_when.iter().any(|needle| prompt.contains(needle.as_str())) {
            return Err(Error::backend("Simulated service failure"));
        }

        let classifier = prompt.lines().next().unwrap_or_default();
        Ok(self
            .answers
            .get(classifier)
            .cloned()
            .unwrap_or_else(|| self.default_answer.clone()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
