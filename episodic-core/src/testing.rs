//! Test doubles for the generation and embedding seams.
//!
//! Scripted mocks stand in for the live API: tests queue replies in call
//! order and inspect the requests afterwards.

use crate::provider::{Embedder, TextGenerator};
use openai::{Error, FinishReason, Request, Response, Usage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

enum Reply {
    Text(String),
    Error(String),
}

struct Inner {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Option<String>,
    requests: Mutex<Vec<Request>>,
}

/// A text generator that replays scripted responses in queue order.
///
/// With no queued reply it returns the fallback text, or an error when no
/// fallback was configured. Clones share the same queue and request log.
#[derive(Clone)]
pub struct MockGenerator {
    inner: Arc<Inner>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                replies: Mutex::new(VecDeque::new()),
                fallback: None,
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A generator that answers every request with the same text.
    pub fn repeating(text: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                replies: Mutex::new(VecDeque::new()),
                fallback: Some(text.into()),
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Queue a successful response.
    pub fn queue_text(&self, text: impl Into<String>) {
        self.inner
            .replies
            .lock()
            .unwrap()
            .push_back(Reply::Text(text.into()));
    }

    /// Queue a service error.
    pub fn queue_error(&self, message: &str) {
        self.inner
            .replies
            .lock()
            .unwrap()
            .push_back(Reply::Error(message.to_string()));
    }

    /// Every request received so far, in call order.
    pub fn requests(&self) -> Vec<Request> {
        self.inner.requests.lock().unwrap().clone()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TextGenerator for MockGenerator {
    async fn complete(&self, request: Request) -> Result<Response, Error> {
        self.inner.requests.lock().unwrap().push(request);

        let reply = self.inner.replies.lock().unwrap().pop_front();
        let content = match reply {
            Some(Reply::Text(text)) => text,
            Some(Reply::Error(message)) => return Err(Error::Network(message)),
            None => match &self.inner.fallback {
                Some(text) => text.clone(),
                None => return Err(Error::Network("mock generator exhausted".to_string())),
            },
        };

        Ok(Response {
            content,
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        })
    }
}

/// A deterministic embedder: folds bytes into a fixed-width vector, so
/// identical texts embed identically and similar texts score close.
#[derive(Clone)]
pub struct MockEmbedder {
    width: usize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self { width: 16 }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.width];
                for (i, byte) in text.bytes().enumerate() {
                    vector[i % self.width] += f32::from(byte) / 255.0;
                }
                vector
            })
            .collect())
    }
}

/// An embedder whose every call fails, for degradation tests.
#[derive(Clone, Copy)]
pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        Err(Error::Network("embedding service unavailable".to_string()))
    }
}

/// A well-formed story plan with `episodes` outline entries, as the planner
/// model would return it.
pub fn sample_plan_json(episodes: usize) -> String {
    let outline: Vec<serde_json::Value> = (1..=episodes)
        .map(|n| {
            serde_json::json!({
                "episode": n,
                "title": format!("Episode {n}"),
                "summary": format!("In episode {n}, the heist advances."),
                "key_points": [
                    format!("Key event A of episode {n}"),
                    format!("Key event B of episode {n}"),
                ],
            })
        })
        .collect();

    serde_json::json!({
        "title": "The Vault",
        "premise": "An archivist and a smuggler plan an impossible heist.",
        "setting": "A fortified city-state archive.",
        "characters": [
            {
                "name": "Mira",
                "description": "A meticulous archivist.",
                "motivation": "Recover her family's confiscated records."
            },
            {
                "name": "Joss",
                "description": "A charming smuggler.",
                "motivation": "One last score before retiring."
            }
        ],
        "master_outline": outline,
    })
    .to_string()
}
