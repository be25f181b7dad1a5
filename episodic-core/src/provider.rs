//! Service seams for the external generation and embedding services.
//!
//! The engine is generic over these traits so every pipeline stage can run
//! against scripted backends in tests. `openai::OpenAi` implements both.

use openai::{OpenAi, Request, Response};
use std::future::Future;

/// A chat-completion backend.
pub trait TextGenerator: Send + Sync {
    fn complete(
        &self,
        request: Request,
    ) -> impl Future<Output = Result<Response, openai::Error>> + Send;
}

/// An embedding backend mapping texts to vectors, one per input in order.
pub trait Embedder: Send + Sync {
    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, openai::Error>> + Send;
}

impl TextGenerator for OpenAi {
    async fn complete(&self, request: Request) -> Result<Response, openai::Error> {
        OpenAi::complete(self, request).await
    }
}

impl Embedder for OpenAi {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, openai::Error> {
        OpenAi::embed(self, texts).await
    }
}
