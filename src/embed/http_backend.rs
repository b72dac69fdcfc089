use super::{validate_dimensions, Embedder};
use crate::config::{SupplierConfig, SupplierKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Embedder speaking the Ollama or OpenAI-compatible HTTP protocol
pub struct HttpEmbedder {
    client: Client,
    base_url: Url,
    kind: SupplierKind,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    retries: usize,
}

impl HttpEmbedder {
    pub fn new(
        supplier: &SupplierConfig,
        model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(&supplier.url)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            kind: supplier.kind,
            api_key: supplier.api_key(),
            model: model.to_string(),
            dimension,
            retries: 2,
        })
    }

    fn endpoint(&self) -> Result<Url> {
        let path = match self.kind {
            SupplierKind::Ollama => "/api/embed",
            SupplierKind::OpenAi => "/v1/embeddings",
        };
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid embedding supplier URL: {}", e)))
    }

    async fn send_with_retry<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let mut last_err: Option<Error> = None;
        for attempt in 0..=self.retries {
            let req = request
                .try_clone()
                .ok_or_else(|| Error::Embedding("Failed to clone embedding request".to_string()))?;
            match req.send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(ok) => return Ok(ok.json::<T>().await?),
                    Err(e) => last_err = Some(Error::Embedding(e.to_string())),
                },
                Err(e) => last_err = Some(Error::Embedding(e.to_string())),
            }

            if attempt < self.retries {
                debug!(model = %self.model, attempt, "Retrying embedding request");
                tokio::time::sleep(Duration::from_millis(200 * (attempt + 1) as u64)).await;
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Embedding("Embedding request failed".to_string())))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbedRequest {
            model: &self.model,
            input: &texts,
        };
        let mut request = self.client.post(self.endpoint()?).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let embeddings = match self.kind {
            SupplierKind::Ollama => {
                let parsed: OllamaResponse = self.send_with_retry(request).await?;
                parsed.embeddings
            }
            SupplierKind::OpenAi => {
                let mut parsed: OpenAiResponse = self.send_with_retry(request).await?;
                parsed.data.sort_by_key(|d| d.index);
                parsed.data.into_iter().map(|d| d.embedding).collect()
            }
        };

        if embeddings.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "Model {} returned {} vectors for {} inputs",
                self.model,
                embeddings.len(),
                texts.len()
            )));
        }
        validate_dimensions(&embeddings, self.dimension)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn supplier(kind: SupplierKind, url: &str) -> SupplierConfig {
        SupplierConfig {
            kind,
            url: url.to_string(),
            api_key_env: None,
        }
    }

    fn embedder(kind: SupplierKind, url: &str, dimension: usize) -> HttpEmbedder {
        HttpEmbedder::new(&supplier(kind, url), "bge-m3", dimension, Duration::from_secs(5))
            .unwrap()
    }

    #[tokio::test]
    async fn test_ollama_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(json!({"model": "bge-m3", "input": ["a", "b"]})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"embeddings": [[1.0, 0.0], [0.0, 1.0]]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let vectors = embedder(SupplierKind::Ollama, &server.uri(), 2)
            .embed(vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_openai_embed_orders_by_index() {
        let server = MockServer::start().await;
        std::env::set_var("KBINDEX_TEST_EMBED_KEY", "secret");
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"embedding": [0.0, 1.0], "index": 1},
                    {"embedding": [1.0, 0.0], "index": 0}
                ]
            })))
            .mount(&server)
            .await;

        let mut config = supplier(SupplierKind::OpenAi, &server.uri());
        config.api_key_env = Some("KBINDEX_TEST_EMBED_KEY".to_string());
        let embedder =
            HttpEmbedder::new(&config, "text-embedding-3-small", 2, Duration::from_secs(5))
                .unwrap();

        let vectors = embedder
            .embed(vec!["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0, 0.5]]})),
            )
            .mount(&server)
            .await;

        let err = embedder(SupplierKind::Ollama, &server.uri(), 2)
            .embed(vec!["a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let result = embedder(SupplierKind::Ollama, &server.uri(), 2)
            .embed(vec!["a".to_string()])
            .await;
        assert!(matches!(result, Err(Error::Embedding(_))));
    }

    #[tokio::test]
    async fn test_empty_input_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let vectors = embedder(SupplierKind::Ollama, &server.uri(), 2)
            .embed(Vec::new())
            .await
            .unwrap();
        assert!(vectors.is_empty());
    }
}
