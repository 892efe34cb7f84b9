use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use grove_core::error::{GroveError, Result};

/// Turns text into fixed-width vectors.
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Embed a batch of texts, one vector per input, in order.
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;
    /// Number of dimensions in the embedding vectors.
    fn dimensions(&self) -> usize;
    /// Short backend label for stats and logs.
    fn name(&self) -> &str;
}

/// OpenAI-compatible `/embeddings` client (OpenAI, Ollama, LM Studio, ...).
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: &str, api_key: Option<&str>, model: &str, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(String::from),
            model: model.to_string(),
            dims,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        let texts = texts.to_vec();
        Box::pin(async move {
            let url = format!("{}/embeddings", self.base_url);

            let mut req = self.client.post(&url).json(&EmbeddingRequest {
                model: &self.model,
                input: &texts,
            });
            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| GroveError::Index(format!("embedding request failed: {}", e)))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(GroveError::Index(format!("embedding API error {}: {}", status, body)));
            }

            let body: EmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| GroveError::Index(format!("failed to parse embedding response: {}", e)))?;

            let mut data = body.data;
            if data.len() != texts.len() {
                return Err(GroveError::Index(format!(
                    "embedding API returned {} vectors for {} inputs",
                    data.len(),
                    texts.len()
                )));
            }
            data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
            Ok(data.into_iter().map(|d| d.embedding).collect())
        })
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Deterministic bag-of-words embedder using feature hashing.
///
/// Tokens are lower-cased alphanumeric runs hashed (FNV-1a) into `dims`
/// buckets; the count vector is L2-normalised. Needs no network, so it suits
/// tests and offline trees. Identical texts always embed identically.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

pub const DEFAULT_HASHING_DIMS: usize = 512;

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dims as u64) as usize;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMS)
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        let out = texts.iter().map(|t| self.embed_one(t)).collect();
        Box::pin(async move { Ok(out) })
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

/// Lower-cased alphanumeric tokens.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_bounds() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_tokenize() {
        let tokens: Vec<_> = tokenize("Add 2+3, please!").collect();
        assert_eq!(tokens, vec!["add", "2", "3", "please"]);
    }

    #[test]
    fn test_hashing_embedder_is_normalised_and_deterministic() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_one("add two numbers");
        let b = e.embed_one("ADD two   numbers");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(e.embed_one("").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_hashing_similarity_tracks_overlap() {
        let e = HashingEmbedder::default();
        let q = e.embed_one("add numbers");
        let near = e.embed_one("add two numbers together");
        let far = e.embed_one("translate english text to french");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[tokio::test]
    async fn test_batch_embed_preserves_order() {
        let e = HashingEmbedder::new(32);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let out = e.embed(&texts).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], e.embed_one("alpha"));
        assert_eq!(out[1], e.embed_one("beta"));
    }
}
