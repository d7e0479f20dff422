//! ONNX-based embedding model implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use rag_core::protocol::ensure_non_empty;
use rag_core::{Embedder, EmbedderDescriptor, RagError, Result};

/// nomic-embed-text-v1.5 configuration.
const EMBEDDING_DIM: usize = 768;
const MAX_TOKENS: usize = 8192;

/// ONNX-based embedder using nomic-embed-text-v1.5 or compatible model.
///
/// Inference runs on the calling task; the session is serialized by a mutex.
pub struct OnnxEmbedder {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    /// Tokenizer for the model.
    tokenizer: Arc<Tokenizer>,

    /// Model file name, for descriptors.
    model_name: String,

    /// Text prepended to every input (e.g. `"search_document: "`).
    prefix: String,

    /// Embedding dimension.
    dimension: usize,

    /// Maximum token count.
    max_tokens: usize,
}

impl OnnxEmbedder {
    /// Create a new embedder from model and tokenizer paths.
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `tokenizer_path` - Path to the tokenizer.json file
    pub fn new(model_path: impl AsRef<Path>, tokenizer_path: impl AsRef<Path>) -> Result<Self> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();

        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| RagError::embedding(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RagError::embedding(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(4)
            .map_err(|e| RagError::embedding(format!("Failed to set thread count: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| RagError::embedding(format!("Failed to load model: {}", e)))?;

        info!("Loading tokenizer from {:?}", tokenizer_path);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| RagError::embedding(format!("Failed to load tokenizer: {}", e)))?;

        let model_name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        info!(
            "Embedder initialized: model={}, dim={}, max_tokens={}",
            model_name, EMBEDDING_DIM, MAX_TOKENS
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer: Arc::new(tokenizer),
            model_name,
            prefix: String::new(),
            dimension: EMBEDDING_DIM,
            max_tokens: MAX_TOKENS,
        })
    }

    /// Override dimension and context length for models other than nomic.
    pub fn with_config(mut self, dimension: usize, max_tokens: usize) -> Self {
        self.dimension = dimension;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Prepend `prefix` to every input text.
    ///
    /// Applies to indexing and querying alike, so text retrieval stays
    /// equivalent to embedding followed by vector retrieval.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Count tokens in text.
    pub fn count_tokens(&self, text: &str) -> Result<usize> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| RagError::embedding(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().len())
    }

    /// Embed a batch of texts.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let prefixed: Vec<String> = texts
            .iter()
            .map(|t| format!("{}{}", self.prefix, t))
            .collect();
        let prefixed_refs: Vec<&str> = prefixed.iter().map(|s| s.as_str()).collect();

        let encodings = self
            .tokenizer
            .encode_batch(prefixed_refs, true)
            .map_err(|e| RagError::embedding(format!("Tokenization failed: {}", e)))?;

        // Pad to the longest input, capped at the context length
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_tokens);

        let batch_size = encodings.len();

        debug!("Embedding batch: size={}, max_len={}", batch_size, max_len);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
            }
        }

        let input_ids_tensor = Tensor::from_array((vec![batch_size, max_len], input_ids))
            .map_err(|e| RagError::embedding(format!("Failed to create input tensor: {}", e)))?;

        let attention_mask_tensor =
            Tensor::from_array((vec![batch_size, max_len], attention_mask))
                .map_err(|e| RagError::embedding(format!("Failed to create mask tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| RagError::embedding(format!("Failed to lock session: {}", e)))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor
            ])
            .map_err(|e| RagError::embedding(format!("Inference failed: {}", e)))?;

        // Models name their outputs differently; take the first one
        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| RagError::embedding("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| RagError::embedding(format!("Failed to extract tensor: {}", e)))?;

        let shape_dims: Vec<usize> = view.shape().to_vec();
        debug!("Output shape: {:?}", shape_dims);

        let embeddings = if shape_dims.len() == 3 {
            // (batch_size, seq_len, hidden_dim) - need mean pooling
            self.mean_pool(&view, &encodings, max_len)
        } else if shape_dims.len() == 2 {
            // (batch_size, hidden_dim) - already pooled
            let hidden_dim = shape_dims[1];
            (0..batch_size)
                .map(|i| l2_normalize((0..hidden_dim).map(|j| view[[i, j]]).collect()))
                .collect()
        } else {
            return Err(RagError::embedding(format!(
                "Unexpected output shape: {:?}",
                shape_dims
            )));
        };

        Ok(embeddings)
    }

    /// Mean pooling over the sequence dimension with attention mask.
    fn mean_pool(
        &self,
        tensor: &ArrayViewD<'_, f32>,
        encodings: &[tokenizers::Encoding],
        max_len: usize,
    ) -> Vec<Vec<f32>> {
        let shape = tensor.shape();
        let seq_len = shape[1];
        let hidden_dim = shape[2];

        encodings
            .iter()
            .enumerate()
            .map(|(i, encoding)| {
                let mask = encoding.get_attention_mask();
                let valid: Vec<usize> = (0..max_len.min(seq_len).min(mask.len()))
                    .filter(|&j| mask[j] == 1)
                    .collect();

                if valid.is_empty() {
                    return vec![0.0; hidden_dim];
                }

                let mut sum = vec![0.0f32; hidden_dim];
                for &j in &valid {
                    for (k, slot) in sum.iter_mut().enumerate() {
                        *slot += tensor[[i, j, k]];
                    }
                }

                l2_normalize(sum.iter().map(|s| s / valid.len() as f32).collect())
            })
            .collect()
    }
}

/// L2 normalize a vector.
fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        ensure_non_empty(texts)?;
        // Session is not Send; inference runs synchronously
        self.embed_batch(texts)
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn descriptor(&self) -> EmbedderDescriptor {
        EmbedderDescriptor::new("onnx", Some(&self.model_name))
    }
}
