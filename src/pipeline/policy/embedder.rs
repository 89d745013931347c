use super::types::EmbeddingModel;
use super::PolicyError;

/// Standard embedding dimension (all-MiniLM-L6-v2, and the hashing embedder).
pub const EMBEDDING_DIM: usize = 384;

// ═══════════════════════════════════════════════════════════
// Hashing embedder (default, offline)
// ═══════════════════════════════════════════════════════════

/// Weight of a character trigram relative to a whole word.
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic feature-hashing embedder.
///
/// Features are accent-folded lowercase words plus their padded character
/// trigrams, so "tasa de IVA" and "IVA rate is 19%" share dimensions through
/// `iva` and spelling variants still overlap. Vectors are non-negative and
/// L2-normalized; cosine similarity is therefore in 0..=1.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: EMBEDDING_DIM,
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingModel for HashingEmbedder {
    fn id(&self) -> &str {
        "hashing-v1-384"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, PolicyError> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in words(text) {
            vector[bucket(word.as_bytes(), self.dimension)] += 1.0;

            let padded: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                vector[bucket(gram.as_bytes(), self.dimension)] += TRIGRAM_WEIGHT;
            }
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// Lowercase, accent-folded alphanumeric words.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.chars().flat_map(char::to_lowercase).map(fold_accent).collect())
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'ã' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// FNV-1a, fixed so persisted vectors stay valid across builds.
fn bucket(bytes: &[u8], dimension: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % dimension as u64) as usize
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

// ═══════════════════════════════════════════════════════════
// ONNX Embedder, behind `onnx-embeddings` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-embeddings")]
mod onnx {
    use super::{l2_normalize, EmbeddingModel, PolicyError, EMBEDDING_DIM};
    use ort::session::Session;
    use std::path::Path;
    use std::sync::Mutex;

    /// all-MiniLM-L6-v2 through ONNX Runtime.
    ///
    /// The model directory must hold `model.onnx` and `tokenizer.json`.
    /// `Session::run` needs `&mut self`, hence the Mutex.
    pub struct OnnxEmbedder {
        session: Mutex<Session>,
        tokenizer: tokenizers::Tokenizer,
    }

    impl OnnxEmbedder {
        pub fn load(model_dir: &Path) -> Result<Self, PolicyError> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");

            if !model_path.exists() {
                return Err(PolicyError::ModelNotFound(model_path));
            }
            if !tokenizer_path.exists() {
                return Err(PolicyError::ModelNotFound(tokenizer_path));
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| PolicyError::Embedding(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| PolicyError::Embedding(e.to_string()))?
                .commit_from_file(&model_path)
                .map_err(|e: ort::Error| PolicyError::Embedding(format!("ONNX load failed: {e}")))?;

            let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| PolicyError::Embedding(format!("Tokenizer load failed: {e}")))?;

            tracing::info!(model_dir = %model_dir.display(), "ONNX embedder loaded");

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
            })
        }

        /// Tokenize, run inference, mean-pool over the attention mask.
        fn infer(&self, text: &str) -> Result<Vec<f32>, PolicyError> {
            use ort::value::TensorRef;

            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| PolicyError::Embedding(format!("Tokenization failed: {e}")))?;

            let to_i64 = |values: &[u32]| values.iter().map(|&v| v as i64).collect::<Vec<i64>>();
            let input_ids = to_i64(encoding.get_ids());
            let attention_mask = to_i64(encoding.get_attention_mask());
            let token_type_ids = to_i64(encoding.get_type_ids());
            let seq_len = input_ids.len();

            let array = |values: Vec<i64>| {
                ndarray::Array2::from_shape_vec((1, seq_len), values)
                    .map_err(|e| PolicyError::Embedding(e.to_string()))
            };
            let ids_array = array(input_ids)?;
            let mask_array = array(attention_mask.clone())?;
            let type_array = array(token_type_ids)?;

            let ids_tensor = TensorRef::from_array_view(&ids_array)
                .map_err(|e| PolicyError::Embedding(e.to_string()))?;
            let mask_tensor = TensorRef::from_array_view(&mask_array)
                .map_err(|e| PolicyError::Embedding(e.to_string()))?;
            let type_tensor = TensorRef::from_array_view(&type_array)
                .map_err(|e| PolicyError::Embedding(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| PolicyError::Embedding("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
                .map_err(|e| PolicyError::Embedding(format!("ONNX inference failed: {e}")))?;

            // Output shape: [1, seq_len, 384]
            let (shape, output_data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| PolicyError::Embedding(format!("Output extraction: {e}")))?;

            if shape.len() != 3 || shape[2] as usize != EMBEDDING_DIM {
                return Err(PolicyError::Embedding(format!(
                    "Unexpected output shape: {shape:?}, expected [1, {seq_len}, {EMBEDDING_DIM}]"
                )));
            }

            let mut pooled = vec![0.0f32; EMBEDDING_DIM];
            let mut mask_sum = 0.0f32;
            for (token_idx, &mask) in attention_mask.iter().enumerate().take(seq_len) {
                let mask = mask as f32;
                mask_sum += mask;
                let offset = token_idx * EMBEDDING_DIM;
                for (dim_idx, p) in pooled.iter_mut().enumerate() {
                    *p += output_data[offset + dim_idx] * mask;
                }
            }
            if mask_sum > 0.0 {
                for val in &mut pooled {
                    *val /= mask_sum;
                }
            }

            l2_normalize(&mut pooled);
            Ok(pooled)
        }
    }

    impl EmbeddingModel for OnnxEmbedder {
        fn id(&self) -> &str {
            "all-MiniLM-L6-v2"
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, PolicyError> {
            self.infer(text)
        }
    }
}

#[cfg(feature = "onnx-embeddings")]
pub use onnx::OnnxEmbedder;

// ═══════════════════════════════════════════════════════════
// Mock for testing
// ═══════════════════════════════════════════════════════════

/// Embedder that can be told to fail, for rebuild-failure tests.
#[cfg(test)]
pub struct MockEmbedder {
    inner: HashingEmbedder,
    fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingEmbedder::new(),
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl EmbeddingModel for MockEmbedder {
    fn id(&self) -> &str {
        "mock"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, PolicyError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(PolicyError::Embedding("mock embedder failure".into()));
        }
        self.inner.embed(text)
    }
}
