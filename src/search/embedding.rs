//! Embedding providers
//!
//! `EmbeddingProvider` is the seam the index manager depends on. Two
//! variants ship with the crate: the OpenAI-compatible HTTP provider
//! (`search::openai`) and the local Harmonic Token Projection model below.
//!
//! Harmonic Token Projection (HTP), based on:
//! "Harmonic Token Projection: A Vocabulary-Free, Training-Free,
//!  Deterministic, and Reversible Embedding Methodology"
//! https://arxiv.org/html/2511.20665
//!
//! - No neural network or model file
//! - Deterministic (same input → same output)
//! - Unicode-based (multilingual support)

use std::f64::consts::PI;

use async_trait::async_trait;

use crate::error::ProviderError;

/// Model id of the built-in local provider
pub const HTP_MODEL_ID: &str = "htp-384";

/// HTP embedding dimension (2 * number of coprime moduli)
pub const HTP_DIM: usize = 384;

/// Number of coprime moduli for harmonic projection
const NUM_MODULI: usize = HTP_DIM / 2;

/// Maximum token length (Unicode code points)
const MAX_TOKEN_LENGTH: usize = 64;

/// First NUM_MODULI primes, pairwise coprime
static COPRIME_MODULI: &[u64] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71,
    73, 79, 83, 89, 97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151,
    157, 163, 167, 173, 179, 181, 191, 193, 197, 199, 211, 223, 227, 229, 233,
    239, 241, 251, 257, 263, 269, 271, 277, 281, 283, 293, 307, 311, 313, 317,
    331, 337, 347, 349, 353, 359, 367, 373, 379, 383, 389, 397, 401, 409, 419,
    421, 431, 433, 439, 443, 449, 457, 461, 463, 467, 479, 487, 491, 499, 503,
    509, 521, 523, 541, 547, 557, 563, 569, 571, 577, 587, 593, 599, 601, 607,
    613, 617, 619, 631, 641, 643, 647, 653, 659, 661, 673, 677, 683, 691, 701,
    709, 719, 727, 733, 739, 743, 751, 757, 761, 769, 773, 787, 797, 809, 811,
    821, 823, 827, 829, 839, 853, 857, 859, 863, 877, 881, 883, 887, 907, 911,
    919, 929, 937, 941, 947, 953, 967, 971, 977, 983, 991, 997, 1009, 1013,
    1019, 1021, 1031, 1033, 1039, 1049, 1051, 1061, 1063, 1069, 1087, 1091,
    1093, 1097, 1103, 1109, 1117, 1123, 1129, 1151, 1153, 1163, 1171, 1181,
];

/// Vector length produced by a known model id
pub fn known_dimensions(model_id: &str) -> Option<usize> {
    match model_id {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        HTP_MODEL_ID => Some(HTP_DIM),
        _ => None,
    }
}

/// Turns note text into a fixed-length vector
///
/// Implementations neither retry nor cache; both belong to the caller.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn generate(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;
}

/// HTP Embedding Model
pub struct HtpEmbedder {
    moduli: Vec<u64>,
}

impl HtpEmbedder {
    pub fn new() -> Self {
        Self {
            moduli: COPRIME_MODULI[..NUM_MODULI].to_vec(),
        }
    }

    /// Generate embedding for a single text
    ///
    /// 1. Tokenize text into words
    /// 2. Embed each token using harmonic projection
    /// 3. Average token embeddings (mean pooling)
    /// 4. L2 normalize result
    ///
    /// Text without tokens maps to the zero vector.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);

        if tokens.is_empty() {
            return vec![0.0; HTP_DIM];
        }

        let mut sum_embedding = vec![0.0f64; HTP_DIM];
        for token in &tokens {
            for (i, val) in self.embed_token(token).iter().enumerate() {
                sum_embedding[i] += val;
            }
        }

        let count = tokens.len() as f64;
        for val in &mut sum_embedding {
            *val /= count;
        }

        let norm: f64 = sum_embedding.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            sum_embedding.iter().map(|x| (*x / norm) as f32).collect()
        } else {
            sum_embedding.iter().map(|x| *x as f32).collect()
        }
    }

    /// Project one token onto the unit circle of every modulus:
    /// E_i = [sin(2πr_i/m_i), cos(2πr_i/m_i)] with r_i = N mod m_i
    fn embed_token(&self, token: &str) -> Vec<f64> {
        let n = token_to_integer(token);

        let mut embedding = Vec::with_capacity(HTP_DIM);
        for &m in &self.moduli {
            let r = n % m;
            let theta = 2.0 * PI * (r as f64) / (m as f64);
            embedding.push(theta.sin());
            embedding.push(theta.cos());
        }
        embedding
    }
}

impl Default for HtpEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for HtpEmbedder {
    async fn generate(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self.embed(text))
    }

    fn model_id(&self) -> &str {
        HTP_MODEL_ID
    }

    fn dimensions(&self) -> usize {
        HTP_DIM
    }
}

/// N = Σ u_j * B^(L-j) with B = 2^16, wrapping on overflow
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64))
}

/// Splits text into lowercase words
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// Cosine similarity between two embeddings
///
/// 0.0 for vectors of different length or when either magnitude is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_htp_basic() {
        let model = HtpEmbedder::new();

        let emb1 = model.embed("hello world");
        let emb2 = model.embed("hello world");
        let emb3 = model.embed("goodbye moon");

        assert_eq!(emb1, emb2);
        assert_ne!(emb1, emb3);
        assert_eq!(emb1.len(), HTP_DIM);
    }

    #[test]
    fn test_htp_deterministic_across_instances() {
        let text = "This is a test sentence for HTP";
        assert_eq!(HtpEmbedder::new().embed(text), HtpEmbedder::new().embed(text));
    }

    #[test]
    fn test_htp_shared_tokens_score_higher() {
        let model = HtpEmbedder::new();
        let gpu1 = model.embed("GPU memory sharing");
        let gpu2 = model.embed("GPU memory pooling");
        let unrelated = model.embed("cooking recipes");

        assert!(cosine_similarity(&gpu1, &gpu2) > cosine_similarity(&gpu1, &unrelated));
    }

    #[test]
    fn test_htp_empty_text_is_zero_vector() {
        let emb = HtpEmbedder::new().embed("  ...  ");
        assert_eq!(emb.len(), HTP_DIM);
        assert!(emb.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_korean_support() {
        let model = HtpEmbedder::new();

        let emb_ko = model.embed("한국어 테스트");
        let emb_en = model.embed("Korean test");

        let norm_ko: f32 = emb_ko.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_en: f32 = emb_en.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm_ko - 1.0).abs() < 0.01);
        assert!((norm_en - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_provider_contract() {
        let provider: &dyn EmbeddingProvider = &HtpEmbedder::new();
        let vector = provider.generate("vault notes").await.unwrap();
        assert_eq!(vector.len(), provider.dimensions());
        assert_eq!(provider.model_id(), HTP_MODEL_ID);
        assert_eq!(known_dimensions(provider.model_id()), Some(HTP_DIM));
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_self_and_symmetry() {
        let a = vec![0.3, -1.2, 4.0, 0.5];
        let b = vec![2.0, 0.1, -0.7, 1.5];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_cosine_zero_magnitude_and_length_mismatch() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }
}
