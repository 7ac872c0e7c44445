//! Local ONNX Runtime encoder.
//!
//! Implements [`EmbeddingProvider`] using the all-MiniLM-L6-v2 model via `ort`:
//! tokenize, run the transformer, mean-pool token states under the attention
//! mask, then L2-normalize.

use std::cell::RefCell;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;
use crate::semantic::similarity::normalize;

/// Maximum sequence length for all-MiniLM-L6-v2 (trained at 256).
const MAX_SEQ_LEN: usize = 256;

/// Local ONNX-based encoder using all-MiniLM-L6-v2.
///
/// `Session::run` needs `&mut`, so the session sits in a `RefCell`; the
/// provider is only driven from the thread that owns the analysis session.
pub struct LocalEmbeddingProvider {
    session: RefCell<Session>,
    tokenizer: Tokenizer,
}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {}. Run `geist model download` first.",
            model_path.display()
        );
        anyhow::ensure!(
            tokenizer_path.exists(),
            "Tokenizer not found at {}. Run `geist model download` first.",
            tokenizer_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self {
            session: RefCell::new(session),
            tokenizer,
        })
    }
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("encoder returned no vector for a single input"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let input_ids: Vec<i64> = encodings
            .iter()
            .flat_map(|e| e.get_ids().iter().map(|&id| id as i64))
            .collect();
        let attention_mask: Vec<i64> = encodings
            .iter()
            .flat_map(|e| e.get_attention_mask().iter().map(|&m| m as i64))
            .collect();

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))?;
        let attention_mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask.clone().into_boxed_slice()))?;
        // Single-segment input: token types are all zero.
        let token_type_ids_tensor =
            Tensor::from_array((shape, vec![0i64; batch_size * seq_len].into_boxed_slice()))?;

        let mut session = self
            .session
            .try_borrow_mut()
            .map_err(|_| anyhow::anyhow!("encoder session is already running"))?;

        let outputs = session.run(ort::inputs! {
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor,
            "token_type_ids" => token_type_ids_tensor,
        })?;

        // Output naming differs between ONNX exports.
        let token_states = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);

        let (dims, data) = token_states
            .try_extract_tensor::<f32>()
            .context("failed to extract token_embeddings tensor")?;

        let dims: &[i64] = &dims;
        anyhow::ensure!(
            dims.len() == 3 && dims[2] == EMBEDDING_DIM as i64,
            "unexpected token_embeddings shape: {dims:?}, expected [batch, seq, {EMBEDDING_DIM}]"
        );

        let pooled = mean_pool(
            data,
            &attention_mask,
            PoolShape {
                batch: batch_size,
                mask_seq: seq_len,
                seq: dims[1] as usize,
                hidden: dims[2] as usize,
            },
        );

        Ok(pooled
            .into_iter()
            .map(|mut v| {
                normalize(&mut v);
                v
            })
            .collect())
    }
}

struct PoolShape {
    batch: usize,
    /// Row length of the attention mask (padded token count).
    mask_seq: usize,
    /// Sequence length reported by the model output.
    seq: usize,
    hidden: usize,
}

/// Average token states per input, counting only positions the mask marks as real.
fn mean_pool(data: &[f32], mask: &[i64], shape: PoolShape) -> Vec<Vec<f32>> {
    (0..shape.batch)
        .map(|b| {
            let mut sum = vec![0.0f32; shape.hidden];
            let mut count = 0.0f32;
            for s in 0..shape.seq {
                let weight = mask[b * shape.mask_seq + s] as f32;
                if weight <= 0.0 {
                    continue;
                }
                let offset = (b * shape.seq + s) * shape.hidden;
                for (acc, x) in sum.iter_mut().zip(&data[offset..offset + shape.hidden]) {
                    *acc += x * weight;
                }
                count += weight;
            }
            if count > 0.0 {
                sum.iter_mut().for_each(|x| *x /= count);
            }
            sum
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::similarity::cosine_similarity;

    #[test]
    fn mean_pool_ignores_padding() {
        // batch 1, seq 3, hidden 2; last token is padding
        let data = [1.0, 2.0, 3.0, 4.0, 100.0, 100.0];
        let mask = [1, 1, 0];
        let pooled = mean_pool(
            &data,
            &mask,
            PoolShape {
                batch: 1,
                mask_seq: 3,
                seq: 3,
                hidden: 2,
            },
        );
        assert_eq!(pooled, vec![vec![2.0, 3.0]]);
    }

    #[test]
    fn mean_pool_all_padding_is_zero() {
        let data = [5.0, 5.0];
        let pooled = mean_pool(
            &data,
            &[0],
            PoolShape {
                batch: 1,
                mask_seq: 1,
                seq: 1,
                hidden: 2,
            },
        );
        assert_eq!(pooled, vec![vec![0.0, 0.0]]);
    }

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig {
            cache_dir: dirs::home_dir()
                .expect("home dir")
                .join(".geist/models")
                .to_string_lossy()
                .into_owned(),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    #[ignore] // Requires model files; run with `cargo test -- --ignored`
    fn test_embed_produces_384_dims() {
        let provider = LocalEmbeddingProvider::new(&test_config()).unwrap();
        let embedding = provider.embed("Hello world").unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM);
    }

    #[test]
    #[ignore]
    fn test_embed_batch_is_normalized() {
        let provider = LocalEmbeddingProvider::new(&test_config()).unwrap();
        let embeddings = provider
            .embed_batch(&["First sentence", "Second sentence", "Third"])
            .unwrap();
        assert_eq!(embeddings.len(), 3);
        for emb in &embeddings {
            let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    #[ignore]
    fn related_topics_score_above_unrelated_ones() {
        let provider = LocalEmbeddingProvider::new(&test_config()).unwrap();
        let a = provider.embed("machine learning").unwrap();
        let b = provider.embed("neural networks").unwrap();
        let c = provider.embed("cooking recipes").unwrap();
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    #[ignore]
    fn test_empty_batch() {
        let provider = LocalEmbeddingProvider::new(&test_config()).unwrap();
        assert!(provider.embed_batch(&[]).unwrap().is_empty());
    }
}
