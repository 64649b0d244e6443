//! Local sentence-transformer inference with candle.
//!
//! Loads a BERT/XLM-RoBERTa-style checkpoint (tokenizer.json, config.json,
//! model.safetensors) from the Hugging Face hub cache and produces
//! L2-normalized sentence embeddings via masked mean pooling.

use std::path::{Path, PathBuf};

use candle_core::{DType, Module, Tensor};
use candle_nn::{embedding, layer_norm, linear, Activation, Embedding, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;
use tokenizers::Tokenizer;

use super::device::Device;
use super::embedder::EmbeddingError;

/// Transformer checkpoint configuration, read from config.json.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub hidden_act: String,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub layer_norm_eps: f64,
    #[serde(default)]
    pub pad_token_id: usize,
}

struct InputEmbeddings {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
    norm: LayerNorm,
}

impl InputEmbeddings {
    fn load(vb: VarBuilder, cfg: &ModelConfig) -> candle_core::Result<Self> {
        Ok(Self {
            word: embedding(cfg.vocab_size, cfg.hidden_size, vb.pp("word_embeddings"))?,
            position: embedding(
                cfg.max_position_embeddings,
                cfg.hidden_size,
                vb.pp("position_embeddings"),
            )?,
            token_type: embedding(
                cfg.type_vocab_size,
                cfg.hidden_size,
                vb.pp("token_type_embeddings"),
            )?,
            norm: layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        position_ids: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let embeddings = ((self.word.forward(input_ids)?
            + self.position.forward(position_ids)?)?
            + self.token_type.forward(token_type_ids)?)?;
        self.norm.forward(&embeddings)
    }
}

struct AttentionBlock {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl AttentionBlock {
    fn load(vb: VarBuilder, cfg: &ModelConfig) -> candle_core::Result<Self> {
        let head_dim = cfg.hidden_size / cfg.num_attention_heads;
        let all_heads = cfg.num_attention_heads * head_dim;
        Ok(Self {
            query: linear(cfg.hidden_size, all_heads, vb.pp("self.query"))?,
            key: linear(cfg.hidden_size, all_heads, vb.pp("self.key"))?,
            value: linear(cfg.hidden_size, all_heads, vb.pp("self.value"))?,
            output: linear(cfg.hidden_size, cfg.hidden_size, vb.pp("output.dense"))?,
            norm: layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("output.LayerNorm"),
            )?,
            num_heads: cfg.num_attention_heads,
            head_dim,
        })
    }

    /// Split [1, seq, hidden] into [1, heads, seq, head_dim].
    fn split_heads(&self, x: &Tensor, seq_len: usize) -> candle_core::Result<Tensor> {
        x.reshape((1, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
        let (_, seq_len, hidden_size) = hidden.dims3()?;

        let q = self.split_heads(&self.query.forward(hidden)?, seq_len)?;
        let k = self.split_heads(&self.key.forward(hidden)?, seq_len)?;
        let v = self.split_heads(&self.value.forward(hidden)?, seq_len)?;

        let scores = (q.matmul(&k.t()?)? / (self.head_dim as f64).sqrt())?;
        let scores = scores.broadcast_add(mask)?;
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((1, seq_len, hidden_size))?;

        let attended = self.output.forward(&context)?;
        self.norm.forward(&(attended + hidden)?)
    }
}

struct FeedForward {
    intermediate: Linear,
    activation: Activation,
    output: Linear,
    norm: LayerNorm,
}

impl FeedForward {
    fn load(vb: VarBuilder, cfg: &ModelConfig) -> candle_core::Result<Self> {
        let activation = match cfg.hidden_act.as_str() {
            "relu" => Activation::Relu,
            _ => Activation::Gelu,
        };
        Ok(Self {
            intermediate: linear(
                cfg.hidden_size,
                cfg.intermediate_size,
                vb.pp("intermediate.dense"),
            )?,
            activation,
            output: linear(cfg.intermediate_size, cfg.hidden_size, vb.pp("output.dense"))?,
            norm: layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("output.LayerNorm"),
            )?,
        })
    }

    fn forward(&self, hidden: &Tensor) -> candle_core::Result<Tensor> {
        let up = self.activation.forward(&self.intermediate.forward(hidden)?)?;
        self.norm.forward(&(self.output.forward(&up)? + hidden)?)
    }
}

struct EncoderLayer {
    attention: AttentionBlock,
    feed_forward: FeedForward,
}

impl EncoderLayer {
    fn load(vb: VarBuilder, cfg: &ModelConfig) -> candle_core::Result<Self> {
        Ok(Self {
            attention: AttentionBlock::load(vb.pp("attention"), cfg)?,
            feed_forward: FeedForward::load(vb.clone(), cfg)?,
        })
    }

    fn forward(&self, hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
        let hidden = self.attention.forward(hidden, mask)?;
        self.feed_forward.forward(&hidden)
    }
}

/// The transformer trunk: input embeddings plus a stack of encoder layers.
struct TextEncoder {
    embeddings: InputEmbeddings,
    layers: Vec<EncoderLayer>,
}

impl TextEncoder {
    fn load(vb: VarBuilder, cfg: &ModelConfig) -> candle_core::Result<Self> {
        let embeddings = InputEmbeddings::load(vb.pp("embeddings"), cfg)?;
        let vb_layers = vb.pp("encoder").pp("layer");
        let mut layers = Vec::with_capacity(cfg.num_hidden_layers);
        for i in 0..cfg.num_hidden_layers {
            layers.push(EncoderLayer::load(vb_layers.pp(i), cfg)?);
        }
        Ok(Self { embeddings, layers })
    }

    /// Forward one sequence; returns the final hidden states [seq, hidden].
    fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        position_ids: &Tensor,
        mask: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let mut hidden = self.embeddings.forward(input_ids, token_type_ids, position_ids)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, mask)?;
        }
        hidden.squeeze(0)
    }
}

/// Sentence-transformer embedding binding: tokenizer + encoder on one device.
pub struct TransformerEmbedder {
    model_name: String,
    tokenizer: Tokenizer,
    encoder: TextEncoder,
    config: ModelConfig,
    device: Device,
    candle_device: candle_core::Device,
    cache_dir: PathBuf,
}

impl TransformerEmbedder {
    /// Load the model onto `device`, downloading checkpoint files into
    /// `cache_dir` on first use.
    pub fn new(model_name: &str, cache_dir: &Path, device: Device) -> Result<Self, EmbeddingError> {
        let candle_device = device
            .to_candle()
            .map_err(|e| EmbeddingError::Init(format!("device {device}: {e}")))?;

        let files = fetch_checkpoint(model_name, cache_dir)?;

        let config_str = std::fs::read_to_string(&files.config)
            .map_err(|e| EmbeddingError::Init(format!("read config.json: {e}")))?;
        let config: ModelConfig = serde_json::from_str(&config_str)
            .map_err(|e| EmbeddingError::Init(format!("parse config.json: {e}")))?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| EmbeddingError::Init(format!("load tokenizer: {e}")))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights], DType::F32, &candle_device)
                .map_err(|e| EmbeddingError::Init(format!("load weights: {e}")))?
        };
        let encoder = load_with_prefix(vb, &config)
            .map_err(|e| EmbeddingError::Init(format!("build encoder: {e}")))?;

        log::info!("loaded model '{model_name}' on {device}");

        Ok(Self {
            model_name: model_name.to_string(),
            tokenizer,
            encoder,
            config,
            device,
            candle_device,
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    pub fn name(&self) -> &str {
        &self.model_name
    }

    pub fn dimension(&self) -> usize {
        self.config.hidden_size
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Build a fresh binding of the same model on a different device. No
    /// cached computation carries over; checkpoint files come from the hub
    /// cache.
    pub fn rebind(&self, device: Device) -> Result<Self, EmbeddingError> {
        Self::new(&self.model_name, &self.cache_dir, device)
    }

    /// Embed one text into a unit-normalized vector.
    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Inference(format!("tokenize: {e}")))?;

        // RoBERTa-family checkpoints index positions from pad_token_id + 1.
        let offset = if self.config.pad_token_id == 1 {
            self.config.pad_token_id as u32 + 1
        } else {
            0
        };
        let max_len = self.config.max_position_embeddings - offset as usize;

        let seq_len = encoding.get_ids().len().min(max_len);
        if seq_len == 0 {
            return Err(EmbeddingError::Inference("empty token sequence".into()));
        }
        let ids = &encoding.get_ids()[..seq_len];
        let attention = &encoding.get_attention_mask()[..seq_len];

        self.forward_pooled(ids, attention, offset)
            .map_err(|e| EmbeddingError::Inference(e.to_string()))
    }

    fn forward_pooled(
        &self,
        ids: &[u32],
        attention: &[u32],
        position_offset: u32,
    ) -> candle_core::Result<Vec<f32>> {
        let seq_len = ids.len();
        let device = &self.candle_device;

        let input_ids = Tensor::new(ids, device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::zeros((1, seq_len), DType::U32, device)?;
        let positions: Vec<u32> = (0..seq_len as u32).map(|p| p + position_offset).collect();
        let position_ids = Tensor::new(positions.as_slice(), device)?.unsqueeze(0)?;

        // Additive attention mask: 0 where attended, -1e4 where masked.
        let mask = Tensor::new(attention, device)?.to_dtype(DType::F32)?;
        let mask = ((mask.affine(-1.0, 1.0)?) * -10_000.0)?;
        let mask = mask.reshape((1, 1, 1, seq_len))?;

        let hidden = self
            .encoder
            .forward(&input_ids, &token_type_ids, &position_ids, &mask)?;

        // Masked mean pooling over the sequence dimension.
        let weights = Tensor::new(attention, device)?
            .to_dtype(DType::F32)?
            .reshape((seq_len, 1))?;
        let summed = hidden.broadcast_mul(&weights)?.sum(0)?;
        let counts = weights.sum(0)?;
        let pooled = summed.broadcast_div(&counts)?;

        // L2 normalize so inner product equals cosine similarity.
        let norm = (pooled.sqr()?.sum_all()?.sqrt()? + 1e-12)?;
        let normalized = pooled.broadcast_div(&norm)?;

        normalized.to_vec1::<f32>()
    }
}

/// Checkpoints export the trunk under differing prefixes; probe the known ones.
fn load_with_prefix(vb: VarBuilder, cfg: &ModelConfig) -> candle_core::Result<TextEncoder> {
    match TextEncoder::load(vb.clone(), cfg) {
        Ok(encoder) => Ok(encoder),
        Err(_) => match TextEncoder::load(vb.pp("roberta"), cfg) {
            Ok(encoder) => Ok(encoder),
            Err(_) => TextEncoder::load(vb.pp("bert"), cfg),
        },
    }
}

struct CheckpointFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

/// Resolve checkpoint files through the hub cache, downloading if absent.
fn fetch_checkpoint(model_name: &str, cache_dir: &Path) -> Result<CheckpointFiles, EmbeddingError> {
    use hf_hub::api::sync::ApiBuilder;

    std::fs::create_dir_all(cache_dir)
        .map_err(|e| EmbeddingError::Init(format!("create cache dir: {e}")))?;

    // Bare model names live under the sentence-transformers org.
    let repo_id = if model_name.contains('/') {
        model_name.to_string()
    } else {
        format!("sentence-transformers/{model_name}")
    };

    let api = ApiBuilder::new()
        .with_cache_dir(cache_dir.to_path_buf())
        .build()
        .map_err(|e| EmbeddingError::Init(format!("hub api: {e}")))?;
    let repo = api.model(repo_id.clone());

    let fetch = |file: &str| {
        repo.get(file)
            .map_err(|e| EmbeddingError::Init(format!("fetch {repo_id}/{file}: {e}")))
    };

    Ok(CheckpointFiles {
        config: fetch("config.json")?,
        tokenizer: fetch("tokenizer.json")?,
        weights: fetch("model.safetensors")?,
    })
}
