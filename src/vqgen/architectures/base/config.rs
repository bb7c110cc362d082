use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::vqgen::error::{ModelError, Result};

/// Hyperparameters of the decoder-only sequence model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Maximum number of positions the model attends over
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// The embedding dimension
    #[serde(default = "default_embed_dim")]
    pub embed_dim: usize,

    /// Number of attention heads; must divide `embed_dim`
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,

    /// Number of distinct token ids
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,

    /// Number of transformer blocks, each consisting of
    /// a multi-head attention and a feed-forward layer
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,

    /// Hidden dimension in the feed-forward layers is embed_dim * ffn_factor
    #[serde(default = "default_ffn_factor")]
    pub ffn_factor: usize,

    /// Dropout inside the feed-forward layers
    #[serde(default)]
    pub dropout: f64,

    /// Dropout on attention probabilities
    #[serde(default)]
    pub attention_dropout: f64,

    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,

    /// Added to the construction context's seed before any parameter is drawn
    #[serde(default)]
    pub seed: u64,
}

// Default value functions
fn default_context_window() -> usize { 512 }
fn default_embed_dim() -> usize { 128 }
fn default_num_heads() -> usize { 4 }
fn default_vocab_size() -> usize { 1024 }
fn default_num_layers() -> usize { 3 }
fn default_ffn_factor() -> usize { 4 }
fn default_layer_norm_eps() -> f64 { 1e-5 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            embed_dim: default_embed_dim(),
            num_heads: default_num_heads(),
            vocab_size: default_vocab_size(),
            num_layers: default_num_layers(),
            ffn_factor: default_ffn_factor(),
            dropout: 0.0,
            attention_dropout: 0.0,
            layer_norm_eps: default_layer_norm_eps(),
            seed: 0,
        }
    }
}

impl ModelConfig {
    /// Upgrade old configs to match the current config.
    ///
    /// Older training configs used `emb_dims` or `dim` for the embedding width
    /// and `context` for the context window. Both spellings at once is an error.
    pub fn upgrade_config(mut config: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        for (old, new) in [
            ("emb_dims", "embed_dim"),
            ("dim", "embed_dim"),
            ("context", "context_window"),
        ] {
            if let Some(value) = config.remove(old) {
                if config.contains_key(new) {
                    return Err(ModelError::config(format!(
                        "can't have both `{}` and `{}` set",
                        old, new
                    )));
                }
                log::debug!("upgrading legacy config key `{}` to `{}`", old, new);
                config.insert(new.to_string(), value);
            }
        }

        Ok(config)
    }

    /// Parse a (possibly legacy) JSON object into a validated config.
    pub fn from_json_map(config: HashMap<String, Value>) -> Result<Self> {
        let upgraded = Self::upgrade_config(config)?;
        let object: serde_json::Map<String, Value> = upgraded.into_iter().collect();
        let parsed: Self = serde_json::from_value(Value::Object(object))
            .map_err(|e| ModelError::config(e.to_string()))?;
        parsed.validate_consistent()?;
        Ok(parsed)
    }

    /// Validate consistency of configuration
    pub fn validate_consistent(&self) -> Result<()> {
        if self.context_window == 0 {
            return Err(ModelError::config("context_window must be positive"));
        }
        if self.vocab_size == 0 {
            return Err(ModelError::config("vocab_size must be positive"));
        }
        if self.num_layers == 0 {
            return Err(ModelError::config("num_layers must be positive"));
        }
        if self.ffn_factor == 0 {
            return Err(ModelError::config("ffn_factor must be positive"));
        }
        if self.num_heads == 0 || self.embed_dim == 0 {
            return Err(ModelError::config("embed_dim and num_heads must be positive"));
        }
        if self.embed_dim % self.num_heads != 0 {
            return Err(ModelError::config(format!(
                "embed_dim ({}) must be divisible by num_heads ({})",
                self.embed_dim, self.num_heads
            )));
        }
        for (name, p) in [
            ("dropout", self.dropout),
            ("attention_dropout", self.attention_dropout),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(ModelError::config(format!(
                    "{} must be in [0, 1), got {}",
                    name, p
                )));
            }
        }
        if !(self.layer_norm_eps > 0.0) {
            return Err(ModelError::config("layer_norm_eps must be positive"));
        }

        Ok(())
    }

    pub fn head_size(&self) -> usize {
        self.embed_dim / self.num_heads.max(1)
    }
}

/// Height and width of the latent code grid produced by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchGrid {
    pub height: usize,
    pub width: usize,
}

impl PatchGrid {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    pub fn num_patches(&self) -> usize {
        self.height * self.width
    }
}

/// Configuration of the code-sequence prior that sits on top of a VQ codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VQTransformerConfig {
    /// Probability that a ground-truth index survives corruption
    #[serde(default = "default_keep_prob")]
    pub keep_prob: f64,

    /// Image resolution `[height, width]` fed to the codec
    #[serde(default = "default_input_res")]
    pub input_res: [usize; 2],

    #[serde(default = "default_patch_size")]
    pub patch_size: usize,

    /// Each codec downsampling stage halves both grid dimensions
    #[serde(default = "default_num_downsample_layers")]
    pub num_downsample_layers: u32,

    /// Token prepended to every sequence; shares the id space with the codebook
    #[serde(default)]
    pub start_token: i64,

    /// The sequence model; `vocab_size` is the codebook size
    #[serde(default = "default_prior_model")]
    pub transformer: ModelConfig,
}

fn default_keep_prob() -> f64 { 0.8 }
fn default_input_res() -> [usize; 2] { [64, 64] }
fn default_patch_size() -> usize { 4 }
fn default_num_downsample_layers() -> u32 { 2 }
fn default_prior_model() -> ModelConfig { ModelConfig::default() }

impl Default for VQTransformerConfig {
    fn default() -> Self {
        Self {
            keep_prob: default_keep_prob(),
            input_res: default_input_res(),
            patch_size: default_patch_size(),
            num_downsample_layers: default_num_downsample_layers(),
            start_token: 0,
            transformer: default_prior_model(),
        }
    }
}

impl VQTransformerConfig {
    pub fn num_codebook_embeddings(&self) -> usize {
        self.transformer.vocab_size
    }

    /// Latent grid: `input_res / patch_size / 2^num_downsample_layers` per axis.
    pub fn patch_grid(&self) -> Result<PatchGrid> {
        if self.patch_size == 0 {
            return Err(ModelError::config("patch_size must be positive"));
        }
        let factor = 1usize
            .checked_shl(self.num_downsample_layers)
            .and_then(|f| f.checked_mul(self.patch_size))
            .ok_or_else(|| ModelError::config("num_downsample_layers is too large"))?;

        let [height, width] = self.input_res;
        if height % factor != 0 || width % factor != 0 {
            return Err(ModelError::config(format!(
                "input_res {:?} is not divisible by patch_size * 2^num_downsample_layers = {}",
                self.input_res, factor
            )));
        }

        let grid = PatchGrid::new(height / factor, width / factor);
        if grid.num_patches() == 0 {
            return Err(ModelError::config(format!(
                "input_res {:?} yields an empty patch grid",
                self.input_res
            )));
        }
        Ok(grid)
    }

    pub fn num_patches(&self) -> Result<usize> {
        self.patch_grid().map(|grid| grid.num_patches())
    }

    pub fn validate_consistent(&self) -> Result<()> {
        self.transformer.validate_consistent()?;

        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            return Err(ModelError::config(format!(
                "keep_prob must be in (0, 1], got {}",
                self.keep_prob
            )));
        }
        if self.start_token < 0 || self.start_token as usize >= self.num_codebook_embeddings() {
            return Err(ModelError::config(format!(
                "start_token {} is outside the codebook [0, {})",
                self.start_token,
                self.num_codebook_embeddings()
            )));
        }

        let num_patches = self.num_patches()?;
        if num_patches > self.transformer.context_window {
            return Err(ModelError::config(format!(
                "{} patches do not fit in a context window of {}",
                num_patches, self.transformer.context_window
            )));
        }

        Ok(())
    }

    /// Upgrade a flat training config into this nested layout.
    ///
    /// Flat configs carry the codec and prior hyperparameters side by side:
    /// `dim`, `num_heads` and `num_codebook_embeddings` describe the prior,
    /// `num_layers` counts codec downsampling stages. Keys that belong to the
    /// training loop (learning rate, epochs, dataset, ...) are dropped.
    pub fn upgrade_config(mut config: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let mut transformer = match config.remove("transformer") {
            Some(Value::Object(map)) => map.into_iter().collect::<HashMap<_, _>>(),
            Some(other) => {
                return Err(ModelError::config(format!(
                    "`transformer` must be an object, got {}",
                    other
                )))
            }
            None => HashMap::new(),
        };

        for (old, new) in [
            ("dim", "embed_dim"),
            ("num_heads", "num_heads"),
            ("num_codebook_embeddings", "vocab_size"),
            ("context", "context_window"),
        ] {
            if let Some(value) = config.remove(old) {
                if transformer.contains_key(new) {
                    return Err(ModelError::config(format!(
                        "`{}` is set both at the top level and in `transformer`",
                        old
                    )));
                }
                transformer.insert(new.to_string(), value);
            }
        }
        if let Some(value) = config.remove("num_layers") {
            config.insert("num_downsample_layers".to_string(), value);
        }

        let known = [
            "keep_prob",
            "input_res",
            "patch_size",
            "num_downsample_layers",
            "start_token",
        ];
        let dropped: Vec<String> = config
            .keys()
            .filter(|k| !known.contains(&k.as_str()))
            .cloned()
            .collect();
        for key in dropped {
            log::debug!("ignoring config key `{}`", key);
            config.remove(&key);
        }

        let transformer = ModelConfig::upgrade_config(transformer)?;
        config.insert(
            "transformer".to_string(),
            Value::Object(transformer.into_iter().collect()),
        );
        Ok(config)
    }

    /// Parse a (possibly flat, legacy) JSON object into a validated config.
    pub fn from_json_map(config: HashMap<String, Value>) -> Result<Self> {
        let upgraded = Self::upgrade_config(config)?;
        let object: serde_json::Map<String, Value> = upgraded.into_iter().collect();
        let parsed: Self = serde_json::from_value(Value::Object(object))
            .map_err(|e| ModelError::config(e.to_string()))?;
        parsed.validate_consistent()?;
        Ok(parsed)
    }
}
