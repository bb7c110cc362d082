use burn::{
    module::{Module, Param},
    nn::{Dropout, DropoutConfig, LayerNormConfig},
    tensor::{activation, backend::Backend, Int, Tensor},
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{
    attention::MaskPolicy,
    config::ModelConfig,
    layer::{Block, LayerNorm},
    loss_utils::{cross_entropy_mean, validate_index_tensor, validate_loss_value},
    sampling::sample_categorical,
};
use crate::vqgen::error::{ModelError, Result};

/// Deterministic linear layer wrapper that stores pre-initialized weights
///
/// Same interface as `burn::nn::Linear`, but the weights come from a seeded
/// [`DeterministicRngContext`] so two models built from the same seed are
/// bit-identical.
#[derive(Module, Debug)]
pub struct DeterministicLinear<B: Backend> {
    /// Weight matrix of shape [output_dim, input_dim]
    pub weight: Param<Tensor<B, 2>>,
    /// Optional bias vector of shape [output_dim]
    pub bias: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> DeterministicLinear<B> {
    /// Create a new deterministic linear layer with pre-initialized weights
    pub fn new(weight: Tensor<B, 2>, bias: Option<Tensor<B, 1>>) -> Self {
        Self {
            weight: Param::from_tensor(weight),
            bias: bias.map(Param::from_tensor),
        }
    }

    pub fn output_dim(&self) -> usize {
        self.weight.val().dims()[0]
    }

    /// Forward pass through the linear layer
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let output = input.matmul(self.weight.val().transpose());
        match &self.bias {
            Some(bias) => output.add(bias.val().unsqueeze()),
            None => output,
        }
    }

    /// Forward pass for [batch, len, input_dim] tensors (applies linear to last dimension)
    pub fn forward_3d(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, len, input_dim] = input.dims();
        let output_2d = self.forward(input.reshape([batch * len, input_dim]));
        output_2d.reshape([batch, len, self.output_dim()])
    }
}

/// Deterministic embedding layer wrapper with pre-initialized weights
#[derive(Module, Debug)]
pub struct DeterministicEmbedding<B: Backend> {
    /// Embedding weight matrix of shape [num_embeddings, embedding_dim]
    pub weight: Param<Tensor<B, 2>>,
}

impl<B: Backend> DeterministicEmbedding<B> {
    pub fn new(weight: Tensor<B, 2>) -> Self {
        Self {
            weight: Param::from_tensor(weight),
        }
    }

    pub fn num_embeddings(&self) -> usize {
        self.weight.val().dims()[0]
    }

    pub fn embedding_dim(&self) -> usize {
        self.weight.val().dims()[1]
    }

    /// Look up a flat list of indices: `[n] -> [n, embedding_dim]`.
    pub fn forward(&self, indices: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        self.weight.val().select(0, indices)
    }

    /// Look up a `[batch, len]` grid of indices: `-> [batch, len, embedding_dim]`.
    pub fn forward_2d(&self, indices: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch, len] = indices.dims();
        let flat = indices.reshape([batch * len]);
        self.forward(flat)
            .reshape([batch, len, self.embedding_dim()])
    }
}

/// Deterministic RNG context that ensures reproducible parameter initialization
///
/// SEED OFFSET POLICY (all offsets are added to the base `seed`):
/// - `+10` token embedding, `+11` position embedding, `+20` output projection
/// - `+1000 * (i + 1)` base of block `i`; inside a block attention uses
///   `+100..=+103` (query, key, value, output) and the feed-forward `+200..=+201`
///
/// All initialization goes through `StdRng::seed_from_u64`; nothing here reads
/// from entropy or a global RNG. Forward-time randomness (dropout, sampling)
/// is not this context's concern.
#[derive(Debug, Clone)]
pub struct DeterministicRngContext<B: Backend> {
    pub seed: u64,
    device: B::Device,
}

impl<B: Backend> DeterministicRngContext<B> {
    pub fn new(seed: u64, device: B::Device) -> Self {
        Self { seed, device }
    }

    /// Execute `f` with a StdRng seeded from `seed`, or the context seed.
    pub fn with_isolated_seed<F, R>(&self, seed: Option<u64>, f: F) -> R
    where
        F: FnOnce(&mut StdRng) -> R,
    {
        let mut rng = StdRng::seed_from_u64(seed.unwrap_or(self.seed));
        f(&mut rng)
    }

    /// Linear layer with Xavier-normal weights and small normal bias.
    pub fn create_deterministic_linear(
        &self,
        input_dim: usize,
        output_dim: usize,
        bias: bool,
        seed: u64,
    ) -> DeterministicLinear<B> {
        self.with_isolated_seed(Some(seed), |rng| {
            let std = (2.0 / (input_dim + output_dim) as f32).sqrt();
            let weight = self.generate_normal_tensor([output_dim, input_dim], rng, 0.0, std);
            let bias = bias.then(|| self.generate_normal_tensor([output_dim], rng, 0.0, 0.01));
            DeterministicLinear::new(weight, bias)
        })
    }

    /// Embedding table with `N(0, 1/embedding_dim)` entries.
    pub fn create_deterministic_embedding(
        &self,
        num_embeddings: usize,
        embedding_dim: usize,
        seed: u64,
    ) -> DeterministicEmbedding<B> {
        self.with_isolated_seed(Some(seed), |rng| {
            let std = (1.0 / embedding_dim as f32).sqrt();
            DeterministicEmbedding::new(self.generate_normal_tensor(
                [num_embeddings, embedding_dim],
                rng,
                0.0,
                std,
            ))
        })
    }

    /// Generate a normal f32 tensor on the context's device from an explicit RNG.
    pub fn generate_normal_tensor<const D: usize>(
        &self,
        shape: [usize; D],
        rng: &mut StdRng,
        mean: f32,
        std: f32,
    ) -> Tensor<B, D> {
        let total_elements: usize = shape.iter().product();
        let data: Vec<f32> = (0..total_elements)
            .map(|_| mean + std * rng.sample::<f32, _>(StandardNormal))
            .collect();

        Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape(shape)
    }

    /// LayerNorm is initialized to weight 1, bias 0; no RNG involved.
    pub fn create_deterministic_layer_norm(&self, d_model: usize, eps: f64) -> burn::nn::LayerNorm<B> {
        LayerNormConfig::new(d_model).with_epsilon(eps).init(&self.device)
    }

    pub fn create_deterministic_dropout(&self, prob: f64) -> Dropout {
        DropoutConfig::new(prob).init()
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// New context with `seed + offset` on the same device.
    pub fn fork(&self, offset: u64) -> Self {
        Self::new(self.seed.wrapping_add(offset), self.device.clone())
    }

    /// StdRng seeded with `seed + offset`, for forward-time randomness owned by the caller.
    pub fn next_std_rng(&self, offset: Option<u64>) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(offset.unwrap_or(0)))
    }

    /// Standard normal tensor seeded from the context seed.
    pub fn randn<const D: usize>(&self, shape: [usize; D], device: &B::Device) -> Tensor<B, D> {
        let mut rng = self.next_std_rng(None);
        let total_elements: usize = shape.iter().product();
        let data: Vec<f32> = (0..total_elements)
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect();

        Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape(shape)
    }
}

/// Result of [`Gpt::forward`].
#[derive(Debug, Clone)]
pub struct SequenceOutput<B: Backend> {
    /// `[batch, len, vocab_size]` unnormalized next-token scores.
    pub logits: Tensor<B, 3>,
    /// Mean cross-entropy over every position, present when targets were given.
    pub loss: Option<Tensor<B, 1>>,
}

/// Decoder-only transformer over token indices.
///
/// Token and learned position embeddings are summed, passed through the causal
/// blocks in order, normalized, and projected to vocabulary logits.
#[derive(Module, Debug)]
pub struct Gpt<B: Backend> {
    token_embedding: DeterministicEmbedding<B>,
    position_embedding: DeterministicEmbedding<B>,
    blocks: Vec<Block<B>>,
    ln_f: LayerNorm<B>,
    head: DeterministicLinear<B>,
    context_window: usize,
    embed_dim: usize,
    vocab_size: usize,
    num_heads: usize,
}

impl<B: Backend> Gpt<B> {
    /// Parameters are drawn from `rng_ctx` forked by `config.seed`, so either
    /// seed changes the initialization.
    pub fn new(config: &ModelConfig, rng_ctx: &DeterministicRngContext<B>) -> Result<Self> {
        config.validate_consistent()?;

        let rng_ctx = &rng_ctx.fork(config.seed);
        let seed = rng_ctx.seed;
        let token_embedding =
            rng_ctx.create_deterministic_embedding(config.vocab_size, config.embed_dim, seed.wrapping_add(10));
        let position_embedding = rng_ctx.create_deterministic_embedding(
            config.context_window,
            config.embed_dim,
            seed.wrapping_add(11),
        );

        let blocks = (0..config.num_layers)
            .map(|i| Block::new(config, rng_ctx, 1000 * (i as u64 + 1)))
            .collect::<Result<Vec<_>>>()?;

        let model = Self {
            token_embedding,
            position_embedding,
            blocks,
            ln_f: LayerNorm::new(config.embed_dim, config.layer_norm_eps, rng_ctx),
            head: rng_ctx.create_deterministic_linear(
                config.embed_dim,
                config.vocab_size,
                true,
                seed.wrapping_add(20),
            ),
            context_window: config.context_window,
            embed_dim: config.embed_dim,
            vocab_size: config.vocab_size,
            num_heads: config.num_heads,
        };

        log::debug!(
            "Gpt: {} blocks, embed_dim={}, heads={}, vocab={}, context={}, {} parameters",
            config.num_layers,
            config.embed_dim,
            config.num_heads,
            config.vocab_size,
            config.context_window,
            model.num_params()
        );

        Ok(model)
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    /// Device holding the parameters.
    pub fn device(&self) -> B::Device {
        self.head.weight.val().device()
    }

    /// Next-token logits for every position, plus the mean cross-entropy
    /// against `targets` when given.
    pub fn forward(
        &self,
        tokens: Tensor<B, 2, Int>,
        targets: Option<Tensor<B, 2, Int>>,
    ) -> Result<SequenceOutput<B>> {
        let [batch, len] = tokens.dims();
        if batch == 0 || len == 0 {
            return Err(ModelError::shape("tokens (non-empty)", "[>=1, >=1]", [batch, len]));
        }
        if len > self.context_window {
            return Err(ModelError::shape(
                "tokens length vs context window",
                format!("<= {}", self.context_window),
                len,
            ));
        }
        validate_index_tensor(&tokens, self.vocab_size, "tokens")?;

        let device = tokens.device();
        let positions = Tensor::<B, 1, Int>::arange(0..len as i64, &device);
        let position_embed = self
            .position_embedding
            .forward(positions)
            .unsqueeze::<3>()
            .expand([batch, len, self.embed_dim]);

        let mut x = self.token_embedding.forward_2d(tokens) + position_embed;
        for block in &self.blocks {
            x = block.forward(x, MaskPolicy::Causal)?;
        }
        let logits = self.head.forward_3d(self.ln_f.forward(x)?);

        let loss = match targets {
            Some(targets) => Some(self.loss(logits.clone(), targets)?),
            None => None,
        };

        Ok(SequenceOutput { logits, loss })
    }

    fn loss(&self, logits: Tensor<B, 3>, targets: Tensor<B, 2, Int>) -> Result<Tensor<B, 1>> {
        let [batch, len, vocab] = logits.dims();
        if targets.dims() != [batch, len] {
            return Err(ModelError::shape("targets", [batch, len], targets.dims()));
        }
        validate_index_tensor(&targets, self.vocab_size, "targets")?;

        let loss = cross_entropy_mean(
            logits.reshape([batch * len, vocab]),
            targets.reshape([batch * len]),
        );
        let value = validate_loss_value(&loss)?;
        log::trace!("sequence loss {:.6}", value);
        Ok(loss)
    }

    /// Extend `seed` by `max_new_tokens` sampled tokens.
    ///
    /// Each step conditions on at most the last `context_window` tokens and
    /// draws one token per batch row from the softmax of the final position.
    /// The result has `seed_len + max_new_tokens` columns and starts with `seed`.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        seed: Tensor<B, 2, Int>,
        max_new_tokens: usize,
        rng: &mut R,
    ) -> Result<Tensor<B, 2, Int>> {
        self.generate_inner(seed, max_new_tokens, rng, None)
    }

    /// [`Gpt::generate`] that stops between steps once `cancel` is set.
    ///
    /// Returns `Cancelled` with the number of tokens already appended; a step
    /// in progress always completes.
    pub fn generate_cancellable<R: Rng + ?Sized>(
        &self,
        seed: Tensor<B, 2, Int>,
        max_new_tokens: usize,
        rng: &mut R,
        cancel: &AtomicBool,
    ) -> Result<Tensor<B, 2, Int>> {
        self.generate_inner(seed, max_new_tokens, rng, Some(cancel))
    }

    fn generate_inner<R: Rng + ?Sized>(
        &self,
        seed: Tensor<B, 2, Int>,
        max_new_tokens: usize,
        rng: &mut R,
        cancel: Option<&AtomicBool>,
    ) -> Result<Tensor<B, 2, Int>> {
        let [batch, seed_len] = seed.dims();
        if batch == 0 || seed_len == 0 {
            return Err(ModelError::shape("generation seed (non-empty)", "[>=1, >=1]", [batch, seed_len]));
        }
        validate_index_tensor(&seed, self.vocab_size, "generation seed")?;

        if seed_len + max_new_tokens > self.context_window {
            log::debug!(
                "generating {} tokens past a context window of {}; early tokens will be cropped",
                seed_len + max_new_tokens - self.context_window,
                self.context_window
            );
        }

        let mut tokens = seed;
        for step in 0..max_new_tokens {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                log::debug!("generation cancelled after {} of {} steps", step, max_new_tokens);
                return Err(ModelError::Cancelled {
                    completed_steps: step,
                });
            }

            let len = tokens.dims()[1];
            let start = len.saturating_sub(self.context_window);
            let window = tokens.clone().slice([0..batch, start..len]);
            let window_len = len - start;

            let logits = self.forward(window, None)?.logits;
            let last = logits
                .slice([0..batch, window_len - 1..window_len, 0..self.vocab_size])
                .reshape([batch, self.vocab_size]);
            let probs = activation::softmax(last, 1);

            let next = sample_categorical(probs, rng)?;
            tokens = Tensor::cat(vec![tokens, next], 1);
        }

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor_io::{float_values, int_values, tensor_from_i64_vec};
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn make_test_config() -> ModelConfig {
        ModelConfig {
            context_window: 8,
            embed_dim: 16,
            num_heads: 2,
            vocab_size: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_deterministic_rng_context() {
        let rng_context = DeterministicRngContext::<TestBackend>::new(42, Default::default());

        let mut rng1 = StdRng::seed_from_u64(42);
        let mut rng2 = StdRng::seed_from_u64(42);
        let tensor1 = rng_context.generate_normal_tensor([2, 3], &mut rng1, 0.0, 1.0);
        let tensor2 = rng_context.generate_normal_tensor([2, 3], &mut rng2, 0.0, 1.0);

        assert_eq!(float_values(&tensor1).unwrap(), float_values(&tensor2).unwrap());
        assert_eq!(rng_context.fork(8).seed, 50);
    }

    #[test]
    fn test_parameter_initialization_deterministic() {
        let device = Default::default();
        let a = Gpt::<TestBackend>::new(&make_test_config(), &DeterministicRngContext::new(3, device)).unwrap();
        let b = Gpt::<TestBackend>::new(&make_test_config(), &DeterministicRngContext::new(3, device)).unwrap();
        let c = Gpt::<TestBackend>::new(&make_test_config(), &DeterministicRngContext::new(4, device)).unwrap();

        let wa = float_values(&a.head.weight.val()).unwrap();
        let wb = float_values(&b.head.weight.val()).unwrap();
        let wc = float_values(&c.head.weight.val()).unwrap();
        assert_eq!(wa, wb);
        assert_ne!(wa, wc);
    }

    #[test]
    fn test_config_seed_changes_initialization() {
        let ctx = DeterministicRngContext::<TestBackend>::new(5, Default::default());
        let build = |seed| {
            let model = Gpt::new(&ModelConfig { seed, ..make_test_config() }, &ctx).unwrap();
            float_values(&model.token_embedding.weight.val()).unwrap()
        };

        assert_ne!(build(1), build(999));
        assert_eq!(build(7), build(7));
    }

    #[test]
    fn test_seed_near_u64_max_wraps() {
        let config = make_test_config();
        for seed in [u64::MAX - 1100, u64::MAX - 3, u64::MAX] {
            let ctx = DeterministicRngContext::<TestBackend>::new(seed, Default::default());
            let model = Gpt::new(&config, &ctx).unwrap();
            assert_eq!(model.num_layers(), config.num_layers);
        }

        let config = ModelConfig { seed: u64::MAX, ..make_test_config() };
        let ctx = DeterministicRngContext::<TestBackend>::new(u64::MAX - 1100, Default::default());
        assert!(Gpt::new(&config, &ctx).is_ok());
    }

    #[test]
    fn test_embedding_lookup_selects_rows() {
        let ctx = DeterministicRngContext::<TestBackend>::new(0, Default::default());
        let embedding = ctx.create_deterministic_embedding(5, 3, 9);
        let table = float_values(&embedding.weight.val()).unwrap();

        let indices = tensor_from_i64_vec::<TestBackend, 2>(&[4, 0], [1, 2], ctx.device());
        let out = float_values(&embedding.forward_2d(indices)).unwrap();

        assert_eq!(&out[0..3], &table[12..15]);
        assert_eq!(&out[3..6], &table[0..3]);
    }

    #[test]
    fn test_num_params_counts_every_layer() {
        let config = make_test_config();
        let model = Gpt::<TestBackend>::new(&config, &DeterministicRngContext::new(0, Default::default())).unwrap();

        let d = config.embed_dim;
        let v = config.vocab_size;
        let hidden = d * config.ffn_factor;
        let per_block = 3 * d * d + (d * d + d) // attention
            + (d * hidden + hidden) + (hidden * d + d) // feed-forward
            + 4 * d; // two layer norms
        let expected = v * d + config.context_window * d + config.num_layers * per_block + 2 * d + (d * v + v);

        assert_eq!(model.num_params(), expected);
    }

    #[test]
    fn test_loss_backward_reaches_embeddings() {
        let device = Default::default();
        let model = Gpt::<TestAutodiffBackend>::new(&make_test_config(), &DeterministicRngContext::new(1, device)).unwrap();
        let tokens = tensor_from_i64_vec::<TestAutodiffBackend, 2>(&[1, 2, 3, 4], [1, 4], &device);
        let targets = tensor_from_i64_vec::<TestAutodiffBackend, 2>(&[2, 3, 4, 5], [1, 4], &device);

        let loss = model.forward(tokens, Some(targets)).unwrap().loss.unwrap();
        let grads = loss.backward();

        let token_grad = model.token_embedding.weight.grad(&grads).expect("token embedding grad");
        let position_grad = model.position_embedding.weight.grad(&grads).expect("position embedding grad");
        assert_eq!(token_grad.dims(), [10, 16]);
        assert_eq!(position_grad.dims(), [8, 16]);

        // rows for tokens never seen receive no gradient
        let g = token_grad.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert!(g[9 * 16..].iter().all(|&x| x == 0.0));
        assert!(g[16..32].iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_generate_crops_to_context_window() {
        let config = ModelConfig {
            context_window: 4,
            ..make_test_config()
        };
        let ctx = DeterministicRngContext::<TestBackend>::new(2, Default::default());
        let model = Gpt::new(&config, &ctx).unwrap();
        let seed = tensor_from_i64_vec::<TestBackend, 2>(&[1, 2, 3], [1, 3], ctx.device());

        let out = model.generate(seed, 6, &mut ctx.next_std_rng(Some(1000))).unwrap();
        assert_eq!(out.dims(), [1, 9]);
        assert_eq!(&int_values(&out).unwrap()[..3], &[1, 2, 3]);
    }
}
