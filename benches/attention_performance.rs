use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use burn::prelude::*;
use burn_ndarray::NdArray;
use rand::rngs::StdRng;
use rand::SeedableRng;

use vq_transformer_rs::tensor_io::{tensor_from_f32_vec, tensor_from_i64_vec};
use vq_transformer_rs::vqgen::architectures::base::attention::{
    full_attention::MultiHeadAttention, MaskPolicy,
};
use vq_transformer_rs::vqgen::architectures::base::config::ModelConfig;
use vq_transformer_rs::vqgen::architectures::base::transformer::{DeterministicRngContext, Gpt};

type BenchBackend = NdArray<f32>;

fn create_test_input(
    batch_size: usize,
    seq_len: usize,
    embed_dim: usize,
    device: &<BenchBackend as Backend>::Device,
) -> Tensor<BenchBackend, 3> {
    let data: Vec<f32> = (0..batch_size * seq_len * embed_dim)
        .map(|i| (i as f32 * 0.01).sin())
        .collect();
    tensor_from_f32_vec(&data, [batch_size, seq_len, embed_dim], device)
}

/// Causal self-attention forward at growing sizes
fn benchmark_attention_configurations(c: &mut Criterion) {
    let device = Default::default();
    let rng_ctx = DeterministicRngContext::<BenchBackend>::new(42, device);

    let configs = vec![
        // (name, batch, seq_len, embed_dim, num_heads)
        ("small", 1, 32, 64, 4),
        ("medium", 1, 128, 128, 8),
        ("large", 1, 256, 256, 8),
        ("batched", 8, 64, 128, 4),
    ];

    let mut group = c.benchmark_group("attention_forward_pass");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(30);

    for (name, batch, seq_len, embed_dim, num_heads) in configs {
        let input = create_test_input(batch, seq_len, embed_dim, rng_ctx.device());
        let Ok(attention) = MultiHeadAttention::new(embed_dim, num_heads, 0.0, &rng_ctx, 100) else {
            continue;
        };

        group.bench_with_input(BenchmarkId::new("causal", name), &input, |b, input| {
            b.iter(|| {
                black_box(attention.forward(
                    black_box(input.clone()),
                    input.clone(),
                    input.clone(),
                    MaskPolicy::Causal,
                ))
            });
        });
    }

    group.finish();
}

/// Autoregressive generation including context-window cropping
fn benchmark_generation(c: &mut Criterion) {
    let device = Default::default();
    let rng_ctx = DeterministicRngContext::<BenchBackend>::new(7, device);
    let config = ModelConfig {
        vocab_size: 256,
        context_window: 64,
        embed_dim: 64,
        num_heads: 4,
        num_layers: 2,
        ..Default::default()
    };
    let Ok(model) = Gpt::new(&config, &rng_ctx) else {
        return;
    };

    let mut group = c.benchmark_group("generation");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    for new_tokens in [16usize, 64, 96] {
        group.bench_with_input(
            BenchmarkId::new("generate", new_tokens),
            &new_tokens,
            |b, &new_tokens| {
                b.iter_with_setup(
                    || {
                        (
                            tensor_from_i64_vec::<BenchBackend, 2>(&[0; 4], [4, 1], rng_ctx.device()),
                            StdRng::seed_from_u64(0),
                        )
                    },
                    |(seed, mut rng)| black_box(model.generate(seed, new_tokens, &mut rng)),
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_attention_configurations, benchmark_generation);
criterion_main!(benches);
