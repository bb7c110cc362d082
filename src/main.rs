use std::collections::HashMap;
use std::error::Error;
use std::str::FromStr;

use log::LevelFilter;
use rand::rngs::StdRng;
use rand::SeedableRng;
use simple_logger::SimpleLogger;

use vq_transformer_rs::settings;
use vq_transformer_rs::tensor_io::int_values;
use vq_transformer_rs::vqgen::architectures::base::config::VQTransformerConfig;
use vq_transformer_rs::vqgen::architectures::instance::{cpu_vq_transformer, BackendType};

/// Samples index grids from a freshly initialized prior.
///
/// Usage: `vq-transformer [config.json]`. The config may be a flat training
/// config; unrelated keys are ignored.
fn main() -> Result<(), Box<dyn Error>> {
    let settings = settings();
    let level = LevelFilter::from_str(&settings.runtime.log_level).unwrap_or(LevelFilter::Info);
    SimpleLogger::new().with_level(level).env().init()?;

    let config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("loading config from {}", path);
            let raw: HashMap<String, serde_json::Value> =
                serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            VQTransformerConfig::from_json_map(raw)?
        }
        None => VQTransformerConfig::default(),
    };

    let backend = BackendType::from_name(&settings.runtime.backend)?;
    if backend != BackendType::Cpu {
        log::warn!("backend `{}` requested, the sampler runs on cpu", backend.name());
    }

    let model = cpu_vq_transformer(&config, settings.runtime.seed)?;
    let mut rng = StdRng::seed_from_u64(settings.runtime.seed.wrapping_add(1000));

    let grids = model.sample_indices(settings.sampling.num_samples, &mut rng)?;
    let [n, h, w] = grids.dims();
    log::info!("sampled {} grids of {}x{}", n, h, w);

    let values = int_values(&grids)?;
    for row in values[..h * w].chunks(w) {
        log::info!("{:?}", row);
    }

    Ok(())
}
