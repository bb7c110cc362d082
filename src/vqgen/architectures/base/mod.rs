//! Base architecture modules

pub mod attention;
pub mod codec;
pub mod config;
pub mod corruption;
pub mod layer;
pub mod loss_utils;
pub mod mlp;
pub mod sampling;
pub mod transformer;
pub mod vq_transformer;
