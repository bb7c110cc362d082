//! VQ code-sequence prior: model architecture, tokenizer and settings.

pub mod architectures;
pub mod error;
pub mod settings;
pub mod tokenizer;
