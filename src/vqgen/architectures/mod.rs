pub mod base;
pub mod instance;
