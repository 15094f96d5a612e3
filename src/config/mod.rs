// src/config/mod.rs
//! Runtime configuration: oracle settings (`config/ai.json`) and pipeline
//! tuning (`config/pipeline.toml`).

pub mod ai;
pub mod pipeline;

pub use ai::AiConfig;
pub use pipeline::PipelineConfig;
