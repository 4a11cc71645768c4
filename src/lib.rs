pub mod about;
pub mod annotate;
pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod gc_contents;
pub mod generator;
pub mod iupac_code;
pub mod llm_bridge;
pub mod logging;
pub mod mcp_server;
pub mod metrics;
pub mod open_reading_frame;
pub mod pipeline;
pub mod provider_manager;
pub mod sampler;
pub mod signatures;
pub mod tokenizer;
pub mod vocabulary;
