// Library crate for the binary and the integration tests.

pub mod config;
pub mod error;
pub mod evaluation;
pub mod llm;
