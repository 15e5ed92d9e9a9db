pub mod config;
pub mod error;
pub mod evaluate;
pub mod http;
pub mod ledger;
pub mod llm;
pub mod prompts;
pub mod tokens;
