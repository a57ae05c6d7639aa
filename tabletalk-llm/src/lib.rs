pub mod config;
pub mod error;
pub mod manager;
pub mod providers;
pub mod completion;

#[cfg(test)]
mod manager_tests;

pub use config::*;
pub use error::*;
pub use manager::LLMManager;
pub use providers::Provider;
pub use completion::{CompletionService, Prompt};
