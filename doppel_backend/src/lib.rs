pub mod agent;
pub mod bridge;
pub mod config;
pub mod database;
pub mod eligibility;
pub mod env_file;
pub mod generator;
pub mod http_client;
pub mod llm_client;
pub mod memory;
pub mod resolver;
pub mod runtime;
pub mod tone;

#[cfg(test)]
mod test_support;
