//! Natural-language query translation and execution across relational databases,
//! HTTP-exposed table stores and REST APIs.

pub mod adapters;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod insights;
pub mod llm;
pub mod orchestrator;
pub mod sanitizer;
pub mod schema;
pub mod translator;
pub mod util;
pub mod web;

pub use error::{EngineError, Result};
