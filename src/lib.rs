//! WeCom Gateway: enterprise messaging callback bridge to an AI backend.

pub mod api;
pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod llm;
pub mod message;
pub mod routes;
pub mod xml;
