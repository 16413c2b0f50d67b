pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod http;
pub mod limiter;
pub mod mcp;
pub mod server;
pub mod tools;
