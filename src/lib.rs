pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod listener;
pub mod middleware;
pub mod models;
pub mod registry;
pub mod server;
pub mod state;
pub mod storage;
pub mod upload;
pub mod utils;
