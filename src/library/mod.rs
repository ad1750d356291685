pub mod app;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod network;
pub mod reactor;
pub mod uring;
