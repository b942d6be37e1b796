pub mod build_info;
pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod github_client;
pub mod logging;
pub mod mq;
pub mod server;
pub mod state;
pub mod sync_service;
pub mod worker;
