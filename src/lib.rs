pub mod cli;
pub mod commands;
pub mod config;
pub mod deps;
pub mod domain;
pub mod orchestrator;
pub mod platform;
pub mod proxy;
pub mod runner;
pub mod store;
pub mod ui;
