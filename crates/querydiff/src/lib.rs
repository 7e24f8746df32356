#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod equivalence;
pub mod models;
pub mod pairs;
pub mod report;
pub mod sqlite;
pub mod verify;
pub mod wrap;

pub use cli::app::{Cli, Command};
