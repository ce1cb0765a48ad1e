pub mod aws;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod constants;
pub mod directory;
pub mod engine;
pub mod error;
pub mod fs;
pub mod mfa;
pub mod profile;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
