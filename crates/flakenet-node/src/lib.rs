//! Library half of the node binary: configuration loading.

pub mod config;
