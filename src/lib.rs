//! layercake library
//!
//! This module exports the generation pipeline for testing and embedding.

pub mod cli;
pub mod error;
pub mod hierarchy;
pub mod interpolate;
pub mod merge;
pub mod processor;
pub mod remote_state;
pub mod secrets;
pub mod tree;
