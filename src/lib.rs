//! Breath-synchronised spatial soundscape engine.
//!
//! Thirteen voices of Fibonacci-related sine oscillators are rendered in double-buffered
//! blocks, gated by a breath envelope and handed to a downstream spatial mixer.

pub mod audio;
pub mod breath;
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod synth;

pub use engine::{Engine, EngineError};
