//! Zim-Seq library exports
//!
//! A multi-row CV/gate step sequencer core plus the graph engine, modules
//! and CLI plumbing that run it as a patchable module.

#![allow(clippy::multiple_crate_versions)]

pub mod cascade;
pub mod config;
pub mod edge;
pub mod graph;
pub mod graph_engine;
pub mod graph_modules;
pub mod matrix;
pub mod modules;
pub mod observability;
pub mod output;
pub mod parser;
pub mod persist;
pub mod randomize;
pub mod row;
pub mod sequencer;
pub mod test_framework;

mod seq_tests;

pub use config::SequencerConfig;
pub use sequencer::{Sequencer, SequencerInputs};
