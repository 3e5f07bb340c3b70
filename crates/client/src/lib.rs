//! Embedded facade over the quarry planner, metadata framework and pipeline
//! interpreter, plus the `quarry` command-line tool.

mod session;

pub mod engine;

pub use engine::Engine;
