//! Core library for the `volley` CLI.
//!
//! This crate provides the building blocks used by the binary: CLI argument
//! types, configuration loading and templating, the protocol clients behind
//! the uniform `Client` contract, the execution engine (pool, middleware
//! pipeline, selectors, scheduler), the statistics collector and the
//! realtime SSE surface. The primary user-facing interface is the `volley`
//! command-line application.
pub mod args;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod logger;
pub mod protocol;
pub mod shutdown;
pub mod stats;
pub mod verify;
