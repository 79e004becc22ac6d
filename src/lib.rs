//! Conversational flow execution engine
//!
//! Runs published chatbot flows (node/edge graphs) against live chat
//! traffic: one durable session per contact and channel, stepped by inbound
//! messages, timer wakes, and callbacks.

pub mod application;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod flow;
pub mod integrations;
pub mod interpolate;
pub mod publish;
pub mod store;
pub mod timers;
pub mod types;

// Re-export main types
pub use types::*;

pub use application::{initialize, Application, InitBuilder, InitOptions};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
