//! Integration module for wiring the client together
//!
//! This module provides:
//! - Configuration loading and validation
//! - The per-turn fallback controller
//! - The orchestrator loop and its UI handle

pub mod config;
pub mod controller;
pub mod orchestrator;

pub use config::{AgentConfig, CaptureConfig, LunaConfig, PlaybackConfig};
pub use controller::{FallbackController, TurnOutcome, TurnReport, APOLOGY};
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorCommand, OrchestratorEvent, OrchestratorHandle,
};
