//! Ledgerflow Config
//!
//! This crate contains the serializable configuration types for ledgerflow.
//! These types represent workflow definitions and service settings before they
//! are validated and compiled by the engine.
//!
//! Configuration can be loaded from:
//! - JSON files (via the CLI with `--settings=settings.json`)
//! - Embedded definitions built in code by the service wiring
//!
//! `ledgerflow-workflow` takes a [`WorkflowDef`], validates its step graph and
//! compiles it into the static step registry the engine routes against.

mod enums;
mod settings;
mod step;
mod workflow;

pub use enums::{ChainKind, ExhaustionPolicy};
pub use settings::{ChainSettings, ConsumerSettings, EngineSettings, FinalizerSettings, Settings};
pub use step::StepDef;
pub use workflow::WorkflowDef;
