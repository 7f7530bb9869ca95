//! Ledgerflow Workflow
//!
//! This crate provides the compiled step graph for ledgerflow. A compiled
//! graph is a validated form of a [`WorkflowDef`](ledgerflow_config::WorkflowDef)
//! that is ready for routing.
//!
//! Key differences from `ledgerflow-config`:
//! - Every referenced step kind exists
//! - Every step is reachable from the init step
//! - The graph (routing and prerequisite edges) is acyclic
//! - Join points and entry points are identified

mod config;
mod error;
mod graph;
mod step_graph;

pub use config::StepConfig;
pub use error::WorkflowError;
pub use graph::Graph;
pub use step_graph::StepGraph;
