//! Ledgerflow Engine
//!
//! This crate routes workflow steps. A step message names a workflow and a
//! step kind; the engine loads both from the store, runs the registered
//! handler and routes its outcome through the workflow's step graph.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    WorkflowConsumer                         │
//! │  - N workers sharing one subscription (bounded prefetch)    │
//! │  - ack / nack / exhaust per delivery                        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkflowEngine                          │
//! │  - claim step under a lease, move the head pointer          │
//! │  - merge read_data_from, invoke the StepHandler             │
//! │  - done → successors, pending → track tx, failed → on_failure│
//! └─────────────────────────────────────────────────────────────┘
//!           │                                   │
//!           ▼                                   ▼
//! ┌──────────────────────┐          ┌──────────────────────────┐
//! │ Store (step log)     │          │ PendingTransactionStore  │
//! └──────────────────────┘          └──────────────────────────┘
//! ```
//!
//! The `Reconciler` re-publishes rows that were persisted but never
//! delivered.

mod consumer;
mod engine;
mod error;
mod events;
mod handler;
mod reconciler;
mod report;

pub use consumer::{Disposition, WorkflowConsumer};
pub use engine::{StepExecution, WorkflowEngine};
pub use error::{ConsumerError, EngineError, HandlerError};
pub use events::{ChannelNotifier, NoopNotifier, StepEvent, StepNotifier};
pub use handler::{FnHandler, HandlerRegistry, StepContext, StepHandler, StepOutcome, Submission};
pub use reconciler::{ReconcileReport, Reconciler};
pub use report::{FailedStep, StepSummary, WorkflowReport, workflow_report};
