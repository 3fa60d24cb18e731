//! Count Reconciliation & Alert Engine
//!
//! The patient-safety core: compares paired pre/post instrument counts,
//! classifies discrepancies, and turns them — together with maintenance
//! and staleness signals — into prioritized, deduplicated alerts with an
//! explicit resolution lifecycle.

pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod port;
pub mod sweeps;
pub mod types;

pub use config::ReconcileConfig;
pub use detector::DiscrepancyDetector;
pub use engine::AlertEngine;
pub use error::CoreError;
pub use port::{CountDataPort, UpsertOutcome};
pub use sweeps::VerificationService;
pub use types::*;
