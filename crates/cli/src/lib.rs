//! Command-line drivers for the stock ledger engine.

pub mod simulation;

pub use simulation::{SimulationConfig, SimulationReport, run};
