//! Scan coordination: the global scanning slot, the liveness signal and the retry sweep.

pub mod coordinator;
pub mod signal;

pub use coordinator::{ScanCoordinator, ScanOutcome};
pub use signal::ProgressSignal;
