//! Fairspin: a prize draw and fairness engine.
//!
//! Players earn tokens by scanning QR codes at participating businesses and
//! spend them on prize wheel spins. The crate enforces the token economy,
//! validates scans against replay and location fraud, computes
//! inventory-aware odds, and commits each spin atomically so prize stock
//! and balances stay consistent under concurrent load.

pub mod config;
pub mod draw;
pub mod errors;
pub mod events;
pub mod fraud;
pub mod ledger;
pub mod models;
pub mod odds;
pub mod rng;
pub mod spin;
pub mod storage;
pub mod store;

pub use config::FairspinConfig;
pub use errors::{FairspinError, FairspinResult};
pub use spin::{ScanReceipt, ScanRequest, SpinOrchestrator, SpinReceipt};
