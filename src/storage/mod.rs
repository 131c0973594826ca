//! Encrypted local archive of anomalies and stream checkpoints.

mod encrypted;

pub use encrypted::{SecureStore, StoreSink, StoredAnomaly};
