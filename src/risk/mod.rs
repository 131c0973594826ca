//! Risk levels derived from anomaly scores, used to route alerts.

mod engine;

pub use engine::{RiskEngine, RiskLevel};
