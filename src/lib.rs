//! trailwatch — streaming CloudTrail anomaly detection.
//!
//! Modular structure:
//! - [`source`] — CloudTrail lookup (SigV4-signed), bounded retry
//! - [`features`] — Training-compatible feature extraction and scaling
//! - [`model`] — Isolation-forest / ONNX scoring, model registry
//! - [`stream`] — Polling controller, high-water mark, checkpoints
//! - [`sink`] — Append-only CSV output
//! - [`storage`] — Encrypted anomaly archive
//! - [`alert`] — Console, channel and webhook alerts
//! - [`risk`] — Risk levels for alert routing
//! - [`logging`] — Structured JSON logging

pub mod alert;
pub mod clock;
pub mod config;
pub mod error;
pub mod features;
pub mod logging;
pub mod model;
pub mod risk;
pub mod sink;
pub mod source;
pub mod storage;
pub mod stream;

pub use clock::{Clock, StopSignal, SystemClock};
pub use config::DetectorConfig;
pub use error::{Result, Stage, StreamError};
pub use features::{FeatureExtractor, FeatureVector};
pub use logging::StructuredLogger;
pub use model::{LoadedModel, ModelRegistry};
pub use source::{EventSource, RawEvent};
pub use storage::SecureStore;
pub use stream::{ScoredEvent, StreamController, StreamState};
