//! Fraud Engine
//!
//! Real-time transaction risk scoring and fraud decisions for card, mobile
//! money and crypto payments.
//!
//! ```no_run
//! use fraud_engine::{EngineConfig, EngineDependencies, FraudEngine};
//!
//! # async fn run(tx: fraud_engine::Transaction) -> fraud_engine::Result<()> {
//! let config = EngineConfig::from_env()?;
//! let deps = EngineDependencies::from_config(&config)?;
//! let engine = FraudEngine::new(config, deps)?;
//!
//! let assessment = engine.evaluate(&tx).await;
//! if assessment.is_fraudulent {
//!     // reject the payment
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod aggregator;
pub mod alert;
pub mod circuit;
pub mod clock;
pub mod collectors;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod metrics;
pub mod patterns;
pub mod sink;
pub mod store;
pub mod types;
pub mod velocity;

pub use aggregator::RiskAggregator;
pub use alert::{AlertChannel, BroadcastAlertChannel, SecurityAlert, TracingAlertChannel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use decision::DecisionEngine;
pub use engine::{EngineDependencies, FraudEngine};
pub use error::{Error, Result};
pub use feedback::{FeedbackStore, FeedbackSummary, JsonlFeedbackStore, MemoryFeedbackStore, OutcomeRecord};
pub use store::{MemoryStore, RiskStore};
pub use types::*;
pub use velocity::{VelocityCheck, VelocitySnapshot, VelocityTracker};
