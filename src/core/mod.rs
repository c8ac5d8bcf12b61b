//! Core business logic abstractions

pub mod balance;
pub mod cache;
pub mod config;
pub mod export;
pub mod log;
pub mod metrics;
pub mod psd;

// Re-export main types for cleaner imports
pub use balance::{BalanceRequest, ReferenceData};
pub use metrics::{Adjustments, BalanceSheet, DerivedMetrics, InputField, MetricSet, MetricValue};
pub use psd::{MarketYear, PsdProvider};
