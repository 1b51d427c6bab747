//! Cross-source product search: dispatch, scoring, aggregation and fallback suggestions.

pub mod aggregator;
pub mod cancel;
pub mod config;
pub mod dispatcher;
mod engine;
pub mod fallback;
pub mod scorer;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use config::{FailurePolicy, SearchConfig, SourceConfig, SourceRegistry, StoreBackend};
pub use engine::{EngineOptions, SearchEngine, SearchError};

pub const CRATE_NAME: &str = "psa-search";
