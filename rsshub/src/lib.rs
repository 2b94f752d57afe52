pub mod aggregator;
pub mod config;
pub mod control;
pub mod dates;
pub mod dispatcher;
pub mod fetcher;
pub mod parser;
pub mod repository;
pub mod scheduler;
pub mod traits;
pub mod types;
pub mod worker;

pub use aggregator::{AggregatorSettings, RssAggregator};
pub use config::Config;
pub use control::{AggregatorState, ControlEvent, ControlSignal, StateStore};
pub use dispatcher::Dispatcher;
pub use fetcher::HttpFetcher;
pub use repository::PgRepository;
pub use traits::{FeedFetcher, Repository};
pub use types::*;
pub use worker::{FeedOutcome, FeedProcessor, WorkerPool};
