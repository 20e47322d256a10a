//! Market data pipeline: file ingestion, validation, the shared data set and
//! the merged feed consumed by the event loop.

pub mod dataset;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod report;
pub mod timestamp;

pub use dataset::MarketDataSet;
pub use error::DataError;
pub use feed::{DataFeed, TimeStep};
pub use ingest::{load_sources, write_parquet, DataFormat, DataSource};
pub use report::{LoadReport, SkipReason, SymbolLoadStats};
pub use timestamp::parse_timestamp;
