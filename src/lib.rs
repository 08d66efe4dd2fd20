pub mod aggregator;
pub mod config;
pub mod error;
pub mod formula;
pub mod identity;
pub mod ingest;
pub mod logging;
pub mod odds;
pub mod rankings;
pub mod records;
pub mod schedule;
pub mod source;
pub mod sports;
pub mod stats;
pub mod store;
pub mod timeframe;
pub mod updater;
