pub mod store;

pub use store::{SqliteMetricsStore, StoredRunMetrics};
