pub mod batch;
pub mod dataset;
pub mod schema;

pub use batch::{Batch, WindowBatch, Windows};
pub use dataset::{TimeSeriesBatcher, TimeSeriesDataset, TimeSeriesItem};
pub use schema::{Schema, AVAILABLE_MASK, TARGET};
