pub mod data;
pub mod error;
pub mod model;
pub mod parser;
pub mod scalers;
pub mod windows;

pub use error::{ForecastError, Result};
pub use model::{Architecture, ForecastModel, ForecastModelConfig, Loss};
pub use scalers::{ScalerType, TemporalScaler};
pub use windows::{StepKind, WindowBuilder};
