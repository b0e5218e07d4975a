pub mod common;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod tracking;

pub use config::Settings;
pub use coordinator::{Coordinator, CoordinatorBuilder, SessionHandle, SessionSnapshot};
pub use error::{AppError, ClassificationError, ExtractionError, TrackingError};
