pub mod canonical;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod metrics;
pub mod types;
pub mod waiting_screen;

pub use config::Settings;
pub use context::CoreContext;
pub use error::{FailureClass, IngestError};
pub use types::*;
