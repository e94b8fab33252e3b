pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AutopilotConfig, ExecutorConfig, MissingHandlerPolicy, RateLimitConfig};
pub use error::{CoreError, Result};
pub use events::ActionEvent;
pub use types::*;
