pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use context::{ContextSnapshot, SharedContext};
pub use error::{LattixError, Result};
pub use event::EventBus;
pub use types::*;
