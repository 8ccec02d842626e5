pub mod artifact;
pub mod config;
pub mod error;
pub mod plan;
pub mod priority;
pub mod request;
pub mod unit;

pub use artifact::*;
pub use config::{load_dotenv, SchedulerConfig};
pub use error::*;
pub use plan::*;
pub use priority::*;
pub use request::*;
pub use unit::*;
