pub mod config;
pub mod engine;
pub mod openai;
pub mod scheduler;

pub use config::{Config, ConfigError};
pub use engine::{EngineHandle, FinishReason, SamplingParams, SequenceOutput};
pub use scheduler::{Scheduler, SchedulerError};
