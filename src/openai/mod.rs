use crate::scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;

pub mod aggregator;
pub mod generation;
pub mod openai_server;
pub mod requests;
pub mod responses;
pub mod streaming;
pub mod utils;

#[derive(Clone)]
pub struct OpenAIServerData {
    pub scheduler: Arc<Scheduler>,
    /// Reported as `owned_by` in the model listing.
    pub owned_by: String,
    pub keep_alive: Duration,
}

impl OpenAIServerData {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            owned_by: "owner".to_string(),
            keep_alive: Duration::from_millis(100),
        }
    }
}
