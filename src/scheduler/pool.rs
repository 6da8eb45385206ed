use crate::engine::EngineHandle;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

/// One engine replica serving a model, together with its traffic share and
/// health counters.
pub struct EngineInstance {
    pub id: String,
    pub model: String,
    /// Normalized weight; the weights of one pool sum to 1.
    pub weight: f64,
    pub handle: Arc<dyn EngineHandle>,
    pub requests: u64,
    pub failures: u64,
    pub last_request: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl EngineInstance {
    fn new(model: &str, weight: f64, handle: Arc<dyn EngineHandle>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            model: model.to_string(),
            weight,
            handle,
            requests: 0,
            failures: 0,
            last_request: None,
            last_success: None,
            last_failure: None,
        }
    }
}

/// All replicas of one model. Selection draws a uniform number and binary
/// searches the cumulative weight table built at construction.
pub struct EnginePool {
    instances: Vec<EngineInstance>,
    cumulative: Vec<f64>,
}

impl EnginePool {
    /// Weights must already be validated as finite and positive.
    pub(crate) fn new(model: &str, engines: Vec<(f64, Arc<dyn EngineHandle>)>) -> Self {
        let total: f64 = engines.iter().map(|(weight, _)| weight).sum();
        let mut instances = Vec::with_capacity(engines.len());
        let mut cumulative = Vec::with_capacity(engines.len());
        let mut running = 0.0;
        for (weight, handle) in engines {
            let weight = weight / total;
            running += weight;
            cumulative.push(running);
            instances.push(EngineInstance::new(model, weight, handle));
        }
        // absorb rounding so the last bucket always closes the table
        if let Some(last) = cumulative.last_mut() {
            *last = 1.0;
        }
        Self {
            instances,
            cumulative,
        }
    }

    pub fn instances(&self) -> &[EngineInstance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn select(&self) -> Option<&EngineInstance> {
        self.select_with(&mut rand::rng())
    }

    pub fn select_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&EngineInstance> {
        self.pick(rng).map(|slot| &self.instances[slot])
    }

    pub(crate) fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        match self.instances.len() {
            0 => None,
            1 => Some(0),
            len => {
                let draw: f64 = rng.random();
                let slot = self.cumulative.partition_point(|&edge| edge <= draw);
                Some(slot.min(len - 1))
            }
        }
    }

    pub(crate) fn instance_mut(&mut self, slot: usize) -> Option<&mut EngineInstance> {
        self.instances.get_mut(slot)
    }

    pub(crate) fn find_mut(&mut self, engine_id: &str) -> Option<&mut EngineInstance> {
        self.instances.iter_mut().find(|e| e.id == engine_id)
    }
}
