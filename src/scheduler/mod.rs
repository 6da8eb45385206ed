//! Request admission across weighted engine pools.
//!
//! The [`Scheduler`] owns one [`EnginePool`] per model name and the registry
//! of in-flight requests. Every admit and release runs inside a single
//! critical section that is never held across an await point.

use crate::config::ConfigError;
use crate::engine::EngineHandle;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub mod pool;
pub mod request;

pub use pool::{EngineInstance, EnginePool};
pub use request::RequestRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("request `{0}` is already in flight")]
    DuplicateRequest(String),
    #[error("model `{0}` not found")]
    ModelNotFound(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub requests: u64,
    pub failures: u64,
    pub last_request: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelStatus {
    pub model: String,
    pub engines: Vec<EngineStatus>,
}

struct SchedulerState {
    pools: HashMap<String, EnginePool>,
    requests: HashMap<String, RequestRecord>,
}

pub struct Scheduler {
    models: Vec<String>,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    /// Registered model names, in registration order.
    pub fn model_names(&self) -> &[String] {
        &self.models
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn request(&self, request_id: &str) -> Option<RequestRecord> {
        self.state.lock().requests.get(request_id).cloned()
    }

    pub fn admit(
        &self,
        request_id: &str,
        model: &str,
    ) -> Result<Arc<dyn EngineHandle>, SchedulerError> {
        self.admit_with(request_id, model, &mut rand::rng())
    }

    /// Binds `request_id` to one engine of `model`, drawn by weight, and
    /// counts the request against that engine.
    pub fn admit_with<R: Rng + ?Sized>(
        &self,
        request_id: &str,
        model: &str,
        rng: &mut R,
    ) -> Result<Arc<dyn EngineHandle>, SchedulerError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.requests.contains_key(request_id) {
            warn!("Request {} already exists, refusing to admit it twice", request_id);
            return Err(SchedulerError::DuplicateRequest(request_id.to_string()));
        }

        let not_found = || SchedulerError::ModelNotFound(model.to_string());
        let pool = state.pools.get_mut(model).ok_or_else(not_found)?;
        let slot = pool.pick(rng).ok_or_else(not_found)?;
        let engine = pool.instance_mut(slot).ok_or_else(not_found)?;

        let now = Utc::now();
        engine.requests += 1;
        engine.last_request = Some(now);
        state.requests.insert(
            request_id.to_string(),
            RequestRecord::new(engine.id.clone(), model.to_string(), now),
        );
        info!(
            "Request {} routed to engine {} ({}) of model {}",
            request_id,
            engine.id,
            engine.handle.name(),
            model
        );
        Ok(engine.handle.clone())
    }

    /// Closes the record of `request_id` and books the outcome on the engine
    /// it was bound to. Unknown ids are ignored with a warning.
    pub fn release(&self, request_id: &str, failed: bool) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(mut record) = state.requests.remove(request_id) else {
            warn!("Request {} not registered, nothing to release", request_id);
            return;
        };
        let now = Utc::now();
        record.finish(now);

        let engine = state
            .pools
            .get_mut(&record.model)
            .and_then(|pool| pool.find_mut(&record.engine_id));
        let Some(engine) = engine else {
            warn!(
                "Request {} released but engine {} is not part of model {}",
                request_id, record.engine_id, record.model
            );
            return;
        };

        if failed {
            engine.failures += 1;
            engine.last_failure = Some(now);
        } else {
            engine.last_success = Some(now);
        }
        info!(
            "Request {} {} on engine {}, cost {} ms",
            request_id,
            if failed { "failed" } else { "succeeded" },
            engine.id,
            record.duration().map(|d| d.num_milliseconds()).unwrap_or(0)
        );
    }

    pub fn status(&self) -> Vec<ModelStatus> {
        let state = self.state.lock();
        self.models
            .iter()
            .filter_map(|model| state.pools.get(model).map(|pool| (model, pool)))
            .map(|(model, pool)| ModelStatus {
                model: model.clone(),
                engines: pool
                    .instances()
                    .iter()
                    .map(|e| EngineStatus {
                        id: e.id.clone(),
                        name: e.handle.name().to_string(),
                        weight: e.weight,
                        requests: e.requests,
                        failures: e.failures,
                        last_request: e.last_request,
                        last_success: e.last_success,
                        last_failure: e.last_failure,
                    })
                    .collect(),
            })
            .collect()
    }

    pub fn log_status(&self) {
        for model in self.status() {
            info!("Model {} has {} engines", model.model, model.engines.len());
            for engine in model.engines {
                info!(
                    "\tEngine {} ({}) weight {:.3}, total {} requests, failed {} times",
                    engine.id, engine.name, engine.weight, engine.requests, engine.failures
                );
            }
        }
    }
}

#[derive(Default)]
pub struct SchedulerBuilder {
    engines: Vec<(String, f64, Arc<dyn EngineHandle>)>,
}

impl SchedulerBuilder {
    pub fn add_engine(
        mut self,
        model: impl Into<String>,
        weight: f64,
        handle: Arc<dyn EngineHandle>,
    ) -> Self {
        self.engines.push((model.into(), weight, handle));
        self
    }

    /// Groups engines by model and normalizes the weights of each model.
    pub fn build(self) -> Result<Scheduler, ConfigError> {
        let mut errors = Vec::new();
        if self.engines.is_empty() {
            errors.push("no engines registered".to_string());
        }

        let mut models: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<(f64, Arc<dyn EngineHandle>)>> = HashMap::new();
        for (model, weight, handle) in self.engines {
            if !weight.is_finite() || weight <= 0.0 {
                errors.push(format!(
                    "model '{}' engine '{}' weight must be > 0, got {}",
                    model,
                    handle.name(),
                    weight
                ));
            }
            if !grouped.contains_key(&model) {
                models.push(model.clone());
            }
            grouped.entry(model).or_default().push((weight, handle));
        }
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        let pools = grouped
            .into_iter()
            .map(|(model, engines)| {
                let pool = EnginePool::new(&model, engines);
                (model, pool)
            })
            .collect();

        Ok(Scheduler {
            models,
            state: Mutex::new(SchedulerState {
                pools,
                requests: HashMap::new(),
            }),
        })
    }
}
