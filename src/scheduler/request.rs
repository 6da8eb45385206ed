use chrono::{DateTime, Duration, Utc};

/// Routing decision of one in-flight request. The engine binding is fixed
/// at admission.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub engine_id: String,
    pub model: String,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
}

impl RequestRecord {
    pub fn new(engine_id: String, model: String, started: DateTime<Utc>) -> Self {
        Self {
            engine_id,
            model,
            started,
            finished: None,
        }
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished = Some(at);
    }

    pub fn duration(&self) -> Option<Duration> {
        self.finished.map(|end| end - self.started)
    }
}
