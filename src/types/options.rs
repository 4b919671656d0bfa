//! Session and transaction options bundle

use serde::{Deserialize, Serialize};

/// Options sent with session and transaction open requests.
///
/// Unset fields are left to the server's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub infer: Option<bool>,
    pub trace_inference: Option<bool>,
    pub explain: Option<bool>,
    pub parallel: Option<bool>,
    pub prefetch_size: Option<i32>,
    pub session_idle_timeout_millis: Option<i32>,
    pub transaction_timeout_millis: Option<i32>,
    pub schema_lock_acquire_timeout_millis: Option<i32>,
    /// Cluster only: allow a read session to open on a secondary replica
    pub read_any_replica: Option<bool>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn infer(mut self, infer: bool) -> Self {
        self.infer = Some(infer);
        self
    }

    pub fn trace_inference(mut self, trace_inference: bool) -> Self {
        self.trace_inference = Some(trace_inference);
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = Some(explain);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    pub fn prefetch_size(mut self, prefetch_size: i32) -> Self {
        self.prefetch_size = Some(prefetch_size);
        self
    }

    pub fn session_idle_timeout_millis(mut self, millis: i32) -> Self {
        self.session_idle_timeout_millis = Some(millis);
        self
    }

    pub fn transaction_timeout_millis(mut self, millis: i32) -> Self {
        self.transaction_timeout_millis = Some(millis);
        self
    }

    pub fn schema_lock_acquire_timeout_millis(mut self, millis: i32) -> Self {
        self.schema_lock_acquire_timeout_millis = Some(millis);
        self
    }

    pub fn read_any_replica(mut self, read_any_replica: bool) -> Self {
        self.read_any_replica = Some(read_any_replica);
        self
    }

    /// Whether a session opened with these options may use a secondary replica
    pub fn reads_any_replica(&self) -> bool {
        self.read_any_replica.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_only_requested_fields() {
        let options = Options::new().infer(true).prefetch_size(50);
        assert_eq!(options.infer, Some(true));
        assert_eq!(options.prefetch_size, Some(50));
        assert_eq!(options.explain, None);
        assert!(!options.reads_any_replica());
    }
}
