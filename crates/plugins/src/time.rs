//! Time plugin.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use weft_core::agent::RuntimeHandle;
use weft_core::error::PluginError;
use weft_core::event_context::EventContext;
use weft_core::pipeline::PipelineStep;
use weft_core::plugin::{Executor, ExecutorOutput, Plugin};

/// Output format of `get_current_time`.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct TimePlugin {
    clock: Clock,
}

impl TimePlugin {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Utc::now),
        }
    }

    /// Use `clock` instead of the system clock.
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self {
            clock: Arc::new(clock),
        }
    }
}

impl Default for TimePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for TimePlugin {
    fn id(&self) -> &str {
        "time"
    }

    fn name(&self) -> &str {
        "Time"
    }

    fn description(&self) -> &str {
        "Answers questions about the current date and time"
    }

    fn executors(&self) -> Vec<Arc<dyn Executor>> {
        vec![Arc::new(CurrentTime {
            clock: self.clock.clone(),
        })]
    }
}

struct CurrentTime {
    clock: Clock,
}

#[async_trait]
impl Executor for CurrentTime {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Returns the current UTC date and time as text"
    }

    async fn execute(
        &self,
        _step: &PipelineStep,
        _event: &EventContext,
        _runtime: &RuntimeHandle,
    ) -> Result<ExecutorOutput, PluginError> {
        let now = (self.clock)();
        Ok(ExecutorOutput::ok(now.format(TIME_FORMAT).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{handle, user_event};
    use chrono::TimeZone;

    #[tokio::test]
    async fn formats_injected_clock() {
        let plugin = TimePlugin::with_clock(|| Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap());
        let executor = plugin.executor("get_current_time").unwrap();

        let output = executor
            .execute(
                &PipelineStep::new("time", "get_current_time"),
                &user_event("what time is it?"),
                &handle(),
            )
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.data, Some(serde_json::json!("2024-03-09 14:05:00 UTC")));
    }

    #[test]
    fn exposes_single_executor() {
        let plugin = TimePlugin::new();
        assert_eq!(plugin.id(), "time");
        assert!(plugin.required_capabilities().is_empty());
        assert!(plugin.executor("get_current_time").is_some());
        assert!(plugin.executor("set_time").is_none());
    }
}
