use crate::types::Document;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// Structured run events — the observable trace of every execution.
///
/// A completed run emits exactly one `StateEntered`/`StateExited` pair
/// per visited state and a single trailing `RunCompleted`; every error
/// path emits one `ErrorRaised` carrying the taxonomy kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RuntimeEvent {
    StateEntered {
        execution_id: Uuid,
        state_name: String,
        input: Document,
    },
    StateExited {
        execution_id: Uuid,
        state_name: String,
        output: Document,
        duration_seconds: f64,
    },
    RunCompleted {
        execution_id: Uuid,
        final_output: Document,
        total_duration_seconds: f64,
    },
    ErrorRaised {
        execution_id: Uuid,
        state_name: String,
        kind: String,
        message: String,
    },
}

/// Pluggable sink for runtime events. The driver emits; sinks deliver.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RuntimeEvent);
}

impl std::fmt::Debug for dyn EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<EventSink>")
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &RuntimeEvent) {
        match event {
            RuntimeEvent::StateEntered {
                execution_id,
                state_name,
                ..
            } => {
                tracing::info!(%execution_id, state = %state_name, "entering state");
            }
            RuntimeEvent::StateExited {
                execution_id,
                state_name,
                duration_seconds,
                ..
            } => {
                tracing::info!(%execution_id, state = %state_name, duration_seconds, "exiting state");
            }
            RuntimeEvent::RunCompleted {
                execution_id,
                total_duration_seconds,
                ..
            } => {
                tracing::info!(%execution_id, total_duration_seconds, "execution completed");
            }
            RuntimeEvent::ErrorRaised {
                execution_id,
                state_name,
                kind,
                message,
            } => {
                tracing::error!(%execution_id, state = %state_name, kind = %kind, "{message}");
            }
        }
    }
}

/// Buffers events in memory. The test-side sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RuntimeEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far, in emission order.
    pub fn snapshot(&self) -> Vec<RuntimeEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Take everything emitted so far, leaving the buffer empty.
    pub fn drain(&self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &RuntimeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_sink_preserves_emission_order() {
        let sink = MemorySink::new();
        let execution_id = Uuid::new_v4();
        sink.emit(&RuntimeEvent::StateEntered {
            execution_id,
            state_name: "a".into(),
            input: json!({"n": 0}),
        });
        sink.emit(&RuntimeEvent::StateExited {
            execution_id,
            state_name: "a".into(),
            output: json!({"n": 1}),
            duration_seconds: 0.01,
        });

        let events = sink.snapshot();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], RuntimeEvent::StateEntered { state_name, .. } if state_name == "a"));
        assert!(matches!(&events[1], RuntimeEvent::StateExited { state_name, .. } if state_name == "a"));

        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert!(sink.snapshot().is_empty());
    }
}
