//! Pipeline event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! callers can follow a run block by block without touching engine internals.

use serde::{Deserialize, Serialize};

/// Events emitted while a pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    PipelineStarted {
        run_id: String,
        block_count: usize,
        proposal_count: usize,
    },
    PipelineCompleted {
        run_id: String,
        proposal_count: usize,
        duration_ms: u64,
    },
    PipelineFailed {
        run_id: String,
        error: String,
    },
    BlockStarted {
        block_id: String,
        block_type: String,
        input_count: usize,
    },
    BlockCompleted {
        block_id: String,
        block_type: String,
        output_count: usize,
        duration_ms: u64,
    },
    BranchSelected {
        block_id: String,
        /// Index of the taken case, or `None` for the default arm.
        case: Option<usize>,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit to all current subscribers; dropped when nobody listens.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(PipelineEvent::BlockStarted {
            block_id: "filter_1".into(),
            block_type: "filter".into(),
            input_count: 4,
        });

        match rx.recv().await.unwrap() {
            PipelineEvent::BlockStarted {
                block_id,
                input_count,
                ..
            } => {
                assert_eq!(block_id, "filter_1");
                assert_eq!(input_count, 4);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_dropped() {
        let emitter = EventEmitter::default();
        emitter.emit(PipelineEvent::PipelineFailed {
            run_id: "r".into(),
            error: "boom".into(),
        });
        let mut rx = emitter.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = PipelineEvent::BranchSelected {
            block_id: "route".into(),
            case: Some(1),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "branch_selected");
        assert_eq!(json["case"], 1);
    }
}
