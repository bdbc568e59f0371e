//! Run event log.
//!
//! Every stage transition is appended here and, when a sink is attached,
//! forwarded over a channel so a front end can show stage output as soon as
//! it lands.

use crate::types::{FieldKey, FieldValue, RunId, RunStatus, StageId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEventKind {
    RunStarted,
    StageStarted {
        stage: StageId,
    },
    StageSkipped {
        stage: StageId,
    },
    StageCompleted {
        stage: StageId,
        attempts: u32,
        outputs: BTreeMap<FieldKey, FieldValue>,
    },
    StageFailed {
        stage: StageId,
        reason: String,
    },
    StageCancelled {
        stage: StageId,
    },
    RunFinished {
        status: RunStatus,
    },
}

/// A timestamped run event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEvent {
    pub run_id: RunId,
    pub at: DateTime<Utc>,
    pub kind: RunEventKind,
}

/// Append-only event log with an optional live sink
#[derive(Debug)]
pub struct EventLog {
    run_id: RunId,
    inner: Mutex<Vec<RunEvent>>,
    sink: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventLog {
    #[must_use]
    pub fn new(run_id: RunId, sink: Option<mpsc::UnboundedSender<RunEvent>>) -> Self {
        Self {
            run_id,
            inner: Mutex::new(Vec::new()),
            sink,
        }
    }

    pub fn append(&self, kind: RunEventKind) {
        let event = RunEvent {
            run_id: self.run_id,
            at: Utc::now(),
            kind,
        };
        if let Some(sink) = &self.sink {
            // A dropped receiver only means nobody is watching.
            let _ = sink.send(event.clone());
        }
        self.inner.lock().push(event);
    }

    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.inner.lock().clone()
    }

    #[must_use]
    pub fn into_events(self) -> Vec<RunEvent> {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_records_in_order() {
        let log = EventLog::new(RunId::new(), None);
        log.append(RunEventKind::RunStarted);
        log.append(RunEventKind::StageStarted { stage: "a".into() });
        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, RunEventKind::RunStarted);
    }

    #[tokio::test]
    async fn sink_receives_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let log = EventLog::new(RunId::new(), Some(tx));
        log.append(RunEventKind::StageSkipped { stage: "video".into() });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, RunEventKind::StageSkipped { stage: "video".into() });
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let log = EventLog::new(RunId::new(), Some(tx));
        log.append(RunEventKind::RunStarted);
        assert_eq!(log.into_events().len(), 1);
    }
}
