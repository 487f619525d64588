use std::collections::VecDeque;

use futures::Stream;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::event::JobEvent;
use crate::services::job_store::JobStore;

type AbandonHook = Box<dyn FnOnce() + Send>;

/// Ordered, finite sequence of a job's events.
///
/// Replays the transition log after the requested sequence number, then
/// follows live events. Ends after the terminal `state_changed` event, when
/// the job is purged, or once the backlog of an already finished job is
/// drained. Dropping the stream disconnects the subscriber.
pub struct EventStream {
    store: JobStore,
    job_id: Uuid,
    last_seq: u64,
    backlog: VecDeque<JobEvent>,
    live: broadcast::Receiver<JobEvent>,
    /// The job was already terminal at subscribe time; nothing live will follow.
    job_terminal: bool,
    finished: bool,
    on_abandon: Option<AbandonHook>,
}

impl EventStream {
    pub(crate) fn new(
        store: JobStore,
        job_id: Uuid,
        after_seq: u64,
        backlog: VecDeque<JobEvent>,
        live: broadcast::Receiver<JobEvent>,
        job_terminal: bool,
    ) -> Self {
        Self {
            store,
            job_id,
            last_seq: after_seq,
            backlog,
            live,
            job_terminal,
            finished: false,
            on_abandon: None,
        }
    }

    /// Run `hook` if the stream is dropped before the job reaches a terminal state.
    pub fn on_abandon(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        if !self.job_terminal {
            self.on_abandon = Some(Box::new(hook));
        }
        self
    }

    /// Next event, or `None` once the sequence is over.
    pub async fn next(&mut self) -> Option<JobEvent> {
        while !self.finished {
            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None if self.job_terminal => {
                    self.finished = true;
                    break;
                }
                None => match self.live.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(
                            job_id = %self.job_id,
                            skipped,
                            "Event subscriber lagged, replaying from log"
                        );
                        match self.store.events_since(self.job_id, self.last_seq) {
                            Ok(events) => self.backlog.extend(events),
                            Err(_) => self.finished = true,
                        }
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.finished = true;
                        break;
                    }
                },
            };

            if event.seq <= self.last_seq {
                continue;
            }
            self.last_seq = event.seq;
            if event.is_terminal() {
                self.finished = true;
                self.on_abandon = None;
            }
            return Some(event);
        }
        None
    }

    pub fn into_stream(self) -> impl Stream<Item = JobEvent> + Send {
        futures::stream::unfold(self, |mut events| async move {
            events.next().await.map(|event| (event, events))
        })
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(hook) = self.on_abandon.take() {
            hook();
        }
    }
}
