//! services/bot/src/bot/dispatcher.rs
//!
//! The single inbound event stream of the process.
//!
//! Events are fanned out to one sequential worker per user, so different users are
//! handled concurrently while one user's events are applied strictly in arrival order.
//! Grouped photos take a detour through the media aggregator and come back in as one
//! consolidated event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::bot::media_group::MediaGroupAggregator;
use crate::bot::protocol::InboundEvent;

/// Whatever consumes events once they have been ordered per user.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent);
}

/// Cheap, cloneable entry point into the event stream.
#[derive(Clone)]
pub struct Dispatcher {
    ingress: mpsc::UnboundedSender<InboundEvent>,
}

impl Dispatcher {
    /// Starts the routing task. It runs until `shutdown` is cancelled or every
    /// `Dispatcher` clone has been dropped, and completes only after every user
    /// worker has finished the events it already holds.
    pub fn spawn(
        handler: Arc<dyn EventHandler>,
        media_group_window: Duration,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (ingress, rx) = mpsc::unbounded_channel();
        let aggregator = MediaGroupAggregator::new(media_group_window, ingress.clone());
        let task = tokio::spawn(route(rx, handler, aggregator, shutdown));
        (Self { ingress }, task)
    }

    /// Enqueues an event. Returns `false` once the dispatcher has stopped.
    pub fn submit(&self, event: InboundEvent) -> bool {
        self.ingress.send(event).is_ok()
    }
}

async fn route(
    mut rx: mpsc::UnboundedReceiver<InboundEvent>,
    handler: Arc<dyn EventHandler>,
    aggregator: MediaGroupAggregator,
    shutdown: CancellationToken,
) {
    let mut queues: HashMap<i64, mpsc::UnboundedSender<InboundEvent>> = HashMap::new();
    let workers = TaskTracker::new();

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if event.media_group_id().is_some() {
            aggregator.push(event);
            continue;
        }

        let user_id = event.sender.tg_id;
        let event = match queues.get(&user_id) {
            Some(queue) => match queue.send(event) {
                Ok(()) => continue,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        debug!("Starting event worker for user {}.", user_id);
        let queue = spawn_user_worker(&workers, user_id, handler.clone());
        if queue.send(event).is_err() {
            warn!("Event worker for user {} exited immediately.", user_id);
        }
        queues.insert(user_id, queue);
    }

    info!(
        "Event dispatcher stopped; draining {} conversations.",
        queues.len()
    );
    // Closed queues end each worker once its backlog is handled.
    drop(queues);
    workers.close();
    workers.wait().await;
    info!("Event workers drained.");
}

fn spawn_user_worker(
    workers: &TaskTracker,
    user_id: i64,
    handler: Arc<dyn EventHandler>,
) -> mpsc::UnboundedSender<InboundEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();
    workers.spawn(async move {
        while let Some(event) = rx.recv().await {
            handler.handle(event).await;
        }
        debug!("Event worker for user {} finished.", user_id);
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::protocol::{EventKind, Sender};
    use review_bot_core::PhotoRef;
    use std::sync::Mutex;

    /// Records events per user and sleeps longer for early events, so any
    /// reordering or overlap within one user would show up.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(i64, String)>>,
        in_flight: Mutex<HashMap<i64, bool>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: InboundEvent) {
            let user = event.sender.tg_id;
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                assert!(!in_flight.get(&user).copied().unwrap_or(false), "overlap for {}", user);
                in_flight.insert(user, true);
            }
            let label = match &event.kind {
                EventKind::Text(t) => t.clone(),
                EventKind::PhotoGroup { photos, .. } => photos
                    .iter()
                    .map(PhotoRef::file_id)
                    .collect::<Vec<_>>()
                    .join("+"),
                other => format!("{:?}", other),
            };
            let delay = 50u64.saturating_sub(label.len() as u64 * 10);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.seen.lock().unwrap().push((user, label));
            self.in_flight.lock().unwrap().insert(user, false);
        }
    }

    fn event(user: i64, kind: EventKind) -> InboundEvent {
        InboundEvent {
            sender: Sender {
                tg_id: user,
                first_name: None,
                last_name: None,
            },
            chat_id: user,
            kind,
        }
    }

    fn labels_for(recorder: &Recorder, user: i64) -> Vec<String> {
        recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, l)| l.clone())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn per_user_order_is_preserved() {
        let recorder = Arc::new(Recorder::default());
        let (dispatcher, _task) = Dispatcher::spawn(
            recorder.clone(),
            Duration::from_millis(100),
            CancellationToken::new(),
        );

        for i in 0..5 {
            assert!(dispatcher.submit(event(1, EventKind::Text(format!("u1-{}", i)))));
            assert!(dispatcher.submit(event(2, EventKind::Text(format!("u2-{}", i)))));
        }
        tokio::time::sleep(Duration::from_secs(5)).await;

        let expected = |u: i64| (0..5).map(|i| format!("u{}-{}", u, i)).collect::<Vec<_>>();
        assert_eq!(labels_for(&recorder, 1), expected(1));
        assert_eq!(labels_for(&recorder, 2), expected(2));
    }

    #[tokio::test(start_paused = true)]
    async fn grouped_photos_arrive_as_one_event() {
        let recorder = Arc::new(Recorder::default());
        let (dispatcher, _task) = Dispatcher::spawn(
            recorder.clone(),
            Duration::from_millis(1000),
            CancellationToken::new(),
        );

        dispatcher.submit(event(1, EventKind::Text("before".into())));
        for id in ["a", "b", "c"] {
            dispatcher.submit(event(
                1,
                EventKind::Photo {
                    photo: PhotoRef::new(id),
                    caption: None,
                    media_group_id: Some("album-1".into()),
                },
            ));
        }
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(labels_for(&recorder, 1), vec!["before", "a+b+c"]);
    }

    #[tokio::test]
    async fn submit_fails_after_shutdown() {
        let recorder = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();
        let (dispatcher, task) =
            Dispatcher::spawn(recorder, Duration::from_millis(10), shutdown.clone());

        shutdown.cancel();
        task.await.unwrap();
        assert!(!dispatcher.submit(event(1, EventKind::Text("late".into()))));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_events_in_flight() {
        let recorder = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();
        let (dispatcher, task) =
            Dispatcher::spawn(recorder.clone(), Duration::from_millis(10), shutdown.clone());

        // "a" keeps its worker busy for 40ms; "b" waits in the queue behind it.
        dispatcher.submit(event(1, EventKind::Text("a".into())));
        dispatcher.submit(event(1, EventKind::Text("b".into())));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(labels_for(&recorder, 1).is_empty());

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(labels_for(&recorder, 1), vec!["a", "b"]);
    }
}
