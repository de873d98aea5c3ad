use std::ops::ControlFlow;
use std::sync::Arc;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::container::{Container, parse_env};
use crate::error::ResultOkLogExt;
use crate::runtime::{Action, Cursor, Event, EventStream, Runtime};
use crate::store::Store;

use super::backoff::Backoff;

/// Applies the runtime's lifecycle events to the store until cancelled.
pub(crate) struct EventConsumer<R> {
    runtime: Arc<R>,
    store: Arc<Store>,
    cursor: Cursor,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl<R: Runtime> EventConsumer<R> {
    pub(crate) fn new(
        runtime: Arc<R>,
        store: Arc<Store>,
        cursor: Cursor,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            store,
            cursor,
            backoff,
            cancel,
        }
    }

    /// Subscribes, consumes and resubscribes from the latest cursor whenever
    /// the subscription fails or ends.
    pub(crate) async fn run(mut self) {
        let cancel = self.cancel.clone();
        loop {
            let subscription = tokio::select! {
                _ = cancel.cancelled() => break,
                subscription = self.runtime.subscribe_events(self.cursor) => subscription,
            };

            match subscription {
                Ok(events) => {
                    if self.consume(events).await.is_break() {
                        break;
                    }
                }
                Err(err) => log::error!(
                    "failed to subscribe to container events: cursor={}, error={}",
                    self.cursor,
                    err
                ),
            }

            let delay = self.backoff.next_delay();
            log::debug!("Resubscribing in {:?}: cursor={}", delay, self.cursor);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        log::debug!("Event consumer stopped");
    }

    /// Drains one subscription. Breaks on cancellation, continues when the
    /// subscription has to be re-established.
    async fn consume(&mut self, mut events: EventStream<R::Error>) -> ControlFlow<()> {
        let cancel = self.cancel.clone();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return ControlFlow::Break(()),
                next = events.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    self.backoff.reset();
                    tokio::select! {
                        _ = cancel.cancelled() => return ControlFlow::Break(()),
                        _ = self.apply(event) => {}
                    }
                }
                Some(Err(err)) => {
                    log::error!(
                        "Error watching for container events: cursor={}, error={}",
                        self.cursor,
                        err
                    );
                    return ControlFlow::Continue(());
                }
                None => {
                    log::warn!("Container event stream closed: cursor={}", self.cursor);
                    return ControlFlow::Continue(());
                }
            }
        }
    }

    /// Applies a single event and advances the cursor.
    ///
    /// Events older than the cursor are replays of already applied events and
    /// are dropped. Events at the cursor are applied again; both transitions
    /// are idempotent.
    pub(crate) async fn apply(&mut self, event: Event) {
        if event.time < self.cursor {
            log::trace!(
                "Skipping replayed event: action={}, id={}, time={}",
                event.action,
                event.actor_id,
                event.time
            );
            return;
        }
        self.cursor = event.time;
        log::debug!(
            "Got a new container event: action={}, id={}, time={}",
            event.action,
            event.actor_id,
            event.time
        );

        match event.action {
            Action::Create | Action::Update => {
                let container = self.build_container(event).await;
                self.store.upsert(container);
            }
            Action::Die | Action::Kill => {
                let name = event
                    .attributes
                    .get("name")
                    .map(String::as_str)
                    .unwrap_or_default();
                self.store.tombstone(&event.actor_id, name, Instant::now());
            }
            Action::Other(action) => {
                log::trace!("Ignoring container event: action={action}");
            }
        }
    }

    /// Builds a record from the event attributes, filling in what they lack
    /// from an inspect call.
    async fn build_container(&self, event: Event) -> Container {
        let Event {
            actor_id,
            mut attributes,
            ..
        } = event;
        let name = attributes.remove("name").filter(|name| !name.is_empty());
        let image = attributes.remove("image").filter(|image| !image.is_empty());

        let inspection = self.runtime.inspect(&actor_id).await.ok_log(
            log::Level::Warn,
            &format!("failed to inspect container `{actor_id}`"),
        );
        let (env, inspected_name, inspected_image) = match inspection {
            Some(inspection) => (parse_env(&inspection.env), inspection.name, inspection.image),
            None => Default::default(),
        };

        Container::new(
            actor_id,
            name.or(inspected_name).unwrap_or_default(),
            image.or(inspected_image).unwrap_or_default(),
            attributes,
            env,
        )
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> Cursor {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::watcher::backoff::BackoffConfig;
    use crate::watcher::testing::FakeRuntime;

    fn consumer(runtime: FakeRuntime, cursor: Cursor) -> (EventConsumer<FakeRuntime>, Arc<Store>) {
        let store = Arc::new(Store::new());
        let consumer = EventConsumer::new(
            Arc::new(runtime),
            Arc::clone(&store),
            cursor,
            Backoff::new(BackoffConfig::default()),
            CancellationToken::new(),
        );
        (consumer, store)
    }

    fn event(action: &str, id: &str, attributes: &[(&str, &str)], secs: i64) -> Event {
        Event {
            action: Action::from(action),
            actor_id: id.to_owned(),
            attributes: attributes
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            time: Cursor::from_secs(secs),
        }
    }

    #[tokio::test]
    async fn create_uses_attributes_labels_and_inspected_env() {
        let runtime = FakeRuntime::default().with_env("c1", &["A=1", "junk"]);
        let (mut consumer, store) = consumer(runtime, Cursor::from_secs(0));

        consumer
            .apply(event(
                "create",
                "c1",
                &[("name", "web1"), ("image", "nginx"), ("team", "core")],
                1,
            ))
            .await;

        let container = store.get("web1").unwrap();
        assert_eq!(container.id(), "c1");
        assert_eq!(container.image(), "nginx");
        assert_eq!(
            container.labels(),
            &HashMap::from([("team".to_owned(), "core".to_owned())])
        );
        assert_eq!(container.env().len(), 1);
        assert_eq!(container.env()["A"], "1");
        assert_eq!(consumer.cursor(), Cursor::from_secs(1));
    }

    #[tokio::test]
    async fn inspect_failure_registers_with_empty_env() {
        let runtime = FakeRuntime::default();
        let (mut consumer, store) = consumer(runtime, Cursor::from_secs(0));

        consumer
            .apply(event("create", "c1", &[("name", "web1"), ("image", "nginx")], 1))
            .await;

        let container = store.get("c1").unwrap();
        assert!(container.env().is_empty());
        assert_eq!(container.name(), "web1");
    }

    #[tokio::test]
    async fn missing_attributes_fall_back_to_inspection() {
        let runtime = FakeRuntime::default().with_inspection(
            "c1",
            crate::runtime::Inspection {
                env: vec![],
                name: Some("web1".to_owned()),
                image: Some("nginx:1.27".to_owned()),
            },
        );
        let (mut consumer, store) = consumer(runtime, Cursor::from_secs(0));

        consumer.apply(event("update", "c1", &[], 1)).await;

        let container = store.get("web1").unwrap();
        assert_eq!(container.image(), "nginx:1.27");
    }

    #[tokio::test(start_paused = true)]
    async fn die_and_kill_tombstone_without_removing() {
        let (mut consumer, store) = consumer(FakeRuntime::default(), Cursor::from_secs(0));
        consumer
            .apply(event("create", "c1", &[("name", "web1"), ("image", "nginx")], 1))
            .await;
        consumer.apply(event("die", "c1", &[("name", "web1")], 2)).await;

        assert!(store.get("c1").is_some());
        assert!(store.is_tombstoned("c1"));
        assert!(store.is_tombstoned("web1"));

        consumer
            .apply(event("create", "c2", &[("name", "web2"), ("image", "redis")], 3))
            .await;
        consumer.apply(event("kill", "c2", &[("name", "web2")], 4)).await;
        assert!(store.is_tombstoned("c2"));
    }

    #[tokio::test(start_paused = true)]
    async fn die_without_name_attribute_expires_name() {
        let (mut consumer, store) = consumer(FakeRuntime::default(), Cursor::from_secs(0));
        consumer
            .apply(event("create", "c1", &[("name", "web1"), ("image", "nginx")], 1))
            .await;
        consumer.apply(event("die", "c1", &[], 2)).await;
        assert!(store.is_tombstoned("web1"));

        store.sweep_expired(Instant::now() + Duration::from_secs(60), Duration::from_secs(20));
        assert!(store.get("c1").is_none());
        assert!(store.get("web1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn die_with_stale_name_expires_stored_name() {
        let (mut consumer, store) = consumer(FakeRuntime::default(), Cursor::from_secs(0));
        consumer
            .apply(event("create", "c1", &[("name", "web1"), ("image", "nginx")], 1))
            .await;
        consumer.apply(event("rename", "c1", &[("name", "web2")], 2)).await;
        consumer.apply(event("die", "c1", &[("name", "web2")], 3)).await;

        store.sweep_expired(Instant::now() + Duration::from_secs(60), Duration::from_secs(20));
        assert!(store.get("c1").is_none());
        assert!(store.get("web1").is_none());
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn replayed_die_keeps_original_grace_window() {
        let grace = Duration::from_secs(20);
        let (mut consumer, store) = consumer(FakeRuntime::default(), Cursor::from_secs(0));
        consumer
            .apply(event("create", "c1", &[("name", "web1"), ("image", "nginx")], 1))
            .await;
        let die = event("die", "c1", &[("name", "web1")], 2);
        let died_at = Instant::now();
        consumer.apply(die.clone()).await;

        // Reconnect replays the event at the cursor 15s later.
        tokio::time::advance(Duration::from_secs(15)).await;
        consumer.apply(die).await;

        store.sweep_expired(died_at + grace + Duration::from_secs(1), grace);
        assert!(store.get("c1").is_none());
        assert!(store.get("web1").is_none());
    }

    #[tokio::test]
    async fn other_actions_are_ignored_but_advance_cursor() {
        let (mut consumer, store) = consumer(FakeRuntime::default(), Cursor::from_secs(0));
        consumer.apply(event("start", "c1", &[("name", "web1")], 5)).await;

        assert!(store.is_empty());
        assert_eq!(consumer.cursor(), Cursor::from_secs(5));
    }

    #[tokio::test]
    async fn events_older_than_cursor_are_skipped() {
        let runtime = FakeRuntime::default();
        let (mut consumer, store) = consumer(runtime.clone(), Cursor::from_secs(10));

        consumer
            .apply(event("create", "c1", &[("name", "web1"), ("image", "nginx")], 9))
            .await;
        assert!(store.get("c1").is_none());
        assert_eq!(consumer.cursor(), Cursor::from_secs(10));
        assert_eq!(runtime.inspect_calls(), 0);
    }

    #[tokio::test]
    async fn replaying_create_is_idempotent() {
        let runtime = FakeRuntime::default().with_env("c1", &["A=1"]);
        let (mut consumer, store) = consumer(runtime, Cursor::from_secs(0));
        let create = event("create", "c1", &[("name", "web1"), ("image", "nginx")], 1);

        consumer.apply(create.clone()).await;
        let once = store.snapshot();
        consumer.apply(create).await;
        let twice = store.snapshot();

        assert_eq!(once.len(), twice.len());
        for (key, container) in &once {
            assert_eq!(twice[key], *container);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancellation_while_backing_off() {
        let runtime = FakeRuntime::default().failing_subscriptions();
        let store = Arc::new(Store::new());
        let cancel = CancellationToken::new();
        let consumer = EventConsumer::new(
            Arc::new(runtime.clone()),
            store,
            Cursor::from_secs(0),
            Backoff::new(BackoffConfig {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(4),
            }),
            cancel.clone(),
        );
        let handle = tokio::spawn(consumer.run());

        tokio::time::sleep(Duration::from_secs(10)).await;
        // Delays of 1, 2, 4, 4.. seconds, each jittered down to at most half.
        let attempts = runtime.subscribe_calls();
        assert!((4..=7).contains(&attempts), "attempts={attempts}");

        cancel.cancel();
        handle.await.unwrap();
    }
}
