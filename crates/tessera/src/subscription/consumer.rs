use crate::{
    config::{EdenPolicy, HttpEventSourceConfig, SubscriptionConfig},
    domain_event::DomainEvent,
    mapper::{EventPayloadMapper, MapperError},
    reporter::{Reporters, SubscriptionReporter},
    scheduler::{Job, JobError, Scheduler},
    store::PersistenceError,
    subscription::{
        feed::{FeedClient, FeedError, FeedPosition, FeedQuery},
        handler::{HandlerError, SubscriptionHandler},
        offset::{OffsetState, OffsetStore},
    },
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("no event mapping registered for {event_type}")]
    UnknownEventType { event_type: String },
}

#[derive(Debug, thiserror::Error)]
enum TickError {
    #[error(transparent)]
    Offsets(#[from] PersistenceError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Decode(#[from] MapperError),
    #[error("handler for {event_type} failed at offset {offset}: {cause}")]
    Handler {
        event_type: String,
        offset: u64,
        cause: HandlerError,
    },
}

/// Consumes a remote bounded context's event feed by polling it page by page,
/// dispatching decoded events to registered handlers and tracking one offset
/// per subscription.
pub struct EventSourceConsumer<E: DomainEvent, F: FeedClient, O: OffsetStore> {
    feed: Arc<F>,
    offsets: Arc<O>,
    mapper: Arc<EventPayloadMapper<E>>,
    config: HttpEventSourceConfig,
    scheduler: Scheduler,
    reporters: Arc<Reporters<dyn SubscriptionReporter>>,
}

impl<E: DomainEvent, F: FeedClient, O: OffsetStore> EventSourceConsumer<E, F, O> {
    pub fn new(
        feed: Arc<F>,
        offsets: Arc<O>,
        mapper: Arc<EventPayloadMapper<E>>,
        config: HttpEventSourceConfig,
    ) -> Self {
        Self {
            feed,
            offsets,
            mapper,
            config,
            scheduler: Scheduler::new(),
            reporters: Arc::new(Reporters::new()),
        }
    }

    pub fn register_reporter(&self, reporter: Arc<dyn SubscriptionReporter>) {
        self.reporters.register(reporter);
    }

    /// Registers handlers keyed by event type and schedules the subscription.
    ///
    /// Every event type must be known to the mapper; the feed query's tags
    /// are resolved from the registrations. A disabled subscription logs and
    /// registers nothing. For `FromNow` the starting timestamp is captured
    /// here, once, not per request.
    pub fn subscribe(
        &self,
        handlers: HashMap<String, Arc<dyn SubscriptionHandler<E>>>,
        subscription: SubscriptionConfig,
    ) -> Result<Option<JoinHandle<()>>, SubscribeError> {
        let mut tags: Vec<String> = Vec::new();
        for event_type in handlers.keys() {
            let tag = self
                .mapper
                .tag_for(event_type)
                .ok_or_else(|| SubscribeError::UnknownEventType {
                    event_type: event_type.clone(),
                })?;
            if !tags.iter().any(|known| known == tag) {
                tags.push(tag.to_string());
            }
        }
        tags.sort();

        if !self.config.enabled(&subscription.name) {
            info!(subscription = %subscription.name, "subscription disabled; not scheduling");
            return Ok(None);
        }

        let eden_start = match subscription.eden_policy {
            EdenPolicy::BeginningOfTime => FeedPosition::AfterOffset(-1),
            EdenPolicy::FromNow => FeedPosition::AfterTimestamp(Utc::now()),
        };

        let job = Arc::new(SubscriptionJob {
            name: subscription.name.clone(),
            tags,
            eden_start,
            batch_size: self.config.batch_size_for(&subscription.name),
            feed: self.feed.clone(),
            offsets: self.offsets.clone(),
            mapper: self.mapper.clone(),
            handlers,
            reporters: self.reporters.clone(),
        });

        let handle = self.scheduler.schedule_many_times(
            self.config.repeat_schedule_for(&subscription.name),
            self.config.timeout_for(&subscription.name),
            job,
        );
        Ok(Some(handle))
    }
}

struct SubscriptionJob<E: DomainEvent, F: FeedClient, O: OffsetStore> {
    name: String,
    tags: Vec<String>,
    eden_start: FeedPosition,
    batch_size: u32,
    feed: Arc<F>,
    offsets: Arc<O>,
    mapper: Arc<EventPayloadMapper<E>>,
    handlers: HashMap<String, Arc<dyn SubscriptionHandler<E>>>,
    reporters: Arc<Reporters<dyn SubscriptionReporter>>,
}

#[async_trait]
impl<E: DomainEvent, F: FeedClient, O: OffsetStore> Job for SubscriptionJob<E, F, O> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> Result<bool, JobError> {
        self.tick().await.map_err(JobError::failed)
    }
}

impl<E: DomainEvent, F: FeedClient, O: OffsetStore> SubscriptionJob<E, F, O> {
    async fn tick(&self) -> Result<bool, TickError> {
        let position = match self.offsets.get_offset(&self.name).await? {
            OffsetState::LastProcessed(offset) => FeedPosition::AfterOffset(offset as i64),
            OffsetState::NoOffset => self.eden_start.clone(),
        };
        let query = FeedQuery {
            tags: self.tags.clone(),
            position,
            batch_size: self.batch_size,
        };

        let page = self.feed.fetch(&query).await?;
        self.reporters.notify(|r| r.page_fetched(&self.name, page.events.len()));

        if page.events.is_empty() {
            // Advance past events the query skipped so the next request does
            // not re-scan them.
            let derived = page.query_max_offset.max(page.global_max_offset);
            if self.batch_size > 0 && derived > -1 {
                self.save_offset(derived as u64).await?;
            }
            return Ok(false);
        }

        for event in &page.events {
            match self.handlers.get(&event.event_type) {
                Some(handler) => {
                    let decoded = self.mapper.deserialize_current(&event.event_type, event.payload.clone())?;
                    if let Err(cause) = handler.handle(decoded).await {
                        let error = cause.to_string();
                        self.reporters
                            .notify(|r| r.handler_failed(&self.name, &event.event_type, event.offset, &error));
                        return Err(TickError::Handler {
                            event_type: event.event_type.clone(),
                            offset: event.offset,
                            cause,
                        });
                    }
                    self.reporters
                        .notify(|r| r.event_handled(&self.name, &event.event_type, event.offset));
                }
                None => {
                    debug!(
                        subscription = %self.name,
                        event_type = %event.event_type,
                        offset = event.offset,
                        "no handler registered; skipping"
                    );
                    self.reporters
                        .notify(|r| r.event_skipped(&self.name, &event.event_type, event.offset));
                }
            }
            self.save_offset(event.offset).await?;
        }

        Ok(self.batch_size > 0 && !page.events.is_empty() && page.page_end_offset < page.query_max_offset)
    }

    async fn save_offset(&self, offset: u64) -> Result<(), TickError> {
        self.offsets.save_offset(&self.name, offset).await?;
        self.reporters.notify(|r| r.offset_saved(&self.name, offset));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mapper::{EventMapping, MapperBuilder},
        mem_store::MemoryOffsetStore,
        message::Message,
        subscription::feed::{FeedEvent, FeedPage},
    };
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum RemoteEvent {
        UserRegistered { username: String },
        UserLocked,
    }

    impl Message for RemoteEvent {
        fn name(&self) -> &'static str {
            match self {
                RemoteEvent::UserRegistered { .. } => "UserRegistered",
                RemoteEvent::UserLocked => "UserLocked",
            }
        }
    }

    impl DomainEvent for RemoteEvent {
        fn event_type(&self) -> &'static str {
            match self {
                RemoteEvent::UserRegistered { .. } => "user.registered",
                RemoteEvent::UserLocked => "user.locked",
            }
        }
    }

    fn remote_mapper() -> EventPayloadMapper<RemoteEvent> {
        MapperBuilder::new()
            .event(EventMapping::via_serde("user.registered").with_tag("user"))
            .event(EventMapping::via_serde("user.locked").with_tag("user"))
            .build()
    }

    struct ScriptedFeed {
        pages: Mutex<VecDeque<FeedPage>>,
        queries: Mutex<Vec<FeedQuery>>,
    }

    impl ScriptedFeed {
        fn new(pages: Vec<FeedPage>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn recorded_queries(&self) -> Vec<FeedQuery> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FeedClient for ScriptedFeed {
        async fn fetch(&self, query: &FeedQuery) -> Result<FeedPage, FeedError> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(self.pages.lock().unwrap().pop_front().unwrap_or(FeedPage {
                events: Vec::new(),
                query_max_offset: -1,
                global_max_offset: -1,
                page_start_offset: -1,
                page_end_offset: -1,
            }))
        }
    }

    fn feed_event(offset: u64, event_type: &str, payload: serde_json::Value) -> FeedEvent {
        FeedEvent {
            id: format!("evt-{offset}"),
            aggregate_id: "agg-1".to_string(),
            causation_id: "cause-1".to_string(),
            correlation_id: None,
            sequence_number: offset,
            offset,
            event_type: event_type.to_string(),
            payload,
        }
    }

    fn registered_payload(username: &str) -> serde_json::Value {
        json!({ "UserRegistered": { "username": username } })
    }

    type Handled = Arc<Mutex<Vec<RemoteEvent>>>;

    fn collecting_handler(handled: Handled) -> Arc<dyn SubscriptionHandler<RemoteEvent>> {
        Arc::new(move |event: RemoteEvent| {
            let handled = handled.clone();
            async move {
                handled.lock().unwrap().push(event);
                Ok::<(), HandlerError>(())
            }
        })
    }

    fn job(
        feed: Arc<ScriptedFeed>,
        offsets: Arc<MemoryOffsetStore>,
        eden_start: FeedPosition,
        handlers: HashMap<String, Arc<dyn SubscriptionHandler<RemoteEvent>>>,
    ) -> SubscriptionJob<RemoteEvent, ScriptedFeed, MemoryOffsetStore> {
        SubscriptionJob {
            name: "projections".to_string(),
            tags: vec!["user".to_string()],
            eden_start,
            batch_size: 10,
            feed,
            offsets,
            mapper: Arc::new(remote_mapper()),
            handlers,
            reporters: Arc::new(Reporters::new()),
        }
    }

    fn handlers_for(handled: &Handled) -> HashMap<String, Arc<dyn SubscriptionHandler<RemoteEvent>>> {
        let mut handlers: HashMap<String, Arc<dyn SubscriptionHandler<RemoteEvent>>> = HashMap::new();
        handlers.insert("user.registered".to_string(), collecting_handler(handled.clone()));
        handlers
    }

    #[tokio::test]
    async fn the_first_query_follows_the_eden_policy() {
        let feed = Arc::new(ScriptedFeed::new(vec![]));
        let offsets = Arc::new(MemoryOffsetStore::new());
        let handled: Handled = Arc::new(Mutex::new(Vec::new()));
        let job = job(feed.clone(), offsets, FeedPosition::AfterOffset(-1), handlers_for(&handled));

        job.tick().await.unwrap();

        let queries = feed.recorded_queries();
        assert_eq!(queries[0].position, FeedPosition::AfterOffset(-1));
        assert_eq!(queries[0].tags, vec!["user".to_string()]);
        assert_eq!(queries[0].batch_size, 10);
    }

    #[tokio::test]
    async fn saved_offsets_replace_the_eden_position() {
        let feed = Arc::new(ScriptedFeed::new(vec![]));
        let offsets = Arc::new(MemoryOffsetStore::new());
        offsets.save_offset("projections", 17).await.unwrap();
        let handled: Handled = Arc::new(Mutex::new(Vec::new()));
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let job = job(
            feed.clone(),
            offsets,
            FeedPosition::AfterTimestamp(start),
            handlers_for(&handled),
        );

        job.tick().await.unwrap();

        assert_eq!(feed.recorded_queries()[0].position, FeedPosition::AfterOffset(17));
    }

    #[tokio::test]
    async fn from_now_queries_by_timestamp_until_an_offset_exists() {
        let feed = Arc::new(ScriptedFeed::new(vec![]));
        let offsets = Arc::new(MemoryOffsetStore::new());
        let handled: Handled = Arc::new(Mutex::new(Vec::new()));
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let job = job(
            feed.clone(),
            offsets,
            FeedPosition::AfterTimestamp(start),
            handlers_for(&handled),
        );

        job.tick().await.unwrap();

        assert_eq!(
            feed.recorded_queries()[0].position,
            FeedPosition::AfterTimestamp(start)
        );
    }

    #[tokio::test]
    async fn events_are_dispatched_in_order_and_the_offset_follows_each_one() {
        let page = FeedPage {
            events: vec![
                feed_event(3, "user.registered", registered_payload("ada")),
                feed_event(4, "user.registered", registered_payload("grace")),
            ],
            query_max_offset: 9,
            global_max_offset: 9,
            page_start_offset: 3,
            page_end_offset: 4,
        };
        let feed = Arc::new(ScriptedFeed::new(vec![page]));
        let offsets = Arc::new(MemoryOffsetStore::new());
        let handled: Handled = Arc::new(Mutex::new(Vec::new()));
        let job = job(
            feed,
            offsets.clone(),
            FeedPosition::AfterOffset(-1),
            handlers_for(&handled),
        );

        let backlog = job.tick().await.unwrap();

        assert!(backlog, "page end 4 is behind query max 9");
        assert_eq!(
            *handled.lock().unwrap(),
            vec![
                RemoteEvent::UserRegistered {
                    username: "ada".to_string()
                },
                RemoteEvent::UserRegistered {
                    username: "grace".to_string()
                },
            ]
        );
        assert_eq!(
            offsets.get_offset("projections").await.unwrap(),
            OffsetState::LastProcessed(4)
        );
    }

    #[tokio::test]
    async fn events_without_a_handler_are_skipped_but_advance_the_offset() {
        let page = FeedPage {
            events: vec![feed_event(5, "user.locked", json!("UserLocked"))],
            query_max_offset: 5,
            global_max_offset: 5,
            page_start_offset: 5,
            page_end_offset: 5,
        };
        let feed = Arc::new(ScriptedFeed::new(vec![page]));
        let offsets = Arc::new(MemoryOffsetStore::new());
        let handled: Handled = Arc::new(Mutex::new(Vec::new()));
        let job = job(
            feed,
            offsets.clone(),
            FeedPosition::AfterOffset(-1),
            handlers_for(&handled),
        );

        let backlog = job.tick().await.unwrap();

        assert!(!backlog);
        assert!(handled.lock().unwrap().is_empty());
        assert_eq!(
            offsets.get_offset("projections").await.unwrap(),
            OffsetState::LastProcessed(5)
        );
    }

    #[tokio::test]
    async fn a_failing_handler_stops_the_tick_and_keeps_the_offset() {
        let page = FeedPage {
            events: vec![
                feed_event(3, "user.registered", registered_payload("ada")),
                feed_event(4, "user.registered", registered_payload("grace")),
            ],
            query_max_offset: 4,
            global_max_offset: 4,
            page_start_offset: 3,
            page_end_offset: 4,
        };
        let feed = Arc::new(ScriptedFeed::new(vec![page]));
        let offsets = Arc::new(MemoryOffsetStore::new());
        offsets.save_offset("projections", 2).await.unwrap();

        let mut handlers: HashMap<String, Arc<dyn SubscriptionHandler<RemoteEvent>>> = HashMap::new();
        handlers.insert(
            "user.registered".to_string(),
            Arc::new(|_event: RemoteEvent| async { Err::<(), HandlerError>("projection down".into()) }),
        );
        let job = job(feed, offsets.clone(), FeedPosition::AfterOffset(-1), handlers);

        let result = job.tick().await;

        assert!(result.is_err());
        assert_eq!(
            offsets.get_offset("projections").await.unwrap(),
            OffsetState::LastProcessed(2)
        );
    }

    #[tokio::test]
    async fn an_undecodable_payload_stops_the_tick_and_keeps_the_offset() {
        let page = FeedPage {
            events: vec![feed_event(3, "user.registered", json!({ "unexpected": true }))],
            query_max_offset: 3,
            global_max_offset: 3,
            page_start_offset: 3,
            page_end_offset: 3,
        };
        let feed = Arc::new(ScriptedFeed::new(vec![page]));
        let offsets = Arc::new(MemoryOffsetStore::new());
        let handled: Handled = Arc::new(Mutex::new(Vec::new()));
        let job = job(
            feed,
            offsets.clone(),
            FeedPosition::AfterOffset(-1),
            handlers_for(&handled),
        );

        assert!(job.tick().await.is_err());
        assert_eq!(offsets.get_offset("projections").await.unwrap(), OffsetState::NoOffset);
    }

    #[tokio::test]
    async fn empty_pages_advance_to_the_derived_offset() {
        let page = FeedPage {
            events: Vec::new(),
            query_max_offset: 7,
            global_max_offset: 5,
            page_start_offset: -1,
            page_end_offset: -1,
        };
        let feed = Arc::new(ScriptedFeed::new(vec![page]));
        let offsets = Arc::new(MemoryOffsetStore::new());
        let handled: Handled = Arc::new(Mutex::new(Vec::new()));
        let job = job(
            feed,
            offsets.clone(),
            FeedPosition::AfterOffset(-1),
            handlers_for(&handled),
        );

        let backlog = job.tick().await.unwrap();

        assert!(!backlog);
        assert_eq!(
            offsets.get_offset("projections").await.unwrap(),
            OffsetState::LastProcessed(7)
        );
    }

    #[tokio::test]
    async fn an_empty_feed_saves_nothing() {
        let feed = Arc::new(ScriptedFeed::new(vec![]));
        let offsets = Arc::new(MemoryOffsetStore::new());
        let handled: Handled = Arc::new(Mutex::new(Vec::new()));
        let job = job(
            feed,
            offsets.clone(),
            FeedPosition::AfterOffset(-1),
            handlers_for(&handled),
        );

        let backlog = job.tick().await.unwrap();

        assert!(!backlog);
        assert_eq!(offsets.get_offset("projections").await.unwrap(), OffsetState::NoOffset);
    }

    fn consumer(
        feed: Arc<ScriptedFeed>,
        offsets: Arc<MemoryOffsetStore>,
        config: HttpEventSourceConfig,
    ) -> EventSourceConsumer<RemoteEvent, ScriptedFeed, MemoryOffsetStore> {
        EventSourceConsumer::new(feed, offsets, Arc::new(remote_mapper()), config)
    }

    #[tokio::test]
    async fn subscribing_an_unknown_event_type_fails_loudly() {
        let feed = Arc::new(ScriptedFeed::new(vec![]));
        let consumer = consumer(
            feed,
            Arc::new(MemoryOffsetStore::new()),
            HttpEventSourceConfig::new("http", "localhost", 8080, "/feed"),
        );

        let handled: Handled = Arc::new(Mutex::new(Vec::new()));
        let mut handlers: HashMap<String, Arc<dyn SubscriptionHandler<RemoteEvent>>> = HashMap::new();
        handlers.insert("user.renamed".to_string(), collecting_handler(handled));

        let result = consumer.subscribe(
            handlers,
            SubscriptionConfig::new("projections", EdenPolicy::BeginningOfTime),
        );
        assert!(matches!(result, Err(SubscribeError::UnknownEventType { .. })));
    }

    #[tokio::test]
    async fn disabled_subscriptions_are_not_scheduled() {
        let feed = Arc::new(ScriptedFeed::new(vec![]));
        let consumer = consumer(
            feed.clone(),
            Arc::new(MemoryOffsetStore::new()),
            HttpEventSourceConfig::new("http", "localhost", 8080, "/feed").disable("projections"),
        );

        let handled: Handled = Arc::new(Mutex::new(Vec::new()));
        let handle = consumer
            .subscribe(
                handlers_for(&handled),
                SubscriptionConfig::new("projections", EdenPolicy::BeginningOfTime),
            )
            .unwrap();

        assert!(handle.is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(feed.recorded_queries().is_empty());
    }

    #[tokio::test]
    async fn a_scheduled_subscription_drains_the_feed() {
        let first = FeedPage {
            events: vec![feed_event(1, "user.registered", registered_payload("ada"))],
            query_max_offset: 2,
            global_max_offset: 2,
            page_start_offset: 1,
            page_end_offset: 1,
        };
        let second = FeedPage {
            events: vec![feed_event(2, "user.registered", registered_payload("grace"))],
            query_max_offset: 2,
            global_max_offset: 2,
            page_start_offset: 2,
            page_end_offset: 2,
        };
        let feed = Arc::new(ScriptedFeed::new(vec![first, second]));
        let offsets = Arc::new(MemoryOffsetStore::new());
        let consumer = consumer(
            feed.clone(),
            offsets.clone(),
            HttpEventSourceConfig::new("http", "localhost", 8080, "/feed")
                .with_repeat_schedule("projections", Duration::from_millis(10)),
        );

        let handled: Handled = Arc::new(Mutex::new(Vec::new()));
        let handle = consumer
            .subscribe(
                handlers_for(&handled),
                SubscriptionConfig::new("projections", EdenPolicy::BeginningOfTime),
            )
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert_eq!(handled.lock().unwrap().len(), 2);
        assert_eq!(
            offsets.get_offset("projections").await.unwrap(),
            OffsetState::LastProcessed(2)
        );
        // The first page left backlog behind, so its follow-up ran without
        // waiting for the schedule.
        let queries = feed.recorded_queries();
        assert_eq!(queries[0].position, FeedPosition::AfterOffset(-1));
        assert_eq!(queries[1].position, FeedPosition::AfterOffset(1));
    }
}
