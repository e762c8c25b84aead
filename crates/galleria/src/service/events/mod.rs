//! Fire-and-forget domain events.
//!
//! Lifecycle transitions emit CloudEvents onto a bounded channel; a
//! background task fans them out to the configured sinks. Emission never
//! blocks the calling operation beyond a short send timeout, and a full or
//! closed channel is logged and dropped rather than surfaced to the caller.

use std::{
    fmt::{Debug, Display},
    sync::{Arc, LazyLock},
};

use async_trait::async_trait;
use cloudevents::Event;
use uuid::Uuid;

use super::{EventId, MediaId, MediaRecord, SeriesId, UserId};

/// Cached hostname for CloudEvents source URI. Resolved once at first access.
static HOSTNAME: LazyLock<String> = LazyLock::new(|| {
    hostname::get().map_or_else(
        |_| "hostname-unavailable".into(),
        |os| os.to_string_lossy().to_string(),
    )
});

#[derive(Debug, Clone)]
pub struct EventsPublisher {
    tx: tokio::sync::mpsc::Sender<EventsMessage>,
    timeout: tokio::time::Duration,
}

impl Display for EventsPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventsPublisher")
    }
}

impl EventsPublisher {
    #[must_use]
    pub fn new(tx: tokio::sync::mpsc::Sender<EventsMessage>) -> Self {
        Self::new_with_timeout(tx, tokio::time::Duration::from_millis(50))
    }

    #[must_use]
    pub fn new_with_timeout(
        tx: tokio::sync::mpsc::Sender<EventsMessage>,
        timeout: tokio::time::Duration,
    ) -> Self {
        Self { tx, timeout }
    }

    /// Emits one event. Failure to enqueue is logged, never propagated.
    pub async fn publish(
        &self,
        typ: &str,
        data: serde_json::Value,
        metadata: EventMetadata,
    ) {
        let id = Uuid::now_v7();
        if let Err(e) = self
            .tx
            .send_timeout(
                EventsMessage::Event(Payload {
                    id,
                    typ: typ.to_string(),
                    data,
                    metadata,
                }),
                self.timeout,
            )
            .await
        {
            tracing::warn!("Failed to emit event with id: '{}' due to: '{}'.", id, e);
        }
    }

    pub async fn media_ingested(&self, record: &MediaRecord, actor: UserId) {
        let data = serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
        self.publish(
            "mediaIngested",
            data,
            EventMetadata {
                media_id: Some(record.id),
                event_id: Some(record.event_id),
                user_id: Some(record.uploader_id),
                actor: actor.to_string(),
            },
        )
        .await;
    }

    pub async fn media_deleted(&self, media_id: MediaId, event_id: EventId, actor: UserId) {
        self.publish(
            "mediaDeleted",
            serde_json::Value::Null,
            EventMetadata {
                media_id: Some(media_id),
                event_id: Some(event_id),
                user_id: None,
                actor: actor.to_string(),
            },
        )
        .await;
    }

    pub async fn event_deleted(&self, event_id: EventId, media_count: usize, actor: UserId) {
        self.publish(
            "eventDeleted",
            serde_json::json!({ "media_count": media_count }),
            EventMetadata {
                media_id: None,
                event_id: Some(event_id),
                user_id: None,
                actor: actor.to_string(),
            },
        )
        .await;
    }

    pub async fn series_deleted(&self, series_id: SeriesId, event_count: usize, actor: UserId) {
        self.publish(
            "seriesDeleted",
            serde_json::json!({ "series_id": series_id, "event_count": event_count }),
            EventMetadata {
                media_id: None,
                event_id: None,
                user_id: None,
                actor: actor.to_string(),
            },
        )
        .await;
    }

    pub async fn user_content_deleted(&self, user_id: UserId, actor: UserId) {
        self.publish(
            "userContentDeleted",
            serde_json::Value::Null,
            EventMetadata {
                media_id: None,
                event_id: None,
                user_id: Some(user_id),
                actor: actor.to_string(),
            },
        )
        .await;
    }
}

#[derive(Debug, Clone)]
pub struct EventMetadata {
    pub media_id: Option<MediaId>,
    pub event_id: Option<EventId>,
    pub user_id: Option<UserId>,
    pub actor: String,
}

#[derive(Debug)]
pub struct Payload {
    pub id: Uuid,
    pub typ: String,
    pub data: serde_json::Value,
    pub metadata: EventMetadata,
}

#[derive(Debug)]
pub enum EventsMessage {
    Event(Payload),
    Shutdown,
}

#[derive(Debug)]
pub struct EventsPublisherBackgroundTask {
    pub source: tokio::sync::mpsc::Receiver<EventsMessage>,
    pub sinks: Vec<Arc<dyn EventBackend + Sync + Send>>,
}

impl EventsPublisherBackgroundTask {
    /// Drains the channel until a `Shutdown` message or all senders are
    /// dropped. Sink failures are logged per sink and never abort the loop.
    pub async fn publish(mut self) -> anyhow::Result<()> {
        while let Some(EventsMessage::Event(Payload {
            id,
            typ,
            data,
            metadata,
        })) = self.source.recv().await
        {
            use cloudevents::{EventBuilder, EventBuilderV10};

            let EventMetadata {
                media_id,
                event_id,
                user_id,
                actor,
            } = metadata;

            let event = match EventBuilderV10::new()
                .id(id.to_string())
                .source(format!("uri:galleria:{}", &*HOSTNAME))
                .ty(typ)
                .data("application/json", data)
                .extension("media-id", opt_to_string(media_id))
                .extension("event-id", opt_to_string(event_id))
                .extension("user-id", opt_to_string(user_id))
                .extension("actor", actor)
                .build()
            {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Failed to build CloudEvent with id '{id}': {e}");
                    continue;
                }
            };

            let publish_futures = self.sinks.iter().map(|sink| {
                let event = event.clone();
                async move {
                    if let Err(e) = sink.publish(event).await {
                        tracing::warn!(
                            "Failed to emit event with id: '{}' on sink: '{}' due to: '{}'.",
                            id,
                            sink.name(),
                            e
                        );
                    }
                }
            });

            futures::future::join_all(publish_futures).await;
        }

        Ok(())
    }
}

fn opt_to_string<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[async_trait]
pub trait EventBackend: Debug {
    async fn publish(&self, event: Event) -> anyhow::Result<()>;

    fn name(&self) -> &str;
}

/// Sink that logs every event through `tracing`.
#[derive(Clone, Debug)]
pub struct TracingPublisher;

#[async_trait::async_trait]
impl EventBackend for TracingPublisher {
    async fn publish(&self, event: Event) -> anyhow::Result<()> {
        let data =
            serde_json::to_value(&event).unwrap_or(serde_json::json!("Event serialization failed"));
        tracing::info!(event=%data, "CloudEvent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing-publisher"
    }
}
