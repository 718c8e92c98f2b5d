use std::sync::Arc;

use serde_json::{Value, json};
use tokio::task::JoinSet;

use crate::DomainResult;
use crate::entity::EntityKind;
use crate::error::DomainError;
use crate::ports::events::{EventChannel, EventSink};
use crate::util::{format_ms_rfc3339, now_ms};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityAction {
    Created,
    Updated,
    Deleted,
}

impl EntityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EventMessage {
    pub channel: EventChannel,
    pub payload: Value,
}

pub fn index_event(kind: EntityKind, action: EntityAction, uid: &str, document: Value) -> EventMessage {
    EventMessage {
        channel: EventChannel::SearchIndex,
        payload: json!({
            "entity_kind": kind.as_str(),
            "action": action.as_str(),
            "uid": uid,
            "occurred_at": format_ms_rfc3339(now_ms()),
            "document": document,
        }),
    }
}

pub fn access_event(kind: EntityKind, action: EntityAction, uid: &str, relation: Value) -> EventMessage {
    EventMessage {
        channel: EventChannel::AccessControl,
        payload: json!({
            "entity_kind": kind.as_str(),
            "action": action.as_str(),
            "uid": uid,
            "occurred_at": format_ms_rfc3339(now_ms()),
            "relation": relation,
        }),
    }
}

/// Fans publish calls out concurrently, one task per message, and waits
/// for all of them. Failures are combined into a single error; writers
/// log it and still report success, because publication is at-most-once
/// with no outbox.
#[derive(Clone)]
pub struct EventFanout {
    sink: Arc<dyn EventSink>,
}

impl EventFanout {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub async fn publish_all(&self, messages: Vec<EventMessage>) -> DomainResult<()> {
        let mut tasks = JoinSet::new();
        for message in messages {
            let sink = self.sink.clone();
            let channel = message.channel;
            tasks.spawn(async move {
                sink.publish(channel, message.payload)
                    .await
                    .map_err(|err| (channel, err))
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err((channel, err))) => failures.push(format!("{}: {err}", channel.as_str())),
                Err(err) => failures.push(format!("publish task failed: {err}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Unexpected(format!(
                "event publication failed: {}",
                failures.join("; ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::ports::BoxFuture;

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<EventChannel>>,
        fail_channel: Option<EventChannel>,
    }

    impl EventSink for RecordingSink {
        fn publish(
            &self,
            channel: EventChannel,
            _payload: Value,
        ) -> BoxFuture<'_, DomainResult<()>> {
            self.published.lock().expect("published lock").push(channel);
            let fail = self.fail_channel == Some(channel);
            Box::pin(async move {
                if fail {
                    Err(DomainError::Unavailable("bus down".into()))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test]
    async fn publishes_every_message() {
        let sink = Arc::new(RecordingSink::default());
        let fanout = EventFanout::new(sink.clone());
        fanout
            .publish_all(vec![
                index_event(EntityKind::Member, EntityAction::Created, "u-1", json!({})),
                access_event(EntityKind::Member, EntityAction::Created, "u-1", json!({})),
            ])
            .await
            .unwrap();
        assert_eq!(sink.published.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_other_channel() {
        let sink = Arc::new(RecordingSink {
            fail_channel: Some(EventChannel::SearchIndex),
            ..RecordingSink::default()
        });
        let fanout = EventFanout::new(sink.clone());
        let err = fanout
            .publish_all(vec![
                index_event(EntityKind::MailingList, EntityAction::Deleted, "u-2", json!({})),
                access_event(EntityKind::MailingList, EntityAction::Deleted, "u-2", json!({})),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Unexpected(_)));
        assert_eq!(sink.published.lock().unwrap().len(), 2);
    }

    #[test]
    fn index_event_carries_kind_action_and_uid() {
        let message = index_event(
            EntityKind::Service,
            EntityAction::Updated,
            "u-3",
            json!({"description": "d"}),
        );
        assert_eq!(message.channel, EventChannel::SearchIndex);
        assert_eq!(message.payload["entity_kind"], "service");
        assert_eq!(message.payload["action"], "updated");
        assert_eq!(message.payload["uid"], "u-3");
    }
}
