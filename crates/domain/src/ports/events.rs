use serde::{Deserialize, Serialize};

use crate::DomainResult;

use super::BoxFuture;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventChannel {
    SearchIndex,
    AccessControl,
}

impl EventChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchIndex => "search_index",
            Self::AccessControl => "access_control",
        }
    }
}

pub trait EventSink: Send + Sync {
    fn publish(
        &self,
        channel: EventChannel,
        payload: serde_json::Value,
    ) -> BoxFuture<'_, DomainResult<()>>;
}
