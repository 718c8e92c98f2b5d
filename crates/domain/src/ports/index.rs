use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::entity::EntityKind;

use super::BoxFuture;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub uid: String,
}

/// Reverse lookup from a directory identifier to the owning local
/// entity. Written only when an external id exists; webhook adoption
/// depends on it to find what a directory notification refers to.
pub trait ExternalIndexStore: Send + Sync {
    fn put(&self, external_id: &str, entry: &EntityRef) -> BoxFuture<'_, DomainResult<()>>;
    fn get(&self, external_id: &str) -> BoxFuture<'_, DomainResult<Option<EntityRef>>>;
    fn delete(&self, external_id: &str) -> BoxFuture<'_, DomainResult<()>>;
}
