use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::DomainResult;
use crate::entity::{EntityKind, Source};
use crate::error::DomainError;
use crate::idempotency::backoff_ms;
use crate::lists::{ListCreate, ListWriter, Visibility};
use crate::members::{MemberCreate, MemberWriter};
use crate::ports::index::ExternalIndexStore;
use crate::ports::store::{ListStore, MemberStore};

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_MAX_MS: u64 = 5_000;

/// A directory notification after transport decoding. The webhook
/// surface upstream handles signatures and JSON; adoption only sees
/// the parsed change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum DirectoryChange {
    GroupCreated {
        service_uid: String,
        group_name: String,
        external_id: String,
        description: String,
    },
    GroupRemoved {
        external_id: String,
    },
    MemberAdded {
        list_external_id: String,
        email: String,
        display_name: String,
        external_id: String,
    },
    MemberRemoved {
        external_id: String,
    },
}

/// Adopts directory-originated changes into the local store. Writes go
/// through the regular writers with `source = webhook`, which makes
/// replayed notifications idempotent and skips directory calls.
#[derive(Clone)]
pub struct AdoptionService {
    lists: Arc<dyn ListStore>,
    members: Arc<dyn MemberStore>,
    index: Arc<dyn ExternalIndexStore>,
    list_writer: ListWriter,
    member_writer: MemberWriter,
}

impl AdoptionService {
    pub fn new(
        lists: Arc<dyn ListStore>,
        members: Arc<dyn MemberStore>,
        index: Arc<dyn ExternalIndexStore>,
        list_writer: ListWriter,
        member_writer: MemberWriter,
    ) -> Self {
        Self {
            lists,
            members,
            index,
            list_writer,
            member_writer,
        }
    }

    /// Store outages back off exponentially before giving up; every
    /// other error goes straight back to the webhook caller, whose
    /// redelivery provides the retry.
    pub async fn apply(&self, change: DirectoryChange) -> DomainResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.apply_once(&change).await {
                Ok(()) => return Ok(()),
                Err(DomainError::Unavailable(reason)) if attempt < MAX_ATTEMPTS => {
                    let delay = backoff_ms(BACKOFF_BASE_MS, attempt, BACKOFF_MAX_MS);
                    warn!(attempt, delay_ms = delay, reason, "store unavailable during adoption, backing off");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn apply_once(&self, change: &DirectoryChange) -> DomainResult<()> {
        match change {
            DirectoryChange::GroupCreated {
                service_uid,
                group_name,
                external_id,
                description,
            } => {
                let created = self
                    .list_writer
                    .create(ListCreate {
                        service_uid: service_uid.clone(),
                        group_name: group_name.clone(),
                        visibility: Visibility::Private,
                        description: description.clone(),
                        owners: Vec::new(),
                        moderated: false,
                        source: Source::Webhook,
                        external_id: Some(external_id.clone()),
                    })
                    .await?;
                info!(uid = %created.value.uid, external_id, "adopted directory group");
                Ok(())
            }
            DirectoryChange::GroupRemoved { external_id } => {
                self.remove_adopted(external_id, EntityKind::MailingList).await
            }
            DirectoryChange::MemberAdded {
                list_external_id,
                email,
                display_name,
                external_id,
            } => {
                let list = self
                    .lists
                    .find_by_external_id(list_external_id)
                    .await?
                    .ok_or(DomainError::NotFound)?;
                let created = self
                    .member_writer
                    .create(MemberCreate {
                        list_uid: list.value.uid.clone(),
                        email: email.clone(),
                        display_name: display_name.clone(),
                        moderated: false,
                        source: Source::Webhook,
                        external_id: Some(external_id.clone()),
                    })
                    .await?;
                info!(uid = %created.value.uid, external_id, "adopted directory member");
                Ok(())
            }
            DirectoryChange::MemberRemoved { external_id } => {
                self.remove_adopted(external_id, EntityKind::Member).await
            }
        }
    }

    /// Resolves the owning entity through the secondary index and
    /// deletes it with a fresh revision. A missing index entry means
    /// the resource was never adopted (or already cleaned up).
    async fn remove_adopted(&self, external_id: &str, expected_kind: EntityKind) -> DomainResult<()> {
        let Some(entry) = self.index.get(external_id).await? else {
            info!(external_id, "no local entity indexed for removed directory resource");
            return Ok(());
        };
        if entry.kind != expected_kind {
            return Err(DomainError::Unexpected(format!(
                "index entry for {external_id} is a {}, expected {}",
                entry.kind.as_str(),
                expected_kind.as_str()
            )));
        }
        match expected_kind {
            EntityKind::MailingList => {
                let Some(current) = self.lists.get(&entry.uid).await? else {
                    return Ok(());
                };
                self.list_writer.delete(&entry.uid, current.revision).await
            }
            EntityKind::Member => {
                let Some(current) = self.members.get(&entry.uid).await? else {
                    return Ok(());
                };
                self.member_writer.delete(&entry.uid, current.revision).await
            }
            EntityKind::Service => Err(DomainError::Unexpected(
                "service adoption is not supported".into(),
            )),
        }
    }
}
