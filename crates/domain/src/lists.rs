use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::DomainResult;
use crate::entity::{EntityKind, EntityStatus, Source, Versioned};
use crate::error::DomainError;
use crate::events::{EntityAction, EventFanout, access_event, index_event};
use crate::idempotency::find_existing;
use crate::ports::directory::GroupSettings;
use crate::ports::index::{EntityRef, ExternalIndexStore};
use crate::ports::store::{ConstraintStore, ListStore, ServiceStore};
use crate::rollback::{Compensation, Rollback, RollbackCoordinator, release_constraint};
use crate::sync::{DomainResolver, ExternalSynchronizer};
use crate::util::{now_ms, uuid_v7_without_dashes};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MailingList {
    pub uid: String,
    pub service_uid: String,
    pub group_name: String,
    pub external_id: Option<String>,
    pub source: Source,
    pub status: EntityStatus,
    pub visibility: Visibility,
    pub description: String,
    pub owners: Vec<String>,
    pub moderated: bool,
    /// Denormalized, refreshed by the subscriber-count reconciler.
    pub subscriber_count: u64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl MailingList {
    pub fn constraint_key(&self) -> String {
        format!(
            "list/{}/{}",
            self.service_uid,
            self.group_name.to_lowercase()
        )
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ListCreate {
    pub service_uid: String,
    pub group_name: String,
    pub visibility: Visibility,
    pub description: String,
    pub owners: Vec<String>,
    pub moderated: bool,
    pub source: Source,
    pub external_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListUpdate {
    pub visibility: Option<Visibility>,
    pub description: Option<String>,
    pub owners: Option<Vec<String>>,
    pub moderated: Option<bool>,
}

#[derive(Clone)]
pub struct ListWriter {
    lists: Arc<dyn ListStore>,
    services: Arc<dyn ServiceStore>,
    constraints: Arc<dyn ConstraintStore>,
    index: Arc<dyn ExternalIndexStore>,
    sync: ExternalSynchronizer,
    events: EventFanout,
    rollback: RollbackCoordinator,
    resolver: DomainResolver,
}

impl ListWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lists: Arc<dyn ListStore>,
        services: Arc<dyn ServiceStore>,
        constraints: Arc<dyn ConstraintStore>,
        index: Arc<dyn ExternalIndexStore>,
        sync: ExternalSynchronizer,
        events: EventFanout,
        rollback: RollbackCoordinator,
        resolver: DomainResolver,
    ) -> Self {
        Self {
            lists,
            services,
            constraints,
            index,
            sync,
            events,
            rollback,
            resolver,
        }
    }

    pub async fn create(&self, input: ListCreate) -> DomainResult<Versioned<MailingList>> {
        let input = validate_list_create(input)?;
        let mut rollback = Rollback::new();
        match self.create_inner(&mut rollback, input).await {
            Ok(created) => Ok(created),
            Err(err) => {
                self.rollback.run(rollback).await;
                Err(err)
            }
        }
    }

    async fn create_inner(
        &self,
        rollback: &mut Rollback,
        input: ListCreate,
    ) -> DomainResult<Versioned<MailingList>> {
        let now = now_ms();
        let mut candidate = MailingList {
            uid: uuid_v7_without_dashes(),
            service_uid: input.service_uid.clone(),
            group_name: input.group_name.clone(),
            external_id: None,
            source: input.source,
            status: EntityStatus::Active,
            visibility: input.visibility,
            description: input.description.clone(),
            owners: input.owners.clone(),
            moderated: input.moderated,
            subscriber_count: 0,
            created_at_ms: now,
            updated_at_ms: now,
        };

        let provided_external_id = match input.source {
            Source::Webhook => input.external_id.as_deref(),
            _ => None,
        };
        if let Some(existing) = find_existing(
            self.lists.as_ref(),
            provided_external_id,
            &candidate.constraint_key(),
        )
        .await?
        {
            info!(uid = %existing.value.uid, "list create replayed an existing record");
            return Ok(existing);
        }

        // parent validation doubles as the first link of the domain
        // chain; a missing or unsynced parent is fatal on create
        let service = self
            .services
            .get(&input.service_uid)
            .await?
            .ok_or(DomainError::NotFound)?;
        let domain = service.value.domain.clone();

        let constraint_key = candidate.constraint_key();
        self.constraints.reserve(&constraint_key).await?;
        rollback.push(Compensation::ReleaseConstraint {
            key: constraint_key,
        });

        let outcome = self
            .sync
            .create_subgroup(
                candidate.source,
                &domain,
                service.value.external_id.as_deref(),
                &candidate.group_name,
                provided_external_id,
            )
            .await?;
        if outcome.needs_cleanup {
            if let Some(external_id) = outcome.external_id.clone() {
                rollback.push(Compensation::RemoveGroup {
                    domain: domain.clone(),
                    external_id,
                });
            }
        }
        candidate.external_id = outcome.external_id;
        candidate.status = outcome.status;

        let revision = self.lists.create(&candidate).await?;

        // commit point passed; everything below is best-effort
        if let Some(external_id) = candidate.external_id.as_deref() {
            let entry = EntityRef {
                kind: EntityKind::MailingList,
                uid: candidate.uid.clone(),
            };
            if let Err(err) = self.index.put(external_id, &entry).await {
                warn!(error = %err, uid = %candidate.uid, "secondary index write failed");
            }
        }
        self.publish(&candidate, EntityAction::Created).await;

        Ok(Versioned {
            value: candidate,
            revision,
        })
    }

    pub async fn update(
        &self,
        uid: &str,
        patch: ListUpdate,
        expected_revision: u64,
    ) -> DomainResult<Versioned<MailingList>> {
        let current = self.lists.get(uid).await?.ok_or(DomainError::NotFound)?;
        if current.revision != expected_revision {
            return Err(DomainError::Conflict);
        }

        let mut list = current.value;
        if let Some(visibility) = patch.visibility {
            list.visibility = visibility;
        }
        if let Some(description) = patch.description {
            list.description = description.trim().to_string();
        }
        if let Some(owners) = patch.owners {
            list.owners = owners;
        }
        if let Some(moderated) = patch.moderated {
            list.moderated = moderated;
        }
        list.updated_at_ms = now_ms();

        let revision = self.lists.update(uid, &list, expected_revision).await?;

        // broken ancestry degrades to skipping the directory sync
        match self.resolver.for_list(&list).await {
            Ok(context) => {
                let settings = GroupSettings {
                    description: list.description.clone(),
                    visibility: Some(list.visibility.as_str().to_string()),
                    moderated: Some(list.moderated),
                };
                if let Err(err) = self
                    .sync
                    .update_group(
                        list.source,
                        &context.domain,
                        list.external_id.as_deref(),
                        &settings,
                    )
                    .await
                {
                    warn!(error = %err, uid, "directory update failed after commit");
                }
            }
            Err(err) => {
                warn!(error = %err, uid, "domain resolution failed, skipping directory sync");
            }
        }
        self.publish(&list, EntityAction::Updated).await;

        Ok(Versioned {
            value: list,
            revision,
        })
    }

    pub async fn delete(&self, uid: &str, expected_revision: u64) -> DomainResult<()> {
        let current = self.lists.get(uid).await?.ok_or(DomainError::NotFound)?;
        if current.revision != expected_revision {
            return Err(DomainError::Conflict);
        }
        let list = current.value;

        self.lists.delete(uid, expected_revision).await?;

        if let Err(err) = release_constraint(self.constraints.as_ref(), &list.constraint_key()).await
        {
            warn!(error = %err, uid, "constraint release failed after delete");
        }
        match self.resolver.for_list(&list).await {
            Ok(context) => {
                if let Err(err) = self
                    .sync
                    .remove_group(list.source, &context.domain, list.external_id.as_deref())
                    .await
                {
                    warn!(error = %err, uid, "directory removal failed after commit");
                }
            }
            Err(err) => {
                warn!(error = %err, uid, "domain resolution failed, skipping directory removal");
            }
        }
        if let Some(external_id) = list.external_id.as_deref() {
            if let Err(err) = self.index.delete(external_id).await {
                warn!(error = %err, uid, "secondary index cleanup failed");
            }
        }
        self.publish(&list, EntityAction::Deleted).await;

        Ok(())
    }

    async fn publish(&self, list: &MailingList, action: EntityAction) {
        let document = json!({
            "service_uid": list.service_uid,
            "group_name": list.group_name,
            "visibility": list.visibility.as_str(),
            "description": list.description,
            "status": list.status.as_str(),
            "subscriber_count": list.subscriber_count,
        });
        let relation = json!({
            "object": format!("list:{}", list.uid),
            "service": list.service_uid,
            "owners": list.owners,
            "visibility": list.visibility.as_str(),
        });
        let messages = vec![
            index_event(EntityKind::MailingList, action, &list.uid, document),
            access_event(EntityKind::MailingList, action, &list.uid, relation),
        ];
        if let Err(err) = self.events.publish_all(messages).await {
            warn!(error = %err, uid = %list.uid, "event publication failed");
        }
    }
}

fn validate_list_create(mut input: ListCreate) -> DomainResult<ListCreate> {
    input.service_uid = input.service_uid.trim().to_string();
    input.group_name = input.group_name.trim().to_string();
    input.description = input.description.trim().to_string();

    if input.service_uid.is_empty() {
        return Err(DomainError::Validation("service_uid is required".into()));
    }
    if input.group_name.is_empty() {
        return Err(DomainError::Validation("group_name is required".into()));
    }
    if !input
        .group_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(DomainError::Validation(
            "group_name may only contain alphanumerics, '-', '_' and '.'".into(),
        ));
    }
    if input.source == Source::Webhook {
        let missing = input
            .external_id
            .as_deref()
            .map(str::trim)
            .map(str::is_empty)
            .unwrap_or(true);
        if missing {
            return Err(DomainError::Validation(
                "webhook writes must carry an external id".into(),
            ));
        }
    } else if input.external_id.is_some() {
        return Err(DomainError::Validation(
            "external_id cannot be set by the caller".into(),
        ));
    }
    Ok(input)
}
