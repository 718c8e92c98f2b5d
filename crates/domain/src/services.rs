use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::DomainResult;
use crate::entity::{EntityKind, EntityStatus, Source, Versioned};
use crate::error::DomainError;
use crate::events::{EntityAction, EventFanout, index_event};
use crate::idempotency::find_existing;
use crate::ports::directory::GroupSettings;
use crate::ports::index::{EntityRef, ExternalIndexStore};
use crate::ports::project::ProjectReader;
use crate::ports::store::{ConstraintStore, ServiceStore};
use crate::rollback::{Compensation, Rollback, RollbackCoordinator, release_constraint};
use crate::sync::{ExternalSynchronizer, SyncOutcome};
use crate::util::{now_ms, uuid_v7_without_dashes};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Primary,
    Formation,
    Shared,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Formation => "formation",
            Self::Shared => "shared",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub uid: String,
    pub project_id: String,
    pub kind: ServiceKind,
    pub domain: String,
    pub prefix: Option<String>,
    pub external_group_id: Option<String>,
    pub external_id: Option<String>,
    pub source: Source,
    pub status: EntityStatus,
    pub owners: Vec<String>,
    pub description: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Service {
    /// Uniqueness rule per kind: one primary per project, one formation
    /// per project+prefix, one shared per project+directory-group.
    pub fn constraint_key(&self) -> String {
        match self.kind {
            ServiceKind::Primary => format!("svc/primary/{}", self.project_id),
            ServiceKind::Formation => format!(
                "svc/formation/{}/{}",
                self.project_id,
                self.prefix.as_deref().unwrap_or_default()
            ),
            ServiceKind::Shared => format!(
                "svc/shared/{}/{}",
                self.project_id,
                self.external_group_id.as_deref().unwrap_or_default()
            ),
        }
    }

    pub fn group_name(&self) -> String {
        match self.kind {
            ServiceKind::Primary | ServiceKind::Shared => self.project_id.clone(),
            ServiceKind::Formation => format!(
                "{}-{}",
                self.project_id,
                self.prefix.as_deref().unwrap_or_default()
            ),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServiceCreate {
    pub project_id: String,
    pub kind: ServiceKind,
    pub prefix: Option<String>,
    pub external_group_id: Option<String>,
    pub owners: Vec<String>,
    pub description: String,
    pub source: Source,
    /// Honored only for webhook-source writes; api callers can never
    /// hand us a directory identifier.
    pub external_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServiceUpdate {
    pub owners: Option<Vec<String>>,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct ServiceWriter {
    services: Arc<dyn ServiceStore>,
    constraints: Arc<dyn ConstraintStore>,
    index: Arc<dyn ExternalIndexStore>,
    projects: Arc<dyn ProjectReader>,
    sync: ExternalSynchronizer,
    events: EventFanout,
    rollback: RollbackCoordinator,
}

impl ServiceWriter {
    pub fn new(
        services: Arc<dyn ServiceStore>,
        constraints: Arc<dyn ConstraintStore>,
        index: Arc<dyn ExternalIndexStore>,
        projects: Arc<dyn ProjectReader>,
        sync: ExternalSynchronizer,
        events: EventFanout,
        rollback: RollbackCoordinator,
    ) -> Self {
        Self {
            services,
            constraints,
            index,
            projects,
            sync,
            events,
            rollback,
        }
    }

    pub async fn create(&self, input: ServiceCreate) -> DomainResult<Versioned<Service>> {
        let input = validate_service_create(input)?;
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
        input: ServiceCreate,
    ) -> DomainResult<Versioned<Service>> {
        let now = now_ms();
        // identity is assigned server-side; client uids are never trusted
        let mut candidate = Service {
            uid: uuid_v7_without_dashes(),
            project_id: input.project_id.clone(),
            kind: input.kind,
            domain: String::new(),
            prefix: input.prefix.clone(),
            external_group_id: input.external_group_id.clone(),
            external_id: None,
            source: input.source,
            status: EntityStatus::Active,
            owners: input.owners.clone(),
            description: input.description.clone(),
            created_at_ms: now,
            updated_at_ms: now,
        };

        let provided_external_id = match input.source {
            Source::Webhook => input.external_id.as_deref(),
            _ => None,
        };
        if let Some(existing) = find_existing(
            self.services.as_ref(),
            provided_external_id,
            &candidate.constraint_key(),
        )
        .await?
        {
            info!(uid = %existing.value.uid, "service create replayed an existing record");
            return Ok(existing);
        }

        let project = self
            .projects
            .get_project(&input.project_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        candidate.domain = project.mail_domain;

        let constraint_key = candidate.constraint_key();
        self.constraints.reserve(&constraint_key).await?;
        rollback.push(Compensation::ReleaseConstraint {
            key: constraint_key,
        });

        let outcome = match (candidate.source, candidate.kind) {
            (Source::Mock, _) => SyncOutcome::pending(),
            (_, ServiceKind::Shared) => {
                let external_group_id = candidate.external_group_id.clone().ok_or_else(|| {
                    DomainError::Validation("shared services require external_group_id".into())
                })?;
                SyncOutcome::linked(external_group_id)
            }
            _ => {
                self.sync
                    .create_group(
                        candidate.source,
                        &candidate.domain,
                        &candidate.group_name(),
                        provided_external_id,
                    )
                    .await?
            }
        };
        if outcome.needs_cleanup {
            if let Some(external_id) = outcome.external_id.clone() {
                rollback.push(Compensation::RemoveGroup {
                    domain: candidate.domain.clone(),
                    external_id,
                });
            }
        }
        candidate.external_id = outcome.external_id;
        candidate.status = outcome.status;

        let revision = self.services.create(&candidate).await?;

        // commit point passed; everything below is best-effort
        if let Some(external_id) = candidate.external_id.as_deref() {
            let entry = EntityRef {
                kind: EntityKind::Service,
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
        patch: ServiceUpdate,
        expected_revision: u64,
    ) -> DomainResult<Versioned<Service>> {
        let current = self.services.get(uid).await?.ok_or(DomainError::NotFound)?;
        if current.revision != expected_revision {
            return Err(DomainError::Conflict);
        }

        // fetch-merge-write: immutable fields and unset patch fields
        // keep their stored values
        let mut service = current.value;
        if let Some(owners) = patch.owners {
            service.owners = owners;
        }
        if let Some(description) = patch.description {
            service.description = description.trim().to_string();
        }
        service.updated_at_ms = now_ms();

        let revision = self.services.update(uid, &service, expected_revision).await?;

        let settings = GroupSettings {
            description: service.description.clone(),
            visibility: None,
            moderated: None,
        };
        if let Err(err) = self
            .sync
            .update_group(
                service.source,
                &service.domain,
                service.external_id.as_deref(),
                &settings,
            )
            .await
        {
            warn!(error = %err, uid, "directory update failed after commit");
        }
        self.publish(&service, EntityAction::Updated).await;

        Ok(Versioned {
            value: service,
            revision,
        })
    }

    pub async fn delete(&self, uid: &str, expected_revision: u64) -> DomainResult<()> {
        let current = self.services.get(uid).await?.ok_or(DomainError::NotFound)?;
        if current.revision != expected_revision {
            return Err(DomainError::Conflict);
        }
        let service = current.value;

        self.services.delete(uid, expected_revision).await?;

        if let Err(err) = release_constraint(self.constraints.as_ref(), &service.constraint_key()).await
        {
            warn!(error = %err, uid, "constraint release failed after delete");
        }
        // shared services link a group we never created; leave it alone
        if service.kind != ServiceKind::Shared {
            if let Err(err) = self
                .sync
                .remove_group(service.source, &service.domain, service.external_id.as_deref())
                .await
            {
                warn!(error = %err, uid, "directory removal failed after commit");
            }
        }
        if let Some(external_id) = service.external_id.as_deref() {
            if let Err(err) = self.index.delete(external_id).await {
                warn!(error = %err, uid, "secondary index cleanup failed");
            }
        }
        self.publish(&service, EntityAction::Deleted).await;

        Ok(())
    }

    async fn publish(&self, service: &Service, action: EntityAction) {
        let document = json!({
            "project_id": service.project_id,
            "kind": service.kind.as_str(),
            "domain": service.domain,
            "description": service.description,
            "status": service.status.as_str(),
        });
        let messages = vec![index_event(
            EntityKind::Service,
            action,
            &service.uid,
            document,
        )];
        if let Err(err) = self.events.publish_all(messages).await {
            warn!(error = %err, uid = %service.uid, "event publication failed");
        }
    }
}

fn validate_service_create(mut input: ServiceCreate) -> DomainResult<ServiceCreate> {
    input.project_id = input.project_id.trim().to_string();
    input.description = input.description.trim().to_string();
    input.prefix = input
        .prefix
        .map(|prefix| prefix.trim().to_string())
        .filter(|prefix| !prefix.is_empty());
    input.external_group_id = input
        .external_group_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    if input.project_id.is_empty() {
        return Err(DomainError::Validation("project_id is required".into()));
    }
    match input.kind {
        ServiceKind::Formation => {
            if input.prefix.is_none() {
                return Err(DomainError::Validation(
                    "formation services require a prefix".into(),
                ));
            }
        }
        ServiceKind::Shared => {
            if input.external_group_id.is_none() {
                return Err(DomainError::Validation(
                    "shared services require external_group_id".into(),
                ));
            }
        }
        ServiceKind::Primary => {
            if input.prefix.is_some() {
                return Err(DomainError::Validation(
                    "prefix is only valid for formation services".into(),
                ));
            }
        }
    }
    match input.source {
        Source::Webhook => {
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
        }
        Source::Api | Source::Mock => {
            if input.external_id.is_some() {
                return Err(DomainError::Validation(
                    "external_id cannot be set by the caller".into(),
                ));
            }
        }
    }
    Ok(input)
}
