use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::DomainResult;
use crate::entity::{EntityKind, EntityStatus, Source, Versioned};
use crate::error::DomainError;
use crate::events::{EntityAction, EventFanout, access_event, index_event};
use crate::idempotency::find_existing;
use crate::ports::index::{EntityRef, ExternalIndexStore};
use crate::ports::store::{ConstraintStore, ListStore, MemberStore};
use crate::reconcile::SubscriberCountReconciler;
use crate::rollback::{Compensation, Rollback, RollbackCoordinator, release_constraint};
use crate::sync::{DomainResolver, ExternalSynchronizer};
use crate::util::{now_ms, uuid_v7_without_dashes};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub uid: String,
    pub list_uid: String,
    /// Case-preserving; uniqueness and existence checks run on the
    /// lowercased form.
    pub email: String,
    pub external_id: Option<String>,
    pub source: Source,
    pub status: EntityStatus,
    pub display_name: String,
    pub moderated: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Member {
    pub fn constraint_key(&self) -> String {
        member_constraint_key(&self.list_uid, &self.email)
    }
}

pub fn member_constraint_key(list_uid: &str, email: &str) -> String {
    format!("member/{}/{}", list_uid, email.trim().to_lowercase())
}

#[derive(Clone, Debug, Deserialize)]
pub struct MemberCreate {
    pub list_uid: String,
    pub email: String,
    pub display_name: String,
    pub moderated: bool,
    pub source: Source,
    pub external_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MemberUpdate {
    pub display_name: Option<String>,
    pub moderated: Option<bool>,
}

#[derive(Clone)]
pub struct MemberWriter {
    members: Arc<dyn MemberStore>,
    lists: Arc<dyn ListStore>,
    constraints: Arc<dyn ConstraintStore>,
    index: Arc<dyn ExternalIndexStore>,
    sync: ExternalSynchronizer,
    events: EventFanout,
    rollback: RollbackCoordinator,
    resolver: DomainResolver,
    reconciler: SubscriberCountReconciler,
}

impl MemberWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        members: Arc<dyn MemberStore>,
        lists: Arc<dyn ListStore>,
        constraints: Arc<dyn ConstraintStore>,
        index: Arc<dyn ExternalIndexStore>,
        sync: ExternalSynchronizer,
        events: EventFanout,
        rollback: RollbackCoordinator,
        resolver: DomainResolver,
        reconciler: SubscriberCountReconciler,
    ) -> Self {
        Self {
            members,
            lists,
            constraints,
            index,
            sync,
            events,
            rollback,
            resolver,
            reconciler,
        }
    }

    pub async fn create(&self, input: MemberCreate) -> DomainResult<Versioned<Member>> {
        let input = validate_member_create(input)?;
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
        input: MemberCreate,
    ) -> DomainResult<Versioned<Member>> {
        let now = now_ms();
        let mut candidate = Member {
            uid: uuid_v7_without_dashes(),
            list_uid: input.list_uid.clone(),
            email: input.email.clone(),
            external_id: None,
            source: input.source,
            status: EntityStatus::Active,
            display_name: input.display_name.clone(),
            moderated: input.moderated,
            created_at_ms: now,
            updated_at_ms: now,
        };

        let provided_external_id = match input.source {
            Source::Webhook => input.external_id.as_deref(),
            _ => None,
        };
        if let Some(existing) = find_existing(
            self.members.as_ref(),
            provided_external_id,
            &candidate.constraint_key(),
        )
        .await?
        {
            info!(uid = %existing.value.uid, "member create replayed an existing record");
            return Ok(existing);
        }

        let list = self
            .lists
            .get(&input.list_uid)
            .await?
            .ok_or(DomainError::NotFound)?;
        // the full chain must resolve on create; a list whose service
        // is gone cannot be synchronized
        let context = self.resolver.for_list(&list.value).await?;

        let constraint_key = candidate.constraint_key();
        self.constraints.reserve(&constraint_key).await?;
        rollback.push(Compensation::ReleaseConstraint {
            key: constraint_key,
        });

        let outcome = self
            .sync
            .add_member(
                candidate.source,
                &context.domain,
                list.value.external_id.as_deref(),
                &candidate.email,
                provided_external_id,
            )
            .await?;
        if outcome.needs_cleanup {
            if let Some(external_id) = outcome.external_id.clone() {
                rollback.push(Compensation::RemoveMember {
                    domain: context.domain.clone(),
                    external_id,
                });
            }
        }
        candidate.external_id = outcome.external_id;
        candidate.status = outcome.status;

        let revision = self.members.create(&candidate).await?;

        // commit point passed; everything below is best-effort
        if let Some(external_id) = candidate.external_id.as_deref() {
            let entry = EntityRef {
                kind: EntityKind::Member,
                uid: candidate.uid.clone(),
            };
            if let Err(err) = self.index.put(external_id, &entry).await {
                warn!(error = %err, uid = %candidate.uid, "secondary index write failed");
            }
        }

        // the count refresh runs concurrently with event publication
        // and is joined before returning
        let reconcile = self.reconciler.spawn(candidate.list_uid.clone());
        self.publish(&candidate, EntityAction::Created).await;
        if let Err(err) = reconcile.await {
            warn!(error = %err, uid = %candidate.uid, "reconcile task join failed");
        }

        Ok(Versioned {
            value: candidate,
            revision,
        })
    }

    pub async fn update(
        &self,
        uid: &str,
        patch: MemberUpdate,
        expected_revision: u64,
    ) -> DomainResult<Versioned<Member>> {
        let current = self.members.get(uid).await?.ok_or(DomainError::NotFound)?;
        if current.revision != expected_revision {
            return Err(DomainError::Conflict);
        }

        // email and list_uid are immutable; the patch cannot name them
        let mut member = current.value;
        if let Some(display_name) = patch.display_name {
            member.display_name = display_name.trim().to_string();
        }
        if let Some(moderated) = patch.moderated {
            member.moderated = moderated;
        }
        member.updated_at_ms = now_ms();

        let revision = self.members.update(uid, &member, expected_revision).await?;

        match self.resolver.for_member(&member).await {
            Ok(context) => {
                if let Err(err) = self
                    .sync
                    .update_member(
                        member.source,
                        &context.domain,
                        member.external_id.as_deref(),
                        member.moderated,
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
        self.publish(&member, EntityAction::Updated).await;

        Ok(Versioned {
            value: member,
            revision,
        })
    }

    pub async fn delete(&self, uid: &str, expected_revision: u64) -> DomainResult<()> {
        let current = self.members.get(uid).await?.ok_or(DomainError::NotFound)?;
        if current.revision != expected_revision {
            return Err(DomainError::Conflict);
        }
        let member = current.value;

        self.members.delete(uid, expected_revision).await?;

        if let Err(err) =
            release_constraint(self.constraints.as_ref(), &member.constraint_key()).await
        {
            warn!(error = %err, uid, "constraint release failed after delete");
        }
        match self.resolver.for_member(&member).await {
            Ok(context) => {
                if let Err(err) = self
                    .sync
                    .remove_member(member.source, &context.domain, member.external_id.as_deref())
                    .await
                {
                    warn!(error = %err, uid, "directory removal failed after commit");
                }
            }
            Err(err) => {
                warn!(error = %err, uid, "domain resolution failed, skipping directory removal");
            }
        }
        if let Some(external_id) = member.external_id.as_deref() {
            if let Err(err) = self.index.delete(external_id).await {
                warn!(error = %err, uid, "secondary index cleanup failed");
            }
        }
        self.publish(&member, EntityAction::Deleted).await;

        // the response must reflect the refreshed counter, so delete
        // waits for reconciliation
        let reconcile = self.reconciler.spawn(member.list_uid.clone());
        if let Err(err) = reconcile.await {
            warn!(error = %err, uid, "reconcile task join failed");
        }

        Ok(())
    }

    pub async fn member_exists(&self, list_uid: &str, email: &str) -> DomainResult<bool> {
        let key = member_constraint_key(list_uid, email);
        Ok(self.members.find_by_natural_key(&key).await?.is_some())
    }

    async fn publish(&self, member: &Member, action: EntityAction) {
        let document = json!({
            "list_uid": member.list_uid,
            "email": member.email,
            "display_name": member.display_name,
            "status": member.status.as_str(),
        });
        let relation = json!({
            "object": format!("member:{}", member.uid),
            "list": member.list_uid,
            "subject": member.email.to_lowercase(),
        });
        let messages = vec![
            index_event(EntityKind::Member, action, &member.uid, document),
            access_event(EntityKind::Member, action, &member.uid, relation),
        ];
        if let Err(err) = self.events.publish_all(messages).await {
            warn!(error = %err, uid = %member.uid, "event publication failed");
        }
    }
}

fn validate_member_create(mut input: MemberCreate) -> DomainResult<MemberCreate> {
    input.list_uid = input.list_uid.trim().to_string();
    input.email = input.email.trim().to_string();
    input.display_name = input.display_name.trim().to_string();

    if input.list_uid.is_empty() {
        return Err(DomainError::Validation("list_uid is required".into()));
    }
    let at = input.email.find('@');
    let valid_email = match at {
        Some(position) => position > 0 && position < input.email.len() - 1,
        None => false,
    };
    if !valid_email {
        return Err(DomainError::Validation("a valid email is required".into()));
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
