use std::sync::Arc;

use crate::DomainResult;
use crate::entity::{EntityStatus, Source};
use crate::error::DomainError;
use crate::lists::MailingList;
use crate::members::Member;
use crate::ports::directory::{DirectoryClient, GroupSettings};
use crate::ports::store::{ListStore, ServiceStore};

/// Result of the create-side source dispatch. `needs_cleanup` marks a
/// resource this system created in the directory, which must be
/// compensated if a later step fails.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncOutcome {
    pub external_id: Option<String>,
    pub needs_cleanup: bool,
    pub status: EntityStatus,
}

impl SyncOutcome {
    fn synced(external_id: String, needs_cleanup: bool) -> Self {
        Self {
            external_id: Some(external_id),
            needs_cleanup,
            status: EntityStatus::Active,
        }
    }

    /// Adopts an identifier for a resource that already exists in the
    /// directory and is not ours to clean up.
    pub fn linked(external_id: String) -> Self {
        Self::synced(external_id, false)
    }

    pub fn pending() -> Self {
        Self {
            external_id: None,
            needs_cleanup: false,
            status: EntityStatus::Pending,
        }
    }
}

/// Source-dispatch strategy against the directory. One arm per source:
/// api creates the resource remotely, webhook trusts the identifier the
/// directory already assigned, mock leaves the entity pending.
#[derive(Clone)]
pub struct ExternalSynchronizer {
    directory: Arc<dyn DirectoryClient>,
}

impl ExternalSynchronizer {
    pub fn new(directory: Arc<dyn DirectoryClient>) -> Self {
        Self { directory }
    }

    pub async fn create_group(
        &self,
        source: Source,
        domain: &str,
        name: &str,
        provided_external_id: Option<&str>,
    ) -> DomainResult<SyncOutcome> {
        match source {
            Source::Api => {
                let external_id = self.directory.create_group(domain, name).await?;
                Ok(SyncOutcome::synced(external_id, true))
            }
            Source::Webhook => trusted(provided_external_id),
            Source::Mock => Ok(SyncOutcome::pending()),
        }
    }

    pub async fn create_subgroup(
        &self,
        source: Source,
        domain: &str,
        parent_external_id: Option<&str>,
        name: &str,
        provided_external_id: Option<&str>,
    ) -> DomainResult<SyncOutcome> {
        match source {
            Source::Api => {
                let parent = parent_external_id.ok_or_else(|| {
                    DomainError::Validation("parent service has no directory group".into())
                })?;
                let external_id = self.directory.create_subgroup(domain, parent, name).await?;
                Ok(SyncOutcome::synced(external_id, true))
            }
            Source::Webhook => trusted(provided_external_id),
            Source::Mock => Ok(SyncOutcome::pending()),
        }
    }

    pub async fn add_member(
        &self,
        source: Source,
        domain: &str,
        group_external_id: Option<&str>,
        email: &str,
        provided_external_id: Option<&str>,
    ) -> DomainResult<SyncOutcome> {
        match source {
            Source::Api => {
                let group = group_external_id.ok_or_else(|| {
                    DomainError::Validation("parent list has no directory group".into())
                })?;
                let external_id = self.directory.add_member(domain, group, email).await?;
                Ok(SyncOutcome::synced(external_id, true))
            }
            Source::Webhook => trusted(provided_external_id),
            Source::Mock => Ok(SyncOutcome::pending()),
        }
    }

    pub async fn update_group(
        &self,
        source: Source,
        domain: &str,
        external_id: Option<&str>,
        settings: &GroupSettings,
    ) -> DomainResult<()> {
        let (Source::Api, Some(external_id)) = (source, external_id) else {
            return Ok(());
        };
        self.directory.update_group(domain, external_id, settings).await
    }

    pub async fn remove_group(
        &self,
        source: Source,
        domain: &str,
        external_id: Option<&str>,
    ) -> DomainResult<()> {
        let (Source::Api, Some(external_id)) = (source, external_id) else {
            return Ok(());
        };
        self.directory.remove_group(domain, external_id).await
    }

    pub async fn update_member(
        &self,
        source: Source,
        domain: &str,
        external_id: Option<&str>,
        moderated: bool,
    ) -> DomainResult<()> {
        let (Source::Api, Some(external_id)) = (source, external_id) else {
            return Ok(());
        };
        self.directory.update_member(domain, external_id, moderated).await
    }

    pub async fn remove_member(
        &self,
        source: Source,
        domain: &str,
        external_id: Option<&str>,
    ) -> DomainResult<()> {
        let (Source::Api, Some(external_id)) = (source, external_id) else {
            return Ok(());
        };
        self.directory.remove_member(domain, external_id).await
    }
}

fn trusted(provided_external_id: Option<&str>) -> DomainResult<SyncOutcome> {
    let external_id = provided_external_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| DomainError::Validation("webhook writes must carry an external id".into()))?;
    Ok(SyncOutcome::linked(external_id.to_string()))
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListContext {
    pub domain: String,
    pub service_external_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemberContext {
    pub domain: String,
    pub list_external_id: Option<String>,
}

/// Walks Member -> MailingList -> Service to find the mail domain (and
/// the parent's directory id). Create paths treat a broken chain as
/// fatal; update and delete paths degrade to skipping directory sync.
#[derive(Clone)]
pub struct DomainResolver {
    services: Arc<dyn ServiceStore>,
    lists: Arc<dyn ListStore>,
}

impl DomainResolver {
    pub fn new(services: Arc<dyn ServiceStore>, lists: Arc<dyn ListStore>) -> Self {
        Self { services, lists }
    }

    pub async fn for_list(&self, list: &MailingList) -> DomainResult<ListContext> {
        let service = self
            .services
            .get(&list.service_uid)
            .await?
            .ok_or(DomainError::NotFound)?;
        Ok(ListContext {
            domain: service.value.domain.clone(),
            service_external_id: service.value.external_id.clone(),
        })
    }

    pub async fn for_member(&self, member: &Member) -> DomainResult<MemberContext> {
        let list = self
            .lists
            .get(&member.list_uid)
            .await?
            .ok_or(DomainError::NotFound)?;
        let context = self.for_list(&list.value).await?;
        Ok(MemberContext {
            domain: context.domain,
            list_external_id: list.value.external_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::ports::BoxFuture;

    #[derive(Default)]
    struct CountingDirectory {
        calls: Mutex<Vec<String>>,
    }

    impl CountingDirectory {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().expect("calls lock").push(call.into());
        }
    }

    impl DirectoryClient for CountingDirectory {
        fn create_group(&self, domain: &str, name: &str) -> BoxFuture<'_, DomainResult<String>> {
            self.record(format!("create_group:{domain}:{name}"));
            Box::pin(async { Ok("grp-1".to_string()) })
        }

        fn update_group(
            &self,
            _domain: &str,
            external_id: &str,
            _settings: &GroupSettings,
        ) -> BoxFuture<'_, DomainResult<()>> {
            self.record(format!("update_group:{external_id}"));
            Box::pin(async { Ok(()) })
        }

        fn remove_group(
            &self,
            _domain: &str,
            external_id: &str,
        ) -> BoxFuture<'_, DomainResult<()>> {
            self.record(format!("remove_group:{external_id}"));
            Box::pin(async { Ok(()) })
        }

        fn create_subgroup(
            &self,
            _domain: &str,
            parent_external_id: &str,
            name: &str,
        ) -> BoxFuture<'_, DomainResult<String>> {
            self.record(format!("create_subgroup:{parent_external_id}:{name}"));
            Box::pin(async { Ok("sub-1".to_string()) })
        }

        fn add_member(
            &self,
            _domain: &str,
            group_external_id: &str,
            email: &str,
        ) -> BoxFuture<'_, DomainResult<String>> {
            self.record(format!("add_member:{group_external_id}:{email}"));
            Box::pin(async { Ok("mbr-1".to_string()) })
        }

        fn update_member(
            &self,
            _domain: &str,
            external_id: &str,
            _moderated: bool,
        ) -> BoxFuture<'_, DomainResult<()>> {
            self.record(format!("update_member:{external_id}"));
            Box::pin(async { Ok(()) })
        }

        fn remove_member(
            &self,
            _domain: &str,
            external_id: &str,
        ) -> BoxFuture<'_, DomainResult<()>> {
            self.record(format!("remove_member:{external_id}"));
            Box::pin(async { Ok(()) })
        }

        fn member_count(
            &self,
            _domain: &str,
            _group_external_id: &str,
        ) -> BoxFuture<'_, DomainResult<u64>> {
            Box::pin(async { Ok(0) })
        }
    }

    #[tokio::test]
    async fn api_source_creates_and_flags_cleanup() {
        let directory = Arc::new(CountingDirectory::default());
        let sync = ExternalSynchronizer::new(directory.clone());
        let outcome = sync
            .create_group(Source::Api, "example.org", "proj", None)
            .await
            .unwrap();
        assert_eq!(outcome.external_id.as_deref(), Some("grp-1"));
        assert!(outcome.needs_cleanup);
        assert_eq!(outcome.status, EntityStatus::Active);
        assert_eq!(directory.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn webhook_source_trusts_without_calling() {
        let directory = Arc::new(CountingDirectory::default());
        let sync = ExternalSynchronizer::new(directory.clone());
        let outcome = sync
            .create_group(Source::Webhook, "example.org", "proj", Some("grp-77"))
            .await
            .unwrap();
        assert_eq!(outcome.external_id.as_deref(), Some("grp-77"));
        assert!(!outcome.needs_cleanup);
        assert!(directory.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_source_requires_an_external_id() {
        let sync = ExternalSynchronizer::new(Arc::new(CountingDirectory::default()));
        let err = sync
            .create_group(Source::Webhook, "example.org", "proj", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn mock_source_stays_pending() {
        let directory = Arc::new(CountingDirectory::default());
        let sync = ExternalSynchronizer::new(directory.clone());
        let outcome = sync
            .add_member(Source::Mock, "example.org", Some("grp-1"), "a@x.com", None)
            .await
            .unwrap();
        assert_eq!(outcome.external_id, None);
        assert_eq!(outcome.status, EntityStatus::Pending);
        assert!(directory.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn api_member_add_requires_parent_group() {
        let sync = ExternalSynchronizer::new(Arc::new(CountingDirectory::default()));
        let err = sync
            .add_member(Source::Api, "example.org", None, "a@x.com", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn post_commit_sync_skips_non_api_sources() {
        let directory = Arc::new(CountingDirectory::default());
        let sync = ExternalSynchronizer::new(directory.clone());
        sync.remove_group(Source::Webhook, "example.org", Some("grp-1"))
            .await
            .unwrap();
        sync.update_member(Source::Mock, "example.org", None, true)
            .await
            .unwrap();
        assert!(directory.calls.lock().unwrap().is_empty());
    }
}
