use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::DomainResult;
use crate::error::DomainError;
use crate::lists::MailingList;
use crate::ports::directory::DirectoryClient;
use crate::ports::store::{ListStore, MemberStore};
use crate::sync::DomainResolver;
use crate::util::now_ms;

const RECONCILE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;

/// Refreshes the denormalized subscriber count of a mailing list after
/// member churn. The counter is non-authoritative, so every failure
/// mode ends in a warning rather than an error to the caller.
#[derive(Clone)]
pub struct SubscriberCountReconciler {
    lists: Arc<dyn ListStore>,
    members: Arc<dyn MemberStore>,
    directory: Arc<dyn DirectoryClient>,
    resolver: DomainResolver,
}

impl SubscriberCountReconciler {
    pub fn new(
        lists: Arc<dyn ListStore>,
        members: Arc<dyn MemberStore>,
        directory: Arc<dyn DirectoryClient>,
        resolver: DomainResolver,
    ) -> Self {
        Self {
            lists,
            members,
            directory,
            resolver,
        }
    }

    /// Detached task under its own timeout; the caller's deadline does
    /// not apply. Callers decide where to join the returned handle.
    pub fn spawn(&self, list_uid: String) -> JoinHandle<()> {
        let reconciler = self.clone();
        tokio::spawn(async move {
            if tokio::time::timeout(RECONCILE_TIMEOUT, reconciler.run(&list_uid))
                .await
                .is_err()
            {
                warn!(list_uid, "subscriber count reconciliation timed out");
            }
        })
    }

    /// CAS refresh with immediate retry on Conflict: a conflict here is
    /// a lost race with another writer and resolves on refetch. Three
    /// attempts total, then abandon.
    pub async fn run(&self, list_uid: &str) {
        for attempt in 1..=MAX_ATTEMPTS {
            let current = match self.lists.get(list_uid).await {
                Ok(Some(current)) => current,
                Ok(None) => return,
                Err(err) => {
                    warn!(error = %err, list_uid, "reconcile fetch failed");
                    return;
                }
            };
            let count = match self.fresh_count(&current.value).await {
                Ok(count) => count,
                Err(err) => {
                    warn!(error = %err, list_uid, "reconcile count failed");
                    return;
                }
            };

            let mut list = current.value;
            list.subscriber_count = count;
            list.updated_at_ms = now_ms();
            match self.lists.update(list_uid, &list, current.revision).await {
                Ok(_) => return,
                Err(DomainError::Conflict) if attempt < MAX_ATTEMPTS => continue,
                Err(err) => {
                    warn!(error = %err, list_uid, attempt, "reconcile write abandoned");
                    return;
                }
            }
        }
    }

    async fn fresh_count(&self, list: &MailingList) -> DomainResult<u64> {
        if let Some(external_id) = list.external_id.as_deref() {
            match self.resolver.for_list(list).await {
                Ok(context) => {
                    return self.directory.member_count(&context.domain, external_id).await;
                }
                Err(err) => {
                    warn!(error = %err, uid = %list.uid, "domain resolution failed, using local count");
                }
            }
        }
        self.members.count_by_list(&list.uid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::entity::{EntityStatus, Source, Versioned};
    use crate::lists::Visibility;
    use crate::members::Member;
    use crate::ports::BoxFuture;
    use crate::ports::directory::GroupSettings;
    use crate::ports::store::{EntityLookup, ServiceStore};
    use crate::services::Service;

    fn plain_list(uid: &str) -> MailingList {
        MailingList {
            uid: uid.to_string(),
            service_uid: "svc-1".to_string(),
            group_name: "announce".to_string(),
            external_id: None,
            source: Source::Api,
            status: EntityStatus::Active,
            visibility: Visibility::Public,
            description: String::new(),
            owners: vec![],
            moderated: false,
            subscriber_count: 0,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    /// Always hands out the same list at revision 1 and rejects every
    /// CAS write with Conflict, counting the attempts.
    struct ConflictingListStore {
        list: MailingList,
        update_calls: AtomicU32,
    }

    impl EntityLookup<MailingList> for ConflictingListStore {
        fn find_by_external_id(
            &self,
            _external_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<Versioned<MailingList>>>> {
            Box::pin(async { Ok(None) })
        }

        fn find_by_natural_key(
            &self,
            _key: &str,
        ) -> BoxFuture<'_, DomainResult<Option<Versioned<MailingList>>>> {
            Box::pin(async { Ok(None) })
        }
    }

    impl ListStore for ConflictingListStore {
        fn create(&self, _list: &MailingList) -> BoxFuture<'_, DomainResult<u64>> {
            Box::pin(async { Ok(1) })
        }

        fn get(&self, _uid: &str) -> BoxFuture<'_, DomainResult<Option<Versioned<MailingList>>>> {
            let list = self.list.clone();
            Box::pin(async move {
                Ok(Some(Versioned {
                    value: list,
                    revision: 1,
                }))
            })
        }

        fn update(
            &self,
            _uid: &str,
            _list: &MailingList,
            _expected_revision: u64,
        ) -> BoxFuture<'_, DomainResult<u64>> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(DomainError::Conflict) })
        }

        fn delete(&self, _uid: &str, _expected_revision: u64) -> BoxFuture<'_, DomainResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct FixedCountMembers {
        count: u64,
    }

    impl EntityLookup<Member> for FixedCountMembers {
        fn find_by_external_id(
            &self,
            _external_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<Versioned<Member>>>> {
            Box::pin(async { Ok(None) })
        }

        fn find_by_natural_key(
            &self,
            _key: &str,
        ) -> BoxFuture<'_, DomainResult<Option<Versioned<Member>>>> {
            Box::pin(async { Ok(None) })
        }
    }

    impl MemberStore for FixedCountMembers {
        fn create(&self, _member: &Member) -> BoxFuture<'_, DomainResult<u64>> {
            Box::pin(async { Ok(1) })
        }

        fn get(&self, _uid: &str) -> BoxFuture<'_, DomainResult<Option<Versioned<Member>>>> {
            Box::pin(async { Ok(None) })
        }

        fn update(
            &self,
            _uid: &str,
            _member: &Member,
            _expected_revision: u64,
        ) -> BoxFuture<'_, DomainResult<u64>> {
            Box::pin(async { Ok(1) })
        }

        fn delete(&self, _uid: &str, _expected_revision: u64) -> BoxFuture<'_, DomainResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn count_by_list(&self, _list_uid: &str) -> BoxFuture<'_, DomainResult<u64>> {
            let count = self.count;
            Box::pin(async move { Ok(count) })
        }
    }

    struct NoServices;

    impl EntityLookup<Service> for NoServices {
        fn find_by_external_id(
            &self,
            _external_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<Versioned<Service>>>> {
            Box::pin(async { Ok(None) })
        }

        fn find_by_natural_key(
            &self,
            _key: &str,
        ) -> BoxFuture<'_, DomainResult<Option<Versioned<Service>>>> {
            Box::pin(async { Ok(None) })
        }
    }

    impl ServiceStore for NoServices {
        fn create(&self, _service: &Service) -> BoxFuture<'_, DomainResult<u64>> {
            Box::pin(async { Ok(1) })
        }

        fn get(&self, _uid: &str) -> BoxFuture<'_, DomainResult<Option<Versioned<Service>>>> {
            Box::pin(async { Ok(None) })
        }

        fn update(
            &self,
            _uid: &str,
            _service: &Service,
            _expected_revision: u64,
        ) -> BoxFuture<'_, DomainResult<u64>> {
            Box::pin(async { Ok(1) })
        }

        fn delete(&self, _uid: &str, _expected_revision: u64) -> BoxFuture<'_, DomainResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct IdleDirectory {
        count_calls: Mutex<Vec<String>>,
    }

    impl DirectoryClient for IdleDirectory {
        fn create_group(&self, _domain: &str, _name: &str) -> BoxFuture<'_, DomainResult<String>> {
            Box::pin(async { Ok("grp-1".to_string()) })
        }

        fn update_group(
            &self,
            _domain: &str,
            _external_id: &str,
            _settings: &GroupSettings,
        ) -> BoxFuture<'_, DomainResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn remove_group(
            &self,
            _domain: &str,
            _external_id: &str,
        ) -> BoxFuture<'_, DomainResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn create_subgroup(
            &self,
            _domain: &str,
            _parent_external_id: &str,
            _name: &str,
        ) -> BoxFuture<'_, DomainResult<String>> {
            Box::pin(async { Ok("sub-1".to_string()) })
        }

        fn add_member(
            &self,
            _domain: &str,
            _group_external_id: &str,
            _email: &str,
        ) -> BoxFuture<'_, DomainResult<String>> {
            Box::pin(async { Ok("mbr-1".to_string()) })
        }

        fn update_member(
            &self,
            _domain: &str,
            _member_external_id: &str,
            _moderated: bool,
        ) -> BoxFuture<'_, DomainResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn remove_member(
            &self,
            _domain: &str,
            _member_external_id: &str,
        ) -> BoxFuture<'_, DomainResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn member_count(
            &self,
            _domain: &str,
            group_external_id: &str,
        ) -> BoxFuture<'_, DomainResult<u64>> {
            self.count_calls
                .lock()
                .expect("count lock")
                .push(group_external_id.to_string());
            Box::pin(async { Ok(7) })
        }
    }

    #[tokio::test]
    async fn gives_up_after_three_cas_attempts() {
        let lists = Arc::new(ConflictingListStore {
            list: plain_list("list-1"),
            update_calls: AtomicU32::new(0),
        });
        let services: Arc<dyn ServiceStore> = Arc::new(NoServices);
        let reconciler = SubscriberCountReconciler::new(
            lists.clone(),
            Arc::new(FixedCountMembers { count: 5 }),
            Arc::new(IdleDirectory::default()),
            DomainResolver::new(services, lists.clone()),
        );

        // no error escapes; the counter is best-effort
        reconciler.run("list-1").await;
        assert_eq!(lists.update_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unsynced_list_falls_back_to_local_count() {
        let lists = Arc::new(ConflictingListStore {
            list: plain_list("list-1"),
            update_calls: AtomicU32::new(0),
        });
        let services: Arc<dyn ServiceStore> = Arc::new(NoServices);
        let directory = Arc::new(IdleDirectory::default());
        let reconciler = SubscriberCountReconciler::new(
            lists.clone(),
            Arc::new(FixedCountMembers { count: 5 }),
            directory.clone(),
            DomainResolver::new(services, lists),
        );

        reconciler.run("list-1").await;
        assert!(directory.count_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_list_is_a_quiet_no_op() {
        struct EmptyLists;
        impl EntityLookup<MailingList> for EmptyLists {
            fn find_by_external_id(
                &self,
                _external_id: &str,
            ) -> BoxFuture<'_, DomainResult<Option<Versioned<MailingList>>>> {
                Box::pin(async { Ok(None) })
            }
            fn find_by_natural_key(
                &self,
                _key: &str,
            ) -> BoxFuture<'_, DomainResult<Option<Versioned<MailingList>>>> {
                Box::pin(async { Ok(None) })
            }
        }
        impl ListStore for EmptyLists {
            fn create(&self, _list: &MailingList) -> BoxFuture<'_, DomainResult<u64>> {
                Box::pin(async { Ok(1) })
            }
            fn get(
                &self,
                _uid: &str,
            ) -> BoxFuture<'_, DomainResult<Option<Versioned<MailingList>>>> {
                Box::pin(async { Ok(None) })
            }
            fn update(
                &self,
                _uid: &str,
                _list: &MailingList,
                _expected_revision: u64,
            ) -> BoxFuture<'_, DomainResult<u64>> {
                Box::pin(async { Err(DomainError::NotFound) })
            }
            fn delete(
                &self,
                _uid: &str,
                _expected_revision: u64,
            ) -> BoxFuture<'_, DomainResult<()>> {
                Box::pin(async { Ok(()) })
            }
        }

        let lists: Arc<dyn ListStore> = Arc::new(EmptyLists);
        let services: Arc<dyn ServiceStore> = Arc::new(NoServices);
        let reconciler = SubscriberCountReconciler::new(
            lists.clone(),
            Arc::new(FixedCountMembers { count: 0 }),
            Arc::new(IdleDirectory::default()),
            DomainResolver::new(services, lists),
        );
        let handle = reconciler.spawn("gone".to_string());
        handle.await.unwrap();
    }
}
