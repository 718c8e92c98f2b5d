use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use groupsync_domain::DomainResult;
use groupsync_domain::entity::Versioned;
use groupsync_domain::error::DomainError;
use groupsync_domain::lists::MailingList;
use groupsync_domain::members::Member;
use groupsync_domain::ports::BoxFuture;
use groupsync_domain::ports::directory::{DirectoryClient, GroupSettings};
use groupsync_domain::ports::events::{EventChannel, EventSink};
use groupsync_domain::ports::index::{EntityRef, ExternalIndexStore};
use groupsync_domain::ports::project::{ProjectInfo, ProjectReader};
use groupsync_domain::ports::store::{
    ConstraintStore, EntityLookup, ListStore, MemberStore, ServiceStore,
};
use groupsync_domain::services::Service;
use metrics::counter;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

const EVENTS_PUBLISHED_TOTAL: &str = "groupsync_events_published_total";

/// Field access the generic store needs from every stored entity.
trait KeyedEntity: Clone + Send + Sync + 'static {
    fn uid(&self) -> &str;
    fn external_id(&self) -> Option<&str>;
    fn natural_key(&self) -> String;
}

impl KeyedEntity for Service {
    fn uid(&self) -> &str {
        &self.uid
    }
    fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }
    fn natural_key(&self) -> String {
        self.constraint_key()
    }
}

impl KeyedEntity for MailingList {
    fn uid(&self) -> &str {
        &self.uid
    }
    fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }
    fn natural_key(&self) -> String {
        self.constraint_key()
    }
}

impl KeyedEntity for Member {
    fn uid(&self) -> &str {
        &self.uid
    }
    fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }
    fn natural_key(&self) -> String {
        self.constraint_key()
    }
}

/// Versioned map shared by the three entity stores. Revisions start at
/// 1 on create and bump by one per successful compare-and-set update.
pub struct InMemoryEntityStore<T> {
    entries: Arc<RwLock<HashMap<String, Versioned<T>>>>,
}

pub type InMemoryServiceStore = InMemoryEntityStore<Service>;
pub type InMemoryListStore = InMemoryEntityStore<MailingList>;
pub type InMemoryMemberStore = InMemoryEntityStore<Member>;

impl<T> Default for InMemoryEntityStore<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<T> InMemoryEntityStore<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: KeyedEntity> InMemoryEntityStore<T> {
    fn create_entry(&self, entity: &T) -> BoxFuture<'_, DomainResult<u64>> {
        let entity = entity.clone();
        let entries = self.entries.clone();
        Box::pin(async move {
            let mut entries = entries.write().await;
            if entries.contains_key(entity.uid()) {
                return Err(DomainError::Conflict);
            }
            entries.insert(
                entity.uid().to_string(),
                Versioned {
                    value: entity,
                    revision: 1,
                },
            );
            Ok(1)
        })
    }

    fn get_entry(&self, uid: &str) -> BoxFuture<'_, DomainResult<Option<Versioned<T>>>> {
        let uid = uid.to_string();
        let entries = self.entries.clone();
        Box::pin(async move {
            let entries = entries.read().await;
            Ok(entries.get(&uid).cloned())
        })
    }

    fn update_entry(
        &self,
        uid: &str,
        entity: &T,
        expected_revision: u64,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        let uid = uid.to_string();
        let entity = entity.clone();
        let entries = self.entries.clone();
        Box::pin(async move {
            let mut entries = entries.write().await;
            let current = entries.get_mut(&uid).ok_or(DomainError::NotFound)?;
            if current.revision != expected_revision {
                return Err(DomainError::Conflict);
            }
            current.value = entity;
            current.revision += 1;
            Ok(current.revision)
        })
    }

    fn delete_entry(&self, uid: &str, expected_revision: u64) -> BoxFuture<'_, DomainResult<()>> {
        let uid = uid.to_string();
        let entries = self.entries.clone();
        Box::pin(async move {
            let mut entries = entries.write().await;
            let current = entries.get(&uid).ok_or(DomainError::NotFound)?;
            if current.revision != expected_revision {
                return Err(DomainError::Conflict);
            }
            entries.remove(&uid);
            Ok(())
        })
    }
}

impl<T: KeyedEntity> EntityLookup<T> for InMemoryEntityStore<T> {
    fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Versioned<T>>>> {
        let external_id = external_id.to_string();
        let entries = self.entries.clone();
        Box::pin(async move {
            let entries = entries.read().await;
            Ok(entries
                .values()
                .find(|entry| entry.value.external_id() == Some(external_id.as_str()))
                .cloned())
        })
    }

    fn find_by_natural_key(
        &self,
        key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Versioned<T>>>> {
        let key = key.to_string();
        let entries = self.entries.clone();
        Box::pin(async move {
            let entries = entries.read().await;
            Ok(entries
                .values()
                .find(|entry| entry.value.natural_key() == key)
                .cloned())
        })
    }
}

impl ServiceStore for InMemoryEntityStore<Service> {
    fn create(&self, service: &Service) -> BoxFuture<'_, DomainResult<u64>> {
        self.create_entry(service)
    }

    fn get(&self, uid: &str) -> BoxFuture<'_, DomainResult<Option<Versioned<Service>>>> {
        self.get_entry(uid)
    }

    fn update(
        &self,
        uid: &str,
        service: &Service,
        expected_revision: u64,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        self.update_entry(uid, service, expected_revision)
    }

    fn delete(&self, uid: &str, expected_revision: u64) -> BoxFuture<'_, DomainResult<()>> {
        self.delete_entry(uid, expected_revision)
    }
}

impl ListStore for InMemoryEntityStore<MailingList> {
    fn create(&self, list: &MailingList) -> BoxFuture<'_, DomainResult<u64>> {
        self.create_entry(list)
    }

    fn get(&self, uid: &str) -> BoxFuture<'_, DomainResult<Option<Versioned<MailingList>>>> {
        self.get_entry(uid)
    }

    fn update(
        &self,
        uid: &str,
        list: &MailingList,
        expected_revision: u64,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        self.update_entry(uid, list, expected_revision)
    }

    fn delete(&self, uid: &str, expected_revision: u64) -> BoxFuture<'_, DomainResult<()>> {
        self.delete_entry(uid, expected_revision)
    }
}

impl MemberStore for InMemoryEntityStore<Member> {
    fn create(&self, member: &Member) -> BoxFuture<'_, DomainResult<u64>> {
        self.create_entry(member)
    }

    fn get(&self, uid: &str) -> BoxFuture<'_, DomainResult<Option<Versioned<Member>>>> {
        self.get_entry(uid)
    }

    fn update(
        &self,
        uid: &str,
        member: &Member,
        expected_revision: u64,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        self.update_entry(uid, member, expected_revision)
    }

    fn delete(&self, uid: &str, expected_revision: u64) -> BoxFuture<'_, DomainResult<()>> {
        self.delete_entry(uid, expected_revision)
    }

    fn count_by_list(&self, list_uid: &str) -> BoxFuture<'_, DomainResult<u64>> {
        let list_uid = list_uid.to_string();
        let entries = self.entries.clone();
        Box::pin(async move {
            let entries = entries.read().await;
            Ok(entries
                .values()
                .filter(|entry| entry.value.list_uid == list_uid)
                .count() as u64)
        })
    }
}

/// Reserved constraint keys with their revisions. Re-reserving after a
/// release continues the key's revision sequence so a stale release
/// cannot drop a newer holder.
#[derive(Default)]
pub struct InMemoryConstraintStore {
    held: Arc<RwLock<HashMap<String, u64>>>,
    last_revision: Arc<RwLock<HashMap<String, u64>>>,
}

impl InMemoryConstraintStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConstraintStore for InMemoryConstraintStore {
    fn reserve(&self, key: &str) -> BoxFuture<'_, DomainResult<u64>> {
        let key = key.to_string();
        let held = self.held.clone();
        let last_revision = self.last_revision.clone();
        Box::pin(async move {
            let mut held = held.write().await;
            if held.contains_key(&key) {
                return Err(DomainError::Conflict);
            }
            let mut last_revision = last_revision.write().await;
            let revision = last_revision.get(&key).copied().unwrap_or(0) + 1;
            last_revision.insert(key.clone(), revision);
            held.insert(key, revision);
            Ok(revision)
        })
    }

    fn revision_of(&self, key: &str) -> BoxFuture<'_, DomainResult<Option<u64>>> {
        let key = key.to_string();
        let held = self.held.clone();
        Box::pin(async move {
            let held = held.read().await;
            Ok(held.get(&key).copied())
        })
    }

    fn release(&self, key: &str, revision: u64) -> BoxFuture<'_, DomainResult<()>> {
        let key = key.to_string();
        let held = self.held.clone();
        Box::pin(async move {
            let mut held = held.write().await;
            match held.get(&key) {
                None => Ok(()),
                Some(current) if *current == revision => {
                    held.remove(&key);
                    Ok(())
                }
                Some(_) => Err(DomainError::Conflict),
            }
        })
    }
}

#[derive(Default)]
pub struct InMemoryExternalIndexStore {
    entries: Arc<RwLock<HashMap<String, EntityRef>>>,
}

impl InMemoryExternalIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExternalIndexStore for InMemoryExternalIndexStore {
    fn put(&self, external_id: &str, entry: &EntityRef) -> BoxFuture<'_, DomainResult<()>> {
        let external_id = external_id.to_string();
        let entry = entry.clone();
        let entries = self.entries.clone();
        Box::pin(async move {
            let mut entries = entries.write().await;
            entries.insert(external_id, entry);
            Ok(())
        })
    }

    fn get(&self, external_id: &str) -> BoxFuture<'_, DomainResult<Option<EntityRef>>> {
        let external_id = external_id.to_string();
        let entries = self.entries.clone();
        Box::pin(async move {
            let entries = entries.read().await;
            Ok(entries.get(&external_id).cloned())
        })
    }

    fn delete(&self, external_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let external_id = external_id.to_string();
        let entries = self.entries.clone();
        Box::pin(async move {
            let mut entries = entries.write().await;
            entries.remove(&external_id);
            Ok(())
        })
    }
}

#[derive(Clone, Debug, Default)]
struct GroupState {
    domain: String,
    name: String,
    description: String,
    members: HashMap<String, String>,
}

/// Stand-in for the real group directory. Assigns sequential ids and
/// tracks group membership so `member_count` reflects add/remove calls.
/// Removals are idempotent, matching the tolerance the compensation
/// path expects from the real system.
#[derive(Default)]
pub struct InMemoryDirectoryClient {
    id_seq: AtomicU64,
    groups: Arc<RwLock<HashMap<String, GroupState>>>,
    member_groups: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryDirectoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.id_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{n}")
    }

    pub async fn group_exists(&self, external_id: &str) -> bool {
        self.groups.read().await.contains_key(external_id)
    }

    /// Registers a group that exists in the directory without going
    /// through `create_group`. Shared services link such groups.
    pub async fn seed_group(&self, domain: &str, name: &str) -> String {
        let external_id = self.next_id("grp");
        self.groups.write().await.insert(
            external_id.clone(),
            GroupState {
                domain: domain.to_string(),
                name: name.to_string(),
                ..GroupState::default()
            },
        );
        external_id
    }
}

impl DirectoryClient for InMemoryDirectoryClient {
    fn create_group(&self, domain: &str, name: &str) -> BoxFuture<'_, DomainResult<String>> {
        let external_id = self.next_id("grp");
        let domain = domain.to_string();
        let name = name.to_string();
        let groups = self.groups.clone();
        Box::pin(async move {
            let mut groups = groups.write().await;
            groups.insert(
                external_id.clone(),
                GroupState {
                    domain,
                    name,
                    ..GroupState::default()
                },
            );
            Ok(external_id)
        })
    }

    fn update_group(
        &self,
        _domain: &str,
        external_id: &str,
        settings: &GroupSettings,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let external_id = external_id.to_string();
        let description = settings.description.clone();
        let groups = self.groups.clone();
        Box::pin(async move {
            let mut groups = groups.write().await;
            let group = groups.get_mut(&external_id).ok_or(DomainError::NotFound)?;
            group.description = description;
            Ok(())
        })
    }

    fn remove_group(&self, _domain: &str, external_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let external_id = external_id.to_string();
        let groups = self.groups.clone();
        let member_groups = self.member_groups.clone();
        Box::pin(async move {
            let mut groups = groups.write().await;
            if let Some(group) = groups.remove(&external_id) {
                let mut member_groups = member_groups.write().await;
                for member_id in group.members.keys() {
                    member_groups.remove(member_id);
                }
            } else {
                debug!(%external_id, "removal of unknown directory group ignored");
            }
            Ok(())
        })
    }

    fn create_subgroup(
        &self,
        domain: &str,
        parent_external_id: &str,
        name: &str,
    ) -> BoxFuture<'_, DomainResult<String>> {
        let external_id = self.next_id("sub");
        let domain = domain.to_string();
        let parent_external_id = parent_external_id.to_string();
        let name = name.to_string();
        let groups = self.groups.clone();
        Box::pin(async move {
            let mut groups = groups.write().await;
            if !groups.contains_key(&parent_external_id) {
                return Err(DomainError::NotFound);
            }
            groups.insert(
                external_id.clone(),
                GroupState {
                    domain,
                    name,
                    ..GroupState::default()
                },
            );
            Ok(external_id)
        })
    }

    fn add_member(
        &self,
        _domain: &str,
        group_external_id: &str,
        email: &str,
    ) -> BoxFuture<'_, DomainResult<String>> {
        let member_id = self.next_id("mbr");
        let group_external_id = group_external_id.to_string();
        let email = email.to_string();
        let groups = self.groups.clone();
        let member_groups = self.member_groups.clone();
        Box::pin(async move {
            let mut groups = groups.write().await;
            let group = groups
                .get_mut(&group_external_id)
                .ok_or(DomainError::NotFound)?;
            group.members.insert(member_id.clone(), email);
            let mut member_groups = member_groups.write().await;
            member_groups.insert(member_id.clone(), group_external_id);
            Ok(member_id)
        })
    }

    fn update_member(
        &self,
        _domain: &str,
        member_external_id: &str,
        _moderated: bool,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let member_external_id = member_external_id.to_string();
        let member_groups = self.member_groups.clone();
        Box::pin(async move {
            let member_groups = member_groups.read().await;
            if !member_groups.contains_key(&member_external_id) {
                return Err(DomainError::NotFound);
            }
            Ok(())
        })
    }

    fn remove_member(
        &self,
        _domain: &str,
        member_external_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let member_external_id = member_external_id.to_string();
        let groups = self.groups.clone();
        let member_groups = self.member_groups.clone();
        Box::pin(async move {
            // lock order is groups before member_groups everywhere, so
            // the owning group is resolved and the member_groups guard
            // dropped before groups is acquired
            let owning_group = member_groups.write().await.remove(&member_external_id);
            match owning_group {
                Some(group_id) => {
                    let mut groups = groups.write().await;
                    if let Some(group) = groups.get_mut(&group_id) {
                        group.members.remove(&member_external_id);
                    }
                }
                None => {
                    debug!(%member_external_id, "removal of unknown directory member ignored");
                }
            }
            Ok(())
        })
    }

    fn member_count(
        &self,
        _domain: &str,
        group_external_id: &str,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        let group_external_id = group_external_id.to_string();
        let groups = self.groups.clone();
        Box::pin(async move {
            let groups = groups.read().await;
            let group = groups.get(&group_external_id).ok_or(DomainError::NotFound)?;
            Ok(group.members.len() as u64)
        })
    }
}

/// Captures published events in order for assertions and counts them
/// per channel.
#[derive(Default)]
pub struct RecordingEventSink {
    published: Arc<RwLock<Vec<(EventChannel, Value)>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<(EventChannel, Value)> {
        self.published.read().await.clone()
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, channel: EventChannel, payload: Value) -> BoxFuture<'_, DomainResult<()>> {
        let published = self.published.clone();
        Box::pin(async move {
            counter!(EVENTS_PUBLISHED_TOTAL, "channel" => channel.as_str()).increment(1);
            let mut published = published.write().await;
            published.push((channel, payload));
            Ok(())
        })
    }
}

/// Project catalog loaded once from configuration.
pub struct StaticProjectReader {
    projects: HashMap<String, ProjectInfo>,
}

impl StaticProjectReader {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let projects = pairs
            .into_iter()
            .map(|(project_id, mail_domain)| {
                (
                    project_id.clone(),
                    ProjectInfo {
                        project_id,
                        mail_domain,
                    },
                )
            })
            .collect();
        Self { projects }
    }
}

impl ProjectReader for StaticProjectReader {
    fn get_project(&self, project_id: &str) -> BoxFuture<'_, DomainResult<Option<ProjectInfo>>> {
        let info = self.projects.get(project_id).cloned();
        Box::pin(async move { Ok(info) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groupsync_domain::entity::{EntityKind, EntityStatus, Source};
    use groupsync_domain::services::ServiceKind;

    fn service(uid: &str, project: &str) -> Service {
        Service {
            uid: uid.to_string(),
            project_id: project.to_string(),
            kind: ServiceKind::Primary,
            domain: "demo.example.org".to_string(),
            prefix: None,
            external_group_id: None,
            external_id: Some(format!("ext-{uid}")),
            source: Source::Api,
            status: EntityStatus::Active,
            owners: vec![],
            description: String::new(),
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn create_starts_at_revision_one_and_update_bumps() {
        let store = InMemoryServiceStore::new();
        let svc = service("s1", "demo");
        assert_eq!(store.create(&svc).await.unwrap(), 1);
        assert_eq!(store.update("s1", &svc, 1).await.unwrap(), 2);
        assert_eq!(store.get("s1").await.unwrap().unwrap().revision, 2);
    }

    #[tokio::test]
    async fn stale_revision_is_rejected_without_mutation() {
        let store = InMemoryServiceStore::new();
        let svc = service("s1", "demo");
        store.create(&svc).await.unwrap();
        store.update("s1", &svc, 1).await.unwrap();

        let mut changed = svc.clone();
        changed.description = "late".to_string();
        assert!(matches!(
            store.update("s1", &changed, 1).await,
            Err(DomainError::Conflict)
        ));
        assert!(matches!(
            store.delete("s1", 1).await,
            Err(DomainError::Conflict)
        ));
        let current = store.get("s1").await.unwrap().unwrap();
        assert_eq!(current.value.description, "");
    }

    #[tokio::test]
    async fn lookups_by_external_id_and_natural_key() {
        let store = InMemoryServiceStore::new();
        let svc = service("s1", "demo");
        store.create(&svc).await.unwrap();

        let by_ext = store.find_by_external_id("ext-s1").await.unwrap().unwrap();
        assert_eq!(by_ext.value.uid, "s1");
        let by_key = store
            .find_by_natural_key("svc/primary/demo")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.value.uid, "s1");
        assert!(store.find_by_external_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn constraint_reserve_release_cycle() {
        let constraints = InMemoryConstraintStore::new();
        let rev1 = constraints.reserve("svc/primary/demo").await.unwrap();
        assert!(matches!(
            constraints.reserve("svc/primary/demo").await,
            Err(DomainError::Conflict)
        ));
        constraints.release("svc/primary/demo", rev1).await.unwrap();
        assert!(constraints
            .revision_of("svc/primary/demo")
            .await
            .unwrap()
            .is_none());

        let rev2 = constraints.reserve("svc/primary/demo").await.unwrap();
        assert!(rev2 > rev1);
        // A release carrying the old revision must not free the key.
        assert!(matches!(
            constraints.release("svc/primary/demo", rev1).await,
            Err(DomainError::Conflict)
        ));
        assert_eq!(
            constraints.revision_of("svc/primary/demo").await.unwrap(),
            Some(rev2)
        );
    }

    #[tokio::test]
    async fn directory_tracks_membership_per_group() {
        let directory = InMemoryDirectoryClient::new();
        let group = directory.create_group("d", "demo").await.unwrap();
        let m1 = directory.add_member("d", &group, "a@x.org").await.unwrap();
        directory.add_member("d", &group, "b@x.org").await.unwrap();
        assert_eq!(directory.member_count("d", &group).await.unwrap(), 2);

        directory.remove_member("d", &m1).await.unwrap();
        assert_eq!(directory.member_count("d", &group).await.unwrap(), 1);
        // Second removal of the same member is a no-op.
        directory.remove_member("d", &m1).await.unwrap();

        directory.remove_group("d", &group).await.unwrap();
        assert!(matches!(
            directory.member_count("d", &group).await,
            Err(DomainError::NotFound)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_membership_churn_completes() {
        let directory = Arc::new(InMemoryDirectoryClient::new());
        let group = directory.create_group("d", "demo").await.unwrap();

        let churn = {
            let directory = directory.clone();
            let group = group.clone();
            async move {
                for _ in 0..50 {
                    let mut tasks = Vec::new();
                    for _ in 0..8 {
                        let directory = directory.clone();
                        let group = group.clone();
                        tasks.push(tokio::spawn(async move {
                            let member = directory
                                .add_member("d", &group, "ada@x.org")
                                .await
                                .unwrap();
                            directory.remove_member("d", &member).await.unwrap();
                        }));
                    }
                    for task in tasks {
                        task.await.unwrap();
                    }
                }
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(10), churn)
            .await
            .expect("membership churn stalled");
        assert_eq!(directory.member_count("d", &group).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn subgroup_requires_existing_parent() {
        let directory = InMemoryDirectoryClient::new();
        assert!(matches!(
            directory.create_subgroup("d", "missing", "eng").await,
            Err(DomainError::NotFound)
        ));
        let parent = directory.create_group("d", "demo").await.unwrap();
        let sub = directory.create_subgroup("d", &parent, "eng").await.unwrap();
        assert!(sub.starts_with("sub-"));
    }

    #[tokio::test]
    async fn index_overwrites_and_deletes_idempotently() {
        let index = InMemoryExternalIndexStore::new();
        let first = EntityRef {
            kind: EntityKind::MailingList,
            uid: "l1".to_string(),
        };
        index.put("ext-1", &first).await.unwrap();
        let second = EntityRef {
            kind: EntityKind::MailingList,
            uid: "l2".to_string(),
        };
        index.put("ext-1", &second).await.unwrap();
        assert_eq!(index.get("ext-1").await.unwrap(), Some(second));

        index.delete("ext-1").await.unwrap();
        index.delete("ext-1").await.unwrap();
        assert!(index.get("ext-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn project_reader_serves_configured_projects() {
        let reader = StaticProjectReader::from_pairs(vec![(
            "demo".to_string(),
            "demo.example.org".to_string(),
        )]);
        let info = reader.get_project("demo").await.unwrap().unwrap();
        assert_eq!(info.mail_domain, "demo.example.org");
        assert!(reader.get_project("other").await.unwrap().is_none());
    }
}
