use std::sync::Arc;

use groupsync_domain::adoption::AdoptionService;
use groupsync_domain::events::EventFanout;
use groupsync_domain::lists::ListWriter;
use groupsync_domain::members::MemberWriter;
use groupsync_domain::ports::events::EventSink;
use groupsync_domain::ports::project::ProjectReader;
use groupsync_domain::ports::store::{ConstraintStore, ListStore, MemberStore, ServiceStore};
use groupsync_domain::reconcile::SubscriberCountReconciler;
use groupsync_domain::rollback::RollbackCoordinator;
use groupsync_domain::services::ServiceWriter;
use groupsync_domain::sync::{DomainResolver, ExternalSynchronizer};
use groupsync_infra::config::AppConfig;
use groupsync_infra::repositories::{
    InMemoryConstraintStore, InMemoryDirectoryClient, InMemoryExternalIndexStore,
    InMemoryListStore, InMemoryMemberStore, InMemoryServiceStore, RecordingEventSink,
    StaticProjectReader,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub services: Arc<dyn ServiceStore>,
    pub lists: Arc<dyn ListStore>,
    pub members: Arc<dyn MemberStore>,
    pub service_writer: ServiceWriter,
    pub list_writer: ListWriter,
    pub member_writer: MemberWriter,
    pub adoption: AdoptionService,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        if !config.data_backend.eq_ignore_ascii_case("memory") {
            anyhow::bail!(
                "unsupported data backend {:?}; only \"memory\" is wired up",
                config.data_backend
            );
        }

        let services: Arc<dyn ServiceStore> = Arc::new(InMemoryServiceStore::new());
        let lists: Arc<dyn ListStore> = Arc::new(InMemoryListStore::new());
        let members: Arc<dyn MemberStore> = Arc::new(InMemoryMemberStore::new());
        let constraints: Arc<dyn ConstraintStore> = Arc::new(InMemoryConstraintStore::new());
        let index = Arc::new(InMemoryExternalIndexStore::new());
        let directory = Arc::new(InMemoryDirectoryClient::new());
        let sink: Arc<dyn EventSink> = Arc::new(RecordingEventSink::new());
        let projects: Arc<dyn ProjectReader> =
            Arc::new(StaticProjectReader::from_pairs(config.project_domain_pairs()));

        let sync = ExternalSynchronizer::new(directory.clone());
        let events = EventFanout::new(sink);
        let rollback = RollbackCoordinator::new(constraints.clone(), directory.clone());
        let resolver = DomainResolver::new(services.clone(), lists.clone());
        let reconciler = SubscriberCountReconciler::new(
            lists.clone(),
            members.clone(),
            directory.clone(),
            resolver.clone(),
        );

        let service_writer = ServiceWriter::new(
            services.clone(),
            constraints.clone(),
            index.clone(),
            projects,
            sync.clone(),
            events.clone(),
            rollback.clone(),
        );
        let list_writer = ListWriter::new(
            lists.clone(),
            services.clone(),
            constraints.clone(),
            index.clone(),
            sync.clone(),
            events.clone(),
            rollback.clone(),
            resolver.clone(),
        );
        let member_writer = MemberWriter::new(
            members.clone(),
            lists.clone(),
            constraints,
            index.clone(),
            sync,
            events,
            rollback,
            resolver,
            reconciler,
        );
        let adoption = AdoptionService::new(
            lists.clone(),
            members.clone(),
            index,
            list_writer.clone(),
            member_writer.clone(),
        );

        Ok(Self {
            config,
            services,
            lists,
            members,
            service_writer,
            list_writer,
            member_writer,
            adoption,
        })
    }
}
