use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::DomainResult;
use crate::ports::directory::DirectoryClient;
use crate::ports::store::ConstraintStore;

const COMPENSATION_TIMEOUT: Duration = Duration::from_secs(10);

/// One recorded side effect of an in-flight create. The local commit is
/// the last step that can still fail fatally, so compensations only
/// cover the constraint reservation and directory provisioning that
/// precede it.
#[derive(Clone, Debug, PartialEq)]
pub enum Compensation {
    ReleaseConstraint {
        key: String,
    },
    RemoveGroup {
        domain: String,
        external_id: String,
    },
    RemoveMember {
        domain: String,
        external_id: String,
    },
}

/// Side effects accumulated while a create is in flight. The owning
/// writer hands the whole value to the coordinator when any step up to
/// and including the local commit fails; after the commit it is simply
/// never run.
#[derive(Debug, Default)]
pub struct Rollback {
    steps: Vec<Compensation>,
}

impl Rollback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn into_steps(self) -> Vec<Compensation> {
        self.steps
    }
}

/// Releases a constraint key by looking up its current revision first.
/// A key that is already gone counts as released.
pub async fn release_constraint(constraints: &dyn ConstraintStore, key: &str) -> DomainResult<()> {
    if let Some(revision) = constraints.revision_of(key).await? {
        constraints.release(key, revision).await?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct RollbackCoordinator {
    constraints: Arc<dyn ConstraintStore>,
    directory: Arc<dyn DirectoryClient>,
}

impl RollbackCoordinator {
    pub fn new(constraints: Arc<dyn ConstraintStore>, directory: Arc<dyn DirectoryClient>) -> Self {
        Self {
            constraints,
            directory,
        }
    }

    /// Compensates every recorded step in reverse order, logging and
    /// continuing past individual failures. The work runs on its own
    /// task with a fixed timeout so a caller deadline or dropped
    /// request future cannot abort cleanup mid-flight.
    pub async fn run(&self, rollback: Rollback) {
        let steps = rollback.into_steps();
        if steps.is_empty() {
            return;
        }
        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            if tokio::time::timeout(COMPENSATION_TIMEOUT, coordinator.run_steps(steps))
                .await
                .is_err()
            {
                warn!("rollback timed out before all compensations completed");
            }
        });
        let _ = handle.await;
    }

    async fn run_steps(&self, mut steps: Vec<Compensation>) {
        steps.reverse();
        for step in steps {
            if let Err(err) = self.apply(&step).await {
                warn!(error = %err, ?step, "compensation step failed");
            }
        }
    }

    async fn apply(&self, step: &Compensation) -> DomainResult<()> {
        match step {
            Compensation::ReleaseConstraint { key } => {
                release_constraint(self.constraints.as_ref(), key).await
            }
            Compensation::RemoveGroup {
                domain,
                external_id,
            } => self.directory.remove_group(domain, external_id).await,
            Compensation::RemoveMember {
                domain,
                external_id,
            } => self.directory.remove_member(domain, external_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::error::DomainError;
    use crate::ports::BoxFuture;
    use crate::ports::directory::GroupSettings;

    #[derive(Default)]
    struct RecordingDirectory {
        calls: Mutex<Vec<String>>,
        fail_group_removal: bool,
    }

    impl DirectoryClient for RecordingDirectory {
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
            external_id: &str,
        ) -> BoxFuture<'_, DomainResult<()>> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("remove_group:{external_id}"));
            let fail = self.fail_group_removal;
            Box::pin(async move {
                if fail {
                    Err(DomainError::Unavailable("directory down".into()))
                } else {
                    Ok(())
                }
            })
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
            external_id: &str,
        ) -> BoxFuture<'_, DomainResult<()>> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("remove_member:{external_id}"));
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

    #[derive(Default)]
    struct MapConstraints {
        held: Mutex<HashMap<String, u64>>,
    }

    impl ConstraintStore for MapConstraints {
        fn reserve(&self, key: &str) -> BoxFuture<'_, DomainResult<u64>> {
            let mut held = self.held.lock().expect("held lock");
            let outcome = if held.contains_key(key) {
                Err(DomainError::Conflict)
            } else {
                held.insert(key.to_string(), 1);
                Ok(1)
            };
            Box::pin(async move { outcome })
        }

        fn revision_of(&self, key: &str) -> BoxFuture<'_, DomainResult<Option<u64>>> {
            let revision = self.held.lock().expect("held lock").get(key).copied();
            Box::pin(async move { Ok(revision) })
        }

        fn release(&self, key: &str, _revision: u64) -> BoxFuture<'_, DomainResult<()>> {
            self.held.lock().expect("held lock").remove(key);
            Box::pin(async { Ok(()) })
        }
    }

    fn coordinator(
        directory: Arc<RecordingDirectory>,
        constraints: Arc<MapConstraints>,
    ) -> RollbackCoordinator {
        RollbackCoordinator::new(constraints, directory)
    }

    #[tokio::test]
    async fn compensates_in_reverse_order() {
        let directory = Arc::new(RecordingDirectory::default());
        let constraints = Arc::new(MapConstraints::default());
        constraints.reserve("svc/primary/p1").await.unwrap();

        let mut rollback = Rollback::new();
        rollback.push(Compensation::ReleaseConstraint {
            key: "svc/primary/p1".to_string(),
        });
        rollback.push(Compensation::RemoveGroup {
            domain: "example.org".to_string(),
            external_id: "grp-9".to_string(),
        });

        coordinator(directory.clone(), constraints.clone())
            .run(rollback)
            .await;

        let calls = directory.calls.lock().expect("calls lock").clone();
        assert_eq!(calls, vec!["remove_group:grp-9".to_string()]);
        assert!(
            constraints
                .revision_of("svc/primary/p1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn continues_past_a_failing_step() {
        let directory = Arc::new(RecordingDirectory {
            fail_group_removal: true,
            ..RecordingDirectory::default()
        });
        let constraints = Arc::new(MapConstraints::default());
        constraints.reserve("list/s1/announce").await.unwrap();

        let mut rollback = Rollback::new();
        rollback.push(Compensation::ReleaseConstraint {
            key: "list/s1/announce".to_string(),
        });
        rollback.push(Compensation::RemoveGroup {
            domain: "example.org".to_string(),
            external_id: "grp-9".to_string(),
        });

        coordinator(directory, constraints.clone()).run(rollback).await;

        // the failing directory call did not block the key release
        assert!(
            constraints
                .revision_of("list/s1/announce")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn empty_rollback_is_a_no_op() {
        let directory = Arc::new(RecordingDirectory::default());
        let constraints = Arc::new(MapConstraints::default());
        let rollback = Rollback::new();
        assert!(rollback.is_empty());
        coordinator(directory.clone(), constraints).run(rollback).await;
        assert!(directory.calls.lock().expect("calls lock").is_empty());
    }
}
