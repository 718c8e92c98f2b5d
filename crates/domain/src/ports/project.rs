use crate::DomainResult;

use super::BoxFuture;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectInfo {
    pub project_id: String,
    pub mail_domain: String,
}

/// Ancestor metadata for parent validation. Projects live outside this
/// system; only existence and the mail domain matter here.
pub trait ProjectReader: Send + Sync {
    fn get_project(&self, project_id: &str) -> BoxFuture<'_, DomainResult<Option<ProjectInfo>>>;
}
