use crate::DomainResult;

use super::BoxFuture;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupSettings {
    pub description: String,
    pub visibility: Option<String>,
    pub moderated: Option<bool>,
}

/// The external group-management system. Create calls return the
/// directory-assigned identifier; the wire protocol behind these calls
/// is out of scope for the core.
pub trait DirectoryClient: Send + Sync {
    fn create_group(&self, domain: &str, name: &str) -> BoxFuture<'_, DomainResult<String>>;
    fn update_group(
        &self,
        domain: &str,
        external_id: &str,
        settings: &GroupSettings,
    ) -> BoxFuture<'_, DomainResult<()>>;
    fn remove_group(&self, domain: &str, external_id: &str) -> BoxFuture<'_, DomainResult<()>>;
    fn create_subgroup(
        &self,
        domain: &str,
        parent_external_id: &str,
        name: &str,
    ) -> BoxFuture<'_, DomainResult<String>>;
    fn add_member(
        &self,
        domain: &str,
        group_external_id: &str,
        email: &str,
    ) -> BoxFuture<'_, DomainResult<String>>;
    fn update_member(
        &self,
        domain: &str,
        member_external_id: &str,
        moderated: bool,
    ) -> BoxFuture<'_, DomainResult<()>>;
    fn remove_member(&self, domain: &str, member_external_id: &str)
    -> BoxFuture<'_, DomainResult<()>>;
    fn member_count(
        &self,
        domain: &str,
        group_external_id: &str,
    ) -> BoxFuture<'_, DomainResult<u64>>;
}
