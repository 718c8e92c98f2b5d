use crate::DomainResult;
use crate::entity::Versioned;
use crate::lists::MailingList;
use crate::members::Member;
use crate::services::Service;

use super::BoxFuture;

/// Lookup surface shared by the idempotency resolver. The natural key
/// is the entity's constraint key; the external id covers webhook
/// replay of directory-originated writes.
pub trait EntityLookup<T>: Send + Sync {
    fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Versioned<T>>>>;
    fn find_by_natural_key(&self, key: &str)
    -> BoxFuture<'_, DomainResult<Option<Versioned<T>>>>;
}

pub trait ServiceStore: EntityLookup<Service> {
    fn create(&self, service: &Service) -> BoxFuture<'_, DomainResult<u64>>;
    fn get(&self, uid: &str) -> BoxFuture<'_, DomainResult<Option<Versioned<Service>>>>;
    fn update(
        &self,
        uid: &str,
        service: &Service,
        expected_revision: u64,
    ) -> BoxFuture<'_, DomainResult<u64>>;
    fn delete(&self, uid: &str, expected_revision: u64) -> BoxFuture<'_, DomainResult<()>>;
}

pub trait ListStore: EntityLookup<MailingList> {
    fn create(&self, list: &MailingList) -> BoxFuture<'_, DomainResult<u64>>;
    fn get(&self, uid: &str) -> BoxFuture<'_, DomainResult<Option<Versioned<MailingList>>>>;
    fn update(
        &self,
        uid: &str,
        list: &MailingList,
        expected_revision: u64,
    ) -> BoxFuture<'_, DomainResult<u64>>;
    fn delete(&self, uid: &str, expected_revision: u64) -> BoxFuture<'_, DomainResult<()>>;
}

pub trait MemberStore: EntityLookup<Member> {
    fn create(&self, member: &Member) -> BoxFuture<'_, DomainResult<u64>>;
    fn get(&self, uid: &str) -> BoxFuture<'_, DomainResult<Option<Versioned<Member>>>>;
    fn update(
        &self,
        uid: &str,
        member: &Member,
        expected_revision: u64,
    ) -> BoxFuture<'_, DomainResult<u64>>;
    fn delete(&self, uid: &str, expected_revision: u64) -> BoxFuture<'_, DomainResult<()>>;
    fn count_by_list(&self, list_uid: &str) -> BoxFuture<'_, DomainResult<u64>>;
}

/// Atomic reservation of uniqueness-constraint keys. A held key means
/// some other writer owns the natural key.
pub trait ConstraintStore: Send + Sync {
    fn reserve(&self, key: &str) -> BoxFuture<'_, DomainResult<u64>>;
    fn revision_of(&self, key: &str) -> BoxFuture<'_, DomainResult<Option<u64>>>;
    fn release(&self, key: &str, revision: u64) -> BoxFuture<'_, DomainResult<()>>;
}
