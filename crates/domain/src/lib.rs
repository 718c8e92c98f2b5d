pub mod adoption;
pub mod entity;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod lists;
pub mod members;
pub mod ports;
pub mod reconcile;
pub mod rollback;
pub mod services;
pub mod sync;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
