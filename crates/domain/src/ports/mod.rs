use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod directory;
pub mod events;
pub mod index;
pub mod project;
pub mod store;
