//! Persistence collaborators: the repository and cache contracts the core
//! consumes, plus in-memory implementations for development and tests.

pub mod cache;
pub mod repository;

pub use cache::{Cache, InMemoryCache, SessionCache};
pub use repository::{InMemoryRepository, Repository};
