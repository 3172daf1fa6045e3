pub mod auth;
pub mod documents;
pub mod error;
pub mod events;
pub mod identity;
pub mod jobs;
pub mod mentions;
pub mod moderation;
pub mod participants;
pub mod ports;
pub mod retention;
pub mod session;
pub mod store;
pub mod triggers;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub type DomainResult<T> = Result<T, error::DomainError>;
