//! Idempotent consumption of outbox events.
//!
//! A consumer domain (for example `identity`) owns a
//! `{domain}_event_ledger` table and a [`HandlerRegistry`]. The
//! [`Dispatcher`] applies each delivered event in one transaction:
//!
//! 1. Look the event id up in the ledger. Present means a duplicate.
//! 2. Run the registered handler, which writes the read model.
//! 3. Insert the ledger row and commit.
//!
//! A handler error rolls back both the read-model writes and the ledger
//! row, so the event can be redelivered and retried. [`ConsumerLoop`] ties a
//! dispatcher to a [`StreamReader`](event_stream::StreamReader) and only
//! acknowledges entries that were fully handled.

mod consumer;
mod dispatcher;
mod error;
mod identity;
mod registry;

#[cfg(test)]
mod tests;

pub use consumer::{ConsumerConfig, ConsumerLoop, PollReport};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{DispatchError, DispatchResult, HandlerError};
pub use identity::{
    identity_registry, UserCreatedHandler, UserDisabledHandler, UserUpdatedHandler,
    IDENTITY_DOMAIN,
};
pub use registry::{EventHandler, HandlerRegistry};
