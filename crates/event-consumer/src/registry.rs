//! Handler registry.
//!
//! A registry belongs to one consumer domain and maps event types to the
//! handlers that project them. Every handler runs inside the transaction
//! that also writes the domain's ledger row.

use crate::{DispatchError, DispatchResult, HandlerError};
use event_stream::EventEnvelope;
use outbox_database::rusqlite::Transaction;
use outbox_database::LedgerDomain;
use std::collections::HashMap;
use std::sync::Arc;

/// Applies one event to a read model.
///
/// Handlers must not commit or roll back `tx`; the dispatcher owns it.
pub trait EventHandler: Send + Sync {
    fn handle(&self, tx: &Transaction<'_>, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&Transaction<'_>, &EventEnvelope) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, tx: &Transaction<'_>, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        self(tx, envelope)
    }
}

/// Event type → handler map for one domain.
pub struct HandlerRegistry {
    domain: LedgerDomain,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new(domain: LedgerDomain) -> Self {
        Self {
            domain,
            handlers: HashMap::new(),
        }
    }

    pub fn domain(&self) -> &LedgerDomain {
        &self.domain
    }

    /// Register a handler. Fails if `event_type` already has one.
    pub fn register<H>(&mut self, event_type: impl Into<String>, handler: H) -> DispatchResult<()>
    where
        H: EventHandler + 'static,
    {
        let event_type = event_type.into();
        if self.handlers.contains_key(&event_type) {
            return Err(DispatchError::DuplicateHandler(event_type));
        }
        self.handlers.insert(event_type, Arc::new(handler));
        Ok(())
    }

    /// Register a closure handler.
    pub fn register_fn<F>(&mut self, event_type: impl Into<String>, handler: F) -> DispatchResult<()>
    where
        F: Fn(&Transaction<'_>, &EventEnvelope) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(event_type, handler)
    }

    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event_type)
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_tx: &Transaction<'_>, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
        Ok(())
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new(LedgerDomain::new("linting").unwrap());
        registry.register("user.updated.v1", noop).unwrap();
        registry.register("user.created.v1", noop).unwrap();

        assert_eq!(registry.domain().as_str(), "linting");
        assert_eq!(registry.len(), 2);
        assert!(registry.handles("user.created.v1"));
        assert!(registry.get("user.disabled.v1").is_none());
        assert_eq!(
            registry.event_types(),
            vec!["user.created.v1", "user.updated.v1"]
        );
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = HandlerRegistry::new(LedgerDomain::new("identity").unwrap());
        registry.register("user.created.v1", noop).unwrap();

        let err = registry
            .register_fn("user.created.v1", |_tx, _envelope| Ok(()))
            .unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateHandler(t) if t == "user.created.v1"));
        assert_eq!(registry.len(), 1);
    }
}
