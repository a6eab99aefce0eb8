//! Identity domain: projects user events into `users_projection`.
//!
//! Rows are keyed by the envelope's `tenant_id` and `aggregate_id`.

use crate::{DispatchResult, HandlerError, HandlerRegistry};
use event_stream::EventEnvelope;
use outbox_database::rusqlite::Transaction;
use outbox_database::{
    queries, LedgerDomain, UserProjection, UserStatus, USER_CREATED, USER_DISABLED, USER_UPDATED,
};
use serde::Deserialize;
use tracing::{debug, warn};

pub const IDENTITY_DOMAIN: &str = "identity";

#[derive(Debug, Deserialize)]
struct UserPayload {
    email: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    status: Option<UserStatus>,
}

impl UserPayload {
    fn parse(envelope: &EventEnvelope) -> Result<Self, HandlerError> {
        Ok(serde_json::from_value(envelope.payload.clone())?)
    }

    fn into_projection(self, envelope: &EventEnvelope) -> UserProjection {
        UserProjection {
            tenant_id: envelope.tenant_id.clone(),
            user_id: envelope.aggregate_id.clone(),
            email: self.email,
            display_name: self.display_name,
            status: self.status.unwrap_or_default(),
            last_event_id: envelope.event_id.to_string(),
            updated_at: envelope.occurred_at,
        }
    }
}

/// `user.created.v1`: insert the user unless already present.
pub struct UserCreatedHandler;

impl crate::EventHandler for UserCreatedHandler {
    fn handle(&self, tx: &Transaction<'_>, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let user = UserPayload::parse(envelope)?.into_projection(envelope);
        if !queries::insert_user_if_absent(tx, &user)? {
            debug!(
                tenant_id = %user.tenant_id,
                user_id = %user.user_id,
                "User already projected, create ignored"
            );
        }
        Ok(())
    }
}

/// `user.updated.v1`: last writer wins on the key.
pub struct UserUpdatedHandler;

impl crate::EventHandler for UserUpdatedHandler {
    fn handle(&self, tx: &Transaction<'_>, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let user = UserPayload::parse(envelope)?.into_projection(envelope);
        queries::upsert_user(tx, &user)?;
        Ok(())
    }
}

/// `user.disabled.v1`: mark the user disabled. Rows are never deleted.
pub struct UserDisabledHandler;

impl crate::EventHandler for UserDisabledHandler {
    fn handle(&self, tx: &Transaction<'_>, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let found = queries::set_user_status(
            tx,
            &envelope.tenant_id,
            &envelope.aggregate_id,
            UserStatus::Disabled,
            &envelope.event_id.to_string(),
            envelope.occurred_at,
        )?;
        if !found {
            warn!(
                tenant_id = %envelope.tenant_id,
                user_id = %envelope.aggregate_id,
                event_id = %envelope.event_id,
                "Disable for unknown user ignored"
            );
        }
        Ok(())
    }
}

/// Registry for the identity domain with all three user handlers.
pub fn identity_registry() -> DispatchResult<HandlerRegistry> {
    let mut registry = HandlerRegistry::new(LedgerDomain::new(IDENTITY_DOMAIN)?);
    registry.register(USER_CREATED, UserCreatedHandler)?;
    registry.register(USER_UPDATED, UserUpdatedHandler)?;
    registry.register(USER_DISABLED, UserDisabledHandler)?;
    Ok(registry)
}
