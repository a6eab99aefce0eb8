//! Standalone query functions.
//!
//! Each function takes a `&Connection` (a `&Transaction` derefs to one) and
//! runs inside whatever unit of work the caller holds. The relay claim and
//! update functions take `&mut Connection` because they own their
//! transactions.

mod ledger;
mod outbox;
mod projection;

pub use ledger::{count_ledger_entries, ensure_ledger_table, find_ledger_entry, insert_ledger_entry};
pub use outbox::{
    apply_outbox_updates, claim_batch, count_backlog, count_outbox_events, get_outbox_event,
    list_outbox_events, outbox_stats,
};
pub use projection::{count_users, get_user, insert_user_if_absent, set_user_status, upsert_user};
