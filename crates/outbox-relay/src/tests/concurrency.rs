use super::harness::{t0, test_config, RelayHarness};
use crate::RelayConfig;
use chrono::Duration;
use event_stream::InMemoryStreamTransport;
use outbox_database::{queries, AsyncDatabase};
use std::collections::HashSet;
use tempfile::tempdir;

#[tokio::test]
async fn test_concurrent_relays_publish_each_event_once() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("outbox.db");
    let transport = InMemoryStreamTransport::new();

    // Separate handles mean separate SQLite connections and threads.
    let a = RelayHarness::on_database(
        AsyncDatabase::open(&path).await.unwrap(),
        transport.clone(),
        RelayConfig {
            relay_id: "relay-a".to_string(),
            batch_size: 7,
            ..test_config()
        },
    );
    let b = RelayHarness::on_database(
        AsyncDatabase::open(&path).await.unwrap(),
        transport.clone(),
        RelayConfig {
            relay_id: "relay-b".to_string(),
            batch_size: 7,
            ..test_config()
        },
    );

    let ids = a.insert_many(60).await;

    loop {
        let (ra, rb) = tokio::join!(a.relay.run_once_at(t0()), b.relay.run_once_at(t0()));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        if ra.is_empty() && rb.is_empty() {
            break;
        }
    }

    let published: Vec<_> = transport.envelopes().into_iter().map(|e| e.event_id).collect();
    let unique: HashSet<_> = published.iter().copied().collect();
    assert_eq!(published.len(), ids.len());
    assert_eq!(unique, ids.iter().copied().collect::<HashSet<_>>());

    let stats = a.db.call(|conn| queries::outbox_stats(conn)).await.unwrap();
    assert_eq!(stats.published, 60);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_crashed_relay_rows_are_reclaimed_after_lease() {
    let h = RelayHarness::new().await;
    let event_id = h.insert_user_created(1).await;

    // A relay claims the row and dies before finalising.
    let claimed = h
        .db
        .call(|conn| queries::claim_batch(conn, "relay-crashed", 10, t0(), Duration::seconds(300)))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    let during = h
        .relay
        .run_once_at(t0() + Duration::seconds(299))
        .await
        .unwrap();
    assert!(during.is_empty());

    let after = h
        .relay
        .run_once_at(t0() + Duration::seconds(300))
        .await
        .unwrap();
    assert_eq!(after.published, 1);

    let row = h.row(event_id).await;
    assert!(row.published);
    assert!(row.claimed_by.is_none());
}

#[tokio::test]
async fn test_published_row_survives_stale_finalise() {
    let h = RelayHarness::new().await;
    let event_id = h.insert_user_created(1).await;

    let stale = h
        .db
        .call(|conn| queries::claim_batch(conn, "relay-slow", 10, t0(), Duration::seconds(300)))
        .await
        .unwrap();

    // Lease expires, the harness relay takes over and publishes.
    h.relay
        .run_once_at(t0() + Duration::seconds(300))
        .await
        .unwrap();

    // The slow relay finally reports a failure; it must not undo the publish.
    let id = stale[0].id;
    let applied = h
        .db
        .call(move |conn| {
            queries::apply_outbox_updates(
                conn,
                "relay-slow",
                &[outbox_database::OutboxUpdate::RetryScheduled {
                    id,
                    attempts: 1,
                    next_attempt_at: t0(),
                    error_message: "late".to_string(),
                }],
            )
        })
        .await
        .unwrap();
    assert_eq!(applied, 0);
    assert!(h.row(event_id).await.published);
}
