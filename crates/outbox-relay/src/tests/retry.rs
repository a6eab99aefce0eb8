use super::harness::{t0, test_config, RelayHarness};
use crate::RelayConfig;
use chrono::Duration;

#[tokio::test]
async fn test_failed_publish_schedules_backoff() {
    let h = RelayHarness::new().await;
    let event_id = h.insert_user_created(1).await;
    h.transport.set_fail_publish(true);

    let report = h.relay.run_once_at(t0()).await.unwrap();
    assert_eq!(report.retry_scheduled, 1);

    let row = h.row(event_id).await;
    assert!(!row.published);
    assert_eq!(row.attempts, 1);
    assert_eq!(row.next_attempt_at, Some(t0() + Duration::seconds(60)));
    assert!(row
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("injected publish failure")));

    let early = h.relay.run_once_at(t0() + Duration::seconds(59)).await.unwrap();
    assert!(early.is_empty());

    let due = h.relay.run_once_at(t0() + Duration::seconds(60)).await.unwrap();
    assert_eq!(due.retry_scheduled, 1);
    let row = h.row(event_id).await;
    assert_eq!(row.attempts, 2);
    assert_eq!(
        row.next_attempt_at,
        Some(t0() + Duration::seconds(60) + Duration::seconds(120))
    );
}

#[tokio::test]
async fn test_always_failing_publish_backs_off_then_dead_letters_once() {
    let h = RelayHarness::new().await;
    let event_id = h.insert_user_created(1).await;
    h.transport.set_fail_publish(true);

    let mut now = t0();
    let mut delays = Vec::new();
    for expected_attempts in 1..=4u32 {
        h.relay.run_once_at(now).await.unwrap();
        let row = h.row(event_id).await;
        assert_eq!(row.attempts, expected_attempts);
        assert!(!row.published);

        let next = row.next_attempt_at.unwrap();
        assert!(next > now);
        delays.push(next - now);
        now = next;
    }
    assert_eq!(
        delays,
        vec![
            Duration::seconds(60),
            Duration::seconds(120),
            Duration::seconds(240),
            Duration::seconds(480)
        ]
    );
    assert!(h.transport.dlq_entries().is_empty());

    let report = h.relay.run_once_at(now).await.unwrap();
    assert_eq!(report.dead_lettered, 1);

    let row = h.row(event_id).await;
    assert!(row.published);
    assert!(row.dead_lettered);
    assert_eq!(row.attempts, 5);

    let dlq = h.transport.dlq_records();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].original_event_id, event_id);
    assert_eq!(dlq[0].attempts, 5);
    assert_eq!(dlq[0].failed_at, now);
    assert_eq!(dlq[0].created_at, row.created_at);

    // Terminal: later cycles neither republish nor dead-letter again.
    for offset in [0, 3600, 86_400 * 30] {
        assert!(h
            .relay
            .run_once_at(now + Duration::seconds(offset))
            .await
            .unwrap()
            .is_empty());
    }
    assert_eq!(h.transport.dlq_entries().len(), 1);
    assert_eq!(h.transport.publish_calls(), 5);
    assert_eq!(h.metrics.snapshot().events_dlq_total.get("user"), Some(&1));
}

#[tokio::test]
async fn test_two_attempt_budget_dead_letters_after_two_cycles() {
    let h = RelayHarness::with_config(RelayConfig {
        max_retry_attempts: 2,
        ..test_config()
    })
    .await;
    let event_id = h.insert_user_created(1).await;
    h.transport.set_fail_publish(true);

    h.relay.run_once_at(t0()).await.unwrap();
    let next = h.row(event_id).await.next_attempt_at.unwrap();
    h.relay.run_once_at(next).await.unwrap();

    let row = h.row(event_id).await;
    assert!(row.published);
    assert_eq!(row.attempts, 2);

    let dlq = h.transport.dlq_records();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].attempts, 2);
    assert_eq!(dlq[0].event_type, "user.created.v1");
    assert!(h.transport.entries().is_empty());

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.publish_failure_total, 2);
    assert_eq!(snapshot.success_rate, 0.0);
}

#[tokio::test]
async fn test_dlq_append_failure_retries_only_the_dlq_step() {
    let config = RelayConfig {
        max_retry_attempts: 2,
        ..test_config()
    };
    let poll = Duration::from_std(config.poll_interval).unwrap();
    let h = RelayHarness::with_config(config).await;
    let event_id = h.insert_user_created(1).await;
    h.transport.set_fail_publish(true);
    h.transport.set_fail_dlq(true);

    h.relay.run_once_at(t0()).await.unwrap();
    let now = h.row(event_id).await.next_attempt_at.unwrap();

    let report = h.relay.run_once_at(now).await.unwrap();
    assert_eq!(report.dead_letter_pending, 1);

    let row = h.row(event_id).await;
    assert!(!row.published);
    assert!(!row.dead_lettered);
    assert_eq!(row.attempts, 2);
    assert_eq!(row.next_attempt_at, Some(now + poll));
    assert_eq!(h.transport.publish_calls(), 2);

    // DLQ still down: attempts are not bumped again and nothing is republished.
    h.relay.run_once_at(now + poll).await.unwrap();
    let row = h.row(event_id).await;
    assert_eq!(row.attempts, 2);
    assert!(!row.published);
    assert_eq!(h.transport.publish_calls(), 2);
    assert_eq!(h.transport.dlq_calls(), 2);

    h.transport.set_fail_dlq(false);
    let later = now + poll + poll;
    let report = h.relay.run_once_at(later).await.unwrap();
    assert_eq!(report.dead_lettered, 1);

    let row = h.row(event_id).await;
    assert!(row.published);
    assert!(row.dead_lettered);
    assert_eq!(row.attempts, 2);
    assert_eq!(h.transport.publish_calls(), 2);

    let dlq = h.transport.dlq_records();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].attempts, 2);
    assert!(dlq[0].error_message.contains("injected publish failure"));

    let errors = h.metrics.snapshot().recent_errors;
    assert!(errors.iter().any(|e| e.source == "dlq"));
}

#[tokio::test]
async fn test_recovered_transport_publishes_on_retry() {
    let h = RelayHarness::new().await;
    let event_id = h.insert_user_created(1).await;
    h.transport.fail_next_publishes(1);

    h.relay.run_once_at(t0()).await.unwrap();
    h.relay
        .run_once_at(t0() + Duration::seconds(60))
        .await
        .unwrap();

    let row = h.row(event_id).await;
    assert!(row.published);
    assert_eq!(row.attempts, 1);
    assert_eq!(h.transport.entries().len(), 1);
    assert!(h.transport.dlq_entries().is_empty());
    assert_eq!(h.metrics.snapshot().success_rate, 50.0);
}

#[tokio::test]
async fn test_one_failure_does_not_block_the_batch() {
    let h = RelayHarness::new().await;
    let ids = h.insert_many(3).await;
    h.transport.fail_next_publishes(1);

    let report = h.relay.run_once_at(t0()).await.unwrap();
    assert_eq!(report.claimed, 3);
    assert_eq!(report.retry_scheduled, 1);
    assert_eq!(report.published, 2);

    assert!(!h.row(ids[0]).await.published);
    assert!(h.row(ids[1]).await.published);
    assert!(h.row(ids[2]).await.published);
}
