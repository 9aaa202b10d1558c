//! Durable Queue Tests
//!
//! ## Test Scopes
//! - **Leasing**: delivery counting, lease exclusivity, implicit nack on expiry.
//! - **Outcomes**: acknowledge, nack, extend, explicit dead-lettering.
//! - **Redrive**: retry budget exhaustion and retention expiry.
//! - **Batching**: cooperative waiting and batch sizing.
//!
//! Time-dependent tests run on a paused tokio clock.

#[cfg(test)]
mod tests {
    use crate::events::{ChangeEvent, EventType};
    use crate::quarantine::{Quarantine, QuarantineReason};
    use crate::queue::{DurableQueue, QueueError, QueueOptions};
    use std::sync::Arc;
    use std::time::Duration;

    fn queue_with(visibility_secs: u64, max_receive_count: u32) -> (Arc<DurableQueue>, Arc<Quarantine>) {
        let quarantine = Arc::new(Quarantine::new());
        let options = QueueOptions {
            visibility_timeout: Duration::from_secs(visibility_secs),
            max_receive_count,
            ..QueueOptions::default()
        };
        let queue = Arc::new(DurableQueue::new("documents", options, quarantine.clone()));
        (queue, quarantine)
    }

    fn doc(key: &str) -> ChangeEvent {
        ChangeEvent::new(key, EventType::Created)
    }

    // ============================================================
    // TEST 1: Leasing
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_lease_increments_delivery_count_and_hides_message() {
        // ARRANGE
        let (queue, _) = queue_with(5, 3);
        let id = queue.enqueue(&doc("doc/42.pdf")).unwrap();

        // ACT
        let batch = queue.try_lease(10);

        // ASSERT
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].0.id, id);
        assert_eq!(batch[0].0.delivery_count, 1);
        assert!(batch[0].0.visibility_deadline.is_some());
        assert!(queue.try_lease(10).is_empty(), "leased message must be hidden");
        assert_eq!(queue.stats().in_flight, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_redelivered_with_new_token() {
        // ARRANGE: lease and then let the job "hang" past the visibility timeout
        let (queue, _) = queue_with(5, 3);
        queue.enqueue(&doc("doc/42.pdf")).unwrap();
        let (_, first_token) = queue.try_lease(1).remove(0);

        // ACT
        tokio::time::advance(Duration::from_secs(6)).await;
        let batch = queue.try_lease(1);

        // ASSERT
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].0.delivery_count, 2);
        assert_eq!(
            queue.acknowledge(&first_token),
            Err(QueueError::StaleReceipt(first_token.message_id.clone()))
        );
        assert!(queue.acknowledge(&batch[0].1).is_ok());
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_after_deadline_is_rejected() {
        let (queue, _) = queue_with(5, 3);
        queue.enqueue(&doc("a")).unwrap();
        let (_, token) = queue.try_lease(1).remove(0);

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(
            queue.acknowledge(&token),
            Err(QueueError::LeaseExpired(token.message_id.clone()))
        );
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_valid_lease_across_concurrent_consumers() {
        // ARRANGE
        let (queue, _) = queue_with(30, 3);
        for i in 0..20 {
            queue.enqueue(&doc(&format!("doc/{}", i))).unwrap();
        }

        // ACT: several consumers race for the same pool
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.lease_batch(8, Duration::from_millis(10)).await
            }));
        }
        let mut seen = std::collections::HashSet::new();
        let mut total = 0;
        for handle in handles {
            for (message, _) in handle.await.unwrap() {
                total += 1;
                seen.insert(message.id);
            }
        }

        // ASSERT: every message leased exactly once
        assert_eq!(total, 20);
        assert_eq!(seen.len(), 20);
    }

    // ============================================================
    // TEST 2: Outcomes
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_nack_makes_message_immediately_available() {
        let (queue, _) = queue_with(300, 3);
        queue.enqueue(&doc("a")).unwrap();
        let (_, token) = queue.try_lease(1).remove(0);

        queue.nack(&token).unwrap();
        let batch = queue.try_lease(1);

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].0.delivery_count, 2);
        assert!(queue.nack(&token).is_err(), "old token cannot nack twice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_lease_keeps_message_hidden() {
        let (queue, _) = queue_with(5, 3);
        queue.enqueue(&doc("a")).unwrap();
        let (_, token) = queue.try_lease(1).remove(0);

        tokio::time::advance(Duration::from_secs(4)).await;
        queue.extend_lease(&token, Duration::from_secs(5)).unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        assert!(queue.try_lease(1).is_empty());
        assert!(queue.acknowledge(&token).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_expired_lease_fails() {
        let (queue, _) = queue_with(5, 3);
        queue.enqueue(&doc("a")).unwrap();
        let (_, token) = queue.try_lease(1).remove(0);

        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(matches!(
            queue.extend_lease(&token, Duration::from_secs(5)),
            Err(QueueError::LeaseExpired(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letter_moves_message_to_quarantine() {
        let (queue, quarantine) = queue_with(5, 3);
        let id = queue.enqueue(&doc("doc/42.pdf")).unwrap();
        let (_, token) = queue.try_lease(1).remove(0);

        queue
            .dead_letter(&token, QuarantineReason::Permanent, Some("bad pdf".into()))
            .unwrap();

        assert!(queue.is_empty());
        let record = quarantine.get(&id).unwrap();
        assert_eq!(record.failure_reason.label(), "permanent");
        assert_eq!(record.delivery_count_at_quarantine, 1);
        assert_eq!(record.detail.as_deref(), Some("bad pdf"));
        assert_eq!(queue.stats().dead_lettered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_unknown_message() {
        let (queue, _) = queue_with(5, 3);
        queue.enqueue(&doc("a")).unwrap();
        let (_, token) = queue.try_lease(1).remove(0);
        queue.acknowledge(&token).unwrap();

        assert!(matches!(
            queue.acknowledge(&token),
            Err(QueueError::UnknownMessage(_))
        ));
    }

    // ============================================================
    // TEST 3: Redrive
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_max_receive_count_three_quarantines_on_fourth_attempt() {
        // ARRANGE
        let (queue, quarantine) = queue_with(5, 3);
        let id = queue.enqueue(&doc("doc/flaky.pdf")).unwrap();

        // ACT: three failed deliveries
        for attempt in 1..=3 {
            let batch = queue.try_lease(1);
            assert_eq!(batch.len(), 1, "attempt {} should be delivered", attempt);
            assert_eq!(batch[0].0.delivery_count, attempt);
            queue.nack(&batch[0].1).unwrap();
        }

        // ASSERT: no fourth delivery, message is quarantined instead
        assert!(queue.try_lease(1).is_empty());
        assert!(queue.is_empty());
        let record = quarantine.get(&id).unwrap();
        assert_eq!(record.failure_reason, QuarantineReason::RetriesExhausted);
        assert_eq!(record.delivery_count_at_quarantine, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_expiry_is_quarantined_not_dropped() {
        let quarantine = Arc::new(Quarantine::new());
        let options = QueueOptions {
            visibility_timeout: Duration::from_secs(5),
            max_receive_count: 3,
            retention_period: Duration::from_secs(60),
        };
        let queue = DurableQueue::new("documents", options, quarantine.clone());
        let id = queue.enqueue(&doc("stale")).unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(queue.try_lease(1).is_empty());
        assert_eq!(
            quarantine.get(&id).unwrap().failure_reason,
            QuarantineReason::RetentionExpired
        );
    }

    // ============================================================
    // TEST 4: Batching
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_lease_batch_returns_after_max_wait_when_sparse() {
        let (queue, _) = queue_with(30, 3);
        queue.enqueue(&doc("only")).unwrap();

        let started = tokio::time::Instant::now();
        let batch = queue.lease_batch(10, Duration::from_secs(2)).await;

        assert_eq!(batch.len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_batch_returns_immediately_when_full() {
        let (queue, _) = queue_with(30, 3);
        for i in 0..5 {
            queue.enqueue(&doc(&format!("d{}", i))).unwrap();
        }

        let started = tokio::time::Instant::now();
        let batch = queue.lease_batch(3, Duration::from_secs(10)).await;

        assert_eq!(batch.len(), 3);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(queue.stats().available, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_batch_wakes_on_enqueue() {
        let (queue, _) = queue_with(30, 3);
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            producer.enqueue(&ChangeEvent::new("late", EventType::Updated)).unwrap();
        });

        let started = tokio::time::Instant::now();
        let batch = queue.lease_batch(1, Duration::from_secs(10)).await;

        assert_eq!(batch.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_batch_wakes_on_lease_expiry() {
        let (queue, _) = queue_with(3, 3);
        queue.enqueue(&doc("a")).unwrap();
        let _abandoned = queue.try_lease(1);

        let batch = queue.lease_batch(1, Duration::from_secs(20)).await;

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].0.delivery_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_size_one_leases_sequentially() {
        let (queue, _) = queue_with(30, 3);
        for i in 0..3 {
            queue.enqueue(&doc(&format!("d{}", i))).unwrap();
        }

        let mut order = Vec::new();
        for _ in 0..3 {
            let batch = queue.lease_batch(1, Duration::ZERO).await;
            assert_eq!(batch.len(), 1);
            order.push(batch[0].0.payload().unwrap().source_key);
            queue.acknowledge(&batch[0].1).unwrap();
        }

        assert_eq!(order, vec!["d0", "d1", "d2"]);
    }

    #[test]
    fn test_envelope_mirrors_delivery_count() {
        let quarantine = Arc::new(Quarantine::new());
        let queue = DurableQueue::new("q", QueueOptions::default(), quarantine);
        queue.enqueue(&doc("a")).unwrap();
        let (message, _) = queue.try_lease(1).remove(0);

        let envelope = serde_json::to_value(message.envelope()).unwrap();

        assert_eq!(envelope["attributes"]["approxReceiveCount"], 1);
        assert!(envelope["attributes"]["enqueuedAt"].is_string());
        assert!(envelope["body"].as_str().unwrap().contains("\"sourceKey\":\"a\""));
    }
}
