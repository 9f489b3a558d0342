use std::sync::Arc;

use changetrack::{ChangeTracker, Record, TrackingConfig};
use tokio::sync::Barrier;

#[derive(Record, Debug, Default, Clone)]
struct Counter {
    id: i64,
    label: String,
    hits: i64,
}

#[tokio::test]
async fn inspectors_observe_dirty_state_while_the_owner_writes() {
    let (tracker, _) = ChangeTracker::in_memory(TrackingConfig::new()).unwrap();
    let mut counter = tracker.track(Counter { id: 1, ..Counter::default() }).unwrap();
    let handle = counter.handle();
    let registry = Arc::clone(tracker.registry());
    let barrier = Arc::new(Barrier::new(2));

    let inspector = {
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            let change_set = registry.change_set_by_handle(handle).unwrap();
            change_set.dirty_fields()
        })
    };

    counter.set_hits(5);
    counter.set_label("busy".to_string());
    barrier.wait().await;

    let seen = inspector.await.unwrap();
    assert_eq!(
        seen.into_iter().collect::<Vec<_>>(),
        vec!["hits".to_string(), "label".to_string()]
    );
}

#[tokio::test]
async fn instances_on_separate_tasks_do_not_share_dirty_state() {
    let (tracker, sink) = ChangeTracker::in_memory(TrackingConfig::new()).unwrap();
    let tracker = Arc::new(tracker);
    let mut handles = vec![];

    for id in 0..16 {
        let tracker = Arc::clone(&tracker);
        let sink = Arc::clone(&sink);
        handles.push(tokio::spawn(async move {
            let stored = Counter {
                id,
                label: format!("counter-{}", id),
                hits: 0,
            };
            sink.seed(&stored).await.unwrap();

            let mut counter = tracker.track(stored).unwrap();
            for hit in 1..=10 {
                counter.set_hits(hit);
            }
            assert_eq!(counter.dirty_fields().len(), 1);
            assert!(tracker.persist_dirty(&counter).await.unwrap());
            assert!(!counter.is_dirty());
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(sink.attempts(), 16);
    assert!(tracker.registry().is_empty());
}
