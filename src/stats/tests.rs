use super::*;
use crate::database::sqlite::models::{ImportOperationUpdate, ImportStatus};
use std::sync::atomic::AtomicUsize;
use tempfile::TempDir;

async fn attached_aggregator() -> (TempDir, Database, StatisticsAggregator) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::initialize_from_data_dir(temp_dir.path())
        .await
        .expect("should open database");
    let aggregator = StatisticsAggregator::new(ImportSettings::default());
    aggregator.attach(database.clone());
    (temp_dir, database, aggregator)
}

fn counting_listener(
    counter: &Arc<AtomicUsize>,
) -> impl Fn(&VectorDbStatistics) -> anyhow::Result<()> + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn unattached_aggregator_is_not_initialized() {
    let aggregator = StatisticsAggregator::new(ImportSettings::default());
    assert!(matches!(
        aggregator.get_statistics().await,
        Err(VaultError::NotInitialized)
    ));
}

#[tokio::test]
async fn snapshot_of_empty_store() {
    let (_temp_dir, _database, aggregator) = attached_aggregator().await;

    let statistics = aggregator
        .get_statistics()
        .await
        .expect("should collect statistics");
    assert!(statistics.current_operation.is_none());
    assert!(statistics.recent_operations.is_empty());
    assert_eq!(statistics.database_stats.total_documents, 0);
    assert_eq!(statistics.import_settings, ImportSettings::default());
}

#[tokio::test]
async fn snapshot_lists_five_most_recent_runs() {
    let (_temp_dir, database, aggregator) = attached_aggregator().await;

    for _ in 0..7 {
        let operation = database
            .start_import(None)
            .await
            .expect("should start import");
        database
            .finish_import(
                operation.id,
                &ImportOperationUpdate {
                    status: ImportStatus::Completed,
                    files_processed: 1,
                    files_failed: 0,
                    total_processing_time: 1,
                    error_details: None,
                },
            )
            .await
            .expect("should finish import");
    }
    let running = database
        .start_import(None)
        .await
        .expect("should start import");

    let statistics = aggregator
        .get_statistics()
        .await
        .expect("should collect statistics");
    assert_eq!(statistics.recent_operations.len(), 5);
    assert_eq!(
        statistics.current_operation.map(|op| op.id),
        Some(running.id)
    );
    for pair in statistics.recent_operations.windows(2) {
        assert!(pair[0].started_at >= pair[1].started_at);
        assert!(pair[0].id > pair[1].id);
    }
}

#[tokio::test]
async fn failing_listeners_do_not_stop_others() {
    let (_temp_dir, _database, aggregator) = attached_aggregator().await;
    let counter = Arc::new(AtomicUsize::new(0));

    let _first = aggregator.on_update(counting_listener(&counter));
    let _failing = aggregator.on_update(|_| Err(anyhow::anyhow!("listener exploded")));
    let _panicking = aggregator.on_update(|_| panic!("listener panicked"));
    let _last = aggregator.on_update(counting_listener(&counter));

    let delivered = aggregator.notify().await;
    assert_eq!(delivered, 2);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn disposed_listeners_are_not_called() {
    let (_temp_dir, _database, aggregator) = attached_aggregator().await;
    let counter = Arc::new(AtomicUsize::new(0));

    let subscription = aggregator.on_update(counting_listener(&counter));
    assert_eq!(aggregator.listener_count(), 1);
    assert!(subscription.dispose());
    assert_eq!(aggregator.listener_count(), 0);

    {
        let _scoped = aggregator.on_update(counting_listener(&counter));
        assert_eq!(aggregator.listener_count(), 1);
    }
    assert_eq!(aggregator.listener_count(), 0);

    assert_eq!(aggregator.notify().await, 0);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn listeners_receive_current_snapshot() {
    let (_temp_dir, database, aggregator) = attached_aggregator().await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let _subscription = aggregator.on_update(move |statistics| {
        sink.lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .push(statistics.current_operation.is_some());
        Ok(())
    });

    aggregator.notify().await;
    database
        .start_import(None)
        .await
        .expect("should start import");
    aggregator.notify().await;

    let seen = seen.lock().expect("should lock");
    assert_eq!(*seen, vec![false, true]);
}

#[tokio::test]
async fn notification_after_close_is_skipped() {
    let (_temp_dir, database, aggregator) = attached_aggregator().await;
    let counter = Arc::new(AtomicUsize::new(0));
    let _subscription = aggregator.on_update(counting_listener(&counter));

    database.close().await;
    assert_eq!(aggregator.notify().await, 0);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[test]
fn subscription_outliving_aggregator_disposes_cleanly() {
    let aggregator = StatisticsAggregator::new(ImportSettings::default());
    let subscription = aggregator.on_update(|_| Ok(()));
    drop(aggregator);
    assert!(!subscription.dispose());
}
