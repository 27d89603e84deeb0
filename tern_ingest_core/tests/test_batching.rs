mod common;

use std::sync::Arc;

use bytesize::ByteSize;
use common::{TIMEOUT, TestSink, index, test_options};
use tern_ingest_core::{BatchId, BulkIngestor, IngestError, OPERATION_OVERHEAD_BYTES};

#[tokio::test]
async fn test_count_trigger_cuts_full_batches() {
    let sink = Arc::new(TestSink::new());
    let ingestor =
        BulkIngestor::new(sink.clone(), test_options().with_max_actions_per_batch(100)).unwrap();

    for i in 0..250 {
        ingestor.add(index("books", i, 10)).await.unwrap();
    }

    assert!(ingestor.wait_for_completion(TIMEOUT).await);
    assert_eq!(sink.batch_sizes(), vec![100, 100]);
    assert_eq!(ingestor.stats().queued_operations, 50);

    let flushed = ingestor.flush().await.unwrap();
    assert_eq!(flushed, vec![BatchId::new(3)]);
    assert!(ingestor.wait_for_completion(TIMEOUT).await);

    assert_eq!(sink.batch_sizes(), vec![100, 100, 50]);
    assert_eq!(sink.batch_ids(), vec![1, 2, 3]);

    let stats = ingestor.stats();
    assert_eq!(stats.counters.submitted, 250);
    assert_eq!(stats.counters.succeeded, 250);
    assert_eq!(stats.counters.total_bytes, 250 * (10 + OPERATION_OVERHEAD_BYTES));
    assert_eq!(stats.queued_operations, 0);
    assert_eq!(stats.queued_bytes, 0);
}

#[tokio::test]
async fn test_operation_order_is_preserved_within_batches() {
    let sink = Arc::new(TestSink::new());
    let ingestor =
        BulkIngestor::new(sink.clone(), test_options().with_max_actions_per_batch(7)).unwrap();

    for i in 0..30 {
        ingestor.add(index("books", i, 1)).await.unwrap();
    }
    ingestor.flush().await.unwrap();
    assert!(ingestor.wait_for_completion(TIMEOUT).await);

    let ids = sink
        .batches()
        .into_iter()
        .flat_map(|b| b.ids)
        .collect::<Vec<_>>();
    let expected = (0..30).map(|i| i.to_string()).collect::<Vec<_>>();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_volume_trigger_bounds_batch_size() {
    let max_volume = 1000;
    let sink = Arc::new(TestSink::new());
    let options = test_options()
        .with_max_actions_per_batch(1000)
        .with_max_volume_per_batch(ByteSize::b(max_volume));
    let ingestor = BulkIngestor::new(sink.clone(), options).unwrap();

    let payload_len = |i: usize| (i * 37) % 400;
    for i in 0..200 {
        ingestor.add(index("books", i, payload_len(i))).await.unwrap();
    }
    ingestor.flush().await.unwrap();
    assert!(ingestor.wait_for_completion(TIMEOUT).await);

    let batches = sink.batches();
    assert!(batches.len() > 1);
    for batch in batches.iter() {
        let last: usize = batch.ids.last().unwrap().parse().unwrap();
        let last_size = payload_len(last) as u64 + OPERATION_OVERHEAD_BYTES;
        // Only the operation that crossed the limit may push the batch over it.
        assert!(batch.bytes - last_size < max_volume);
    }
    assert_eq!(sink.operation_count(), 200);
}

#[tokio::test]
async fn test_volume_trigger_with_uniform_operations() {
    let sink = Arc::new(TestSink::new());
    let options = test_options().with_max_volume_per_batch(ByteSize::b(1000));
    let ingestor = BulkIngestor::new(sink.clone(), options).unwrap();

    // Every operation accounts for 200 bytes.
    for i in 0..23 {
        ingestor
            .add(index("books", i, 200 - OPERATION_OVERHEAD_BYTES as usize))
            .await
            .unwrap();
    }
    assert!(ingestor.wait_for_completion(TIMEOUT).await);

    assert_eq!(sink.batch_sizes(), vec![5, 5, 5, 5]);
    assert!(sink.batches().iter().all(|b| b.bytes == 1000));
    assert_eq!(ingestor.stats().queued_operations, 3);
    assert_eq!(ingestor.stats().queued_bytes, 600);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers() {
    let sink = Arc::new(TestSink::new());
    let ingestor =
        BulkIngestor::new(sink.clone(), test_options().with_max_actions_per_batch(64)).unwrap();

    let producers = (0..4)
        .map(|p| {
            let ingestor = ingestor.clone();
            tokio::spawn(async move {
                for i in 0..500 {
                    ingestor.add(index("books", p * 500 + i, 16)).await.unwrap();
                }
            })
        })
        .collect::<Vec<_>>();

    for producer in producers {
        producer.await.unwrap();
    }

    match ingestor.flush().await {
        Ok(_) => {}
        Err(IngestError::Validation { .. }) => {}
        Err(err) => panic!("unexpected flush error {err}"),
    }
    assert!(ingestor.wait_for_completion(TIMEOUT).await);

    let batches = sink.batches();
    assert!(batches.iter().all(|b| b.ids.len() <= 64));

    let mut ids = batches.into_iter().flat_map(|b| b.ids).collect::<Vec<_>>();
    assert_eq!(ids.len(), 2000);
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 2000);

    let batch_ids = sink.batch_ids();
    let mut unique = batch_ids.clone();
    unique.dedup();
    assert_eq!(batch_ids, unique);

    let counters = ingestor.stats().counters;
    assert_eq!(counters.submitted, 2000);
    assert_eq!(counters.succeeded, 2000);
    assert_eq!(counters.outstanding_docs, 0);
    assert_eq!(counters.outstanding_bytes, 0);
}
