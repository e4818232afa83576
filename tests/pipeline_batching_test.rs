use bytes::Bytes;
use meter_ingest::sender::BatchSerializer;
use meter_ingest::{MeterEvent, MeteringPipeline, PipelineConfig, Transport, TransportError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Decodes every payload back into events and keeps them per batch.
#[derive(Default)]
struct RecordingTransport {
    batches: Mutex<Vec<Vec<MeterEvent>>>,
}

impl RecordingTransport {
    fn batches(&self) -> Vec<Vec<MeterEvent>> {
        self.batches.lock().clone()
    }

    fn sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(Vec::len).collect()
    }
}

impl Transport for RecordingTransport {
    async fn send(&self, payload: Bytes) -> Result<Bytes, TransportError> {
        let events = BatchSerializer::new()
            .deserialize(&payload)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        self.batches.lock().push(events);
        Ok(Bytes::from_static(b"{}"))
    }
}

fn event(customer: &str, value: f64) -> MeterEvent {
    MeterEvent::new("api-calls", customer, value, 1_700_000_000_000)
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_size_threshold_dispatches_immediately_and_holds_remainder() {
    let transport = Arc::new(RecordingTransport::default());
    let config = PipelineConfig::new()
        .with_batch_size(3)
        .with_flush_interval(Duration::from_secs(3600));
    let pipeline = MeteringPipeline::with_transport(transport.clone(), config).unwrap();

    for (n, customer) in ["e1", "e2", "e3", "e4"].iter().enumerate() {
        pipeline.meter(event(customer, n as f64)).await.unwrap();
    }
    settle().await;

    let batches = transport.batches();
    assert_eq!(batches.len(), 1, "only the full batch should be out");
    let customers: Vec<&str> = batches[0].iter().map(|e| e.customer_id.as_str()).collect();
    assert_eq!(customers, vec!["e1", "e2", "e3"]);

    pipeline.shutdown().await.unwrap();

    let batches = transport.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].len(), 1);
    assert_eq!(batches[1][0].customer_id, "e4");
}

#[tokio::test(start_paused = true)]
async fn test_timer_flushes_single_event_within_one_interval() {
    let transport = Arc::new(RecordingTransport::default());
    let config = PipelineConfig::new()
        .with_batch_size(100)
        .with_flush_interval(Duration::from_millis(100));
    let pipeline = MeteringPipeline::with_transport(transport.clone(), config).unwrap();

    pipeline.meter(event("solo", 1.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    settle().await;
    assert!(transport.sizes().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    settle().await;
    assert_eq!(transport.sizes(), vec![1]);

    pipeline.shutdown().await.unwrap();
    assert_eq!(transport.sizes(), vec![1], "drain must not resend");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_accepted_event_lands_in_exactly_one_batch() {
    let transport = Arc::new(RecordingTransport::default());
    let config = PipelineConfig::new()
        .with_batch_size(7)
        .with_flush_interval(Duration::from_millis(5));
    let pipeline = MeteringPipeline::with_transport(transport.clone(), config).unwrap();

    let mut producers = Vec::new();
    for producer in 0..10 {
        let pipeline = pipeline.clone();
        producers.push(tokio::spawn(async move {
            for n in 0..57 {
                let unique = format!("p{producer}-{n}");
                pipeline
                    .meter(event("bulk", n as f64).with_unique_id(unique))
                    .await
                    .unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    pipeline.shutdown().await.unwrap();

    let batches = transport.batches();
    assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 7));

    let ids: Vec<String> = batches.into_iter().flatten().map(|e| e.unique_id).collect();
    let distinct: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), 570);
    assert_eq!(distinct.len(), 570);

    let stats = pipeline.stats();
    assert_eq!(stats.events_accepted, 570);
    assert_eq!(stats.events_delivered, 570);
    assert_eq!(stats.events_dropped, 0);
}

#[tokio::test]
async fn test_batch_preserves_insertion_order_and_fields() {
    let transport = Arc::new(RecordingTransport::default());
    let pipeline =
        MeteringPipeline::with_transport(transport.clone(), PipelineConfig::new().with_batch_size(4))
            .unwrap();

    let sent: Vec<MeterEvent> = (0..4)
        .map(|n| event(&format!("c{n}"), f64::from(n) * 1.5).with_dimension("region", "eu"))
        .collect();
    for e in sent.clone() {
        pipeline.meter(e).await.unwrap();
    }
    pipeline.shutdown().await.unwrap();

    let received = transport.batches().concat();
    assert_eq!(received.len(), sent.len());
    for (got, want) in received.iter().zip(&sent) {
        assert_eq!(got.customer_id, want.customer_id);
        assert_eq!(got.meter_value, want.meter_value);
        assert_eq!(got.meter_api_name, want.meter_api_name);
        assert_eq!(got.dimensions, want.dimensions);
    }
}

#[tokio::test]
async fn test_enqueue_metadata_is_stamped_once() {
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = MeteringPipeline::with_transport(transport.clone(), PipelineConfig::new()).unwrap();

    let mut preset = event("preset", 1.0).with_unique_id("caller-key");
    assert!(preset.set_message_id("preset-message"));
    assert!(preset.set_enqueued_at("2024-01-01T00:00:00+0000"));
    assert!(!preset.set_message_id("ignored"));

    pipeline.meter(preset).await.unwrap();
    pipeline.meter(event("fresh", 2.0).with_unique_id("   ")).await.unwrap();
    pipeline.shutdown().await.unwrap();

    let received = transport.batches().concat();
    assert_eq!(received.len(), 2);

    assert_eq!(received[0].unique_id, "caller-key");
    assert_eq!(received[0].message_id(), Some("preset-message"));
    assert_eq!(received[0].enqueued_at(), Some("2024-01-01T00:00:00+0000"));

    assert!(uuid::Uuid::parse_str(&received[1].unique_id).is_ok());
    assert!(received[1].message_id().is_some());
    assert!(received[1].enqueued_at().is_some_and(|t| t.ends_with("+0000")));
}
