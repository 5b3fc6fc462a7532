use shopra_logging::broker::Producer;
use shopra_logging::test_support::ScriptedBackend;
use shopra_logging::transport::{BrokerTransport, Delivery};
use shopra_logging::{BrokerClientConfig, LogEntry, LogLevel};
use shopra_logging::domain::RenderedEntry;
use std::time::Duration;

const RETRY_DELAY: Duration = Duration::from_millis(1000);

fn transport(backend: &ScriptedBackend, retry_attempts: u32) -> BrokerTransport {
    let client = BrokerClientConfig::parse("orders", "localhost:9092").unwrap();
    BrokerTransport::from_producer(
        Producer::new(backend, &client),
        "logs",
        retry_attempts,
        RETRY_DELAY,
    )
}

fn entry() -> RenderedEntry {
    RenderedEntry::new(LogEntry::new(LogLevel::Error, "orders", "payment failed"))
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_producer_gets_retry_attempts_plus_one_sends() {
    let backend = ScriptedBackend::always_failing();
    let transport = transport(&backend, 3);

    let delivery = transport.send(&entry()).await;

    assert_eq!(delivery, Delivery::Dropped { attempts: 4 });
    assert_eq!(backend.producer.sends(), 4);

    // Fixed delay between consecutive attempts.
    let times = backend.producer.send_times();
    for pair in times.windows(2) {
        assert_eq!(pair[1] - pair[0], RETRY_DELAY);
    }
}

#[tokio::test(start_paused = true)]
async fn test_fails_twice_then_succeeds_on_third_attempt() {
    let backend = ScriptedBackend::failing_first(2);
    let transport = transport(&backend, 3);

    let delivery = transport.send(&entry()).await;

    assert_eq!(delivery, Delivery::Delivered { attempts: 3 });
    assert_eq!(backend.producer.sends(), 3);
    assert_eq!(backend.producer.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_retry_attempts_means_single_send() {
    let backend = ScriptedBackend::always_failing();
    let transport = transport(&backend, 0);

    assert_eq!(
        transport.send(&entry()).await,
        Delivery::Dropped { attempts: 1 }
    );
    assert_eq!(backend.producer.sends(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_lazy_connect_counts_as_attempt() {
    let backend = ScriptedBackend::failing_first(0);
    backend.producer.set_fail_open(true);
    let transport = transport(&backend, 2);

    assert_eq!(
        transport.send(&entry()).await,
        Delivery::Dropped { attempts: 3 }
    );
    assert_eq!(backend.producer.opens(), 3);
    assert_eq!(backend.producer.sends(), 0);
}

#[tokio::test]
async fn test_message_carries_service_key_and_json_value() {
    let backend = ScriptedBackend::failing_first(0);
    let transport = transport(&backend, 0);
    let entry = entry();

    transport.send(&entry).await;

    let sent = backend.producer.sent();
    assert_eq!(sent.len(), 1);
    let (topic, message) = &sent[0];
    assert_eq!(topic, "logs");
    assert_eq!(message.key.as_deref(), Some("orders"));
    let value: serde_json::Value = serde_json::from_str(&message.value).unwrap();
    assert_eq!(value["level"], "error");
    assert_eq!(value["message"], "payment failed");
    assert_eq!(
        message.timestamp.as_deref(),
        Some(entry.entry.timestamp.timestamp_millis().to_string().as_str())
    );
}
