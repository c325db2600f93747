use std::{panic::Location, path::Path, sync::Arc, time::Duration};

use sluice::prelude::{
    create_topic, BrokerClient, BrokerTransport, Consumer, Error, ExecutionContext, GroupConsumer,
    MemoryBroker, MemoryTransport, Message, NewTopic, ProduceRecord, TopicPartition,
    TransportConfig,
};
use tokio_stream::StreamExt;

/// Upper bound for anything a test waits on.
#[allow(dead_code)]
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A transport to a fresh broker named after the calling test file.
#[track_caller]
pub fn transport() -> Result<MemoryTransport, Error> {
    init_tracing();
    let name = broker_name(Location::caller().file());
    MemoryTransport::connect(&format!("memory://{}", name))
}

/// A transport to a broker configured by the test.
#[allow(dead_code)]
pub fn transport_with_broker(broker: MemoryBroker) -> Result<MemoryTransport, Error> {
    init_tracing();
    let url = format!("memory://{}", broker.name());
    BrokerTransport::new(
        Arc::new(broker),
        ExecutionContext::current()?,
        TransportConfig::new(url),
    )
}

fn broker_name(caller_path: &str) -> String {
    Path::new(caller_path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("test")
        .to_owned()
}

#[allow(dead_code)]
pub async fn ensure_topic(
    transport: &MemoryTransport,
    topic: &str,
    partitions: i32,
) -> Result<(), Error> {
    create_topic(
        transport.broker().as_ref(),
        &NewTopic::new(topic, partitions, 1).ensure_created(true),
    )
    .await
}

/// Append `values` to `tp` on the broker, returning the first offset.
#[allow(dead_code)]
pub async fn produce_values(
    transport: &MemoryTransport,
    tp: &TopicPartition,
    values: &[&str],
) -> Result<i64, Error> {
    let records = values
        .iter()
        .map(|value| ProduceRecord::new(tp.topic.as_str()).value(value.to_string()))
        .collect();
    transport.broker().produce(tp, records).await
}

/// A consumer driven by hand: no periodic commits, short fetch waits.
#[allow(dead_code)]
pub fn manual_consumer(
    transport: &MemoryTransport,
    group_id: &str,
) -> Result<GroupConsumer<MemoryBroker>, Error> {
    transport
        .consumer_builder(group_id)
        .commit_interval(None)
        .fetch_max_wait(Duration::from_millis(50))
        .retry_backoff(Duration::from_millis(10))
        .shutdown_timeout(Duration::from_secs(1))
        .build()
}

/// Everything one `getmany` call yields.
#[allow(dead_code)]
pub async fn getmany(
    consumer: &impl Consumer,
    partitions: &[TopicPartition],
    timeout: Duration,
) -> Result<Vec<(TopicPartition, Message)>, Error> {
    let mut stream = consumer.getmany(partitions, timeout);
    let mut messages = vec![];
    while let Some(message) = stream.next().await {
        messages.push(message?);
    }
    Ok(messages)
}

#[allow(dead_code)]
pub fn offsets(messages: &[(TopicPartition, Message)]) -> Vec<i64> {
    messages.iter().map(|(_, message)| message.offset).collect()
}

#[allow(dead_code)]
pub fn values(messages: &[(TopicPartition, Message)]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|(_, message)| message.value.as_ref())
        .map(|value| String::from_utf8_lossy(value).into_owned())
        .collect()
}

/// Poll `check` until it holds or [`WAIT`] runs out.
#[allow(dead_code)]
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
