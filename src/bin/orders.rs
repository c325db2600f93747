use std::time::Duration;

use sluice::prelude::{
    Bytes, Consumer, ConsumerConfig, Error, MemoryTransport, Message, NewTopic, Producer,
    Transport,
};
use tokio::sync::mpsc;

const ORDERS: usize = 20;

#[tokio::main]
async fn main() -> Result<(), ()> {
    tracing_subscriber::fmt::init();

    let transport = MemoryTransport::connect("memory://orders").map_err(log)?;
    tracing::info!("Connected to {}", transport.config().url);

    let producer = transport
        .producer_builder()
        .linger(Duration::from_millis(10))
        .build()
        .map_err(log)?;
    producer
        .create_topic(&NewTopic::new("purchases", 3, 1).ensure_created(true))
        .await
        .map_err(log)?;

    for i in 0..ORDERS {
        let key = Bytes::from(format!("customer-{}", i % 4));
        let value = Bytes::from(format!("{{\"order\": {}}}", i));
        let metadata = producer
            .send_and_wait("purchases", Some(key), Some(value), None)
            .await
            .map_err(log)?;
        tracing::info!(
            "Stored order {} at {} offset {:?}",
            i,
            metadata.topic_partition,
            metadata.offset
        );
    }
    producer.close().await.map_err(log)?;

    let (seen, mut processed) = mpsc::unbounded_channel();
    let handler = move |message: Message| {
        let seen = seen.clone();
        async move {
            tracing::info!(
                "Processing {}@{} {:?}",
                message.topic_partition,
                message.offset,
                message.value
            );
            let _ = seen.send(message.offset);
            Ok::<(), Error>(())
        }
    };

    let mut config = ConsumerConfig::new("billing");
    config.commit_interval = Some(Duration::from_millis(500));
    let consumer = transport.create_consumer(handler, config).map_err(log)?;
    consumer.subscribe(&["purchases"]).await.map_err(log)?;
    consumer.start().await.map_err(log)?;

    for _ in 0..ORDERS {
        if processed.recv().await.is_none() {
            break;
        }
    }
    tracing::info!("Processed {} orders", ORDERS);

    consumer.close().await.map_err(log)?;
    Ok(())
}

fn log(err: Error) {
    tracing::error!("{:?}", err);
}
