//! RabbitMQ plumbing: the work queue, its delayed-retry dead-letter loop, and publishing.
//!
//! A rejected work message is routed through the fanout exchange into the retry queue, sits
//! there for [`RETRY_DELAY_MS`], then expires back onto the default exchange with its original
//! routing key, which lands it on the work queue again.

mod delivery;

use futures::future::BoxFuture;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use thiserror::Error;
use tracing::debug;

pub use delivery::death_count;

use crate::sync_service::types::WorkMessage;
use crate::sync_service::WorkPublisher;

pub const WORK_QUEUE: &str = "source-requests";
pub const RETRY_EXCHANGE: &str = "dlx-source-requests";
pub const RETRY_QUEUE: &str = "dlq-source-requests";
pub const RETRY_DELAY_MS: i32 = 60_000;

const JSON_CONTENT_TYPE: &str = "text/json";
const PERSISTENT_DELIVERY_MODE: u8 = 2;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("could not encode work message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub async fn connect(amqp_url: &str) -> Result<Connection, QueueError> {
    let connection = Connection::connect(amqp_url, ConnectionProperties::default()).await?;
    Ok(connection)
}

/// Work queue arguments: rejected messages go to the retry exchange.
pub fn work_queue_arguments() -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(RETRY_EXCHANGE.into()),
    );
    arguments
}

/// Retry queue arguments: messages expire after the delay and return via the default exchange.
pub fn retry_queue_arguments() -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString("".into()),
    );
    arguments.insert("x-message-ttl".into(), AMQPValue::LongInt(RETRY_DELAY_MS));
    arguments
}

fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    }
}

/// Declares exchange and queues idempotently on `channel`.
pub async fn declare_topology(channel: &Channel) -> Result<(), QueueError> {
    channel
        .exchange_declare(
            RETRY_EXCHANGE,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_declare(RETRY_QUEUE, durable_queue(), retry_queue_arguments())
        .await?;
    channel
        .queue_bind(
            RETRY_QUEUE,
            RETRY_EXCHANGE,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_declare(WORK_QUEUE, durable_queue(), work_queue_arguments())
        .await?;

    debug!(
        event = "queue_topology_declared",
        work_queue = WORK_QUEUE,
        retry_exchange = RETRY_EXCHANGE,
        retry_queue = RETRY_QUEUE,
        "declared work and retry topology"
    );
    Ok(())
}

/// Opens a dedicated channel, declares the topology and starts a manual-ack consumer with a
/// prefetch of one.
pub async fn open_consumer(
    connection: &Connection,
    consumer_tag: &str,
) -> Result<Consumer, QueueError> {
    let channel = connection.create_channel().await?;
    declare_topology(&channel).await?;
    channel.basic_qos(1, BasicQosOptions::default()).await?;
    let consumer = channel
        .basic_consume(
            WORK_QUEUE,
            consumer_tag,
            BasicConsumeOptions {
                no_ack: false,
                ..BasicConsumeOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(consumer)
}

/// Publishes work messages onto the work queue.
pub struct RepoRequestPublisher {
    channel: Channel,
}

impl RepoRequestPublisher {
    pub async fn new(connection: &Connection) -> Result<Self, QueueError> {
        let channel = connection.create_channel().await?;
        declare_topology(&channel).await?;
        Ok(Self { channel })
    }

    pub async fn push_repo_request(&self, message: &WorkMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(message)?;
        self.channel
            .basic_publish(
                "",
                WORK_QUEUE,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type(JSON_CONTENT_TYPE.into())
                    .with_delivery_mode(PERSISTENT_DELIVERY_MODE),
            )
            .await?
            .await?;

        debug!(
            event = "repo_request_published",
            owner = %message.owner,
            repo = %message.repo,
            "published repository work message"
        );
        Ok(())
    }
}

impl WorkPublisher for RepoRequestPublisher {
    fn publish<'a>(&'a self, message: &'a WorkMessage) -> BoxFuture<'a, Result<(), QueueError>> {
        Box::pin(self.push_repo_request(message))
    }
}
