use futures::future::BoxFuture;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};
use lapin::types::{AMQPValue, FieldTable};

use super::QueueError;
use crate::sync_service::types::Disposition;
use crate::worker::QueueDelivery;

const X_DEATH_HEADER: &str = "x-death";
const COUNT_FIELD: &str = "count";

/// Reads how often the broker has dead-lettered a message from its `x-death` header.
///
/// Uses the first (most recent) entry's `count`. Any missing or unexpected shape yields 0.
pub fn death_count(headers: Option<&FieldTable>) -> i64 {
    headers
        .and_then(|headers| lookup(headers, X_DEATH_HEADER))
        .and_then(|value| match value {
            AMQPValue::FieldArray(entries) => entries.as_slice().first(),
            _ => None,
        })
        .and_then(|entry| match entry {
            AMQPValue::FieldTable(table) => lookup(table, COUNT_FIELD),
            _ => None,
        })
        .and_then(as_integer)
        .unwrap_or(0)
}

fn lookup<'a>(table: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
    table
        .inner()
        .iter()
        .find(|(name, _)| name.as_str() == key)
        .map(|(_, value)| value)
}

fn as_integer(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::ShortShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongInt(v) => Some(i64::from(*v)),
        AMQPValue::LongUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongLongInt(v) => Some(*v),
        _ => None,
    }
}

impl QueueDelivery for Delivery {
    fn body(&self) -> &[u8] {
        &self.data
    }

    fn death_count(&self) -> i64 {
        death_count(self.properties.headers().as_ref())
    }

    fn settle(self, disposition: Disposition) -> BoxFuture<'static, Result<(), QueueError>> {
        let acker = self.acker;
        Box::pin(async move {
            match disposition {
                Disposition::Acknowledge => acker.ack(BasicAckOptions::default()).await?,
                Disposition::RequeueForRetry => {
                    acker
                        .nack(BasicNackOptions {
                            multiple: false,
                            requeue: true,
                        })
                        .await?
                }
                Disposition::RejectToDeadLetter => {
                    acker.reject(BasicRejectOptions { requeue: false }).await?
                }
            }
            Ok(())
        })
    }
}
