//! Event consumer with per-message retry and dead-letter routing
//!
//! Offsets are committed manually and only after a message is terminally
//! handled: handler success, a successful retry republish, or a successful
//! dead-letter publish. A crash before the commit therefore redelivers the
//! message (at-least-once), never the other way around. When a republish
//! itself fails the session is torn down and rebuilt from the last committed
//! offset; continuing past the message would let a later commit advance the
//! partition beyond it and lose it.
//!
//! A handler failure republishes the message to its original topic with the
//! `x-retry-count` header incremented; once the header reaches the
//! configured maximum the message goes to `<topic>-dead-letter` with the
//! original payload and headers plus `error-message` and `error-timestamp`
//! headers appended.
//!
//! Connection-level failures run their own bounded reconnect loop, separate
//! from per-message retry; exhausting it is fatal and surfaced to the
//! operator.

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::{AppError, Result};
use crate::metrics;

/// Application-defined retry counter header
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";
/// Suffix deriving a dead-letter topic from its source topic
pub const DEAD_LETTER_SUFFIX: &str = "-dead-letter";
const ERROR_MESSAGE_HEADER: &str = "error-message";
const ERROR_TIMESTAMP_HEADER: &str = "error-timestamp";

/// Consecutive `recv` failures tolerated before reconnecting
const MAX_CONSECUTIVE_RECV_ERRORS: u32 = 5;

pub fn dead_letter_topic(topic: &str) -> String {
    format!("{}{}", topic, DEAD_LETTER_SUFFIX)
}

/// A message as handed to topic handlers
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Original message key, kept so requeued copies land on the same
    /// partition as their source
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl ConsumedMessage {
    fn from_borrowed(message: &BorrowedMessage<'_>) -> Self {
        let mut headers = HashMap::new();
        if let Some(borrowed) = message.headers() {
            for header in borrowed.iter() {
                if let Some(value) = header.value {
                    headers.insert(
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
        }
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().unwrap_or_default().to_vec(),
            payload: message.payload().unwrap_or_default().to_vec(),
            headers,
        }
    }

    /// Prior retry attempts; a missing or unreadable header counts as zero
    pub fn retry_count(&self) -> u32 {
        self.headers
            .get(RETRY_COUNT_HEADER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

/// What to do with a message whose handler failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Republish to the original topic with this retry count
    Retry { next_count: u32 },
    /// Route to the dead-letter topic
    DeadLetter,
}

pub fn decide_retry(retry_count: u32, max_retries: u32) -> RetryDecision {
    if retry_count < max_retries {
        RetryDecision::Retry {
            next_count: retry_count + 1,
        }
    } else {
        RetryDecision::DeadLetter
    }
}

/// Original headers with the retry counter set to `next_count`
fn retry_headers(message: &ConsumedMessage, next_count: u32) -> HashMap<String, String> {
    let mut headers = message.headers.clone();
    headers.insert(RETRY_COUNT_HEADER.to_string(), next_count.to_string());
    headers
}

/// Original headers plus the error description appended
fn dead_letter_headers(message: &ConsumedMessage, error: &AppError) -> HashMap<String, String> {
    let mut headers = message.headers.clone();
    headers.insert(ERROR_MESSAGE_HEADER.to_string(), error.to_string());
    headers.insert(
        ERROR_TIMESTAMP_HEADER.to_string(),
        chrono::Utc::now().to_rfc3339(),
    );
    headers
}

fn to_owned_headers(headers: &HashMap<String, String>) -> OwnedHeaders {
    let mut owned = OwnedHeaders::new();
    for (key, value) in headers {
        owned = owned.insert(Header {
            key: key.as_str(),
            value: Some(value.as_bytes()),
        });
    }
    owned
}

/// Handler for one topic's messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ConsumedMessage) -> Result<()>;
}

/// Republish seam used when routing a failed message
#[async_trait]
trait Requeue: Send + Sync {
    async fn requeue(
        &self,
        topic: &str,
        message: &ConsumedMessage,
        headers: HashMap<String, String>,
    ) -> Result<()>;
}

/// How a failed message left the partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureRouting {
    Requeued { next_count: u32 },
    DeadLettered,
}

/// Route a message whose handler failed: requeue it with a bumped retry
/// counter, or dead-letter it once the budget is spent. An `Err` means the
/// message reached neither destination and its offset must stay uncommitted.
async fn route_failure(
    requeue: &dyn Requeue,
    message: &ConsumedMessage,
    error: &AppError,
    max_retries: u32,
) -> Result<FailureRouting> {
    match decide_retry(message.retry_count(), max_retries) {
        RetryDecision::Retry { next_count } => {
            warn!(
                topic = %message.topic,
                offset = message.offset,
                retry = next_count,
                error = %error,
                "Handler failed, requeueing message"
            );
            let headers = retry_headers(message, next_count);
            requeue.requeue(&message.topic, message, headers).await?;
            Ok(FailureRouting::Requeued { next_count })
        }
        RetryDecision::DeadLetter => {
            let dlq_topic = dead_letter_topic(&message.topic);
            error!(
                topic = %message.topic,
                offset = message.offset,
                dead_letter_topic = %dlq_topic,
                error = %error,
                "Retries exhausted, dead-lettering message"
            );
            let headers = dead_letter_headers(message, error);
            requeue.requeue(&dlq_topic, message, headers).await?;
            Ok(FailureRouting::DeadLettered)
        }
    }
}

enum LoopExit {
    Shutdown,
    ConnectionLost(String),
}

pub struct EventConsumer {
    config: KafkaConfig,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    producer: FutureProducer,
    send_timeout: Duration,
}

impl EventConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", config.request_timeout_ms.to_string())
            .create()?;

        Ok(Self {
            config: config.clone(),
            handlers: HashMap::new(),
            producer,
            send_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    /// Register the handler for a topic; the consumer subscribes to every
    /// registered topic when it connects.
    pub fn register_handler(&mut self, topic: &str, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(topic.to_string(), handler);
    }

    /// Consume until shutdown. Reconnects on connection loss with bounded
    /// exponential backoff; exhausting the budget returns the error so the
    /// operator is alerted instead of the consumer dying silently.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.handlers.is_empty() {
            warn!("Event consumer started with no registered handlers");
            return Ok(());
        }

        let mut connect_attempts: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let consumer = match self.connect() {
                Ok(consumer) => {
                    connect_attempts = 0;
                    consumer
                }
                Err(e) => {
                    connect_attempts += 1;
                    if connect_attempts >= self.config.consumer_max_connect_attempts {
                        error!(
                            attempts = connect_attempts,
                            error = %e,
                            "Consumer connection retries exhausted, giving up"
                        );
                        return Err(AppError::TransientBus(format!(
                            "Consumer failed to connect after {} attempts: {}",
                            connect_attempts, e
                        )));
                    }
                    let backoff = connect_backoff(connect_attempts);
                    warn!(
                        attempt = connect_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Consumer connection failed, retrying"
                    );
                    sleep(backoff).await;
                    continue;
                }
            };

            info!(
                topics = ?self.handlers.keys().collect::<Vec<_>>(),
                group_id = %self.config.group_id,
                "Consumer connected and subscribed"
            );

            match self.consume_loop(&consumer, &mut shutdown).await {
                LoopExit::Shutdown => {
                    info!("Consumer draining on shutdown signal");
                    return Ok(());
                }
                LoopExit::ConnectionLost(e) => {
                    connect_attempts += 1;
                    if connect_attempts >= self.config.consumer_max_connect_attempts {
                        error!(
                            attempts = connect_attempts,
                            error = %e,
                            "Consumer reconnection retries exhausted, giving up"
                        );
                        return Err(AppError::TransientBus(format!(
                            "Consumer lost connection after {} attempts: {}",
                            connect_attempts, e
                        )));
                    }
                    let backoff = connect_backoff(connect_attempts);
                    warn!(
                        attempt = connect_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Consumer connection lost, reconnecting"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    fn connect(&self) -> Result<StreamConsumer> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("client.id", &self.config.client_id)
            .set("group.id", &self.config.group_id)
            .set("auto.offset.reset", "latest")
            // offsets are committed only after a message is terminally handled
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "10000")
            .create()?;

        let topics: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        consumer.subscribe(&topics)?;
        Ok(consumer)
    }

    async fn consume_loop(
        &self,
        consumer: &StreamConsumer,
        shutdown: &mut watch::Receiver<bool>,
    ) -> LoopExit {
        let mut consecutive_errors: u32 = 0;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    return LoopExit::Shutdown;
                }
                received = consumer.recv() => {
                    match received {
                        Ok(message) => {
                            consecutive_errors = 0;
                            if let Err(e) = self.process_message(consumer, &message).await {
                                // The message was neither handled, requeued
                                // nor dead-lettered. Committing anything
                                // further on this partition would advance
                                // past it and lose it, so tear the session
                                // down; the reconnect resumes from the last
                                // committed offset and redelivers it.
                                return LoopExit::ConnectionLost(e.to_string());
                            }
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            if consecutive_errors >= MAX_CONSECUTIVE_RECV_ERRORS {
                                return LoopExit::ConnectionLost(e.to_string());
                            }
                            warn!(error = %e, "Consumer receive error");
                            sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
        }
    }

    /// Terminally handle one message. `Err` means the message could not be
    /// handled, requeued or dead-lettered; the caller must not let the
    /// partition advance past it.
    async fn process_message(
        &self,
        consumer: &StreamConsumer,
        borrowed: &BorrowedMessage<'_>,
    ) -> Result<()> {
        let message = ConsumedMessage::from_borrowed(borrowed);

        let Some(handler) = self.handlers.get(&message.topic) else {
            // Subscribed topics always have handlers; this only fires on a
            // stale assignment after a handler set change.
            warn!(topic = %message.topic, "No handler for topic, skipping message");
            self.commit(consumer, borrowed);
            return Ok(());
        };

        match handler.handle(&message).await {
            Ok(()) => {
                debug!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "Message handled"
                );
                self.commit(consumer, borrowed);
                Ok(())
            }
            Err(e) => {
                match route_failure(self, &message, &e, self.config.consumer_max_retries).await? {
                    FailureRouting::Requeued { .. } => {
                        metrics::CONSUMER_RETRIES_TOTAL.inc();
                    }
                    FailureRouting::DeadLettered => {
                        metrics::DEAD_LETTERED_TOTAL.inc();
                    }
                }
                self.commit(consumer, borrowed);
                Ok(())
            }
        }
    }

    async fn republish(
        &self,
        topic: &str,
        message: &ConsumedMessage,
        headers: HashMap<String, String>,
    ) -> Result<()> {
        let record = FutureRecord::to(topic)
            .key(&message.key)
            .payload(&message.payload)
            .headers(to_owned_headers(&headers));

        match self.producer.send(record, self.send_timeout).await {
            Ok(_) => Ok(()),
            Err((e, _)) => {
                error!(topic = %topic, error = %e, "Failed to republish message");
                Err(e.into())
            }
        }
    }

    fn commit(&self, consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
        if let Err(e) = consumer.commit_message(message, CommitMode::Async) {
            warn!(error = %e, "Failed to commit offset");
        }
    }
}

#[async_trait]
impl Requeue for EventConsumer {
    async fn requeue(
        &self,
        topic: &str,
        message: &ConsumedMessage,
        headers: HashMap<String, String>,
    ) -> Result<()> {
        self.republish(topic, message, headers).await
    }
}

fn connect_backoff(attempt: u32) -> Duration {
    let shift = attempt.min(6);
    Duration::from_millis(500 * (1_u64 << shift)).min(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_retry(count: Option<&str>) -> ConsumedMessage {
        let mut headers = HashMap::new();
        headers.insert("trace-id".to_string(), "abc".to_string());
        if let Some(value) = count {
            headers.insert(RETRY_COUNT_HEADER.to_string(), value.to_string());
        }
        ConsumedMessage {
            topic: "flight-data-ingested".to_string(),
            partition: 0,
            offset: 42,
            key: b"ticket-1".to_vec(),
            payload: b"{}".to_vec(),
            headers,
        }
    }

    #[test]
    fn missing_or_garbage_retry_header_counts_as_zero() {
        assert_eq!(message_with_retry(None).retry_count(), 0);
        assert_eq!(message_with_retry(Some("banana")).retry_count(), 0);
        assert_eq!(message_with_retry(Some("2")).retry_count(), 2);
    }

    #[test]
    fn dead_letter_after_max_retries_plus_one_attempts() {
        let max = 3;
        // attempts 1..=3 carry retry counts 0..=2 and are requeued
        assert_eq!(decide_retry(0, max), RetryDecision::Retry { next_count: 1 });
        assert_eq!(decide_retry(1, max), RetryDecision::Retry { next_count: 2 });
        assert_eq!(decide_retry(2, max), RetryDecision::Retry { next_count: 3 });
        // attempt 4 (retry count 3) is terminal
        assert_eq!(decide_retry(3, max), RetryDecision::DeadLetter);
        assert_eq!(decide_retry(7, max), RetryDecision::DeadLetter);
    }

    #[test]
    fn dead_letter_topic_is_derived_by_suffix() {
        assert_eq!(
            dead_letter_topic("flight-data-ingested"),
            "flight-data-ingested-dead-letter"
        );
    }

    #[test]
    fn retry_headers_preserve_originals_and_bump_the_counter() {
        let message = message_with_retry(Some("1"));
        let headers = retry_headers(&message, 2);
        assert_eq!(headers.get(RETRY_COUNT_HEADER).unwrap(), "2");
        assert_eq!(headers.get("trace-id").unwrap(), "abc");
    }

    #[test]
    fn dead_letter_headers_append_the_error() {
        let message = message_with_retry(Some("3"));
        let error = AppError::PermanentProcessing("handler blew up".to_string());
        let headers = dead_letter_headers(&message, &error);
        assert!(headers
            .get(ERROR_MESSAGE_HEADER)
            .unwrap()
            .contains("handler blew up"));
        assert!(headers.contains_key(ERROR_TIMESTAMP_HEADER));
        // originals survive
        assert_eq!(headers.get("trace-id").unwrap(), "abc");
        assert_eq!(headers.get(RETRY_COUNT_HEADER).unwrap(), "3");
    }

    struct FakeRequeue {
        fail: bool,
        calls: std::sync::Mutex<Vec<(String, HashMap<String, String>)>>,
    }

    impl FakeRequeue {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Requeue for FakeRequeue {
        async fn requeue(
            &self,
            topic: &str,
            _message: &ConsumedMessage,
            headers: HashMap<String, String>,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((topic.to_string(), headers));
            if self.fail {
                Err(AppError::TransientBus("broker unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn handler_failure_requeues_to_the_source_topic() {
        let requeue = FakeRequeue::new(false);
        let message = message_with_retry(Some("1"));
        let error = AppError::PermanentProcessing("handler blew up".to_string());

        let routing = route_failure(&requeue, &message, &error, 3).await.unwrap();

        assert_eq!(routing, FailureRouting::Requeued { next_count: 2 });
        let calls = requeue.calls.lock().unwrap();
        assert_eq!(calls[0].0, "flight-data-ingested");
        assert_eq!(calls[0].1.get(RETRY_COUNT_HEADER).unwrap(), "2");
    }

    #[tokio::test]
    async fn exhausted_message_routes_to_the_dead_letter_topic() {
        let requeue = FakeRequeue::new(false);
        let message = message_with_retry(Some("3"));
        let error = AppError::PermanentProcessing("handler blew up".to_string());

        let routing = route_failure(&requeue, &message, &error, 3).await.unwrap();

        assert_eq!(routing, FailureRouting::DeadLettered);
        let calls = requeue.calls.lock().unwrap();
        assert_eq!(calls[0].0, "flight-data-ingested-dead-letter");
        assert!(calls[0].1.contains_key(ERROR_MESSAGE_HEADER));
    }

    #[tokio::test]
    async fn failed_republish_surfaces_so_the_offset_stays_uncommitted() {
        // If this returned Ok the caller would commit and a later commit on
        // the same partition would advance past the message for good.
        let requeue = FakeRequeue::new(true);
        let message = message_with_retry(Some("0"));
        let error = AppError::PermanentProcessing("handler blew up".to_string());

        let result = route_failure(&requeue, &message, &error, 3).await;
        assert!(matches!(result, Err(AppError::TransientBus(_))));

        // same for the dead-letter leg
        let exhausted = message_with_retry(Some("3"));
        let result = route_failure(&requeue, &exhausted, &error, 3).await;
        assert!(matches!(result, Err(AppError::TransientBus(_))));
    }

    #[test]
    fn connect_backoff_grows_and_caps() {
        assert!(connect_backoff(1) < connect_backoff(2));
        assert!(connect_backoff(2) < connect_backoff(4));
        assert_eq!(connect_backoff(30), Duration::from_secs(30));
    }
}
