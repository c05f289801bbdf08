// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Serialized, retrying publish access to the bus.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use super::{Headers, MessageBus};
use crate::error::{BusError, PublishError};

/// Default time to wait for the bus to confirm a publish.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upper bound of the random pause between busy retries.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(1);

/// Publishes messages on behalf of every device.
///
/// Publish attempts are serialized: only one attempt, including its wait for
/// confirmation, is in progress at any time. The retry policy favours fresh
/// data over completeness:
///
/// | Outcome                 | Action                                  |
/// |-------------------------|-----------------------------------------|
/// | confirmed               | done                                    |
/// | [`BusError::Busy`]      | sleep a random jitter, retry            |
/// | confirmation timeout    | give up, [`PublishError::ConfirmationTimeout`] |
/// | other transport failure | give up, [`PublishError::Rejected`]     |
///
/// Busy retries are unbounded; a reading that could not be confirmed is
/// never re-sent because it would be stale by then.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use platform_driver::protocol::{Headers, LocalBus, PublishGateway};
///
/// # async fn example() {
/// let bus = LocalBus::new();
/// let gateway = PublishGateway::new(Arc::new(bus.clone()));
///
/// let headers = Headers::new(chrono::Utc::now());
/// gateway
///     .publish("devices/campus/rtu1/all", &headers, &serde_json::json!([{}, {}]))
///     .await
///     .unwrap();
/// # }
/// ```
pub struct PublishGateway {
    bus: Arc<dyn MessageBus>,
    lock: Mutex<()>,
    confirm_timeout: Duration,
    max_jitter: Duration,
}

impl PublishGateway {
    /// Creates a gateway with the default timeout and jitter.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            lock: Mutex::new(()),
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Sets the confirmation timeout.
    #[must_use]
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    /// Sets the upper bound of the busy-retry jitter.
    #[must_use]
    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Returns the confirmation timeout.
    #[must_use]
    pub fn confirm_timeout(&self) -> Duration {
        self.confirm_timeout
    }

    /// Publishes a message, retrying while the bus reports it is busy.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::ConfirmationTimeout`] if the bus does not
    /// confirm in time, or [`PublishError::Rejected`] on a non-retryable
    /// bus error. Either way nothing further is attempted.
    pub async fn publish(
        &self,
        topic: &str,
        headers: &Headers,
        payload: &Value,
    ) -> Result<(), PublishError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = {
                let _guard = self.lock.lock().await;
                tracing::debug!(topic = %topic, attempt, "Publishing");
                tokio::time::timeout(
                    self.confirm_timeout,
                    self.bus.publish(topic, headers, payload),
                )
                .await
            };

            match outcome {
                Ok(Ok(())) => {
                    tracing::debug!(topic = %topic, "Finished publishing");
                    return Ok(());
                }
                Ok(Err(BusError::Busy)) => {
                    tracing::warn!(topic = %topic, attempt, "Publish delayed, bus is busy");
                    tokio::time::sleep(self.jitter()).await;
                }
                Ok(Err(source)) => {
                    tracing::warn!(topic = %topic, error = %source, "Failed to publish");
                    return Err(PublishError::Rejected {
                        topic: topic.to_string(),
                        source,
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        topic = %topic,
                        timeout = ?self.confirm_timeout,
                        "Did not receive confirmation of publish"
                    );
                    return Err(PublishError::ConfirmationTimeout {
                        topic: topic.to_string(),
                        timeout: self.confirm_timeout,
                    });
                }
            }
        }
    }

    fn jitter(&self) -> Duration {
        let scaled = self.max_jitter.as_secs_f64() * rand::random::<f64>();
        Duration::try_from_secs_f64(scaled).unwrap_or(self.max_jitter)
    }
}

impl fmt::Debug for PublishGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishGateway")
            .field("confirm_timeout", &self.confirm_timeout)
            .field("max_jitter", &self.max_jitter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;

    use super::*;

    /// Bus that replays a script of outcomes, then confirms everything.
    #[derive(Default)]
    struct ScriptedBus {
        script: SyncMutex<VecDeque<Option<BusError>>>,
        attempts: AtomicUsize,
    }

    impl ScriptedBus {
        /// `Some(err)` fails the attempt, `None` never confirms.
        fn new(script: Vec<Option<BusError>>) -> Self {
            Self {
                script: SyncMutex::new(script.into()),
                attempts: AtomicUsize::new(0),
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageBus for ScriptedBus {
        async fn publish(&self, _: &str, _: &Headers, _: &Value) -> Result<(), BusError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            match next {
                Some(Some(err)) => Err(err),
                Some(None) => std::future::pending().await,
                None => Ok(()),
            }
        }
    }

    fn headers() -> Headers {
        Headers::new(chrono::Utc::now())
    }

    #[tokio::test(start_paused = true)]
    async fn busy_is_retried_until_success() {
        let bus = Arc::new(ScriptedBus::new(vec![
            Some(BusError::Busy),
            Some(BusError::Busy),
            Some(BusError::Busy),
        ]));
        let gateway = PublishGateway::new(bus.clone());

        let result = gateway.publish("devices/a/all", &headers(), &Value::Null).await;

        assert!(result.is_ok());
        assert_eq!(bus.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_retries_stay_within_jitter_bound() {
        let bus = Arc::new(ScriptedBus::new(vec![Some(BusError::Busy); 5]));
        let gateway = PublishGateway::new(bus.clone());

        let start = tokio::time::Instant::now();
        gateway
            .publish("devices/a/all", &headers(), &Value::Null)
            .await
            .unwrap();

        assert!(start.elapsed() <= DEFAULT_MAX_JITTER * 5);
        assert_eq!(bus.attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_is_not_retried() {
        let bus = Arc::new(ScriptedBus::new(vec![Some(BusError::Transport(
            "connection reset".to_string(),
        ))]));
        let gateway = PublishGateway::new(bus.clone());

        let result = gateway.publish("devices/a/all", &headers(), &Value::Null).await;

        assert!(matches!(result, Err(PublishError::Rejected { .. })));
        assert_eq!(bus.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_timeout_is_not_retried() {
        let bus = Arc::new(ScriptedBus::new(vec![None]));
        let gateway = PublishGateway::new(bus.clone());

        let result = gateway.publish("devices/a/all", &headers(), &Value::Null).await;

        assert_eq!(
            result,
            Err(PublishError::ConfirmationTimeout {
                topic: "devices/a/all".to_string(),
                timeout: DEFAULT_CONFIRM_TIMEOUT,
            })
        );
        assert_eq!(bus.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_timeout_is_honored() {
        let bus = Arc::new(ScriptedBus::new(vec![None]));
        let gateway =
            PublishGateway::new(bus).with_confirm_timeout(Duration::from_millis(250));

        let start = tokio::time::Instant::now();
        let result = gateway.publish("t", &headers(), &Value::Null).await;

        assert!(result.is_err());
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(start.elapsed() < DEFAULT_CONFIRM_TIMEOUT);
    }

    #[test]
    fn jitter_stays_within_bound() {
        let gateway = PublishGateway::new(Arc::new(ScriptedBus::default()))
            .with_max_jitter(Duration::from_millis(500));
        for _ in 0..100 {
            assert!(gateway.jitter() <= Duration::from_millis(500));
        }
    }

    #[test]
    fn huge_jitter_bound_does_not_overflow() {
        let gateway =
            PublishGateway::new(Arc::new(ScriptedBus::default())).with_max_jitter(Duration::MAX);
        for _ in 0..100 {
            let _ = gateway.jitter();
        }
    }
}
