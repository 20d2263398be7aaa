//! Topic subscription lifecycle
//!
//! One background task owns the outbound subscription: it waits for the
//! local server to be ready, then issues exactly one subscribe call
//! advertising the tunnel's public URL as the callback endpoint. The
//! confirmation handshake later records a [`SubscriptionHandle`] in the
//! [`SubscriptionStore`]; the shutdown sequence drains the store and
//! unsubscribes at most once.

use snsbridge_sns::{SnsClient, SnsError, TopicArn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("server exited before becoming ready")]
    ServerExited,

    #[error("subscribe call failed: {0}")]
    Subscribe(#[from] SnsError),
}

/// Credential recorded after a successful confirmation handshake, consumed
/// exactly once to unsubscribe at shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub subscription_arn: String,
    pub topic_arn: String,
}

/// Process-wide slot for the at-most-one active subscription handle.
///
/// Written by the notification route when a confirmation arrives, drained
/// by the shutdown sequence. Draining an empty store is a no-op, which is
/// what makes shutdown idempotent.
#[derive(Clone, Default)]
pub struct SubscriptionStore {
    inner: Arc<Mutex<Option<SubscriptionHandle>>>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a handle. If one is already present it is kept and the new
    /// one discarded, so a duplicate confirmation cannot clobber the
    /// credential the shutdown hook will use.
    pub fn record(&self, handle: SubscriptionHandle) {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            Some(existing) => {
                warn!(
                    "Subscription handle already recorded ({}); ignoring duplicate {}",
                    existing.subscription_arn,
                    handle.subscription_arn
                );
            }
            None => *slot = Some(handle),
        }
    }

    /// Take the handle out, leaving the store empty.
    pub fn take(&self) -> Option<SubscriptionHandle> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_recorded(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Lifecycle states of the subscription, logged as the manager progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    AwaitingReady,
    Subscribing,
    Subscribed,
    Unsubscribing,
    Closed,
}

/// Static configuration for the subscription task.
pub struct SubscriptionConfig {
    pub topic: TopicArn,
    /// Public callback endpoint advertised to the provider.
    pub callback_endpoint: String,
    /// Local health endpoint used to verify the server accepts traffic.
    pub health_url: String,
    /// Delay between readiness probes.
    pub poll_interval: Duration,
}

/// Background task that requests the topic subscription once the local
/// server is reachable.
pub struct SubscriptionManager {
    config: SubscriptionConfig,
    sns: Arc<SnsClient>,
    http: reqwest::Client,
    ready: watch::Receiver<bool>,
    state: ManagerState,
}

impl SubscriptionManager {
    pub fn new(
        config: SubscriptionConfig,
        sns: Arc<SnsClient>,
        http: reqwest::Client,
        ready: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            sns,
            http,
            ready,
            state: ManagerState::Idle,
        }
    }

    fn transition(&mut self, next: ManagerState) {
        debug!("Subscription manager: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Drive the subscription to `Subscribed` and return the subscription
    /// ARN reported by the service. The task's lifecycle ends here;
    /// confirmation and unsubscription are driven elsewhere.
    pub async fn run(mut self) -> Result<String, SubscribeError> {
        info!("Subscription task started");

        self.transition(ManagerState::AwaitingReady);
        self.await_ready().await?;

        self.transition(ManagerState::Subscribing);
        info!("Subscribing to {}", self.config.topic);
        let subscription_arn = self
            .sns
            .subscribe(&self.config.topic, "https", &self.config.callback_endpoint)
            .await?;
        info!("Subscribed successfully to {}", self.config.topic);

        self.transition(ManagerState::Subscribed);
        Ok(subscription_arn)
    }

    /// Wait for the in-process readiness signal, then verify over HTTP that
    /// the health endpoint answers. Connection failures mean "not ready
    /// yet" and are retried, never treated as errors.
    async fn await_ready(&mut self) -> Result<(), SubscribeError> {
        while !*self.ready.borrow() {
            if self.ready.changed().await.is_err() {
                // Sender dropped without ever signalling: the server died
                // during startup and the callback endpoint will never work.
                return Err(SubscribeError::ServerExited);
            }
        }
        wait_until_healthy(&self.http, &self.config.health_url, self.config.poll_interval).await;
        Ok(())
    }
}

/// Poll `health_url` until it answers with a success status.
pub async fn wait_until_healthy(http: &reqwest::Client, health_url: &str, interval: Duration) {
    loop {
        match http.get(health_url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Health endpoint {} is up", health_url);
                return;
            }
            Ok(response) => {
                debug!(
                    "Health endpoint {} not ready yet (status {})",
                    health_url,
                    response.status()
                );
            }
            Err(err) => {
                debug!("Health endpoint {} not accepting connections yet ({err})", health_url);
            }
        }
        tokio::time::sleep(interval).await;
    }
}

/// Drain the store and unsubscribe if a handle was ever recorded.
///
/// Safe to call more than once: the first call takes the handle, later
/// calls find the store empty and do nothing. Failures are logged rather
/// than propagated; there is nothing left to do with them at shutdown.
pub async fn release_subscription(store: &SubscriptionStore, sns: &SnsClient) {
    let Some(handle) = store.take() else {
        debug!("No subscription recorded; nothing to release");
        return;
    };

    debug!(
        "Subscription manager: {:?} -> {:?}",
        ManagerState::Subscribed,
        ManagerState::Unsubscribing
    );
    info!("Removing subscription {}", handle.subscription_arn);
    match sns.unsubscribe(&handle.subscription_arn).await {
        Ok(()) => info!(
            "Successfully removed subscription {} from topic {}",
            handle.subscription_arn, handle.topic_arn
        ),
        Err(err) => error!(
            "Failed to remove subscription {}: {err}",
            handle.subscription_arn
        ),
    }
    debug!(
        "Subscription manager: {:?} -> {:?}",
        ManagerState::Unsubscribing,
        ManagerState::Closed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn topic() -> TopicArn {
        TopicArn::parse("arn:aws:sns:us-east-1:123456789012:orders").unwrap()
    }

    fn handle(arn: &str) -> SubscriptionHandle {
        SubscriptionHandle {
            subscription_arn: arn.to_string(),
            topic_arn: topic().as_str().to_string(),
        }
    }

    #[test]
    fn test_store_take_is_idempotent() {
        let store = SubscriptionStore::new();
        store.record(handle("sub-1"));
        assert!(store.is_recorded());

        assert_eq!(store.take(), Some(handle("sub-1")));
        assert_eq!(store.take(), None);
        assert!(!store.is_recorded());
    }

    #[test]
    fn test_store_keeps_first_handle() {
        let store = SubscriptionStore::new();
        store.record(handle("sub-1"));
        store.record(handle("sub-2"));
        assert_eq!(store.take(), Some(handle("sub-1")));
    }

    #[tokio::test]
    async fn test_release_without_handle_is_noop() {
        let sns = SnsClient::new(
            "us-east-1",
            Some("http://127.0.0.1:1".to_string()),
            None,
            reqwest::Client::new(),
        )
        .unwrap();
        // Would fail loudly if it tried to reach the dead endpoint.
        release_subscription(&SubscriptionStore::new(), &sns).await;
    }

    #[tokio::test]
    async fn test_release_unsubscribes_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=Unsubscribe"))
            .and(body_string_contains("sub-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<UnsubscribeResponse/>"))
            .expect(1)
            .mount(&server)
            .await;

        let sns = SnsClient::new(
            "us-east-1",
            Some(server.uri()),
            None,
            reqwest::Client::new(),
        )
        .unwrap();

        let store = SubscriptionStore::new();
        store.record(handle("sub-1"));

        release_subscription(&store, &sns).await;
        // Second release finds the store drained.
        release_subscription(&store, &sns).await;
    }

    #[tokio::test]
    async fn test_manager_subscribes_once_after_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Healthy"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=Subscribe"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<SubscribeResponse><SubscribeResult>
                     <SubscriptionArn>arn:aws:sns:us-east-1:123456789012:orders:abc</SubscriptionArn>
                   </SubscribeResult></SubscribeResponse>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let sns = Arc::new(
            SnsClient::new(
                "us-east-1",
                Some(server.uri()),
                None,
                reqwest::Client::new(),
            )
            .unwrap(),
        );

        let (ready_tx, ready_rx) = watch::channel(false);
        let manager = SubscriptionManager::new(
            SubscriptionConfig {
                topic: topic(),
                callback_endpoint: "https://d0c0ffee.ngrok.io".to_string(),
                health_url: format!("{}/status", server.uri()),
                poll_interval: Duration::from_millis(10),
            },
            sns,
            reqwest::Client::new(),
            ready_rx,
        );

        let task = tokio::spawn(manager.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        ready_tx.send(true).unwrap();

        let arn = task.await.unwrap().unwrap();
        assert_eq!(arn, "arn:aws:sns:us-east-1:123456789012:orders:abc");
    }

    #[tokio::test]
    async fn test_polling_retries_until_listener_appears() {
        // Reserve a port, start polling it while nothing listens, then
        // bring the server up on that same port.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let health_url = format!("http://{addr}/status");
        let http = reqwest::Client::new();
        let poll = tokio::spawn(async move {
            wait_until_healthy(&http, &health_url, Duration::from_millis(10)).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!poll.is_finished());

        let listener = std::net::TcpListener::bind(addr).unwrap();
        let server = MockServer::builder().listener(listener).start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Healthy"))
            .mount(&server)
            .await;

        tokio::time::timeout(Duration::from_secs(2), poll)
            .await
            .expect("poll loop should finish once the server is up")
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_exit_before_ready_is_an_error() {
        let sns = Arc::new(
            SnsClient::new(
                "us-east-1",
                Some("http://127.0.0.1:1".to_string()),
                None,
                reqwest::Client::new(),
            )
            .unwrap(),
        );

        let (ready_tx, ready_rx) = watch::channel(false);
        let manager = SubscriptionManager::new(
            SubscriptionConfig {
                topic: topic(),
                callback_endpoint: "https://d0c0ffee.ngrok.io".to_string(),
                health_url: "http://127.0.0.1:1/status".to_string(),
                poll_interval: Duration::from_millis(10),
            },
            sns,
            reqwest::Client::new(),
            ready_rx,
        );

        drop(ready_tx);
        let err = manager.run().await.unwrap_err();
        assert!(matches!(err, SubscribeError::ServerExited));
    }
}
