//! MQTT inbound feed.
//!
//! Subscribes to the device event topics and hands each publish to the
//! [`Gateway`] on its own task, bounded by a semaphore. Acknowledgements
//! are manual: a message is acked once the gateway has a definitive
//! outcome, and left un-acked on storage failure so the broker can
//! redeliver it.

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::gateway::Gateway;
use crate::config::Config;

/// Delay before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the client request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("broker did not accept the connection within {0:?}")]
    ConnectTimeout(Duration),

    #[error("broker connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Connection parameters for the inbound feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_filter: String,
    pub connect_timeout: Duration,
    pub max_in_flight: usize,
}

impl From<&Config> for FeedConfig {
    fn from(config: &Config) -> Self {
        Self {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            client_id: config.mqtt_client_id.clone(),
            username: config.mqtt_user.clone(),
            password: config.mqtt_password.clone(),
            topic_filter: config.topic_filter.clone(),
            connect_timeout: config.connect_timeout(),
            max_in_flight: config.max_in_flight.max(1),
        }
    }
}

/// A connected, subscribed MQTT feed.
pub struct MqttFeed {
    client: AsyncClient,
    eventloop: EventLoop,
    topic_filter: String,
    max_in_flight: usize,
}

impl MqttFeed {
    /// Connect to the broker and subscribe.
    ///
    /// # Errors
    ///
    /// Fails if the broker does not acknowledge the connection within
    /// `connect_timeout`; the relay must not start without its feed.
    pub async fn connect(config: FeedConfig) -> Result<Self, FeedError> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(false);
        options.set_manual_acks(true);
        if let Some(user) = &config.username {
            options.set_credentials(user, config.password.as_deref().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        tracing::info!(host = %config.host, port = config.port, "Connecting to MQTT broker");
        tokio::time::timeout(config.connect_timeout, async {
            loop {
                if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
                    return Ok::<(), FeedError>(());
                }
            }
        })
        .await
        .map_err(|_| FeedError::ConnectTimeout(config.connect_timeout))??;

        client
            .subscribe(config.topic_filter.as_str(), QoS::AtLeastOnce)
            .await?;
        tracing::info!(topic = %config.topic_filter, "Subscribed to inbound feed");

        Ok(Self {
            client,
            eventloop,
            topic_filter: config.topic_filter,
            max_in_flight: config.max_in_flight,
        })
    }

    /// Poll the broker and dispatch messages until `cancel` fires.
    ///
    /// Handler tasks are spawned on `tracker` so shutdown can wait for them.
    /// On cancellation the loop stops taking new messages and disconnects.
    pub async fn run(mut self, gateway: Gateway, tracker: TaskTracker, cancel: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.max_in_flight));

        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let permit = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        permit = Arc::clone(&permits).acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };
                    let gateway = gateway.clone();
                    let client = self.client.clone();
                    tracker.spawn(async move {
                        let _permit = permit;
                        handle_publish(&gateway, &client, publish).await;
                    });
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Reconnected to MQTT broker, resubscribing");
                    if let Err(e) = self
                        .client
                        .try_subscribe(self.topic_filter.as_str(), QoS::AtLeastOnce)
                    {
                        tracing::warn!(error = %e, "Failed to resubscribe");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "MQTT connection lost, reconnecting");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }

        tracing::info!("Inbound feed stopping, disconnecting from broker");
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "Disconnect request not sent");
        }
        // Flush the disconnect packet; errors here are expected once the link closes.
        let _ = tokio::time::timeout(Duration::from_secs(1), self.eventloop.poll()).await;
    }
}

/// What the broker is told about a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckDecision {
    Ack,
    /// Left un-acked so the broker redelivers it
    Withhold,
}

async fn admit_publish(gateway: &Gateway, publish: &Publish) -> AckDecision {
    match gateway.admit(&publish.topic, &publish.payload).await {
        // Queued, duplicate and dropped are all final outcomes.
        Ok(_) => AckDecision::Ack,
        Err(e) => {
            tracing::warn!(
                topic = %publish.topic,
                error = %e,
                "Leaving message unacknowledged after storage failure"
            );
            AckDecision::Withhold
        }
    }
}

async fn handle_publish(gateway: &Gateway, client: &AsyncClient, publish: Publish) {
    if admit_publish(gateway, &publish).await == AckDecision::Ack {
        if let Err(e) = client.try_ack(&publish) {
            tracing::warn!(topic = %publish.topic, error = %e, "Failed to acknowledge message");
        }
    }
}
