pub mod ha_interface;

use crate::config::MqttConfig;
use crate::meter::structs::{CycleReadings, DeviceInfo};
use async_trait::async_trait;
use ha_interface::HassSensor;
use log::{debug, error, info};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS, Transport};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

const CLIENT_NAME: &str = "energomera2mqtt";

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(String),
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<rumqttc::ClientError> for PublishError {
    fn from(err: rumqttc::ClientError) -> Self {
        PublishError::Client(err.to_string())
    }
}

/// Capability interface for handing cycle results to the message bus, so
/// the scheduler can be exercised against a recording double.
#[async_trait]
pub trait ReadingPublisher: Send {
    /// Publishes discovery and state for every reading of a successful
    /// cycle. Individual publish failures are logged and do not affect the
    /// remaining readings.
    async fn publish_cycle(&mut self, cycle: &CycleReadings) -> Result<(), PublishError>;

    /// Updates the meter-online pseudo sensor. A no-op until the first
    /// successful cycle has provided the meter identification.
    async fn set_online(&mut self, online: bool) -> Result<(), PublishError>;

    /// Flags the meter offline and disconnects from the broker.
    async fn finalize(&mut self);
}

/// Tracks which discovery payloads have been sent, keyed by unique id.
/// Home Assistant only needs a config once unless its content changes, so
/// only a changed payload warrants a republish.
#[derive(Default)]
struct DiscoveryCache {
    hashes: HashMap<String, u64>,
}

impl DiscoveryCache {
    fn needs_publish(&self, unique_id: &str, payload: &str) -> bool {
        self.hashes.get(unique_id) != Some(&Self::fingerprint(payload))
    }

    fn mark_published(&mut self, unique_id: &str, payload: &str) {
        self.hashes
            .insert(unique_id.to_string(), Self::fingerprint(payload));
    }

    fn fingerprint(payload: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        payload.hash(&mut hasher);
        hasher.finish()
    }
}

/// Publishes readings to an MQTT broker using the Home Assistant discovery
/// convention. The broker connection is established lazily on the first
/// publish - the last will topic needs the meter identification, which is
/// only known once a session has succeeded - and is then kept across
/// cycles.
pub struct MqttPublisher {
    config: MqttConfig,
    /// Matches the intercycle delay so the broker notices a process that
    /// stopped cycling
    keep_alive: Duration,
    dry_run: bool,
    connection: Option<AsyncClient>,
    eventloop_task: Option<JoinHandle<()>>,
    device: Option<DeviceInfo>,
    discovery_cache: DiscoveryCache,
}

impl MqttPublisher {
    pub fn new(config: MqttConfig, keep_alive: Duration, dry_run: bool) -> Self {
        MqttPublisher {
            config,
            keep_alive,
            dry_run,
            connection: None,
            eventloop_task: None,
            device: None,
            discovery_cache: DiscoveryCache::default(),
        }
    }

    async fn ensure_connected(&mut self, device: &DeviceInfo) -> Result<AsyncClient, PublishError> {
        if let Some(client) = &self.connection {
            return Ok(client.clone());
        }

        info!(
            "Connecting to MQTT broker {}:{} (tls: {})",
            self.config.host, self.config.port, self.config.tls
        );
        let mut options = MqttOptions::new(CLIENT_NAME, self.config.host.clone(), self.config.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(user) = &self.config.user {
            options.set_credentials(user.clone(), self.config.password.clone().unwrap_or_default());
        }
        if self.config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        // Flag the device unavailable if the process dies between cycles
        let will = ha_interface::online_sensor(&self.config, device, false);
        options.set_last_will(LastWill::new(
            &will.state_topic,
            serde_json::to_string(&will.state_payload())?,
            QoS::AtLeastOnce,
            false,
        ));

        let (client, mut eventloop) = AsyncClient::new(options, 100);
        let task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Error in MQTT connection, reconnecting: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        self.connection = Some(client.clone());
        self.eventloop_task = Some(task);
        Ok(client)
    }

    async fn publish_sensor(
        &mut self,
        device: &DeviceInfo,
        sensor: &HassSensor,
    ) -> Result<(), PublishError> {
        let config_payload = serde_json::to_string(&sensor.config)?;
        let state_payload = serde_json::to_string(&sensor.state_payload())?;

        if self.dry_run {
            debug!(
                "Dry run, skipping publish of '{}' = '{}'",
                sensor.state_topic, state_payload
            );
            return Ok(());
        }

        let client = self.ensure_connected(device).await?;

        if self.discovery_cache.needs_publish(&sensor.unique_id, &config_payload) {
            debug!(
                "Publishing discovery config to '{}': {}",
                sensor.config_topic, config_payload
            );
            client
                .publish(&sensor.config_topic, QoS::AtLeastOnce, true, config_payload.clone())
                .await?;
            self.discovery_cache
                .mark_published(&sensor.unique_id, &config_payload);
        }

        debug!(
            "Publishing state to '{}': {}",
            sensor.state_topic, state_payload
        );
        client
            .publish(&sensor.state_topic, QoS::AtLeastOnce, false, state_payload)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReadingPublisher for MqttPublisher {
    async fn publish_cycle(&mut self, cycle: &CycleReadings) -> Result<(), PublishError> {
        self.device = Some(cycle.device.clone());

        for reading in &cycle.readings {
            for sensor in ha_interface::sensors_for_reading(&self.config, &cycle.device, reading) {
                if let Err(e) = self.publish_sensor(&cycle.device, &sensor).await {
                    error!(
                        "Failed to publish sensor '{}', continuing with the rest: {e}",
                        sensor.unique_id
                    );
                }
            }
        }
        Ok(())
    }

    async fn set_online(&mut self, online: bool) -> Result<(), PublishError> {
        let Some(device) = self.device.clone() else {
            debug!("Meter identification not known yet, skipping online sensor");
            return Ok(());
        };

        let sensor = ha_interface::online_sensor(&self.config, &device, online);
        self.publish_sensor(&device, &sensor).await
    }

    async fn finalize(&mut self) {
        if let Err(e) = self.set_online(false).await {
            debug!("Error flagging meter offline during shutdown: {e}");
        }
        if let Some(client) = self.connection.take() {
            if let Err(e) = client.disconnect().await {
                debug!("Error disconnecting MQTT client: {e}");
            }
        }
        if let Some(task) = self.eventloop_task.take() {
            task.abort();
        }
    }
}
