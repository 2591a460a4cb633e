//! MQTT alert delivery.
//!
//! Publishes each `DoorAlert` as JSON with QoS 1 to `<topic_prefix>/alert`.
//! The rumqttc event loop runs on its own thread for the life of the sink.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Transport;
use std::time::Duration;

use super::{AlertSink, DoorAlert};
use crate::config::MqttSettings;

#[derive(Clone, Debug, PartialEq, Eq)]
struct MqttEndpoint {
    host: String,
    port: u16,
    use_tls: bool,
}

pub struct MqttAlertSink {
    client: Client,
    topic: String,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttAlertSink {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.broker)?;
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.clone().unwrap_or_default());
        }
        options.set_transport(if endpoint.use_tls {
            Transport::tls_with_default_config()
        } else {
            Transport::tcp()
        });

        let (client, connection) = Client::new(options, 10);
        log::info!(
            "MQTT alerts to {}:{} (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            settings.username.is_some()
        );
        Ok(Self {
            client,
            topic: format!("{}/alert", settings.topic_prefix.trim_end_matches('/')),
            connection_handle: Some(spawn_event_loop(connection)),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

fn spawn_event_loop(mut connection: Connection) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    break;
                }
            }
        }
    })
}

impl AlertSink for MqttAlertSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn deliver(&mut self, alert: &DoorAlert) -> Result<()> {
        let payload = serde_json::to_vec(alert).context("serialize door alert")?;
        self.client
            .publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .context("publish door alert")?;
        Ok(())
    }
}

impl Drop for MqttAlertSink {
    fn drop(&mut self) {
        let _ = self.client.disconnect();
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Accepts `host:port`, `mqtt://host:port` and `mqtts://host:port`
/// (`tcp://` and `ssl://` as aliases).
fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}
