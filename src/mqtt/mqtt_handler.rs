//! MQTT transport adapter built on rumqttc
//!
//! Drives the rumqttc event loop in a tokio task, hands every inbound PUBLISH to the
//! [`IngestionBridge`] and reports connection lifecycle changes. Consumers talk to the
//! task through a [`TransportHandle`].
//!
//! # State Machine
//!
//! ```text
//! Idle ──start()──► Running ──run()──► Stopped ──shutdown()──► LinkStatus
//!                    │    ▲
//!                    └────┘ (poll error: report, pause, poll again)
//! ```
//!
//! Requests to the rumqttc client are queued with the non-blocking `try_*` calls. The
//! event loop is polled by this same task, so awaiting a full request channel here
//! would never resolve.

use chrono::{DateTime, Local};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet, Publish,
    QoS,
};
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::{BrokerSettings, Subscription};
use super::error::TransportError;
use super::message_manager::{SubscriptionBook, TransportCommand, TransportHandle};
use crate::store::{ConnectionState, DeliveryEvent, IngestionBridge, Qos};

/// Pause between a failed poll and the next reconnect attempt
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for flushing the DISCONNECT packet on shutdown
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

const COMMAND_CHANNEL_CAPACITY: usize = 100;

#[derive(Clone, Debug, Default)]
pub struct LinkStatus {
    pub connection_state: ConnectionState,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub errors: usize,
    pub last_activity: Option<DateTime<Local>>,
}

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Idle,    // client built, nothing sent yet
    Running, // event loop being polled
    Stopped, // loop left, connection still to be closed
}

#[machine]
pub struct MqttLink<S: LinkState> {
    client: AsyncClient,
    eventloop: EventLoop,
    settings: BrokerSettings,
    subscriptions: SubscriptionBook,
    bridge: IngestionBridge,
    commands: mpsc::Receiver<TransportCommand>,
    cancel: CancellationToken,
    status: LinkStatus,
}

impl<S: LinkState> MqttLink<S> {
    pub fn status(&self) -> &LinkStatus {
        &self.status
    }

    fn is_connected(&self) -> bool {
        self.status.connection_state == ConnectionState::Connected
    }

    fn set_connection_state(&mut self, state: ConnectionState) {
        if self.status.connection_state != state {
            self.status.connection_state = state.clone();
            self.bridge.on_connection_state_changed(state);
        }
    }
}

impl MqttLink<Idle> {
    pub fn create(
        settings: BrokerSettings,
        subscriptions: SubscriptionBook,
        bridge: IngestionBridge,
        commands: mpsc::Receiver<TransportCommand>,
        cancel: CancellationToken,
    ) -> Self {
        let (client, eventloop) = AsyncClient::new(settings.mqtt_options(), settings.request_capacity);
        debug!(
            "Created MQTT client for {} with request capacity {}",
            settings, settings.request_capacity
        );

        Self::new(
            client,
            eventloop,
            settings,
            subscriptions,
            bridge,
            commands,
            cancel,
            LinkStatus::default(),
        )
    }

    pub fn start(mut self) -> MqttLink<Running> {
        info!("Connecting to {}", self.settings);
        self.set_connection_state(ConnectionState::Connecting);
        self.transition()
    }
}

impl MqttLink<Running> {
    /// Polls the event loop until cancelled or asked to disconnect
    pub async fn run(mut self) -> MqttLink<Stopped> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Transport cancelled");
                    break;
                }

                command = self.commands.recv() => {
                    match command {
                        Some(TransportCommand::Disconnect) => {
                            info!("Disconnect requested");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!("All transport handles dropped");
                            break;
                        }
                    }
                }

                event = self.eventloop.poll() => {
                    match event {
                        Ok(event) => self.handle_event(event),
                        Err(e) => {
                            if !self.handle_connection_error(e).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.transition()
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("Connected to {}", self.settings);
                    self.set_connection_state(ConnectionState::Connected);
                    self.resubscribe_all();
                } else {
                    self.status.errors += 1;
                    warn!("Connection refused: {:?}", ack.code);
                    self.set_connection_state(ConnectionState::Error(format!(
                        "Connection refused: {:?}",
                        ack.code
                    )));
                }
            }
            Event::Incoming(Packet::Publish(publish)) => self.deliver(publish),
            Event::Incoming(Packet::Disconnect) => {
                info!("Broker closed the session");
                self.set_connection_state(ConnectionState::Disconnected);
            }
            Event::Outgoing(Outgoing::Publish(_)) => {
                self.status.messages_sent += 1;
                self.status.last_activity = Some(Local::now());
            }
            other => trace!("MQTT event: {:?}", other),
        }
    }

    fn deliver(&mut self, publish: Publish) {
        let topic: &[u8] = publish.topic.as_ref();
        let event = DeliveryEvent {
            topic: topic.to_vec(),
            payload: publish.payload.to_vec(),
            qos: qos_level(publish.qos),
            retain: publish.retain,
            received_at: Local::now(),
        };
        self.status.messages_received += 1;
        self.status.last_activity = Some(event.received_at);

        // the bridge already logged and reported the drop
        if let Err(e) = self.bridge.on_message_delivered(event) {
            debug!("Delivery not stored: {}", e);
        }
    }

    /// Returns false when the task should stop instead of reconnecting
    async fn handle_connection_error(&mut self, e: ConnectionError) -> bool {
        self.status.errors += 1;
        warn!("MQTT connection error: {}", e);
        self.set_connection_state(ConnectionState::Error(e.to_string()));

        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {
                debug!("Reconnecting to {}", self.settings);
                self.set_connection_state(ConnectionState::Connecting);
                true
            }
        }
    }

    fn handle_command(&mut self, command: TransportCommand) {
        match command {
            TransportCommand::Subscribe { topic, qos } => {
                self.subscriptions.add(&topic, qos);
                if self.is_connected() {
                    self.request_subscribe(&topic, qos);
                } else {
                    debug!("Remembered subscription '{}' until connected", topic);
                }
            }
            TransportCommand::Unsubscribe { topic } => {
                self.subscriptions.remove(&topic);
                if self.is_connected() {
                    match self.client.try_unsubscribe(topic.clone()) {
                        Ok(()) => info!("Unsubscribed from '{}'", topic),
                        Err(e) => self.report(format!("Unsubscribe from '{}' failed: {}", topic, e)),
                    }
                }
            }
            TransportCommand::Publish {
                topic,
                payload,
                qos,
                retain,
            } => {
                if !self.is_connected() {
                    self.report("Cannot publish: not connected.".to_string());
                    return;
                }
                match self.client.try_publish(topic.clone(), rumqttc_qos(qos), retain, payload) {
                    Ok(()) => debug!("Published to '{}' QoS={} retain={}", topic, qos, retain),
                    Err(e) => self.report(format!("Publish failed on '{}': {}", topic, e)),
                }
            }
            // handled by the run loop
            TransportCommand::Disconnect => {}
        }
    }

    fn resubscribe_all(&mut self) {
        let subscriptions: Vec<(String, Qos)> = self
            .subscriptions
            .iter()
            .map(|(topic, qos)| (topic.to_string(), qos))
            .collect();
        for (topic, qos) in subscriptions {
            self.request_subscribe(&topic, qos);
        }
    }

    fn request_subscribe(&mut self, topic: &str, qos: Qos) {
        match self.client.try_subscribe(topic, rumqttc_qos(qos)) {
            Ok(()) => info!("Subscribed to '{}' QoS={}", topic, qos),
            Err(e) => self.report(format!("Subscribe to '{}' failed: {}", topic, e)),
        }
    }

    fn report(&mut self, notice: String) {
        self.status.errors += 1;
        warn!("{}", notice);
        self.bridge.report_notice(notice);
    }
}

impl MqttLink<Stopped> {
    /// Sends DISCONNECT if connected and returns the final counters
    pub async fn shutdown(mut self) -> LinkStatus {
        if self.is_connected() {
            match self.client.try_disconnect() {
                Ok(()) => self.flush_disconnect().await,
                Err(e) => warn!("Failed to queue disconnect: {}", e),
            }
        }
        self.set_connection_state(ConnectionState::Disconnected);

        let last_activity = self
            .status
            .last_activity
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        info!(
            "MQTT link closed: {} received, {} sent, {} errors, last activity {}",
            self.status.messages_received,
            self.status.messages_sent,
            self.status.errors,
            last_activity
        );
        self.status.clone()
    }

    async fn flush_disconnect(&mut self) {
        let eventloop = &mut self.eventloop;
        let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("Event loop closed during disconnect: {}", e);
                        break;
                    }
                }
            }
        })
        .await;

        if flushed.is_err() {
            warn!("Timed out flushing disconnect to {}", self.settings);
        }
    }
}

/// Entry point that wires a link into a tokio task
pub struct MqttHandle;

impl MqttHandle {
    /// Spawns the transport task
    ///
    /// Subscriptions are validated up front and sent once the broker acknowledges the
    /// connection, then again after every reconnect. The returned join handle resolves
    /// to the final link counters after the task has disconnected.
    pub fn spawn(
        settings: BrokerSettings,
        subscriptions: &[Subscription],
        bridge: IngestionBridge,
        cancel: CancellationToken,
    ) -> Result<(TransportHandle, JoinHandle<LinkStatus>), TransportError> {
        let mut book = SubscriptionBook::new();
        for sub in subscriptions {
            let qos = Qos::try_from(sub.qos).map_err(|_| TransportError::InvalidQos {
                topic: sub.topic.clone(),
                qos: sub.qos,
            })?;
            if sub.topic.trim().is_empty() {
                return Err(TransportError::EmptyTopic);
            }
            book.add(sub.topic.trim(), qos);
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let link = MqttLink::<Idle>::create(settings, book, bridge, command_rx, cancel);

        info!("Spawning MQTT transport task");
        let task = tokio::spawn(async move {
            let stopped = link.start().run().await;
            let status = stopped.shutdown().await;
            if let ConnectionState::Error(reason) = &status.connection_state {
                error!("Transport ended in error state: {}", reason);
            }
            status
        });

        Ok((TransportHandle::new(command_tx), task))
    }
}

fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

fn rumqttc_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}
