//! Gateway connection state machine.
//!
//! A [`Connection`] owns its transport, reassembly buffer, heartbeat
//! scheduler and session. It is driven by repeatedly calling
//! [`Connection::poll`], which services heartbeats, reads the transport
//! and applies each decoded envelope:
//!
//! ```text
//! Disconnected ─connect()─► Connecting ─► Connected ─► Identifying ─READY/RESUMED─► Ready
//! Identifying/Ready ─op 7, op 9 (resumable), close, missed ack─► Reconnecting ─poll()─► Connected
//! Identifying/Ready ─op 9 (not resumable)─► Connecting ─poll()─► Connected
//! ```
//!
//! Close code 4004 (and 4010-4014) moves to `Error`, which is reported once;
//! every later poll fails with `InvalidParam`.
//!
//! # Example
//!
//! ```ignore
//! use gatewire::{ConnectionBuilder, GatewayError};
//! use gatewire::transport::WebSocketTransport;
//! use std::time::Duration;
//!
//! let (mut connection, mut events) = ConnectionBuilder::new(token)
//!     .build(WebSocketTransport::new())?;
//! connection.connect().await?;
//!
//! loop {
//!     match connection.poll(Duration::from_millis(250)).await {
//!         Ok(_) | Err(GatewayError::Timeout) => {}
//!         Err(e) if e.is_terminal() => break,
//!         Err(e) => tracing::warn!("{}", e),
//!     }
//! }
//! connection.close().await?;
//! ```

mod state;

pub use state::{CloseDisposition, ConnectionState};

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::codec::EnvelopeCodec;
use crate::config::GatewayConfig;
use crate::dispatch::DispatchSender;
use crate::error::{GatewayError, Result};
use crate::heartbeat::HeartbeatScheduler;
use crate::protocol::{gateway_endpoint, is_valid_resume_url, opcode, Envelope, Reassembler};
use crate::session::SessionManager;
use crate::transport::{Transport, TransportEvent};

/// One gateway connection.
pub struct Connection<T: Transport> {
    transport: T,
    config: GatewayConfig,
    state: ConnectionState,
    /// Last seen dispatch sequence.
    sequence: Option<u64>,
    /// Set while re-establishing a connection that was lost or abandoned.
    reconnect: bool,
    reassembler: Reassembler,
    heartbeat: HeartbeatScheduler,
    session: SessionManager,
    dispatch: DispatchSender,
    /// Origin of the millisecond clock fed to the heartbeat scheduler.
    epoch: Instant,
    transport_open: bool,
    last_close_code: Option<u16>,
}

impl<T: Transport> Connection<T> {
    pub(crate) fn new(transport: T, config: GatewayConfig, dispatch: DispatchSender) -> Self {
        let mut reassembler = Reassembler::with_capacity(config.initial_buffer_capacity);
        if let Some(max) = config.max_message_size {
            reassembler = reassembler.with_max_message_size(max);
        }
        let heartbeat = HeartbeatScheduler::new(config.heartbeat_jitter);

        Self {
            transport,
            config,
            state: ConnectionState::Disconnected,
            sequence: None,
            reconnect: false,
            reassembler,
            heartbeat,
            session: SessionManager::new(),
            dispatch,
            epoch: Instant::now(),
            transport_open: false,
            last_close_code: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Session issued by the last READY, if still valid.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Last seen dispatch sequence.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn heartbeat(&self) -> &HeartbeatScheduler {
        &self.heartbeat
    }

    /// Round trip of the last acknowledged heartbeat.
    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    /// Check if the connection is being re-established.
    pub fn is_reconnecting(&self) -> bool {
        self.reconnect
    }

    /// Close code of the last close received from the gateway.
    pub fn last_close_code(&self) -> Option<u16> {
        self.last_close_code
    }

    /// Dispatch envelopes dropped because the queue was full or gone.
    pub fn dropped_events(&self) -> u64 {
        self.dispatch.dropped()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Open the connection and send identify.
    ///
    /// # Errors
    ///
    /// - `InvalidParam` unless the connection is `Disconnected`.
    /// - `Network` if the transport cannot connect; the connection is then
    ///   `Reconnecting` and the next poll retries.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(GatewayError::InvalidParam(format!(
                "connect() requires a disconnected connection, state is {}",
                self.state
            )));
        }
        self.set_state(ConnectionState::Connecting);
        self.establish().await
    }

    /// Drive the connection for up to `timeout`.
    ///
    /// Returns the first envelope decoded in the window, after it has been
    /// applied to the state machine. Dispatch envelopes are also queued for
    /// the [`DispatchReceiver`](crate::DispatchReceiver).
    ///
    /// # Errors
    ///
    /// - `Timeout` if no complete message arrived. Poll again.
    /// - `Malformed` if a message could not be decoded. It is dropped and
    ///   the state is unchanged.
    /// - `Network` or `OutOfMemory` after which the connection is
    ///   `Reconnecting`; the next poll reconnects.
    /// - `Authentication` or `Rejected`, once, when the gateway closed the
    ///   connection for good. The connection is then `Error`.
    /// - `InvalidParam` when the connection is not open, or already failed.
    pub async fn poll(&mut self, timeout: Duration) -> Result<Envelope> {
        match self.state {
            ConnectionState::Error => {
                return Err(GatewayError::InvalidParam(
                    "connection failed permanently; create a new connection".into(),
                ))
            }
            ConnectionState::Disconnected | ConnectionState::Closing => {
                return Err(GatewayError::InvalidParam(format!(
                    "poll() requires an open connection, state is {}",
                    self.state
                )))
            }
            state if state.needs_connect() => self.establish().await?,
            _ => {}
        }

        let deadline = Instant::now() + timeout;
        loop {
            self.service_heartbeat().await?;

            let wait = self.next_wait(deadline);
            let event = match self.transport.poll(wait).await {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Transport error");
                    self.enter_reconnecting();
                    return Err(e);
                }
            };

            match event {
                TransportEvent::Idle => {}
                TransportEvent::Fragment { data, is_final } => {
                    if let Some(message) = self.reassemble(&data, is_final)? {
                        return self.process_message(message).await;
                    }
                }
                TransportEvent::Closed { code } => return Err(self.handle_close(code)),
            }

            if Instant::now() >= deadline {
                return Err(GatewayError::Timeout);
            }
        }
    }

    /// Close gracefully and release all resources.
    ///
    /// Runs at most `close_iterations` bounded polls waiting for the peer's
    /// close, then releases everything regardless. A connection in `Error`
    /// releases its resources but stays `Error`.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Disconnected => return Ok(()),
            ConnectionState::Error => {
                self.release();
                return Ok(());
            }
            _ => {}
        }

        self.set_state(ConnectionState::Closing);

        if self.transport_open {
            self.shutdown_transport().await;

            let interval = self.config.close_poll_interval;
            for _ in 0..self.config.close_iterations {
                match tokio::time::timeout(interval, self.transport.poll(interval)).await {
                    Ok(Ok(TransportEvent::Closed { code })) => {
                        tracing::debug!(?code, "Close handshake completed");
                        break;
                    }
                    Ok(Ok(_)) | Err(_) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "Transport error during close");
                        break;
                    }
                }
            }
            self.transport_open = false;
        }

        self.release();
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Gateway connection closed");
        Ok(())
    }

    /// Open the transport and send identify or resume.
    async fn establish(&mut self) -> Result<()> {
        let resume_target = match (self.reconnect, self.session.identity()) {
            (true, Some(identity)) => match gateway_endpoint(&identity.resume_url) {
                Ok(endpoint) => Some((endpoint, identity.session_id.clone())),
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unusable resume endpoint");
                    None
                }
            },
            _ => None,
        };
        if resume_target.is_none() {
            // Identify starts a new session and a new sequence.
            self.forget_session();
        }

        let handshake = match &resume_target {
            Some((_, session_id)) => EnvelopeCodec::encode_resume(
                &self.config.token,
                session_id,
                self.sequence.unwrap_or(0),
            ),
            None => EnvelopeCodec::encode_identify(
                &self.config.token,
                self.config.intents,
                &self.config.properties,
            ),
        };
        let handshake = match handshake {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Cannot encode handshake");
                self.fail();
                return Err(e);
            }
        };

        if self.transport_open {
            self.shutdown_transport().await;
        }
        self.reassembler.reset();
        self.heartbeat.reset();
        self.heartbeat.set_sequence(self.sequence);

        let resuming = resume_target.is_some();
        let endpoint = match resume_target {
            Some((endpoint, _)) => endpoint,
            None => self.config.gateway_url.clone(),
        };
        tracing::info!(endpoint = %endpoint, resuming, "Connecting to gateway");

        if let Err(e) = self.transport.connect(&endpoint).await {
            tracing::warn!(error = %e, "Gateway connect failed");
            self.enter_reconnecting();
            return Err(e);
        }
        self.transport_open = true;
        self.set_state(ConnectionState::Connected);

        if let Err(e) = self.transport.send(handshake).await {
            tracing::warn!(error = %e, "Failed to send handshake");
            self.enter_reconnecting();
            return Err(e);
        }
        let op = if resuming { opcode::RESUME } else { opcode::IDENTIFY };
        tracing::debug!(op = opcode::name(op), "Handshake sent");
        self.set_state(ConnectionState::Identifying);
        Ok(())
    }

    /// Close the current transport, bounded by the close budget.
    async fn shutdown_transport(&mut self) {
        let budget = self
            .config
            .close_poll_interval
            .saturating_mul(self.config.close_iterations.max(1));

        match tokio::time::timeout(budget, self.transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Transport close failed"),
            Err(_) => tracing::debug!("Transport close timed out"),
        }
        self.transport_open = false;
    }

    /// Send a heartbeat when due; detect a missed acknowledgement.
    async fn service_heartbeat(&mut self) -> Result<()> {
        if !self.state.is_live() {
            return Ok(());
        }

        let now = self.now_ms();
        if self.heartbeat.ack_overdue(now, self.config.heartbeat_grace) {
            tracing::warn!(
                interval_ms = self.heartbeat.interval_ms(),
                last_sent = self.heartbeat.last_sent(),
                "Heartbeat acknowledgement missed, reconnecting"
            );
            self.enter_reconnecting();
            return Err(GatewayError::Network(
                "heartbeat acknowledgement missed".into(),
            ));
        }

        if self.heartbeat.is_due(now) && !self.heartbeat.awaiting_ack() {
            self.send_heartbeat(now).await?;
        }
        Ok(())
    }

    async fn send_heartbeat(&mut self, now: u64) -> Result<()> {
        let bytes = EnvelopeCodec::encode_heartbeat(self.heartbeat.sequence())?;
        if let Err(e) = self.transport.send(bytes).await {
            tracing::warn!(error = %e, "Failed to send heartbeat");
            self.enter_reconnecting();
            return Err(e);
        }
        self.heartbeat.on_sent(now);
        tracing::debug!(sequence = self.heartbeat.sequence(), "Heartbeat sent");
        Ok(())
    }

    /// How long the transport may block: the rest of the window, cut short
    /// by the next heartbeat deadline.
    fn next_wait(&self, deadline: Instant) -> Duration {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !self.state.is_live() {
            return remaining;
        }
        match self.heartbeat.next_deadline(self.config.heartbeat_grace) {
            Some(due) => remaining.min(Duration::from_millis(due.saturating_sub(self.now_ms()))),
            None => remaining,
        }
    }

    fn reassemble(&mut self, fragment: &[u8], is_final: bool) -> Result<Option<Bytes>> {
        match self.reassembler.append(fragment, is_final) {
            Ok(message) => Ok(message),
            Err(e @ GatewayError::OutOfMemory { .. }) => {
                tracing::error!(error = %e, "Cannot buffer inbound message, reconnecting");
                self.reassembler.reset();
                self.enter_reconnecting();
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping inbound message");
                Err(e)
            }
        }
    }

    async fn process_message(&mut self, message: Bytes) -> Result<Envelope> {
        let envelope = match EnvelopeCodec::decode(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed envelope");
                return Err(e);
            }
        };
        self.handle_envelope(&envelope).await?;
        Ok(envelope)
    }

    async fn handle_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        let now = self.now_ms();

        match envelope.op {
            opcode::DISPATCH => self.handle_dispatch(envelope)?,
            opcode::HEARTBEAT => {
                tracing::debug!("Gateway requested a heartbeat");
                self.send_heartbeat(now).await?;
            }
            opcode::HEARTBEAT_ACK => {
                self.heartbeat.on_ack(now);
                tracing::debug!(
                    latency_ms = self.heartbeat.latency().map(|d| d.as_millis() as u64),
                    "Heartbeat acknowledged"
                );
            }
            opcode::RECONNECT => {
                tracing::info!("Gateway requested a reconnect");
                self.enter_reconnecting();
            }
            opcode::INVALID_SESSION => {
                if EnvelopeCodec::invalid_session_resumable(envelope) {
                    tracing::info!("Session invalidated, resuming");
                    self.enter_reconnecting();
                } else {
                    tracing::info!("Session invalidated, identifying afresh");
                    self.forget_session();
                    self.reconnect = false;
                    self.heartbeat.reset();
                    self.set_state(ConnectionState::Connecting);
                }
            }
            opcode::HELLO => {
                let interval = EnvelopeCodec::hello_interval(envelope)?;
                self.heartbeat.on_hello(interval, now);
                tracing::debug!(interval_ms = interval, "Heartbeat armed");
            }
            other => tracing::debug!(op = other, name = opcode::name(other), "Ignoring opcode"),
        }
        Ok(())
    }

    fn handle_dispatch(&mut self, envelope: &Envelope) -> Result<()> {
        if let Some(sequence) = envelope.sequence {
            match self.sequence {
                Some(current) if sequence < current => {
                    tracing::debug!(sequence, current, "Ignoring out-of-order sequence");
                }
                _ => {
                    self.sequence = Some(sequence);
                    self.heartbeat.set_sequence(Some(sequence));
                }
            }
        }

        match envelope.event_name() {
            Some("READY") => {
                let identity = EnvelopeCodec::ready_identity(envelope)?;
                if is_valid_resume_url(&identity.resume_url) {
                    tracing::info!(session_id = %identity.session_id, "Gateway session ready");
                    self.session.set(identity);
                } else {
                    tracing::warn!(
                        resume_url = %identity.resume_url,
                        "READY carried an invalid resume URL, session will not be resumed"
                    );
                    self.session.clear();
                }
                self.reconnect = false;
                self.set_state(ConnectionState::Ready);
            }
            Some("RESUMED") => {
                tracing::info!(sequence = self.sequence, "Gateway session resumed");
                self.reconnect = false;
                self.set_state(ConnectionState::Ready);
            }
            _ => {}
        }

        self.dispatch.deliver(envelope.clone());
        Ok(())
    }

    /// Apply a close from the peer and build the error to report.
    fn handle_close(&mut self, code: Option<u16>) -> GatewayError {
        self.transport_open = false;
        self.last_close_code = code;

        if let Some(code) = code {
            match CloseDisposition::classify(code) {
                CloseDisposition::Authentication => {
                    tracing::error!(code, "Gateway rejected the token");
                    self.fail();
                    return GatewayError::Authentication { code };
                }
                CloseDisposition::Rejected => {
                    tracing::error!(code, "Gateway rejected the connection settings");
                    self.fail();
                    return GatewayError::Rejected { code };
                }
                CloseDisposition::ReconnectFresh => {
                    tracing::warn!(code, "Gateway closed the session, identifying afresh");
                    self.forget_session();
                }
                CloseDisposition::Reconnect => {
                    tracing::warn!(code, "Gateway closed the connection, reconnecting");
                }
            }
        } else {
            tracing::warn!("Gateway connection closed without a code, reconnecting");
        }

        self.enter_reconnecting();
        GatewayError::Network(match code {
            Some(code) => format!("connection closed by gateway with code {}", code),
            None => "connection closed by gateway".to_string(),
        })
    }

    fn enter_reconnecting(&mut self) {
        self.reconnect = true;
        self.heartbeat.reset();
        self.set_state(ConnectionState::Reconnecting);
    }

    fn forget_session(&mut self) {
        self.session.clear();
        self.sequence = None;
        self.heartbeat.set_sequence(None);
    }

    /// Enter the terminal state, releasing owned buffers.
    fn fail(&mut self) {
        self.release();
        self.set_state(ConnectionState::Error);
    }

    fn release(&mut self) {
        self.reassembler.release();
        self.heartbeat.reset();
        self.forget_session();
        self.reconnect = false;
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "Connection state changed");
            self.state = state;
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
