//! Connection configuration and builder.
//!
//! The [`ConnectionBuilder`] provides a fluent API over [`GatewayConfig`]:
//!
//! ```
//! use gatewire::protocol::intents;
//! use gatewire::transport::memory_transport;
//! use gatewire::ConnectionBuilder;
//! use std::time::Duration;
//!
//! let (transport, _peer) = memory_transport();
//! let (connection, _events) = ConnectionBuilder::new("my-token")
//!     .intents(intents::DEFAULT | intents::MESSAGE_CONTENT)
//!     .heartbeat_grace(Duration::from_secs(10))
//!     .build(transport)
//!     .unwrap();
//!
//! assert_eq!(connection.config().intents, 33281);
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::codec::EnvelopeCodec;
use crate::connection::Connection;
use crate::dispatch::{dispatch_channel, DispatchReceiver};
use crate::error::{GatewayError, Result};
use crate::protocol::{intents, parse_websocket_url, DEFAULT_BUFFER_CAPACITY, DEFAULT_GATEWAY_URL};
use crate::transport::Transport;

/// Default first-heartbeat jitter window, as a fraction of the interval.
pub const DEFAULT_HEARTBEAT_JITTER: f64 = 1.0;

/// Default grace margin before a missing acknowledgement forces a reconnect.
pub const DEFAULT_HEARTBEAT_GRACE: Duration = Duration::from_secs(5);

/// Default number of service iterations during `close()`.
pub const DEFAULT_CLOSE_ITERATIONS: u32 = 10;

/// Default wait per close iteration.
pub const DEFAULT_CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default dispatch queue capacity.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 1024;

/// Name reported as `browser` and `device` in identify.
pub const LIBRARY_NAME: &str = "gatewire";

/// Static client properties sent with identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientProperties {
    /// Operating system.
    pub os: String,
    /// Library name.
    pub browser: String,
    /// Library name.
    pub device: String,
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: LIBRARY_NAME.to_string(),
            device: LIBRARY_NAME.to_string(),
        }
    }
}

/// Settings for one gateway connection.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Bot token.
    pub token: String,
    /// Intents bitmask.
    pub intents: u32,
    /// Endpoint for fresh connections.
    pub gateway_url: String,
    /// Identify properties.
    pub properties: ClientProperties,
    /// First-heartbeat jitter window as a fraction of the interval, `[0.0, 1.0]`.
    pub heartbeat_jitter: f64,
    /// Added to the interval before a missing acknowledgement counts as missed.
    pub heartbeat_grace: Duration,
    /// Service iterations during `close()`.
    pub close_iterations: u32,
    /// Wait per close iteration.
    pub close_poll_interval: Duration,
    /// Dispatch queue capacity.
    pub dispatch_capacity: usize,
    /// Reassembly buffer pre-allocation.
    pub initial_buffer_capacity: usize,
    /// Optional bound on one reassembled message.
    pub max_message_size: Option<usize>,
}

impl GatewayConfig {
    /// Create a configuration with default settings.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: intents::DEFAULT,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            properties: ClientProperties::default(),
            heartbeat_jitter: DEFAULT_HEARTBEAT_JITTER,
            heartbeat_grace: DEFAULT_HEARTBEAT_GRACE,
            close_iterations: DEFAULT_CLOSE_ITERATIONS,
            close_poll_interval: DEFAULT_CLOSE_POLL_INTERVAL,
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            initial_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_message_size: None,
        }
    }

    /// Check every setting.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParam` naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        EnvelopeCodec::validate_token(&self.token)?;

        parse_websocket_url(&self.gateway_url)?;
        if !(0.0..=1.0).contains(&self.heartbeat_jitter) {
            return Err(GatewayError::InvalidParam(format!(
                "heartbeat_jitter must be within [0.0, 1.0], got {}",
                self.heartbeat_jitter
            )));
        }
        if self.dispatch_capacity == 0 {
            return Err(GatewayError::InvalidParam(
                "dispatch_capacity must be greater than zero".into(),
            ));
        }
        if self.max_message_size == Some(0) {
            return Err(GatewayError::InvalidParam(
                "max_message_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("gateway_url", &self.gateway_url)
            .field("properties", &self.properties)
            .field("heartbeat_jitter", &self.heartbeat_jitter)
            .field("heartbeat_grace", &self.heartbeat_grace)
            .field("close_iterations", &self.close_iterations)
            .field("close_poll_interval", &self.close_poll_interval)
            .field("dispatch_capacity", &self.dispatch_capacity)
            .field("initial_buffer_capacity", &self.initial_buffer_capacity)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}

/// Builder for configuring and creating a gateway connection.
///
/// Use the fluent API to adjust settings, then call `build()` with a
/// transport.
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    config: GatewayConfig,
}

impl ConnectionBuilder {
    /// Create a new builder for the given token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            config: GatewayConfig::new(token),
        }
    }

    /// Set the intents bitmask.
    ///
    /// Default: 513 (guilds + guild messages)
    pub fn intents(mut self, intents: u32) -> Self {
        self.config.intents = intents;
        self
    }

    /// Set the endpoint used for fresh connections.
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.config.gateway_url = url.into();
        self
    }

    /// Set the identify properties.
    pub fn properties(mut self, properties: ClientProperties) -> Self {
        self.config.properties = properties;
        self
    }

    /// Set the first-heartbeat jitter window as a fraction of the interval.
    ///
    /// `0.0` sends the first heartbeat immediately after hello.
    /// Default: 1.0
    pub fn heartbeat_jitter(mut self, jitter: f64) -> Self {
        self.config.heartbeat_jitter = jitter;
        self
    }

    /// Set the grace margin for heartbeat acknowledgements.
    ///
    /// Default: 5 seconds
    pub fn heartbeat_grace(mut self, grace: Duration) -> Self {
        self.config.heartbeat_grace = grace;
        self
    }

    /// Set how many service iterations `close()` runs.
    ///
    /// Default: 10
    pub fn close_iterations(mut self, iterations: u32) -> Self {
        self.config.close_iterations = iterations;
        self
    }

    /// Set the wait per close iteration.
    ///
    /// Default: 10 milliseconds
    pub fn close_poll_interval(mut self, interval: Duration) -> Self {
        self.config.close_poll_interval = interval;
        self
    }

    /// Set the dispatch queue capacity.
    ///
    /// Default: 1024
    pub fn dispatch_capacity(mut self, capacity: usize) -> Self {
        self.config.dispatch_capacity = capacity;
        self
    }

    /// Set the reassembly buffer pre-allocation.
    ///
    /// Default: 64KB
    pub fn initial_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_buffer_capacity = capacity;
        self
    }

    /// Bound the size of one reassembled message.
    pub fn max_message_size(mut self, max: usize) -> Self {
        self.config.max_message_size = Some(max);
        self
    }

    /// Current configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Validate the configuration and create the connection.
    ///
    /// The connection starts `Disconnected`; call `connect()` to open it.
    /// Dispatch envelopes are delivered to the returned receiver.
    pub fn build<T: Transport>(self, transport: T) -> Result<(Connection<T>, DispatchReceiver)> {
        self.config.validate()?;
        let (sender, receiver) = dispatch_channel(self.config.dispatch_capacity);
        Ok((Connection::new(transport, self.config, sender), receiver))
    }
}
