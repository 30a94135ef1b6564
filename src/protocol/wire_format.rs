//! Gateway wire constants.
//!
//! Every logical message is one JSON envelope:
//! ```text
//! {"op": int, "d": any, "s": int|null, "t": string|null}
//! ```
//!
//! `s` and `t` are only meaningful on dispatch (`op = 0`) envelopes.

use url::Url;

use crate::error::{GatewayError, Result};

/// Gateway API version requested on connect.
pub const GATEWAY_VERSION: u8 = 10;

/// Payload encoding requested on connect.
pub const GATEWAY_ENCODING: &str = "json";

/// Default endpoint for a fresh connection.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Opcode constants.
pub mod opcode {
    /// Receive: event dispatch (carries `s` and `t`).
    pub const DISPATCH: u8 = 0;
    /// Send/receive: heartbeat.
    pub const HEARTBEAT: u8 = 1;
    /// Send: identify.
    pub const IDENTIFY: u8 = 2;
    /// Send: presence update.
    pub const PRESENCE_UPDATE: u8 = 3;
    /// Send: voice state update.
    pub const VOICE_STATE: u8 = 4;
    /// Send: resume a previous session.
    pub const RESUME: u8 = 6;
    /// Receive: server asks the client to reconnect and resume.
    pub const RECONNECT: u8 = 7;
    /// Send: request guild members.
    pub const REQUEST_MEMBERS: u8 = 8;
    /// Receive: session invalidated; payload is the resumable flag.
    pub const INVALID_SESSION: u8 = 9;
    /// Receive: first message on a connection, carries the heartbeat interval.
    pub const HELLO: u8 = 10;
    /// Receive: heartbeat acknowledged.
    pub const HEARTBEAT_ACK: u8 = 11;

    /// Human readable opcode name for logs.
    pub fn name(op: u8) -> &'static str {
        match op {
            DISPATCH => "DISPATCH",
            HEARTBEAT => "HEARTBEAT",
            IDENTIFY => "IDENTIFY",
            PRESENCE_UPDATE => "PRESENCE_UPDATE",
            VOICE_STATE => "VOICE_STATE",
            RESUME => "RESUME",
            RECONNECT => "RECONNECT",
            REQUEST_MEMBERS => "REQUEST_MEMBERS",
            INVALID_SESSION => "INVALID_SESSION",
            HELLO => "HELLO",
            HEARTBEAT_ACK => "HEARTBEAT_ACK",
            _ => "UNKNOWN",
        }
    }
}

/// Close codes sent by the gateway.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away.
    pub const GOING_AWAY: u16 = 1001;
    /// Unknown error.
    pub const UNKNOWN_ERROR: u16 = 4000;
    /// Unknown opcode sent.
    pub const UNKNOWN_OPCODE: u16 = 4001;
    /// Payload could not be decoded.
    pub const DECODE_ERROR: u16 = 4002;
    /// Payload sent before identifying.
    pub const NOT_AUTHENTICATED: u16 = 4003;
    /// Token rejected.
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    /// Identified twice.
    pub const ALREADY_AUTHENTICATED: u16 = 4005;
    /// Resume sequence was invalid.
    pub const INVALID_SEQUENCE: u16 = 4007;
    /// Sending too fast.
    pub const RATE_LIMITED: u16 = 4008;
    /// Session timed out.
    pub const SESSION_TIMED_OUT: u16 = 4009;
    /// Invalid shard.
    pub const INVALID_SHARD: u16 = 4010;
    /// Sharding required.
    pub const SHARDING_REQUIRED: u16 = 4011;
    /// Invalid API version.
    pub const INVALID_API_VERSION: u16 = 4012;
    /// Invalid intents.
    pub const INVALID_INTENTS: u16 = 4013;
    /// Disallowed (privileged) intents.
    pub const DISALLOWED_INTENTS: u16 = 4014;
}

/// Intent bits for the identify payload.
pub mod intents {
    /// Guild create/update/delete.
    pub const GUILDS: u32 = 1 << 0;
    /// Guild member events (privileged).
    pub const GUILD_MEMBERS: u32 = 1 << 1;
    /// Guild moderation events.
    pub const GUILD_MODERATION: u32 = 1 << 2;
    /// Guild emoji and sticker events.
    pub const GUILD_EMOJIS: u32 = 1 << 3;
    /// Guild integration events.
    pub const GUILD_INTEGRATIONS: u32 = 1 << 4;
    /// Guild webhook events.
    pub const GUILD_WEBHOOKS: u32 = 1 << 5;
    /// Guild invite events.
    pub const GUILD_INVITES: u32 = 1 << 6;
    /// Voice state events.
    pub const GUILD_VOICE_STATES: u32 = 1 << 7;
    /// Presence events (privileged).
    pub const GUILD_PRESENCES: u32 = 1 << 8;
    /// Guild message events.
    pub const GUILD_MESSAGES: u32 = 1 << 9;
    /// Guild reaction events.
    pub const GUILD_MESSAGE_REACTIONS: u32 = 1 << 10;
    /// Guild typing events.
    pub const GUILD_MESSAGE_TYPING: u32 = 1 << 11;
    /// Direct message events.
    pub const DIRECT_MESSAGES: u32 = 1 << 12;
    /// Direct message reaction events.
    pub const DIRECT_MESSAGE_REACTIONS: u32 = 1 << 13;
    /// Direct message typing events.
    pub const DIRECT_MESSAGE_TYPING: u32 = 1 << 14;
    /// Message content (privileged).
    pub const MESSAGE_CONTENT: u32 = 1 << 15;
    /// Scheduled event events.
    pub const GUILD_SCHEDULED_EVENTS: u32 = 1 << 16;

    /// Default intents: guilds + guild messages (513).
    pub const DEFAULT: u32 = GUILDS | GUILD_MESSAGES;
}

/// Parse a WebSocket URL, requiring a `ws`/`wss` scheme and a host.
///
/// # Errors
///
/// Returns `InvalidParam` if the URL does not parse, has another scheme,
/// has no host, or carries a fragment.
pub fn parse_websocket_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| GatewayError::InvalidParam(format!("invalid URL {:?}: {}", raw, e)))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(GatewayError::InvalidParam(format!(
            "expected a ws:// or wss:// URL, got {:?}",
            raw
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(GatewayError::InvalidParam(format!("URL has no host: {:?}", raw)));
    }
    if url.fragment().is_some() {
        return Err(GatewayError::InvalidParam(format!("URL has a fragment: {:?}", raw)));
    }
    Ok(url)
}

/// Append the gateway query to an endpoint that has none.
///
/// Resume URLs handed out in READY are bare (`wss://host`), while the
/// configured gateway URL usually already carries the query.
///
/// # Errors
///
/// Returns `InvalidParam` if `base` is not a usable WebSocket URL.
pub fn gateway_endpoint(base: &str) -> Result<String> {
    let mut url = parse_websocket_url(base)?;
    if url.query().is_none() {
        url.query_pairs_mut()
            .append_pair("v", &GATEWAY_VERSION.to_string())
            .append_pair("encoding", GATEWAY_ENCODING);
    }
    Ok(url.into())
}

/// Check that a resume URL is a WebSocket URL with a host.
pub fn is_valid_resume_url(url: &str) -> bool {
    parse_websocket_url(url).is_ok()
}
