//! rtmux - realtime pub/sub client engine.
//!
//! Keeps one resilient logical connection to a realtime service, multiplexes
//! named channels over it and keeps each channel's presence set in sync.
//!
//! The engine is transport-agnostic: callers supply a [`Transport`] that opens
//! links and an [`AuthProvider`] that hands out credentials.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use rtmux::{ClientOptions, Realtime, StaticKeyAuth, Transport, Wait};
//! # async fn demo(transport: Arc<dyn Transport>) -> rtmux::Result<()> {
//! let client = Realtime::new(
//!     ClientOptions::default().with_client_id("alice"),
//!     transport,
//!     Arc::new(StaticKeyAuth::new("app.key:secret")),
//! )?;
//! let channel = client.channels().get("news");
//! channel.subscribe(None, |message| println!("{:?}", message.data))?;
//! channel.publish("greeting", serde_json::json!("hello"))?.await?;
//! channel.presence().enter(None)?;
//! client.connection().wait_for_connected(Wait::forever()).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod channel;
pub mod channels;
pub mod client;
pub mod config;
pub mod connection;
pub mod emitter;
pub mod error;
pub mod fallback;
pub mod presence;
pub mod queue;
pub mod telemetry;
pub mod transport;
pub mod wait;

pub use auth::{AuthProvider, Credential, StaticKeyAuth, TokenCallbackAuth, TokenFuture};
pub use channel::{ChannelEvent, ChannelState, ChannelStateChange, DetachPolicy, RealtimeChannel};
pub use channels::Channels;
pub use client::Realtime;
pub use config::{ClientOptions, ConfigError, ValidationError};
pub use connection::{Connection, ConnectionEvent, ConnectionState, ConnectionStateChange};
pub use emitter::{EventEmitter, ListenerFailure, Subscription};
pub use error::{Error, ErrorKind, Result};
pub use fallback::FallbackHosts;
pub use presence::{Presence, PresenceMap};
pub use queue::{MessageQueue, PublishHandle};
pub use transport::{ConnectParams, Link, Transport, TransportError, TransportEvent};
pub use wait::Wait;

pub use rtmux_proto;
