//! # rtmux-proto
//!
//! Protocol vocabulary shared by the rtmux realtime engine and its transports.
//!
//! ## Features
//!
//! - [`ProtocolMessage`] frames with their [`Action`] and [`Flags`]
//! - Channel [`Message`]s and [`PresenceMessage`] records
//! - [`ErrorInfo`] with the service's numeric error codes
//! - [`SyncCursor`] parsing for the presence sync sub-protocol
//! - Wire codecs behind the [`Codec`] trait (JSON and MessagePack)
//!
//! The crate performs no I/O. Transports use a [`Codec`] to turn frames into
//! bytes; the engine only ever sees decoded [`ProtocolMessage`] values.

#![deny(clippy::all)]
#![warn(missing_docs)]

//! ## Quick Start
//!
//! ```rust
//! use rtmux_proto::{Action, Codec, Format, Message, ProtocolMessage};
//!
//! let mut frame = ProtocolMessage::new(Action::Message);
//! frame.channel = Some("rooms:lobby".to_string());
//! frame.messages.push(Message::new("greeting", serde_json::json!("hello")));
//!
//! let codec = Format::Json.codec();
//! let bytes = codec.encode(&frame).unwrap();
//! let decoded = codec.decode(&bytes).unwrap();
//! assert_eq!(decoded, frame);
//! ```

pub mod action;
pub mod codec;
pub mod error;
pub mod message;
pub mod presence;
pub mod sync;

pub use self::action::{Action, Flags};
pub use self::codec::{Codec, CodecError, Format, JsonCodec, MsgpackCodec};
pub use self::error::{codes, ErrorInfo, ProtocolError, Result};
pub use self::message::{ConnectionDetails, Message, ProtocolMessage};
pub use self::presence::{PresenceAction, PresenceMessage};
pub use self::sync::SyncCursor;
