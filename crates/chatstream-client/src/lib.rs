//! Streaming chat client: turns a `data: <json>` response stream into message, task and artifact
//! state.
//!
//! ```no_run
//! use chatstream_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let mut client = ChatClient::new(ClientConfig::new("http://localhost:8000"))?;
//! client.subscribe(|event| {
//!     if let ClientEvent::MessageAppended { delta, .. } = event {
//!         print!("{delta}");
//!     }
//! });
//! client.send_prompt("Say hello", serde_json::json!({})).await?;
//! # Ok(())
//! # }
//! ```

/// Response classification into typed events.
pub mod classify;
/// `ChatClient` and its abort handle.
pub mod client;
/// Endpoint configuration and token modes.
pub mod config;
/// Public error types.
pub mod errors;
/// Partial JSON field extraction.
pub mod extract;
/// Line framing of the byte stream.
pub mod frame;
/// Streaming message state machine.
pub mod message;
/// Dispatch of classified events to the state machines.
pub mod pipeline;
/// Common imports for typical usage.
pub mod prelude;
/// Session (user identity) providers.
pub mod session;
/// Transport contract and the HTTP implementation.
pub mod transport;

pub use chatstream_core;
pub use chatstream_core::ClientEvent;
pub use classify::{Event, EventKind, EventPayload, TokenBatch, classify};
pub use client::{AbortHandle, ChatClient};
pub use config::{ClientConfig, TokenMode};
pub use errors::{ClientError, StreamFailure};
pub use extract::FieldExtractor;
pub use frame::{Frame, FrameDecoder};
pub use message::{MessageEffect, MessageMachine, MessageOutcome, MessageStatus, StreamingMessage};
pub use pipeline::Pipeline;
pub use session::{SessionProvider, StaticSession};
pub use transport::{ByteStream, HttpTransport, PromptRequest, Transport};
