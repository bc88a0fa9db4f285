//! Common imports for typical client usage.
pub use crate::{
    AbortHandle, ChatClient, ClientConfig, ClientError, ClientEvent, MessageStatus, TokenMode,
};
