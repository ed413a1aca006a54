#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(clippy::pedantic)]

//! Message stream reconciler for a single `MatchIT` conversation.
//!
//! A [`ConversationSession`] keeps one ordered, deduplicated message list
//! fed from three sources: optimistic sends, realtime push and a polling
//! backstop. Push is best-effort; the poll loop alone is enough to
//! converge.

pub mod backend;
pub mod error;
pub mod policy;
mod poll;
mod push;
pub mod session;
pub mod store;
pub mod typing;

pub use backend::{
    MessageRepository, RealtimeChannel, RealtimeEvent, Subscription, memory::MemoryHub,
    rest::RestBackend, socket::RealtimeSocket,
};
pub use error::{BackendError, BackendResult, ChatError, ChatResult};
pub use session::{ConversationSession, SendOutcome, SessionOptions};
pub use store::MessageStore;
pub use typing::TypingIndicator;
