pub mod conversation;
pub mod errors;
pub mod events;
pub mod message;

pub use conversation::{Conversation, ConversationStatus, ConversationSummary};
pub use errors::ErrorResponse;
pub use events::{ChannelEvent, TypingSignal};
pub use message::{Message, MessageId, MessageKey, MessageKind, NewMessage};
