pub mod chat;
pub mod chats;
pub mod completion;
pub mod config;
pub mod demo;
pub mod render;
