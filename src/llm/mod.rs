//! Language model layers
//!
//! [`client`] drives the authoritative streaming model with its tool loop;
//! [`fast`] is the low-latency acknowledgment path (rules first, small model
//! second).

pub mod client;
pub mod fast;

pub use client::{
    ChatEvent, ChatMessage, ChatModel, ChatRequest, ChatStream, FunctionCall, HttpChatModel,
    ToolCall,
};
pub use fast::{
    needs_acknowledgment, pattern_acknowledgment, resolve_acknowledgment, AckModel,
    Acknowledgment, HttpAckModel,
};
