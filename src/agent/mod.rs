//! Backend agent access: wire events, stream decoding and the HTTP client

pub mod client;
pub mod decoder;
pub mod events;
pub mod ingest;

pub use client::{AgentClient, AvatarClip, ChatResponse, ChatTransport};
pub use events::{parse_event, StreamEvent};
pub use ingest::{ingest, AbandonFlag, IngestOutcome};
