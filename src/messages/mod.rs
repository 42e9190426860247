pub mod session;
pub mod types;

pub use session::Session;
pub use types::{CurrentAction, Message, Phase, Role, ToolTraceEntry, Verification};
