//! Turn state: the pure reducer, the store that owns messages, and the
//! read-only presenter views

pub mod presenter;
pub mod reducer;
pub mod store;

pub use presenter::{action_label, message_label, ActionCategory, Presence};
pub use reducer::{reduce, replay, Transition};
pub use store::{Observer, TurnStore, TurnUpdate};
