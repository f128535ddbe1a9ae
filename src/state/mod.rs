// ============================================================================
// UI-observable State Primitives
// ============================================================================
//
// Building blocks shared by the connection layer and the terminal client:
// atomic flags with a watch mirror, listener registries, and the
// notification channel that turns driver failures into user messages.
//
// ============================================================================

pub mod atomic;
pub mod listeners;
pub mod message;
pub mod notification;

pub use atomic::{AtomicBooleanState, StopSignal};
pub use listeners::Listeners;
pub use message::Message;
pub use notification::{Notification, NotificationKind, NotificationManager};
