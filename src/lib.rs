//! Core of a concurrent multi-course monitor-and-grab engine for a captcha-gated university
//! enrollment portal. This crate is the engine only — the desktop UI shell, local config
//! persistence, packaging, the watchdog supervisor, the external OCR library, and the
//! push-notification webhook are external collaborators specified only at the interfaces this
//! crate consumes or exposes (see each module's docs for the precise seam).

pub mod captcha;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod events;
pub mod grab;
pub mod heartbeat;
pub mod http;
pub mod monitor;
pub mod notify;
pub mod scheduler;
pub mod swap;
pub mod timeparse;
pub mod types;
pub mod util;
pub mod wishlist;

pub use events::{ChannelEventSink, CoreEvent, EventSink};
pub use scheduler::Scheduler;
pub use types::{Credentials, Session};
pub use wishlist::Wishlist;
