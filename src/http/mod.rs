//! The HTTP session core and its supporting modules: the captcha-login flow
//! and the single-flight session-recovery coordinator.

pub mod login;
pub mod recovery;
pub mod session;
pub mod wire;

pub use session::{EnrollmentApi, HttpSession};
