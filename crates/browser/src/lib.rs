//! CDP-based browser automation for creating note.com drafts.
//!
//! - `cdp`: Chrome DevTools Protocol over WebSocket
//! - `session`: browser process, profiles, login state import/export
//! - `page`: the page operations the draft flow depends on
//! - `poster` / `login`: the two user-facing flows

pub mod cdp;
pub mod login;
pub mod page;
pub mod poster;
pub mod session;

pub use login::{capture_auth_state, CaptureSummary};
pub use poster::{post_draft, run_post, PostOptions, PostOutcome};
pub use session::{find_browser_binary, list_available_browsers, BrowserEngine};
