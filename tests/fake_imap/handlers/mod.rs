//! IMAP command handlers for the fake server.
//!
//! - `session` -- commands valid in any state (CAPABILITY, LOGIN,
//!   NOOP, LOGOUT)
//! - `select` -- SELECT
//! - `status` -- STATUS
//! - `search` -- SEARCH and UID SEARCH
//! - `idle` -- IDLE until DONE

mod select;

pub use idle::{IdleEnd, handle_idle};
pub use search::handle_search;
pub use select::handle_select;
pub use session::{handle_capability, handle_login, handle_logout, handle_noop};
pub use status::handle_status;
