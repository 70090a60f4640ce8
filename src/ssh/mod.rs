// ABOUTME: Blocking SSH session and channel API.
// ABOUTME: One session owns a transport; channels borrow the session and share its connection.

mod channel;
mod error;
mod options;
mod session;

pub use channel::Channel;
pub use error::{Error, ErrorKind, Result};
pub use options::{OptionValue, SshOption, ValueKind};
pub use session::Session;
