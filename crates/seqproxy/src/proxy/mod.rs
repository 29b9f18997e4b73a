//! Intercepting proxy.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer and its accept loop
//! - `takeover` - connection takeover for raw response relay
//! - `forwarding` - forwarding to the target with raw response capture
//! - `network` - listener creation

mod forwarding;
mod network;
mod server;
mod takeover;

pub use forwarding::{
    error_response, forward_request, takeover_response, CaptureIo, RawResponse, TARGET_HOST,
};
pub use network::create_listener;
pub use server::ProxyServer;
pub use takeover::{takeover_pair, ConnectionTakeover, RawResponseWriter, TakeoverIo};
