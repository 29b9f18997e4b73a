//! Network utilities for the intercepting listener.
//!
//! The listener binds dual-stack (`[::]`) so that clients resolving
//! `localhost` to either `::1` or `127.0.0.1` reach it, and falls back to
//! IPv4 only on hosts without IPv6.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::TcpListener;
use tracing::debug;

const BACKLOG: i32 = 1024;

/// Bind the listener on `port` (0 lets the OS assign an ephemeral port).
///
/// Must be called from within a tokio runtime.
pub fn create_listener(port: u16) -> std::io::Result<TcpListener> {
    match bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))) {
        Ok(listener) => Ok(listener),
        Err(err) => {
            debug!("Dual-stack bind on port {} failed ({}), using IPv4", port, err);
            bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        }
    }
}

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}
