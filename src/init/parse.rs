// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use tower::BoxError;

/// Parse a `host:port` endpoint. `localhost` resolves to the IPv4 loopback
/// address without a DNS lookup.
pub fn parse_endpoint(s: &str) -> Result<SocketAddr, BoxError> {
    let addr = match s.strip_prefix("localhost:") {
        Some(port) => format!("127.0.0.1:{}", port).parse(),
        None => s.parse(),
    };
    addr.map_err(|e| format!("invalid endpoint {:?}: {}", s, e).into())
}
