// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::net::TcpListener as StdTcpListener;
use tokio::net::TcpListener as AsyncTcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tower::BoxError;

/// A TCP socket that is bound and listening, ready to accept() connections.
///
/// The std variant can be created before a tokio runtime exists, so a bad
/// endpoint is reported at startup before anything else is started. Either
/// variant converts into an async listener for the server loop.
pub struct Listener {
    inner: ListenerInner,
}

enum ListenerInner {
    Async(AsyncTcpListener),
    Std(StdTcpListener),
}

impl Listener {
    pub fn listen_std(endpoint: SocketAddr) -> Result<Self, BoxError> {
        match StdTcpListener::bind(endpoint) {
            Ok(l) => Ok(Self {
                inner: ListenerInner::Std(l),
            }),
            Err(e) => Err(format!("unable to bind to {}: {}", endpoint, e).into()),
        }
    }

    pub async fn listen_async(endpoint: SocketAddr) -> Result<Self, BoxError> {
        match AsyncTcpListener::bind(endpoint).await {
            Ok(l) => Ok(Self {
                inner: ListenerInner::Async(l),
            }),
            Err(e) => Err(format!("unable to bind to {}: {}", endpoint, e).into()),
        }
    }

    /// The actual address, useful when binding to port 0
    pub fn bound_address(&self) -> Result<SocketAddr, BoxError> {
        Ok(match &self.inner {
            ListenerInner::Async(inner) => inner.local_addr()?,
            ListenerInner::Std(inner) => inner.local_addr()?,
        })
    }

    pub fn into_async(self) -> Result<AsyncTcpListener, BoxError> {
        match self.inner {
            ListenerInner::Async(inner) => Ok(inner),
            ListenerInner::Std(inner) => {
                // Required before handing the socket to tokio
                inner.set_nonblocking(true)?;

                let listener = AsyncTcpListener::from_std(inner)?;
                Ok(listener)
            }
        }
    }

    pub fn into_stream(self) -> Result<TcpListenerStream, BoxError> {
        let l = self.into_async()?;
        Ok(TcpListenerStream::new(l))
    }
}
