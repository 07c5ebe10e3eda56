//! Captures the remote address of a connection the moment it is obtained.
//!
//! [`RecordPeerLayer`] wraps the HTTP client's connector. Every connection it
//! opens reports its peer into the [`PeerSlot`] scoped around the current
//! send, before any request bytes are written. A timeout or body failure
//! later in the call therefore still knows which address was reached.
//!
//! Connections reused from the client's idle pool never pass through the
//! connector; for those the response's own address is used instead.

use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
};

use hyper_util::client::legacy::connect::{Connection, HttpInfo};
use tower::{Layer, Service};
use tracing::debug;

tokio::task_local! {
    static CURRENT_PEER: PeerSlot;
}

/// Peer address observed during one send.
#[derive(Debug, Clone, Default)]
pub(crate) struct PeerSlot(Arc<Mutex<Option<SocketAddr>>>);

impl PeerSlot {
    /// Runs `future` with this slot receiving new connection addresses.
    pub(crate) async fn scope<F: Future>(&self, future: F) -> F::Output {
        CURRENT_PEER.scope(self.clone(), future).await
    }

    /// Returns the recorded address, if a connection was obtained.
    pub(crate) fn get(&self) -> Option<SocketAddr> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, addr: SocketAddr) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
    }
}

/// Connector layer recording each new connection's peer address.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RecordPeerLayer;

impl<S> Layer<S> for RecordPeerLayer {
    type Service = RecordPeer<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecordPeer { inner }
    }
}

#[derive(Clone)]
pub(crate) struct RecordPeer<S> {
    inner: S,
}

impl<S, Target> Service<Target> for RecordPeer<S>
where
    S: Service<Target>,
    S::Response: Connection + Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, target: Target) -> Self::Future {
        // Read synchronously: the connect future may finish on another task.
        let slot = CURRENT_PEER.try_with(PeerSlot::clone).ok();
        let connecting = self.inner.call(target);

        Box::pin(async move {
            let connection = connecting.await?;

            if let (Some(slot), Some(peer)) = (slot, remote_addr(&connection)) {
                debug!(peer = %peer, "IP address resolved");
                slot.record(peer);
            }

            Ok(connection)
        })
    }
}

fn remote_addr(connection: &impl Connection) -> Option<SocketAddr> {
    let mut extensions = http::Extensions::new();
    connection.connected().get_extras(&mut extensions);
    extensions.get::<HttpInfo>().map(HttpInfo::remote_addr)
}
