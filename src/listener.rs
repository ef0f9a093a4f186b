//! Inbound mTLS listener.

use crate::error::{Error, Result};
use crate::handler::Shared;
use log::{error, info, warn};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Lifecycle of the inbound listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    /// No listener port is configured; no socket is ever opened.
    Disabled,
    /// Enabled, waiting for [`MutualAuthHandler::start`](crate::MutualAuthHandler::start).
    Idle,
    /// The socket is bound to the configured port.
    Bound,
    /// Readiness was signaled and connections are being accepted.
    Listening,
    /// Cancellation was observed; the socket is being closed.
    Closing,
    /// The socket is closed and the accept loop has exited.
    Closed,
}

/// Binds every address on `port`: the IPv6 wildcard, which on dual-stack hosts
/// also accepts IPv4, or the IPv4 wildcard when IPv6 is unavailable.
async fn bind(port: u16) -> io::Result<TcpListener> {
    match TcpListener::bind((Ipv6Addr::UNSPECIFIED, port)).await {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Err(e),
        Err(e) => {
            warn!("IPv6 is unavailable for the mTLS listener, falling back to IPv4: {e}");
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await
        }
    }
}

/// Binds the listener socket and runs the accept loop until `cancel` fires.
///
/// `ready` receives exactly one message: the bound address, or the bind error.
/// Each accepted connection is handshaked on its own task, which is not cancelled
/// when the listener stops.
pub(crate) async fn listen_for_connections(
    shared: Arc<Shared>,
    cancel: CancellationToken,
    ready: oneshot::Sender<Result<SocketAddr>>,
) {
    let port = shared.config.listener_port;

    let listener = match bind(port).await {
        Ok(listener) => listener,
        Err(source) => {
            error!("failed to start mTLS listener on port {port}: {source}");
            shared.set_state(ListenerState::Closed);
            let _ = ready.send(Err(Error::Bind { port, source }));
            return;
        }
    };
    shared.set_state(ListenerState::Bound);

    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(source) => {
            drop(listener);
            shared.set_state(ListenerState::Closed);
            let _ = ready.send(Err(Error::Bind { port, source }));
            return;
        }
    };

    info!("started mTLS listener on port {port}");
    shared.set_state(ListenerState::Listening);
    if ready.send(Ok(local_addr)).is_err() {
        warn!("mTLS listener readiness was not observed by its owner");
    }

    loop {
        let accepted = tokio::select! {
            biased;

            () = cancel.cancelled() => None,
            res = listener.accept() => Some(res),
        };

        match accepted {
            None => break,
            Some(Ok((stream, peer))) => {
                let permit = match &shared.admission {
                    Some(admission) => match Arc::clone(admission).try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            warn!(
                                "rejecting connection from {peer}: inbound handshake limit reached"
                            );
                            continue;
                        }
                    },
                    None => None,
                };

                let provider = Arc::clone(&shared.provider);
                let deadline = shared.config.inbound_handshake_deadline();
                tokio::spawn(async move {
                    let _permit = permit;
                    crate::server::handle_connection(provider, stream, peer, deadline).await;
                });
            }
            Some(Err(e)) => error!("failed to accept connection: {e}"),
        }
    }

    shared.set_state(ListenerState::Closing);
    drop(listener);
    info!("mTLS listener socket got closed");
    shared.set_state(ListenerState::Closed);
}
