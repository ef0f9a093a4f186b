use crate::config::MutualAuthConfig;
use crate::error::{Error, Result};
use crate::identity::NumericIdentity;
use crate::listener::{self, ListenerState};
use crate::provider::{CertificateProvider, CertificateRotationEvent};
use log::{debug, error, info};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{broadcast, oneshot, watch, Semaphore};
use tokio_util::sync::CancellationToken;

/// A request to authenticate against a remote node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthRequest {
    /// Identity whose certificate is presented to the remote node.
    pub local_identity: NumericIdentity,
    /// Identity the remote node must prove.
    pub remote_identity: NumericIdentity,
    /// IP address of the remote node.
    pub remote_node_ip: String,
}

/// Outcome of a successful authentication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthResponse {
    /// Earliest expiration of the two certificates involved; re-authentication is
    /// required past this point.
    pub expiration_time: OffsetDateTime,
}

/// Authentication mechanism identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AuthType {
    /// Mutual TLS with SPIFFE/SPIRE-issued identity certificates.
    Spire,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spire => f.write_str("spire"),
        }
    }
}

/// An authentication mechanism the policy engine can drive.
pub trait AuthHandler: Send + Sync {
    /// Authenticates against the remote node named by `request`.
    fn authenticate(
        &self,
        request: &AuthRequest,
    ) -> impl Future<Output = Result<AuthResponse>> + Send;

    /// Returns the mechanism this handler implements.
    fn auth_type(&self) -> AuthType;

    /// Subscribes to certificate rotations that require re-authentication.
    fn subscribe_to_rotated_identities(
        &self,
    ) -> Result<broadcast::Receiver<CertificateRotationEvent>>;
}

/// State shared between the handler, the accept loop and connection tasks.
pub(crate) struct Shared {
    pub(crate) provider: Arc<dyn CertificateProvider>,
    pub(crate) config: MutualAuthConfig,
    pub(crate) admission: Option<Arc<Semaphore>>,
    state: Arc<watch::Sender<ListenerState>>,
}

impl Shared {
    pub(crate) fn set_state(&self, state: ListenerState) {
        self.state.send_replace(state);
    }
}

struct Enabled {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    started: AtomicBool,
}

/// Mutual TLS authentication between mesh nodes.
///
/// A handler is either fully disabled (listener port `0`: no socket, every
/// authentication fails with [`Error::Disabled`]) or fully enabled. An enabled
/// handler authenticates outbound with [`Self::authenticate`] and, once
/// [`Self::start`]ed, accepts inbound handshakes on the configured port until
/// [`Self::stop`] is called or the handler is dropped.
///
/// # Examples
///
/// ```no_run
/// # use mesh_mutual_auth::{CertificateProvider, MutualAuthConfig, MutualAuthHandler};
/// # use std::sync::Arc;
/// # async fn example(provider: Arc<dyn CertificateProvider>) -> Result<(), Box<dyn std::error::Error>> {
/// let handler = MutualAuthHandler::new(MutualAuthConfig::new(4250), Some(provider))?;
/// handler.start().await?;
/// // ...
/// handler.stop();
/// # Ok(())
/// # }
/// ```
pub struct MutualAuthHandler {
    state: Arc<watch::Sender<ListenerState>>,
    enabled: Option<Enabled>,
}

impl fmt::Debug for MutualAuthHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutualAuthHandler")
            .field("state", &*self.state.borrow())
            .field(
                "config",
                &self.enabled.as_ref().map(|e| &e.shared.config),
            )
            .field("provider", &"<Arc<dyn CertificateProvider>>")
            .finish()
    }
}

impl MutualAuthHandler {
    /// Creates a handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCertificateProvider`] when a listener port is
    /// configured without a provider. The error is fatal.
    pub fn new(
        config: MutualAuthConfig,
        provider: Option<Arc<dyn CertificateProvider>>,
    ) -> Result<Self> {
        if !config.is_enabled() {
            info!("mutual authentication handler is disabled as no port is configured");
            let (state, _) = watch::channel(ListenerState::Disabled);
            return Ok(Self {
                state: Arc::new(state),
                enabled: None,
            });
        }

        let Some(provider) = provider else {
            error!("no certificate provider configured, but one is required for mutual authentication");
            return Err(Error::MissingCertificateProvider);
        };

        let (state, _) = watch::channel(ListenerState::Idle);
        let state = Arc::new(state);

        let admission = config
            .max_concurrent_handshakes
            .map(|limit| Arc::new(Semaphore::new(limit.get())));

        let shared = Arc::new(Shared {
            provider,
            config,
            admission,
            state: Arc::clone(&state),
        });

        Ok(Self {
            state,
            enabled: Some(Enabled {
                shared,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Returns `true` unless the handler was disabled by configuration.
    pub fn is_enabled(&self) -> bool {
        self.enabled.is_some()
    }

    /// Returns the current listener state.
    pub fn listener_state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Binds the listener and waits until it accepts connections.
    ///
    /// Does nothing on a disabled handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the port can't be bound; the error is fatal.
    /// Returns [`Error::AlreadyStarted`] on a second call, and [`Error::Stopped`]
    /// once [`Self::stop`] has been called; a stopped handler can't be restarted.
    pub async fn start(&self) -> Result<()> {
        let Some(enabled) = &self.enabled else {
            return Ok(());
        };

        if enabled.cancel.is_cancelled() {
            return Err(Error::Stopped);
        }

        if enabled.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        info!("starting mTLS auth handler");

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(listener::listen_for_connections(
            Arc::clone(&enabled.shared),
            enabled.cancel.clone(),
            ready_tx,
        ));

        let addr = ready_rx.await.map_err(|_| {
            Error::Internal("mTLS listener exited before signaling readiness".into())
        })??;

        debug!("mTLS listener ready on {addr}");
        Ok(())
    }

    /// Cancels the listener and returns immediately. The handler can't be started
    /// again afterwards.
    ///
    /// The socket is closed by the accept loop; use [`Self::closed`] to wait for
    /// it. Handshakes already in progress run to completion.
    pub fn stop(&self) {
        if let Some(enabled) = &self.enabled {
            info!("stopping mTLS auth handler");
            enabled.cancel.cancel();
        }
    }

    /// Resolves once no listener socket is open.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|state| {
                matches!(
                    state,
                    ListenerState::Disabled | ListenerState::Idle | ListenerState::Closed
                )
            })
            .await;
    }

    /// Authenticates against the remote node named by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disabled`] on a disabled handler, [`Error::InvalidRequest`]
    /// before any I/O when the remote node address is missing or malformed, and
    /// otherwise the failure of the stage that went wrong.
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResponse> {
        let Some(enabled) = &self.enabled else {
            return Err(Error::Disabled);
        };

        let shared = &enabled.shared;
        crate::client::authenticate(&shared.provider, shared.config.listener_port, request).await
    }

    /// Returns [`AuthType::Spire`].
    pub fn auth_type(&self) -> AuthType {
        AuthType::Spire
    }

    /// Subscribes to the provider's certificate rotation feed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disabled`] on a disabled handler.
    pub fn subscribe_to_rotated_identities(
        &self,
    ) -> Result<broadcast::Receiver<CertificateRotationEvent>> {
        match &self.enabled {
            Some(enabled) => Ok(enabled.shared.provider.subscribe_to_rotated_identities()),
            None => Err(Error::Disabled),
        }
    }
}

impl AuthHandler for MutualAuthHandler {
    fn authenticate(
        &self,
        request: &AuthRequest,
    ) -> impl Future<Output = Result<AuthResponse>> + Send {
        MutualAuthHandler::authenticate(self, request)
    }

    fn auth_type(&self) -> AuthType {
        MutualAuthHandler::auth_type(self)
    }

    fn subscribe_to_rotated_identities(
        &self,
    ) -> Result<broadcast::Receiver<CertificateRotationEvent>> {
        MutualAuthHandler::subscribe_to_rotated_identities(self)
    }
}

impl Drop for MutualAuthHandler {
    fn drop(&mut self) {
        if let Some(enabled) = &self.enabled {
            enabled.cancel.cancel();
        }
    }
}
