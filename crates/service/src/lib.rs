//! ## Chat service core
//!
//! The authoritative side of the chat protocol: the session registry that
//! binds authenticated accounts to live sockets, the channel router that
//! fans frames out to subscribers, the private-session handshake
//! coordinator and the request dispatcher tying them together.
//!
//! The crate is deliberately free of I/O: operations consume decoded
//! frames and produce [`Outbound`] records, and the hosting server decides
//! how the bytes reach each socket. Account and key persistence sit behind
//! the [`AccountStore`] and [`KeyStore`] seams.

#[cfg(feature = "secure")]
pub mod handshake;
pub mod routing;
pub mod session;

use crate::{routing::Router, session::SessionRegistry};

#[cfg(feature = "secure")]
use crate::handshake::HandshakeCoordinator;

use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use codec::payload::{Id, StatusCode};

#[derive(Debug)]
pub struct StoreError(pub String);

impl std::error::Error for StoreError {}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "store error: {}", self.0)
    }
}

/// Everything a request can fail with. The connection loop converts each
/// variant into exactly one status response; nothing here tears down the
/// process.
#[derive(Debug)]
pub enum Error {
    WrongPassword,
    NotRegistered,
    AlreadyRegistered,
    AlreadyLoggedIn,
    InvalidForm,
    InvalidQuery,
    Unauthorized,
    WrongChannel,
    SameChannel,
    Store(StoreError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<StoreError> for Error {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl Error {
    /// The wire status for this failure. Store failures surface as
    /// `InvalidQuery`; form-level store failures are mapped before this
    /// point by the routing layer.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::WrongPassword => StatusCode::WrongPassword,
            Self::NotRegistered => StatusCode::NotRegistered,
            Self::AlreadyRegistered => StatusCode::AlreadyRegistered,
            Self::AlreadyLoggedIn => StatusCode::AlreadyLoggedIn,
            Self::InvalidForm => StatusCode::InvalidForm,
            Self::InvalidQuery | Self::Store(_) => StatusCode::InvalidQuery,
            Self::Unauthorized => StatusCode::Unauthorized,
            Self::WrongChannel => StatusCode::WrongChannel,
            Self::SameChannel => StatusCode::SameChannel,
        }
    }
}

/// A persisted account. The password hash never leaves the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Id,
    pub login: String,
    pub email: String,
}

/// Narrow seam over the account database.
///
/// `find` accepts a login or an e-mail; both are candidate keys. `create`
/// returns `None` when the login or e-mail is already taken.
pub trait AccountStore: Send + Sync {
    fn create(&self, login: &str, email: &str, password: &str)
    -> Result<Option<Account>, StoreError>;
    fn find(&self, name: &str) -> Result<Option<Account>, StoreError>;
    fn verify_password(&self, id: Id, password: &str) -> Result<bool, StoreError>;
}

/// Narrow seam over the public-key database. Keys are opaque strings owned
/// by exactly one account.
#[cfg(feature = "secure")]
pub trait KeyStore: Send + Sync {
    fn put(&self, owner: Id, key: &str) -> Result<(), StoreError>;
    fn get(&self, owner: Id) -> Result<Option<String>, StoreError>;
    fn delete(&self, owner: Id) -> Result<(), StoreError>;
}

/// External observer of registry events.
///
/// Hooks fire after the registry mutation committed and while no lock is
/// held; implementations may log, meter or notify, but must not block for
/// long.
pub trait ServiceHandler: Send + Sync {
    #[allow(unused_variables)]
    fn on_login(&self, id: Id, login: &str) {}

    #[allow(unused_variables)]
    fn on_register(&self, id: Id, login: &str) {}

    #[allow(unused_variables)]
    fn on_logout(&self, id: Id, login: &str) {}

    #[allow(unused_variables)]
    fn on_channel_switch(&self, id: Id, login: &str, from: i32, to: i32) {}

    /// Both public keys were exchanged; the pair entered a private session.
    #[cfg(feature = "secure")]
    #[allow(unused_variables)]
    fn on_private_session(&self, src: Id, dest: Id) {}

    #[cfg(feature = "secure")]
    #[allow(unused_variables)]
    fn on_private_closed(&self, src: Id, dest: Id) {}
}

/// One frame bound for one socket. The hosting server owns delivery;
/// per-destination order follows the order of the returned records.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub target: SocketAddr,
    pub bytes: Bytes,
}

pub struct ServiceOptions<T> {
    pub accounts: Arc<dyn AccountStore>,
    #[cfg(feature = "secure")]
    pub keys: Arc<dyn KeyStore>,
    pub handler: T,
}

/// Chat service.
#[derive(Clone)]
pub struct Service<T> {
    registry: Arc<SessionRegistry>,
    #[cfg(feature = "secure")]
    handshakes: Arc<HandshakeCoordinator>,
    accounts: Arc<dyn AccountStore>,
    #[cfg(feature = "secure")]
    keys: Arc<dyn KeyStore>,
    handler: T,
}

impl<T> Service<T>
where
    T: ServiceHandler + Clone + 'static,
{
    pub fn new(options: ServiceOptions<T>) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::default()),
            #[cfg(feature = "secure")]
            handshakes: Arc::new(HandshakeCoordinator::default()),
            accounts: options.accounts,
            #[cfg(feature = "secure")]
            keys: options.keys,
            handler: options.handler,
        }
    }

    /// Get the request router for one connection.
    pub fn get_router(&self, socket: SocketAddr) -> Router<T> {
        Router::new(self, socket)
    }

    /// Connection-loop hook for EOF, read errors and timeouts. Idempotent:
    /// a socket without a live peer produces nothing. The returned frames
    /// announce the departure to whoever could still see the peer.
    pub fn logout_on_socket_reset(&self, socket: SocketAddr) -> Vec<Outbound> {
        let Some(peer) = self.registry.remove_by_socket(socket) else {
            return Vec::new();
        };

        self.handler.on_logout(peer.id, &peer.login);
        self.get_router(socket).departure(&peer)
    }

    /// Shutdown signal for every live peer: one status frame carrying the
    /// terminate code per connected socket.
    pub fn terminate_all(&self) -> Vec<Outbound> {
        self.registry
            .all_sockets()
            .into_iter()
            .map(routing::terminate_signal)
            .collect()
    }

    pub fn get_registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[cfg(feature = "secure")]
    pub fn get_handshakes(&self) -> &HandshakeCoordinator {
        &self.handshakes
    }

    pub(crate) fn registry_arc(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    #[cfg(feature = "secure")]
    pub(crate) fn handshakes_arc(&self) -> Arc<HandshakeCoordinator> {
        self.handshakes.clone()
    }

    pub(crate) fn accounts_arc(&self) -> Arc<dyn AccountStore> {
        self.accounts.clone()
    }

    #[cfg(feature = "secure")]
    pub(crate) fn keys_arc(&self) -> Arc<dyn KeyStore> {
        self.keys.clone()
    }

    pub(crate) fn handler(&self) -> &T {
        &self.handler
    }
}
