pub mod channels;

use crate::{Account, Error};

use std::net::SocketAddr;

use ahash::{AHashMap, AHashSet};
use codec::payload::{DEFAULT_CHANNEL, Id, PeerInfo};
use parking_lot::RwLock;
use rand::Rng;

/// A live, authenticated peer: the in-memory projection of an account for
/// the interval between login and logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: Id,
    pub login: String,
    pub email: String,
    pub channel: i32,
    pub socket: SocketAddr,
    token: String,
}

impl Peer {
    /// The session secret issued at login.
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// All registry maps change together under one lock: the peer table, the
/// three unique indexes over it and the per-channel subscriber sets.
#[derive(Default)]
struct Tables {
    peers: AHashMap<Id, Peer>,
    logins: AHashMap<String, Id>,
    emails: AHashMap<String, Id>,
    sockets: AHashMap<SocketAddr, Id>,
    channels: AHashMap<i32, AHashSet<Id>>,
}

impl Tables {
    /// Move `id` between subscriber sets. Negative channels are unlisted,
    /// so peers parked there simply leave the index.
    fn reindex_channel(&mut self, id: Id, from: i32, to: i32) {
        if let Some(set) = self.channels.get_mut(&from) {
            set.remove(&id);
            if set.is_empty() {
                self.channels.remove(&from);
            }
        }

        if to >= 0 {
            self.channels.entry(to).or_default().insert(id);
        }
    }
}

/// The session registry: sole owner of [`Peer`] records and of the unique
/// `{id, login, email, socket}` indexes over them.
///
/// Readers take shared access, mutators exclusive access; no method holds
/// the lock across anything that can block.
///
/// # Test
///
/// ```
/// use chat_server_service::{Account, session::SessionRegistry};
///
/// let registry = SessionRegistry::default();
/// let socket = "127.0.0.1:50000".parse().unwrap();
///
/// let account = Account {
///     id: 1000,
///     login: "maxim".to_string(),
///     email: "m@x.ru".to_string(),
/// };
///
/// let peer = registry.attach(account.clone(), socket).unwrap();
/// assert_eq!(peer.channel, 0);
/// assert!(registry.authorize(1000, peer.token()));
/// assert!(!registry.authorize(1000, "forged"));
///
/// // The unique-login invariant holds even from another socket.
/// let other = "127.0.0.1:50001".parse().unwrap();
/// assert!(registry.attach(account, other).is_err());
///
/// assert!(registry.remove(1000).is_some());
/// assert!(registry.remove(1000).is_none());
/// ```
#[derive(Default)]
pub struct SessionRegistry {
    tables: RwLock<Tables>,
}

impl SessionRegistry {
    /// Promote an account to a live peer on `socket`, joining the default
    /// channel and issuing a fresh token.
    ///
    /// Fails with `AlreadyLoggedIn` when the id, login or e-mail already
    /// has a live session, or when the socket already owns one; the
    /// existing session is never disturbed.
    pub fn attach(&self, account: Account, socket: SocketAddr) -> Result<Peer, Error> {
        let mut tables = self.tables.write();

        if tables.peers.contains_key(&account.id)
            || tables.logins.contains_key(&account.login)
            || tables.emails.contains_key(&account.email)
            || tables.sockets.contains_key(&socket)
        {
            return Err(Error::AlreadyLoggedIn);
        }

        let peer = Peer {
            id: account.id,
            login: account.login,
            email: account.email,
            channel: DEFAULT_CHANNEL,
            socket,
            token: make_token(),
        };

        tables.logins.insert(peer.login.clone(), peer.id);
        tables.emails.insert(peer.email.clone(), peer.id);
        tables.sockets.insert(socket, peer.id);
        tables
            .channels
            .entry(DEFAULT_CHANNEL)
            .or_default()
            .insert(peer.id);
        tables.peers.insert(peer.id, peer.clone());

        Ok(peer)
    }

    /// Remove a live peer and every index entry pointing at it.
    pub fn remove(&self, id: Id) -> Option<Peer> {
        let mut tables = self.tables.write();
        let peer = tables.peers.remove(&id)?;

        tables.logins.remove(&peer.login);
        tables.emails.remove(&peer.email);
        tables.sockets.remove(&peer.socket);
        tables.reindex_channel(id, peer.channel, -1);

        Some(peer)
    }

    /// Logout driven by a socket reset. Idempotent: a second call for the
    /// same socket finds no owner and does nothing.
    pub fn remove_by_socket(&self, socket: SocketAddr) -> Option<Peer> {
        let id = { *self.tables.read().sockets.get(&socket)? };
        self.remove(id)
    }

    pub fn get(&self, id: Id) -> Option<Peer> {
        self.tables.read().peers.get(&id).cloned()
    }

    /// Look up a live peer by login or e-mail.
    pub fn find_live(&self, name: &str) -> Option<Peer> {
        let tables = self.tables.read();
        let id = tables
            .logins
            .get(name)
            .or_else(|| tables.emails.get(name))?;

        tables.peers.get(id).cloned()
    }

    /// True iff `id` is live and the token matches.
    pub fn authorize(&self, id: Id, token: &str) -> bool {
        self.tables
            .read()
            .peers
            .get(&id)
            .is_some_and(|peer| peer.token == token)
    }

    /// True iff the peer with `id` is live and owned by `socket`. This is
    /// the authorization rule for id-bearing requests: they must arrive on
    /// the connection that logged the id in.
    pub fn owns(&self, socket: SocketAddr, id: Id) -> bool {
        self.tables
            .read()
            .peers
            .get(&id)
            .is_some_and(|peer| peer.socket == socket)
    }

    /// Explicit channel switch.
    ///
    /// Negative channels are reserved (`WrongChannel`); switching to the
    /// current channel is reported as `SameChannel` and changes nothing.
    /// Returns the channel the peer came from.
    ///
    /// # Test
    ///
    /// ```
    /// use chat_server_service::{Account, Error, session::SessionRegistry};
    ///
    /// let registry = SessionRegistry::default();
    /// let socket = "127.0.0.1:50000".parse().unwrap();
    ///
    /// registry
    ///     .attach(
    ///         Account {
    ///             id: 1000,
    ///             login: "maxim".to_string(),
    ///             email: "m@x.ru".to_string(),
    ///         },
    ///         socket,
    ///     )
    ///     .unwrap();
    ///
    /// assert!(matches!(registry.switch_channel(1000, -5), Err(Error::WrongChannel)));
    /// assert!(matches!(registry.switch_channel(1000, 0), Err(Error::SameChannel)));
    /// assert_eq!(registry.switch_channel(1000, 7).unwrap(), 0);
    /// assert_eq!(registry.get(1000).unwrap().channel, 7);
    /// ```
    pub fn switch_channel(&self, id: Id, to: i32) -> Result<i32, Error> {
        if to < 0 {
            return Err(Error::WrongChannel);
        }

        let mut tables = self.tables.write();
        let from = match tables.peers.get(&id) {
            Some(peer) => peer.channel,
            None => return Err(Error::Unauthorized),
        };

        if from == to {
            return Err(Error::SameChannel);
        }

        if let Some(peer) = tables.peers.get_mut(&id) {
            peer.channel = to;
        }
        tables.reindex_channel(id, from, to);

        Ok(from)
    }

    /// Unconditional channel move, used to park peers on the private
    /// sentinel and to bring them back. Returns the previous channel.
    pub fn set_channel(&self, id: Id, to: i32) -> Option<i32> {
        let mut tables = self.tables.write();
        let from = tables.peers.get(&id)?.channel;

        if let Some(peer) = tables.peers.get_mut(&id) {
            peer.channel = to;
        }
        tables.reindex_channel(id, from, to);

        Some(from)
    }

    /// Roster query. With a channel filter only that channel's subscribers
    /// are returned; without it every live peer, including parked ones.
    pub fn list(&self, channel: Option<i32>) -> Vec<PeerInfo> {
        let tables = self.tables.read();

        let infos = |peer: &Peer| PeerInfo {
            id: peer.id,
            login: peer.login.clone(),
            channel: peer.channel,
        };

        match channel {
            Some(channel) => tables
                .channels
                .get(&channel)
                .into_iter()
                .flatten()
                .filter_map(|id| tables.peers.get(id))
                .map(infos)
                .collect(),
            None => tables.peers.values().map(infos).collect(),
        }
    }

    /// Sockets of every subscriber of `channel` except `except`.
    pub fn sockets_on_channel(&self, channel: i32, except: Id) -> Vec<SocketAddr> {
        let tables = self.tables.read();

        tables
            .channels
            .get(&channel)
            .into_iter()
            .flatten()
            .filter(|&&id| id != except)
            .filter_map(|id| tables.peers.get(id))
            .map(|peer| peer.socket)
            .collect()
    }

    pub fn socket_of(&self, id: Id) -> Option<SocketAddr> {
        self.tables.read().peers.get(&id).map(|peer| peer.socket)
    }

    /// Sockets of every live peer, for shutdown fan-out.
    pub fn all_sockets(&self) -> Vec<SocketAddr> {
        self.tables
            .read()
            .peers
            .values()
            .map(|peer| peer.socket)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tables.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().peers.is_empty()
    }
}

/// 128 bits of session secret, hex encoded.
fn make_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);

    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
