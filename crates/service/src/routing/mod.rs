//! Request dispatch.
//!
//! One [`Router`] per connection. Decoded frames come in, `(method, path)`
//! selects the operation, and an ordered batch of [`Outbound`] records
//! comes back with the requester's reply always first. Every failed
//! request maps to exactly one status response carrying the matching
//! `action`; only transport failures leave a request unanswered.

mod request;
mod response;

pub use request::is_email_valid;

use crate::{
    AccountStore, Error, Outbound, Service, ServiceHandler,
    session::{Peer, SessionRegistry, channels::ChannelRouter},
};

#[cfg(feature = "secure")]
use crate::{KeyStore, handshake::HandshakeCoordinator};

use std::{net::SocketAddr, sync::Arc};

use codec::{
    frame::{Frame, Method, StartLine},
    payload::{
        LoginForm, Message, PathKind, RegistrationForm, Status, StatusCode, UNKNOWN_ID, from_json,
        to_json,
    },
};

#[cfg(feature = "secure")]
use base64::{Engine, prelude::BASE64_STANDARD};

#[cfg(feature = "secure")]
use codec::payload::{DEFAULT_CHANNEL, PRIVATE_CHANNEL, PrivateConfirmForm, PubkeyForm};

/// Per-connection dispatcher. Cheap to create: it shares the service's
/// registry, coordinator and stores.
pub struct Router<T> {
    socket: SocketAddr,
    registry: Arc<SessionRegistry>,
    channels: ChannelRouter,
    #[cfg(feature = "secure")]
    handshakes: Arc<HandshakeCoordinator>,
    accounts: Arc<dyn AccountStore>,
    #[cfg(feature = "secure")]
    keys: Arc<dyn KeyStore>,
    handler: T,
}

impl<T> Router<T>
where
    T: ServiceHandler + Clone + 'static,
{
    pub(crate) fn new(service: &Service<T>, socket: SocketAddr) -> Self {
        Self {
            socket,
            channels: ChannelRouter::new(service.registry_arc()),
            registry: service.registry_arc(),
            #[cfg(feature = "secure")]
            handshakes: service.handshakes_arc(),
            accounts: service.accounts_arc(),
            #[cfg(feature = "secure")]
            keys: service.keys_arc(),
            handler: service.handler().clone(),
        }
    }

    /// Dispatch one decoded frame.
    pub fn route(&self, frame: &Frame) -> Vec<Outbound> {
        let Frame::Request { start, .. } = frame else {
            log::trace!("dropping response frame from peer: socket={}", self.socket);
            return Vec::new();
        };

        let action = PathKind::from_path(&start.path);
        let result = match (start.method, action) {
            (Method::Get, PathKind::Login) => {
                Ok(vec![response::ok(self.socket, &to_json(&LoginForm::default()))])
            }
            (Method::Post, PathKind::Login) => self.login(frame),
            (Method::Get, PathKind::Register) => Ok(vec![response::ok(
                self.socket,
                &to_json(&RegistrationForm::default()),
            )]),
            (Method::Post, PathKind::Register) => self.register(frame),
            (Method::Post, PathKind::Message) => self.message(frame),
            (Method::Delete, PathKind::Logout) => self.logout(start),
            (Method::Put, PathKind::SwitchChannel) => self.switch_channel(start),
            (Method::Get, PathKind::IsLoggedIn) => self.is_logged_in(start),
            (Method::Get, PathKind::IsRegistered) => self.is_registered(start),
            (Method::Get, PathKind::AllPeers) => self.all_peers(start),
            #[cfg(feature = "secure")]
            (Method::Post, PathKind::PrivateRequest) => self.private_request(start, frame),
            #[cfg(feature = "secure")]
            (Method::Post, PathKind::PrivateConfirm) => self.private_confirm(start, frame),
            #[cfg(feature = "secure")]
            (Method::Post, PathKind::PrivateAbort) => self.private_abort(start, frame),
            #[cfg(feature = "secure")]
            (Method::Post, PathKind::PrivatePubkey) => self.private_pubkey(start, frame),
            _ => Err(Error::InvalidQuery),
        };

        result.unwrap_or_else(|error| {
            if let Error::Store(ref inner) = error {
                log::error!("store failure: path={}, err={}", start.path, inner);
            }

            vec![response::status(
                self.socket,
                error.status_code(),
                action,
                UNKNOWN_ID,
            )]
        })
    }

    fn login(&self, frame: &Frame) -> Result<Vec<Outbound>, Error> {
        let form: LoginForm = from_json(frame.body()).map_err(|_| Error::InvalidForm)?;
        if form.login.is_empty() {
            return Err(Error::InvalidForm);
        }

        // The `login` field accepts a login or an e-mail.
        let account = self
            .accounts
            .find(&form.login)
            .map_err(store_as_form_error)?
            .ok_or(Error::NotRegistered)?;

        if !self
            .accounts
            .verify_password(account.id, &form.password)
            .map_err(store_as_form_error)?
        {
            return Ok(vec![response::status(
                self.socket,
                StatusCode::WrongPassword,
                PathKind::Login,
                account.id,
            )]);
        }

        self.attach(account, PathKind::Login)
    }

    fn register(&self, frame: &Frame) -> Result<Vec<Outbound>, Error> {
        let form: RegistrationForm = from_json(frame.body()).map_err(|_| Error::InvalidForm)?;
        if form.login.is_empty() || !is_email_valid(&form.email) {
            return Err(Error::InvalidForm);
        }

        let account = self
            .accounts
            .create(&form.login, &form.email, &form.password)
            .map_err(store_as_form_error)?
            .ok_or(Error::AlreadyRegistered)?;

        self.handler.on_register(account.id, &account.login);

        // Successful registration logs the peer in right away.
        self.attach(account, PathKind::Register)
    }

    /// Promote an account to a live peer on this connection. The peer's own
    /// status response is always ordered before the join broadcast.
    fn attach(&self, account: crate::Account, action: PathKind) -> Result<Vec<Outbound>, Error> {
        let id = account.id;
        let peer = match self.registry.attach(account, self.socket) {
            Ok(peer) => peer,
            Err(_) => {
                return Ok(vec![response::status(
                    self.socket,
                    StatusCode::AlreadyLoggedIn,
                    action,
                    id,
                )]);
            }
        };

        self.handler.on_login(peer.id, &peer.login);

        let mut outbounds = vec![response::status_body(
            self.socket,
            Status::new(StatusCode::Success, action, peer.id).with_token(peer.token()),
        )];
        outbounds.extend(self.channels.announce_join(&peer, action));

        Ok(outbounds)
    }

    fn logout(&self, start: &StartLine) -> Result<Vec<Outbound>, Error> {
        let id = request::query_id(start, "id")?;
        if !self.registry.owns(self.socket, id) {
            return Err(Error::Unauthorized);
        }

        let peer = self.registry.remove(id).ok_or(Error::Unauthorized)?;
        self.handler.on_logout(peer.id, &peer.login);

        // The requester's confirmation goes out before the departure is
        // announced to anybody else.
        let mut outbounds = vec![response::status(
            self.socket,
            StatusCode::Success,
            PathKind::Logout,
            peer.id,
        )];
        outbounds.extend(self.departure(&peer));

        Ok(outbounds)
    }

    /// Everything that happens after a peer's registry record is gone,
    /// shared by explicit logout and socket-reset cleanup: the departure
    /// broadcast, handshake teardown and key removal.
    pub(crate) fn departure(&self, peer: &Peer) -> Vec<Outbound> {
        let mut outbounds = self.channels.announce_leave(peer);

        #[cfg(feature = "secure")]
        {
            if let Err(error) = self.keys.delete(peer.id) {
                log::error!("key removal failed: id={}, err={}", peer.id, error);
            }

            for slot in self.handshakes.drop_peer(peer.id) {
                self.handler.on_private_closed(slot.src, slot.dest);

                let other = slot.counterpart(peer.id);
                if let Some(other_peer) = self.registry.get(other) {
                    // The counterpart sits on the unlisted channel and
                    // would never see the regular departure broadcast.
                    outbounds.push(leave_notice(&other_peer.socket, peer));
                }

                outbounds.extend(release_pair(
                    &self.registry,
                    &self.channels,
                    slot.src,
                    slot.dest,
                ));
            }
        }

        outbounds
    }

    fn message(&self, frame: &Frame) -> Result<Vec<Outbound>, Error> {
        let message: Message = from_json(frame.body()).map_err(|_| Error::InvalidForm)?;

        let sender = self.registry.get(message.id).ok_or(Error::Unauthorized)?;
        if sender.socket != self.socket {
            return Err(Error::Unauthorized);
        }

        let reply = response::status_body(
            self.socket,
            Status::new(StatusCode::Success, PathKind::Message, sender.id)
                .with_token(sender.token()),
        );

        if message.is_direct() {
            // Self-delivery is suppressed; the sender still gets its status.
            if message.dest_id == message.id {
                return Ok(vec![reply]);
            }

            #[cfg(feature = "secure")]
            if message.is_encrypted() && !self.handshakes.authorized(message.id, message.dest_id) {
                return Err(Error::Unauthorized);
            }

            let delivery = self
                .channels
                .unicast(message.dest_id, frame.encode())
                .ok_or(Error::InvalidQuery)?;

            return Ok(vec![reply, delivery]);
        }

        let mut outbounds = vec![reply];
        outbounds.extend(
            self.channels
                .broadcast(message.channel, message.id, frame.encode()),
        );

        Ok(outbounds)
    }

    fn switch_channel(&self, start: &StartLine) -> Result<Vec<Outbound>, Error> {
        let id = request::query_id(start, "id")?;
        let channel = request::query_i32(start, "channel")?;

        let peer = self.registry.get(id).ok_or(Error::Unauthorized)?;
        if peer.socket != self.socket {
            return Err(Error::Unauthorized);
        }

        let from = self.registry.switch_channel(id, channel)?;
        self.handler.on_channel_switch(id, &peer.login, from, channel);

        let mut outbounds = vec![response::status_body(
            self.socket,
            Status::new(StatusCode::Success, PathKind::SwitchChannel, id)
                .with_token(peer.token()),
        )];
        outbounds.extend(self.channels.announce_move(&peer, from, channel));

        Ok(outbounds)
    }

    fn is_logged_in(&self, start: &StartLine) -> Result<Vec<Outbound>, Error> {
        let name = start.query_value("login").ok_or(Error::InvalidQuery)?;
        let peer = self.registry.find_live(name);

        Ok(vec![response::check(
            self.socket,
            peer.is_some(),
            PathKind::IsLoggedIn,
            peer.map(|peer| peer.id).unwrap_or(UNKNOWN_ID),
        )])
    }

    fn is_registered(&self, start: &StartLine) -> Result<Vec<Outbound>, Error> {
        let name = start.query_value("login").ok_or(Error::InvalidQuery)?;
        let account = self.accounts.find(name)?;

        Ok(vec![response::check(
            self.socket,
            account.is_some(),
            PathKind::IsRegistered,
            account.map(|account| account.id).unwrap_or(UNKNOWN_ID),
        )])
    }

    fn all_peers(&self, start: &StartLine) -> Result<Vec<Outbound>, Error> {
        let channel = match start.query_value("channel") {
            Some(value) => Some(value.parse().map_err(|_| Error::InvalidQuery)?),
            None => None,
        };

        Ok(vec![response::peers(
            self.socket,
            self.channels.list_peers(channel),
        )])
    }

    #[cfg(feature = "secure")]
    fn private_request(&self, start: &StartLine, frame: &Frame) -> Result<Vec<Outbound>, Error> {
        use crate::handshake::RequestOutcome;

        let src = request::query_id(start, "src_id")?;
        let dest = request::query_id(start, "dest_id")?;

        if !self.registry.owns(self.socket, src) {
            return Err(Error::Unauthorized);
        }

        // Both ends must be live before a slot may exist.
        let dest_socket = self.registry.socket_of(dest).ok_or(Error::InvalidQuery)?;

        let reply = response::status(
            self.socket,
            StatusCode::Success,
            PathKind::PrivateRequest,
            src,
        );

        match self.handshakes.request(src, dest)? {
            RequestOutcome::Duplicate => Ok(vec![reply]),
            RequestOutcome::Created => Ok(vec![reply, response::forward(dest_socket, frame)]),
        }
    }

    #[cfg(feature = "secure")]
    fn private_confirm(&self, start: &StartLine, frame: &Frame) -> Result<Vec<Outbound>, Error> {
        let src = request::query_id(start, "src_id")?;
        let dest = request::query_id(start, "dest_id")?;

        if !self.registry.owns(self.socket, src) {
            return Err(Error::Unauthorized);
        }

        let form: PrivateConfirmForm = from_json(frame.body()).map_err(|_| Error::InvalidForm)?;
        self.handshakes
            .confirm(src, dest, form.private_confirm.accept != 0)?;

        let mut outbounds = vec![response::status(
            self.socket,
            StatusCode::Success,
            PathKind::PrivateConfirm,
            src,
        )];

        // Relay the verdict to the requester, accepted or not.
        if let Some(dest_socket) = self.registry.socket_of(dest) {
            outbounds.push(response::forward(dest_socket, frame));
        }

        Ok(outbounds)
    }

    #[cfg(feature = "secure")]
    fn private_abort(&self, start: &StartLine, frame: &Frame) -> Result<Vec<Outbound>, Error> {
        let src = request::query_id(start, "src_id")?;
        let dest = request::query_id(start, "dest_id")?;

        if !self.registry.owns(self.socket, src) {
            return Err(Error::Unauthorized);
        }

        let slot = self.handshakes.abort(src, dest)?;
        self.handler.on_private_closed(slot.src, slot.dest);

        let mut outbounds = vec![response::status(
            self.socket,
            StatusCode::Success,
            PathKind::PrivateAbort,
            src,
        )];

        if let Some(dest_socket) = self.registry.socket_of(dest) {
            outbounds.push(response::forward(dest_socket, frame));
        }

        outbounds.extend(release_pair(
            &self.registry,
            &self.channels,
            slot.src,
            slot.dest,
        ));

        Ok(outbounds)
    }

    #[cfg(feature = "secure")]
    fn private_pubkey(&self, start: &StartLine, frame: &Frame) -> Result<Vec<Outbound>, Error> {
        let id = request::query_id(start, "id")?;

        if !self.registry.owns(self.socket, id) {
            return Err(Error::Unauthorized);
        }

        let form: PubkeyForm = from_json(frame.body()).map_err(|_| Error::InvalidForm)?;
        if BASE64_STANDARD.decode(&form.private_pubkey.key).is_err() {
            return Err(Error::InvalidForm);
        }

        let (counterpart, became_active) = self.handshakes.pubkey(id)?;
        self.keys
            .put(id, &form.private_pubkey.key)
            .map_err(store_as_form_error)?;

        let mut outbounds = vec![response::status(
            self.socket,
            StatusCode::Success,
            PathKind::PrivatePubkey,
            id,
        )];

        // The key body is forwarded opaquely; the server never reads it
        // beyond the shape check above.
        if let Some(socket) = self.registry.socket_of(counterpart) {
            outbounds.push(response::forward(socket, frame));
        }

        if became_active {
            self.handler.on_private_session(id, counterpart);

            // Both peers disappear from the broadcast rosters while the
            // private session lasts.
            for member in [id, counterpart] {
                if let Some(peer) = self.registry.get(member) {
                    if let Some(from) = self.registry.set_channel(member, PRIVATE_CHANNEL) {
                        outbounds.extend(self.channels.announce_move(
                            &peer,
                            from,
                            PRIVATE_CHANNEL,
                        ));
                    }
                }
            }
        }

        Ok(outbounds)
    }
}

/// The shutdown status frame for one socket.
pub(crate) fn terminate_signal(target: SocketAddr) -> Outbound {
    response::terminate(target)
}

/// Bring any pair member still parked on the private sentinel back to the
/// default channel, announcing the return.
#[cfg(feature = "secure")]
fn release_pair(
    registry: &Arc<SessionRegistry>,
    channels: &ChannelRouter,
    src: codec::payload::Id,
    dest: codec::payload::Id,
) -> Vec<Outbound> {
    let mut outbounds = Vec::new();

    for member in [src, dest] {
        if let Some(peer) = registry.get(member) {
            if peer.channel == PRIVATE_CHANNEL {
                registry.set_channel(member, DEFAULT_CHANNEL);
                outbounds.extend(channels.announce_move(&peer, PRIVATE_CHANNEL, DEFAULT_CHANNEL));
            }
        }
    }

    outbounds
}

/// Direct notice to a private-session counterpart that its peer is gone.
#[cfg(feature = "secure")]
fn leave_notice(to: &SocketAddr, peer: &Peer) -> Outbound {
    use codec::payload::SystemNotice;

    let notice = SystemNotice {
        system: format!("{} has left", peer.login),
        action: PathKind::Logout.into(),
        id: peer.id,
        payload: format!("login={}&email={}", peer.login, peer.email),
    };

    Outbound {
        target: *to,
        bytes: Frame::ok(&to_json(&notice)).encode(),
    }
}

/// Form-carrying operations report a broken store as an invalid form.
fn store_as_form_error(error: crate::StoreError) -> Error {
    log::error!("account store failure: {}", error);
    Error::InvalidForm
}
