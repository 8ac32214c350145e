use crate::{Outbound, session::Peer, session::SessionRegistry};

use std::sync::Arc;

use bytes::Bytes;
use codec::{
    frame::Frame,
    payload::{ChannelMove, Id, PathKind, PeerList, SystemNotice, to_json},
};

/// Fan-out over the per-channel subscriber sets.
///
/// The router reads the registry's tables and stores nothing of its own:
/// subscriber sets are id-keyed and change together with the peer table
/// under the registry lock. Target lists are computed under a read lock
/// and returned as [`Outbound`] records; the caller enqueues them after
/// the lock is gone.
#[derive(Clone)]
pub struct ChannelRouter {
    registry: Arc<SessionRegistry>,
}

impl ChannelRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// System notice to every peer that saw `peer` arrive on its channel.
    pub fn announce_join(&self, peer: &Peer, action: PathKind) -> Vec<Outbound> {
        self.notify(
            peer.channel,
            peer.id,
            &format!("{} has joined", peer.login),
            action,
            &peer_payload(peer, None),
        )
    }

    /// System notice to the channel a departing peer leaves behind.
    pub fn announce_leave(&self, peer: &Peer) -> Vec<Outbound> {
        self.notify(
            peer.channel,
            peer.id,
            &format!("{} has left", peer.login),
            PathKind::Logout,
            &peer_payload(peer, None),
        )
    }

    /// Channel move: the old channel sees an exit, the new one an entrance.
    pub fn announce_move(&self, peer: &Peer, from: i32, to: i32) -> Vec<Outbound> {
        let mut outbounds = self.notify(
            from,
            peer.id,
            &format!("{} has exited", peer.login),
            PathKind::SwitchChannel,
            &peer_payload(peer, Some(ChannelMove::Exit)),
        );

        outbounds.extend(self.notify(
            to,
            peer.id,
            &format!("{} has entered", peer.login),
            PathKind::SwitchChannel,
            &peer_payload(peer, Some(ChannelMove::Enter)),
        ));

        outbounds
    }

    /// Duplicate `bytes` into the outbound queue of every subscriber of
    /// `channel` except the sender.
    pub fn broadcast(&self, channel: i32, except: Id, bytes: Bytes) -> Vec<Outbound> {
        self.registry
            .sockets_on_channel(channel, except)
            .into_iter()
            .map(|target| Outbound {
                target,
                bytes: bytes.clone(),
            })
            .collect()
    }

    /// Single delivery to a live peer, wherever it is.
    pub fn unicast(&self, dest: Id, bytes: Bytes) -> Option<Outbound> {
        self.registry.socket_of(dest).map(|target| Outbound {
            target,
            bytes,
        })
    }

    pub fn list_peers(&self, channel: Option<i32>) -> PeerList {
        PeerList {
            peers: self.registry.list(channel),
            channel,
        }
    }

    fn notify(
        &self,
        channel: i32,
        about: Id,
        text: &str,
        action: PathKind,
        payload: &str,
    ) -> Vec<Outbound> {
        let notice = SystemNotice {
            system: text.to_string(),
            action: action.into(),
            id: about,
            payload: payload.to_string(),
        };

        self.broadcast(channel, about, Frame::ok(&to_json(&notice)).encode())
    }
}

/// `login=..&email=..[&channel_move=0|1]`, the payload format of every
/// system notice about a peer.
fn peer_payload(peer: &Peer, channel_move: Option<ChannelMove>) -> String {
    match channel_move {
        Some(direction) => format!(
            "login={}&email={}&channel_move={}",
            peer.login,
            peer.email,
            i32::from(direction)
        ),
        None => format!("login={}&email={}", peer.login, peer.email),
    }
}
