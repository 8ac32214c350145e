//! Private-session handshake coordination.
//!
//! The coordinator tracks which pair of peers is allowed to exchange key
//! frames and sealed messages. It stores ids and state only: no sockets,
//! no key material, no message bodies. It owns its own mutex and is never
//! locked together with the session registry.

use crate::Error;

use ahash::AHashMap;
use codec::payload::Id;
use parking_lot::Mutex;

/// Per-pair handshake progress.
///
/// `PendingKeys` tracks which of the two sides has already submitted its
/// public key; once both have, the slot is `Active` and sealed messages
/// may flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    PendingConfirm,
    PendingKeys { src_key: bool, dest_key: bool },
    Active,
}

/// One handshake slot. `src` requested the session, `dest` confirms it;
/// the pair is unordered for lookup purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub src: Id,
    pub dest: Id,
    pub state: SlotState,
}

impl Slot {
    pub fn counterpart(&self, id: Id) -> Id {
        if id == self.src { self.dest } else { self.src }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SlotState::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Created,
    /// A request for a pair already awaiting confirmation is a no-op.
    Duplicate,
}

#[derive(Default)]
pub struct HandshakeCoordinator {
    slots: Mutex<AHashMap<(Id, Id), Slot>>,
}

impl HandshakeCoordinator {
    /// `src` asks `dest` for a private session.
    ///
    /// # Test
    ///
    /// ```
    /// use chat_server_service::handshake::{HandshakeCoordinator, RequestOutcome};
    ///
    /// let coordinator = HandshakeCoordinator::default();
    ///
    /// assert_eq!(coordinator.request(1000, 1001).unwrap(), RequestOutcome::Created);
    /// assert_eq!(coordinator.request(1000, 1001).unwrap(), RequestOutcome::Duplicate);
    /// assert!(coordinator.request(1000, 1000).is_err());
    ///
    /// // Confirmation must come from the requested side.
    /// assert!(coordinator.confirm(1000, 1001, true).is_err());
    /// assert!(coordinator.confirm(1001, 1000, true).unwrap());
    ///
    /// // One key on each side activates the slot.
    /// assert!(!coordinator.pubkey(1000).unwrap().1);
    /// let (counterpart, active) = coordinator.pubkey(1001).unwrap();
    /// assert_eq!(counterpart, 1000);
    /// assert!(active);
    /// assert!(coordinator.authorized(1001, 1000));
    /// ```
    pub fn request(&self, src: Id, dest: Id) -> Result<RequestOutcome, Error> {
        if src == dest {
            return Err(Error::InvalidQuery);
        }

        let mut slots = self.slots.lock();
        match slots.get(&pair(src, dest)) {
            Some(slot) if slot.state == SlotState::PendingConfirm => Ok(RequestOutcome::Duplicate),
            Some(_) => Err(Error::Unauthorized),
            None => {
                slots.insert(
                    pair(src, dest),
                    Slot {
                        src,
                        dest,
                        state: SlotState::PendingConfirm,
                    },
                );

                Ok(RequestOutcome::Created)
            }
        }
    }

    /// `confirmer` answers the pending request from `other`. Accepting
    /// moves the slot on to key exchange; rejecting destroys it. Returns
    /// whether the session was accepted.
    pub fn confirm(&self, confirmer: Id, other: Id, accept: bool) -> Result<bool, Error> {
        let mut slots = self.slots.lock();
        let key = pair(confirmer, other);

        match slots.get_mut(&key) {
            Some(slot)
                if slot.state == SlotState::PendingConfirm
                    && slot.dest == confirmer
                    && slot.src == other =>
            {
                if accept {
                    slot.state = SlotState::PendingKeys {
                        src_key: false,
                        dest_key: false,
                    };
                } else {
                    slots.remove(&key);
                }

                Ok(accept)
            }
            _ => Err(Error::Unauthorized),
        }
    }

    /// `owner` submitted its public key. Returns the peer the key must be
    /// forwarded to and whether the slot just became active.
    ///
    /// A key during an already active session is forwarded again without a
    /// state change, which is how clients recover a lost key frame.
    pub fn pubkey(&self, owner: Id) -> Result<(Id, bool), Error> {
        let mut slots = self.slots.lock();

        let slot = slots
            .values_mut()
            .filter(|slot| slot.src == owner || slot.dest == owner)
            .find(|slot| !matches!(slot.state, SlotState::PendingConfirm))
            .ok_or(Error::Unauthorized)?;

        match slot.state {
            SlotState::PendingKeys {
                mut src_key,
                mut dest_key,
            } => {
                if owner == slot.src {
                    src_key = true;
                } else {
                    dest_key = true;
                }

                let active = src_key && dest_key;
                slot.state = if active {
                    SlotState::Active
                } else {
                    SlotState::PendingKeys { src_key, dest_key }
                };

                Ok((slot.counterpart(owner), active))
            }
            SlotState::Active => Ok((slot.counterpart(owner), false)),
            SlotState::PendingConfirm => Err(Error::Unauthorized),
        }
    }

    /// Whether the pair may exchange key frames and sealed messages.
    pub fn authorized(&self, a: Id, b: Id) -> bool {
        self.slots
            .lock()
            .get(&pair(a, b))
            .is_some_and(|slot| !matches!(slot.state, SlotState::PendingConfirm))
    }

    /// Destroy the pair's slot from any state.
    pub fn abort(&self, a: Id, b: Id) -> Result<Slot, Error> {
        self.slots
            .lock()
            .remove(&pair(a, b))
            .ok_or(Error::Unauthorized)
    }

    /// Destroy every slot involving `id`, returning them so that the
    /// caller can release the counterparts. Runs on logout.
    pub fn drop_peer(&self, id: Id) -> Vec<Slot> {
        let mut slots = self.slots.lock();
        let keys: Vec<_> = slots
            .iter()
            .filter(|(_, slot)| slot.src == id || slot.dest == id)
            .map(|(key, _)| *key)
            .collect();

        keys.iter().filter_map(|key| slots.remove(key)).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

fn pair(a: Id, b: Id) -> (Id, Id) {
    (a.min(b), a.max(b))
}
