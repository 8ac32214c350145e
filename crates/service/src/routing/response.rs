//! Builders for the frames the server originates.

use crate::Outbound;

use std::net::SocketAddr;

use codec::{
    frame::Frame,
    payload::{
        Check, Id, PathKind, PeerList, SERVER_ID, Status, StatusCode, TERMINATE_CODE, to_json,
    },
};

/// A bare `200 OK` around a body, for form and roster replies.
pub(crate) fn ok(to: SocketAddr, body: &str) -> Outbound {
    Outbound {
        target: to,
        bytes: Frame::ok(body).encode(),
    }
}

pub(crate) fn status(to: SocketAddr, code: StatusCode, action: PathKind, id: Id) -> Outbound {
    status_body(to, Status::new(code, action, id))
}

pub(crate) fn status_body(to: SocketAddr, status: Status) -> Outbound {
    ok(to, &to_json(&status))
}

pub(crate) fn check(to: SocketAddr, found: bool, action: PathKind, id: Id) -> Outbound {
    ok(
        to,
        &to_json(&Check {
            check: i32::from(found),
            action: action.into(),
            id,
        }),
    )
}

pub(crate) fn peers(to: SocketAddr, list: PeerList) -> Outbound {
    ok(to, &to_json(&list))
}

/// Re-emit a request frame towards another peer. Message fan-out and the
/// handshake relay both deliver the sender's frame verbatim.
pub(crate) fn forward(to: SocketAddr, frame: &Frame) -> Outbound {
    Outbound {
        target: to,
        bytes: frame.encode(),
    }
}

/// The shutdown signal: a status frame with the terminate code.
pub(crate) fn terminate(to: SocketAddr) -> Outbound {
    status_body(
        to,
        Status {
            code: TERMINATE_CODE,
            action: PathKind::Unknown.into(),
            id: SERVER_ID,
            token: String::new(),
            payload: String::new(),
        },
    )
}
