use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
};

use anyhow::Result;
use chat_server_service::{
    Account, AccountStore, Outbound, Service, ServiceHandler, ServiceOptions, StoreError,
};
use codec::{
    Decoder,
    frame::{Frame, Method},
    payload::{
        Check, LoginForm, MIN_ACCOUNT_ID, Message, PathKind, PeerList, RegistrationForm, Status,
        StatusCode, SystemNotice, from_json, to_json,
    },
};
use parking_lot::Mutex;

#[cfg(feature = "secure")]
use chat_server_service::KeyStore;

#[derive(Default, Clone)]
struct Handler;

impl ServiceHandler for Handler {}

#[derive(Default)]
struct TestAccounts {
    rows: Mutex<HashMap<i64, (String, String, String)>>,
}

impl AccountStore for TestAccounts {
    fn create(
        &self,
        login: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<Account>, StoreError> {
        let mut rows = self.rows.lock();
        if rows
            .values()
            .any(|(row_login, row_email, _)| row_login == login || row_email == email)
        {
            return Ok(None);
        }

        let id = MIN_ACCOUNT_ID + rows.len() as i64;
        rows.insert(id, (login.to_string(), email.to_string(), password.to_string()));

        Ok(Some(Account {
            id,
            login: login.to_string(),
            email: email.to_string(),
        }))
    }

    fn find(&self, name: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.rows.lock().iter().find_map(|(id, (login, email, _))| {
            (login == name || email == name).then(|| Account {
                id: *id,
                login: login.clone(),
                email: email.clone(),
            })
        }))
    }

    fn verify_password(&self, id: i64, password: &str) -> Result<bool, StoreError> {
        Ok(self
            .rows
            .lock()
            .get(&id)
            .is_some_and(|(_, _, stored)| stored == password))
    }
}

#[cfg(feature = "secure")]
#[derive(Default)]
struct TestKeys {
    rows: Mutex<HashMap<i64, String>>,
}

#[cfg(feature = "secure")]
impl KeyStore for TestKeys {
    fn put(&self, owner: i64, key: &str) -> Result<(), StoreError> {
        self.rows.lock().insert(owner, key.to_string());
        Ok(())
    }

    fn get(&self, owner: i64) -> Result<Option<String>, StoreError> {
        Ok(self.rows.lock().get(&owner).cloned())
    }

    fn delete(&self, owner: i64) -> Result<(), StoreError> {
        self.rows.lock().remove(&owner);
        Ok(())
    }
}

fn make_service() -> Service<Handler> {
    Service::new(ServiceOptions {
        accounts: Arc::new(TestAccounts::default()),
        #[cfg(feature = "secure")]
        keys: Arc::new(TestKeys::default()),
        handler: Handler,
    })
}

fn socket(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Decode the single frame inside an outbound record.
fn frame_of(outbound: &Outbound) -> Frame {
    let mut decoder = Decoder::default();
    let mut frames = decoder.decode(&outbound.bytes);

    assert_eq!(frames.len(), 1);
    frames.remove(0).unwrap()
}

fn status_of(outbound: &Outbound) -> Status {
    from_json(frame_of(outbound).body()).unwrap()
}

fn notice_of(outbound: &Outbound) -> SystemNotice {
    from_json(frame_of(outbound).body()).unwrap()
}

fn register_frame(login: &str, email: &str) -> Frame {
    Frame::request(
        Method::Post,
        "/register",
        &to_json(&RegistrationForm {
            login: login.to_string(),
            email: email.to_string(),
            password: "x".to_string(),
        }),
    )
}

/// Register an account and log it in on `port`, returning its status.
fn join(service: &Service<Handler>, login: &str, email: &str, port: u16) -> Status {
    let router = service.get_router(socket(port));
    let outbounds = router.route(&register_frame(login, email));
    status_of(&outbounds[0])
}

fn message_frame(id: i64, login: &str, channel: i32, dest_id: i64, text: &str) -> Frame {
    Frame::request(
        Method::Post,
        "/message",
        &to_json(&Message {
            id,
            login: login.to_string(),
            email: format!("{login}@x.ru"),
            channel,
            dest_id,
            timestamp: 1461516681500,
            size: text.len(),
            encrypted: 0,
            message: text.to_string(),
        }),
    )
}

#[test]
fn test_login_before_register_is_rejected() -> Result<()> {
    let service = make_service();
    let router = service.get_router(socket(40000));

    let outbounds = router.route(&Frame::request(
        Method::Post,
        "/login",
        &to_json(&LoginForm {
            login: "maxim".to_string(),
            password: "x".to_string(),
        }),
    ));

    assert_eq!(outbounds.len(), 1);
    let status = status_of(&outbounds[0]);
    assert_eq!(status.code, StatusCode::NotRegistered as i32);
    assert_eq!(status.action, PathKind::Login as i32);
    assert_eq!(status.id, 0);
    assert!(status.token.is_empty());

    Ok(())
}

#[test]
fn test_register_logs_in_and_rejects_duplicates() -> Result<()> {
    let service = make_service();

    let router = service.get_router(socket(40000));
    let outbounds = router.route(&register_frame("maxim", "m@x.ru"));
    let status = status_of(&outbounds[0]);

    assert_eq!(status.code, StatusCode::Success as i32);
    assert_eq!(status.action, PathKind::Register as i32);
    assert_eq!(status.id, 1000);
    assert!(!status.token.is_empty());
    assert!(service.get_registry().authorize(1000, &status.token));

    // The same form from another socket is already registered.
    let other = service.get_router(socket(40001));
    let outbounds = other.route(&register_frame("maxim", "m@x.ru"));
    let status = status_of(&outbounds[0]);
    assert_eq!(status.code, StatusCode::AlreadyRegistered as i32);

    Ok(())
}

#[test]
fn test_second_login_does_not_disturb_the_session() -> Result<()> {
    let service = make_service();
    let first = join(&service, "maxim", "m@x.ru", 40000);

    let router = service.get_router(socket(40001));
    let outbounds = router.route(&Frame::request(
        Method::Post,
        "/login",
        &to_json(&LoginForm {
            login: "maxim".to_string(),
            password: "x".to_string(),
        }),
    ));

    let status = status_of(&outbounds[0]);
    assert_eq!(status.code, StatusCode::AlreadyLoggedIn as i32);
    assert_eq!(status.id, 1000);

    // The original session and its token survive.
    assert!(service.get_registry().authorize(1000, &first.token));
    assert_eq!(service.get_registry().get(1000).unwrap().socket, socket(40000));

    Ok(())
}

#[test]
fn test_login_by_email_and_wrong_password() -> Result<()> {
    let service = make_service();
    join(&service, "maxim", "m@x.ru", 40000);

    let logout = service.get_router(socket(40000)).route(&Frame::request_with_query(
        Method::Delete,
        "/logout",
        &[("id", "1000")],
        "",
    ));
    assert_eq!(status_of(&logout[0]).code, StatusCode::Success as i32);

    let router = service.get_router(socket(40001));

    let wrong = router.route(&Frame::request(
        Method::Post,
        "/login",
        &to_json(&LoginForm {
            login: "m@x.ru".to_string(),
            password: "nope".to_string(),
        }),
    ));
    assert_eq!(status_of(&wrong[0]).code, StatusCode::WrongPassword as i32);

    // The login field accepts the e-mail as well.
    let right = router.route(&Frame::request(
        Method::Post,
        "/login",
        &to_json(&LoginForm {
            login: "m@x.ru".to_string(),
            password: "x".to_string(),
        }),
    ));
    assert_eq!(status_of(&right[0]).code, StatusCode::Success as i32);
    assert_eq!(status_of(&right[0]).id, 1000);

    Ok(())
}

#[test]
fn test_broadcast_reaches_the_channel_but_not_the_sender() -> Result<()> {
    let service = make_service();
    join(&service, "a", "a@x.ru", 40000);
    join(&service, "b", "b@x.ru", 40001);

    let frame = message_frame(1000, "a", 0, 0, "hello");
    let outbounds = service.get_router(socket(40000)).route(&frame);

    // Reply to A first, delivery to B second; A gets no copy.
    assert_eq!(outbounds.len(), 2);
    assert_eq!(outbounds[0].target, socket(40000));
    assert_eq!(status_of(&outbounds[0]).code, StatusCode::Success as i32);

    assert_eq!(outbounds[1].target, socket(40001));
    assert_eq!(frame_of(&outbounds[1]), frame);

    Ok(())
}

#[test]
fn test_channels_isolate_broadcasts() -> Result<()> {
    let service = make_service();
    join(&service, "a", "a@x.ru", 40000);
    join(&service, "b", "b@x.ru", 40001);

    // B moves to channel 7; A observes the exit from channel 0.
    let outbounds = service.get_router(socket(40001)).route(&Frame::request_with_query(
        Method::Put,
        "/switch_channel",
        &[("id", "1001"), ("channel", "7")],
        "",
    ));

    assert_eq!(status_of(&outbounds[0]).code, StatusCode::Success as i32);
    assert_eq!(outbounds[1].target, socket(40000));

    let notice = notice_of(&outbounds[1]);
    assert_eq!(notice.system, "b has exited");
    assert_eq!(notice.action, PathKind::SwitchChannel as i32);
    assert_eq!(notice.id, 1001);
    assert_eq!(notice.payload, "login=b&email=b@x.ru&channel_move=1");

    // A's channel-0 broadcast no longer reaches B.
    let outbounds = service
        .get_router(socket(40000))
        .route(&message_frame(1000, "a", 0, 0, "hello"));
    assert_eq!(outbounds.len(), 1);

    // B returns; A sees the entrance notice.
    let outbounds = service.get_router(socket(40001)).route(&Frame::request_with_query(
        Method::Put,
        "/switch_channel",
        &[("id", "1001"), ("channel", "0")],
        "",
    ));

    let notice = notice_of(&outbounds[1]);
    assert_eq!(notice.system, "b has entered");
    assert_eq!(notice.payload, "login=b&email=b@x.ru&channel_move=0");

    Ok(())
}

#[test]
fn test_switch_channel_boundary_codes() -> Result<()> {
    let service = make_service();
    join(&service, "a", "a@x.ru", 40000);

    let router = service.get_router(socket(40000));

    let same = router.route(&Frame::request_with_query(
        Method::Put,
        "/switch_channel",
        &[("id", "1000"), ("channel", "0")],
        "",
    ));
    assert_eq!(status_of(&same[0]).code, StatusCode::SameChannel as i32);

    let wrong = router.route(&Frame::request_with_query(
        Method::Put,
        "/switch_channel",
        &[("id", "1000"), ("channel", "-3")],
        "",
    ));
    assert_eq!(status_of(&wrong[0]).code, StatusCode::WrongChannel as i32);

    // Someone else's id on this socket is not authorized.
    let foreign = router.route(&Frame::request_with_query(
        Method::Put,
        "/switch_channel",
        &[("id", "1001"), ("channel", "2")],
        "",
    ));
    assert_eq!(status_of(&foreign[0]).code, StatusCode::Unauthorized as i32);

    Ok(())
}

#[test]
fn test_direct_message_ignores_channels_but_requires_a_live_peer() -> Result<()> {
    let service = make_service();
    join(&service, "a", "a@x.ru", 40000);
    join(&service, "b", "b@x.ru", 40001);

    service.get_router(socket(40001)).route(&Frame::request_with_query(
        Method::Put,
        "/switch_channel",
        &[("id", "1001"), ("channel", "7")],
        "",
    ));

    // Cross-channel direct delivery works.
    let outbounds = service
        .get_router(socket(40000))
        .route(&message_frame(1000, "a", 0, 1001, "psst"));
    assert_eq!(outbounds.len(), 2);
    assert_eq!(outbounds[1].target, socket(40001));

    // An offline destination is an invalid query.
    let outbounds = service
        .get_router(socket(40000))
        .route(&message_frame(1000, "a", 0, 1999, "psst"));
    assert_eq!(outbounds.len(), 1);
    assert_eq!(status_of(&outbounds[0]).code, StatusCode::InvalidQuery as i32);

    Ok(())
}

#[test]
fn test_logout_announces_departure_and_reset_is_idempotent() -> Result<()> {
    let service = make_service();
    join(&service, "a", "a@x.ru", 40000);
    join(&service, "b", "b@x.ru", 40001);

    let outbounds = service.get_router(socket(40000)).route(&Frame::request_with_query(
        Method::Delete,
        "/logout",
        &[("id", "1000")],
        "",
    ));

    // Reply to the requester precedes the broadcast about it.
    assert_eq!(outbounds[0].target, socket(40000));
    assert_eq!(status_of(&outbounds[0]).code, StatusCode::Success as i32);
    assert_eq!(outbounds[1].target, socket(40001));
    assert_eq!(notice_of(&outbounds[1]).system, "a has left");

    assert!(service.get_registry().get(1000).is_none());

    // Reset cleanup for an already departed socket does nothing, twice.
    assert!(service.logout_on_socket_reset(socket(40000)).is_empty());
    assert!(service.logout_on_socket_reset(socket(40000)).is_empty());

    Ok(())
}

#[test]
fn test_socket_reset_logs_the_peer_out() -> Result<()> {
    let service = make_service();
    join(&service, "a", "a@x.ru", 40000);
    join(&service, "b", "b@x.ru", 40001);

    let outbounds = service.logout_on_socket_reset(socket(40000));
    assert_eq!(outbounds.len(), 1);
    assert_eq!(outbounds[0].target, socket(40001));

    let check: Check = {
        let outbounds = service.get_router(socket(40002)).route(&Frame::request_with_query(
            Method::Get,
            "/is_logged_in",
            &[("login", "a")],
            "",
        ));
        from_json(frame_of(&outbounds[0]).body())?
    };

    assert_eq!(check.check, 0);
    assert_eq!(check.action, PathKind::IsLoggedIn as i32);

    Ok(())
}

#[test]
fn test_checks_and_rosters() -> Result<()> {
    let service = make_service();
    join(&service, "a", "a@x.ru", 40000);
    join(&service, "b", "b@x.ru", 40001);

    service.get_router(socket(40001)).route(&Frame::request_with_query(
        Method::Put,
        "/switch_channel",
        &[("id", "1001"), ("channel", "7")],
        "",
    ));

    // Checks work without a session of their own.
    let router = service.get_router(socket(40002));

    let registered = router.route(&Frame::request_with_query(
        Method::Get,
        "/is_registered",
        &[("login", "b@x.ru")],
        "",
    ));
    let check: Check = from_json(frame_of(&registered[0]).body())?;
    assert_eq!(check.check, 1);
    assert_eq!(check.id, 1001);

    let everyone = router.route(&Frame::request(Method::Get, "/all_peers", ""));
    let list: PeerList = from_json(frame_of(&everyone[0]).body())?;
    assert_eq!(list.peers.len(), 2);
    assert_eq!(list.channel, None);

    let on_seven = router.route(&Frame::request_with_query(
        Method::Get,
        "/all_peers",
        &[("channel", "7")],
        "",
    ));
    let list: PeerList = from_json(frame_of(&on_seven[0]).body())?;
    assert_eq!(list.channel, Some(7));
    assert_eq!(list.peers.len(), 1);
    assert_eq!(list.peers[0].login, "b");
    assert_eq!(list.peers[0].channel, 7);

    Ok(())
}

#[test]
fn test_unknown_route_answers_invalid_query() -> Result<()> {
    let service = make_service();
    let router = service.get_router(socket(40000));

    let outbounds = router.route(&Frame::request(Method::Get, "/nope", ""));

    assert_eq!(outbounds.len(), 1);
    let status = status_of(&outbounds[0]);
    assert_eq!(status.code, StatusCode::InvalidQuery as i32);
    assert_eq!(status.action, PathKind::Unknown as i32);

    Ok(())
}

#[cfg(feature = "secure")]
mod secure {
    use super::*;
    use codec::payload::{
        ConfirmBody, HandshakePair, PrivateConfirmForm, PrivateRequestForm, PubkeyBody, PubkeyForm,
    };

    fn private_request_frame(src: i64, dest: i64) -> Frame {
        Frame::request_with_query(
            Method::Post,
            "/private_request",
            &[("src_id", &src.to_string()), ("dest_id", &dest.to_string())],
            &to_json(&PrivateRequestForm {
                private_request: HandshakePair {
                    src_id: src,
                    dest_id: dest,
                },
            }),
        )
    }

    fn confirm_frame(src: i64, dest: i64, accept: i32) -> Frame {
        Frame::request_with_query(
            Method::Post,
            "/private_confirm",
            &[("src_id", &src.to_string()), ("dest_id", &dest.to_string())],
            &to_json(&PrivateConfirmForm {
                private_confirm: ConfirmBody {
                    src_id: src,
                    dest_id: dest,
                    accept,
                },
            }),
        )
    }

    fn pubkey_frame(id: i64, key: &str) -> Frame {
        Frame::request_with_query(
            Method::Post,
            "/private_pubkey",
            &[("id", &id.to_string())],
            &to_json(&PubkeyForm {
                private_pubkey: PubkeyBody {
                    key: key.to_string(),
                },
            }),
        )
    }

    /// The whole happy path: request, confirm, both keys, sealed message.
    #[test]
    fn test_private_session_establishment() -> Result<()> {
        let service = make_service();
        join(&service, "a", "a@x.ru", 40000);
        join(&service, "b", "b@x.ru", 40001);
        join(&service, "c", "c@x.ru", 40002);

        // A asks B; the request frame is relayed to B only.
        let frame = private_request_frame(1000, 1001);
        let outbounds = service.get_router(socket(40000)).route(&frame);
        assert_eq!(outbounds.len(), 2);
        assert_eq!(status_of(&outbounds[0]).code, StatusCode::Success as i32);
        assert_eq!(outbounds[1].target, socket(40001));
        assert_eq!(frame_of(&outbounds[1]), frame);

        // A duplicate request is a quiet no-op.
        let outbounds = service
            .get_router(socket(40000))
            .route(&private_request_frame(1000, 1001));
        assert_eq!(outbounds.len(), 1);
        assert_eq!(status_of(&outbounds[0]).code, StatusCode::Success as i32);

        // Keys are rejected until B accepts.
        let outbounds = service
            .get_router(socket(40000))
            .route(&pubkey_frame(1000, "QUtFWQ=="));
        assert_eq!(status_of(&outbounds[0]).code, StatusCode::Unauthorized as i32);

        let outbounds = service
            .get_router(socket(40001))
            .route(&confirm_frame(1001, 1000, 1));
        assert_eq!(status_of(&outbounds[0]).code, StatusCode::Success as i32);
        assert_eq!(outbounds[1].target, socket(40000));

        // First key: stored and relayed, session not active yet.
        let outbounds = service
            .get_router(socket(40000))
            .route(&pubkey_frame(1000, "QUtFWQ=="));
        assert_eq!(outbounds.len(), 2);
        assert_eq!(outbounds[1].target, socket(40001));

        // Second key activates the session and parks both peers off the
        // broadcast roster; C on channel 0 sees the exits.
        let outbounds = service
            .get_router(socket(40001))
            .route(&pubkey_frame(1001, "QktFWQ=="));
        assert!(outbounds.len() >= 2);
        assert!(service.get_handshakes().authorized(1000, 1001));

        let exits: Vec<_> = outbounds[2..]
            .iter()
            .filter(|outbound| outbound.target == socket(40002))
            .map(|outbound| notice_of(outbound))
            .collect();
        assert_eq!(exits.len(), 2);
        assert!(exits.iter().all(|notice| notice.system.ends_with("has exited")));

        let list: PeerList = {
            let outbounds = service.get_router(socket(40002)).route(
                &Frame::request_with_query(Method::Get, "/all_peers", &[("channel", "0")], ""),
            );
            from_json(frame_of(&outbounds[0]).body())?
        };
        assert_eq!(list.peers.len(), 1);
        assert_eq!(list.peers[0].login, "c");

        // A sealed direct message flows through opaquely.
        let sealed = Frame::request(
            Method::Post,
            "/message",
            &to_json(&Message {
                id: 1000,
                login: "a".to_string(),
                email: "a@x.ru".to_string(),
                channel: -1,
                dest_id: 1001,
                timestamp: 1,
                size: 14,
                encrypted: 1,
                message: "4:2:4:2:6:3-----*****-----aabbccddeeff00".to_string(),
            }),
        );
        let outbounds = service.get_router(socket(40000)).route(&sealed);
        assert_eq!(outbounds.len(), 2);
        assert_eq!(outbounds[1].target, socket(40001));
        assert_eq!(frame_of(&outbounds[1]), sealed);

        Ok(())
    }

    #[test]
    fn test_sealed_messages_require_a_slot() -> Result<()> {
        let service = make_service();
        join(&service, "a", "a@x.ru", 40000);
        join(&service, "b", "b@x.ru", 40001);

        let sealed = Frame::request(
            Method::Post,
            "/message",
            &to_json(&Message {
                id: 1000,
                login: "a".to_string(),
                email: "a@x.ru".to_string(),
                channel: 0,
                dest_id: 1001,
                timestamp: 1,
                size: 5,
                encrypted: 1,
                message: "sealed".to_string(),
            }),
        );

        let outbounds = service.get_router(socket(40000)).route(&sealed);
        assert_eq!(outbounds.len(), 1);
        assert_eq!(status_of(&outbounds[0]).code, StatusCode::Unauthorized as i32);

        Ok(())
    }

    #[test]
    fn test_reject_destroys_the_slot() -> Result<()> {
        let service = make_service();
        join(&service, "a", "a@x.ru", 40000);
        join(&service, "b", "b@x.ru", 40001);

        service
            .get_router(socket(40000))
            .route(&private_request_frame(1000, 1001));

        let outbounds = service
            .get_router(socket(40001))
            .route(&confirm_frame(1001, 1000, 0));
        assert_eq!(status_of(&outbounds[0]).code, StatusCode::Success as i32);

        assert!(service.get_handshakes().is_empty());
        assert!(!service.get_handshakes().authorized(1000, 1001));

        Ok(())
    }

    #[test]
    fn test_abort_releases_both_peers() -> Result<()> {
        let service = make_service();
        join(&service, "a", "a@x.ru", 40000);
        join(&service, "b", "b@x.ru", 40001);

        service
            .get_router(socket(40000))
            .route(&private_request_frame(1000, 1001));
        service
            .get_router(socket(40001))
            .route(&confirm_frame(1001, 1000, 1));
        service
            .get_router(socket(40000))
            .route(&pubkey_frame(1000, "QUtFWQ=="));
        service
            .get_router(socket(40001))
            .route(&pubkey_frame(1001, "QktFWQ=="));

        assert_eq!(service.get_registry().get(1000).unwrap().channel, -1);

        let outbounds = service.get_router(socket(40000)).route(&Frame::request_with_query(
            Method::Post,
            "/private_abort",
            &[("src_id", "1000"), ("dest_id", "1001")],
            "",
        ));
        assert_eq!(status_of(&outbounds[0]).code, StatusCode::Success as i32);

        assert!(service.get_handshakes().is_empty());
        assert_eq!(service.get_registry().get(1000).unwrap().channel, 0);
        assert_eq!(service.get_registry().get(1001).unwrap().channel, 0);

        Ok(())
    }

    #[test]
    fn test_logout_tears_the_slot_down() -> Result<()> {
        let service = make_service();
        join(&service, "a", "a@x.ru", 40000);
        join(&service, "b", "b@x.ru", 40001);

        service
            .get_router(socket(40000))
            .route(&private_request_frame(1000, 1001));
        service
            .get_router(socket(40001))
            .route(&confirm_frame(1001, 1000, 1));
        service
            .get_router(socket(40000))
            .route(&pubkey_frame(1000, "QUtFWQ=="));
        service
            .get_router(socket(40001))
            .route(&pubkey_frame(1001, "QktFWQ=="));

        // A's connection dies; B is notified and returns to channel 0.
        let outbounds = service.logout_on_socket_reset(socket(40000));
        assert!(outbounds.iter().any(|outbound| outbound.target == socket(40001)));

        assert!(service.get_handshakes().is_empty());
        assert_eq!(service.get_registry().get(1001).unwrap().channel, 0);
        assert!(service.get_registry().get(1000).is_none());

        Ok(())
    }
}
