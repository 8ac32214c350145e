//! JSON bodies and protocol constants.
//!
//! Field names are the wire names; bodies are case-sensitive and carry no
//! optional whitespace. Integer enums keep the exact wire values.

use crate::Error;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

pub type Id = i64;

/// Reserved peer ids. Real accounts start at [`MIN_ACCOUNT_ID`].
pub const UNKNOWN_ID: Id = 0;
pub const SERVER_ID: Id = 1;
pub const MIN_ACCOUNT_ID: Id = 1000;

/// Every fresh login lands on the default channel. Negative channels are
/// reserved: [`PRIVATE_CHANNEL`] marks peers inside a private session, who
/// are listed on no broadcast channel.
pub const DEFAULT_CHANNEL: i32 = 0;
pub const PRIVATE_CHANNEL: i32 = -1;

/// Sent in a status frame when the server is going down.
pub const TERMINATE_CODE: i32 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum StatusCode {
    Success = 0,
    WrongPassword = 1,
    NotRegistered = 2,
    AlreadyRegistered = 3,
    AlreadyLoggedIn = 4,
    InvalidForm = 5,
    InvalidQuery = 6,
    Unauthorized = 7,
    WrongChannel = 8,
    SameChannel = 9,
}

/// The `action` value echoed by every status, system and check body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum PathKind {
    Unknown = -1,
    Login = 0,
    Register = 1,
    Message = 2,
    Logout = 3,
    SwitchChannel = 4,
    IsLoggedIn = 5,
    IsRegistered = 6,
    AllPeers = 7,
    PrivateRequest = 8,
    PrivateConfirm = 9,
    PrivateAbort = 10,
    PrivatePubkey = 11,
}

impl PathKind {
    /// Map a request path root onto its action value.
    pub fn from_path(path: &str) -> Self {
        match path {
            "/login" => Self::Login,
            "/register" => Self::Register,
            "/message" => Self::Message,
            "/logout" => Self::Logout,
            "/switch_channel" => Self::SwitchChannel,
            "/is_logged_in" => Self::IsLoggedIn,
            "/is_registered" => Self::IsRegistered,
            "/all_peers" => Self::AllPeers,
            "/private_request" => Self::PrivateRequest,
            "/private_confirm" => Self::PrivateConfirm,
            "/private_abort" => Self::PrivateAbort,
            "/private_pubkey" => Self::PrivatePubkey,
            _ => Self::Unknown,
        }
    }
}

/// Direction flag inside channel-move system payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum ChannelMove {
    Enter = 0,
    Exit = 1,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginForm {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationForm {
    pub login: String,
    pub email: String,
    pub password: String,
}

/// A chat message as sent by a peer.
///
/// `dest_id` of [`UNKNOWN_ID`] means channel broadcast, anything else a
/// direct message. `encrypted` is informational for recipients; the server
/// treats the body of an encrypted message as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Id,
    pub login: String,
    pub email: String,
    pub channel: i32,
    pub dest_id: Id,
    pub timestamp: u64,
    pub size: usize,
    pub encrypted: i32,
    pub message: String,
}

impl Message {
    pub fn is_direct(&self) -> bool {
        self.dest_id != UNKNOWN_ID
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted != 0
    }
}

/// The status body answering every mutating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: i32,
    pub action: i32,
    pub id: Id,
    pub token: String,
    pub payload: String,
}

impl Status {
    pub fn new(code: StatusCode, action: PathKind, id: Id) -> Self {
        Self {
            code: code.into(),
            action: action.into(),
            id,
            token: String::new(),
            payload: String::new(),
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = token.to_string();
        self
    }

    pub fn with_payload(mut self, payload: &str) -> Self {
        self.payload = payload.to_string();
        self
    }
}

/// Unsolicited server notice broadcast to the peers that can observe an
/// event (join, leave, channel move, shutdown).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub system: String,
    pub action: i32,
    pub id: Id,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub check: i32,
    pub action: i32,
    pub id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: Id,
    pub login: String,
    pub channel: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerList {
    pub peers: Vec<PeerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<i32>,
}

/// `{"private_request":{"src_id":N,"dest_id":M}}` and the abort twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePair {
    pub src_id: Id,
    pub dest_id: Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateRequestForm {
    pub private_request: HandshakePair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmBody {
    pub src_id: Id,
    pub dest_id: Id,
    pub accept: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateConfirmForm {
    pub private_confirm: ConfirmBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateAbortForm {
    pub private_abort: HandshakePair,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubkeyBody {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubkeyForm {
    pub private_pubkey: PubkeyBody,
}

/// Decode a JSON body.
///
/// # Test
///
/// ```
/// use chat_server_codec::payload::{LoginForm, from_json};
///
/// let form: LoginForm = from_json("{\"login\":\"panda\",\"password\":\"x\"}").unwrap();
/// assert_eq!(form.login, "panda");
/// assert!(from_json::<LoginForm>("{\"login\":").is_err());
/// ```
pub fn from_json<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
    Ok(serde_json::from_str(body)?)
}

/// Encode a JSON body. Serialization of these plain structs cannot fail.
pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).expect("wire payloads always serialize")
}
