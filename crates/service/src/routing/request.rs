//! Request-side validation helpers.

use crate::Error;

use codec::{frame::StartLine, payload::Id};

/// Fetch and parse a required integer query parameter.
pub(crate) fn query_id(start: &StartLine, key: &str) -> Result<Id, Error> {
    start
        .query_value(key)
        .and_then(|value| value.parse().ok())
        .ok_or(Error::InvalidQuery)
}

pub(crate) fn query_i32(start: &StartLine, key: &str) -> Result<i32, Error> {
    start
        .query_value(key)
        .and_then(|value| value.parse().ok())
        .ok_or(Error::InvalidQuery)
}

/// RFC-822-shaped sanity check: one `@`, a non-empty local part and a
/// dotted domain, no whitespace. Anything stricter belongs to the mail
/// system, not the chat server.
///
/// # Test
///
/// ```
/// use chat_server_service::routing::is_email_valid;
///
/// assert!(is_email_valid("m@x.ru"));
/// assert!(is_email_valid("first.last@mail.example.com"));
///
/// assert!(!is_email_valid(""));
/// assert!(!is_email_valid("maxim"));
/// assert!(!is_email_valid("@x.ru"));
/// assert!(!is_email_valid("m@"));
/// assert!(!is_email_valid("m@localhost"));
/// assert!(!is_email_valid("m m@x.ru"));
/// ```
pub fn is_email_valid(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}
