use crate::Error;

use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl std::str::FromStr for Method {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            _ => return Err(Error::UnknownMethod),
        })
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request start line: `METHOD SP PATH[?QUERY] SP HTTP/1.x`.
///
/// The query string is split off the path during parsing, so `path` is
/// always the bare route and `query` the decoded `k=v` pairs in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartLine {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub version: u8,
}

impl StartLine {
    pub(crate) fn parse(line: &str) -> Result<Self, Error> {
        let (method, rest) = line.split_once(' ').ok_or(Error::InvalidStartLine)?;
        let (target, version) = rest.rsplit_once(' ').ok_or(Error::InvalidStartLine)?;

        let version = version
            .strip_prefix("HTTP/1.")
            .and_then(|digit| digit.parse().ok())
            .ok_or(Error::InvalidStartLine)?;

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, Vec::new()),
        };

        if path.is_empty() {
            return Err(Error::InvalidStartLine);
        }

        Ok(Self {
            method: method.parse()?,
            path: path.to_string(),
            query,
            version,
        })
    }

    /// First value bound to `key` in the query string.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Response code line: `HTTP/1.x SP CODE SP REASON`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLine {
    pub version: u8,
    pub code: u16,
    pub reason: String,
}

impl CodeLine {
    pub(crate) fn parse(line: &str) -> Result<Self, Error> {
        let (proto, rest) = line.split_once(' ').ok_or(Error::InvalidCodeLine)?;

        let version = proto
            .strip_prefix("HTTP/1.")
            .and_then(|digit| digit.parse().ok())
            .ok_or(Error::InvalidCodeLine)?;

        let (code, reason) = match rest.split_once(' ') {
            Some((code, reason)) => (code, reason),
            None => (rest, ""),
        };

        Ok(Self {
            version,
            code: code.parse().map_err(|_| Error::InvalidCodeLine)?,
            reason: reason.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub(crate) fn parse(line: &[u8], colon: usize) -> Result<Self, Error> {
        let name = std::str::from_utf8(&line[..colon])?;
        let value = std::str::from_utf8(&line[colon + 1..])?;

        if name.is_empty() {
            return Err(Error::InvalidHeader);
        }

        Ok(Self {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// One complete wire frame. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request {
        start: StartLine,
        headers: Vec<Header>,
        body: String,
    },
    Response {
        code: CodeLine,
        headers: Vec<Header>,
        body: String,
    },
}

impl Frame {
    /// Build a request frame without a query string.
    pub fn request(method: Method, path: &str, body: &str) -> Self {
        Self::Request {
            start: StartLine {
                method,
                path: path.to_string(),
                query: Vec::new(),
                version: 1,
            },
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    /// Build a request frame carrying query pairs.
    pub fn request_with_query(
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: &str,
    ) -> Self {
        Self::Request {
            start: StartLine {
                method,
                path: path.to_string(),
                query: query
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                version: 1,
            },
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    /// Build a `200 OK` response around a body, the only response shape the
    /// server ever emits.
    pub fn ok(body: &str) -> Self {
        Self::Response {
            code: CodeLine {
                version: 1,
                code: 200,
                reason: "OK".to_string(),
            },
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Self::Request { body, .. } | Self::Response { body, .. } => body,
        }
    }

    pub fn method(&self) -> Option<Method> {
        match self {
            Self::Request { start, .. } => Some(start.method),
            Self::Response { .. } => None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Request { start, .. } => Some(&start.path),
            Self::Response { .. } => None,
        }
    }

    /// Serialize back to wire form.
    ///
    /// No `Content-Length` is emitted: receivers delimit bodies by scanning
    /// for the next start line, and adding the header would change the
    /// framing the protocol relies on.
    ///
    /// # Test
    ///
    /// ```
    /// use chat_server_codec::frame::{Frame, Method};
    ///
    /// let frame = Frame::request_with_query(
    ///     Method::Delete,
    ///     "/logout",
    ///     &[("id", "1000")],
    ///     "",
    /// );
    ///
    /// assert_eq!(&frame.encode()[..], b"DELETE /logout?id=1000 HTTP/1.1\r\n\r\n");
    /// ```
    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(128 + self.body().len());

        match self {
            Self::Request { start, .. } => {
                bytes.put_slice(start.method.as_str().as_bytes());
                bytes.put_u8(b' ');
                bytes.put_slice(start.path.as_bytes());

                for (index, (key, value)) in start.query.iter().enumerate() {
                    bytes.put_u8(if index == 0 { b'?' } else { b'&' });
                    bytes.put_slice(key.as_bytes());
                    bytes.put_u8(b'=');
                    bytes.put_slice(value.as_bytes());
                }

                bytes.put_slice(b" HTTP/1.");
                bytes.put_slice(start.version.to_string().as_bytes());
                bytes.put_slice(b"\r\n");
            }
            Self::Response { code, .. } => {
                bytes.put_slice(b"HTTP/1.");
                bytes.put_slice(code.version.to_string().as_bytes());
                bytes.put_u8(b' ');
                bytes.put_slice(code.code.to_string().as_bytes());
                bytes.put_u8(b' ');
                bytes.put_slice(code.reason.as_bytes());
                bytes.put_slice(b"\r\n");
            }
        }

        let headers = match self {
            Self::Request { headers, .. } | Self::Response { headers, .. } => headers,
        };

        for header in headers {
            bytes.put_slice(header.name.as_bytes());
            bytes.put_slice(b": ");
            bytes.put_slice(header.value.as_bytes());
            bytes.put_slice(b"\r\n");
        }

        bytes.put_slice(b"\r\n");
        bytes.put_slice(self.body().as_bytes());
        bytes.freeze()
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
