//! The two methods this server understands. Anything else is a `400`.

use std::fmt::Display;

/// HTTP request method. Only `GET` and `POST` are accepted; any other token
/// in the request line is a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

impl Method {
    pub(crate) fn from_bytes(b: &[u8]) -> Option<Self> {
        match b {
            b"GET" => Some(Self::Get),
            b"POST" => Some(Self::Post),
            _ => None,
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
        })
    }
}
