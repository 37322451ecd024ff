//! The fixed status-code/reason-phrase table this server emits.
//!
//! Deliberately small: this server only ever produces these four codes.

/// A status code this server can emit, paired with its fixed reason phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 200
    Ok,
    /// 400
    BadRequest,
    /// 403
    Forbidden,
    /// 404
    NotFound,
}

impl Status {
    /// Numeric status code.
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
        }
    }

    /// Fixed reason phrase for this status.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
        }
    }

    /// Error page path for 4xx statuses (`None` for 200), e.g. `/404.html`.
    pub fn error_page_path(self) -> Option<&'static str> {
        match self {
            Self::Ok => None,
            Self::BadRequest => Some("/400.html"),
            Self::Forbidden => Some("/403.html"),
            Self::NotFound => Some("/404.html"),
        }
    }
}
