//! Stat-based response construction: decide a status from the filesystem,
//! mmap the winning file, and fall back to a small inline HTML body when
//! even the error page can't be opened.

use std::fs::File;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::status::Status;

/// Maps a file extension (the whole `.ext` suffix) to a `Content-Type`.
/// Anything not in this table, or with no extension, is served as
/// `text/plain`.
pub fn mime_type_for(path: &str) -> &'static str {
    let Some(idx) = path.rfind('.') else {
        return "text/plain";
    };
    match &path[idx..] {
        ".html" => "text/html",
        ".xml" => "text/xml",
        ".xhtml" => "application/xhtml+xml",
        ".txt" => "text/plain",
        ".rtf" => "application/rtf",
        ".pdf" => "application/pdf",
        ".word" => "application/nsword",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".au" => "audio/basic",
        ".mpeg" | ".mpg" => "video/mpeg",
        ".avi" => "video/x-msvideo",
        ".gz" => "application/x-gzip",
        ".tar" => "application/x-tar",
        ".css" => "text/css",
        ".js" => "text/javascript",
        _ => "text/plain",
    }
}

/// The response body: either a zero-copy mapping of the served file, or a
/// small inline buffer for the case where even the error page can't be
/// opened.
enum Body {
    Mapped(Mmap),
    Inline(Vec<u8>),
}

/// A response ready to be written to a connection: a header block plus a
/// body that's either an mmap'd file or an inline fallback.
pub struct Response {
    status: Status,
    keep_alive: bool,
    content_type: &'static str,
    body: Body,
}

impl Response {
    /// Status this response carries (may differ from what was requested —
    /// e.g. a missing file upgrades `Ok` to `NotFound`).
    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether the connection should stay open after this response is sent.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The body bytes, whichever kind of [`Body`] backs them.
    pub fn body_bytes(&self) -> &[u8] {
        match &self.body {
            Body::Mapped(mmap) => &mmap[..],
            Body::Inline(bytes) => bytes,
        }
    }

    /// Status line plus headers, including the trailing blank line, with a
    /// `Content-length` matching [`body_bytes`](Self::body_bytes). Always
    /// advertises `HTTP/1.1`, regardless of the request's version.
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut head = Vec::with_capacity(160);
        head.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", self.status.code(), self.status.reason()).as_bytes(),
        );
        head.extend_from_slice(b"Connection: ");
        if self.keep_alive {
            head.extend_from_slice(b"keep-alive\r\n");
            head.extend_from_slice(b"keep-alive: max=6, timeout=120\r\n");
        } else {
            head.extend_from_slice(b"close\r\n");
        }
        head.extend_from_slice(format!("Content-type: {}\r\n", self.content_type).as_bytes());
        head.extend_from_slice(
            format!("Content-length: {}\r\n\r\n", self.body_bytes().len()).as_bytes(),
        );
        head
    }
}

/// Builds a [`Response`] for a request path against a document root.
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Resolves `request_path` (already substituted to `index_path` by the
    /// caller when it's `/`) against `docroot`, deciding `200`/`403`/`404`
    /// from the filesystem, then mmaps the winning file. Request-target
    /// sanitization (e.g. rejecting `..`) is deliberately not performed
    /// here; see the docroot-escape test for the resulting behavior.
    pub fn build(docroot: &Path, request_path: &str, keep_alive: bool) -> Response {
        let mut status = Status::Ok;
        let mut served_path = request_path.to_string();
        let mut resolved = resolve(docroot, &served_path);

        match std::fs::metadata(&resolved) {
            Ok(meta) if meta.is_dir() => status = Status::NotFound,
            Ok(meta) => {
                if meta.permissions().mode() & 0o004 == 0 {
                    status = Status::Forbidden;
                }
            }
            Err(_) => status = Status::NotFound,
        }

        if let Some(error_page) = status.error_page_path() {
            served_path = error_page.to_string();
            resolved = resolve(docroot, &served_path);
        }

        let body = match map_file(&resolved) {
            Ok(MappedFile::NonEmpty(mmap)) => Body::Mapped(mmap),
            Ok(MappedFile::Empty) => Body::Inline(Vec::new()),
            Err(_) => Body::Inline(error_page_html(status, "File NotFound!")),
        };

        Response {
            status,
            keep_alive,
            content_type: mime_type_for(&served_path),
            body,
        }
    }

    /// Builds a response for a status decided before any file resolution
    /// happened — a parse failure, or a request shed because the worker
    /// queue was full. Still serves the matching error page from `docroot`
    /// when one exists, falling back to the inline body otherwise.
    pub fn error(docroot: &Path, status: Status, keep_alive: bool) -> Response {
        let served_path = status.error_page_path().unwrap_or("/400.html");
        let resolved = resolve(docroot, served_path);

        let body = match map_file(&resolved) {
            Ok(MappedFile::NonEmpty(mmap)) => Body::Mapped(mmap),
            Ok(MappedFile::Empty) => Body::Inline(Vec::new()),
            Err(_) => Body::Inline(error_page_html(status, "File NotFound!")),
        };

        Response {
            status,
            keep_alive,
            content_type: mime_type_for(served_path),
            body,
        }
    }
}

fn resolve(docroot: &Path, request_path: &str) -> PathBuf {
    docroot.join(request_path.trim_start_matches('/'))
}

enum MappedFile {
    NonEmpty(Mmap),
    Empty,
}

fn map_file(path: &Path) -> io::Result<MappedFile> {
    let file = File::open(path)?;
    let meta = file.metadata()?;
    if meta.len() == 0 {
        // mmap refuses zero-length mappings; an empty file is a valid,
        // if unusual, thing to serve.
        return Ok(MappedFile::Empty);
    }
    Ok(MappedFile::NonEmpty(unsafe { Mmap::map(&file)? }))
}

fn error_page_html(status: Status, message: &str) -> Vec<u8> {
    let body = format!(
        "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n<p>{}</p><hr><em>scatterweb</em></body></html>",
        status.code(),
        status.reason(),
        message,
    );
    body.into_bytes()
}
