//! RFC 7230 start-line and header parsing/emission, shared by client request
//! construction and server request/response parsing. Factored out of the
//! teacher's `request.rs`, which inlined this ad hoc per call site.

use std::collections::HashMap;

use crate::error::{Error, HandshakeFailureKind};

/// An ordered header collection that preserves repeated header names,
/// per RFC 7230 §3.2.2 (a recipient MAY combine them with a comma, but must
/// not silently drop any occurrence).
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    order: Vec<String>,
    values: HashMap<String, Vec<String>>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let key = name.to_ascii_lowercase();
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.values.entry(key).or_default().push(value.into());
    }

    /// All values for a header name, in the order they were seen.
    pub fn all(&self, name: &str) -> &[String] {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The header's values joined by `", "`, or `None` if absent.
    pub fn get_combined(&self, name: &str) -> Option<String> {
        let values = self.all(name);
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// The first value for a header, or `None` if absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.all(name).first().map(String::as_str)
    }

    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        match self.get_combined(name) {
            Some(combined) => combined
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token)),
            None => false,
        }
    }

    /// Emits `Name: value\r\n` lines in insertion order, terminated by a
    /// blank line. Does not append a body; callers append that themselves.
    pub fn write_to(&self, out: &mut String) {
        for key in &self.order {
            for value in &self.values[key] {
                out.push_str(&canonicalize_header_name(key));
                out.push_str(": ");
                out.push_str(value);
                out.push_str("\r\n");
            }
        }
        out.push_str("\r\n");
    }
}

/// Restores conventional casing (`Sec-WebSocket-Key`, `Content-Length`, ...)
/// for an all-lowercase header name, since RFC 7230 treats names as
/// case-insensitive but real peers expect familiar casing on the wire.
fn canonicalize_header_name(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct StatusLine {
    pub version: String,
    pub status: u16,
    pub reason: String,
}

/// Splits raw bytes on the first `\r\n\r\n`, returning the head (start line
/// + headers) and anything past it (the start of a body, if present).
pub fn split_head(raw: &str) -> Option<(&str, &str)> {
    raw.split_once("\r\n\r\n")
}

/// Parses a request or status start line followed by folded headers.
/// `is_status_line` selects which start-line grammar to apply.
fn parse_headers(lines: &mut std::str::Lines) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    let mut last_key: Option<String> = None;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // obs-fold continuation: join onto the previous header's value.
            let key = last_key
                .clone()
                .ok_or(Error::HandshakeFailed(HandshakeFailureKind::MalformedStatusLine))?;
            if let Some(values) = headers.values.get_mut(&key) {
                if let Some(last) = values.last_mut() {
                    last.push(' ');
                    last.push_str(line.trim());
                }
            }
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(Error::HandshakeFailed(HandshakeFailureKind::MalformedStatusLine))?;
        headers.insert(name.trim(), value.trim());
        last_key = Some(name.trim().to_ascii_lowercase());
    }

    Ok(headers)
}

pub fn parse_request_line(line: &str) -> Result<RequestLine, Error> {
    let mut parts = line.splitn(3, ' ');
    let method = parts.next();
    let target = parts.next();
    let version = parts.next();
    match (method, target, version) {
        (Some(method), Some(target), Some(version)) if version.starts_with("HTTP/") => Ok(RequestLine {
            method: method.to_string(),
            target: target.to_string(),
            version: version.trim_end().to_string(),
        }),
        _ => Err(Error::HandshakeFailed(HandshakeFailureKind::MalformedStatusLine)),
    }
}

pub fn parse_status_line(line: &str) -> Result<StatusLine, Error> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next();
    let status = parts.next();
    let reason = parts.next().unwrap_or("").trim_end();
    match (version, status) {
        (Some(version), Some(status)) if version.starts_with("HTTP/") => {
            if status.len() != 3 || !status.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::HandshakeFailed(HandshakeFailureKind::MalformedStatusLine));
            }
            let status: u16 = status
                .parse()
                .map_err(|_| Error::HandshakeFailed(HandshakeFailureKind::MalformedStatusLine))?;
            Ok(StatusLine {
                version: version.to_string(),
                status,
                reason: reason.to_string(),
            })
        }
        _ => Err(Error::HandshakeFailed(HandshakeFailureKind::MalformedStatusLine)),
    }
}

pub fn parse_request_head(head: &str) -> Result<(RequestLine, HeaderMap), Error> {
    let mut lines = head.lines();
    let start_line = lines
        .next()
        .ok_or(Error::HandshakeFailed(HandshakeFailureKind::MalformedStatusLine))?;
    let request_line = parse_request_line(start_line)?;
    let headers = parse_headers(&mut lines)?;
    Ok((request_line, headers))
}

pub fn parse_status_head(head: &str) -> Result<(StatusLine, HeaderMap), Error> {
    let mut lines = head.lines();
    let start_line = lines
        .next()
        .ok_or(Error::HandshakeFailed(HandshakeFailureKind::MalformedStatusLine))?;
    let status_line = parse_status_line(start_line)?;
    let headers = parse_headers(&mut lines)?;
    Ok((status_line, headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line_and_headers() {
        let head = "GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\n";
        let (request_line, headers) = parse_request_head(head).unwrap();
        assert_eq!(request_line.method, "GET");
        assert_eq!(request_line.target, "/chat");
        assert_eq!(headers.get("host"), Some("example.com"));
        assert_eq!(headers.get("upgrade"), Some("websocket"));
    }

    #[test]
    fn folds_obsolete_continuation_lines() {
        let head = "GET / HTTP/1.1\r\nX-Long: part one\r\n part two\r\n";
        let (_, headers) = parse_request_head(head).unwrap();
        assert_eq!(headers.get("x-long"), Some("part one part two"));
    }

    #[test]
    fn repeated_headers_combine_with_comma() {
        let head = "GET / HTTP/1.1\r\nSec-WebSocket-Extensions: a\r\nSec-WebSocket-Extensions: b\r\n";
        let (_, headers) = parse_request_head(head).unwrap();
        assert_eq!(
            headers.get_combined("sec-websocket-extensions"),
            Some("a, b".to_string())
        );
        assert_eq!(headers.all("sec-websocket-extensions").len(), 2);
    }

    #[test]
    fn status_line_parses_code_and_reason() {
        let head = "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n";
        let (status_line, _) = parse_status_head(head).unwrap();
        assert_eq!(status_line.status, 101);
        assert_eq!(status_line.reason, "Switching Protocols");
    }

    #[test]
    fn malformed_start_line_is_a_handshake_error() {
        assert!(parse_request_line("garbage").is_err());
        assert!(parse_status_line("garbage").is_err());
    }

    #[test]
    fn contains_token_is_case_insensitive() {
        let head = "GET / HTTP/1.1\r\nConnection: Upgrade, keep-alive\r\n";
        let (_, headers) = parse_request_head(head).unwrap();
        assert!(headers.contains_token("connection", "upgrade"));
    }

    #[test]
    fn write_to_round_trips_simple_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("Host", "example.com");
        headers.insert("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        let mut out = String::new();
        headers.write_to(&mut out);
        let (_, reparsed) = parse_request_head(&format!("GET / HTTP/1.1\r\n{}", out)).unwrap();
        assert_eq!(reparsed.get("host"), Some("example.com"));
        assert_eq!(
            reparsed.get("sec-websocket-key"),
            Some("dGhlIHNhbXBsZSBub25jZQ==")
        );
    }
}
