use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf};
use tokio::time::{timeout, Duration};
use url::Url;

use crate::error::{Error, HandshakeFailureKind};
use crate::extensions::{add_extension_headers, Extensions};
use crate::http::{parse_request_head, HeaderMap, RequestLine};

/// Parses a `ws://`/`wss://` URL and builds the HTTP upgrade request a
/// client sends to open a handshake, returning `(request, host:port, host,
/// use_tls)` -- the hostname is needed separately to dial the TCP socket.
pub fn construct_http_request(
    ws_url: &str,
    key: &str,
    extensions: Option<Extensions>,
) -> Result<(String, String, String, bool), Error> {
    let parsed_url = Url::parse(ws_url)?;
    let mut use_tls = false;

    let http_port: u16 = match parsed_url.scheme() {
        "ws" => 80,
        "wss" => {
            use_tls = true;
            443
        }
        _ => return Err(Error::InvalidSchemeURL),
    };

    let host = parsed_url.host_str().ok_or(Error::URLNoHost)?;
    let port = parsed_url.port().unwrap_or(http_port);

    let request_host_field = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => String::from(host),
    };
    let host_with_port = format!("{}:{}", host, port);

    let request_path = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n",
        request_path, request_host_field, key,
    );

    add_extension_headers(&mut request, extensions);

    Ok((request, host_with_port, String::from(host), use_tls))
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Reads and parses an HTTP request off the wire, enforcing a 5-second
    /// deadline so a TCP connection that never sends a handshake can't tie
    /// up an accept slot indefinitely.
    pub async fn parse_http_request<T: AsyncReadExt + Unpin>(
        reader: &mut BufReader<ReadHalf<T>>,
    ) -> Result<HttpRequest, Error> {
        let head = timeout(Duration::from_secs(5), read_until_blank_line(reader)).await??;

        let (request_line, headers) = parse_request_head(&head)?;
        let RequestLine { method, target, version } = request_line;

        let body = match headers.get("content-length") {
            Some(content_length) => {
                let length: usize = content_length
                    .parse()
                    .map_err(|_| Error::HandshakeFailed(HandshakeFailureKind::MalformedStatusLine))?;
                let mut body = vec![0u8; length];
                reader.read_exact(&mut body).await?;
                body
            }
            None => Vec::new(),
        };

        Ok(HttpRequest {
            method,
            uri: target,
            version,
            headers,
            body,
        })
    }

    pub fn get_header_value(&self, key: &str) -> Option<String> {
        self.headers.get(key).map(str::to_string)
    }
}

/// Reads raw bytes off `reader` one line at a time until the terminating
/// blank line of an HTTP head is seen, returning everything read including
/// the terminator.
async fn read_until_blank_line<T: AsyncReadExt + Unpin>(
    reader: &mut BufReader<ReadHalf<T>>,
) -> Result<String, Error> {
    use tokio::io::AsyncBufReadExt;

    let mut buffer = String::new();
    loop {
        let bytes_read = reader.read_line(&mut buffer).await?;
        if bytes_read == 0 || buffer.ends_with("\r\n\r\n") {
            break;
        }
    }
    if !buffer.ends_with("\r\n\r\n") {
        return Err(Error::HandshakeFailed(HandshakeFailureKind::Incomplete));
    }
    Ok(buffer)
}

/// Writes an HTTP response (status line + headers, no body) to `writer`.
pub async fn write_http_response<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    status: u16,
    reason: &str,
    headers: &HeaderMap,
) -> Result<(), Error> {
    let mut response = format!("HTTP/1.1 {} {}\r\n", status, reason);
    headers.write_to(&mut response);
    writer.write_all(response.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_http_request_builds_a_valid_upgrade_request() {
        let (request, host_with_port, host, use_tls) =
            construct_http_request("ws://example.com/chat", "dGhlIHNhbXBsZSBub25jZQ==", None).unwrap();
        assert!(request.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(request.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n"));
        assert_eq!(host_with_port, "example.com:80");
        assert_eq!(host, "example.com");
        assert!(!use_tls);
    }

    #[test]
    fn wss_scheme_sets_use_tls_and_default_port_443() {
        let (_, host_with_port, _, use_tls) =
            construct_http_request("wss://example.com/", "key", None).unwrap();
        assert!(use_tls);
        assert_eq!(host_with_port, "example.com:443");
    }

    #[test]
    fn rejects_non_ws_scheme() {
        assert!(construct_http_request("http://example.com", "key", None).is_err());
    }
}
