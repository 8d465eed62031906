//! C8: the opening HTTP/1.1 handshake (RFC 6455 §4) on both sides of a
//! connection, plus extension/sub-protocol negotiation. Once a handshake
//! succeeds, both `accept_async*` and `connect_async*` hand back a ready
//! `WSConnection`.

use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::sync::Arc;

use pki_types::CertificateDer;
use rustls::{ClientConfig as RustlsClientConfig, RootCertStore};
use rustls_pemfile::certs;
use tokio::io::{split, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, TlsStream};

use crate::config::{ClientConfig, ServerConfig};
use crate::connection::WSConnection;
use crate::error::{Error, HandshakeFailureKind};
use crate::extensions::{merge_extensions, parse_extensions, validate_window_bits, Extensions};
use crate::http::{parse_status_head, split_head, HeaderMap};
use crate::read::Role;
use crate::request::{construct_http_request, write_http_response, HttpRequest};
use crate::stream::SocketFlowStream;
use crate::utils::{generate_websocket_accept_value, generate_websocket_key};

const SUPPORTED_VERSION: &str = "13";

pub async fn accept_async(stream: TcpStream) -> Result<WSConnection, Error> {
    accept_async_with_config(SocketFlowStream::Plain(stream), None).await
}

pub async fn accept_async_with_config(
    socket: SocketFlowStream,
    config: Option<ServerConfig>,
) -> Result<WSConnection, Error> {
    let web_socket_config = config.and_then(|c| c.web_socket_config).unwrap_or_default();

    let (read_half, mut write_half) = split(socket);
    let mut buf_reader = BufReader::new(read_half);

    let request = match HttpRequest::parse_http_request(&mut buf_reader).await {
        Ok(request) => request,
        Err(error) => {
            write_failure_response(&mut write_half, 400, "Bad Request").await?;
            return Err(error);
        }
    };

    if let Err(error) = validate_upgrade_request(&request) {
        if matches!(error, Error::HandshakeFailed(HandshakeFailureKind::UnsupportedVersion)) {
            log::warn!("handshake rejected: unsupported Sec-WebSocket-Version");
            let mut headers = HeaderMap::new();
            headers.insert("Sec-WebSocket-Version", SUPPORTED_VERSION);
            write_http_response(&mut write_half, 426, "Upgrade Required", &headers).await?;
        } else {
            log::warn!("handshake rejected: {error}");
            write_failure_response(&mut write_half, 400, "Bad Request").await?;
        }
        return Err(error);
    }

    let key = match request.get_header_value("sec-websocket-key") {
        Some(key) => key,
        None => {
            write_failure_response(&mut write_half, 400, "Bad Request").await?;
            return Err(Error::HandshakeFailed(HandshakeFailureKind::MissingKey));
        }
    };
    let accept_value = generate_websocket_accept_value(&key);

    let sub_protocol = negotiate_sub_protocol(&request.headers, web_socket_config.sub_protocol.as_deref());

    let client_extensions = request.get_header_value("sec-websocket-extensions").and_then(parse_extensions);
    let negotiated_extensions = if web_socket_config.allow_per_message_deflate {
        let offered = Extensions {
            permessage_deflate: true,
            ..Extensions::default()
        };
        merge_extensions(Some(offered), client_extensions)
    } else {
        None
    };
    if let Some(extensions) = negotiated_extensions.as_ref() {
        validate_window_bits(extensions)?;
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert("Connection", "Upgrade");
    response_headers.insert("Upgrade", "websocket");
    response_headers.insert("Sec-WebSocket-Accept", accept_value);
    if let Some(sub_protocol) = sub_protocol.as_ref() {
        response_headers.insert("Sec-WebSocket-Protocol", sub_protocol.clone());
    }
    if let Some(extensions) = negotiated_extensions.as_ref().filter(|ext| ext.permessage_deflate) {
        response_headers.insert("Sec-WebSocket-Extensions", format_extensions(extensions));
    }

    write_http_response(&mut write_half, 101, "Switching Protocols", &response_headers).await?;

    let mut connection_config = web_socket_config;
    connection_config.extensions = negotiated_extensions;

    let socket = write_half.unsplit(buf_reader.into_inner());
    let connection = WSConnection::new(socket, Role::Server, connection_config, sub_protocol);
    log::debug!("[{}] server handshake complete", connection.id());
    Ok(connection)
}

async fn write_failure_response<W: AsyncWriteExt + Unpin>(writer: &mut W, status: u16, reason: &str) -> Result<(), Error> {
    let headers = HeaderMap::new();
    write_http_response(writer, status, reason, &headers).await
}

fn validate_upgrade_request(request: &HttpRequest) -> Result<(), Error> {
    if !request.headers.contains_token("connection", "upgrade") {
        return Err(Error::HandshakeFailed(HandshakeFailureKind::NoConnectionHeaderPresent));
    }
    if !request.headers.get("upgrade").is_some_and(|value| value.eq_ignore_ascii_case("websocket")) {
        return Err(Error::HandshakeFailed(HandshakeFailureKind::NoUpgradeHeaderPresent));
    }
    if request.headers.get("host").is_none() {
        return Err(Error::HandshakeFailed(HandshakeFailureKind::NoHostHeaderPresent));
    }
    match request.headers.get("sec-websocket-version").and_then(|v| v.trim().parse::<u32>().ok()) {
        Some(version) if version >= 13 => {}
        _ => return Err(Error::HandshakeFailed(HandshakeFailureKind::UnsupportedVersion)),
    }
    Ok(())
}

/// Picks the first sub-protocol the client offered that's also in the
/// server's configured, comma-separated list. Case-insensitive per RFC
/// 6455 §4.2.2 item 4 (treated like other tokens).
fn negotiate_sub_protocol(headers: &HeaderMap, configured: Option<&str>) -> Option<String> {
    let offered = headers.get_combined("sec-websocket-protocol")?;
    let configured = configured?;
    let accepted: Vec<&str> = configured.split(',').map(str::trim).collect();
    offered
        .split(',')
        .map(str::trim)
        .find(|candidate| accepted.iter().any(|accepted| accepted.eq_ignore_ascii_case(candidate)))
        .map(str::to_string)
}

fn format_extensions(extensions: &Extensions) -> String {
    let mut request = String::new();
    crate::extensions::add_extension_headers(&mut request, Some(extensions.clone()));
    // add_extension_headers is written for the request-line accumulator and
    // always terminates with the blank-line CRLFs; strip those back off
    // since we only want the header *value* here.
    request
        .trim_start_matches("Sec-WebSocket-Extensions: ")
        .trim_end_matches("\r\n\r\n")
        .to_string()
}

pub async fn connect_async(ws_url: &str) -> Result<WSConnection, Error> {
    connect_async_with_config(ws_url, None).await
}

pub async fn connect_async_with_config(ws_url: &str, config: Option<ClientConfig>) -> Result<WSConnection, Error> {
    let client_config = config.unwrap_or_default();
    let web_socket_config = client_config.web_socket_config.clone();

    let key = generate_websocket_key();
    let requested_extensions = if web_socket_config.allow_per_message_deflate {
        Some(Extensions {
            permessage_deflate: true,
            ..Extensions::default()
        })
    } else {
        None
    };

    let (request, host_with_port, host, use_tls) = construct_http_request(ws_url, &key, requested_extensions.clone())?;

    if client_config.ca_file.is_some() && !use_tls {
        return Err(Error::SchemeAgainstTlsConfig(use_tls, ws_url.to_string()));
    }

    let tcp_stream = TcpStream::connect(&host_with_port).await?;
    let mut socket = if use_tls {
        let connector = build_tls_connector(client_config.ca_file.as_deref())?;
        let domain = pki_types::ServerName::try_from(host.clone())?;
        let tls_stream = connector.connect(domain, tcp_stream).await?;
        SocketFlowStream::Secure(TlsStream::Client(tls_stream))
    } else {
        SocketFlowStream::Plain(tcp_stream)
    };

    socket.write_all(request.as_bytes()).await?;

    let (read_half, write_half) = split(socket);
    let mut buf_reader = BufReader::new(read_half);
    let head = read_response_head(&mut buf_reader).await?;
    let (status_line, headers) = parse_status_head(&head)?;

    if status_line.status != 101 {
        return Err(Error::HandshakeFailed(HandshakeFailureKind::MalformedStatusLine));
    }
    if !headers.contains_token("connection", "upgrade") {
        return Err(Error::HandshakeFailed(HandshakeFailureKind::NoConnectionHeaderPresent));
    }
    if !headers.get("upgrade").is_some_and(|value| value.eq_ignore_ascii_case("websocket")) {
        return Err(Error::HandshakeFailed(HandshakeFailureKind::NoUpgradeHeaderPresent));
    }

    let accept = headers
        .get("sec-websocket-accept")
        .ok_or(Error::HandshakeFailed(HandshakeFailureKind::InvalidAcceptKey))?;
    if accept != generate_websocket_accept_value(&key) {
        return Err(Error::HandshakeFailed(HandshakeFailureKind::InvalidAcceptKey));
    }

    let sub_protocol = headers.get("sec-websocket-protocol").map(str::to_string);
    let negotiated_extensions = headers
        .get("sec-websocket-extensions")
        .and_then(|value| parse_extensions(value.to_string()));
    if let Some(extensions) = negotiated_extensions.as_ref() {
        validate_window_bits(extensions)?;
    }

    let mut connection_config = web_socket_config;
    connection_config.extensions = negotiated_extensions;

    let socket = write_half.unsplit(buf_reader.into_inner());
    let connection = WSConnection::new(socket, Role::Client, connection_config, sub_protocol);
    log::debug!("[{}] client handshake complete", connection.id());
    Ok(connection)
}

async fn read_response_head<T: tokio::io::AsyncRead + Unpin>(
    reader: &mut BufReader<tokio::io::ReadHalf<T>>,
) -> Result<String, Error> {
    use tokio::io::AsyncBufReadExt;

    let mut buffer = String::new();
    loop {
        let bytes_read = reader.read_line(&mut buffer).await?;
        if bytes_read == 0 || buffer.ends_with("\r\n\r\n") {
            break;
        }
    }
    if split_head(&buffer).is_none() {
        return Err(Error::HandshakeFailed(HandshakeFailureKind::Incomplete));
    }
    Ok(buffer)
}

fn build_tls_connector(ca_file: Option<&str>) -> Result<TlsConnector, Error> {
    let mut roots = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            let mut reader = StdBufReader::new(File::open(path)?);
            for cert in certs(&mut reader) {
                let cert: CertificateDer<'static> = cert?;
                roots.add(cert)?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let config = RustlsClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_protocol_negotiation_picks_first_shared_match() {
        let mut headers = HeaderMap::new();
        headers.insert("Sec-WebSocket-Protocol", "chat, superchat");
        let picked = negotiate_sub_protocol(&headers, Some("superchat, chat"));
        assert_eq!(picked, Some("chat".to_string()));
    }

    #[test]
    fn sub_protocol_negotiation_is_none_without_overlap() {
        let mut headers = HeaderMap::new();
        headers.insert("Sec-WebSocket-Protocol", "chat");
        assert_eq!(negotiate_sub_protocol(&headers, Some("graphql-ws")), None);
    }

    #[test]
    fn validate_upgrade_request_rejects_missing_connection_header() {
        let request = HttpRequest {
            method: "GET".to_string(),
            uri: "/".to_string(),
            version: "HTTP/1.1".to_string(),
            headers: {
                let mut headers = HeaderMap::new();
                headers.insert("Upgrade", "websocket");
                headers.insert("Host", "example.com");
                headers.insert("Sec-WebSocket-Version", "13");
                headers
            },
            body: Vec::new(),
        };
        assert!(validate_upgrade_request(&request).is_err());
    }

    #[test]
    fn validate_upgrade_request_accepts_well_formed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("Connection", "Upgrade");
        headers.insert("Upgrade", "websocket");
        headers.insert("Host", "example.com");
        headers.insert("Sec-WebSocket-Version", "13");
        let request = HttpRequest {
            method: "GET".to_string(),
            uri: "/".to_string(),
            version: "HTTP/1.1".to_string(),
            headers,
            body: Vec::new(),
        };
        assert!(validate_upgrade_request(&request).is_ok());
    }
}
