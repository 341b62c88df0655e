//! Raw HTTP exchanges through a candidate proxy
//!
//! Plain-HTTP targets are requested in absolute form; HTTPS targets are
//! probed with a CONNECT request. Either way the probe only needs the
//! proxy's status line.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};
use url::{Position, Url};

use crate::error::{HarvestError, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:115.0) Gecko/20100101 Firefox/115.0";
const MAX_HEAD_BYTES: usize = 1024;

/// Sends a single probe request through a proxy
pub struct ProbeTransport;

impl ProbeTransport {
    /// Request `target` through the proxy at `proxy_addr` and return the
    /// status code of whatever the proxy answered
    #[instrument(skip(target), fields(target = %target))]
    pub async fn request(proxy_addr: &str, target: &Url) -> Result<u16> {
        let request = Self::build_request(target)?;

        let mut stream = TcpStream::connect(proxy_addr)
            .await
            .map_err(|e| HarvestError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))?;

        stream.write_all(request.as_bytes()).await.map_err(|e| {
            HarvestError::ProxyConnectionFailed(format!("Failed to send request: {}", e))
        })?;

        let head = Self::read_head(&mut stream).await?;
        let status = parse_status_line(&head).ok_or_else(|| {
            HarvestError::ProxyConnectionFailed(format!(
                "invalid HTTP response: {}",
                head.lines().next().unwrap_or("<empty>")
            ))
        })?;

        debug!(status, "Proxy answered probe");
        Ok(status)
    }

    /// Build the request line and headers for `target`
    fn build_request(target: &Url) -> Result<String> {
        let host = target
            .host_str()
            .ok_or_else(|| HarvestError::InvalidRequest(format!("{} has no host", target)))?;
        let port = target
            .port_or_known_default()
            .ok_or_else(|| HarvestError::InvalidRequest(format!("{} has no port", target)))?;

        match target.scheme() {
            "http" => {
                let host_header = &target[Position::BeforeHost..Position::AfterPort];
                Ok(format!(
                    "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
                    target, host_header, USER_AGENT
                ))
            }
            "https" => Ok(format!(
                "CONNECT {}:{} HTTP/1.1\r\nHost: {}:{}\r\nUser-Agent: {}\r\n\r\n",
                host, port, host, port, USER_AGENT
            )),
            other => Err(HarvestError::InvalidRequest(format!(
                "unsupported probe scheme: {}",
                other
            ))),
        }
    }

    /// Read until the status line is complete, the peer closes, or the cap is hit
    async fn read_head(stream: &mut TcpStream) -> Result<String> {
        let mut buf = Vec::with_capacity(MAX_HEAD_BYTES);
        let mut chunk = [0u8; 512];

        loop {
            let n = stream.read(&mut chunk).await.map_err(|e| {
                HarvestError::ProxyConnectionFailed(format!("Failed to read response: {}", e))
            })?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.windows(2).any(|w| w == b"\r\n") || buf.len() >= MAX_HEAD_BYTES {
                break;
            }
        }

        if buf.is_empty() {
            return Err(HarvestError::ProxyConnectionFailed("empty response".into()));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Extract the status code from an `HTTP/x.y NNN ...` line
pub fn parse_status_line(head: &str) -> Option<u16> {
    let line = head.lines().next()?;
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK\r\n"), Some(200));
        assert_eq!(parse_status_line("HTTP/1.0 407 Proxy Auth\r\n"), Some(407));
        assert_eq!(parse_status_line("HTTP/1.1 200"), Some(200));
        assert_eq!(parse_status_line("SSH-2.0-OpenSSH\r\n"), None);
        assert_eq!(parse_status_line("HTTP/1.1 abc"), None);
        assert_eq!(parse_status_line(""), None);
    }

    #[test]
    fn test_build_http_request_uses_absolute_form() {
        let url = Url::parse("http://httpbin.org/ip").unwrap();
        let req = ProbeTransport::build_request(&url).unwrap();
        assert!(req.starts_with("GET http://httpbin.org/ip HTTP/1.1\r\n"));
        assert!(req.contains("\r\nHost: httpbin.org\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_build_http_request_keeps_explicit_port() {
        let url = Url::parse("http://example.com:8081/check").unwrap();
        let req = ProbeTransport::build_request(&url).unwrap();
        assert!(req.contains("\r\nHost: example.com:8081\r\n"));
    }

    #[test]
    fn test_build_https_request_uses_connect() {
        let url = Url::parse("https://www.qq.com/").unwrap();
        let req = ProbeTransport::build_request(&url).unwrap();
        assert!(req.starts_with("CONNECT www.qq.com:443 HTTP/1.1\r\n"));
        assert!(req.contains("Host: www.qq.com:443\r\n"));
    }

    #[test]
    fn test_build_request_rejects_other_schemes() {
        let url = Url::parse("ftp://example.com/").unwrap();
        assert!(matches!(
            ProbeTransport::build_request(&url),
            Err(HarvestError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_request_reads_status_through_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            socket
                .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            request
        });

        let target = Url::parse("http://httpbin.org/ip").unwrap();
        let status = ProbeTransport::request(&addr.to_string(), &target)
            .await
            .unwrap();
        assert_eq!(status, 403);

        let seen = server.await.unwrap();
        assert!(seen.starts_with("GET http://httpbin.org/ip HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_request_rejects_non_http_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"garbage banner\r\n").await;
        });

        let target = Url::parse("http://httpbin.org/ip").unwrap();
        let result = ProbeTransport::request(&addr.to_string(), &target).await;
        assert!(matches!(result, Err(HarvestError::ProxyConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_request_reports_empty_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let target = Url::parse("http://httpbin.org/ip").unwrap();
        let result = ProbeTransport::request(&addr.to_string(), &target).await;
        assert!(result.is_err());
    }
}
