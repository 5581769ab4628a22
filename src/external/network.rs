//! Network probe abstractions
//!
//! TCP connects, TLS handshakes and HTTP requests made from the host. Each
//! probe carries its own timeout and reports a typed failure kind instead of
//! a bare message, so checks can word their remediation precisely.

use async_trait::async_trait;
use openssl::asn1::Asn1Time;
use openssl::nid::Nid;
use openssl::ssl::{HandshakeError, SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::{X509Ref, X509VerifyResult};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::net::ToSocketAddrs;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TcpProbeError {
    #[error("connection refused")]
    Refused,
    #[error("connection timed out")]
    TimedOut,
    #[error("unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlsProbeError {
    #[error("certificate verification failed: {0}")]
    Verification(String),
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    #[error("could not connect: {0}")]
    Connect(String),
    #[error("TLS probe timed out")]
    TimedOut,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpProbeError {
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    TimedOut,
    #[error("request failed: {0}")]
    Other(String),
}

/// Subject and validity of a peer certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub common_name: Option<String>,
    /// `notAfter` as printed by OpenSSL
    pub not_after: String,
    /// Whole days until expiry, negative once expired
    pub expires_in_days: i64,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout,
            accept_invalid_certs: false,
        }
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-cased
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Trait for host-side network probes
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn tcp_connect(&self, host: &str, port: u16, timeout: Duration) -> Result<(), TcpProbeError>;

    /// Fetch the peer certificate. With `verify` off, chain and hostname
    /// checks are skipped but the certificate is still returned.
    async fn peer_certificate(
        &self,
        host: &str,
        port: u16,
        verify: bool,
        timeout: Duration,
    ) -> Result<CertificateInfo, TlsProbeError>;

    async fn http_get(&self, request: &HttpRequest) -> Result<HttpResponse, HttpProbeError>;
}

/// Real implementation backed by tokio sockets, OpenSSL and reqwest
pub struct LiveNetworkProbe;

fn certificate_info(cert: &X509Ref) -> Result<CertificateInfo, TlsProbeError> {
    let common_name = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|cn| cn.to_string());
    let now = Asn1Time::days_from_now(0).map_err(|e| TlsProbeError::Handshake(e.to_string()))?;
    let diff = now
        .diff(cert.not_after())
        .map_err(|e| TlsProbeError::Handshake(e.to_string()))?;
    Ok(CertificateInfo {
        common_name,
        not_after: cert.not_after().to_string(),
        expires_in_days: i64::from(diff.days),
    })
}

fn blocking_peer_certificate(
    host: &str,
    port: u16,
    verify: bool,
    timeout: Duration,
) -> Result<CertificateInfo, TlsProbeError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| TlsProbeError::Connect(e.to_string()))?
        .next()
        .ok_or_else(|| TlsProbeError::Connect(format!("{host} did not resolve")))?;
    let stream = std::net::TcpStream::connect_timeout(&addr, timeout).map_err(|e| match e.kind() {
        std::io::ErrorKind::TimedOut => TlsProbeError::TimedOut,
        _ => TlsProbeError::Connect(e.to_string()),
    })?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .map_err(|e| TlsProbeError::Connect(e.to_string()))?;

    let mut builder =
        SslConnector::builder(SslMethod::tls_client()).map_err(|e| TlsProbeError::Handshake(e.to_string()))?;
    if !verify {
        builder.set_verify(SslVerifyMode::NONE);
    }
    let mut connect = builder
        .build()
        .configure()
        .map_err(|e| TlsProbeError::Handshake(e.to_string()))?;
    if !verify {
        connect.set_verify_hostname(false);
    }

    match connect.connect(host, stream) {
        Ok(tls) => {
            let cert = tls
                .ssl()
                .peer_certificate()
                .ok_or_else(|| TlsProbeError::Handshake("server presented no certificate".to_string()))?;
            certificate_info(&cert)
        }
        Err(HandshakeError::Failure(mid)) => {
            let verify_result = mid.ssl().verify_result();
            if verify_result != X509VerifyResult::OK {
                Err(TlsProbeError::Verification(verify_result.error_string().to_string()))
            } else {
                Err(TlsProbeError::Handshake(mid.error().to_string()))
            }
        }
        Err(HandshakeError::SetupFailure(e)) => Err(TlsProbeError::Handshake(e.to_string())),
        Err(HandshakeError::WouldBlock(_)) => Err(TlsProbeError::TimedOut),
    }
}

fn classify_reqwest_error(error: &reqwest::Error) -> HttpProbeError {
    if error.is_timeout() {
        return HttpProbeError::TimedOut;
    }
    let mut chain = Vec::new();
    let mut source: Option<&dyn StdError> = Some(error);
    while let Some(err) = source {
        chain.push(err.to_string());
        source = err.source();
    }
    let message = chain.join(": ");
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("certificate") || lowered.contains("ssl") || lowered.contains("tls") {
        HttpProbeError::Tls(message)
    } else if error.is_connect() {
        HttpProbeError::Connect(message)
    } else {
        HttpProbeError::Other(message)
    }
}

#[async_trait]
impl NetworkProbe for LiveNetworkProbe {
    async fn tcp_connect(&self, host: &str, port: u16, timeout: Duration) -> Result<(), TcpProbeError> {
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => Err(TcpProbeError::Refused),
            Ok(Err(e)) => Err(TcpProbeError::Unreachable(e.to_string())),
            Err(_) => Err(TcpProbeError::TimedOut),
        }
    }

    async fn peer_certificate(
        &self,
        host: &str,
        port: u16,
        verify: bool,
        timeout: Duration,
    ) -> Result<CertificateInfo, TlsProbeError> {
        let host_owned = host.to_string();
        let handshake =
            tokio::task::spawn_blocking(move || blocking_peer_certificate(&host_owned, port, verify, timeout));
        match tokio::time::timeout(timeout + Duration::from_secs(1), handshake).await {
            Ok(Ok(result)) => {
                debug!(host, port, verify, ok = result.is_ok(), "TLS probe finished");
                result
            }
            Ok(Err(join_error)) => Err(TlsProbeError::Handshake(join_error.to_string())),
            Err(_) => Err(TlsProbeError::TimedOut),
        }
    }

    async fn http_get(&self, request: &HttpRequest) -> Result<HttpResponse, HttpProbeError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(request.accept_invalid_certs)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(request.timeout)
            .build()
            .map_err(|e| HttpProbeError::Other(e.to_string()))?;

        let mut builder = client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| classify_reqwest_error(&e))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();
        let body = response.text().await.unwrap_or_default();
        debug!(url = %request.url, status, "HTTP probe finished");
        Ok(HttpResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SHORT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_tcp_connect_open_and_closed_ports() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        assert_eq!(LiveNetworkProbe.tcp_connect("127.0.0.1", open_port, SHORT).await, Ok(()));

        drop(listener);
        let result = LiveNetworkProbe.tcp_connect("127.0.0.1", open_port, SHORT).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_http_get_reports_status_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ws"))
            .respond_with(
                ResponseTemplate::new(404)
                    .insert_header("X-RateLimit-Limit", "100")
                    .set_body_string("RESTEASY003210: Could not find resource for full path"),
            )
            .mount(&server)
            .await;

        let request = HttpRequest::get(format!("{}/ws", server.uri()), SHORT);
        let response = LiveNetworkProbe.http_get(&request).await.unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(response.header("X-RateLimit-Limit"), Some("100"));
        assert!(response.body.contains("RESTEASY003210"));
    }

    #[tokio::test]
    async fn test_http_get_does_not_follow_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/ui"))
            .mount(&server)
            .await;

        let response = LiveNetworkProbe
            .http_get(&HttpRequest::get(server.uri(), SHORT))
            .await
            .unwrap();
        assert_eq!(response.status, 302);
    }

    #[tokio::test]
    async fn test_http_get_connection_failure_is_typed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let request = HttpRequest::get(format!("http://127.0.0.1:{port}/"), SHORT);
        let error = LiveNetworkProbe.http_get(&request).await.unwrap_err();
        assert!(matches!(error, HttpProbeError::Connect(_)));
    }

    #[tokio::test]
    async fn test_tls_probe_against_plain_socket_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                drop(stream);
            }
        });

        let result = LiveNetworkProbe.peer_certificate("127.0.0.1", port, false, SHORT).await;
        assert!(result.is_err());
    }
}
