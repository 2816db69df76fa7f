//! Upstream forwarding client: Hyper with Rustls (HTTP/1.1, native roots).
use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// Headers that only describe a single hop and must not be forwarded.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP client adapter used for proxy forwarding.
///
/// Responsibilities:
/// * Strips hop-by-hop headers from the outgoing request
/// * Sets the Host header from the target URI
/// * Forces HTTP/1.1 on the wire toward upstreams
/// * Converts transport failures into retryable [`HttpClientError`]s
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("loaded {} native root certificates", root_cert_store.len());
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        Ok(Self { client })
    }

    fn prepare_headers(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        for name in HOP_BY_HOP_HEADERS {
            req.headers_mut().remove(name);
        }

        let Some(host) = req.uri().host() else {
            return Err(HttpClientError::InvalidRequest(
                "outgoing URI has no host".to_string(),
            ));
        };
        let host_value = match req.uri().port() {
            Some(port) => format!("{host}:{}", port.as_u16()),
            None => host.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&host_value) {
            req.headers_mut().insert(header::HOST, value);
        }

        if !req.headers().contains_key(header::USER_AGENT) {
            req.headers_mut().insert(
                header::USER_AGENT,
                HeaderValue::from_static("Myelin-Gateway/0.1"),
            );
        }

        Ok(())
    }
}

impl Default for HttpClientAdapter {
    fn default() -> Self {
        Self::new().expect("failed to create HTTP client")
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::prepare_headers(&mut req)?;

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let outgoing = Request::from_parts(parts, body);

        tracing::debug!("forwarding {} {}", method, uri);

        match self.client.clone().request(outgoing).await {
            Ok(response) => {
                let (mut parts, hyper_body) = response.into_parts();
                // The body is re-framed on the client-facing connection.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(e) => {
                tracing::error!("error forwarding {} {}: {}", method, uri, e);
                Err(HttpClientError::ConnectionError(format!(
                    "request to {method} {uri} failed: {e}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        assert!(HttpClientAdapter::new().is_ok());
    }

    #[test]
    fn test_prepare_headers_strips_hop_by_hop_and_sets_host() {
        let mut req = Request::builder()
            .uri("http://backend:8080/path")
            .header("Connection", "keep-alive")
            .header("Transfer-Encoding", "chunked")
            .header("X-Keep-Me", "1")
            .body(AxumBody::empty())
            .unwrap();

        HttpClientAdapter::prepare_headers(&mut req).unwrap();

        assert!(!req.headers().contains_key("Connection"));
        assert!(!req.headers().contains_key("Transfer-Encoding"));
        assert!(req.headers().contains_key("X-Keep-Me"));
        assert_eq!(req.headers()[header::HOST], "backend:8080");
        assert_eq!(req.headers()[header::USER_AGENT], "Myelin-Gateway/0.1");
    }

    #[test]
    fn test_prepare_headers_requires_host() {
        let mut req = Request::builder()
            .uri("/relative")
            .body(AxumBody::empty())
            .unwrap();
        assert!(HttpClientAdapter::prepare_headers(&mut req).is_err());
    }
}
