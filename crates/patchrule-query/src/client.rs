//! HTTP client for the Prometheus instant-query endpoint.

use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, HOST, USER_AGENT};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::{Host, Url};

use crate::error::QueryError;
use crate::tls::TlsConfig;
use crate::value::{QueryResponse, decode_response};

/// Client bound to one Prometheus base address.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    base: Url,
    /// `host:port` to dial and to send as the `Host` header.
    authority: String,
    /// Set for `https` addresses.
    tls: Option<TlsTarget>,
    timeout: Duration,
}

#[derive(Debug, Clone)]
struct TlsTarget {
    config: TlsConfig,
    server_name: ServerName<'static>,
}

impl PrometheusClient {
    /// Bind a client to `address`, e.g. `http://prometheus:9090`,
    /// `https://prometheus.example.com` or `http://gateway/prometheus`.
    /// `https` servers are verified against the Mozilla root store.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, QueryError> {
        Self::build(address, timeout, None)
    }

    /// Like [`PrometheusClient::new`], verifying `https` servers with `tls`.
    pub fn with_tls(address: &str, timeout: Duration, tls: TlsConfig) -> Result<Self, QueryError> {
        Self::build(address, timeout, Some(tls))
    }

    fn build(address: &str, timeout: Duration, tls: Option<TlsConfig>) -> Result<Self, QueryError> {
        let invalid = |why: String| QueryError::InvalidEndpoint(format!("{address:?}: {why}"));

        let base = Url::parse(address).map_err(|e| invalid(e.to_string()))?;
        let secure = match base.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(invalid(format!("unsupported scheme {other:?}"))),
        };
        let host = base
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let port = base
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });
        let authority = format!("{host}:{port}");

        let tls = if secure {
            let name = match base.host() {
                Some(Host::Domain(domain)) => domain.to_string(),
                Some(Host::Ipv4(ip)) => ip.to_string(),
                Some(Host::Ipv6(ip)) => ip.to_string(),
                None => return Err(invalid("missing host".to_string())),
            };
            let server_name =
                ServerName::try_from(name).map_err(|e| invalid(format!("bad server name: {e}")))?;
            let config = match tls {
                Some(config) => config,
                None => TlsConfig::shared()?,
            };
            Some(TlsTarget {
                config,
                server_name,
            })
        } else {
            None
        };

        Ok(Self {
            base,
            authority,
            tls,
            timeout,
        })
    }

    /// Full request URL for `expression` evaluated at unix time `at`.
    pub fn query_url(&self, expression: &str, at: u64) -> Url {
        let mut url = self.base.clone();
        let path = format!("{}/api/v1/query", self.base.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("query", expression)
            .append_pair("time", &at.to_string());
        url
    }

    /// Evaluate `expression` at unix time `at`.
    pub async fn query(&self, expression: &str, at: u64) -> Result<QueryResponse, QueryError> {
        let url = self.query_url(expression, at);
        let (status, body) = tokio::time::timeout(self.timeout, self.fetch(&url))
            .await
            .map_err(|_| {
                QueryError::QueryFailed(format!("timed out after {:?}", self.timeout))
            })??;
        debug!(%status, bytes = body.len(), authority = %self.authority, "query answered");
        decode_response(status.as_u16(), &body)
    }

    fn failed(&self, what: &str, e: &dyn std::fmt::Display) -> QueryError {
        QueryError::QueryFailed(format!("{what} {}: {e}", self.authority))
    }

    async fn fetch(&self, url: &Url) -> Result<(http::StatusCode, Bytes), QueryError> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| self.failed("connect", &e))?;

        match &self.tls {
            None => self.exchange(stream, url).await,
            Some(target) => {
                let connector = TlsConnector::from(target.config.client_config.clone());
                let stream = connector
                    .connect(target.server_name.clone(), stream)
                    .await
                    .map_err(|e| self.failed("tls handshake with", &e))?;
                self.exchange(stream, url).await
            }
        }
    }

    /// Send one GET over an established connection.
    async fn exchange<S>(&self, stream: S, url: &Url) -> Result<(http::StatusCode, Bytes), QueryError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| self.failed("handshake with", &e))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "query connection closed with error");
            }
        });

        let target = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };
        let req = http::Request::builder()
            .method(http::Method::GET)
            .uri(target)
            .header(HOST, &self.authority)
            .header(USER_AGENT, "patchrule-query/0.1")
            .header(ACCEPT, "application/json")
            .body(Empty::<Bytes>::new())
            .map_err(|e| self.failed("build request for", &e))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| self.failed("request to", &e))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| self.failed("read response from", &e))?
            .to_bytes();
        Ok((status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn malformed_addresses_are_invalid_endpoints() {
        for address in ["", "not a url", "prometheus:9090/", "ftp://prom:9090", "http://", "https://"] {
            let err = PrometheusClient::new(address, TIMEOUT).unwrap_err();
            assert!(
                matches!(err, QueryError::InvalidEndpoint(_)),
                "{address}: {err:?}"
            );
        }
    }

    #[test]
    fn default_port_is_http() {
        let client = PrometheusClient::new("http://prometheus", TIMEOUT).unwrap();
        assert_eq!(client.authority, "prometheus:80");
    }

    #[test]
    fn https_addresses_are_accepted() {
        let client = PrometheusClient::new("https://prometheus.example.com", TIMEOUT).unwrap();
        assert_eq!(client.authority, "prometheus.example.com:443");
        let target = client.tls.as_ref().unwrap();
        assert_eq!(
            target.server_name,
            ServerName::try_from("prometheus.example.com").unwrap()
        );

        let client = PrometheusClient::new("https://[::1]:9443/prom", TIMEOUT).unwrap();
        assert_eq!(client.authority, "[::1]:9443");
        assert!(matches!(client.tls.unwrap().server_name, ServerName::IpAddress(_)));
        assert!(PrometheusClient::new("http://prom:9090", TIMEOUT).unwrap().tls.is_none());
    }

    #[test]
    fn query_url_encodes_expression_and_time() {
        let client = PrometheusClient::new("http://prom:9090", TIMEOUT).unwrap();
        let url = client.query_url("rate(errors[5m]) > 0", 1_700_000_000);
        assert_eq!(url.path(), "/api/v1/query");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("query".to_string(), "rate(errors[5m]) > 0".to_string()),
                ("time".to_string(), "1700000000".to_string()),
            ]
        );
    }

    #[test]
    fn query_url_keeps_path_prefix() {
        let client = PrometheusClient::new("http://gateway/prometheus/", TIMEOUT).unwrap();
        let url = client.query_url("up", 1);
        assert_eq!(url.path(), "/prometheus/api/v1/query");
    }
}
