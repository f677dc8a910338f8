use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::Error;
use crate::types::Result;

/// Endpoint to scan
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanTarget {
    pub host: String,
    pub port: u16,
}

impl FromStr for ScanTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("Scan target {} is not host:port", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::Config(format!("Scan target {} has no host", s)));
        }
        let port = port
            .parse()
            .map_err(|_| Error::Config(format!("Scan target {} has an invalid port", s)))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Source of the certificates an endpoint presents
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EndpointScanner: Send + Sync {
    /// DER certificates presented by the endpoint, leaf first
    async fn peer_chain(&self, target: &ScanTarget) -> Result<Vec<Vec<u8>>>;
}

/// Accepts whatever the endpoint presents; discovery records, it does not trust
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// TLS handshake scanner
pub struct TlsScanner {
    connector: TlsConnector,
    timeout: Duration,
}

impl TlsScanner {
    /// Create a scanner bounding connect plus handshake by `timeout`
    pub fn new(timeout: Duration) -> Self {
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();

        Self {
            connector: TlsConnector::from(Arc::new(config)),
            timeout,
        }
    }

    async fn handshake(&self, target: &ScanTarget) -> Result<Vec<Vec<u8>>> {
        let server_name = ServerName::try_from(target.host.as_str())
            .map_err(|e| Error::Validation(format!("Invalid scan host {}: {}", target.host, e)))?;

        let stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| Error::Transport(format!("Connect to {} failed: {}", target, e)))?;
        let tls = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Transport(format!("TLS handshake with {} failed: {}", target, e)))?;

        let (_, session) = tls.get_ref();
        let chain: Vec<Vec<u8>> = session
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.0.clone()).collect())
            .unwrap_or_default();
        debug!("{} presented {} certificate(s)", target, chain.len());
        Ok(chain)
    }
}

#[async_trait]
impl EndpointScanner for TlsScanner {
    async fn peer_chain(&self, target: &ScanTarget) -> Result<Vec<Vec<u8>>> {
        match tokio::time::timeout(self.timeout, self.handshake(target)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Transport(format!(
                "Scan of {} timed out after {:?}",
                target, self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::inspect::tests::self_signed;
    use rustls::{PrivateKey, ServerConfig};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    #[test]
    fn test_parse_targets() {
        let target: ScanTarget = "web.internal:8443".parse().unwrap();
        assert_eq!(target.host, "web.internal");
        assert_eq!(target.port, 8443);
        assert_eq!(target.to_string(), "web.internal:8443");

        let v6: ScanTarget = "[::1]:443".parse().unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.to_string(), "[::1]:443");

        assert!("web.internal".parse::<ScanTarget>().is_err());
        assert!(":443".parse::<ScanTarget>().is_err());
        assert!("web.internal:https".parse::<ScanTarget>().is_err());
    }

    #[tokio::test]
    async fn test_handshake_returns_presented_leaf() {
        let (der, key) = self_signed("tls.example.com");
        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(vec![Certificate(der.clone())], PrivateKey(key))
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            if let Ok(mut tls) = acceptor.accept(socket).await {
                let _ = tls.shutdown().await;
            }
        });

        let scanner = TlsScanner::new(Duration::from_secs(5));
        let target = ScanTarget {
            host: "127.0.0.1".to_string(),
            port,
        };
        let chain = scanner.peer_chain(&target).await.unwrap();
        assert_eq!(chain, vec![der]);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let silent = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let scanner = TlsScanner::new(Duration::from_millis(200));
        let target = ScanTarget {
            host: "127.0.0.1".to_string(),
            port,
        };
        let err = scanner.peer_chain(&target).await.unwrap_err();
        assert!(matches!(err, Error::Transport(ref msg) if msg.contains("timed out")));

        silent.abort();
    }
}
