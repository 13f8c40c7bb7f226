//! TLS client setup for server connections.

use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls_pemfile::{certs, private_key};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
    self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use tracing::{debug, warn};

use crate::error::ConnectError;

#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    /// Skip certificate verification.
    pub accept_invalid: bool,
    /// PEM file holding a client certificate chain and its key.
    pub client_cert: Option<PathBuf>,
}

/// Build a connector using the platform's trust roots.
pub fn connector(opts: &TlsOptions) -> Result<TlsConnector, ConnectError> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        warn!(error = %e, "failed to load a native certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "loaded trust roots");

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let mut config = match &opts.client_cert {
        Some(path) => {
            let (chain, key) = load_client_cert(path)?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| ConnectError::Tls(e.to_string()))?
        }
        None => builder.with_no_client_auth(),
    };

    if opts.accept_invalid {
        let provider = config.crypto_provider().clone();
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyCert { provider }));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Run the client handshake, giving up after `timeout`.
pub async fn tls_handshake(
    connector: &TlsConnector,
    stream: TcpStream,
    host: &str,
    timeout: Duration,
) -> Result<TlsStream<TcpStream>, ConnectError> {
    let name = ServerName::try_from(host.to_owned())
        .map_err(|_| ConnectError::ServerName(host.to_owned()))?;
    match tokio::time::timeout(timeout, connector.connect(name, stream)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ConnectError::Tls(e.to_string())),
        Err(_) => Err(ConnectError::TlsTimeout),
    }
}

fn load_client_cert(
    path: &Path,
) -> Result<
    (
        Vec<CertificateDer<'static>>,
        rustls::pki_types::PrivateKeyDer<'static>,
    ),
    ConnectError,
> {
    let pem = std::fs::read(path)?;
    let chain = certs(&mut BufReader::new(Cursor::new(&pem)))
        .collect::<Result<Vec<_>, _>>()?;
    if chain.is_empty() {
        return Err(ConnectError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    let key = private_key(&mut BufReader::new(Cursor::new(&pem)))?.ok_or_else(|| {
        ConnectError::Tls(format!("no private key found in {}", path.display()))
    })?;
    Ok((chain, key))
}

/// Verifier used when the network is configured to accept any certificate.
/// Signatures are still checked so the handshake itself stays sound.
#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_handshake_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and never answer the ClientHello.
        let _peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let connector = connector(&TlsOptions::default()).unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let err = tls_handshake(&connector, stream, "localhost", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::TlsTimeout));
        assert_eq!(err.to_string(), "handshake timed out");
    }

    #[test]
    fn test_missing_client_cert() {
        let opts = TlsOptions {
            accept_invalid: true,
            client_cert: Some(PathBuf::from("/nonexistent/slirc-client.pem")),
        };
        assert!(matches!(connector(&opts), Err(ConnectError::Io(_))));
    }
}
