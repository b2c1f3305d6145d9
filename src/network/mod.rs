//! Listeners and TLS setup.
//!
//! Two optional endpoints, plain and TLS. The TLS acceptor requests (but
//! does not require) a client certificate; a presented certificate's
//! SHA-256 fingerprint feeds SASL EXTERNAL.

pub mod connection;

use anyhow::Context as _;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use tokio_rustls::rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use tokio_rustls::rustls::{self, DistinguishedName, SignatureScheme};
use tokio_rustls::TlsAcceptor;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::TlsConfig;
use crate::server::Server;

/// Bind the configured listeners and serve until shutdown.
pub async fn run(server: Arc<Server>) -> anyhow::Result<()> {
    let tracker = TaskTracker::new();

    if let Some(addr) = server.config.listen.plain {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        info!(%addr, "listening (plain)");
        spawn_accept_loop(&tracker, server.clone(), listener, None);
    }

    match (server.config.listen.tls, server.config.tls.clone()) {
        (Some(addr), Some(tls)) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("bind {addr}"))?;
            let acceptor = build_acceptor(&tls).context("TLS configuration")?;
            info!(%addr, "listening (tls)");
            spawn_accept_loop(&tracker, server.clone(), listener, Some(acceptor));
        }
        (Some(_), None) => {
            anyhow::bail!("listen.tls configured without a [tls] section");
        }
        _ => {}
    }

    // wait for shutdown, then for every connection task to finish
    server.shutdown.cancelled().await;
    info!("shutting down");
    tracker.close();
    tracker.wait().await;
    Ok(())
}

fn spawn_accept_loop(
    tracker: &TaskTracker,
    server: Arc<Server>,
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
) {
    let inner = tracker.clone();
    tracker.spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = server.shutdown.cancelled() => return,
                accepted = listener.accept() => accepted,
            };

            let (stream, addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let server = server.clone();
            match acceptor.clone() {
                None => {
                    inner.spawn(connection::serve_plain(server, stream, addr));
                }
                Some(acceptor) => {
                    inner.spawn(connection::serve_tls(server, acceptor, stream, addr));
                }
            }
        }
    });
}

/// Build the TLS acceptor from PEM files.
fn build_acceptor(config: &TlsConfig) -> anyhow::Result<TlsAcceptor> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut std::io::BufReader::new(
        std::fs::File::open(&config.cert).with_context(|| format!("open {:?}", config.cert))?,
    ))
    .collect::<Result<_, _>>()
    .context("read certificate chain")?;

    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut std::io::BufReader::new(
            std::fs::File::open(&config.key).with_context(|| format!("open {:?}", config.key))?,
        ))
        .context("read private key")?
        .context("no private key found")?;

    let server_config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(Arc::new(AcceptAnyClientCert::new()))
        .with_single_cert(certs, key)
        .context("assemble TLS config")?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Requests a client certificate and accepts whatever arrives.
///
/// Identity is not decided at the TLS layer: SASL EXTERNAL compares the
/// certificate fingerprint against the credential store, so the
/// handshake only needs to capture the certificate.
#[derive(Debug)]
struct AcceptAnyClientCert {
    schemes: Vec<SignatureScheme>,
}

impl AcceptAnyClientCert {
    fn new() -> Self {
        Self {
            schemes: rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms
                .supported_schemes(),
        }
    }
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}
