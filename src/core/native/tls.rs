// src/core/native/tls.rs

use crate::core::RediscopeError;
use crate::core::database::TlsSettings;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// A ready-to-use TLS connector plus the server name to present.
#[derive(Clone)]
pub(super) struct TlsSetup {
    pub connector: TlsConnector,
    pub server_name: ServerName<'static>,
}

impl std::fmt::Debug for TlsSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSetup")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Builds the TLS connector for `host`. Fails on malformed PEM material, which
/// callers treat as a synchronous construction failure.
pub(super) fn setup(settings: &TlsSettings, host: &str) -> Result<TlsSetup, RediscopeError> {
    let config = client_config(settings)?;
    let name = settings.servername.as_deref().unwrap_or(host);
    let server_name = ServerName::try_from(name)
        .map_err(|_| RediscopeError::Tls(format!("invalid TLS server name '{name}'")))?
        .to_owned();

    Ok(TlsSetup {
        connector: TlsConnector::from(Arc::new(config)),
        server_name,
    })
}

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn client_config(settings: &TlsSettings) -> Result<ClientConfig, RediscopeError> {
    let provider = crypto_provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = if settings.verify_server_cert {
        builder.with_root_certificates(root_store(settings.ca_cert.as_deref())?)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
    };

    match &settings.client_cert {
        Some(client) => {
            let certs = parse_certs(&client.certificate)?;
            let key = parse_key(&client.key)?;
            Ok(builder.with_client_auth_cert(certs, key)?)
        }
        None => Ok(builder.with_no_client_auth()),
    }
}

fn root_store(ca_pem: Option<&str>) -> Result<RootCertStore, RediscopeError> {
    let mut store = RootCertStore::empty();
    match ca_pem {
        Some(pem) => {
            for cert in parse_certs(pem)? {
                store.add(cert)?;
            }
        }
        None => store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(store)
}

fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, RediscopeError> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RediscopeError::Tls(format!("invalid certificate: {e}")))?;
    if certs.is_empty() {
        return Err(RediscopeError::Tls("no certificate found in PEM".into()));
    }
    Ok(certs)
}

fn parse_key(pem: &str) -> Result<PrivateKeyDer<'static>, RediscopeError> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| RediscopeError::Tls(format!("invalid private key: {e}")))?
        .ok_or_else(|| RediscopeError::Tls("no private key found in PEM".into()))
}

/// Used when `verify_server_cert` is off. Handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
