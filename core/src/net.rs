/*
 * net.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tether, a keep-alive HTTP/1.1 client library.
 *
 * Tether is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tether is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tether.  If not, see <http://www.gnu.org/licenses/>.
 */

//! TLS helpers: wrap a connected TcpStream with rustls.
//!
//! Certificate validation is chosen per client. The default accepts any
//! certificate chain (handshake signatures are still checked); platform
//! validation and caller-supplied callbacks are opt-in.

use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ClientConfig;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Callback deciding whether a server certificate chain is acceptable.
/// Arguments: end-entity certificate, intermediates, the name being verified.
pub type CertificateCallback =
    Arc<dyn Fn(&CertificateDer<'_>, &[CertificateDer<'_>], &ServerName<'_>) -> bool + Send + Sync>;

/// How the server certificate is validated during the TLS handshake.
#[derive(Clone, Default)]
pub enum CertificateValidator {
    /// Accept every certificate.
    #[default]
    AcceptAll,
    /// Validate against platform roots (webpki-roots when none are found).
    Platform,
    /// Ask the callback.
    Custom(CertificateCallback),
}

impl fmt::Debug for CertificateValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateValidator::AcceptAll => f.write_str("AcceptAll"),
            CertificateValidator::Platform => f.write_str("Platform"),
            CertificateValidator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Build a root certificate store: platform native certs first, then webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

fn accept_any(_: &CertificateDer<'_>, _: &[CertificateDer<'_>], _: &ServerName<'_>) -> bool {
    true
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Verifier that delegates the trust decision to a callback.
struct CallbackVerifier {
    callback: CertificateCallback,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for CallbackVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackVerifier").finish_non_exhaustive()
    }
}

impl ServerCertVerifier for CallbackVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if (self.callback)(end_entity, intermediates, server_name) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn callback_config(callback: CertificateCallback) -> io::Result<Arc<ClientConfig>> {
    let provider = crypto_provider();
    let verifier = CallbackVerifier {
        callback,
        provider: provider.clone(),
    };
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

fn platform_config() -> io::Result<Arc<ClientConfig>> {
    let mut config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
        .with_root_certificates(build_root_store())
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

static ACCEPT_ALL_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
static PLATFORM_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

fn cached(
    cell: &'static OnceLock<Arc<ClientConfig>>,
    build: impl FnOnce() -> io::Result<Arc<ClientConfig>>,
) -> io::Result<Arc<ClientConfig>> {
    if let Some(config) = cell.get() {
        return Ok(config.clone());
    }
    let config = build()?;
    Ok(cell.get_or_init(|| config).clone())
}

/// TLS client config for the given validator. AcceptAll and Platform configs are shared.
pub fn client_config(validator: &CertificateValidator) -> io::Result<Arc<ClientConfig>> {
    match validator {
        CertificateValidator::AcceptAll => {
            cached(&ACCEPT_ALL_CONFIG, || callback_config(Arc::new(accept_any)))
        }
        CertificateValidator::Platform => cached(&PLATFORM_CONFIG, platform_config),
        CertificateValidator::Custom(callback) => callback_config(callback.clone()),
    }
}

/// Perform the client TLS handshake for `host` over an established TCP stream.
/// Protocol and certificate failures surface as `InvalidData`.
pub async fn tls_handshake(
    tcp: TcpStream,
    host: &str,
    validator: &CertificateValidator,
) -> io::Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"))?;
    let connector = TlsConnector::from(client_config(validator)?);
    connector.connect(server_name, tcp).await
}
