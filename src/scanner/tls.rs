//! TLS prober: connects, completes a handshake even against broken
//! certificates, then evaluates leaf trust against the system root store
//! separately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, aws_lc_rs};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::warn;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate, X509Name};

use super::{NetworkScanner, ScanError};
use crate::db::models::{CertificateObservation, DistinguishedName, SOURCE_TYPE_CLOUD};

/// System trust roots, loaded once per process and read-only thereafter.
/// `None` when the platform store yields no usable anchors; trust evaluation
/// then fails with an explanatory error instead of crashing.
/// The crate pulls in more than one rustls crypto backend (reqwest brings
/// ring), so the provider is pinned explicitly instead of relying on a
/// process default.
fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(aws_lc_rs::default_provider())
}

static NATIVE_ROOT_VERIFIER: Lazy<Option<Arc<WebPkiServerVerifier>>> = Lazy::new(|| {
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        warn!(error = %err, "Failed to load a system root certificate");
    }
    let mut roots = RootCertStore::empty();
    for cert in loaded.certs {
        let _ = roots.add(cert);
    }
    match WebPkiServerVerifier::builder_with_provider(Arc::new(roots), crypto_provider()).build() {
        Ok(verifier) => Some(verifier),
        Err(e) => {
            warn!(error = %e, "System root store unusable; all probes will report untrusted");
            None
        }
    }
});

/// Client config whose verifier accepts every chain, so expired, self-signed
/// and mismatched certificates still complete the handshake and can be
/// observed.
static OBSERVING_CLIENT_CONFIG: Lazy<Arc<ClientConfig>> = Lazy::new(|| {
    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .expect("default TLS protocol versions are supported by the provider")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    Arc::new(config)
});

pub struct TlsProber {
    timeout: Duration,
}

impl TlsProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl NetworkScanner for TlsProber {
    async fn scan(&self, target: &str) -> Result<Vec<CertificateObservation>, ScanError> {
        let (host, addr) = split_host_addr(target);

        let server_name = ServerName::try_from(host.clone())
            .map_err(|_| ScanError::InvalidAddress(target.to_string()))?;

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ScanError::Dial(format!("connection to {addr} timed out")))?
            .map_err(|e| ScanError::Dial(e.to_string()))?;

        let connector = TlsConnector::from(OBSERVING_CLIENT_CONFIG.clone());
        let tls_stream = tokio::time::timeout(self.timeout, connector.connect(server_name.clone(), stream))
            .await
            .map_err(|_| ScanError::Handshake("handshake timed out".to_string()))?
            .map_err(|e| ScanError::Handshake(e.to_string()))?;

        let (_, session) = tls_stream.get_ref();
        let peer_certs = session
            .peer_certificates()
            .filter(|certs| !certs.is_empty())
            .ok_or(ScanError::NoCertificates)?;

        let leaf = &peer_certs[0];
        let intermediates = &peer_certs[1..];
        let (is_trusted, trust_error) = evaluate_trust(leaf, intermediates, &server_name);

        let observation = observation_from_der(leaf, &addr, is_trusted, trust_error)?;
        Ok(vec![observation])
    }
}

/// Verify the leaf against the cached system roots using only the
/// peer-supplied intermediates. Decoupled from the handshake: it runs after
/// every successful connection, trusted or not.
fn evaluate_trust(
    leaf: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    server_name: &ServerName<'static>,
) -> (bool, Option<String>) {
    let Some(verifier) = NATIVE_ROOT_VERIFIER.as_ref() else {
        return (false, Some("system root store unavailable".to_string()));
    };
    match verifier.verify_server_cert(leaf, intermediates, server_name, &[], UnixTime::now()) {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    }
}

fn observation_from_der(
    der: &CertificateDer<'_>,
    source_uid: &str,
    is_trusted: bool,
    trust_error: Option<String>,
) -> Result<CertificateObservation, ScanError> {
    let (_, cert) =
        X509Certificate::from_der(der.as_ref()).map_err(|e| ScanError::Parse(e.to_string()))?;

    let mut dns_names = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                dns_names.push(dns.to_string());
            }
        }
    }

    Ok(CertificateObservation {
        source_uid: source_uid.to_string(),
        source_type: SOURCE_TYPE_CLOUD.to_string(),
        serial: cert.tbs_certificate.serial.to_string(),
        subject: read_dn(cert.subject()),
        issuer: read_dn(cert.issuer()),
        signature_algo: signature_algorithm_name(&cert.signature_algorithm.algorithm.to_id_string()),
        valid_from: asn1_time_to_utc(cert.validity().not_before.timestamp())?,
        valid_until: asn1_time_to_utc(cert.validity().not_after.timestamp())?,
        dns_names,
        is_trusted,
        trust_error,
    })
}

fn read_dn(name: &X509Name<'_>) -> DistinguishedName {
    let cn = name
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or_default()
        .to_string();
    let org = name
        .iter_organization()
        .find_map(|attr| attr.as_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let ou = name
        .iter_organizational_unit()
        .find_map(|attr| attr.as_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    DistinguishedName { cn, org, ou }
}

fn asn1_time_to_utc(secs: i64) -> Result<DateTime<Utc>, ScanError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| ScanError::Parse("certificate validity out of range".to_string()))
}

fn signature_algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.5" => "SHA1-RSA".to_string(),
        "1.2.840.113549.1.1.11" => "SHA256-RSA".to_string(),
        "1.2.840.113549.1.1.12" => "SHA384-RSA".to_string(),
        "1.2.840.113549.1.1.13" => "SHA512-RSA".to_string(),
        "1.2.840.113549.1.1.10" => "RSA-PSS".to_string(),
        "1.2.840.10045.4.3.2" => "ECDSA-SHA256".to_string(),
        "1.2.840.10045.4.3.3" => "ECDSA-SHA384".to_string(),
        "1.2.840.10045.4.3.4" => "ECDSA-SHA512".to_string(),
        "1.3.101.112" => "Ed25519".to_string(),
        other => other.to_string(),
    }
}

/// Split `host:port` into the SNI host and the dial address. Input without a
/// port is dialed on 443. Bracketed IPv6 literals keep their brackets in the
/// dial address only.
fn split_host_addr(target: &str) -> (String, String) {
    if let Some((host, port)) = target.rsplit_once(':') {
        if !host.is_empty() && !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
            let sni = host.trim_start_matches('[').trim_end_matches(']');
            return (sni.to_string(), target.to_string());
        }
    }
    (target.to_string(), format!("{target}:443"))
}

/// Accepts every server certificate so the handshake never aborts on
/// validation problems; trust is evaluated explicitly afterwards.
#[derive(Debug)]
struct AcceptAnyCert;

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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        crypto_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::PrivateKeyDer;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    #[test]
    fn split_host_addr_defaults_port() {
        assert_eq!(
            split_host_addr("example.com"),
            ("example.com".to_string(), "example.com:443".to_string())
        );
        assert_eq!(
            split_host_addr("example.com:8443"),
            ("example.com".to_string(), "example.com:8443".to_string())
        );
        assert_eq!(
            split_host_addr("[::1]:8443"),
            ("::1".to_string(), "[::1]:8443".to_string())
        );
    }

    #[test]
    fn signature_oid_mapping() {
        // Unknown OIDs fall through as dotted strings.
        assert_eq!(signature_algorithm_name("1.2.840.113549.1.1.11"), "SHA256-RSA");
        assert_eq!(signature_algorithm_name("1.2.840.10045.4.3.2"), "ECDSA-SHA256");
        assert_eq!(signature_algorithm_name("1.2.3.4.5"), "1.2.3.4.5");
    }

    /// A host presenting a self-signed certificate still
    /// yields a successful observation, with trusted=false and a non-empty
    /// trust error.
    #[tokio::test]
    async fn probe_observes_self_signed_certificate() {
        let signed = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_der = signed.cert.der().clone();
        let key_der = PrivateKeyDer::try_from(signed.key_pair.serialize_der()).unwrap();

        let server_config = rustls::ServerConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                if let Ok(mut tls) = acceptor.accept(stream).await {
                    let mut buf = [0u8; 16];
                    let _ = tls.read(&mut buf).await;
                }
            }
        });

        let prober = TlsProber::new(Duration::from_secs(5));
        let observations = prober.scan(&format!("localhost:{port}")).await.unwrap();

        assert_eq!(observations.len(), 1);
        let obs = &observations[0];
        assert_eq!(obs.source_uid, format!("localhost:{port}"));
        assert_eq!(obs.source_type, SOURCE_TYPE_CLOUD);
        assert!(!obs.is_trusted);
        assert!(obs.trust_error.as_deref().is_some_and(|e| !e.is_empty()));
        assert!(
            obs.subject.cn == "localhost" || obs.dns_names.iter().any(|d| d == "localhost"),
            "expected localhost in CN or SANs, got CN={:?} SANs={:?}",
            obs.subject.cn,
            obs.dns_names
        );

        let _ = server.await;
    }

    #[tokio::test]
    async fn probe_reports_dial_failure() {
        // Bind a listener, note its port, then drop it so the port is closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = TlsProber::new(Duration::from_secs(2));
        let err = prober.scan(&format!("127.0.0.1:{port}")).await.unwrap_err();
        assert!(matches!(err, ScanError::Dial(_)));
    }
}
