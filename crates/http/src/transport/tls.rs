//! TLS transport on top of `rustls`.
//!
//! [`TlsSetup`] collects the daemon-wide material (cipher suites, key and certificate,
//! client trust anchors) and builds a [`TlsContext`]; every accepted socket then gets its
//! own [`TlsTransport`] through [`TlsContext::setup_conn`].

use std::fmt;
use std::io;
use std::io::{Read, Write};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection};
use tracing::{debug, trace, warn};

use crate::protocol::{DaemonError, TransportError};
use crate::transport::{Socket, Transport};

/// Daemon-wide TLS material, consumed by [`TlsSetup::build`].
pub struct TlsSetup {
    provider: CryptoProvider,
    certs: Vec<CertificateDer<'static>>,
    key: Option<PrivateKeyDer<'static>>,
    client_roots: Option<RootCertStore>,
}

impl TlsSetup {
    /// Starts from the default provider, restricted to `ciphers` when given.
    ///
    /// `ciphers` is a `:` separated list of suite names such as
    /// `TLS13_AES_256_GCM_SHA384:TLS13_CHACHA20_POLY1305_SHA256`.
    pub fn new(ciphers: Option<&str>) -> Result<Self, DaemonError> {
        let mut provider = rustls::crypto::ring::default_provider();
        if let Some(ciphers) = ciphers {
            let wanted: Vec<&str> = ciphers.split(':').map(str::trim).filter(|c| !c.is_empty()).collect();
            provider.cipher_suites.retain(|suite| {
                let name = format!("{:?}", suite.suite());
                wanted.iter().any(|w| w.eq_ignore_ascii_case(&name))
            });
            if provider.cipher_suites.is_empty() {
                return Err(DaemonError::tls(format!("no supported cipher suite in '{ciphers}'")));
            }
        }
        Ok(Self { provider, certs: Vec::new(), key: None, client_roots: None })
    }

    /// Loads the PEM encoded private key and certificate chain.
    pub fn init_key_cert(&mut self, pem_key: &[u8], pem_cert: &[u8], passphrase: Option<&str>) -> Result<(), DaemonError> {
        if passphrase.is_some() {
            return Err(DaemonError::tls("encrypted private keys are not supported"));
        }
        let certs = rustls_pemfile::certs(&mut &pem_cert[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DaemonError::tls(format!("invalid certificate: {e}")))?;
        if certs.is_empty() {
            return Err(DaemonError::tls("no certificate found"));
        }
        let key = rustls_pemfile::private_key(&mut &pem_key[..])
            .map_err(|e| DaemonError::tls(format!("invalid private key: {e}")))?
            .ok_or_else(|| DaemonError::tls("no private key found"))?;
        debug!(chain = certs.len(), "loaded tls certificate");
        self.certs = certs;
        self.key = Some(key);
        Ok(())
    }

    /// Accepts custom Diffie-Hellman parameters.
    ///
    /// The TLS stack only negotiates named groups, so the parameters are checked for
    /// being PEM and otherwise unused.
    pub fn init_dh_params(&mut self, pem: &[u8]) -> Result<(), DaemonError> {
        if !pem.starts_with(b"-----BEGIN DH PARAMETERS-----") {
            return Err(DaemonError::tls("invalid dh parameters"));
        }
        warn!("custom dh parameters are ignored, named groups are used instead");
        Ok(())
    }

    /// Requires client certificates issued by one of the PEM encoded `trust` anchors.
    pub fn init_client_trust(&mut self, pem_trust: &[u8]) -> Result<(), DaemonError> {
        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut &pem_trust[..]) {
            let cert = cert.map_err(|e| DaemonError::tls(format!("invalid trust anchor: {e}")))?;
            roots.add(cert).map_err(|e| DaemonError::tls(format!("invalid trust anchor: {e}")))?;
        }
        if roots.is_empty() {
            return Err(DaemonError::tls("no trust anchor found"));
        }
        self.client_roots = Some(roots);
        Ok(())
    }

    pub fn build(self) -> Result<TlsContext, DaemonError> {
        let key = self.key.ok_or_else(|| DaemonError::tls("no private key configured"))?;
        let provider = Arc::new(self.provider);
        let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(DaemonError::tls)?;
        let builder = match self.client_roots {
            Some(roots) => {
                let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                    .build()
                    .map_err(DaemonError::tls)?;
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };
        let config = builder.with_single_cert(self.certs, key).map_err(DaemonError::tls)?;
        Ok(TlsContext { config: Arc::new(config) })
    }
}

impl fmt::Debug for TlsSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSetup")
            .field("cipher_suites", &self.provider.cipher_suites.len())
            .field("certs", &self.certs.len())
            .field("key", &self.key.is_some())
            .field("client_trust", &self.client_roots.is_some())
            .finish()
    }
}

/// Built TLS configuration shared by all connections of a daemon.
#[derive(Debug, Clone)]
pub struct TlsContext {
    config: Arc<ServerConfig>,
}

impl TlsContext {
    pub fn setup_conn<S: Socket>(&self, socket: S) -> Result<TlsTransport<S>, TransportError> {
        let session = ServerConnection::new(Arc::clone(&self.config)).map_err(TransportError::tls)?;
        Ok(TlsTransport { session, socket, plaintext_pending: 0 })
    }
}

/// A TLS session over a [`Socket`].
pub struct TlsTransport<S> {
    session: ServerConnection,
    socket: S,
    plaintext_pending: usize,
}

impl<S: Socket> TlsTransport<S> {
    /// Reads and decrypts what the socket has, `Ok(false)` on end-of-stream.
    fn fill(&mut self) -> Result<bool, TransportError> {
        match self.session.read_tls(&mut self.socket) {
            Ok(0) => Ok(false),
            Ok(n) => {
                trace!(len = n, "read tls records");
                let state = self.session.process_new_packets().map_err(|e| {
                    // tell the peer before giving up
                    let _ = self.session.write_tls(&mut self.socket);
                    TransportError::tls(e)
                })?;
                self.plaintext_pending = state.plaintext_bytes_to_read();
                if state.peer_has_closed() && self.plaintext_pending == 0 {
                    return Ok(false);
                }
                Ok(true)
            }
            Err(e) => Err(TransportError::from_io(e)),
        }
    }

    fn write_out(&mut self) -> Result<(), TransportError> {
        while self.session.wants_write() {
            self.session.write_tls(&mut self.socket).map_err(TransportError::from_io)?;
        }
        Ok(())
    }
}

impl<S: Socket> Transport for TlsTransport<S> {
    fn handshake(&mut self) -> Result<bool, TransportError> {
        loop {
            match self.write_out() {
                Ok(()) => {}
                Err(TransportError::Again) => return Ok(false),
                Err(e) => return Err(e),
            }
            if !self.session.is_handshaking() {
                debug!(protocol = ?self.session.protocol_version(), "tls handshake complete");
                return Ok(true);
            }
            match self.fill() {
                Ok(true) => {}
                Ok(false) => return Err(TransportError::ConnReset),
                Err(TransportError::Again) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    fn wants_write(&self) -> bool {
        self.session.wants_write()
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            match self.session.reader().read(buf) {
                Ok(n) => {
                    self.plaintext_pending = self.plaintext_pending.saturating_sub(n);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(TransportError::from_io(e)),
            }
            if !self.fill()? {
                return Ok(0);
            }
        }
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.write_out()?;
        let n = self.session.writer().write(buf).map_err(TransportError::from_io)?;
        match self.write_out() {
            Ok(()) | Err(TransportError::Again) => Ok(n),
            Err(e) => Err(e),
        }
    }

    fn has_pending(&self) -> bool {
        self.plaintext_pending > 0
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.write_out()
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        self.session.send_close_notify();
        match self.write_out() {
            Ok(()) | Err(TransportError::Again) => {}
            Err(e) => return Err(e),
        }
        self.socket.shutdown_write().map_err(TransportError::from_io)
    }
}

impl<S> fmt::Debug for TlsTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsTransport")
            .field("handshaking", &self.session.is_handshaking())
            .field("plaintext_pending", &self.plaintext_pending)
            .finish_non_exhaustive()
    }
}
