//! TLS mid-stack layer: handshake in both client and server modes, holds
//! the object in `Connecting` until handshake completes, then passes
//! through application data; consumes ALPN, SNI, and verification level.
//!
//! Built on `rustls` for the handshake state machine and PEM loading,
//! composed the same way [`crate::adapters::bwshape::BandwidthShaperLeaf`]
//! and [`crate::adapters::hid::HidReportLeaf`] compose a mid-stack
//! transform: by owning the inner layer directly rather than sitting
//! beside it in [`crate::object::IoObject`]'s layer vector.

use std::io::{self, Read, Write};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};

use crate::error::IoErrorKind;
use crate::event::Event;
use crate::layer::{Capability, IoOutcome, Layer, LayerAction, LayerState};

/// `Strict` does the normal WebPKI chain+hostname check; `Insecure`
/// accepts any certificate and exists only for test fixtures that talk to
/// a server with a cert not rooted in any trust store the test process
/// has access to.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VerifyLevel {
    Strict,
    Insecure,
}

/// A [`ServerCertVerifier`] that accepts any certificate, used only when
/// [`VerifyLevel::Insecure`] is requested. Never the default.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<rustls::crypto::CryptoProvider>);

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
        dss: &rustls::DigitallySignedStruct,
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
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Knobs a caller sets before building a client or server TLS config:
/// ALPN protocols and verification level, trimmed to what a `Layer`
/// actually needs at handshake time.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    pub alpn_protocols: Vec<Vec<u8>>,
    pub verify: Option<VerifyLevel>,
}

impl TlsConfig {
    pub fn new() -> TlsConfig {
        TlsConfig {
            alpn_protocols: Vec::new(),
            verify: None,
        }
    }

    pub fn with_alpn(mut self, protocols: Vec<Vec<u8>>) -> TlsConfig {
        self.alpn_protocols = protocols;
        self
    }

    pub fn with_verify(mut self, level: VerifyLevel) -> TlsConfig {
        self.verify = Some(level);
        self
    }
}

fn load_certs(pem: &[u8]) -> io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut io::BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

fn load_key(pem: &[u8]) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut io::BufReader::new(pem))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found in pem"))
}

/// Builds a [`ClientConfig`] from the given trust anchors (PEM, may be
/// empty when `cfg.verify == Some(Insecure)`) and [`TlsConfig`] knobs.
pub fn build_client_config(
    root_ca_pem: Option<&[u8]>,
    cfg: &TlsConfig,
) -> io::Result<Arc<ClientConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let mut config = if matches!(cfg.verify, Some(VerifyLevel::Insecure)) {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        if let Some(pem) = root_ca_pem {
            for cert in load_certs(pem)? {
                roots
                    .add(cert)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            }
        }
        builder
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    if !cfg.alpn_protocols.is_empty() {
        config.alpn_protocols = cfg.alpn_protocols.clone();
    }
    Ok(Arc::new(config))
}

/// Builds a [`ServerConfig`] from a PEM certificate chain and private key.
pub fn build_server_config(
    cert_chain_pem: &[u8],
    private_key_pem: &[u8],
    cfg: &TlsConfig,
) -> io::Result<Arc<ServerConfig>> {
    let certs = load_certs(cert_chain_pem)?;
    let key = load_key(private_key_pem)?;
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    if !cfg.alpn_protocols.is_empty() {
        config.alpn_protocols = cfg.alpn_protocols.clone();
    }
    Ok(Arc::new(config))
}

enum Side {
    Client(ClientConnection),
    Server(ServerConnection),
}

impl Side {
    fn is_handshaking(&self) -> bool {
        match self {
            Side::Client(c) => c.is_handshaking(),
            Side::Server(s) => s.is_handshaking(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Side::Client(c) => c.wants_write(),
            Side::Server(s) => s.wants_write(),
        }
    }

    fn wants_read(&self) -> bool {
        match self {
            Side::Client(c) => c.wants_read(),
            Side::Server(s) => s.wants_read(),
        }
    }

    fn read_tls(&mut self, io: &mut dyn Read) -> io::Result<usize> {
        match self {
            Side::Client(c) => c.read_tls(io),
            Side::Server(s) => s.read_tls(io),
        }
    }

    fn write_tls(&mut self, io: &mut dyn Write) -> io::Result<usize> {
        match self {
            Side::Client(c) => c.write_tls(io),
            Side::Server(s) => s.write_tls(io),
        }
    }

    fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
        match self {
            Side::Client(c) => c.process_new_packets(),
            Side::Server(s) => s.process_new_packets(),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            Side::Client(c) => c.send_close_notify(),
            Side::Server(s) => s.send_close_notify(),
        }
    }
}

/// Adapts a `&mut dyn Layer`'s `read`/`write` to `std::io::Read`/`Write` so
/// rustls's `read_tls`/`write_tls` (which want a byte stream) can drive the
/// inner layer directly, the same shim shape TLS-over-nonblocking-socket
/// examples in the rustls ecosystem use over a raw fd.
struct LayerIo<'a> {
    inner: &'a mut dyn Layer,
}

impl Read for LayerIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            IoOutcome::Ok(n) => Ok(n),
            IoOutcome::WouldBlock => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            IoOutcome::Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
        }
    }
}

impl Write for LayerIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.write(buf) {
            IoOutcome::Ok(n) => Ok(n),
            IoOutcome::WouldBlock => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            IoOutcome::Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// TLS mid-stack layer: holds the object in [`LayerState::Connecting`]
/// until the handshake completes, then passes application data through.
pub struct TlsLeaf {
    inner: Box<dyn Layer>,
    side: Side,
    state: LayerState,
    last_error: Option<String>,
}

impl TlsLeaf {
    pub fn client(
        inner: Box<dyn Layer>,
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    ) -> io::Result<TlsLeaf> {
        let conn = ClientConnection::new(config, server_name)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(TlsLeaf {
            inner,
            side: Side::Client(conn),
            state: LayerState::Connecting,
            last_error: None,
        })
    }

    pub fn server(inner: Box<dyn Layer>, config: Arc<ServerConfig>) -> io::Result<TlsLeaf> {
        let conn = ServerConnection::new(config)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(TlsLeaf {
            inner,
            side: Side::Server(conn),
            state: LayerState::Connecting,
            last_error: None,
        })
    }

    fn is_handshaking(&self) -> bool {
        self.side.is_handshaking()
    }

    /// Flushes any ciphertext rustls has queued for the peer to the inner
    /// layer. The write contract elsewhere in this crate caps a successful
    /// write at the bytes requested, but the handshake's own flow-control
    /// messages don't count against that, so this drains unconditionally
    /// rather than returning a byte count.
    fn flush_outgoing(&mut self) -> IoOutcome<()> {
        while self.side.wants_write() {
            let mut io = LayerIo { inner: &mut *self.inner };
            match self.side.write_tls(&mut io) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return IoOutcome::WouldBlock,
                Err(err) => return IoOutcome::Err(IoErrorKind::from_io_error(&err)),
            }
        }
        IoOutcome::Ok(())
    }

    /// Pulls ciphertext from the inner layer and feeds it to rustls,
    /// advancing the handshake state machine if one is in progress.
    fn pump_incoming(&mut self) -> IoOutcome<()> {
        let mut io = LayerIo { inner: &mut *self.inner };
        match self.side.read_tls(&mut io) {
            Ok(0) => return IoOutcome::Err(IoErrorKind::Disconnect),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return IoOutcome::WouldBlock,
            Err(err) => return IoOutcome::Err(IoErrorKind::from_io_error(&err)),
        }
        match self.side.process_new_packets() {
            Ok(_) => IoOutcome::Ok(()),
            Err(err) => {
                self.last_error = Some(format!("tls handshake failed: {err}"));
                self.state = LayerState::Error;
                IoOutcome::Err(IoErrorKind::Error)
            }
        }
    }

    fn advance_handshake(&mut self) -> IoOutcome<()> {
        loop {
            if let IoOutcome::Err(e) = self.flush_outgoing() {
                return IoOutcome::Err(e);
            }
            if !self.side.is_handshaking() {
                self.state = LayerState::Connected;
                return IoOutcome::Ok(());
            }
            if self.side.wants_read() {
                match self.pump_incoming() {
                    IoOutcome::Ok(()) => continue,
                    IoOutcome::WouldBlock => return IoOutcome::WouldBlock,
                    IoOutcome::Err(e) => return IoOutcome::Err(e),
                }
            }
            return IoOutcome::WouldBlock;
        }
    }
}

impl Layer for TlsLeaf {
    fn name(&self) -> &str {
        "tls"
    }

    fn capabilities(&self) -> Capability {
        Capability::READ | Capability::WRITE
    }

    fn read(&mut self, buf: &mut [u8]) -> IoOutcome<usize> {
        if self.is_handshaking() {
            match self.advance_handshake() {
                IoOutcome::Ok(()) => {}
                IoOutcome::WouldBlock => return IoOutcome::WouldBlock,
                IoOutcome::Err(e) => return IoOutcome::Err(e),
            }
        }
        loop {
            let plain_result = match &mut self.side {
                Side::Client(c) => c.reader().read(buf),
                Side::Server(s) => s.reader().read(buf),
            };
            match plain_result {
                Ok(0) => match self.pump_incoming() {
                    IoOutcome::Ok(()) => continue,
                    IoOutcome::WouldBlock => return IoOutcome::WouldBlock,
                    IoOutcome::Err(e) => return IoOutcome::Err(e),
                },
                Ok(n) => return IoOutcome::Ok(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => match self.pump_incoming() {
                    IoOutcome::Ok(()) => continue,
                    IoOutcome::WouldBlock => return IoOutcome::WouldBlock,
                    IoOutcome::Err(e) => return IoOutcome::Err(e),
                },
                Err(err) => return IoOutcome::Err(IoErrorKind::from_io_error(&err)),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> IoOutcome<usize> {
        if self.is_handshaking() {
            match self.advance_handshake() {
                IoOutcome::Ok(()) => {}
                IoOutcome::WouldBlock => return IoOutcome::WouldBlock,
                IoOutcome::Err(e) => return IoOutcome::Err(e),
            }
        }
        let n = match &mut self.side {
            Side::Client(c) => c.writer().write(buf),
            Side::Server(s) => s.writer().write(buf),
        };
        let n = match n {
            Ok(n) => n,
            Err(err) => return IoOutcome::Err(IoErrorKind::from_io_error(&err)),
        };
        match self.flush_outgoing() {
            IoOutcome::Ok(()) => IoOutcome::Ok(n),
            IoOutcome::WouldBlock if n > 0 => IoOutcome::Ok(n),
            IoOutcome::WouldBlock => IoOutcome::WouldBlock,
            IoOutcome::Err(e) => IoOutcome::Err(e),
        }
    }

    fn disconnect(&mut self) -> bool {
        match &mut self.side {
            Side::Client(c) => c.send_close_notify(),
            Side::Server(s) => s.send_close_notify(),
        }
        let _ = self.flush_outgoing();
        self.state = LayerState::Disconnecting;
        self.inner.disconnect()
    }

    fn destroy(&mut self) {
        self.inner.destroy();
    }

    fn process_event(&mut self, event: &Event) -> LayerAction {
        if self.is_handshaking() {
            match self.advance_handshake() {
                IoOutcome::Ok(()) => {
                    return LayerAction::Rewrite(Event::new(
                        crate::event::EventKind::Connected,
                        event.token(),
                    ))
                }
                IoOutcome::WouldBlock => return LayerAction::Consume,
                IoOutcome::Err(_) => {
                    let rewritten = Event::with_error(
                        crate::event::EventKind::Error,
                        event.token(),
                        IoErrorKind::Error,
                    );
                    let rewritten = match self.errormsg() {
                        Some(msg) => rewritten.with_context(msg),
                        None => rewritten,
                    };
                    return LayerAction::Rewrite(rewritten)
                }
            }
        }
        self.inner.process_event(event)
    }

    fn errormsg(&self) -> Option<String> {
        self.last_error.clone().or_else(|| self.inner.errormsg())
    }

    fn state(&self) -> LayerState {
        self.state.min(self.inner.state())
    }
}
