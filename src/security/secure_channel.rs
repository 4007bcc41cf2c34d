use crate::error::{BridgeError, HandshakeCause, Result, TrustRejection};
use crate::events::{dispatcher, ConnectionRole, LogEvent, LogLevel, TrustDecisionEvent};
use crate::security::identity;
use crate::security::trust::{TrustContext, TrustDecision};
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, DistinguishedName, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// What the handshake established about the peer.
#[derive(Debug, Clone)]
pub struct AuthSummary {
    pub role: ConnectionRole,
    pub fingerprint: Option<String>,
    pub subject: Option<String>,
    pub decision: String,
    pub reason: String,
    pub protocol: Option<String>,
    pub peer_addr: Option<SocketAddr>,
}

/// A mutually authenticated byte stream.
pub struct SecureChannel {
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub auth: AuthSummary,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel").field("auth", &self.auth).finish()
    }
}

impl SecureChannel {
    /// Read one `\n` terminated line (terminator stripped).
    ///
    /// `Ok(None)` when the peer closed without sending anything. A line longer
    /// than `max_bytes` is a [`BridgeError::MalformedMessage`].
    pub async fn read_line(&mut self, max_bytes: usize, deadline: Duration) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let limit = max_bytes as u64 + 1;
        let n = timeout(
            deadline,
            (&mut self.reader).take(limit).read_until(b'\n', &mut buf),
        )
        .await
        .map_err(|_| BridgeError::IoTimeout("read"))??;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        if buf.len() > max_bytes {
            return Err(BridgeError::MalformedMessage(format!(
                "line exceeds {} bytes",
                max_bytes
            )));
        }
        String::from_utf8(buf)
            .map(Some)
            .map_err(|e| BridgeError::MalformedMessage(format!("invalid utf-8: {}", e)))
    }

    /// Write `line` plus the terminator and flush.
    pub async fn write_line(&mut self, line: &str, deadline: Duration) -> Result<()> {
        let writer = &mut self.writer;
        timeout(deadline, async move {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        })
        .await
        .map_err(|_| BridgeError::IoTimeout("write"))??;
        Ok(())
    }

    /// Send close_notify and shut the stream down.
    pub async fn close(mut self, deadline: Duration) -> Result<()> {
        timeout(deadline, self.writer.shutdown())
            .await
            .map_err(|_| BridgeError::IoTimeout("close"))??;
        Ok(())
    }
}

/// Trust-on-first-use certificate verifier for both ends of a session.
///
/// One instance per session: it remembers why it rejected the peer so the
/// caller gets the typed cause back after the TLS stack flattened it.
///
/// During the handshake the chain is only assessed. An unpinned peer is
/// pinned by [`TofuVerifier::commit`], after the handshake completed and the
/// peer's signature was checked.
#[derive(Debug)]
pub struct TofuVerifier {
    ctx: TrustContext,
    role: ConnectionRole,
    peer_addr: Option<SocketAddr>,
    provider: Arc<CryptoProvider>,
    outcome: Mutex<Option<TrustDecision>>,
    leaf: Mutex<Option<CertificateDer<'static>>>,
}

impl TofuVerifier {
    pub fn new(
        ctx: TrustContext,
        role: ConnectionRole,
        peer_addr: Option<SocketAddr>,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self {
            ctx,
            role,
            peer_addr,
            provider,
            outcome: Mutex::new(None),
            leaf: Mutex::new(None),
        }
    }

    /// Decision taken for the peer chain, once the handshake got that far.
    pub fn decision(&self) -> Option<TrustDecision> {
        self.outcome.lock().clone()
    }

    pub fn rejection(&self) -> Option<TrustRejection> {
        self.outcome.lock().as_ref().and_then(|d| d.rejection)
    }

    fn verify_chain(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<(), rustls::Error> {
        let mut chain = Vec::with_capacity(1 + intermediates.len());
        chain.push(end_entity.clone());
        chain.extend(intermediates.iter().cloned());
        let decision = self.ctx.assess_chain(&chain, now.as_secs() as i64);
        let rejection = decision.rejection;
        if rejection.is_some() {
            self.emit(&decision);
        }
        *self.outcome.lock() = Some(decision);
        *self.leaf.lock() = Some(end_entity.clone().into_owned());
        match rejection {
            None => Ok(()),
            Some(r) => Err(tls_error(r)),
        }
    }

    /// Settle the peer seen in a completed handshake: pin it on first use,
    /// or fail if the pin changed since the chain was assessed.
    pub fn commit(&self) -> Result<TrustDecision> {
        let Some(leaf) = self.leaf.lock().clone() else {
            return Err(BridgeError::handshake(TrustRejection::EmptyChain));
        };
        let decision = self
            .ctx
            .evaluate_chain(std::slice::from_ref(&leaf), UnixTime::now().as_secs() as i64);
        self.emit(&decision);
        *self.outcome.lock() = Some(decision.clone());
        match decision.rejection {
            None => Ok(decision),
            Some(r) => Err(BridgeError::handshake(r)),
        }
    }

    fn emit(&self, decision: &TrustDecision) {
        let level = if decision.is_accept() {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        let mut meta = dispatcher::meta("trust", level);
        meta.corr_id = Some(dispatcher::correlation_id());
        dispatcher::emit(LogEvent::TrustDecision(TrustDecisionEvent {
            meta,
            role: self.role,
            decision: format!("{:?}", decision.outcome),
            reason: decision.reason.to_string(),
            fingerprint: decision.fingerprint.clone(),
            pinned_fingerprint_match: decision.pinned_match(),
            stored: decision.stored,
            peer_addr: self.peer_addr.map(|a| a.to_string()),
        }));
    }

    fn failure(&self, err: std::io::Error) -> BridgeError {
        if let Some(rejection) = self.rejection() {
            return BridgeError::handshake(rejection);
        }
        let tls = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            .cloned();
        match tls {
            Some(tls) => BridgeError::handshake(tls),
            None => BridgeError::handshake(err),
        }
    }

    fn summary(&self, protocol: Option<String>) -> AuthSummary {
        let decision = self.decision();
        AuthSummary {
            role: self.role,
            fingerprint: decision.as_ref().and_then(|d| d.fingerprint.clone()),
            subject: None,
            decision: decision
                .as_ref()
                .map(|d| format!("{:?}", d.outcome))
                .unwrap_or_else(|| "Accept".into()),
            reason: decision
                .as_ref()
                .map(|d| d.reason.to_string())
                .unwrap_or_default(),
            protocol,
            peer_addr: self.peer_addr,
        }
    }
}

fn tls_error(rejection: TrustRejection) -> rustls::Error {
    match rejection {
        TrustRejection::EmptyChain => rustls::Error::NoCertificatesPresented,
        TrustRejection::ExpiredCertificate => CertificateError::Expired.into(),
        TrustRejection::NotYetValid => CertificateError::NotValidYet.into(),
        TrustRejection::Unparsable => CertificateError::BadEncoding.into(),
        TrustRejection::PinMismatch => CertificateError::ApplicationVerificationFailure.into(),
    }
}

impl ServerCertVerifier for TofuVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        self.verify_chain(end_entity, intermediates, now)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl ClientCertVerifier for TofuVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        self.verify_chain(end_entity, intermediates, now)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        ServerCertVerifier::verify_tls12_signature(self, message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        ServerCertVerifier::verify_tls13_signature(self, message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        ServerCertVerifier::supported_verify_schemes(self)
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client session config presenting this context's identity.
pub fn client_config(ctx: &TrustContext, verifier: Arc<TofuVerifier>) -> Result<ClientConfig> {
    let (chain, key) = ctx.credentials()?;
    let config = ClientConfig::builder_with_provider(verifier.provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(BridgeError::handshake)?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(chain, key)
        .map_err(BridgeError::handshake)?;
    Ok(config)
}

/// Server session config requiring a client certificate.
pub fn server_config(ctx: &TrustContext, verifier: Arc<TofuVerifier>) -> Result<ServerConfig> {
    let (chain, key) = ctx.credentials()?;
    let config = ServerConfig::builder_with_provider(verifier.provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(BridgeError::handshake)?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .map_err(BridgeError::handshake)?;
    Ok(config)
}

fn timeout_ms(deadline: Duration) -> u64 {
    deadline.as_millis().min(u64::MAX as u128) as u64
}

fn subject_of(chain: Option<&[CertificateDer<'_>]>) -> Option<String> {
    chain.and_then(|c| c.first()).and_then(identity::subject)
}

/// Dial `host:port` and complete a mutually authenticated handshake within `deadline`.
pub async fn connect_secure(
    ctx: &TrustContext,
    host: &str,
    port: u16,
    deadline: Duration,
) -> Result<SecureChannel> {
    let verifier = Arc::new(TofuVerifier::new(
        ctx.clone(),
        ConnectionRole::Outbound,
        None,
        crypto_provider(),
    ));
    let connector = TlsConnector::from(Arc::new(client_config(ctx, verifier.clone())?));
    let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
        BridgeError::handshake(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            e.to_string(),
        ))
    })?;

    let dial = async {
        let tcp = TcpStream::connect((host, port)).await?;
        let _ = tcp.set_nodelay(true);
        let peer = tcp.peer_addr().ok();
        connector.connect(server_name, tcp).await.map(|s| (s, peer))
    };
    let (tls_stream, peer) = match timeout(deadline, dial).await {
        Err(_) => {
            return Err(match verifier.rejection() {
                Some(r) => BridgeError::handshake(r),
                None => BridgeError::handshake(HandshakeCause::Timeout(timeout_ms(deadline))),
            })
        }
        Ok(Err(e)) => return Err(verifier.failure(e)),
        Ok(Ok(pair)) => pair,
    };
    verifier.commit()?;

    let (_, session) = tls_stream.get_ref();
    let protocol = session.protocol_version().map(|v| format!("{:?}", v));
    let mut auth = verifier.summary(protocol);
    auth.peer_addr = peer;
    auth.subject = subject_of(session.peer_certificates());

    let (r, w) = tokio::io::split(tls_stream);
    Ok(SecureChannel {
        reader: Box::new(tokio::io::BufReader::new(r)),
        writer: Box::new(w),
        auth,
    })
}

/// Server side handshake over an accepted connection, bounded by `deadline`.
pub async fn accept_secure(
    ctx: &TrustContext,
    stream: TcpStream,
    peer_addr: SocketAddr,
    deadline: Duration,
) -> Result<SecureChannel> {
    let verifier = Arc::new(TofuVerifier::new(
        ctx.clone(),
        ConnectionRole::Inbound,
        Some(peer_addr),
        crypto_provider(),
    ));
    let acceptor = TlsAcceptor::from(Arc::new(server_config(ctx, verifier.clone())?));
    let _ = stream.set_nodelay(true);

    let tls_stream = match timeout(deadline, acceptor.accept(stream)).await {
        Err(_) => {
            return Err(match verifier.rejection() {
                Some(r) => BridgeError::handshake(r),
                None => BridgeError::handshake(HandshakeCause::Timeout(timeout_ms(deadline))),
            })
        }
        Ok(Err(e)) => return Err(verifier.failure(e)),
        Ok(Ok(s)) => s,
    };
    verifier.commit()?;

    let (_, session) = tls_stream.get_ref();
    let protocol = session.protocol_version().map(|v| format!("{:?}", v));
    let mut auth = verifier.summary(protocol);
    auth.subject = subject_of(session.peer_certificates());

    let (r, w) = tokio::io::split(tls_stream);
    Ok(SecureChannel {
        reader: Box::new(tokio::io::BufReader::new(r)),
        writer: Box::new(w),
        auth,
    })
}
