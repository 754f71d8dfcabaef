// src/session.rs
//! One authenticated Spark chat turn over a WebSocket.
//!
//! [`SessionMachine`] holds the state, the accumulated reply and the
//! caller's callbacks, and knows nothing about sockets. [`ChatSession`]
//! wraps it with the signer, the normalizer and a tokio-tungstenite
//! connection, plus an idle timeout and a cancellation token.

use std::sync::Once;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, SparkError};
use crate::normalizer::normalize;
use crate::protocol::{ServerEvent, Usage, build_request, decode_frame};
use crate::signer::{redacted, sign_url};
use crate::types::{ChatMessage, ChatParameters, SessionCredentials};

/// Idle time allowed between frames before the session gives up
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on the closing handshake
const CLOSE_GRACE: Duration = Duration::from_secs(5);

pub type ChunkCallback = Box<dyn FnMut(&str) + Send>;
pub type FinishCallback = Box<dyn FnOnce(&str) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Connecting,
    Streaming,
    Closed,
    Errored,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }
}

/// What the transport should do after a frame was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Close,
}

/// Transport-independent session core
pub struct SessionMachine {
    state: SessionState,
    result: String,
    usage: Option<Usage>,
    sid: Option<String>,
    error: Option<SparkError>,
    request: Option<String>,
    on_chunk: Option<ChunkCallback>,
    on_finish: Option<FinishCallback>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Init,
            result: String::new(),
            usage: None,
            sid: None,
            error: None,
            request: None,
            on_chunk: None,
            on_finish: None,
        }
    }

    pub fn set_on_chunk(&mut self, cb: ChunkCallback) {
        self.on_chunk = Some(cb);
    }

    pub fn set_on_finish(&mut self, cb: FinishCallback) {
        self.on_finish = Some(cb);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn result(&self) -> &str {
        &self.result
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    pub fn error(&self) -> Option<&SparkError> {
        self.error.as_ref()
    }

    /// `Init -> Connecting`, holding the request body until the socket opens
    pub fn begin(&mut self, request: String) -> Result<()> {
        if self.state != SessionState::Init {
            return Err(SparkError::Validation(format!(
                "session cannot start from {:?}",
                self.state
            )));
        }
        self.request = Some(request);
        self.state = SessionState::Connecting;
        Ok(())
    }

    /// `Connecting -> Streaming`. Returns the one frame to send.
    pub fn on_open(&mut self) -> Result<String> {
        if self.state != SessionState::Connecting {
            return Err(SparkError::Transport(format!(
                "open reported in state {:?}",
                self.state
            )));
        }
        let request = self
            .request
            .take()
            .ok_or_else(|| SparkError::Transport("request already sent".into()))?;
        self.state = SessionState::Streaming;
        Ok(request)
    }

    pub fn on_message(&mut self, raw: &str) -> Step {
        if self.state != SessionState::Streaming {
            debug!("Ignoring frame received in state {:?}", self.state);
            return if self.state.is_terminal() {
                Step::Close
            } else {
                Step::Continue
            };
        }

        let event = match decode_frame(raw) {
            Ok(event) => event,
            Err(e) => {
                error!("Dropping session on undecodable frame: {}", e);
                self.fail(e);
                return Step::Close;
            }
        };

        match event {
            ServerEvent::Chunk {
                text,
                is_final,
                seq,
                sid,
                usage,
            } => {
                if sid.is_some() {
                    self.sid = sid;
                }
                if usage.is_some() {
                    self.usage = usage;
                }
                debug!("Chunk seq={:?} len={} final={}", seq, text.len(), is_final);

                self.result.push_str(&text);
                if let Some(cb) = self.on_chunk.as_mut() {
                    cb(&text);
                }

                if is_final {
                    self.state = SessionState::Closed;
                    Step::Close
                } else {
                    Step::Continue
                }
            }
            ServerEvent::Error { code, message, sid } => {
                error!("Server returned error {} (sid={:?}): {}", code, sid, message);
                if sid.is_some() {
                    self.sid = sid.clone();
                }
                self.fail(SparkError::Protocol { code, message, sid });
                Step::Close
            }
        }
    }

    pub fn on_transport_error(&mut self, err: SparkError) {
        error!("Transport failure: {}", err);
        self.fail(err);
    }

    /// Move to `Errored` unless already terminal. The first error wins.
    pub fn fail(&mut self, err: SparkError) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Errored;
        self.request = None;
        self.error = Some(err);
    }

    /// Caller-initiated close. Ends in `Closed` with the partial reply kept
    /// and `SparkError::Cancelled` recorded so it differs from a clean finish.
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Closed;
        self.request = None;
        self.error = Some(SparkError::Cancelled);
    }

    /// Transport closed. Fires the completion callback, once.
    pub fn on_close(&mut self) {
        match self.state {
            SessionState::Errored | SessionState::Closed => {}
            SessionState::Streaming => {
                warn!("Socket closed before the final frame");
                self.state = SessionState::Closed;
            }
            SessionState::Init | SessionState::Connecting => {
                self.state = SessionState::Closed;
            }
        }

        if let Some(cb) = self.on_finish.take() {
            cb(&self.result);
        }
    }

    fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            text: self.result.clone(),
            state: self.state,
            usage: self.usage,
            sid: self.sid.clone(),
            error: self.error.clone(),
        }
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Final view of a finished session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub text: String,
    pub state: SessionState,
    pub usage: Option<Usage>,
    pub sid: Option<String>,
    pub error: Option<SparkError>,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.state == SessionState::Closed
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(SparkError::Cancelled))
    }

    /// Full reply on success, the session error otherwise
    pub fn into_result(self) -> Result<String> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.text),
        }
    }
}

/// Generates a random user id for the request header
pub fn generate_uid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A single-use chat session bound to one set of credentials
pub struct ChatSession {
    credentials: SessionCredentials,
    uid: String,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    machine: SessionMachine,
}

impl ChatSession {
    pub fn new(credentials: SessionCredentials) -> Self {
        Self {
            credentials,
            uid: generate_uid(),
            timeout: Some(DEFAULT_TIMEOUT),
            cancel: CancellationToken::new(),
            machine: SessionMachine::new(),
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    /// Idle timeout between frames; `None` waits forever
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn on_chunk(mut self, cb: impl FnMut(&str) + Send + 'static) -> Self {
        self.machine.set_on_chunk(Box::new(cb));
        self
    }

    pub fn on_finish(mut self, cb: impl FnOnce(&str) + Send + 'static) -> Self {
        self.machine.set_on_finish(Box::new(cb));
        self
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn result(&self) -> &str {
        self.machine.result()
    }

    pub fn usage(&self) -> Option<Usage> {
        self.machine.usage()
    }

    pub fn sid(&self) -> Option<&str> {
        self.machine.sid()
    }

    pub fn error(&self) -> Option<&SparkError> {
        self.machine.error()
    }

    /// Start the session on a background task and return right away.
    /// Results arrive through the callbacks and the handle.
    pub fn connect(
        self,
        conversation: Vec<ChatMessage>,
        url: impl Into<String>,
        params: ChatParameters,
    ) -> SessionHandle {
        let cancel = self.cancel.clone();
        let url = url.into();
        let mut session = self;
        let join = tokio::spawn(async move { session.run(&conversation, &url, &params).await });
        SessionHandle { cancel, join }
    }

    /// Drive the whole lifecycle to a terminal state
    pub async fn run(
        &mut self,
        conversation: &[ChatMessage],
        url: &str,
        params: &ChatParameters,
    ) -> SessionOutcome {
        if self.machine.state() != SessionState::Init {
            return SessionOutcome {
                error: Some(SparkError::Validation(
                    "session already used; create a new one".into(),
                )),
                ..self.machine.outcome()
            };
        }

        let request = match self.prepare(conversation, url, params) {
            Ok(request) => request,
            Err(e) => return self.abort(e),
        };
        if let Err(e) = self.machine.begin(request) {
            return self.abort(e);
        }

        let signed = match sign_url(&self.credentials.api_key, &self.credentials.api_secret, url) {
            Ok(signed) => signed,
            Err(e) => return self.abort(e),
        };
        debug!("Connecting to {}", redacted(&signed));

        let ws = match open_socket(&signed, self.timeout, &self.cancel).await {
            Ok(ws) => ws,
            Err(e) => return self.abort(e),
        };

        self.drive(ws).await;

        let outcome = self.machine.outcome();
        match &outcome.error {
            None => info!(
                "Session finished: {} chars, sid={:?}",
                outcome.text.len(),
                outcome.sid
            ),
            Some(SparkError::Cancelled) => {
                info!("Session cancelled, {} chars kept", outcome.text.len())
            }
            Some(e) => warn!("Session ended with error: {}", e),
        }
        outcome
    }

    /// Normalize the conversation and encode the request body
    fn prepare(
        &self,
        conversation: &[ChatMessage],
        url: &str,
        params: &ChatParameters,
    ) -> Result<String> {
        let parsed = Url::parse(url)?;
        let domain = params.resolve_domain(&parsed);
        let messages = normalize(conversation, domain.supports_system())?;
        debug!(
            "Prepared {} of {} messages for domain {}",
            messages.len(),
            conversation.len(),
            domain
        );

        let request = build_request(&self.credentials.app_id, &self.uid, &domain, params, messages);
        serde_json::to_string(&request)
            .map_err(|e| SparkError::Validation(format!("cannot encode request: {}", e)))
    }

    /// Send the request, pump frames until a terminal state, then close
    async fn drive<S>(&mut self, mut ws: S)
    where
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin,
    {
        let mut socket_open = true;

        match self.machine.on_open() {
            Ok(body) => {
                debug!("Sending request ({} bytes)", body.len());
                if let Err(e) = ws.send(Message::Text(body.into())).await {
                    self.machine.on_transport_error(e.into());
                }
            }
            Err(e) => self.machine.fail(e),
        }

        while !self.machine.state().is_terminal() {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Session cancelled by caller");
                    self.machine.cancel();
                    break;
                }
                next = next_frame(&mut ws, self.timeout) => next,
            };

            match next {
                Err(e) => {
                    self.machine.fail(e);
                    break;
                }
                Ok(None) => {
                    debug!("Socket stream ended");
                    socket_open = false;
                    break;
                }
                Ok(Some(Err(e))) => {
                    self.machine.on_transport_error(e.into());
                    socket_open = false;
                    break;
                }
                Ok(Some(Ok(msg))) => match msg {
                    Message::Text(text) => {
                        if self.machine.on_message(text.as_str()) == Step::Close {
                            break;
                        }
                    }
                    Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            if self.machine.on_message(text) == Step::Close {
                                break;
                            }
                        }
                        Err(_) => {
                            self.machine.fail(SparkError::MalformedFrame(
                                "binary frame is not UTF-8".into(),
                            ));
                            break;
                        }
                    },
                    Message::Close(frame) => {
                        debug!("Server closed the socket: {:?}", frame);
                        socket_open = false;
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                },
            }
        }

        if socket_open {
            match tokio::time::timeout(CLOSE_GRACE, ws.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Close handshake failed: {}", e),
                Err(_) => warn!("Close handshake did not finish within {:?}", CLOSE_GRACE),
            }
        }

        self.machine.on_close();
    }

    /// Terminal failure before a socket exists
    fn abort(&mut self, err: SparkError) -> SessionOutcome {
        match err {
            SparkError::Cancelled => {
                info!("Session cancelled before streaming");
                self.machine.cancel();
            }
            err => {
                warn!("Session aborted before streaming: {}", err);
                self.machine.fail(err);
            }
        }
        self.machine.on_close();
        self.machine.outcome()
    }
}

/// Handle to a session started with [`ChatSession::connect`]
pub struct SessionHandle {
    cancel: CancellationToken,
    join: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    /// Close the socket early; completion still fires with the partial reply
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> Result<SessionOutcome> {
        self.join
            .await
            .map_err(|e| SparkError::Transport(format!("session task failed: {}", e)))
    }
}

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn open_socket(
    url: &Url,
    limit: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<Socket> {
    install_crypto_provider();

    let connect = tokio_tungstenite::connect_async(url.as_str());
    let attempt = async {
        let connected = match limit {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(connected) => connected,
                Err(_) => return Err(SparkError::Timeout(limit)),
            },
            None => connect.await,
        };
        connected.map(|(ws, _resp)| ws).map_err(SparkError::from)
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(SparkError::Cancelled),
        result = attempt => result,
    }
}

async fn next_frame<S>(
    ws: &mut S,
    limit: Option<Duration>,
) -> Result<Option<std::result::Result<Message, WsError>>>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, ws.next())
            .await
            .map_err(|_| SparkError::Timeout(limit)),
        None => Ok(ws.next().await),
    }
}

fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means another provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
