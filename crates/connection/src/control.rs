//! The control connection lifecycle.
//!
//! Authenticate, bind, connect, dispatch, reconnect. One instance drives
//! one domain component for the lifetime of the process.

use std::sync::{Arc, RwLock};

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tether_api::{ApiClient, ApiError, AuthRequest, AuthResponse, CommandStatusUpdate, Teamserver};
use tether_protocol::constants::{ACTION_EXECUTE, CHANNEL_COMMAND};
use tether_protocol::Envelope;

use crate::component::{Binding, ChannelComponent, ChannelSender};
use crate::config::ServiceConfig;
use crate::pumps;
use crate::registry::CallbackResult;
use crate::session::{Session, SessionError, SessionStore};
use crate::tls::{self, TlsError};

/// Errors from the control connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("no password configured")]
    MissingPassword,

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("authentication failed: {0}")]
    Auth(#[from] ApiError),

    #[error("session persistence failed: {0}")]
    Session(#[from] SessionError),

    #[error("channel handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),

    #[error("token is not a valid header value")]
    InvalidToken,

    #[error("control channel lost after {attempts} attempts")]
    ChannelLost { attempts: u32 },
}

/// Lifecycle states of a control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Authenticating,
    Connected,
    Terminated,
}

/// Owns the authentication handshake and the channel lifecycle for one
/// domain component.
pub struct ControlConnection {
    config: ServiceConfig,
    base_url: String,
    password_digest: String,
    api: Arc<dyn Teamserver>,
    sessions: SessionStore,
    state: RwLock<ConnectionState>,
}

impl ControlConnection {
    /// Creates a connection with the HTTP collaborator assembled from the
    /// configuration. Configuration failures (bad URL, missing password,
    /// broken TLS material) surface here, before any network activity.
    pub fn new(config: ServiceConfig) -> Result<Self, ConnectionError> {
        let base_url = normalize_url(&config.server_url)?;
        let http = tls::build_http_client(&config.tls)?;
        let api = Arc::new(ApiClient::with_client(
            http,
            format!("{base_url}{}", config.api_prefix),
        ));
        Self::with_api(config, api)
    }

    /// Creates a connection over a caller-supplied collaborator.
    pub fn with_api(
        config: ServiceConfig,
        api: Arc<dyn Teamserver>,
    ) -> Result<Self, ConnectionError> {
        let base_url = normalize_url(&config.server_url)?;
        let password = config
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ConnectionError::MissingPassword)?;
        // Digested once; the plaintext secret is never stored or sent.
        let password_digest = hex::encode(Sha256::digest(password.as_bytes()));
        let sessions = SessionStore::new(config.data_dir.clone());

        Ok(Self {
            config,
            base_url,
            password_digest,
            api,
            sessions,
            state: RwLock::new(ConnectionState::Unauthenticated),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap() = state;
    }

    /// Performs the authentication handshake for a component and binds
    /// the resulting identity into it.
    ///
    /// A prior session for the component's endpoint is presented as a
    /// continuation hint; the teamserver may issue a fresh session
    /// regardless. The returned session replaces the stored one
    /// wholesale.
    pub async fn authenticate(
        &self,
        component: &dyn ChannelComponent,
    ) -> Result<AuthResponse, ConnectionError> {
        self.set_state(ConnectionState::Authenticating);
        let endpoint = component.endpoint();
        info!(url = %self.base_url, endpoint, "authenticating");

        let prior = self
            .sessions
            .load(endpoint)
            .map(|s| s.uuid)
            .unwrap_or_default();

        let request = AuthRequest {
            endpoint: endpoint.to_string(),
            username: String::new(),
            password: self.password_digest.clone(),
            data: component.descriptor(),
            uuid: prior,
        };
        let response = self.api.authenticate(&request).await?;

        self.sessions.save(&Session {
            token: response.token.clone(),
            uuid: response.uuid.clone(),
            endpoint: endpoint.to_string(),
        })?;
        self.api.set_token(&response.token);
        component.bind(Binding {
            id: response.id,
            session: response.uuid.clone(),
            api: Arc::clone(&self.api),
        });

        debug!(id = response.id, "authenticated");
        Ok(response)
    }

    /// Authenticates and drives the channel until the retry budget is
    /// exhausted.
    ///
    /// An initial authentication failure aborts the run. After that,
    /// transport loss re-authenticates (tokens may have expired) and
    /// reconnects with exponential backoff; only consecutive failures
    /// beyond `retry.max_attempts` are fatal.
    pub async fn run(&self, component: Arc<dyn ChannelComponent>) -> Result<(), ConnectionError> {
        let mut auth = match self.authenticate(component.as_ref()).await {
            Ok(auth) => auth,
            Err(e) => {
                error!(error = %e, "authentication failed, aborting");
                self.set_state(ConnectionState::Terminated);
                return Err(e);
            }
        };

        let mut attempt: u32 = 0;
        loop {
            match self.drive_channel(component.as_ref(), &auth.token).await {
                Ok(()) => {
                    // Was connected, then lost — start a fresh budget.
                    attempt = 0;
                }
                Err(e) => {
                    warn!(error = %e, "channel attempt failed");
                }
            }

            attempt += 1;
            if attempt > self.config.retry.max_attempts {
                error!(
                    attempts = self.config.retry.max_attempts,
                    "control channel lost, giving up"
                );
                self.set_state(ConnectionState::Terminated);
                return Err(ConnectionError::ChannelLost {
                    attempts: self.config.retry.max_attempts,
                });
            }

            let delay = self.config.retry.delay_for_attempt(attempt);
            info!(
                attempt,
                delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
                "reconnecting"
            );
            tokio::time::sleep(delay).await;

            match self.authenticate(component.as_ref()).await {
                Ok(fresh) => auth = fresh,
                Err(e) => warn!(error = %e, "re-authentication failed"),
            }
        }
    }

    /// Opens the channel and runs the receive loop until it ends.
    ///
    /// `Ok(())` means the channel was established and later lost (or
    /// closed by the server); `Err` means it never came up.
    async fn drive_channel(
        &self,
        component: &dyn ChannelComponent,
        token: &str,
    ) -> Result<(), ConnectionError> {
        let url = ws_url(&self.base_url, &self.config.ws_prefix, component.endpoint());
        info!(%url, "opening control channel");

        let mut request = url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ConnectionError::InvalidToken)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.websocket.max_size);
        ws_config.max_frame_size = Some(self.config.websocket.max_size);

        let connector = tls::build_ws_connector(&self.config.tls)?;
        let (stream, _) = tokio_tungstenite::connect_async_tls_with_config(
            request,
            Some(ws_config),
            false,
            connector,
        )
        .await?;

        self.set_state(ConnectionState::Connected);
        info!("control channel established");

        let (write, read) = stream.split();
        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(pumps::write_pump(write, write_rx, cancel.clone()));
        let ping_handle = tokio::spawn(pumps::ping_pump(
            write_tx.clone(),
            self.config.websocket.ping_interval(),
            cancel.clone(),
        ));

        component.attach_channel(ChannelSender::new(write_tx.clone()));

        self.receive_loop(component, read, write_tx).await;

        // Give the pumps one close-handshake window, then let go.
        cancel.cancel();
        let _ = tokio::time::timeout(self.config.websocket.close_timeout(), async {
            let _ = write_handle.await;
            let _ = ping_handle.await;
        })
        .await;
        Ok(())
    }

    /// Reads frames until the channel dies, dispatching each one before
    /// touching the next — receipt order, no concurrent dispatch.
    async fn receive_loop<S>(
        &self,
        component: &dyn ChannelComponent,
        mut read: S,
        write_tx: mpsc::Sender<tungstenite::Message>,
    ) where
        S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    {
        // Any inbound traffic resets the deadline; a silent peer past one
        // ping period plus the pong grace counts as dead.
        let idle = self.config.websocket.idle_deadline();
        let deadline = tokio::time::sleep(idle);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline => {
                    warn!("channel idle timeout, assuming dead peer");
                    return;
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(msg)) => {
                            deadline.as_mut().reset(tokio::time::Instant::now() + idle);
                            match msg {
                                tungstenite::Message::Text(text) => {
                                    self.process_frame(text.as_str(), component).await;
                                }
                                tungstenite::Message::Ping(data) => {
                                    let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                                }
                                tungstenite::Message::Pong(_) => {}
                                tungstenite::Message::Close(frame) => {
                                    warn!(?frame, "server closed the channel");
                                    return;
                                }
                                _ => {} // Binary — not part of this protocol.
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "channel transport error");
                            return;
                        }
                        None => {
                            warn!("channel stream ended");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Parses and dispatches one inbound frame.
    ///
    /// Malformed frames are logged and dropped. A (command, execute)
    /// dispatch additionally reports its outcome to the teamserver.
    async fn process_frame(&self, text: &str, component: &dyn ChannelComponent) {
        if text.len() > self.config.websocket.max_size {
            warn!(len = text.len(), "frame too large, dropping");
            return;
        }

        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "invalid server data");
                return;
            }
        };

        let channel = envelope.channel.clone();
        let action = envelope.action.clone();
        let command_id = envelope.data_str("uuid").map(str::to_owned);

        let Some(outcome) = component.registry().dispatch(envelope).await else {
            return;
        };

        if channel == CHANNEL_COMMAND && action == ACTION_EXECUTE {
            self.report_command_status(command_id, outcome).await;
        }
    }

    /// Status report side effect of a (command, execute) dispatch.
    async fn report_command_status(&self, command_id: Option<String>, outcome: CallbackResult) {
        let Some(command_id) = command_id else {
            debug!("command without uuid, skipping status report");
            return;
        };

        let update = match &outcome {
            Ok(output) => CommandStatusUpdate::completed(command_id, output.clone()),
            Err(e) => CommandStatusUpdate::failed(command_id, e.to_string()),
        };

        if let Err(e) = self.api.update_command_status(&update).await {
            error!(error = %e, "failed to report command status");
        }
    }
}

/// Validates the configured base URL and strips any trailing slash.
fn normalize_url(url: &str) -> Result<String, ConnectionError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConnectionError::InvalidUrl(url.to_string()));
    }
    Ok(url.trim_end_matches('/').to_string())
}

/// Derives the channel URL for an endpoint from the REST base URL.
fn ws_url(base_url: &str, ws_prefix: &str, endpoint: &str) -> String {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    };
    format!("{ws_base}{ws_prefix}/{endpoint}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::registry::{CallbackError, CallbackRegistry};

    struct MockApi {
        auth_requests: Mutex<Vec<AuthRequest>>,
        status_updates: Mutex<Vec<CommandStatusUpdate>>,
    }

    impl MockApi {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                auth_requests: Mutex::new(Vec::new()),
                status_updates: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Teamserver for MockApi {
        async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResponse, ApiError> {
            self.auth_requests.lock().unwrap().push(request.clone());
            Ok(AuthResponse {
                token: "t1".into(),
                uuid: "u1".into(),
                id: 7,
            })
        }

        fn set_token(&self, _token: &str) {}

        async fn register_agent(
            &self,
            _identity: &tether_api::AgentIdentity,
        ) -> Result<serde_json::Value, ApiError> {
            Ok(json!({}))
        }

        async fn transmit(&self, _magick: &str, _payload: &str) -> Result<String, ApiError> {
            Ok(String::new())
        }

        async fn update_command_status(
            &self,
            update: &CommandStatusUpdate,
        ) -> Result<(), ApiError> {
            self.status_updates.lock().unwrap().push(update.clone());
            Ok(())
        }
    }

    struct StubComponent {
        registry: CallbackRegistry,
    }

    impl StubComponent {
        fn new() -> Self {
            Self {
                registry: CallbackRegistry::new(),
            }
        }

        fn with_execute_callback(fail: bool) -> Self {
            let mut registry = CallbackRegistry::new();
            registry.register(
                "command",
                "execute",
                Box::new(move |_env| -> crate::registry::CallbackFuture {
                    Box::pin(async move {
                        if fail {
                            Err(CallbackError::Handler("spawn refused".into()))
                        } else {
                            Ok("done".to_string())
                        }
                    })
                }),
            );
            Self { registry }
        }
    }

    impl ChannelComponent for StubComponent {
        fn endpoint(&self) -> &str {
            "shaco"
        }

        fn descriptor(&self) -> serde_json::Value {
            json!({"name": "stub"})
        }

        fn bind(&self, _binding: Binding) {}

        fn attach_channel(&self, _channel: ChannelSender) {}

        fn registry(&self) -> &CallbackRegistry {
            &self.registry
        }
    }

    fn test_config(dir: &std::path::Path) -> ServiceConfig {
        ServiceConfig {
            data_dir: dir.to_path_buf(),
            password: Some("x".into()),
            ..ServiceConfig::default()
        }
    }

    fn connection(api: Arc<MockApi>) -> (tempfile::TempDir, ControlConnection) {
        let tmp = tempfile::tempdir().unwrap();
        let conn = ControlConnection::with_api(test_config(tmp.path()), api).unwrap();
        (tmp, conn)
    }

    #[test]
    fn url_without_scheme_is_rejected() {
        let config = ServiceConfig {
            server_url: "localhost:3000".into(),
            password: Some("x".into()),
            ..ServiceConfig::default()
        };
        assert!(matches!(
            ControlConnection::with_api(config, MockApi::new()),
            Err(ConnectionError::InvalidUrl(_))
        ));
    }

    #[test]
    fn missing_password_is_rejected() {
        let config = ServiceConfig::default();
        assert!(matches!(
            ControlConnection::with_api(config, MockApi::new()),
            Err(ConnectionError::MissingPassword)
        ));

        let config = ServiceConfig {
            password: Some(String::new()),
            ..ServiceConfig::default()
        };
        assert!(matches!(
            ControlConnection::with_api(config, MockApi::new()),
            Err(ConnectionError::MissingPassword)
        ));
    }

    #[test]
    fn trailing_slash_is_stripped() {
        assert_eq!(
            normalize_url("http://localhost:3000/").unwrap(),
            "http://localhost:3000"
        );
    }

    #[test]
    fn password_is_digested_once() {
        let (_tmp, conn) = connection(MockApi::new());
        assert_eq!(
            conn.password_digest,
            "2d711642b726b04401627ca9fbac32f5c8530fb1903cc4db02258717921a4881"
        );
    }

    #[test]
    fn ws_url_derivation() {
        assert_eq!(
            ws_url("http://localhost:3000", "/ws", "handler"),
            "ws://localhost:3000/ws/handler"
        );
        assert_eq!(
            ws_url("https://ts.example:8443", "/ws", "listener"),
            "wss://ts.example:8443/ws/listener"
        );
    }

    #[tokio::test]
    async fn authenticate_persists_session_and_presents_hint() {
        let api = MockApi::new();
        let (_tmp, conn) = connection(api.clone());
        let component = StubComponent::new();

        let auth = conn.authenticate(&component).await.unwrap();
        assert_eq!(auth.token, "t1");
        assert_eq!(auth.id, 7);

        let stored = conn.sessions.load("shaco").unwrap();
        assert_eq!(stored.token, "t1");
        assert_eq!(stored.uuid, "u1");

        // First run had no session to present.
        assert_eq!(api.auth_requests.lock().unwrap()[0].uuid, "");

        // Second run presents the persisted uuid as a continuation hint.
        conn.authenticate(&component).await.unwrap();
        assert_eq!(api.auth_requests.lock().unwrap()[1].uuid, "u1");
    }

    #[tokio::test]
    async fn invalid_frame_is_dropped_without_side_effects() {
        let api = MockApi::new();
        let (_tmp, conn) = connection(api.clone());
        let component = StubComponent::with_execute_callback(false);

        conn.process_frame("not json {{{", &component).await;
        conn.process_frame(r#"{"action":"execute","data":{}}"#, &component)
            .await;

        assert!(api.status_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn execute_success_reports_completed_status() {
        let api = MockApi::new();
        let (_tmp, conn) = connection(api.clone());
        let component = StubComponent::with_execute_callback(false);

        let frame = json!({
            "type": "command",
            "action": "execute",
            "data": {"uuid": "job-1", "command": "whoami", "args": []}
        });
        conn.process_frame(&frame.to_string(), &component).await;

        let updates = api.status_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].callback_id, "job-1");
        assert_eq!(updates[0].status, tether_api::CommandStatus::Completed);
        assert_eq!(updates[0].output.as_deref(), Some("done"));
        assert_eq!(updates[0].exit_code, 0);
    }

    #[tokio::test]
    async fn execute_failure_reports_failed_status() {
        let api = MockApi::new();
        let (_tmp, conn) = connection(api.clone());
        let component = StubComponent::with_execute_callback(true);

        let frame = json!({
            "type": "command",
            "action": "execute",
            "data": {"uuid": "job-2", "command": "whoami"}
        });
        conn.process_frame(&frame.to_string(), &component).await;

        let updates = api.status_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, tether_api::CommandStatus::Failed);
        assert_eq!(updates[0].error.as_deref(), Some("spawn refused"));
        assert_eq!(updates[0].exit_code, 1);
    }

    #[tokio::test]
    async fn unregistered_frame_reports_nothing() {
        let api = MockApi::new();
        let (_tmp, conn) = connection(api.clone());
        let component = StubComponent::new();

        let frame = json!({
            "type": "command",
            "action": "execute",
            "data": {"uuid": "job-3"}
        });
        conn.process_frame(&frame.to_string(), &component).await;

        assert!(api.status_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_transitions_through_authentication() {
        let (_tmp, conn) = connection(MockApi::new());
        assert_eq!(conn.state(), ConnectionState::Unauthenticated);

        let component = StubComponent::new();
        conn.authenticate(&component).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Authenticating);
    }
}
