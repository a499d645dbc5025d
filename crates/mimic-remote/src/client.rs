//! Remote control loop.

use futures_util::{SinkExt, StreamExt};
use mimic_config::{MimicConfig, ServerConfig};
use mimic_config::schema::UserConfig;
use mimic_core::{MimicError, Result};
use mimic_runtime::ManagerHandle;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::protocol::{AuthRequest, AuthResponse, ClientMessage, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Authenticating,
    Connected,
}

/// Credentials for one connection. Recreated on every reconnect.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    pub access_token: String,
    pub client_config: Option<Value>,
}

/// How a connected session ended.
enum SessionEnd {
    Shutdown,
    Closed,
}

pub struct RemoteControl {
    server: ServerConfig,
    user: UserConfig,
    hostname: String,
    handle: ManagerHandle,
    http: reqwest::Client,
    state_tx: watch::Sender<ConnectionState>,
}

impl RemoteControl {
    pub fn new(config: &MimicConfig, handle: ManagerHandle) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.server.request_timeout_secs))
            .timeout(Duration::from_secs(config.server.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            server: config.server.clone(),
            user: config.general.user.clone(),
            hostname: config.client.resolved_hostname(),
            handle,
            http,
            state_tx,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Follow connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// POST the credentials as a form; returns the access token.
    pub async fn authenticate(&self) -> Result<RemoteSession> {
        let (Some(username), Some(password)) = (
            self.user.domain_email.as_deref(),
            self.user.domain_password.as_deref(),
        ) else {
            return Err(MimicError::Authentication(
                "no credentials configured (general.user)".into(),
            ));
        };

        let url = self.server.connect_url();
        debug!(url = %url, "authenticating");
        let resp = self
            .http
            .post(&url)
            .form(&AuthRequest {
                username,
                password,
                hostname: &self.hostname,
            })
            .send()
            .await
            .map_err(|e| MimicError::RemoteConnection(format!("{}: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MimicError::Authentication(format!(
                "server answered {}",
                status
            )));
        }

        let body: AuthResponse = resp
            .json()
            .await
            .map_err(|e| MimicError::Authentication(format!("invalid response: {}", e)))?;

        Ok(RemoteSession {
            access_token: body.access_token,
            client_config: body.client_config,
        })
    }

    /// Decode and apply one text frame. Empty frames are ignored.
    pub async fn handle_text(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        match ServerMessage::decode(text)? {
            Some(msg) => self.apply(msg).await,
            None => Ok(()),
        }
    }

    /// Carry out one server command through the manager.
    pub async fn apply(&self, msg: ServerMessage) -> Result<()> {
        match msg {
            ServerMessage::ConfigUpdate { config } => {
                info!("remote: config update");
                self.handle.merge_config(config).await
            }
            ServerMessage::UpdateBehaviourConfig {
                behaviour_id,
                config,
            } => {
                info!(behaviour = %behaviour_id, "remote: behaviour config update");
                self.handle.merge_behaviour_config(&behaviour_id, config).await
            }
            ServerMessage::RunBehaviour { behaviour_id } => {
                info!(behaviour = %behaviour_id, "remote: run behaviour");
                self.handle.run_behaviour(&behaviour_id, true).await.map(|_| ())
            }
        }
    }

    /// Current status as a wire message.
    pub async fn status_message(&self) -> Result<ClientMessage> {
        let status = self.handle.status().await?;
        Ok(ClientMessage::status_update(self.hostname.clone(), &status))
    }

    /// Connect, serve, and reconnect with backoff until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::from_secs(
            self.server.reconnect_delay_secs,
            self.server.max_reconnect_delay_secs,
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect_and_serve(&mut backoff, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) => {
                    self.set_state(ConnectionState::Disconnected);
                    break;
                }
                Ok(SessionEnd::Closed) => {
                    info!("remote: connection closed by server");
                }
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "remote: connection failed");
                }
                Err(e) => {
                    error!(error = %e, "remote: session error");
                }
            }
            self.set_state(ConnectionState::Disconnected);

            let delay = backoff.next_delay();
            info!(retry_in_secs = delay.as_secs(), "remote: reconnecting...");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("remote control stopped");
    }

    async fn connect_and_serve(
        &self,
        backoff: &mut Backoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        self.set_state(ConnectionState::Authenticating);
        let session = self.authenticate().await?;

        if let Some(config) = session.client_config {
            if let Err(e) = self.handle.merge_config(config).await {
                warn!(error = %e, "remote: initial client config rejected");
            }
        }

        let url = self.server.socket_url();
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| MimicError::RemoteConnection(format!("{}: {}", url, e)))?;
        let (mut write, mut read) = stream.split();

        // The token is the first frame of every connection.
        write
            .send(Message::Text(session.access_token.into()))
            .await
            .map_err(|e| MimicError::RemoteConnection(e.to_string()))?;

        self.set_state(ConnectionState::Connected);
        backoff.reset();
        info!(url = %url, hostname = %self.hostname, "remote: connected");

        let mut status_timer =
            tokio::time::interval(Duration::from_secs(self.server.status_interval_secs.max(1)));

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("remote: shutdown signal received");
                        let _ = write.close().await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
                _ = status_timer.tick() => {
                    let text = self.status_message().await?.to_text()?;
                    write
                        .send(Message::Text(text.into()))
                        .await
                        .map_err(|e| MimicError::RemoteConnection(e.to_string()))?;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.handle_text(text.as_str()).await {
                            warn!(error = %e, "remote: command failed");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(MimicError::RemoteConnection(e.to_string())),
                },
            }
        }
    }
}
