#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures_util::{SinkExt, StreamExt};
    use mimic_config::{ConfigStore, MimicConfig, SchedulerConfig};
    use mimic_core::{BehaviourCategory, MimicError, Os, Result};
    use mimic_remote::{ConnectionState, RemoteControl};
    use mimic_runtime::{
        Behaviour, BehaviourCatalog, BehaviourContext, BehaviourManager, ManagerActor,
        ManagerHandle,
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::Message;

    struct Hang(&'static str);

    #[async_trait]
    impl Behaviour for Hang {
        fn id(&self) -> &str {
            self.0
        }

        fn display_name(&self) -> &str {
            "Hang around"
        }

        fn category(&self) -> BehaviourCategory {
            BehaviourCategory::Attack
        }

        async fn run(&self, _ctx: BehaviourContext) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn spawn_manager() -> (ManagerHandle, JoinHandle<()>) {
        let catalog = BehaviourCatalog::build_with(vec![Arc::new(Hang("X"))], |req| {
            req.check_with(Os::Linux, |_| true)
        });
        let store = ConfigStore::in_memory(json!({"scheduler": {"idle_cycle": "paused"}})).unwrap();
        let manager = BehaviourManager::new(catalog, store).unwrap();
        let (actor, handle) = ManagerActor::new(manager, &SchedulerConfig::default());
        (handle, tokio::spawn(actor.run()))
    }

    fn config(http: &str, ws: &str) -> MimicConfig {
        let mut config = MimicConfig::default();
        config.client.hostname = Some("desk-42".into());
        config.server.enabled = true;
        config.server.http_url = http.into();
        config.server.websocket_url = ws.into();
        config.server.status_interval_secs = 1;
        config.server.reconnect_delay_secs = 1;
        config.server.max_reconnect_delay_secs = 2;
        config.general.user.domain_email = Some("ops@corp.local".into());
        config.general.user.domain_password = Some("hunter2".into());
        config
    }

    /// Answer exactly one HTTP request with `status` and `body`; yields the raw request.
    async fn fake_auth_server(status: u16, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            answer_http(stream, status, &body).await
        });
        (format!("http://{}", addr), task)
    }

    /// Like `fake_auth_server`, but answers every request until aborted.
    async fn repeating_auth_server(body: String) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                answer_http(stream, 200, &body).await;
            }
        });
        (format!("http://{}", addr), task)
    }

    async fn answer_http(mut stream: TcpStream, status: u16, body: &str) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Accept one WebSocket connection and return it with the token it sent first.
    async fn accept_session(
        listener: &TcpListener,
    ) -> (tokio_tungstenite::WebSocketStream<TcpStream>, String) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let token = match ws.next().await {
            Some(Ok(Message::Text(t))) => t.as_str().to_string(),
            other => panic!("expected token, got {other:?}"),
        };
        (ws, token)
    }

    async fn behaviour_setting(handle: &ManagerHandle, id: &str, key: &str) -> Value {
        handle
            .config()
            .await
            .ok()
            .and_then(|c| c.behaviours.get(id).and_then(|b| b.get(key)).cloned())
            .unwrap_or(Value::Null)
    }

    // ── Command handling ───────────────────────────────────────

    #[tokio::test]
    async fn test_handle_text_dispatches_commands() {
        let (handle, actor) = spawn_manager();
        let remote = RemoteControl::new(&config("http://127.0.0.1:1", "ws://127.0.0.1:1"), handle.clone());

        remote
            .handle_text(r#"{"action":"update_behaviour_config","behaviour_id":"X","config":{"level":2}}"#)
            .await
            .unwrap();
        assert_eq!(handle.config().await.unwrap().behaviours["X"]["level"], 2);

        remote
            .handle_text(r#"{"action":"run_behaviour","behaviour_id":"X"}"#)
            .await
            .unwrap();
        assert_eq!(handle.status().await.unwrap().current_behaviour.unwrap().id, "X");

        // Already running: forced replacement, not Busy.
        remote
            .handle_text(r#"{"action":"run_behaviour","behaviour_id":"X"}"#)
            .await
            .unwrap();
        assert_eq!(handle.status().await.unwrap().runs_started, 2);

        remote.handle_text("").await.unwrap();
        remote.handle_text(r#"{"action":"self_destruct"}"#).await.unwrap();
        assert!(matches!(
            remote.handle_text("{oops").await,
            Err(MimicError::MessageDecode(_))
        ));
        assert!(matches!(
            remote
                .handle_text(r#"{"action":"run_behaviour","behaviour_id":"nope"}"#)
                .await,
            Err(MimicError::UnavailableBehaviour(_))
        ));
        assert!(
            remote
                .handle_text(r#"{"action":"config_update","config":[1]}"#)
                .await
                .is_err()
        );

        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }

    #[tokio::test]
    async fn test_status_message_reports_hostname() {
        let (handle, actor) = spawn_manager();
        let remote = RemoteControl::new(&config("http://127.0.0.1:1", "ws://127.0.0.1:1"), handle.clone());
        let text = remote.status_message().await.unwrap().to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["hostname"], "desk-42");
        assert_eq!(value["idle_cycle_status"], "paused");
        assert!(value["current_behaviour"].is_null());

        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }

    // ── Authentication ─────────────────────────────────────────

    #[tokio::test]
    async fn test_authenticate_without_credentials() {
        let (handle, actor) = spawn_manager();
        let mut cfg = config("http://127.0.0.1:1", "ws://127.0.0.1:1");
        cfg.general.user.domain_password = None;
        let remote = RemoteControl::new(&cfg, handle.clone());
        assert!(matches!(
            remote.authenticate().await,
            Err(MimicError::Authentication(_))
        ));
        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let (handle, actor) = spawn_manager();
        let (http, server) = fake_auth_server(401, r#"{"detail":"bad credentials"}"#.into()).await;
        let remote = RemoteControl::new(&config(&http, "ws://127.0.0.1:1"), handle.clone());

        let err = remote.authenticate().await.unwrap_err();
        assert!(matches!(err, MimicError::Authentication(_)));
        assert!(err.is_retryable());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /client/connect"));
        assert!(request.contains("username=ops%40corp.local"));
        assert!(request.contains("hostname=desk-42"));

        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }

    // ── Full session ───────────────────────────────────────────

    #[tokio::test]
    async fn test_session_end_to_end() {
        let (handle, actor) = spawn_manager();
        let (http, auth) = fake_auth_server(
            200,
            json!({"access_token": "tok-123", "client_config": {"behaviours": {"X": {"tag": "from-auth"}}}})
                .to_string(),
        )
        .await;

        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = ws_listener.local_addr().unwrap();
        let ws_server = tokio::spawn(async move {
            let (stream, _) = ws_listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let token = match ws.next().await {
                Some(Ok(Message::Text(t))) => t.as_str().to_string(),
                other => panic!("expected token, got {other:?}"),
            };

            ws.send(Message::Text(
                r#"{"action":"run_behaviour","behaviour_id":"X"}"#.into(),
            ))
            .await
            .unwrap();

            let mut status_with_x = None;
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let value: Value = serde_json::from_str(text.as_str()).unwrap();
                    if value["current_behaviour"]["id"] == "X" {
                        status_with_x = Some(value);
                        break;
                    }
                }
            }

            ws.send(Message::Text(
                r#"{"action":"update_behaviour_config","behaviour_id":"X","config":{"level":3}}"#.into(),
            ))
            .await
            .unwrap();
            let _ = ws.close(None).await;
            (token, status_with_x)
        });

        let remote = RemoteControl::new(&config(&http, &format!("ws://{}", ws_addr)), handle.clone());
        let mut state = remote.state();
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let client = tokio::spawn(remote.run(shutdown_rx));

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();

        let (token, status) = tokio::time::timeout(Duration::from_secs(10), ws_server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token, "tok-123");
        let status = status.expect("status update with X");
        assert_eq!(status["type"], "status_update");
        assert_eq!(status["hostname"], "desk-42");
        assert_eq!(status["current_behaviour"]["category"], "Attack");

        let auth_request = auth.await.unwrap();
        assert!(auth_request.contains("password=hunter2"));

        for _ in 0..100 {
            if behaviour_setting(&handle, "X", "level").await == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(behaviour_setting(&handle, "X", "level").await, 3);
        assert_eq!(behaviour_setting(&handle, "X", "tag").await, "from-auth");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), client)
            .await
            .unwrap()
            .unwrap();

        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_survives_bad_frame_and_reconnects() {
        let (handle, actor) = spawn_manager();
        let (http, auth) = repeating_auth_server(json!({"access_token": "tok-9"}).to_string()).await;

        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = ws_listener.local_addr().unwrap();
        let ws_server = tokio::spawn(async move {
            let (mut ws, first_token) = accept_session(&ws_listener).await;
            ws.send(Message::Text("not json".into())).await.unwrap();
            ws.send(Message::Text(
                r#"{"action":"update_behaviour_config","behaviour_id":"X","config":{"after_bad_frame":true}}"#.into(),
            ))
            .await
            .unwrap();

            // The first status goes out on connect; the second one comes a
            // full interval after the bad frame, so the session outlived it.
            let mut statuses = 0;
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let value: Value = serde_json::from_str(text.as_str()).unwrap();
                    if value["type"] == "status_update" {
                        statuses += 1;
                        if statuses == 2 {
                            break;
                        }
                    }
                }
            }
            let still_up = statuses == 2;
            let _ = ws.close(None).await;
            drop(ws);

            let (mut ws, second_token) = accept_session(&ws_listener).await;
            ws.send(Message::Text(
                r#"{"action":"update_behaviour_config","behaviour_id":"X","config":{"level":8}}"#.into(),
            ))
            .await
            .unwrap();
            // Keep the second session open until the client hangs up.
            while let Some(Ok(_)) = ws.next().await {}
            (first_token, second_token, still_up)
        });

        let remote = RemoteControl::new(&config(&http, &format!("ws://{}", ws_addr)), handle.clone());
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let client = tokio::spawn(remote.run(shutdown_rx));

        for _ in 0..200 {
            if behaviour_setting(&handle, "X", "level").await == 8 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(behaviour_setting(&handle, "X", "level").await, 8);
        assert_eq!(behaviour_setting(&handle, "X", "after_bad_frame").await, true);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), client)
            .await
            .unwrap()
            .unwrap();

        let (first, second, still_up) = tokio::time::timeout(Duration::from_secs(5), ws_server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, "tok-9");
        assert_eq!(second, "tok-9");
        assert!(still_up);

        auth.abort();
        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }
}
