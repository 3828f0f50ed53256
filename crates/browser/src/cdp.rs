//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! Commands are JSON-RPC messages with an auto-incrementing `id`; the reader task
//! routes responses back to the waiting caller and fans events out to subscribers.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type Listeners = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

/// A CDP WebSocket client that can send commands and receive responses/events.
pub struct CdpClient {
    ws_tx: mpsc::Sender<String>,
    pending: Pending,
    /// Set once the reader has stopped; no further responses will arrive.
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    /// Event listeners (domain.event -> channel).
    event_listeners: Listeners,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a Chrome CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self, String> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| format!("Failed to connect to CDP endpoint {}: {}", ws_url, e))?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let event_listeners: Listeners = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let pending_clone = pending.clone();
        let events_clone = event_listeners.clone();
        let closed_clone = closed.clone();

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            debug!("Ignoring non-JSON CDP frame");
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            if let Some(tx) = pending_clone.lock().await.remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                            let mut listeners = events_clone.lock().await;
                            if let Some(senders) = listeners.get_mut(method) {
                                senders.retain(|tx| !tx.is_closed());
                                let params = val.get("params").cloned().unwrap_or(Value::Null);
                                for tx in senders.iter() {
                                    let _ = tx.try_send(params.clone());
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            // Dropping the senders fails every in-flight command right away.
            closed_clone.store(true, Ordering::SeqCst);
            pending_clone.lock().await.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            closed,
            next_id: AtomicU64::new(1),
            event_listeners,
            reader_handle,
            writer_handle,
        })
    }

    /// Send a CDP command and wait for the response's `result`.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&id);
            return Err(format!("CDP connection closed before {}", method));
        }

        if let Err(e) = self.ws_tx.send(msg.to_string()).await {
            self.pending.lock().await.remove(&id);
            return Err(format!("Failed to send CDP command: {}", e));
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(format!("CDP error in {}: {}", method, error))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(format!("CDP connection closed while waiting for {}", method)),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    COMMAND_TIMEOUT.as_secs()
                ))
            }
        }
    }

    /// Subscribe to a CDP event. Returns a receiver that will get event params.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        self.event_listeners
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Enable a CDP domain (e.g., "Page", "Runtime", "Network", "DOM").
    pub async fn enable_domain(&self, domain: &str) -> Result<(), String> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<Value, String> {
        let result = self
            .send_command("Page.navigate", json!({"url": url}))
            .await?;
        if let Some(err) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(format!("Navigation to {} failed: {}", url, err));
        }
        Ok(result)
    }

    pub async fn reload(&self) -> Result<(), String> {
        self.send_command("Page.reload", json!({})).await?;
        Ok(())
    }

    /// Evaluate JavaScript in the page and return its value.
    ///
    /// A thrown exception comes back as an error carrying the exception text.
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value, String> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown exception");
            return Err(format!("JavaScript error: {}", text));
        }
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Evaluate an expression and return a remote object id for its result, if any.
    pub async fn evaluate_handle(&self, expression: &str) -> Result<Option<String>, String> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({"expression": expression, "returnByValue": false}),
            )
            .await?;
        Ok(result
            .pointer("/result/objectId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    /// Dispatch a mouse event via Input domain.
    pub async fn dispatch_mouse_event(
        &self,
        event_type: &str,
        x: f64,
        y: f64,
        click_count: i32,
    ) -> Result<(), String> {
        self.send_command(
            "Input.dispatchMouseEvent",
            json!({
                "type": event_type,
                "x": x,
                "y": y,
                "button": "left",
                "clickCount": click_count,
            }),
        )
        .await?;
        Ok(())
    }

    /// Dispatch a key event. `text` is what the key types, if anything.
    pub async fn dispatch_key_event(
        &self,
        event_type: &str,
        key: &str,
        code: &str,
        key_code: i32,
        text: Option<&str>,
    ) -> Result<(), String> {
        let mut params = json!({
            "type": event_type,
            "key": key,
            "code": code,
            "windowsVirtualKeyCode": key_code,
        });
        if let Some(text) = text {
            params["text"] = json!(text);
        }
        self.send_command("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }

    /// Insert text at the focused element (bypasses key events).
    pub async fn insert_text(&self, text: &str) -> Result<(), String> {
        self.send_command("Input.insertText", json!({"text": text}))
            .await?;
        Ok(())
    }

    /// Set a batch of cookies (`Network.CookieParam` objects).
    pub async fn set_cookies(&self, cookies: Vec<Value>) -> Result<(), String> {
        self.send_command("Network.setCookies", json!({"cookies": cookies}))
            .await?;
        Ok(())
    }

    /// All cookies in the browser, for every domain.
    pub async fn get_all_cookies(&self) -> Result<Vec<Value>, String> {
        let result = self
            .send_command("Network.getAllCookies", json!({}))
            .await?;
        Ok(result
            .get("cookies")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<(), String> {
        self.send_command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    /// Set files on a file input element identified by objectId.
    pub async fn set_file_input_files_by_object(
        &self,
        files: Vec<String>,
        object_id: &str,
    ) -> Result<(), String> {
        self.send_command(
            "DOM.setFileInputFiles",
            json!({
                "files": files,
                "objectId": object_id,
            }),
        )
        .await?;
        Ok(())
    }

    /// Take a screenshot and return base64-encoded PNG data.
    pub async fn screenshot(&self) -> Result<String, String> {
        let result = self
            .send_command("Page.captureScreenshot", json!({"format": "png"}))
            .await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "No screenshot data returned".to_string())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    /// Minimal CDP endpoint: answers a handful of methods, errors on the rest.
    async fn spawn_fake_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let req: Value = serde_json::from_str(&text).unwrap();
                let id = req["id"].clone();
                let reply = match req["method"].as_str().unwrap_or("") {
                    "Page.enable" => {
                        let event = json!({"method": "Page.loadEventFired", "params": {"timestamp": 1.5}});
                        ws.send(Message::Text(event.to_string())).await.unwrap();
                        json!({"id": id, "result": {}})
                    }
                    "Runtime.evaluate" => {
                        let expr = req["params"]["expression"].as_str().unwrap_or("");
                        if expr == "throw" {
                            json!({"id": id, "result": {
                                "result": {"type": "object"},
                                "exceptionDetails": {"text": "Uncaught", "exception": {"description": "Error: boom"}}
                            }})
                        } else {
                            json!({"id": id, "result": {"result": {"type": "number", "value": 2}}})
                        }
                    }
                    "Test.hangUp" => {
                        let _ = ws.close(None).await;
                        break;
                    }
                    "Network.getAllCookies" => json!({"id": id, "result": {"cookies": [
                        {"name": "a", "value": "1", "domain": "note.com"}
                    ]}}),
                    _ => json!({"id": id, "error": {"code": -32601, "message": "method not found"}}),
                };
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_evaluate_returns_value() {
        let client = CdpClient::connect(&spawn_fake_endpoint().await).await.unwrap();
        assert_eq!(client.evaluate_js("1 + 1").await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_evaluate_surfaces_exception() {
        let client = CdpClient::connect(&spawn_fake_endpoint().await).await.unwrap();
        let err = client.evaluate_js("throw").await.unwrap_err();
        assert!(err.contains("Error: boom"), "{}", err);
    }

    #[tokio::test]
    async fn test_protocol_error_is_reported() {
        let client = CdpClient::connect(&spawn_fake_endpoint().await).await.unwrap();
        let err = client.send_command("Bogus.method", json!({})).await.unwrap_err();
        assert!(err.contains("Bogus.method"));
        assert!(err.contains("method not found"));
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let client = CdpClient::connect(&spawn_fake_endpoint().await).await.unwrap();
        let mut loads = client.subscribe_event("Page.loadEventFired").await;
        client.enable_domain("Page").await.unwrap();
        let params = tokio::time::timeout(Duration::from_secs(2), loads.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(params["timestamp"], json!(1.5));
    }

    #[tokio::test]
    async fn test_get_all_cookies() {
        let client = CdpClient::connect(&spawn_fake_endpoint().await).await.unwrap();
        let cookies = client.get_all_cookies().await.unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0]["name"], "a");
    }

    #[tokio::test]
    async fn test_closed_socket_fails_commands_promptly() {
        let client = CdpClient::connect(&spawn_fake_endpoint().await).await.unwrap();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            client.send_command("Test.hangUp", json!({})),
        )
        .await
        .expect("command should fail before the 30s timeout")
        .unwrap_err();
        assert!(err.contains("closed"), "{}", err);

        let err = tokio::time::timeout(Duration::from_secs(5), client.evaluate_js("1"))
            .await
            .expect("later commands should fail immediately")
            .unwrap_err();
        assert!(err.contains("closed"), "{}", err);
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let client = CdpClient::connect(&spawn_fake_endpoint().await).await.unwrap();
        drop(client.subscribe_event("Page.loadEventFired").await);
        drop(client.subscribe_event("Page.loadEventFired").await);
        let mut live = client.subscribe_event("Page.loadEventFired").await;

        client.enable_domain("Page").await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), live.recv())
            .await
            .unwrap()
            .unwrap();
        let listeners = client.event_listeners.lock().await;
        assert_eq!(listeners["Page.loadEventFired"].len(), 1);
    }
}
