//! Stdio transport for MCP server communication.
//!
//! Frames newline-delimited JSON-RPC messages over a pair of byte streams and
//! demultiplexes responses to their callers strictly by request id.

use crate::error::McpError;
use crate::jsonrpc::{
    Incoming, JsonRpcNotification, JsonRpcReply, JsonRpcRequest, JsonRpcResponse,
    ServerNotification,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why a connection stopped accepting requests.
#[derive(Debug, Clone)]
enum Fault {
    Closed,
    Protocol(String),
}

impl Fault {
    fn to_error(&self) -> McpError {
        match self {
            Fault::Closed => McpError::ConnectionClosed,
            Fault::Protocol(reason) => McpError::Protocol(reason.clone()),
        }
    }
}

type Waiter = oneshot::Sender<Result<JsonRpcResponse, Fault>>;

/// In-flight requests plus the connection fault, guarded together so a
/// request can never be registered after the waiters were drained.
#[derive(Default)]
struct PendingTable {
    waiters: HashMap<u64, Waiter>,
    fault: Option<Fault>,
}

impl PendingTable {
    /// Record `fault` (the first one wins) and fail every waiter with it.
    fn fail_all(&mut self, fault: Fault) {
        let fault = self.fault.get_or_insert(fault).clone();
        for (_, tx) in self.waiters.drain() {
            let _ = tx.send(Err(fault.clone()));
        }
    }
}

/// Async JSON-RPC transport over one server's stdio streams.
pub struct StdioTransport {
    label: String,
    next_id: AtomicU64,
    write_tx: mpsc::Sender<String>,
    pending: Arc<Mutex<PendingTable>>,
    notifications: broadcast::Sender<ServerNotification>,
    shutdown: CancellationToken,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl StdioTransport {
    /// Start background reader/writer tasks over `reader` (server stdout) and
    /// `writer` (server stdin).
    pub fn new<R, W>(label: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let label = label.into();
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let shutdown = CancellationToken::new();
        let (notifications, _) = broadcast::channel(64);

        // Writer task: drains channel and writes to server stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = {
            let pending = Arc::clone(&pending);
            let shutdown = shutdown.clone();
            let label = label.clone();
            tokio::spawn(async move {
                let mut writer = writer;
                loop {
                    let msg = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        msg = write_rx.recv() => match msg {
                            Some(msg) => msg,
                            None => break,
                        },
                    };
                    if let Err(e) = write_line(&mut writer, &msg).await {
                        tracing::debug!(server = %label, "Write to MCP server failed: {e}");
                        pending.lock().await.fail_all(Fault::Closed);
                        break;
                    }
                }
                // Dropping the writer closes the server's stdin.
                let _ = writer.shutdown().await;
            })
        };

        // Reader task: assembles lines, classifies them, dispatches by id
        let reader_handle = {
            let pending = Arc::clone(&pending);
            let shutdown = shutdown.clone();
            let label = label.clone();
            let replies = write_tx.clone();
            let notifications = notifications.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(reader).lines();
                let fault = loop {
                    let line = tokio::select! {
                        _ = shutdown.cancelled() => break Fault::Closed,
                        line = lines.next_line() => line,
                    };
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break Fault::Closed,
                        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                            break Fault::Protocol(format!("non UTF-8 output from server: {e}"));
                        }
                        Err(e) => {
                            tracing::debug!(server = %label, "Read from MCP server failed: {e}");
                            break Fault::Closed;
                        }
                    };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    match Incoming::parse(line) {
                        Ok(Incoming::Response(resp)) => {
                            let waiter = pending.lock().await.waiters.remove(&resp.id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(Ok(resp));
                                }
                                None => tracing::debug!(
                                    server = %label,
                                    id = resp.id,
                                    "Dropping response for abandoned request"
                                ),
                            }
                        }
                        Ok(Incoming::Notification(notification)) => {
                            tracing::debug!(
                                server = %label,
                                method = %notification.method,
                                "Server notification"
                            );
                            // No subscribers is fine.
                            let _ = notifications.send(notification);
                        }
                        Ok(Incoming::Request { id, method, .. }) => {
                            let reply = if method == "ping" {
                                JsonRpcReply::result(id, serde_json::json!({}))
                            } else {
                                tracing::debug!(
                                    server = %label,
                                    method = %method,
                                    "Rejecting unsupported server request"
                                );
                                JsonRpcReply::method_not_found(id, &method)
                            };
                            if let Ok(serialized) = serde_json::to_string(&reply) {
                                let _ = replies.send(serialized).await;
                            }
                        }
                        Ok(Incoming::UnroutedError(error)) => {
                            tracing::warn!(
                                server = %label,
                                code = error.code,
                                "Server reported an error without a request id: {}",
                                error.message
                            );
                        }
                        Err(reason) => break Fault::Protocol(reason),
                    }
                };

                if let Fault::Protocol(reason) = &fault {
                    tracing::warn!(server = %label, "MCP connection failed: {reason}");
                }
                pending.lock().await.fail_all(fault);
            })
        };

        Self {
            label,
            next_id: AtomicU64::new(1),
            write_tx,
            pending,
            notifications,
            shutdown,
            reader_handle,
            writer_handle,
        }
    }

    /// Send a JSON-RPC request and wait up to `timeout` for its response.
    ///
    /// A timeout abandons only this request; the connection stays usable.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let serialized = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if let Some(fault) = &pending.fault {
                return Err(fault.to_error());
            }
            pending.waiters.insert(id, tx);
        }

        tracing::debug!(server = %self.label, id, method, "Sending MCP request");
        if self.write_tx.send(serialized).await.is_err() {
            self.pending.lock().await.waiters.remove(&id);
            return Err(McpError::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(resp))) => Ok(resp),
            Ok(Ok(Err(fault))) => Err(fault.to_error()),
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                // Clean up pending entry on timeout
                self.pending.lock().await.waiters.remove(&id);
                Err(McpError::Timeout {
                    operation: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        if let Some(fault) = &self.pending.lock().await.fault {
            return Err(fault.to_error());
        }

        let notification = JsonRpcNotification::new(method, params);
        let serialized = serde_json::to_string(&notification)?;

        self.write_tx
            .send(serialized)
            .await
            .map_err(|_| McpError::ConnectionClosed)
    }

    /// Receive notifications pushed by the server from now on.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<ServerNotification> {
        self.notifications.subscribe()
    }

    /// Whether the connection can still carry requests.
    pub async fn is_open(&self) -> bool {
        self.pending.lock().await.fault.is_none()
    }

    /// Close both streams and fail every in-flight request with
    /// `ConnectionClosed`.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.pending.lock().await.fail_all(Fault::Closed);
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if self.reader_handle.is_finished() && self.writer_handle.is_finished() {
            return;
        }
        // The writer exits on cancellation; the reader may be parked on a
        // stream that never reaches EOF.
        self.reader_handle.abort();
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, msg: &str) -> std::io::Result<()> {
    writer.write_all(msg.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    /// The server end of an in-memory transport.
    struct MockServer {
        lines: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl MockServer {
        async fn next_request(&mut self) -> serde_json::Value {
            let line = self.lines.next_line().await.unwrap().expect("client closed");
            serde_json::from_str(&line).unwrap()
        }

        async fn send(&mut self, value: serde_json::Value) {
            self.send_raw(&format!("{value}\n")).await;
        }

        async fn send_raw(&mut self, raw: &str) {
            self.writer.write_all(raw.as_bytes()).await.unwrap();
            self.writer.flush().await.unwrap();
        }
    }

    fn connect() -> (StdioTransport, MockServer) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let transport = StdioTransport::new("mock", client_read, client_write);
        let server = MockServer {
            lines: BufReader::new(server_read).lines(),
            writer: server_write,
        };
        (transport, server)
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn request_response_roundtrip() {
        let (transport, mut server) = connect();

        let call = transport.send_request("test/method", Some(serde_json::json!({})), TIMEOUT);
        let serve = async {
            let req = server.next_request().await;
            assert_eq!(req["method"], "test/method");
            server
                .send(serde_json::json!({"jsonrpc": "2.0", "id": req["id"], "result": {"ok": true}}))
                .await;
        };
        let (resp, _) = tokio::join!(call, serve);
        assert_eq!(resp.unwrap().result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn out_of_order_responses_reach_their_callers() {
        let (transport, mut server) = connect();

        let call = |n: u64| {
            let transport = &transport;
            async move {
                let resp = transport
                    .send_request("tools/call", Some(serde_json::json!({"n": n})), TIMEOUT)
                    .await
                    .unwrap();
                (n, resp.result.unwrap()["echo"].as_u64().unwrap())
            }
        };
        let serve = async {
            let mut requests = Vec::new();
            for _ in 0..3 {
                requests.push(server.next_request().await);
            }
            // Answer in reverse arrival order
            for req in requests.into_iter().rev() {
                server
                    .send(serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": req["id"],
                        "result": {"echo": req["params"]["n"]}
                    }))
                    .await;
            }
        };

        let (a, b, c, _) = tokio::join!(call(1), call(2), call(3), serve);
        assert_eq!(a, (1, 1));
        assert_eq!(b, (2, 2));
        assert_eq!(c, (3, 3));
    }

    #[tokio::test]
    async fn null_id_error_keeps_connection_open() {
        let (transport, mut server) = connect();

        let call = transport.send_request("tools/list", None, TIMEOUT);
        let serve = async {
            let req = server.next_request().await;
            server
                .send(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {"code": -32700, "message": "Parse error"}
                }))
                .await;
            server
                .send(serde_json::json!({"jsonrpc": "2.0", "id": req["id"], "result": {"tools": []}}))
                .await;
        };
        let (resp, _) = tokio::join!(call, serve);
        assert!(resp.unwrap().result.unwrap()["tools"].is_array());
        assert!(transport.is_open().await);
    }

    #[tokio::test]
    async fn partial_writes_are_buffered_into_one_message() {
        let (transport, mut server) = connect();

        let call = transport.send_request("tools/list", None, TIMEOUT);
        let serve = async {
            let req = server.next_request().await;
            let full = format!(r#"{{"jsonrpc":"2.0","id":{},"result":{{"tools":[]}}}}"#, req["id"]);
            let (head, tail) = full.split_at(full.len() / 2);
            server.send_raw(head).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.send_raw(&format!("{tail}\n")).await;
        };
        let (resp, _) = tokio::join!(call, serve);
        assert!(resp.unwrap().result.unwrap()["tools"].is_array());
    }

    #[tokio::test]
    async fn timeout_abandons_only_that_request() {
        let (transport, mut server) = connect();

        let result = transport
            .send_request("slow", None, Duration::from_millis(50))
            .await;
        match result {
            Err(McpError::Timeout {
                operation,
                timeout_ms,
            }) => {
                assert_eq!(operation, "slow");
                assert_eq!(timeout_ms, 50);
            }
            other => panic!("Expected Timeout, got: {other:?}"),
        }

        // The late response is dropped; the connection keeps working.
        let slow = server.next_request().await;
        server
            .send(serde_json::json!({"jsonrpc": "2.0", "id": slow["id"], "result": {}}))
            .await;

        let call = transport.send_request("fast", None, TIMEOUT);
        let serve = async {
            let req = server.next_request().await;
            server
                .send(serde_json::json!({"jsonrpc": "2.0", "id": req["id"], "result": {"fast": true}}))
                .await;
        };
        let (resp, _) = tokio::join!(call, serve);
        assert_eq!(resp.unwrap().result.unwrap()["fast"], true);
        assert!(transport.is_open().await);
    }

    #[tokio::test]
    async fn malformed_line_fails_every_pending_request() {
        let (transport, mut server) = connect();

        let first = transport.send_request("a", None, TIMEOUT);
        let second = transport.send_request("b", None, TIMEOUT);
        let serve = async {
            server.next_request().await;
            server.next_request().await;
            server.send_raw("this is not json\n").await;
        };
        let (first, second, _) = tokio::join!(first, second, serve);
        assert!(matches!(first, Err(McpError::Protocol(_))));
        assert!(matches!(second, Err(McpError::Protocol(_))));

        // The connection stays failed.
        let after = transport.send_request("c", None, TIMEOUT).await;
        assert!(matches!(after, Err(McpError::Protocol(_))));
        assert!(!transport.is_open().await);
    }

    #[tokio::test]
    async fn server_eof_fails_pending_with_connection_closed() {
        let (transport, mut server) = connect();

        let call = transport.send_request("a", None, TIMEOUT);
        let serve = async {
            server.next_request().await;
            server.writer.shutdown().await.unwrap();
        };
        let (result, _) = tokio::join!(call, serve);
        assert!(matches!(result, Err(McpError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn close_fails_pending_and_closes_server_stdin() {
        let (transport, mut server) = connect();
        let transport = Arc::new(transport);

        let pending = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.send_request("hang", None, TIMEOUT).await })
        };
        server.next_request().await;

        transport.close().await;
        assert!(matches!(
            pending.await.unwrap(),
            Err(McpError::ConnectionClosed)
        ));
        assert!(server.lines.next_line().await.unwrap().is_none());
        assert!(matches!(
            transport.send_notification("x", None).await,
            Err(McpError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn notifications_are_surfaced() {
        let (transport, mut server) = connect();
        let mut rx = transport.subscribe_notifications();

        server
            .send(serde_json::json!({
                "jsonrpc": "2.0",
                "method": "notifications/message",
                "params": {"level": "info", "data": "hello"}
            }))
            .await;

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.method, "notifications/message");
        assert_eq!(notification.params.unwrap()["data"], "hello");
    }

    #[tokio::test]
    async fn server_requests_are_answered() {
        let (_transport, mut server) = connect();

        server
            .send(serde_json::json!({"jsonrpc": "2.0", "id": "p1", "method": "ping"}))
            .await;
        let pong = server.next_request().await;
        assert_eq!(pong["id"], "p1");
        assert!(pong["result"].is_object());

        server
            .send(serde_json::json!({"jsonrpc": "2.0", "id": 5, "method": "sampling/createMessage"}))
            .await;
        let rejected = server.next_request().await;
        assert_eq!(rejected["id"], 5);
        assert_eq!(rejected["error"]["code"], crate::jsonrpc::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notification_does_not_block() {
        let (transport, mut server) = connect();

        transport
            .send_notification("notifications/initialized", None)
            .await
            .unwrap();
        let sent = server.next_request().await;
        assert_eq!(sent["method"], "notifications/initialized");
        assert!(sent.get("id").is_none());
    }
}
