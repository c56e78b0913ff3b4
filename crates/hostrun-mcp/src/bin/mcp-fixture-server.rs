//! Minimal stdio MCP server used by the integration tests.
//!
//! Requests are handled concurrently, so slow calls answer after fast ones.
//! `FIXTURE_PROTOCOL_VERSION` overrides the version sent in `initialize`.

use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

const PAGE_SIZE: usize = 4;

fn tools() -> Vec<Value> {
    let object = |props: Value| json!({"type": "object", "properties": props});
    vec![
        json!({"name": "echo", "description": "Echo the text argument",
               "inputSchema": object(json!({"text": {"type": "string"}}))}),
        json!({"name": "sleep", "description": "Sleep for ms milliseconds, then echo tag",
               "inputSchema": object(json!({"ms": {"type": "integer"}, "tag": {"type": "string"}}))}),
        json!({"name": "fail", "description": "Report a tool-level error",
               "inputSchema": object(json!({}))}),
        json!({"name": "crash", "description": "Exit the process immediately",
               "inputSchema": object(json!({}))}),
        json!({"name": "garbage", "description": "Write a non-JSON line to stdout",
               "inputSchema": object(json!({}))}),
        json!({"name": "env", "description": "Read an environment variable",
               "inputSchema": object(json!({"name": {"type": "string"}}))}),
        json!({"name": "stats", "description": "Number of tools/list requests served",
               "inputSchema": object(json!({}))}),
    ]
}

fn text(value: impl Into<String>) -> Value {
    json!({"content": [{"type": "text", "text": value.into()}]})
}

/// What to write back for one request.
enum Outcome {
    Reply(Value),
    Raw(String),
    Exit,
}

async fn call_tool(params: &Value, list_calls: &AtomicUsize) -> Outcome {
    let args = &params["arguments"];
    let result = match params["name"].as_str().unwrap_or_default() {
        "echo" => text(args["text"].as_str().unwrap_or_default()),
        "sleep" => {
            let ms = args["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            text(args["tag"].as_str().unwrap_or_default())
        }
        "fail" => json!({
            "content": [{"type": "text", "text": "fixture failure"}],
            "isError": true
        }),
        "crash" => return Outcome::Exit,
        "garbage" => return Outcome::Raw("this is not json-rpc".to_string()),
        "env" => {
            let name = args["name"].as_str().unwrap_or_default();
            text(std::env::var(name).unwrap_or_default())
        }
        "stats" => text(list_calls.load(Ordering::SeqCst).to_string()),
        other => {
            return Outcome::Reply(json!({
                "error": {"code": -32602, "message": format!("Unknown tool: {other}")}
            }));
        }
    };
    Outcome::Reply(json!({ "result": result }))
}

async fn handle(msg: Value, list_calls: Arc<AtomicUsize>) -> Option<Outcome> {
    let id = msg.get("id")?.clone();
    let method = msg["method"].as_str().unwrap_or_default();
    let params = msg.get("params").cloned().unwrap_or(Value::Null);

    let outcome = match method {
        "initialize" => {
            let version = std::env::var("FIXTURE_PROTOCOL_VERSION")
                .ok()
                .or_else(|| params["protocolVersion"].as_str().map(str::to_string))
                .unwrap_or_else(|| "2024-11-05".to_string());
            Outcome::Reply(json!({"result": {
                "protocolVersion": version,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "fixture", "version": "1.0.0"}
            }}))
        }
        "tools/list" => {
            list_calls.fetch_add(1, Ordering::SeqCst);
            let all = tools();
            let start: usize = params["cursor"]
                .as_str()
                .and_then(|c| c.parse().ok())
                .unwrap_or(0);
            let end = (start + PAGE_SIZE).min(all.len());
            let mut result = json!({"tools": all[start..end].to_vec()});
            if end < all.len() {
                result["nextCursor"] = json!(end.to_string());
            }
            Outcome::Reply(json!({ "result": result }))
        }
        "tools/call" => call_tool(&params, &list_calls).await,
        "ping" => Outcome::Reply(json!({"result": {}})),
        other => Outcome::Reply(json!({
            "error": {"code": -32601, "message": format!("Method not found: {other}")}
        })),
    };

    Some(match outcome {
        Outcome::Reply(mut body) => {
            body["jsonrpc"] = json!("2.0");
            body["id"] = id;
            Outcome::Reply(body)
        }
        other => other,
    })
}

#[tokio::main]
async fn main() {
    let (out_tx, mut out_rx) = mpsc::channel::<Outcome>(64);
    let list_calls = Arc::new(AtomicUsize::new(0));

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(outcome) = out_rx.recv().await {
            let line = match outcome {
                Outcome::Reply(body) => body.to_string(),
                Outcome::Raw(line) => line,
                Outcome::Exit => std::process::exit(3),
            };
            if stdout.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    eprintln!("fixture MCP server listening on stdio");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(msg) = serde_json::from_str::<Value>(&line) else {
            eprintln!("ignoring unparseable input: {line}");
            continue;
        };
        let tx = out_tx.clone();
        let list_calls = Arc::clone(&list_calls);
        tokio::spawn(async move {
            if let Some(outcome) = handle(msg, list_calls).await {
                let _ = tx.send(outcome).await;
            }
        });
    }

    drop(out_tx);
    let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
}
