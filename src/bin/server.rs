//! HTTP server for the insight UI
//! Plain tokio TCP listener with minimal HTTP/1.1 handling

use anyhow::Context;
use insight_sql::config::AppConfig;
use insight_sql::error::InsightError;
use insight_sql::service::{ErrorResponse, QueryService};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn, Instrument};
use tracing_subscriber::EnvFilter;

const MAX_REQUEST_BYTES: usize = 1_000_000;

#[derive(Deserialize)]
struct SmartQueryRequest {
    #[serde(default)]
    question: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    #[serde(default)]
    question: String,
    #[serde(default)]
    selected_tables: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("insight_sql=info,server=info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let service = Arc::new(
        QueryService::from_config(&config)
            .await
            .context("failed to initialise query service")?,
    );

    let listener = TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server_addr))?;
    info!("Server listening on http://{} (model {})", config.server_addr, config.model);

    loop {
        let (stream, addr) = listener.accept().await?;
        let service = Arc::clone(&service);
        let span = tracing::info_span!("request", id = %uuid::Uuid::new_v4(), peer = %addr);
        tokio::spawn(handle_connection(stream, service).instrument(span));
    }
}

async fn handle_connection(mut stream: TcpStream, service: Arc<QueryService>) {
    // Read request with timeout to prevent hanging
    let mut buffer = Vec::new();
    let mut temp_buf = [0; 8192];

    let read_result = timeout(Duration::from_secs(5), async {
        loop {
            match stream.read(&mut temp_buf).await {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&temp_buf[..n]);
                    if request_complete(&buffer) || buffer.len() > MAX_REQUEST_BYTES {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    })
    .await;

    match read_result {
        Err(_) => {
            warn!("Request read timeout");
            return;
        }
        Ok(Err(e)) => {
            warn!("Failed to read from stream: {}", e);
            return;
        }
        Ok(Ok(())) => {}
    }
    if buffer.is_empty() {
        return;
    }

    let request = String::from_utf8_lossy(&buffer);
    let response = handle_request(&request, &service).await;
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

/// True once the header block and `Content-Length` bytes of body have arrived.
fn request_complete(buffer: &[u8]) -> bool {
    let Some(headers_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&buffer[..headers_end]);
    let body_len = extract_content_length(&head).unwrap_or(0);
    buffer.len() >= headers_end + 4 + body_len
}

fn extract_content_length(head: &str) -> Option<usize> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

async fn handle_request(request: &str, service: &QueryService) -> String {
    let Some(request_line) = request.lines().next() else {
        return create_response(400, "Bad Request", r#"{"error":"Empty request"}"#);
    };
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", r#"{"error":"Malformed request line"}"#);
    }

    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or("/").trim_end_matches('/');
    let body = request.split_once("\r\n\r\n").map(|(_, b)| b.trim()).unwrap_or("");
    info!("{} {}", method, path);

    match (method, path) {
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        ("GET", "/api/health") => create_response(200, "OK", r#"{"status":"ok","service":"insight-sql"}"#),
        ("GET", "/api/tables") => match service.tables().await {
            Ok(tables) => json_response(200, "OK", &serde_json::json!({ "tables": tables })),
            Err(e) => failure(e),
        },
        ("POST", "/api/smart-query") => {
            let Ok(req) = serde_json::from_str::<SmartQueryRequest>(body) else {
                return create_response(400, "Bad Request", r#"{"error":"Invalid JSON body"}"#);
            };
            match service.smart_query(&req.question).await {
                Ok(response) => json_response(200, "OK", &response),
                Err(e) => failure(e),
            }
        }
        ("POST", "/api/query") => {
            let Ok(req) = serde_json::from_str::<QueryRequest>(body) else {
                return create_response(400, "Bad Request", r#"{"error":"Invalid JSON body"}"#);
            };
            match service.query(&req.question, &req.selected_tables).await {
                Ok(response) => json_response(200, "OK", &response),
                Err(e) => failure(e),
            }
        }
        _ => create_response(404, "Not Found", r#"{"error":"Not found"}"#),
    }
}

fn failure(err: InsightError) -> String {
    let (status, text) = match err {
        InsightError::InvalidRequest(_) => (400, "Bad Request"),
        _ => (500, "Internal Server Error"),
    };
    error!("Request failed: {}", err);
    json_response(status, text, &ErrorResponse::from_error(&err))
}

fn json_response<T: serde::Serialize>(status: u16, status_text: &str, value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(body) => create_response(status, status_text, &body),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            create_response(500, "Internal Server Error", r#"{"error":"Failed to serialize response"}"#)
        }
    }
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
