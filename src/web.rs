use std::collections::HashMap;
use std::sync::Arc;

use colored::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{RelayError, QUESTION_TOO_LONG};
use crate::providers::OpenAiAssistants;
use crate::relay::{EventSink, Relay, SseWriter};
use crate::token::TokenStore;
use crate::transcript::escape_html;
use crate::OutboundEvent;

/// Headers for the relay endpoint. Buffering is disabled end to end.
pub const SSE_HEADERS: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\nX-Accel-Buffering: no\r\n\r\n";

const MAX_REQUEST_BYTES: usize = 8192;
const MAX_HEADERS: usize = 32;
const DRAIN_GRACE: std::time::Duration = std::time::Duration::from_secs(1);
const ROOTS_PLACEHOLDER: &str = "__WIDGET_ROOTS__";
const ROOT_CONFIG_PLACEHOLDER: &str = "__ROOT_CONFIG__";

/// Markup for one widget instance. Its config rides in `data-assistant`.
const WIDGET_ROOT: &str = r#"<div class="assistant" data-assistant="__ROOT_CONFIG__">
  <div class="chat-history" data-role="history"></div>
  <div class="input-area">
    <textarea data-role="question" rows="2" placeholder="Ask your question..."></textarea>
    <button data-role="submit">Send</button>
    <button data-role="download" type="button">Download Chat</button>
    <span data-role="spinner" class="spinner"></span>
  </div>
</div>"#;

/// Embedded chat widget. The consumer script mirrors `consumer::StreamConsumer`.
pub const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Assistant</title>
<style>
*{box-sizing:border-box}
body{font-family:system-ui,sans-serif;margin:0;padding:24px;background:#fff;color:#222}
.assistant{display:flex;flex-direction:column;height:400px;border:1px solid #ccc;overflow:hidden;max-width:720px}
.chat-history{flex-grow:1;overflow-y:auto;padding:10px;background:#f9f9f9}
.message{margin-bottom:10px;padding:8px;border-radius:5px;clear:both;max-width:85%;white-space:normal}
.user-message{background:#e0f2f7;float:right}
.bot-message{background:#e8e8e8;float:left}
.input-area{padding:10px;border-top:1px solid #ccc;display:flex;align-items:center}
.input-area textarea{flex-grow:1;resize:none}
.input-area button{margin-left:10px}
.spinner{display:inline-block;width:16px;height:16px;margin-left:8px;border:2px solid rgba(0,0,0,.1);border-top-color:rgba(0,0,0,.6);border-radius:50%;animation:spin .8s linear infinite;visibility:hidden}
.spinner.busy{visibility:visible}
@keyframes spin{to{transform:rotate(360deg)}}
</style>
</head>
<body>
__WIDGET_ROOTS__
<script>
const CONNECTION_FAILED = 'Connection to the assistant failed.';

function escapeHtml(str){
  return String(str)
    .replace(/&/g,'&amp;')
    .replace(/</g,'&lt;')
    .replace(/>/g,'&gt;')
    .replace(/"/g,'&quot;')
    .replace(/'/g,'&#039;');
}

function decodePayload(data){
  try { const v = JSON.parse(data); return typeof v === 'string' ? v : JSON.stringify(v); }
  catch (_) { return data; }
}

class AssistantWidget {
  constructor(root, config){
    this.config = config;
    this.history = root.querySelector('[data-role=history]');
    this.input = root.querySelector('[data-role=question]');
    this.submitBtn = root.querySelector('[data-role=submit]');
    this.spinner = root.querySelector('[data-role=spinner]');
    this.generation = 0;
    this.state = 'idle';
    this.source = null;
    this.live = null;
    this.submitBtn.addEventListener('click', () => this.submit());
    this.input.addEventListener('keydown', e => {
      if (e.key === 'Enter' && !e.shiftKey) { e.preventDefault(); this.submit(); }
    });
    root.querySelector('[data-role=download]').addEventListener('click', () => this.download());
  }

  setBusy(busy){
    this.spinner.classList.toggle('busy', busy);
    this.submitBtn.disabled = busy;
  }

  addBubble(role, text){
    const div = document.createElement('div');
    div.className = 'message ' + (role === 'user' ? 'user-message' : 'bot-message');
    div.dataset.role = role;
    div.innerHTML = escapeHtml(text);
    this.history.appendChild(div);
    this.scroll();
    return div;
  }

  scroll(){ this.history.scrollTop = this.history.scrollHeight; }

  isLive(gen){ return gen === this.generation && (this.state === 'awaiting' || this.state === 'streaming'); }

  submit(){
    const question = this.input.value.trim();
    if (!question || this.submitBtn.disabled) return;
    if (this.source) { this.source.close(); this.source = null; }
    const gen = ++this.generation;
    this.addBubble('user', question);
    this.live = this.addBubble('assistant', '');
    this.input.value = '';
    this.state = 'awaiting';
    this.setBusy(true);
    fetch('/token')
      .then(r => r.json())
      .then(t => this.open(gen, question, t.token))
      .catch(() => this.fail(gen, CONNECTION_FAILED));
  }

  open(gen, question, token){
    if (!this.isLive(gen)) return;
    const params = new URLSearchParams({ question: question, nonce: token });
    if (this.config.assistantId) params.set('assistant_id', this.config.assistantId);
    const es = new EventSource('/stream?' + params.toString());
    this.source = es;
    es.addEventListener('heartbeat', () => {});
    es.addEventListener('text-delta', e => {
      if (!this.isLive(gen)) { es.close(); return; }
      this.live.innerHTML += escapeHtml(decodePayload(e.data)).replace(/\n/g, '<br>');
      if (this.state === 'awaiting') { this.state = 'streaming'; this.setBusy(false); }
      this.scroll();
    });
    es.addEventListener('completion', () => {
      es.close();
      if (this.isLive(gen)) this.finish();
    });
    es.addEventListener('error', e => {
      es.close();
      this.fail(gen, e.data !== undefined ? decodePayload(e.data) : CONNECTION_FAILED);
    });
  }

  fail(gen, message){
    if (!this.isLive(gen)) return;
    this.live.innerHTML = '<p>Error: ' + escapeHtml(message) + '</p>';
    this.scroll();
    this.finish();
  }

  finish(){
    this.state = 'done';
    this.source = null;
    this.setBusy(false);
  }

  download(){
    const lines = [];
    this.history.querySelectorAll('.message').forEach(m => {
      const who = m.dataset.role === 'user' ? 'User' : 'Assistant';
      lines.push(who + ': ' + m.textContent.trim());
    });
    const blob = new Blob([lines.join('\n\n')], { type: 'text/plain' });
    const url = URL.createObjectURL(blob);
    const a = document.createElement('a');
    a.href = url;
    a.download = 'assistant-conversation.txt';
    document.body.appendChild(a);
    a.click();
    document.body.removeChild(a);
    URL.revokeObjectURL(url);
  }
}

function widgetConfig(root){
  try { return JSON.parse(root.dataset.assistant || '{}'); }
  catch (_) { return {}; }
}

document.querySelectorAll('[data-assistant]').forEach(root => new AssistantWidget(root, widgetConfig(root)));
</script>
</body>
</html>"##;

/// Shared server state, cloned into every connection.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: TokenStore,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        AppState {
            config: Arc::new(config),
            tokens: TokenStore::default(),
        }
    }
}

/// Percent-decoding for URL query parameters. Invalid escapes pass through.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse query string into key-value pairs. Later duplicates win.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(val)))
        })
        .collect()
}

/// Render the widget page with one instance per assistant id. No ids
/// renders a single instance bound to the server's default assistant.
pub fn render_index(assistant_ids: &[&str]) -> String {
    let configs: Vec<serde_json::Value> = if assistant_ids.is_empty() {
        vec![serde_json::json!({})]
    } else {
        assistant_ids
            .iter()
            .map(|id| serde_json::json!({ "assistantId": id }))
            .collect()
    };
    let roots = configs
        .iter()
        .map(|config| WIDGET_ROOT.replace(ROOT_CONFIG_PLACEHOLDER, &escape_html(&config.to_string())))
        .collect::<Vec<_>>()
        .join("\n");
    INDEX_HTML.replace(ROOTS_PLACEHOLDER, &roots)
}

/// Split a comma separated `assistant_id` parameter.
fn assistant_ids(param: Option<&String>) -> Vec<&str> {
    param
        .map(|ids| ids.split(',').map(str::trim).filter(|id| !id.is_empty()).collect())
        .unwrap_or_default()
}

/// Bind the configured address and serve until the process exits.
pub async fn serve(config: Config) -> Result<(), RelayError> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;

    eprintln!(
        "{}",
        format!("  Assistant relay running at http://{}", listener.local_addr()?).bright_green()
    );
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());
    if config.api_key.is_none() {
        warn!("no API key configured; every exchange will be rejected");
    }

    run_server(listener, AppState::new(config)).await
}

/// Accept loop over an already-bound listener.
pub async fn run_server(listener: TcpListener, state: AppState) -> Result<(), RelayError> {
    info!(addr = %listener.local_addr()?, "relay listening");
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                debug!(%peer, error = %e, "connection error");
            }
        });
    }
}

struct Request {
    method: String,
    path: String,
    query: HashMap<String, String>,
}

/// How reading the request head ended.
enum RequestHead {
    Parsed(Request),
    /// Peer closed before sending a full head.
    Closed,
    /// Head did not fit in `MAX_REQUEST_BYTES`. `stream` is set when the
    /// request line targets the relay endpoint.
    TooLarge { line_complete: bool, stream: bool },
    Malformed(httparse::Error),
}

async fn read_request(stream: &mut TcpStream) -> Result<RequestHead, RelayError> {
    let mut buf = vec![0u8; MAX_REQUEST_BYTES];
    let mut filled = 0;
    loop {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(RequestHead::Closed);
        }
        filled += n;

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf[..filled]) {
            Ok(httparse::Status::Complete(_)) => {
                let method = req.method.unwrap_or("GET").to_string();
                let target = req.path.unwrap_or("/");
                let (path, query) = match target.split_once('?') {
                    Some((path, query)) => (path, parse_query(query)),
                    None => (target, HashMap::new()),
                };
                return Ok(RequestHead::Parsed(Request {
                    method,
                    path: path.to_string(),
                    query,
                }));
            }
            Ok(httparse::Status::Partial) if filled < buf.len() => continue,
            Ok(httparse::Status::Partial) => {
                return Ok(RequestHead::TooLarge {
                    line_complete: buf.windows(2).any(|w| w == b"\r\n"),
                    stream: buf.starts_with(b"GET /stream"),
                });
            }
            Err(e) => return Ok(RequestHead::Malformed(e)),
        }
    }
}

/// Read and discard whatever the peer still sends, so closing the socket
/// with unread input does not reset the response already written.
async fn drain_unread(stream: &mut TcpStream) {
    let mut scratch = [0u8; 1024];
    let _ = tokio::time::timeout(DRAIN_GRACE, async {
        while matches!(stream.read(&mut scratch).await, Ok(n) if n > 0) {}
    })
    .await;
}

/// Answer a head that could not be read in full.
async fn reject_head(stream: &mut TcpStream, head: RequestHead) -> Result<(), RelayError> {
    match head {
        RequestHead::TooLarge { stream: true, .. } => {
            warn!(limit = MAX_REQUEST_BYTES, "stream request too large");
            stream.write_all(SSE_HEADERS.as_bytes()).await?;
            let mut sink = SseWriter::new(stream);
            sink.send(&OutboundEvent::error(QUESTION_TOO_LONG)).await?;
            sink.close().await?;
            Ok(())
        }
        RequestHead::TooLarge { line_complete: false, .. } => {
            write_response(stream, "414 URI Too Long", "text/plain", "URI Too Long").await
        }
        RequestHead::TooLarge { .. } | RequestHead::Malformed(httparse::Error::TooManyHeaders) => {
            write_response(
                stream,
                "431 Request Header Fields Too Large",
                "text/plain",
                "Request Header Fields Too Large",
            )
            .await
        }
        RequestHead::Malformed(e) => {
            debug!(error = %e, "unparseable request");
            write_response(stream, "400 Bad Request", "text/plain", "Bad Request").await
        }
        RequestHead::Closed | RequestHead::Parsed(_) => Ok(()),
    }
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> Result<(), RelayError> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body,
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn handle_connection(mut stream: TcpStream, state: AppState) -> Result<(), RelayError> {
    let request = match read_request(&mut stream).await? {
        RequestHead::Parsed(request) => request,
        other => {
            reject_head(&mut stream, other).await?;
            drain_unread(&mut stream).await;
            return Ok(());
        }
    };
    debug!(method = %request.method, path = %request.path, "request");

    if request.method != "GET" {
        return write_response(&mut stream, "405 Method Not Allowed", "text/plain", "Method Not Allowed").await;
    }

    match request.path.as_str() {
        "/" => {
            let page = render_index(&assistant_ids(request.query.get("assistant_id")));
            write_response(&mut stream, "200 OK", "text/html; charset=utf-8", &page).await
        }
        "/token" => {
            let body = serde_json::json!({ "token": state.tokens.issue() }).to_string();
            write_response(&mut stream, "200 OK", "application/json", &body).await
        }
        "/stream" => handle_stream(stream, request.query, state).await,
        _ => write_response(&mut stream, "404 Not Found", "text/plain", "Not Found").await,
    }
}

/// The relay endpoint: validate, then run one exchange over this connection.
async fn handle_stream(
    mut stream: TcpStream,
    params: HashMap<String, String>,
    state: AppState,
) -> Result<(), RelayError> {
    let nonce = params.get("nonce").map(String::as_str).unwrap_or("");
    if !state.tokens.consume(nonce) {
        warn!("stream request with missing or reused token");
        return write_response(&mut stream, "403 Forbidden", "text/plain", "Invalid or expired token").await;
    }

    stream.set_nodelay(true)?;
    stream.write_all(SSE_HEADERS.as_bytes()).await?;
    stream.flush().await?;

    let question = params.get("question").map(String::as_str).unwrap_or("");
    let assistant = params.get("assistant_id").map(String::as_str);
    let mut relay = Relay::new(SseWriter::new(stream), state.config.relay_options());

    let outcome = match state.config.credentials(question, assistant) {
        Ok(creds) => {
            let upstream = OpenAiAssistants::new(creds.api_key, &state.config.base_url);
            relay.run(&upstream, &creds.request).await
        }
        Err(e) => relay.reject(e).await,
    };
    if let Err(e) = outcome {
        debug!(error = %e, "exchange ended with error");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- url_decode tests --

    #[test]
    fn test_url_decode_basic() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("a%26b"), "a&b");
        assert_eq!(url_decode("plain"), "plain");
    }

    #[test]
    fn test_url_decode_multibyte() {
        assert_eq!(url_decode("caf%C3%A9"), "caf\u{e9}");
        assert_eq!(url_decode("2%2B2%3F"), "2+2?");
    }

    #[test]
    fn test_url_decode_invalid_escape_passes_through() {
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("%zz"), "%zz");
        assert_eq!(url_decode("%4"), "%4");
    }

    #[test]
    fn test_parse_query_basic() {
        let q = parse_query("question=2%2B2%3F&assistant_id=asst_1&nonce=abc");
        assert_eq!(q.get("question").map(String::as_str), Some("2+2?"));
        assert_eq!(q.get("assistant_id").map(String::as_str), Some("asst_1"));
        assert_eq!(q.get("nonce").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_parse_query_empty_and_valueless() {
        assert!(parse_query("").is_empty());
        let q = parse_query("flag&x=");
        assert_eq!(q.get("flag").map(String::as_str), Some(""));
        assert_eq!(q.get("x").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_query_duplicate_keys_last_wins() {
        let q = parse_query("a=1&a=2");
        assert_eq!(q.get("a").map(String::as_str), Some("2"));
    }

    // -- widget page --

    #[test]
    fn test_sse_headers_disable_buffering() {
        assert!(SSE_HEADERS.contains("Content-Type: text/event-stream"));
        assert!(SSE_HEADERS.contains("Cache-Control: no-cache"));
        assert!(SSE_HEADERS.contains("Connection: keep-alive"));
        assert!(SSE_HEADERS.contains("X-Accel-Buffering: no"));
        assert!(SSE_HEADERS.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_render_index_injects_config() {
        let page = render_index(&["asst_42"]);
        assert!(!page.contains(ROOTS_PLACEHOLDER));
        assert!(!page.contains(ROOT_CONFIG_PLACEHOLDER));
        assert!(page.contains(r#"data-assistant="{&quot;assistantId&quot;:&quot;asst_42&quot;}""#));
    }

    #[test]
    fn test_render_index_one_instance_per_assistant() {
        let page = render_index(&["asst_a", "asst_b"]);
        assert_eq!(page.matches("<div class=\"assistant\" data-assistant=").count(), 2);
        assert!(page.contains("asst_a"));
        assert!(page.contains("asst_b"));
    }

    #[test]
    fn test_render_index_default_instance() {
        let page = render_index(&[]);
        assert_eq!(page.matches("data-assistant=\"{}\"").count(), 1);
    }

    #[test]
    fn test_render_index_escapes_attribute() {
        let page = render_index(&["\"><script>alert(1)</script>"]);
        assert!(!page.contains("<script>alert(1)"));
    }

    #[test]
    fn test_assistant_ids_split() {
        let param = " asst_a, ,asst_b ".to_string();
        assert_eq!(assistant_ids(Some(&param)), vec!["asst_a", "asst_b"]);
        assert!(assistant_ids(None).is_empty());
    }

    #[test]
    fn test_index_html_mounts_every_root() {
        assert!(INDEX_HTML.contains("querySelectorAll('[data-assistant]')"));
        assert!(!INDEX_HTML.contains("getElementById"));
    }

    #[test]
    fn test_index_html_listens_for_all_event_kinds() {
        for kind in ["heartbeat", "text-delta", "completion", "error"] {
            assert!(INDEX_HTML.contains(&format!("addEventListener('{kind}'")));
        }
    }

    #[test]
    fn test_index_html_guards_stale_generations() {
        assert!(INDEX_HTML.contains("++this.generation"));
        assert!(INDEX_HTML.contains("gen === this.generation"));
    }

    #[test]
    fn test_index_html_has_download_export() {
        assert!(INDEX_HTML.contains("assistant-conversation.txt"));
        assert!(INDEX_HTML.contains("lines.join('\\n\\n')"));
    }

    #[test]
    fn test_index_html_no_external_deps() {
        assert!(!INDEX_HTML.contains("cdn."));
        assert!(!INDEX_HTML.contains("jquery"));
    }

    // -- server smoke tests --

    async fn spawn_server(config: Config) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run_server(listener, AppState::new(config)));
        addr
    }

    async fn raw_get(addr: std::net::SocketAddr, target: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let req = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let addr = spawn_server(Config::default()).await;
        let resp = raw_get(addr, "/nope").await;
        assert!(resp.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_token_endpoint_returns_json() {
        let addr = spawn_server(Config::default()).await;
        let resp = raw_get(addr, "/token").await;
        assert!(resp.starts_with("HTTP/1.1 200"));
        let body = resp.split("\r\n\r\n").nth(1).unwrap();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["token"].as_str().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_stream_without_token_forbidden() {
        let addr = spawn_server(Config::default()).await;
        let resp = raw_get(addr, "/stream?question=hi").await;
        assert!(resp.starts_with("HTTP/1.1 403"));
    }

    #[tokio::test]
    async fn test_stream_missing_credentials_yields_single_error() {
        let addr = spawn_server(Config::default()).await;
        let token_resp = raw_get(addr, "/token").await;
        let body = token_resp.split("\r\n\r\n").nth(1).unwrap();
        let token = serde_json::from_str::<serde_json::Value>(body).unwrap()["token"]
            .as_str()
            .unwrap()
            .to_string();

        let resp = raw_get(addr, &format!("/stream?question=hi&nonce={token}")).await;
        assert!(resp.starts_with("HTTP/1.1 200"));
        assert!(resp.contains("text/event-stream"));
        assert!(resp.ends_with(
            "event: error\ndata: \"API key or Assistant ID not configured.\"\n\n"
        ));
        assert_eq!(resp.matches("event: ").count(), 1);

        // the token is spent
        let again = raw_get(addr, &format!("/stream?question=hi&nonce={token}")).await;
        assert!(again.starts_with("HTTP/1.1 403"));
    }

    async fn raw_request(addr: std::net::SocketAddr, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    #[tokio::test]
    async fn test_oversized_stream_request_gets_error_event() {
        let addr = spawn_server(Config::default()).await;
        let question = "%E4%BD%A0".repeat(1000);
        let request = format!("GET /stream?nonce=x&question={question} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let resp = raw_request(addr, request.as_bytes()).await;
        assert!(resp.starts_with("HTTP/1.1 200"));
        assert!(resp.ends_with("event: error\ndata: \"Question too long.\"\n\n"));
    }

    #[tokio::test]
    async fn test_oversized_uri_is_414() {
        let addr = spawn_server(Config::default()).await;
        let request = format!("GET /{} HTTP/1.1\r\nHost: localhost\r\n\r\n", "a".repeat(9000));
        let resp = raw_request(addr, request.as_bytes()).await;
        assert!(resp.starts_with("HTTP/1.1 414"));
    }

    #[tokio::test]
    async fn test_too_many_headers_is_431() {
        let addr = spawn_server(Config::default()).await;
        let mut request = String::from("GET /token HTTP/1.1\r\n");
        for i in 0..(MAX_HEADERS + 8) {
            request.push_str(&format!("X-Extra-{i}: v\r\n"));
        }
        request.push_str("\r\n");
        let resp = raw_request(addr, request.as_bytes()).await;
        assert!(resp.starts_with("HTTP/1.1 431"));
    }

    #[tokio::test]
    async fn test_garbage_request_is_400() {
        let addr = spawn_server(Config::default()).await;
        let resp = raw_request(addr, b"\x01\x02 nonsense\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 400"));
    }
}
