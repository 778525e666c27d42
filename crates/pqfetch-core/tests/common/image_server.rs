//! Minimal HTTP/1.1 server with scripted per-path replies for integration tests.
//!
//! Each path has a sequence of replies; request N gets reply N, and the last
//! reply repeats once the sequence is used up. Unknown paths get 404. Every
//! request is counted per path.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    /// Status line code and body.
    Body(u16, Vec<u8>),
    /// Accept the request, stay silent for this long, then close.
    Hang(Duration),
    /// Wait, then answer 200 with the body.
    Slow(Duration, Vec<u8>),
}

impl Reply {
    pub fn ok(len: usize) -> Self {
        Reply::Body(200, body(len))
    }

    pub fn slow(delay: Duration, len: usize) -> Self {
        Reply::Slow(delay, body(len))
    }

    pub fn status(code: u16) -> Self {
        Reply::Body(code, b"error".to_vec())
    }
}

fn body(len: usize) -> Vec<u8> {
    (0u8..=250).cycle().take(len).collect()
}

#[derive(Default)]
struct State {
    routes: HashMap<String, Vec<Reply>>,
    hits: HashMap<String, usize>,
}

pub struct ImageServer {
    base: String,
    state: Arc<Mutex<State>>,
}

impl ImageServer {
    /// Full URL for `path` (e.g. `"/a.jpg"`).
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Requests seen for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.state.lock().unwrap().hits.get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state.lock().unwrap().hits.values().sum()
    }
}

/// Starts a server in a background thread. The server runs until the process exits.
pub fn start(routes: Vec<(&str, Vec<Reply>)>) -> ImageServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(Mutex::new(State {
        routes: routes
            .into_iter()
            .map(|(p, r)| (p.to_string(), r))
            .collect(),
        hits: HashMap::new(),
    }));
    let shared = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let state = Arc::clone(&shared);
            thread::spawn(move || handle(stream, &state));
        }
    });
    ImageServer {
        base: format!("http://127.0.0.1:{}", port),
        state,
    }
}

fn handle(mut stream: TcpStream, state: &Mutex<State>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let Some(path) = request_path(request) else {
        let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n");
        return;
    };

    let reply = {
        let mut state = state.lock().unwrap();
        let hit = {
            let count = state.hits.entry(path.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        state
            .routes
            .get(path)
            .and_then(|replies| replies.get(hit - 1).or_else(|| replies.last()))
            .cloned()
            .unwrap_or_else(|| Reply::status(404))
    };

    let (code, body) = match reply {
        Reply::Hang(d) => {
            thread::sleep(d);
            return;
        }
        Reply::Slow(d, body) => {
            thread::sleep(d);
            (200, body)
        }
        Reply::Body(code, body) => (code, body),
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        code,
        reason(code),
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(&body);
}

fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

/// Path (without query) of a `GET /path?query HTTP/1.1` request line.
fn request_path(request: &str) -> Option<&str> {
    let line = request.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    if !method.eq_ignore_ascii_case("GET") {
        return None;
    }
    let target = parts.next()?;
    Some(target.split_once('?').map_or(target, |(path, _)| path))
}
