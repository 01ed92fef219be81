//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use resilient_client::auth::{AccessToken, Token, TokenSource};
use resilient_client::error::AuthError;
use resilient_client::events::Observer;
use resilient_client::http::dispatch::Dispatcher;
use resilient_client::http::transport::BoxError;
use resilient_client::http::{ApiRequest, ApiResponse, Transport, TransportError};
use resilient_client::Event;

/// One scripted transport step.
#[derive(Clone)]
pub enum Step {
    Reply(ApiResponse),
    Fail(TransportErrorFactory),
}

/// `TransportError` is not `Clone`; steps build a fresh one per send.
#[derive(Clone)]
pub struct TransportErrorFactory(Arc<dyn Fn() -> TransportError + Send + Sync>);

pub fn reply(status: u16, body: &str) -> Step {
    Step::Reply(ApiResponse::from_status(status, body.to_string()))
}

pub fn reply_with_headers(status: u16, body: &str, headers: &[(&'static str, &'static str)]) -> Step {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    Step::Reply(ApiResponse::new(
        StatusCode::from_u16(status).unwrap(),
        map,
        body.to_string(),
    ))
}

pub fn fail(make: impl Fn() -> TransportError + Send + Sync + 'static) -> Step {
    Step::Fail(TransportErrorFactory(Arc::new(make)))
}

/// Transport that plays back a script and records what it was asked to send.
///
/// Once the script runs out the last step repeats.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    sent: Mutex<Vec<ApiRequest>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Self::with_latency(steps, Duration::ZERO)
    }

    pub fn with_latency(steps: impl IntoIterator<Item = Step>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            latency,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn sent(&self) -> Vec<ApiRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        match script.pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().unwrap_or_else(|| reply(200, "")),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.sent.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.next_step() {
            Step::Reply(response) => Ok(response),
            Step::Fail(make) => Err((make.0)()),
        }
    }
}

/// Observer keeping every event it sees.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Arc<Event>>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Arc<Event>> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }
}

#[async_trait]
impl Observer for Recorder {
    async fn on_event(&self, event: Arc<Event>) -> Result<(), BoxError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Token source minting `token-1`, `token-2`, ... and counting calls.
pub struct CountingSource {
    minted: AtomicUsize,
    refreshes: AtomicUsize,
    delay: Duration,
}

impl CountingSource {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            minted: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            delay,
        })
    }

    /// Acquisitions and refreshes combined.
    pub fn minted(&self) -> usize {
        self.minted.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    async fn mint(&self) -> Token {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        Token::new(AccessToken::new(format!("token-{n}")), None)
    }
}

#[async_trait]
impl TokenSource for CountingSource {
    fn kind(&self) -> &'static str {
        "counting"
    }

    async fn acquire(&self, _dispatcher: &Dispatcher) -> Result<Token, AuthError> {
        Ok(self.mint().await)
    }

    async fn refresh(&self, _stale: &Token, _dispatcher: &Dispatcher) -> Result<Token, AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(self.mint().await)
    }
}

/// A request as seen by the mock backend.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<SeenRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).into_owned();

    Some(SeenRequest {
        method,
        path,
        headers,
        body,
    })
}

fn status_line(status: u16) -> String {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    format!("{status} {reason}")
}

/// Start a programmable mock backend on an ephemeral port.
///
/// The handler sees each request and answers `(status, extra headers, body)`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(SeenRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, Vec<(String, String)>, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, headers, body) = f(request).await;
                        let mut response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                            status_line(status),
                            body.len()
                        );
                        for (name, value) in headers {
                            response.push_str(&format!("{name}: {value}\r\n"));
                        }
                        response.push_str("\r\n");
                        response.push_str(&body);
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
