#![cfg(test)]

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::GraphSettings;
use crate::graph::{Params, RetryDelay, Transport};
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::{Error, Result};

pub fn graph_settings() -> GraphSettings {
    GraphSettings {
        base_url: "https://graph.test".to_string(),
        version: "v10.0".to_string(),
        connections_limit: 4,
        delay_per_request: Duration::ZERO,
        retry_attempts: 0,
        retry_delay: RetryDelay::Const,
        request_timeout: Duration::from_secs(5),
    }
}

struct Route {
    failures_left: usize,
    failed: usize,
    response: Value,
}

/// Transport answering from a per-path script and recording every call.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: StdMutex<HashMap<String, Route>>,
    calls: StdMutex<Vec<(String, Params)>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Always answer `path` with `response`.
    pub fn on(&self, path: &str, response: Value) {
        self.fail_then(path, 0, response);
    }

    /// Fail the first `failures` calls to `path` transiently, then answer.
    pub fn fail_then(&self, path: &str, failures: usize, response: Value) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                failures_left: failures,
                failed: 0,
                response,
            },
        );
    }

    /// Fail every call to `path`.
    pub fn fail(&self, path: &str) {
        self.fail_then(path, usize::MAX, Value::Null);
    }

    pub fn calls(&self) -> Vec<(String, Params)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn answer(&self, path: &str) -> Result<Value> {
        let mut routes = self.routes.lock().unwrap();
        let Some(route) = routes.get_mut(path) else {
            return Err(Error::Transport(format!("no scripted route for {path}")));
        };
        if route.failures_left > 0 {
            route.failures_left -= 1;
            route.failed += 1;
            return Err(Error::Transport(format!("{path}: failure {}", route.failed)));
        }
        Ok(route.response.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &Url, params: &Params) -> Result<Value> {
        let path = url.path().to_string();
        self.calls.lock().unwrap().push((path.clone(), params.clone()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.answer(&path)
    }
}

/// Notifier that keeps every notification it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records, then reports a delivery failure.
    pub fn failing() -> Self {
        Self {
            seen: Mutex::default(),
            fail: true,
        }
    }

    pub async fn seen(&self) -> Vec<Notification> {
        self.seen.lock().await.clone()
    }

    pub async fn kinds(&self) -> Vec<NotificationKind> {
        self.seen.lock().await.iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.seen.lock().await.push(notification.clone());
        if self.fail {
            return Err(Error::BackendMessage("notifier offline".to_string()));
        }
        Ok(())
    }
}

/// A raw HTTP request as a local endpoint received it.
#[derive(Debug)]
pub struct ReceivedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

/// Local endpoint that accepts one request and answers it with `status`.
/// Returns its URL and a handle resolving to the request it saw.
pub async fn one_shot_http(status: u16) -> (String, JoinHandle<ReceivedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            let n = socket.read(&mut chunk).await.expect("read");
            assert!(n > 0, "connection closed before the request head");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        let mut request = ReceivedRequest {
            head,
            body: buf[head_end..].to_vec(),
        };
        let length: usize = request
            .header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        while request.body.len() < length {
            let n = socket.read(&mut chunk).await.expect("read body");
            assert!(n > 0, "connection closed before the request body");
            request.body.extend_from_slice(&chunk[..n]);
        }

        let reply =
            format!("HTTP/1.1 {status} Scripted\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        socket.write_all(reply.as_bytes()).await.expect("write reply");
        socket.shutdown().await.ok();
        request
    });

    (format!("http://{addr}/hook"), handle)
}
