//! Shared test doubles for the realtime integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use projectx_realtime::auth::{AuthError, TokenProvider};
use projectx_realtime::transport::{
    CloseEvent, CloseHandler, EventHandler, OpenHandler, StreamTransport, TransportError,
};

/// Installs a test-writer tracing subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scripted in-memory transport.
///
/// Stores registered handlers and exposes `trigger_*` helpers to simulate
/// server pushes and connection-state changes. Connect and invoke results
/// can be scripted per call; unscripted calls succeed.
pub struct MockTransport {
    connect_results: Mutex<VecDeque<Result<(), TransportError>>>,
    connect_urls: Mutex<Vec<String>>,
    invocations: Mutex<Vec<(String, Vec<Value>)>>,
    invoke_results: Mutex<VecDeque<Result<(), TransportError>>>,
    event_handlers: Mutex<HashMap<String, EventHandler>>,
    open_handlers: Mutex<Vec<OpenHandler>>,
    close_handlers: Mutex<Vec<CloseHandler>>,
    close_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connect_results: Mutex::new(VecDeque::new()),
            connect_urls: Mutex::new(Vec::new()),
            invocations: Mutex::new(Vec::new()),
            invoke_results: Mutex::new(VecDeque::new()),
            event_handlers: Mutex::new(HashMap::new()),
            open_handlers: Mutex::new(Vec::new()),
            close_handlers: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        })
    }

    /// Scripts the next `connect` call to fail with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.connect_results.lock().unwrap().push_back(Err(error));
    }

    /// Scripts the next `invoke` call to fail with `error`.
    pub fn fail_next_invoke(&self, error: TransportError) {
        self.invoke_results.lock().unwrap().push_back(Err(error));
    }

    pub fn connect_urls(&self) -> Vec<String> {
        self.connect_urls.lock().unwrap().clone()
    }

    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocations_of(&self, method: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == method)
            .count()
    }

    pub fn clear_invocations(&self) {
        self.invocations.lock().unwrap().clear();
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Simulates an established connection (initial or reconnect).
    pub fn trigger_open(&self) {
        let handlers: Vec<OpenHandler> = self.open_handlers.lock().unwrap().clone();
        for handler in handlers {
            handler();
        }
    }

    /// Simulates a dropped (retrying) or terminal (not retrying) close.
    pub fn trigger_close(&self, retrying: bool) {
        let handlers: Vec<CloseHandler> = self.close_handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(CloseEvent { retrying });
        }
    }

    /// Simulates a named server event with raw invocation arguments.
    pub fn trigger_event(&self, name: &str, args: Vec<Value>) {
        let handler = self.event_handlers.lock().unwrap().get(name).cloned();
        if let Some(handler) = handler {
            handler(args);
        }
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        self.connect_urls.lock().unwrap().push(url.to_string());
        let scripted = self.connect_results.lock().unwrap().pop_front();
        match scripted {
            Some(Err(error)) => Err(error),
            _ => {
                self.trigger_open();
                Ok(())
            }
        }
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError> {
        self.invocations
            .lock()
            .unwrap()
            .push((method.to_string(), args));
        match self.invoke_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(()),
        }
    }

    fn on_event(&self, name: &str, handler: EventHandler) {
        self.event_handlers
            .lock()
            .unwrap()
            .insert(name.to_string(), handler);
    }

    fn on_open(&self, handler: OpenHandler) {
        self.open_handlers.lock().unwrap().push(handler);
    }

    fn on_close(&self, handler: CloseHandler) {
        self.close_handlers.lock().unwrap().push(handler);
    }
}

/// Token provider that counts calls and rotates the token on refresh.
pub struct MockTokenProvider {
    get_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    current: Mutex<String>,
}

impl MockTokenProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            get_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            current: Mutex::new("token-0".to_string()),
        })
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    async fn get_token(&self) -> Result<String, AuthError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.current.lock().unwrap().clone())
    }

    async fn refresh_token(&self) -> Result<String, AuthError> {
        let count = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("token-{}", count);
        *self.current.lock().unwrap() = token.clone();
        Ok(token)
    }
}

/// Token provider whose `get_token` always fails.
pub struct FailingTokenProvider;

#[async_trait]
impl TokenProvider for FailingTokenProvider {
    async fn get_token(&self) -> Result<String, AuthError> {
        Err(AuthError::TokenUnavailable("no session".to_string()))
    }

    async fn refresh_token(&self) -> Result<String, AuthError> {
        Err(AuthError::RefreshFailed("no session".to_string()))
    }
}
