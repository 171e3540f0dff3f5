//! In-memory queue service for flow tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::QueueApi;
use crate::error::{GateError, GateOperation};
use crate::status::{GateToken, QueueStatus};

/// Scripted queue: status probes pop from a script, falling back to "waiting".
#[derive(Default)]
pub struct FakeQueue {
    script: Mutex<VecDeque<Result<QueueStatus, GateError>>>,
    register_error: Option<GateError>,
    enter_error: Option<GateError>,
    exit_error: Option<GateError>,
    query_delay: Duration,
    pub registers: AtomicUsize,
    pub queries: AtomicUsize,
    pub enters: AtomicUsize,
    pub exits: AtomicUsize,
    pub blocking_exits: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    tokens: Mutex<Vec<String>>,
}

impl FakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(statuses: impl IntoIterator<Item = QueueStatus>) -> Self {
        Self {
            script: Mutex::new(statuses.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    pub fn then_error(self, error: GateError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn failing_register(mut self, error: GateError) -> Self {
        self.register_error = Some(error);
        self
    }

    pub fn failing_enter(mut self, error: GateError) -> Self {
        self.enter_error = Some(error);
        self
    }

    pub fn failing_exit(mut self, error: GateError) -> Self {
        self.exit_error = Some(error);
        self
    }

    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn total_exits(&self) -> usize {
        Self::count(&self.exits) + Self::count(&self.blocking_exits)
    }

    pub fn seen_tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    async fn next_status(&self) -> Result<QueueStatus, GateError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.query_delay.is_zero() {
            tokio::time::sleep(self.query_delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(QueueStatus::waiting(1, "still waiting")))
    }
}

#[async_trait]
impl QueueApi for FakeQueue {
    async fn register_entry(&self) -> Result<GateToken, GateError> {
        let n = self.registers.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.register_error {
            Some(e) => Err(e.clone()),
            None => Ok(GateToken::new(format!("T{n}"))),
        }
    }

    async fn query_entry_status(&self, token: &GateToken) -> Result<QueueStatus, GateError> {
        self.tokens.lock().unwrap().push(token.as_str().to_string());
        self.next_status().await
    }

    async fn enter_capacity(&self) -> Result<(), GateError> {
        self.enters.fetch_add(1, Ordering::SeqCst);
        match &self.enter_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn query_capacity_status(&self) -> Result<QueueStatus, GateError> {
        self.next_status().await
    }

    async fn exit_capacity(&self) -> Result<(), GateError> {
        self.exits.fetch_add(1, Ordering::SeqCst);
        match &self.exit_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn exit_capacity_blocking(&self) -> Result<(), GateError> {
        self.blocking_exits.fetch_add(1, Ordering::SeqCst);
        match &self.exit_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

pub fn unavailable(operation: GateOperation) -> GateError {
    GateError::rejected(operation, 503)
}
