// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Extraction engine: drains the dead letter queue at startup, runs an
//! initial extraction, then keeps extracting on a fixed interval until
//! cancelled. Business failures never stop the loop.

mod capabilities;
mod runner;

pub use capabilities::{AuditSink, BoxError, FailureStore, ReportSink, TradeSource};
pub use runner::{ExtractionError, ExtractionRunner, RUNTIME_OVERRIDE_ENV};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use core_types::types::FailedExtraction;
use engine_api::{Engine, EngineError, EngineHealth, EngineResult, HealthStatus};
use log::{error, info};
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use trading_calendar::TradingCalendar;

/// Runtime knobs for the engine, distilled from the service settings.
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub interval: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    /// Fixed extraction instant from configuration; the environment override
    /// still wins over this per run.
    pub run_time: Option<DateTime<Utc>>,
}

pub struct ExtractionEngine {
    inner: Arc<EngineInner>,
}

impl ExtractionEngine {
    pub fn new(
        settings: ExtractionSettings,
        calendar: TradingCalendar,
        source: Arc<dyn TradeSource>,
        reports: Arc<dyn ReportSink>,
        audit: Arc<dyn AuditSink>,
        failures: Arc<dyn FailureStore>,
    ) -> Self {
        let interval = settings.interval;
        let runner = ExtractionRunner::new(
            settings,
            calendar,
            source,
            reports,
            audit,
            failures.clone(),
        );
        Self {
            inner: Arc::new(EngineInner {
                runner,
                failures,
                interval,
                state: Mutex::new(EngineRuntimeState::Stopped),
                health: Mutex::new(EngineHealth::default()),
            }),
        }
    }
}

impl Engine for ExtractionEngine {
    fn start(&self) -> EngineResult<()> {
        self.inner.start()
    }

    fn stop(&self) -> EngineResult<()> {
        self.inner.stop()
    }

    fn health(&self) -> EngineHealth {
        self.inner.health.lock().clone()
    }
}

struct EngineInner {
    runner: ExtractionRunner,
    failures: Arc<dyn FailureStore>,
    interval: Duration,
    state: Mutex<EngineRuntimeState>,
    health: Mutex<EngineHealth>,
}

enum EngineRuntimeState {
    Stopped,
    Running(RuntimeBundle),
}

impl EngineRuntimeState {
    fn take_running(&mut self) -> Option<RuntimeBundle> {
        match std::mem::replace(self, EngineRuntimeState::Stopped) {
            EngineRuntimeState::Running(bundle) => Some(bundle),
            EngineRuntimeState::Stopped => None,
        }
    }
}

struct RuntimeBundle {
    runtime: Runtime,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl EngineInner {
    fn start(self: &Arc<Self>) -> EngineResult<()> {
        let mut guard = self.state.lock();
        if matches!(*guard, EngineRuntimeState::Running(_)) {
            return Err(EngineError::AlreadyRunning);
        }
        self.set_health(HealthStatus::Starting, None);
        let runtime = Runtime::new().map_err(|err| EngineError::Failure {
            source: Box::new(err),
        })?;
        let cancel = CancellationToken::new();
        let worker = Arc::clone(self);
        let cancel_clone = cancel.clone();
        let handle = runtime.spawn(async move {
            worker.run(cancel_clone).await;
        });
        *guard = EngineRuntimeState::Running(RuntimeBundle {
            runtime,
            handle,
            cancel,
        });
        info!("extraction engine started");
        Ok(())
    }

    fn stop(&self) -> EngineResult<()> {
        let mut guard = self.state.lock();
        let Some(bundle) = guard.take_running() else {
            return Err(EngineError::NotRunning);
        };
        bundle.cancel.cancel();
        if let Err(err) = bundle.runtime.block_on(async { bundle.handle.await }) {
            error!("extraction loop join failed: {err}");
        }
        self.set_health(HealthStatus::Stopped, None);
        info!("extraction engine stopped");
        Ok(())
    }

    fn set_health(&self, status: HealthStatus, detail: Option<String>) {
        let mut guard = self.health.lock();
        guard.status = status;
        guard.detail = detail;
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("extraction loop starting");
        self.set_health(HealthStatus::Ready, None);
        self.drain_dead_letters(&cancel).await;
        if !cancel.is_cancelled() {
            self.tick(&cancel).await;
        }
        // Delayed missed-tick behavior coalesces ticks skipped while a long
        // run was in flight into a single late tick; runs never overlap.
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick(&cancel).await;
        }
        self.set_health(HealthStatus::Stopped, None);
        info!("extraction loop exiting");
    }

    async fn tick(&self, cancel: &CancellationToken) {
        match self.runner.run(Utc::now(), cancel).await {
            Ok(()) => self.set_health(HealthStatus::Ready, None),
            Err(err) => {
                // Attempt failures land in the audit trail or the DLQ; only
                // a dead letter that could not be persisted surfaces here.
                error!("extraction run lost its dead letter: {err}");
                self.set_health(HealthStatus::Degraded, Some(err.to_string()));
            }
        }
    }

    /// Replays every stored failure in FIFO order. A failed replay is
    /// re-enqueued with a bumped retry count; cancellation stops the drain
    /// and puts the unreplayed tail back untouched.
    async fn drain_dead_letters(&self, cancel: &CancellationToken) {
        let entries = match self.failures.dequeue_all() {
            Ok(entries) => entries,
            Err(err) => {
                error!("dead letter drain could not read the queue: {err}");
                return;
            }
        };
        if entries.is_empty() {
            return;
        }
        info!("replaying {} dead-lettered extraction(s)", entries.len());
        let mut pending: VecDeque<FailedExtraction> = entries.into();
        while let Some(entry) = pending.pop_front() {
            if cancel.is_cancelled() {
                pending.push_front(entry);
                break;
            }
            if self.runner.run_recovery(&entry, cancel).await {
                continue;
            }
            if cancel.is_cancelled() {
                // The attempt observed cancellation; keep the entry as-is.
                pending.push_front(entry);
                break;
            }
            let mut updated = entry;
            updated.retry_count += 1;
            updated.failed_at_utc = Utc::now();
            if let Err(err) = self.failures.enqueue(updated) {
                error!("failed to re-enqueue dead letter: {err}");
            }
        }
        for entry in pending {
            if let Err(err) = self.failures.enqueue(entry) {
                error!("failed to restore dead letter after cancellation: {err}");
            }
        }
    }
}
