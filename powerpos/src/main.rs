// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Intra-day power position reporting service.

mod source;

use std::process;
use std::sync::Arc;

use core_types::config::{ConfigError, ServiceSettings};
use dead_letter_queue::{DeadLetterError, DeadLetterQueue};
use engine_api::{Engine, EngineError};
use extraction_engine::{ExtractionEngine, ExtractionSettings};
use log::info;
use snapshot_sinks::{ExecutionAuditLog, PositionReportWriter, SinkError};
use thiserror::Error;
use trading_calendar::TradingCalendar;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("powerpos failed: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let settings = ServiceSettings::load()?;
    let calendar = TradingCalendar::new(settings.zone()?);

    let reports = Arc::new(PositionReportWriter::new(&settings.output_directory)?);
    let audit = Arc::new(ExecutionAuditLog::new(&settings.audit_directory)?);
    let failures = Arc::new(DeadLetterQueue::open(&settings.dlq_directory)?);
    let engine = ExtractionEngine::new(
        ExtractionSettings {
            interval: settings.interval(),
            retry_attempts: settings.retry_attempts,
            retry_delay: settings.retry_delay(),
            run_time: settings.run_time,
        },
        calendar,
        Arc::new(source::SimulatedTradeSource),
        reports,
        audit,
        failures,
    );

    engine.start()?;
    info!(
        "extracting every {} minute(s) into {:?}; Ctrl-C to stop",
        settings.interval_minutes, settings.output_directory
    );
    wait_for_interrupt()?;
    engine.stop()?;
    Ok(())
}

fn wait_for_interrupt() -> Result<(), AppError> {
    let waiter = tokio::runtime::Runtime::new()?;
    waiter.block_on(tokio::signal::ctrl_c())?;
    Ok(())
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    DeadLetter(#[from] DeadLetterError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
