//! Service composition root.
//!
//! `BlinkService` owns one instance of every pipeline component and is the only
//! place they get wired together. Lifecycle:
//!
//! 1. [`BlinkService::new`] builds the buffer, broadcaster, appender and estimator.
//! 2. [`BlinkService::start`] spawns the periodic estimator task.
//! 3. Transports obtain an [`IngestGateway`] and subscribe through the broadcaster.
//! 4. [`BlinkService::shutdown`] stops the estimator, closes every subscriber
//!    queue and flushes the sample log.

use crate::broadcast::Broadcaster;
use crate::config::Settings;
use crate::core::{RecordAppender, SampleClock};
use crate::data::estimator::{EstimatorTask, SpectralEstimator, TickOutcome};
use crate::data::sample_buffer::SampleBuffer;
use crate::data::storage::CsvAppender;
use crate::error::{AppResult, DaqError};
use crate::gateway::IngestGateway;
use std::sync::Arc;
use tracing::info;

/// The running sample pipeline.
pub struct BlinkService {
    settings: Settings,
    clock: SampleClock,
    buffer: Arc<SampleBuffer>,
    broadcaster: Arc<Broadcaster>,
    appender: Arc<dyn RecordAppender>,
    estimator: Arc<SpectralEstimator>,
    estimator_task: Option<EstimatorTask>,
}

impl BlinkService {
    /// Build the pipeline with the CSV log from `settings.storage`.
    pub fn new(settings: Settings) -> AppResult<Self> {
        settings.validate()?;
        let appender = Arc::new(CsvAppender::from_config(&settings.storage)?);
        Ok(Self::with_appender(settings, appender))
    }

    /// Build the pipeline around a caller-supplied appender.
    pub fn with_appender(settings: Settings, appender: Arc<dyn RecordAppender>) -> Self {
        let buffer = Arc::new(SampleBuffer::from_config(&settings.buffer));
        let broadcaster = Arc::new(Broadcaster::new(
            settings.broadcast.subscriber_queue_capacity,
        ));
        let estimator = Arc::new(SpectralEstimator::new(settings.estimator));

        Self {
            settings,
            clock: SampleClock::new(),
            buffer,
            broadcaster,
            appender,
            estimator,
            estimator_task: None,
        }
    }

    /// Spawn the estimator task. Calling it again while running is a no-op.
    pub fn start(&mut self) {
        if self.estimator_task.as_ref().is_some_and(|t| t.is_running()) {
            return;
        }
        info!(
            name = %self.settings.application.name,
            max_samples = self.buffer.max_samples(),
            window_seconds = self.buffer.window_seconds(),
            "starting sample pipeline"
        );
        self.estimator_task = Some(EstimatorTask::spawn(
            self.estimator.clone(),
            self.buffer.clone(),
            self.broadcaster.clone(),
            self.clock,
        ));
    }

    /// Whether the estimator task is running.
    pub fn is_running(&self) -> bool {
        self.estimator_task.as_ref().is_some_and(|t| t.is_running())
    }

    /// A gateway sharing this service's components.
    pub fn gateway(&self) -> IngestGateway {
        IngestGateway::new(
            self.buffer.clone(),
            self.broadcaster.clone(),
            self.appender.clone(),
            self.clock,
        )
    }

    /// Run one estimator tick on the calling thread.
    pub fn tick_now(&self) -> TickOutcome {
        self.estimator
            .tick(&self.buffer, &self.broadcaster, &self.clock)
    }

    /// Loaded settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Shared sample buffer.
    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    /// Shared broadcaster.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// The service clock used to stamp readings.
    pub fn clock(&self) -> SampleClock {
        self.clock
    }

    /// Stop ticking, end all subscriber delivery and flush the log.
    ///
    /// Records already appended stay durable. Safe to call more than once.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        if let Some(mut task) = self.estimator_task.take() {
            task.stop().await;
        }
        self.broadcaster.close();

        let appender = self.appender.clone();
        let flushed = tokio::task::spawn_blocking(move || appender.flush())
            .await
            .map_err(|e| DaqError::Persistence(format!("flush task failed: {e}")))
            .and_then(|r| r);

        match flushed {
            Ok(()) => {
                info!("sample pipeline shut down");
                Ok(())
            }
            Err(e) => Err(DaqError::ShutdownFailed(vec![e])),
        }
    }
}
