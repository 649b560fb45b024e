//! Startup orchestration.
//!
//! # Responsibilities
//! - Read the bootstrap descriptor and pick the origin
//! - Read the origin once and build the initial components
//! - Start the watch pipeline and hand back its handle
//!
//! # Design Decisions
//! - Fail fast: any error before the pipeline runs is fatal
//! - No process globals; everything travels in `Bootstrap`
//! - After startup only the pipeline mutates components

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{BootstrapDescriptor, DescriptorError, RuntimeOverrides};
use crate::pipeline::{ChangeEvent, ChangeHook, Pipeline, PipelineHandle, PipelineOptions};
use crate::registry::ReloadReport;
use crate::source::{self, SourceError, SourceOptions};

/// Fatal startup errors.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("configuration source failed: {0}")]
    Source(#[from] SourceError),
}

/// Everything needed to bring the engine up.
pub struct Bootstrap {
    descriptor: BootstrapDescriptor,
    source_options: SourceOptions,
    pipeline_options: PipelineOptions,
    hook: Option<ChangeHook>,
}

impl Bootstrap {
    pub fn new(descriptor: BootstrapDescriptor) -> Self {
        Self {
            descriptor,
            source_options: SourceOptions::default(),
            pipeline_options: PipelineOptions::default(),
            hook: None,
        }
    }

    /// Read the descriptor at `path`.
    pub fn from_path(path: &Path) -> Result<Self, BootstrapError> {
        Ok(Self::new(BootstrapDescriptor::load(path)?))
    }

    pub fn with_overrides(mut self, overrides: RuntimeOverrides) -> Self {
        self.pipeline_options.overrides = overrides;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.source_options.poll_interval = poll_interval;
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.pipeline_options.queue_depth = queue_depth;
        self
    }

    /// Run `hook` for every change event, after it has been applied.
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ChangeEvent, Option<&ReloadReport>) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn descriptor(&self) -> &BootstrapDescriptor {
        &self.descriptor
    }

    /// Open the origin, build the initial components and start watching.
    pub async fn start(self) -> Result<PipelineHandle, BootstrapError> {
        self.descriptor.check()?;
        let origin = self.descriptor.origin()?;
        let source = source::open(&self.descriptor, &self.source_options)?;
        tracing::info!(
            engine = %origin,
            origin = %source.origin(),
            format = %self.descriptor.format(),
            "Configuration origin selected"
        );

        let mut pipeline = Pipeline::new(source, self.pipeline_options);
        if let Some(hook) = self.hook {
            pipeline = pipeline.with_hook(move |event, report| hook(event, report));
        }

        let report = pipeline.init().await?;
        if report.is_clean() {
            tracing::info!(report = %report, "Initial components ready");
        } else {
            tracing::warn!(
                report = %report,
                failures = report.failures().len(),
                "Started with components missing"
            );
        }

        Ok(pipeline.start().await?)
    }
}
