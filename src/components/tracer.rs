//! Tracer (OpenTelemetry SDK, Zipkin export).
//!
//! Spans are batched on the Tokio runtime and posted to `trace_url` as
//! Zipkin v2 JSON. Without a collector URL spans are sampled but dropped.

use std::fmt;

use async_trait::async_trait;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::{self, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;

use crate::components::{Component, ComponentError, ComponentKind};
use crate::config::validation::{self, ValidationError};
use crate::config::{AppConfig, TraceConfig};

/// Tracer provider configured with the service's sampler and resource.
///
/// The batch processor is shut down when the last handle is dropped.
pub struct Tracer {
    config: TraceConfig,
    provider: TracerProvider,
}

impl Tracer {
    /// Named tracer for instrumenting request handlers.
    pub fn tracer(&self) -> opentelemetry_sdk::trace::Tracer {
        self.provider.tracer(self.config.service_name.clone())
    }

    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Whether spans leave the process.
    pub fn exports(&self) -> bool {
        !self.config.trace_url.trim().is_empty()
    }

    fn sampler(config: &TraceConfig) -> Result<Sampler, ComponentError> {
        let sampler = match config.sampler.to_ascii_lowercase().as_str() {
            "const" if config.rate > 0.0 => Sampler::AlwaysOn,
            "const" => Sampler::AlwaysOff,
            "" | "probabilistic" => Sampler::TraceIdRatioBased(config.rate),
            "parent" => Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(config.rate))),
            other => {
                return Err(ComponentError::Unsupported {
                    kind: ComponentKind::Tracer,
                    reason: format!("sampler '{}'", other),
                })
            }
        };
        Ok(sampler)
    }

    fn exporter(config: &TraceConfig) -> Result<opentelemetry_zipkin::Exporter, ComponentError> {
        opentelemetry_zipkin::new_pipeline()
            .with_service_name(config.service_name.clone())
            .with_collector_endpoint(config.trace_url.trim())
            .init_exporter()
            .map_err(|e| ComponentError::InvalidConfig {
                kind: ComponentKind::Tracer,
                reason: format!("collector '{}': {}", config.trace_url, e),
            })
    }
}

#[async_trait]
impl Component for Tracer {
    type Config = TraceConfig;

    const KIND: ComponentKind = ComponentKind::Tracer;

    fn section(config: &AppConfig) -> &TraceConfig {
        &config.tracing
    }

    fn enabled(config: &TraceConfig) -> bool {
        config.enable
    }

    fn validate(config: &TraceConfig) -> Result<(), Vec<ValidationError>> {
        validation::check_tracing(config)
    }

    /// Needs a Tokio runtime when `trace_url` is set.
    fn build(config: &TraceConfig) -> Result<Self, ComponentError> {
        let sampler = Self::sampler(config)?;
        let resource = Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]);

        let mut builder = TracerProvider::builder()
            .with_config(trace::config().with_sampler(sampler).with_resource(resource));
        if config.trace_url.trim().is_empty() {
            tracing::warn!(
                service_name = %config.service_name,
                "No trace_url, spans are not exported"
            );
        } else {
            builder = builder.with_batch_exporter(Self::exporter(config)?, runtime::Tokio);
        }
        let provider = builder.build();

        tracing::info!(
            service_name = %config.service_name,
            sampler = %config.sampler,
            rate = config.rate,
            collector = %config.trace_url,
            "Tracer ready"
        );
        Ok(Self {
            config: config.clone(),
            provider,
        })
    }

    /// Export whatever is still buffered.
    async fn release(&self) {
        let provider = self.provider.clone();
        match tokio::task::spawn_blocking(move || provider.force_flush()).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::warn!(
                            error = %e,
                            collector = %self.config.trace_url,
                            "Tracer flush failed"
                        );
                    }
                }
                tracing::info!(service_name = %self.config.service_name, "Tracer flushed");
            }
            Err(e) => tracing::warn!(error = %e, "Tracer flush task failed"),
        }
    }
}

/// The batch processor blocks on its worker task during shutdown, so the
/// final drop of the provider must not happen on a runtime worker.
impl Drop for Tracer {
    fn drop(&mut self) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let provider = std::mem::replace(&mut self.provider, TracerProvider::builder().build());
            handle.spawn_blocking(move || drop(provider));
        }
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("service_name", &self.config.service_name)
            .field("rate", &self.config.rate)
            .field("collector", &self.config.trace_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Span, Tracer as _};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(sampler: &str, rate: f64) -> TraceConfig {
        TraceConfig {
            service_name: "orders".into(),
            sampler: sampler.into(),
            rate,
            enable: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_sampler_selection() {
        assert!(matches!(Tracer::sampler(&config("const", 1.0)).unwrap(), Sampler::AlwaysOn));
        assert!(matches!(Tracer::sampler(&config("const", 0.0)).unwrap(), Sampler::AlwaysOff));
        assert!(matches!(
            Tracer::sampler(&config("", 0.5)).unwrap(),
            Sampler::TraceIdRatioBased(r) if r == 0.5
        ));
        assert!(matches!(
            Tracer::sampler(&config("parent", 0.5)).unwrap(),
            Sampler::ParentBased(_)
        ));
        assert!(Tracer::sampler(&config("ratelimiting", 1.0)).is_err());
    }

    #[test]
    fn test_always_off_records_nothing() {
        let tracer = Tracer::build(&config("const", 0.0)).unwrap();
        let mut span = tracer.tracer().start("lookup");
        assert!(!span.is_recording());
        span.end();
    }

    #[test]
    fn test_no_collector_means_no_export() {
        let tracer = Tracer::build(&config("const", 1.0)).unwrap();
        assert!(!tracer.exports());
    }

    #[tokio::test]
    async fn test_bad_collector_url_is_rejected() {
        let mut cfg = config("const", 1.0);
        cfg.trace_url = "not a url".into();
        let err = Tracer::build(&cfg).unwrap_err();
        assert!(matches!(err, ComponentError::InvalidConfig { kind: ComponentKind::Tracer, .. }));
    }

    /// Accept one HTTP request, answer 202 and hand back what was sent.
    async fn collector(listener: TcpListener) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some((_, body)) = text.split_once("\r\n\r\n") {
                if body.trim_end().ends_with(']') {
                    break;
                }
            }
        }
        socket
            .write_all(b"HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();
        String::from_utf8_lossy(&request).into_owned()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spans_are_posted_to_collector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = tokio::spawn(collector(listener));

        let mut cfg = config("const", 1.0);
        cfg.trace_url = format!("http://{}/api/v2/spans", addr);
        let tracer = Tracer::build(&cfg).unwrap();
        assert!(tracer.exports());

        let mut span = tracer.tracer().start("lookup");
        assert!(span.is_recording());
        span.end();
        tracer.release().await;

        let request = tokio::time::timeout(std::time::Duration::from_secs(10), received)
            .await
            .unwrap()
            .unwrap();
        assert!(request.starts_with("POST /api/v2/spans"));
        assert!(request.contains("\"lookup\""));
        assert!(request.contains("orders"));
    }
}
