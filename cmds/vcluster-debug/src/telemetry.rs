//! Tracing setup: log output on stderr and optional OpenTelemetry export.

use std::io::IsTerminal;

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Service name reported when `OTEL_SERVICE_NAME` is unset.
const SERVICE_NAME: &str = "vcluster-debug";

/// Keeps the span exporter alive; dropping it flushes pending spans.
pub struct TelemetryGuard {
	tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		if let Some(provider) = self.tracer_provider.take() {
			if let Err(e) = provider.shutdown() {
				eprintln!("Failed to shutdown tracer provider: {e}");
			}
		}
	}
}

fn otel_export_enabled() -> bool {
	std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT).is_ok()
		|| std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT).is_ok()
}

/// Parse a `--log-level` value. Unknown values fall back to `RUST_LOG`.
pub fn parse_level(level: &str) -> Option<Level> {
	match level.to_lowercase().as_str() {
		"trace" => Some(Level::TRACE),
		"debug" => Some(Level::DEBUG),
		"info" => Some(Level::INFO),
		"warn" | "warning" => Some(Level::WARN),
		"error" => Some(Level::ERROR),
		_ => None,
	}
}

/// Install the global subscriber.
///
/// The level comes from `log_level`, then `RUST_LOG`, then defaults to info.
/// Output is human readable on a terminal and JSON otherwise. Spans are
/// exported over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` or
/// `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` is set.
pub fn init(log_level: Option<Level>) -> Result<TelemetryGuard> {
	let filter = match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	};

	let fmt_layer = if std::io::stderr().is_terminal() {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.with_target(false)
			.boxed()
	} else {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.json()
			.boxed()
	};

	let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

	if !otel_export_enabled() {
		registry.init();
		return Ok(TelemetryGuard {
			tracer_provider: None,
		});
	}

	let tracer_provider = otel_provider()?;
	let otel_layer = tracing_opentelemetry::layer()
		.with_error_records_to_exceptions(true)
		.with_tracer(tracer_provider.tracer(SERVICE_NAME));
	registry.with(otel_layer).init();
	opentelemetry::global::set_tracer_provider(tracer_provider.clone());

	Ok(TelemetryGuard {
		tracer_provider: Some(tracer_provider),
	})
}

fn otel_provider() -> Result<SdkTracerProvider> {
	let mut resource = Resource::builder();
	// the builder already honors OTEL_SERVICE_NAME and OTEL_RESOURCE_ATTRIBUTES
	if std::env::var("OTEL_SERVICE_NAME").is_err() {
		resource = resource.with_service_name(SERVICE_NAME);
	}

	let exporter = match std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL)
		.as_deref()
		.unwrap_or(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT)
	{
		"grpc" => opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.build()?,
		_ => opentelemetry_otlp::SpanExporter::builder()
			.with_http()
			.build()?,
	};

	Ok(SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(exporter)
		.build())
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case("trace", Some(Level::TRACE))]
	#[case("DEBUG", Some(Level::DEBUG))]
	#[case("info", Some(Level::INFO))]
	#[case("warning", Some(Level::WARN))]
	#[case("error", Some(Level::ERROR))]
	#[case("verbose", None)]
	fn test_parse_level(#[case] input: &str, #[case] expected: Option<Level>) {
		assert_eq!(parse_level(input), expected);
	}
}
