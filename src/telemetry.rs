use std::{collections::HashMap, env, time::Duration};

use anyhow::bail;
use log::info;
use net::RunSummary;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};
use opentelemetry_otlp::{Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::{metrics::SdkMeterProvider, Resource};

pub const ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Creates an OpenTelemetry Resource from environment variables following semantic conventions,
/// including OTEL_RESOURCE_ATTRIBUTES for additional key-value pairs.
pub fn create_resource_from_env(default_service: &str) -> Resource {
    let mut attributes = Vec::new();

    let service_name =
        env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| default_service.to_string());
    attributes.push(KeyValue::new("service.name", service_name));

    if let Ok(service_version) = env::var("OTEL_SERVICE_VERSION") {
        attributes.push(KeyValue::new("service.version", service_version));
    }

    if let Ok(service_instance_id) = env::var("OTEL_SERVICE_INSTANCE_ID") {
        attributes.push(KeyValue::new("service.instance.id", service_instance_id));
    }

    if let Ok(resource_attributes) = env::var("OTEL_RESOURCE_ATTRIBUTES") {
        for (key, value) in parse_pairs(&resource_attributes) {
            // Skip attributes already set explicitly to avoid duplicates
            if !attributes.iter().any(|kv| kv.key.as_str() == key) {
                attributes.push(KeyValue::new(key, value));
            }
        }
    }

    Resource::builder().with_attributes(attributes).build()
}

/// `key1=val1,key2=val2`, skipping empty keys or values.
fn parse_pairs(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .collect()
}

fn build_metric_exporter() -> anyhow::Result<opentelemetry_otlp::MetricExporter> {
    let endpoint = dotenvy::var(ENDPOINT_ENV)
        .unwrap_or_else(|_| "http://localhost:4318/v1/metrics".into());
    let protocol = dotenvy::var("OTEL_EXPORTER_OTLP_PROTOCOL")
        .unwrap_or_else(|_| "http/protobuf".into())
        .to_lowercase();

    info!("Sending metric to {}", endpoint);

    let timeout = dotenvy::var("OTEL_EXPORTER_OTLP_TIMEOUT")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(3));

    let headers = dotenvy::var("OTEL_EXPORTER_OTLP_HEADERS")
        .map(|raw| parse_pairs(&raw))
        .unwrap_or_default();

    let protocol = match protocol.as_str() {
        "http/protobuf" => Protocol::HttpBinary,
        "http/json" => Protocol::HttpJson,
        other => bail!("unsupported OTLP protocol '{other}'"),
    };

    Ok(opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_protocol(protocol)
        .with_endpoint(endpoint)
        .with_timeout(timeout)
        .with_headers(headers)
        .build()?)
}

/// Installs the global OTLP meter provider when `OTEL_EXPORTER_OTLP_ENDPOINT`
/// is set. Without it the global no-op meter stays in place.
pub fn init_meter(service: &str) -> anyhow::Result<Option<SdkMeterProvider>> {
    if dotenvy::var(ENDPOINT_ENV).is_err() {
        return Ok(None);
    }
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(build_metric_exporter()?)
        .with_resource(create_resource_from_env(service))
        .build();
    global::set_meter_provider(meter_provider.clone());
    Ok(Some(meter_provider))
}

pub fn get_meter() -> Meter {
    global::meter_provider().meter("meshbench")
}

pub struct InvocationMetrics {
    invocations: Counter<u64>,
    failures: Counter<u64>,
    duration: Histogram<u64>,
}

impl InvocationMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            invocations: meter.u64_counter("meshbench_invocations_total").build(),
            failures: meter
                .u64_counter("meshbench_invocation_failures_total")
                .build(),
            duration: meter.u64_histogram("meshbench_invocation_time_ms").build(),
        }
    }

    pub fn record_invocation(&self) {
        self.invocations.add(1, &[]);
    }

    pub fn record_failure(&self, reason: &'static str) {
        self.failures.add(1, &[KeyValue::new("reason", reason)]);
    }

    pub fn record_duration(&self, elapsed: Duration) {
        self.duration.record(elapsed.as_millis() as u64, &[]);
    }
}

pub struct TransferMetrics {
    sent: Counter<u64>,
    received: Counter<u64>,
    peer_failures: Counter<u64>,
}

impl TransferMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            sent: meter.u64_counter("meshbench_bytes_sent_total").build(),
            received: meter.u64_counter("meshbench_bytes_recv_total").build(),
            peer_failures: meter.u64_counter("meshbench_peer_failures_total").build(),
        }
    }

    pub fn record_summary(&self, worker: u32, summary: &RunSummary) {
        let attrs = [KeyValue::new("worker", i64::from(worker))];
        self.sent.add(summary.bytes_sent, &attrs);
        self.received.add(summary.bytes_received, &attrs);
        if summary.failed > 0 {
            self.peer_failures.add(summary.failed as u64, &attrs);
        }
    }
}
