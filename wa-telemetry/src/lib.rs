// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Telemetry for hosts embedding the analytics pipeline: structured logs,
//! optional OTLP export, and delivery metrics.

use opentelemetry::{
    metrics::{Counter, Histogram, Meter, MeterProvider},
    trace::TracerProvider,
    KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wa_core::transport::Payload;
use wa_core::Transport;

/// Metrics registry.
#[derive(Clone)]
pub struct Metrics {
    pub envelopes_dispatched: Counter<u64>,
    pub envelope_bytes: Histogram<u64>,
    pub beacons_rejected: Counter<u64>,
}

impl Metrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            envelopes_dispatched: meter
                .u64_counter("wa.envelopes.dispatched")
                .with_description("Envelopes handed to a delivery primitive")
                .init(),
            envelope_bytes: meter
                .u64_histogram("wa.envelopes.bytes")
                .with_description("Serialized envelope sizes")
                .init(),
            beacons_rejected: meter
                .u64_counter("wa.beacon.rejected")
                .with_description("Beacon calls that fell back to POST")
                .init(),
        }
    }

    /// Metrics backed by a provider without exporters.
    pub fn detached() -> Self {
        let provider = SdkMeterProvider::default();
        Self::new(&provider.meter("wa"))
    }

    pub fn record_dispatch(&self, event: &str, path: &'static str, bytes: usize) {
        let attrs = [
            KeyValue::new("event", event.to_string()),
            KeyValue::new("path", path),
        ];
        self.envelopes_dispatched.add(1, &attrs);
        self.envelope_bytes.record(bytes as u64, &attrs);
    }

    pub fn record_beacon_rejected(&self, event: &str) {
        self.beacons_rejected
            .add(1, &[KeyValue::new("event", event.to_string())]);
    }
}

/// Transport decorator recording [`Metrics`] for every payload.
pub struct MeteredTransport<T: Transport> {
    inner: T,
    metrics: Metrics,
}

impl<T: Transport> MeteredTransport<T> {
    pub fn new(inner: T, metrics: Metrics) -> Self {
        Self { inner, metrics }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl<T: Transport> Transport for MeteredTransport<T> {
    fn beacon(&self, endpoint: &str, payload: &Payload) -> bool {
        let accepted = self.inner.beacon(endpoint, payload);
        if accepted {
            self.metrics
                .record_dispatch(&payload.event, "beacon", payload.body.len());
        } else {
            self.metrics.record_beacon_rejected(&payload.event);
            tracing::debug!(event = %payload.event, "beacon rejected");
        }
        accepted
    }

    fn post(&self, endpoint: &str, payload: Payload) {
        self.metrics
            .record_dispatch(&payload.event, "post", payload.body.len());
        self.inner.post(endpoint, payload);
    }
}

/// Initialize telemetry (tracing + metrics).
///
/// Logs are JSON lines filtered through `RUST_LOG`. With an OTLP endpoint,
/// spans and metrics are exported over gRPC; this needs a Tokio runtime.
pub fn init_telemetry(service_name: &str, otlp_endpoint: Option<&str>) -> anyhow::Result<Metrics> {
    let tracer_provider = if let Some(endpoint) = otlp_endpoint {
        opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .with_trace_config(
                opentelemetry_sdk::trace::Config::default().with_resource(
                    opentelemetry_sdk::Resource::new(vec![KeyValue::new(
                        "service.name",
                        service_name.to_string(),
                    )]),
                ),
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio)?
    } else {
        opentelemetry_sdk::trace::TracerProvider::builder().build()
    };

    let tracer = tracer_provider.tracer(service_name.to_string());

    let meter_provider = if let Some(endpoint) = otlp_endpoint {
        opentelemetry_otlp::new_pipeline()
            .metrics(opentelemetry_sdk::runtime::Tokio)
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .build()?
    } else {
        SdkMeterProvider::default()
    };

    let meter = meter_provider.meter(service_name.to_string());
    let metrics = Metrics::new(&meter);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wa_core::transport::Route;
    use wa_core::RecordingTransport;

    fn payload(event: &str) -> Payload {
        Payload {
            event: event.to_string(),
            body: format!(r#"{{"event":"{}"}}"#, event),
        }
    }

    #[test]
    fn test_metered_transport_forwards_beacons() {
        let recording = RecordingTransport::new();
        let metered = MeteredTransport::new(recording.clone(), Metrics::detached());

        assert!(metered.beacon("https://c.example/collect", &payload("pageview")));
        metered.post("https://c.example/collect", payload("custom"));

        let sent = recording.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].route, Route::Beacon);
        assert_eq!(sent[1].route, Route::Post);
        assert_eq!(sent[1].payload.event, "custom");
    }

    #[test]
    fn test_metered_transport_reports_refusal() {
        let recording = RecordingTransport::new();
        recording.refuse_beacons(true);
        let metered = MeteredTransport::new(recording.clone(), Metrics::detached());

        assert!(!metered.beacon("https://c.example/collect", &payload("click")));
        assert!(recording.is_empty());
    }

    #[test]
    fn test_metered_transport_inside_pipeline() {
        use std::sync::Arc;
        use wa_core::{AgentConfig, ManualClock, Pipeline, SharedEnvironment};

        let recording = RecordingTransport::new();
        let metered = Arc::new(MeteredTransport::new(recording.clone(), Metrics::detached()));
        let config = AgentConfig::for_page("https://example.com/").unwrap();
        let mut pipeline = Pipeline::builder(config)
            .with_environment(Arc::new(SharedEnvironment::for_url("https://example.com/")))
            .with_clock(Arc::new(ManualClock::new(1_000)))
            .build(metered);
        pipeline.init();
        pipeline.track("signup", None);

        assert_eq!(recording.events(), vec!["pageview", "custom"]);
        assert_eq!(pipeline.delivery_stats().beacon, 2);
    }
}
