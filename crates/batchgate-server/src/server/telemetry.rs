//! # Telemetry
//!
//! Console logging is always on: `tracing-subscriber` prints events from the
//! server and from the `batchgate` dispatch loop, filtered by `RUST_LOG`
//! (default `info`).
//!
//! ## Feature matrix
//!
//! - `metrics`: Enables OpenTelemetry metrics. Request counters are recorded
//!   by the HTTP handlers; dispatcher counters are observed from
//!   [`batchgate::DispatchStats`] on every collection.
//! - `stdout`: Exports metrics to stdout every five seconds.
//!
//! ## Example usage
//!
//! ```bash
//! RUST_LOG=batchgate=debug cargo run --features metrics,stdout
//! ```

#[cfg(all(feature = "stdout", not(feature = "metrics")))]
compile_error!("The 'stdout' feature requires 'metrics' to be enabled.");

use batchgate::Dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, ObservableCounter};
#[cfg(feature = "metrics")]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::{Resource, metrics as sdkmetrics};
#[cfg(feature = "metrics")]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and closes every exporter. Errors go to stderr since the
    /// subscriber may already be gone.
    pub fn shutdown(self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        )
        .try_init()?;

    #[cfg(feature = "metrics")]
    {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        init_metric_handles(&meter());
    }

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn meter() -> Meter {
    let scope = InstrumentationScope::builder("batchgate")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();
    opentelemetry::global::meter_with_scope(scope)
}

#[cfg(feature = "metrics")]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("batchgate")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    builder.build()
}

/// Observable instruments reading a dispatcher's counters. Collection stops
/// once this is dropped.
pub struct DispatcherInstruments {
    #[cfg(feature = "metrics")]
    _counters: Vec<ObservableCounter<u64>>,
}

#[cfg(feature = "metrics")]
pub fn observe_dispatcher(dispatcher: &Dispatcher) -> DispatcherInstruments {
    use batchgate::StatsSnapshot;

    let meter = meter();
    let observed: [(&'static str, &'static str, fn(&StatsSnapshot) -> u64); 8] = [
        ("submissions_received", "Submissions handed to the dispatcher", |s| {
            s.submissions_received
        }),
        ("submissions_completed", "Submissions fully walked", |s| {
            s.submissions_completed
        }),
        ("submissions_abandoned", "Submissions cut short by cancellation", |s| {
            s.submissions_abandoned
        }),
        ("chunks_accepted", "Chunks the acceptor took", |s| {
            s.chunks_accepted
        }),
        ("chunks_blocked", "Chunks the acceptor refused", |s| {
            s.chunks_blocked
        }),
        ("items_accepted", "Items delivered to the acceptor", |s| {
            s.items_accepted
        }),
        ("items_dropped", "Items skipped after a refusal", |s| {
            s.items_dropped
        }),
        ("limit_refreshes", "Limit reads after a backoff", |s| {
            s.limit_refreshes
        }),
    ];

    let counters = observed
        .into_iter()
        .map(|(name, description, read)| {
            let dispatcher = dispatcher.clone();
            meter
                .u64_observable_counter(name)
                .with_description(description)
                .with_callback(move |observer| {
                    observer.observe(read(&dispatcher.stats().snapshot()), &[]);
                })
                .build()
        })
        .collect();

    DispatcherInstruments {
        _counters: counters,
    }
}

#[cfg(not(feature = "metrics"))]
pub const fn observe_dispatcher(_dispatcher: &Dispatcher) -> DispatcherInstruments {
    DispatcherInstruments {}
}

#[cfg(feature = "metrics")]
static REQUESTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REQUEST_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ITEMS_PER_REQUEST: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static HANDOFF_WAIT_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = REQUESTS.set(
        meter
            .u64_counter("requests")
            .with_description("Total /send requests")
            .build(),
    );

    let _ = REQUEST_ERRORS.set(
        meter
            .u64_counter("errors")
            .with_description("Rejected or failed /send requests")
            .build(),
    );

    let _ = ITEMS_PER_REQUEST.set(
        meter
            .f64_histogram("items_per_request")
            .with_description("Items requested per /send")
            .build(),
    );

    let _ = HANDOFF_WAIT_MS.set(
        meter
            .f64_histogram("handoff_wait")
            .with_unit("ms")
            .with_description("Time spent waiting for the dispatcher's slot")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_requests() {
    if let Some(counter) = REQUESTS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests() {}

#[cfg(feature = "metrics")]
pub fn increment_request_errors() {
    if let Some(counter) = REQUEST_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_request_errors() {}

#[cfg(feature = "metrics")]
pub fn record_items_per_request(count: f64) {
    if let Some(histogram) = ITEMS_PER_REQUEST.get() {
        histogram.record(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_items_per_request(_count: f64) {}

#[cfg(feature = "metrics")]
pub fn record_handoff_wait(wait_ms: f64) {
    if let Some(histogram) = HANDOFF_WAIT_MS.get() {
        histogram.record(wait_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_handoff_wait(_wait_ms: f64) {}
