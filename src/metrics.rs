//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Pipeline
    pub belt_executions: IntCounterVec,
    pub belt_latency: HistogramVec,

    // Channel pool
    pub channels_allocated: IntCounter,
    pub channels_released: IntCounter,
    pub channel_allocation_waits: IntCounter,
    pub channels_free: IntGauge,
    pub channels_locked: IntGauge,
    pub channel_lease_lifetime: Histogram,

    // Finality
    pub finality_polls: IntCounter,
    pub finality_wait: Histogram,

    // Fee bumps
    pub fee_bumps_applied: IntCounter,
    pub fee_bumps_skipped: IntCounter,
}

impl Metrics {
    /// Create and register all metrics
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let belt_executions = IntCounterVec::new(
            Opts::new("belt_executions_total", "Conveyor belt executions by outcome"),
            &["belt_type", "outcome"],
        )?;

        let belt_latency = HistogramVec::new(
            HistogramOpts::new("belt_latency_seconds", "Conveyor belt execution latency")
                .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["belt_type"],
        )?;

        let channels_allocated = IntCounter::with_opts(Opts::new(
            "channels_allocated_total",
            "Number of channel allocations",
        ))?;

        let channels_released = IntCounter::with_opts(Opts::new(
            "channels_released_total",
            "Number of channel releases",
        ))?;

        let channel_allocation_waits = IntCounter::with_opts(Opts::new(
            "channel_allocation_waits_total",
            "Number of times an allocation waited for a free channel",
        ))?;

        let channels_free =
            IntGauge::with_opts(Opts::new("channels_free", "Channels currently free"))?;

        let channels_locked =
            IntGauge::with_opts(Opts::new("channels_locked", "Channels currently locked"))?;

        let channel_lease_lifetime = Histogram::with_opts(
            HistogramOpts::new(
                "channel_lease_lifetime_seconds",
                "Duration channel leases are held",
            )
            .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
        )?;

        let finality_polls = IntCounter::with_opts(Opts::new(
            "finality_polls_total",
            "Number of transaction status queries",
        ))?;

        let finality_wait = Histogram::with_opts(
            HistogramOpts::new(
                "finality_wait_seconds",
                "Time until a terminal transaction status was observed",
            )
            .buckets(vec![0.5, 1.0, 3.0, 7.0, 15.0, 30.0, 60.0]),
        )?;

        let fee_bumps_applied = IntCounter::with_opts(Opts::new(
            "fee_bumps_applied_total",
            "Transactions wrapped in a fee bump",
        ))?;

        let fee_bumps_skipped = IntCounter::with_opts(Opts::new(
            "fee_bumps_skipped_total",
            "Transactions that already paid sufficient fees",
        ))?;

        registry.register(Box::new(belt_executions.clone()))?;
        registry.register(Box::new(belt_latency.clone()))?;
        registry.register(Box::new(channels_allocated.clone()))?;
        registry.register(Box::new(channels_released.clone()))?;
        registry.register(Box::new(channel_allocation_waits.clone()))?;
        registry.register(Box::new(channels_free.clone()))?;
        registry.register(Box::new(channels_locked.clone()))?;
        registry.register(Box::new(channel_lease_lifetime.clone()))?;
        registry.register(Box::new(finality_polls.clone()))?;
        registry.register(Box::new(finality_wait.clone()))?;
        registry.register(Box::new(fee_bumps_applied.clone()))?;
        registry.register(Box::new(fee_bumps_skipped.clone()))?;

        Ok(Self {
            registry,
            belt_executions,
            belt_latency,
            channels_allocated,
            channels_released,
            channel_allocation_waits,
            channels_free,
            channels_locked,
            channel_lease_lifetime,
            finality_polls,
            finality_wait,
            fee_bumps_applied,
            fee_bumps_skipped,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the prometheus text format
    pub fn export(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_registered_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics
            .belt_executions
            .with_label_values(&["BuildTransaction", "success"])
            .inc();
        metrics.channels_free.set(3);

        let text = metrics.export().unwrap();
        assert!(text.contains("belt_executions_total"));
        assert!(text.contains("channels_free 3"));
    }
}
