use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Lifecycle transitions by event (claim/pickup/transit/complete/
    /// cancel) and outcome.
    pub transitions_total: IntCounterVec,
    /// Transfer requests by outcome (proposed/accepted/rejected/
    /// withdrawn/expired).
    pub transfers_total: IntCounterVec,
    /// Derived states materialized by the sweep, by kind.
    pub sweep_marked_total: IntCounterVec,
    /// Wall time of the geocoding-backed arrival check on complete.
    pub location_check_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "transitions_total",
                "Order lifecycle transitions by event and outcome",
            ),
            &["event", "outcome"],
        )
        .expect("valid transitions_total metric");

        let transfers_total = IntCounterVec::new(
            Opts::new("transfers_total", "Transfer requests by outcome"),
            &["outcome"],
        )
        .expect("valid transfers_total metric");

        let sweep_marked_total = IntCounterVec::new(
            Opts::new(
                "sweep_marked_total",
                "Derived states materialized by the periodic sweep",
            ),
            &["kind"],
        )
        .expect("valid sweep_marked_total metric");

        let location_check_seconds = Histogram::with_opts(HistogramOpts::new(
            "location_check_seconds",
            "Latency of the delivery location verification",
        ))
        .expect("valid location_check_seconds metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(transfers_total.clone()))
            .expect("register transfers_total");
        registry
            .register(Box::new(sweep_marked_total.clone()))
            .expect("register sweep_marked_total");
        registry
            .register(Box::new(location_check_seconds.clone()))
            .expect("register location_check_seconds");

        Self {
            registry,
            transitions_total,
            transfers_total,
            sweep_marked_total,
            location_check_seconds,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
