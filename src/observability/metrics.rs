use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub bookings_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub assignment_conflicts_total: IntCounter,
    pub event_queue_depth: IntGauge,
    pub events_published_total: IntCounter,
    pub events_dropped_total: IntCounter,
    pub location_updates_total: IntCounter,
    pub bookings_expired_total: IntCounter,
    pub scheduler_runs_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let bookings_total = IntCounterVec::new(
            Opts::new("bookings_total", "Booking requests by assignment outcome"),
            &["outcome"],
        )
        .expect("valid bookings_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of candidate lookup, scoring and binding in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let assignment_conflicts_total = IntCounter::new(
            "assignment_conflicts_total",
            "Assignments lost to a concurrent booking for the same courier",
        )
        .expect("valid assignment_conflicts_total metric");

        let event_queue_depth =
            IntGauge::new("event_queue_depth", "Events waiting for fan-out delivery")
                .expect("valid event_queue_depth metric");

        let events_published_total =
            IntCounter::new("events_published_total", "Events accepted by the event bus")
                .expect("valid events_published_total metric");

        let events_dropped_total = IntCounter::new(
            "events_dropped_total",
            "Events dropped because the fan-out queue was full or closed",
        )
        .expect("valid events_dropped_total metric");

        let location_updates_total =
            IntCounter::new("location_updates_total", "Courier location pings accepted")
                .expect("valid location_updates_total metric");

        let bookings_expired_total = IntCounter::new(
            "bookings_expired_total",
            "Pending bookings expired by the sweep",
        )
        .expect("valid bookings_expired_total metric");

        let scheduler_runs_total = IntCounterVec::new(
            Opts::new("scheduler_runs_total", "Scheduled task runs by task and outcome"),
            &["task", "outcome"],
        )
        .expect("valid scheduler_runs_total metric");

        registry
            .register(Box::new(bookings_total.clone()))
            .expect("register bookings_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(assignment_conflicts_total.clone()))
            .expect("register assignment_conflicts_total");
        registry
            .register(Box::new(event_queue_depth.clone()))
            .expect("register event_queue_depth");
        registry
            .register(Box::new(events_published_total.clone()))
            .expect("register events_published_total");
        registry
            .register(Box::new(events_dropped_total.clone()))
            .expect("register events_dropped_total");
        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");
        registry
            .register(Box::new(bookings_expired_total.clone()))
            .expect("register bookings_expired_total");
        registry
            .register(Box::new(scheduler_runs_total.clone()))
            .expect("register scheduler_runs_total");

        Self {
            registry,
            bookings_total,
            assignment_latency_seconds,
            assignment_conflicts_total,
            event_queue_depth,
            events_published_total,
            events_dropped_total,
            location_updates_total,
            bookings_expired_total,
            scheduler_runs_total,
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
