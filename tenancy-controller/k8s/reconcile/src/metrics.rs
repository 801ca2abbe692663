use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    reconciles: Family<OutcomeLabels, Counter>,
    duration: Histogram,
    applied: Family<KindLabels, Counter>,
    pruned: Family<KindLabels, Counter>,
    namespace_reverts: Counter,
    status_patches: Counter,
}

#[derive(Clone, Debug)]
pub struct IndexMetrics {
    queued: Counter,
    dropped: Counter,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Reconciled,
    Failed,
    Exhausted,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OutcomeLabels {
    outcome: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct KindLabels {
    kind: String,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<OutcomeLabels, Counter>::default();
        reg.register(
            "reconciles",
            "Total number of tenant reconcile passes by outcome",
            reconciles.clone(),
        );

        let duration = Histogram::new([0.01, 0.1, 1.0, 10.0, 60.0]);
        reg.register_with_unit(
            "reconcile_duration",
            "Histogram of tenant reconcile pass durations",
            Unit::Seconds,
            duration.clone(),
        );

        let applied = Family::<KindLabels, Counter>::default();
        reg.register(
            "applied",
            "Total number of derived objects applied",
            applied.clone(),
        );

        let pruned = Family::<KindLabels, Counter>::default();
        reg.register(
            "pruned",
            "Total number of stale derived objects deleted",
            pruned.clone(),
        );

        let namespace_reverts = Counter::default();
        reg.register(
            "namespace_metadata_reverts",
            "Total number of namespace metadata patches",
            namespace_reverts.clone(),
        );

        let status_patches = Counter::default();
        reg.register(
            "status_patches",
            "Total number of tenant status patches",
            status_patches.clone(),
        );

        Self {
            reconciles,
            duration,
            applied,
            pruned,
            namespace_reverts,
            status_patches,
        }
    }

    pub(crate) fn reconciled(&self, outcome: Outcome, started: time::Instant) {
        let outcome = match outcome {
            Outcome::Reconciled => "reconciled",
            Outcome::Failed => "failed",
            Outcome::Exhausted => "exhausted",
        };
        self.reconciles.get_or_create(&OutcomeLabels { outcome }).inc();
        self.duration
            .observe(time::Instant::now().saturating_duration_since(started).as_secs_f64());
    }

    pub(crate) fn applied(&self, kind: &str) {
        self.applied
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub(crate) fn pruned(&self, kind: &str) {
        self.pruned
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub(crate) fn namespace_reverted(&self) {
        self.namespace_reverts.inc();
    }

    pub(crate) fn status_patched(&self) {
        self.status_patches.inc();
    }
}

// === impl IndexMetrics ===

impl IndexMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let queued = Counter::default();
        reg.register(
            "queued",
            "Total number of tenants queued for reconciliation",
            queued.clone(),
        );

        let dropped = Counter::default();
        reg.register(
            "dropped",
            "Total number of tenant updates dropped because the queue was full",
            dropped.clone(),
        );

        Self { queued, dropped }
    }

    pub(crate) fn queued(&self) {
        self.queued.inc();
    }

    pub(crate) fn dropped(&self) {
        self.dropped.inc();
    }
}
