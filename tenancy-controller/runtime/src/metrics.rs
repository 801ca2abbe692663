use crate::admission::FailurePolicy;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    decisions: Family<DecisionLabels, Counter>,
    denials: Family<DenialLabels, Counter>,
    fallbacks: Family<FallbackLabels, Counter>,
    duration: Histogram,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct DecisionLabels {
    kind: String,
    decision: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct DenialLabels {
    kind: String,
    dimension: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct FallbackLabels {
    kind: String,
    policy: &'static str,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let decisions = Family::<DecisionLabels, Counter>::default();
        reg.register(
            "decisions",
            "Total number of admission decisions by kind",
            decisions.clone(),
        );

        let denials = Family::<DenialLabels, Counter>::default();
        reg.register(
            "denials",
            "Total number of denied writes by kind and policy dimension",
            denials.clone(),
        );

        let fallbacks = Family::<FallbackLabels, Counter>::default();
        reg.register(
            "fallbacks",
            "Total number of writes decided by the failure policy",
            fallbacks.clone(),
        );

        let duration = Histogram::new([0.001, 0.01, 0.1, 1.0, 10.0]);
        reg.register_with_unit(
            "duration",
            "Histogram of admission decision durations",
            Unit::Seconds,
            duration.clone(),
        );

        Self {
            decisions,
            denials,
            fallbacks,
            duration,
        }
    }

    pub(crate) fn allowed(&self, kind: &str, started: time::Instant) {
        self.decided(kind, "allowed", started);
    }

    pub(crate) fn mutated(&self, kind: &str, started: time::Instant) {
        self.decided(kind, "mutated", started);
    }

    pub(crate) fn denied(&self, kind: &str, dimension: &'static str, started: time::Instant) {
        self.denials
            .get_or_create(&DenialLabels {
                kind: kind.to_string(),
                dimension,
            })
            .inc();
        self.decided(kind, "denied", started);
    }

    pub(crate) fn fallback(&self, kind: &str, policy: FailurePolicy) {
        let policy = match policy {
            FailurePolicy::Closed => "closed",
            FailurePolicy::Open => "open",
        };
        self.fallbacks
            .get_or_create(&FallbackLabels {
                kind: kind.to_string(),
                policy,
            })
            .inc();
    }

    fn decided(&self, kind: &str, decision: &'static str, started: time::Instant) {
        self.decisions
            .get_or_create(&DecisionLabels {
                kind: kind.to_string(),
                decision,
            })
            .inc();
        self.duration
            .observe(time::Instant::now().saturating_duration_since(started).as_secs_f64());
    }
}
