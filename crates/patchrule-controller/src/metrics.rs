//! Reconcile counters and their Prometheus text exposition.
//!
//! Counters only ever grow; the daemon renders them on `/metrics`.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use patchrule_api::Reason;

/// Counters updated by the reconciler and the controller loop.
#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    cycles_ok: AtomicU64,
    cycles_failed: AtomicU64,
    /// Status writes rejected because the rule moved on.
    conflicts: AtomicU64,
    /// Resources written by patch groups.
    resources_patched: AtomicU64,
    /// Rules that currently have a worker.
    rules_watched: AtomicU64,
    /// Query failures by condition reason.
    evaluation_failures: Mutex<BTreeMap<String, u64>>,
    /// `PatchApplied` outcomes by condition reason.
    patch_results: Mutex<BTreeMap<String, u64>>,
}

/// Point-in-time copy of [`ReconcileMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cycles_ok: u64,
    pub cycles_failed: u64,
    pub conflicts: u64,
    pub resources_patched: u64,
    pub rules_watched: u64,
    pub evaluation_failures: BTreeMap<String, u64>,
    pub patch_results: BTreeMap<String, u64>,
}

impl ReconcileMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, ok: bool, conflict: bool) {
        if ok {
            self.cycles_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cycles_failed.fetch_add(1, Ordering::Relaxed);
        }
        if conflict {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_evaluation_failure(&self, reason: Reason) {
        bump(&self.evaluation_failures, reason);
    }

    pub fn record_patch_result(&self, reason: Reason, resources: usize) {
        bump(&self.patch_results, reason);
        self.resources_patched
            .fetch_add(resources as u64, Ordering::Relaxed);
    }

    pub fn set_rules_watched(&self, rules: usize) {
        self.rules_watched.store(rules as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_ok: self.cycles_ok.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            resources_patched: self.resources_patched.load(Ordering::Relaxed),
            rules_watched: self.rules_watched.load(Ordering::Relaxed),
            evaluation_failures: copy(&self.evaluation_failures),
            patch_results: copy(&self.patch_results),
        }
    }
}

fn bump(counts: &Mutex<BTreeMap<String, u64>>, reason: Reason) {
    let mut counts = counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *counts.entry(reason.to_string()).or_default() += 1;
}

fn copy(counts: &Mutex<BTreeMap<String, u64>>) -> BTreeMap<String, u64> {
    counts
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Render a snapshot in the Prometheus text exposition format.
pub fn render_prometheus(s: &MetricsSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP patchrule_reconcile_total Reconcile cycles by result.\n");
    out.push_str("# TYPE patchrule_reconcile_total counter\n");
    out.push_str(&format!(
        "patchrule_reconcile_total{{result=\"success\"}} {}\n",
        s.cycles_ok
    ));
    out.push_str(&format!(
        "patchrule_reconcile_total{{result=\"error\"}} {}\n",
        s.cycles_failed
    ));

    out.push_str("# HELP patchrule_status_conflicts_total Status writes rejected as stale.\n");
    out.push_str("# TYPE patchrule_status_conflicts_total counter\n");
    out.push_str(&format!("patchrule_status_conflicts_total {}\n", s.conflicts));

    out.push_str("# HELP patchrule_evaluation_failures_total Failed query evaluations by reason.\n");
    out.push_str("# TYPE patchrule_evaluation_failures_total counter\n");
    for (reason, count) in &s.evaluation_failures {
        out.push_str(&format!(
            "patchrule_evaluation_failures_total{{reason=\"{reason}\"}} {count}\n"
        ));
    }

    out.push_str("# HELP patchrule_patch_results_total Patch passes by outcome reason.\n");
    out.push_str("# TYPE patchrule_patch_results_total counter\n");
    for (reason, count) in &s.patch_results {
        out.push_str(&format!(
            "patchrule_patch_results_total{{reason=\"{reason}\"}} {count}\n"
        ));
    }

    out.push_str("# HELP patchrule_patched_resources_total Resources written by patch groups.\n");
    out.push_str("# TYPE patchrule_patched_resources_total counter\n");
    out.push_str(&format!(
        "patchrule_patched_resources_total {}\n",
        s.resources_patched
    ));

    out.push_str("# HELP patchrule_rules_watched Rules with a running worker.\n");
    out.push_str("# TYPE patchrule_rules_watched gauge\n");
    out.push_str(&format!("patchrule_rules_watched {}\n", s.rules_watched));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_empty() {
        let output = render_prometheus(&ReconcileMetrics::new().snapshot());
        assert!(output.contains("# TYPE patchrule_reconcile_total counter"));
        assert!(output.contains("patchrule_reconcile_total{result=\"success\"} 0"));
        assert!(output.contains("# TYPE patchrule_rules_watched gauge"));
        assert!(!output.contains("patchrule_evaluation_failures_total{"));
    }

    #[test]
    fn counters_accumulate_by_reason() {
        let m = ReconcileMetrics::new();
        m.record_cycle(true, false);
        m.record_cycle(true, false);
        m.record_cycle(false, true);
        m.record_evaluation_failure(Reason::QueryFailed);
        m.record_evaluation_failure(Reason::QueryFailed);
        m.record_evaluation_failure(Reason::InvalidEndpoint);
        m.record_patch_result(Reason::Applied, 3);
        m.record_patch_result(Reason::PatchApplyFailed, 1);
        m.set_rules_watched(4);

        let s = m.snapshot();
        assert_eq!((s.cycles_ok, s.cycles_failed, s.conflicts), (2, 1, 1));
        assert_eq!(s.evaluation_failures["QueryFailed"], 2);
        assert_eq!(s.resources_patched, 4);

        let output = render_prometheus(&s);
        assert!(output.contains("patchrule_reconcile_total{result=\"error\"} 1"));
        assert!(output.contains("patchrule_evaluation_failures_total{reason=\"QueryFailed\"} 2"));
        assert!(output.contains("patchrule_evaluation_failures_total{reason=\"InvalidEndpoint\"} 1"));
        assert!(output.contains("patchrule_patch_results_total{reason=\"Applied\"} 1"));
        assert!(output.contains("patchrule_patched_resources_total 4"));
        assert!(output.contains("patchrule_rules_watched 4"));
    }

    #[test]
    fn every_sample_line_is_name_and_value() {
        let m = ReconcileMetrics::new();
        m.record_patch_result(Reason::NoPatchFound, 0);
        for line in render_prometheus(&m.snapshot()).lines() {
            if line.starts_with('#') {
                continue;
            }
            let (name, value) = line.rsplit_once(' ').unwrap();
            assert!(name.starts_with("patchrule_"), "{line}");
            assert!(value.parse::<u64>().is_ok(), "{line}");
        }
    }
}
