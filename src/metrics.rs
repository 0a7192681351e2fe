// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics for the controller.
//!
//! Metrics are created once by [`register_metrics`]. Until then every
//! recording function is a no-op, so library code can record unconditionally.

use prometheus::{IntCounterVec, IntGauge, Opts, Registry};
use std::sync::{LazyLock, Mutex, OnceLock};

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static METRICS: OnceLock<Metrics> = OnceLock::new();
static REGISTER_LOCK: Mutex<()> = Mutex::new(());

struct Metrics {
    reconciliations: IntCounterVec,
    reconciliation_errors: IntCounterVec,
    tokens_issued: IntCounterVec,
    refresh_failures: IntCounterVec,
    scheduled_refreshes: IntGauge,
}

impl Metrics {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            reconciliations: IntCounterVec::new(
                Opts::new(
                    "flux_extension_reconciliations_total",
                    "Total number of reconciliations",
                ),
                &["controller"],
            )?,
            reconciliation_errors: IntCounterVec::new(
                Opts::new(
                    "flux_extension_reconciliation_errors_total",
                    "Total number of failed reconciliations",
                ),
                &["controller"],
            )?,
            tokens_issued: IntCounterVec::new(
                Opts::new(
                    "flux_extension_tokens_issued_total",
                    "Installation tokens written to secrets",
                ),
                &["trigger"],
            )?,
            refresh_failures: IntCounterVec::new(
                Opts::new(
                    "flux_extension_token_refresh_failures_total",
                    "Abandoned token refresh cycles",
                ),
                &["stage"],
            )?,
            scheduled_refreshes: IntGauge::new(
                "flux_extension_scheduled_refreshes",
                "Secrets with an armed refresh timer",
            )?,
        })
    }

    fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.reconciliation_errors.clone()))?;
        registry.register(Box::new(self.tokens_issued.clone()))?;
        registry.register(Box::new(self.refresh_failures.clone()))?;
        registry.register(Box::new(self.scheduled_refreshes.clone()))?;
        Ok(())
    }
}

/// Create the metrics and add them to the registry. Later calls are no-ops.
pub fn register_metrics() -> prometheus::Result<()> {
    let _guard = REGISTER_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if METRICS.get().is_some() {
        return Ok(());
    }
    let metrics = Metrics::new()?;
    metrics.register(&REGISTRY)?;
    let _ = METRICS.set(metrics);
    Ok(())
}

pub(crate) fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_reconciliations(controller: &str) {
    if let Some(m) = METRICS.get() {
        m.reconciliations.with_label_values(&[controller]).inc();
    }
}

pub fn increment_reconciliation_errors(controller: &str) {
    if let Some(m) = METRICS.get() {
        m.reconciliation_errors.with_label_values(&[controller]).inc();
    }
}

/// `trigger` is either `reconcile` or `refresh`
pub fn increment_tokens_issued(trigger: &str) {
    if let Some(m) = METRICS.get() {
        m.tokens_issued.with_label_values(&[trigger]).inc();
    }
}

pub fn increment_refresh_failures(stage: &str) {
    if let Some(m) = METRICS.get() {
        m.refresh_failures.with_label_values(&[stage]).inc();
    }
}

pub fn set_scheduled_refreshes(count: usize) {
    if let Some(m) = METRICS.get() {
        m.scheduled_refreshes.set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}
