//! Experiment metric analysis.
//!
//! Aggregates per-run metric points into per-variant summaries and computes
//! a Pareto front over the declared metrics.

use std::collections::BTreeMap;

use crate::domain::models::experiment::{
    Analysis, MetricSpec, MetricSummary, RunPhase, RunStatus,
};

/// Aggregate completed runs into the final analysis.
pub fn analyze_runs(runs: &[RunStatus], metrics: &[MetricSpec]) -> Analysis {
    let completed: Vec<&RunStatus> = runs
        .iter()
        .filter(|r| r.phase == RunPhase::Completed)
        .collect();

    // variant -> metric -> samples
    let mut samples: BTreeMap<&str, BTreeMap<&str, Vec<f64>>> = BTreeMap::new();
    for run in &completed {
        let per_variant = samples.entry(run.variant_key.as_str()).or_default();
        for metric in metrics {
            if let Some(value) = run.metrics.get(&metric.name) {
                per_variant.entry(metric.name.as_str()).or_default().push(*value);
            }
        }
    }

    let mut summaries = Vec::new();
    for (variant, per_metric) in &samples {
        for metric in metrics {
            let Some(values) = per_metric.get(metric.name.as_str()) else {
                continue;
            };
            if values.is_empty() {
                continue;
            }
            summaries.push(summarise(metric, variant, values));
        }
    }

    let pareto_front = pareto_front(&samples, metrics);

    Analysis { summaries, pareto_front }
}

fn summarise(metric: &MetricSpec, variant: &str, values: &[f64]) -> MetricSummary {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    MetricSummary {
        metric: metric.name.clone(),
        variant_key: variant.to_string(),
        samples: values.len(),
        mean,
        min,
        max,
        std_dev: variance.sqrt(),
    }
}

/// Variants not dominated by any other variant. Variant A dominates B when
/// it is at least as good on every metric and strictly better on one,
/// honouring each metric's minimize flag; means are compared.
fn pareto_front(
    samples: &BTreeMap<&str, BTreeMap<&str, Vec<f64>>>,
    metrics: &[MetricSpec],
) -> Vec<String> {
    if metrics.is_empty() {
        return samples.keys().map(|v| (*v).to_string()).collect();
    }

    let mut means: BTreeMap<&str, Vec<Option<f64>>> = BTreeMap::new();
    for (variant, per_metric) in samples {
        let row = metrics
            .iter()
            .map(|m| {
                per_metric.get(m.name.as_str()).and_then(|values| {
                    if values.is_empty() {
                        None
                    } else {
                        Some(values.iter().sum::<f64>() / values.len() as f64)
                    }
                })
            })
            .collect();
        means.insert(variant, row);
    }

    let dominates = |a: &[Option<f64>], b: &[Option<f64>]| -> bool {
        let mut strictly_better = false;
        for (i, metric) in metrics.iter().enumerate() {
            let (Some(a), Some(b)) = (a[i], b[i]) else {
                return false;
            };
            let (better, worse) = if metric.minimize { (a < b, a > b) } else { (a > b, a < b) };
            if worse {
                return false;
            }
            if better {
                strictly_better = true;
            }
        }
        strictly_better
    };

    means
        .iter()
        .filter(|(variant, row)| {
            !means
                .iter()
                .any(|(other, other_row)| other != *variant && dominates(other_row, row))
        })
        .map(|(variant, _)| (*variant).to_string())
        .collect()
}
