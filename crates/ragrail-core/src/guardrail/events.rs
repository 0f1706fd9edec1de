//! Guardrail execution events, logging and metrics

use super::{GuardrailKind, GuardrailOutcome, InvocationContext};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Recorded durations kept per metric series
const MAX_SAMPLES: usize = 4096;

/// Emitted once per guardrail execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardrailExecutedEvent {
    pub context: InvocationContext,
    pub guardrail: String,
    pub kind: GuardrailKind,
    pub outcome: GuardrailOutcome,
    pub duration: Duration,
    /// Tool the guardrail ran for, if it is a tool guardrail
    pub tool: Option<String>,
    /// Failure message, if any
    pub message: Option<String>,
}

/// Receives guardrail execution events
pub trait GuardrailEventSink: Send + Sync {
    fn on_event(&self, event: &GuardrailExecutedEvent);
}

/// Logs each event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl GuardrailEventSink for TracingEventSink {
    fn on_event(&self, event: &GuardrailExecutedEvent) {
        let message = event.message.as_deref().unwrap_or("");
        match event.outcome {
            GuardrailOutcome::Success | GuardrailOutcome::SuccessWithResult => tracing::debug!(
                "{} guardrail {} on {}.{} passed in {:?}",
                event.kind,
                event.guardrail,
                event.context.service,
                event.context.operation,
                event.duration
            ),
            GuardrailOutcome::Fatal => tracing::error!(
                "{} guardrail {} on {}.{} failed fatally: {}",
                event.kind,
                event.guardrail,
                event.context.service,
                event.context.operation,
                message
            ),
            outcome => tracing::warn!(
                "{} guardrail {} on {}.{} returned {}: {}",
                event.kind,
                event.guardrail,
                event.context.service,
                event.context.operation,
                outcome,
                message
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct SeriesKey {
    prefix: &'static str,
    service: String,
    operation: String,
    guardrail: String,
    guardrail_type: &'static str,
    outcome: GuardrailOutcome,
    tool: Option<String>,
}

impl SeriesKey {
    fn from_event(event: &GuardrailExecutedEvent) -> Self {
        Self {
            prefix: event.kind.metric_prefix(),
            service: event.context.service.clone(),
            operation: event.context.operation.clone(),
            guardrail: event.guardrail.clone(),
            guardrail_type: event.kind.type_tag(),
            outcome: event.outcome,
            tool: event.tool.clone(),
        }
    }

    fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("aiservice".to_string(), self.service.clone());
        tags.insert("operation".to_string(), self.operation.clone());
        tags.insert("guardrail".to_string(), self.guardrail.clone());
        tags.insert("guardrail.type".to_string(), self.guardrail_type.to_string());
        tags.insert("outcome".to_string(), self.outcome.to_string());
        if let Some(tool) = &self.tool {
            tags.insert("tool".to_string(), tool.clone());
        }
        tags
    }
}

#[derive(Debug, Default)]
struct Series {
    count: u64,
    total: Duration,
    samples: VecDeque<Duration>,
}

/// Aggregated view of one metric series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    /// `guardrail.invoked` / `guardrail.timed` style name
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub count: u64,
    pub total: Duration,
    pub p75: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

/// In-process counters and timers for guardrail executions
///
/// Series are keyed by service, operation, guardrail name and the
/// enum-valued kind and outcome only; memory ids and messages never become
/// tags.
#[derive(Debug, Default)]
pub struct GuardrailMetrics {
    series: Mutex<HashMap<SeriesKey, Series>>,
}

impl GuardrailMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executions of `guardrail` with the given outcome, across services
    pub fn invocations(&self, guardrail: &str, outcome: GuardrailOutcome) -> u64 {
        self.series
            .lock()
            .map(|series| {
                series
                    .iter()
                    .filter(|(k, _)| k.guardrail == guardrail && k.outcome == outcome)
                    .map(|(_, s)| s.count)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// One `.invoked` counter and one `.timed` timer sample per series
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let series = match self.series.lock() {
            Ok(series) => series,
            Err(_) => return Vec::new(),
        };

        let mut keys: Vec<&SeriesKey> = series.keys().collect();
        keys.sort();

        let mut out = Vec::with_capacity(keys.len() * 2);
        for key in keys {
            let s = &series[key];
            let mut sorted: Vec<Duration> = s.samples.iter().copied().collect();
            sorted.sort();
            let sample = |name: String| MetricSample {
                name,
                tags: key.tags(),
                count: s.count,
                total: s.total,
                p75: percentile(&sorted, 0.75),
                p95: percentile(&sorted, 0.95),
                p99: percentile(&sorted, 0.99),
            };
            out.push(sample(format!("{}.invoked", key.prefix)));
            out.push(sample(format!("{}.timed", key.prefix)));
        }
        out
    }
}

impl GuardrailEventSink for GuardrailMetrics {
    fn on_event(&self, event: &GuardrailExecutedEvent) {
        let Ok(mut series) = self.series.lock() else {
            return;
        };
        let entry = series.entry(SeriesKey::from_event(event)).or_default();
        entry.count += 1;
        entry.total += event.duration;
        if entry.samples.len() == MAX_SAMPLES {
            entry.samples.pop_front();
        }
        entry.samples.push_back(event.duration);
    }
}

/// Nearest-rank percentile of sorted durations
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(guardrail: &str, outcome: GuardrailOutcome, millis: u64) -> GuardrailExecutedEvent {
        GuardrailExecutedEvent {
            context: InvocationContext::new("Assistant", "chat").with_memory_id("m-1"),
            guardrail: guardrail.to_string(),
            kind: GuardrailKind::Input,
            outcome,
            duration: Duration::from_millis(millis),
            tool: None,
            message: None,
        }
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let samples: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        assert_eq!(percentile(&samples, 0.75), Duration::from_millis(75));
        assert_eq!(percentile(&samples, 0.99), Duration::from_millis(99));
        assert_eq!(percentile(&[], 0.5), Duration::ZERO);
    }

    #[test]
    fn test_metrics_count_and_time() {
        let metrics = GuardrailMetrics::new();
        for ms in 1..=20 {
            metrics.on_event(&event("Length", GuardrailOutcome::Success, ms));
        }
        metrics.on_event(&event("Length", GuardrailOutcome::Failure, 5));

        assert_eq!(metrics.invocations("Length", GuardrailOutcome::Success), 20);
        assert_eq!(metrics.invocations("Length", GuardrailOutcome::Failure), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 4);
        let timed = snapshot
            .iter()
            .find(|s| s.name == "guardrail.timed" && s.tags["outcome"] == "success")
            .unwrap();
        assert_eq!(timed.count, 20);
        assert_eq!(timed.total, Duration::from_millis(210));
        assert_eq!(timed.p95, Duration::from_millis(19));
        assert_eq!(timed.tags["aiservice"], "Assistant");
        assert_eq!(timed.tags["guardrail.type"], "input");
        assert!(!timed.tags.contains_key("memory_id"));
    }

    #[test]
    fn test_timer_keeps_most_recent_samples() {
        let metrics = GuardrailMetrics::new();
        for _ in 0..MAX_SAMPLES {
            metrics.on_event(&event("Slow", GuardrailOutcome::Success, 500));
        }
        for _ in 0..MAX_SAMPLES {
            metrics.on_event(&event("Slow", GuardrailOutcome::Success, 1));
        }

        let timed = metrics
            .snapshot()
            .into_iter()
            .find(|s| s.name == "guardrail.timed")
            .unwrap();
        assert_eq!(timed.count, 2 * MAX_SAMPLES as u64);
        assert_eq!(timed.p99, Duration::from_millis(1));
    }

    #[test]
    fn test_tool_metrics_use_own_prefix() {
        let metrics = GuardrailMetrics::new();
        let mut e = event("NoDelete", GuardrailOutcome::Fatal, 1);
        e.kind = GuardrailKind::ToolInput;
        e.tool = Some("delete_file".to_string());
        metrics.on_event(&e);

        let names: Vec<String> = metrics.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["tool-guardrail.invoked", "tool-guardrail.timed"]);
    }
}
