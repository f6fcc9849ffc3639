//! Scaling controller state machine
//!
//! One call to [`ScalingController::run`] drives a single cycle:
//! Idle → Describing → Computing → Registering → Rebinding →
//! AdjustingAlarm → Idle, or into `Error` from any step.

use super::notification::{parse_notification, AlarmState};
use super::policy::{AlarmThresholdPolicy, ScalingPolicy, SizingDecision};
use super::retry::RetryPolicy;
use crate::backends::Backends;
use crate::error::{ScalerError, ScalerResult};
use crate::models::{AllocationRef, InvocationResult, ScalingRequest, ServiceBinding, TargetConfig};
use crate::observability::{ScalerMetrics, StructuredLogger};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingState {
    Idle,
    Describing,
    Computing,
    Registering,
    Rebinding,
    AdjustingAlarm,
    Error,
}

impl ScalingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingState::Idle => "idle",
            ScalingState::Describing => "describing",
            ScalingState::Computing => "computing",
            ScalingState::Registering => "registering",
            ScalingState::Rebinding => "rebinding",
            ScalingState::AdjustingAlarm => "adjusting_alarm",
            ScalingState::Error => "error",
        }
    }
}

impl fmt::Display for ScalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the alarm after a successful rebind
#[derive(Debug, Clone, PartialEq)]
pub enum AlarmUpdate {
    Patched {
        alarm_name: String,
        threshold: f64,
    },
    /// The rebind stands; the threshold still reflects the old capacity
    Stale {
        alarm_name: String,
        threshold: f64,
        error: ScalerError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScalingOutcome {
    /// The service now runs the new revision
    Scaled {
        from: AllocationRef,
        to: AllocationRef,
        memory_units: u32,
        alarm: AlarmUpdate,
    },
    /// Already at the memory ceiling; nothing was registered
    Saturated {
        current: AllocationRef,
        memory_units: u32,
        ceiling: u32,
    },
    /// Another cycle owns or already advanced the binding
    Superseded {
        detail: String,
        /// Revision registered by this cycle that nothing is bound to
        orphaned: Option<AllocationRef>,
    },
    /// The notification did not ask for a scale-up
    Ignored { state: AlarmState },
    Failed {
        state: ScalingState,
        error: ScalerError,
        orphaned: Option<AllocationRef>,
    },
}

/// Outcome of one cycle plus every state it passed through
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingReport {
    pub outcome: ScalingOutcome,
    pub transitions: Vec<ScalingState>,
}

impl ScalingReport {
    pub fn label(&self) -> &'static str {
        match &self.outcome {
            ScalingOutcome::Scaled {
                alarm: AlarmUpdate::Patched { .. },
                ..
            } => "scaled",
            ScalingOutcome::Scaled {
                alarm: AlarmUpdate::Stale { .. },
                ..
            } => "alarm_stale",
            ScalingOutcome::Saturated { .. } => "saturated",
            ScalingOutcome::Superseded { .. } => "superseded",
            ScalingOutcome::Ignored { .. } => "ignored",
            ScalingOutcome::Failed { .. } => "failed",
        }
    }

    /// Whether the cycle went through `state`
    pub fn visited(&self, state: ScalingState) -> bool {
        self.transitions.contains(&state)
    }

    pub fn to_result(&self) -> InvocationResult {
        match &self.outcome {
            ScalingOutcome::Scaled {
                from,
                to,
                memory_units,
                alarm,
            } => match alarm {
                AlarmUpdate::Patched {
                    alarm_name,
                    threshold,
                } => InvocationResult::success(format!(
                    "Scaled {} -> {} ({} MiB); alarm {} threshold set to {}",
                    from, to, memory_units, alarm_name, threshold
                )),
                AlarmUpdate::Stale {
                    alarm_name,
                    threshold,
                    error,
                } => InvocationResult::failure(format!(
                    "Scaled {} -> {} ({} MiB) but alarm {} was not set to {}: {}",
                    from, to, memory_units, alarm_name, threshold, error
                )),
            },
            ScalingOutcome::Saturated {
                current,
                memory_units,
                ceiling,
            } => InvocationResult::success(format!(
                "{} already at memory ceiling ({} of {} MiB), nothing to do",
                current, memory_units, ceiling
            )),
            ScalingOutcome::Superseded { detail, orphaned } => {
                InvocationResult::success(match orphaned {
                    Some(r) => format!("Superseded: {} (unused revision {})", detail, r),
                    None => format!("Superseded: {}", detail),
                })
            }
            ScalingOutcome::Ignored { state } => InvocationResult::success(format!(
                "Alarm state {}, nothing to do",
                state.as_str()
            )),
            ScalingOutcome::Failed {
                state,
                error,
                orphaned,
            } => InvocationResult::failure(match orphaned {
                Some(r) => format!(
                    "Scaling failed while {}: {} (unused revision {})",
                    state, error, r
                ),
                None => format!("Scaling failed while {}: {}", state, error),
            }),
        }
    }
}

/// Holds a target key in the in-flight set until dropped
struct InFlightGuard {
    set: Arc<DashMap<String, ()>>,
    key: String,
}

impl InFlightGuard {
    fn claim(set: &Arc<DashMap<String, ()>>, key: String) -> Option<Self> {
        match set.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    set: set.clone(),
                    key,
                })
            }
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

/// Records the path of one cycle and logs each transition
struct Cycle<'a> {
    logger: &'a StructuredLogger,
    family: &'a str,
    states: Vec<ScalingState>,
}

impl<'a> Cycle<'a> {
    fn new(logger: &'a StructuredLogger, family: &'a str) -> Self {
        Self {
            logger,
            family,
            states: vec![ScalingState::Idle],
        }
    }

    fn current(&self) -> ScalingState {
        self.states.last().copied().unwrap_or(ScalingState::Idle)
    }

    fn enter(&mut self, next: ScalingState) {
        self.logger
            .log_scaling_transition(self.family, self.current().as_str(), next.as_str());
        self.states.push(next);
    }

    fn finish(mut self, outcome: ScalingOutcome) -> ScalingReport {
        if self.current() != ScalingState::Idle {
            self.enter(ScalingState::Idle);
        }
        ScalingReport {
            outcome,
            transitions: self.states,
        }
    }

    fn fail(mut self, error: ScalerError, orphaned: Option<AllocationRef>) -> ScalingReport {
        let state = self.current();
        self.enter(ScalingState::Error);
        ScalingReport {
            outcome: ScalingOutcome::Failed {
                state,
                error,
                orphaned,
            },
            transitions: self.states,
        }
    }
}

/// Turns alarm notifications into allocation changes
#[derive(Clone)]
pub struct ScalingController {
    backends: Backends,
    policy: ScalingPolicy,
    alarm_policy: AlarmThresholdPolicy,
    retry: RetryPolicy,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
    in_flight: Arc<DashMap<String, ()>>,
}

impl ScalingController {
    pub fn new(backends: Backends, metrics: ScalerMetrics, logger: StructuredLogger) -> Self {
        Self {
            backends,
            policy: ScalingPolicy::default(),
            alarm_policy: AlarmThresholdPolicy::default(),
            retry: RetryPolicy::default(),
            metrics,
            logger,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: ScalingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_alarm_policy(mut self, alarm_policy: AlarmThresholdPolicy) -> Self {
        self.alarm_policy = alarm_policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    /// Parse a raw notification and run a cycle if it asks for one
    pub async fn handle_notification(&self, raw: &str, target: &TargetConfig) -> ScalingReport {
        let notification = match parse_notification(raw) {
            Ok(n) => n,
            Err(error) => {
                let report = Cycle::new(&self.logger, &target.family).fail(error, None);
                self.record(&target.family, &report);
                return report;
            }
        };

        if !notification.should_scale() {
            let state = notification.state.unwrap_or(AlarmState::Ok);
            debug!(
                alarm = ?notification.alarm_name,
                state = state.as_str(),
                "Notification does not request scaling"
            );
            let report = ScalingReport {
                outcome: ScalingOutcome::Ignored { state },
                transitions: vec![ScalingState::Idle],
            };
            self.record(&target.family, &report);
            return report;
        }

        match notification.to_request(target, raw) {
            Ok(request) => self.run(request).await,
            Err(error) => {
                let report = Cycle::new(&self.logger, &target.family).fail(error, None);
                self.record(&target.family, &report);
                report
            }
        }
    }

    /// Run one scaling cycle. Never returns an error: every failure ends
    /// up in the report.
    pub async fn run(&self, request: ScalingRequest) -> ScalingReport {
        let key = request.target_key();
        let report = match InFlightGuard::claim(&self.in_flight, key.clone()) {
            Some(_guard) => self.cycle(&request).await,
            None => ScalingReport {
                outcome: ScalingOutcome::Superseded {
                    detail: format!("a scaling cycle for {} is already in flight", key),
                    orphaned: None,
                },
                transitions: vec![ScalingState::Idle],
            },
        };

        self.record(&request.family, &report);
        report
    }

    fn record(&self, family: &str, report: &ScalingReport) {
        self.metrics.inc_scaling_cycles(report.label());
        let summary = report.to_result().summary;
        match &report.outcome {
            ScalingOutcome::Failed { state, error, .. } => {
                self.logger.log_scaling_failed(family, state.as_str(), error)
            }
            ScalingOutcome::Scaled {
                alarm: AlarmUpdate::Stale { error, .. },
                ..
            } => self
                .logger
                .log_scaling_failed(family, ScalingState::AdjustingAlarm.as_str(), error),
            _ => self
                .logger
                .log_scaling_completed(family, report.label(), &summary),
        }
    }

    async fn describe_binding(&self, request: &ScalingRequest) -> ScalerResult<ServiceBinding> {
        self.retry
            .run("describe_binding", &self.metrics, || {
                self.backends
                    .orchestrator
                    .describe_binding(&request.cluster_name, &request.service_name)
            })
            .await
    }

    async fn cycle(&self, request: &ScalingRequest) -> ScalingReport {
        let mut cycle = Cycle::new(&self.logger, &request.family);
        info!(
            cluster = %request.cluster_name,
            service = %request.service_name,
            container = %request.container_name,
            family = %request.family,
            reason = ?request.reason,
            "Starting scaling cycle"
        );

        cycle.enter(ScalingState::Describing);
        let binding = match self.describe_binding(request).await {
            Ok(b) => b,
            Err(e) => return cycle.fail(e, None),
        };
        let expected = binding.active_allocation_ref;

        let current = match self
            .retry
            .run("describe", &self.metrics, || {
                self.backends.allocations.describe(&request.family)
            })
            .await
        {
            Ok(a) => a,
            Err(e) => return cycle.fail(e, None),
        };

        if current.allocation_ref() != expected {
            warn!(
                family = %request.family,
                bound = %expected,
                latest = %current.allocation_ref(),
                "Service is not bound to the latest revision; sizing from the latest"
            );
        }

        cycle.enter(ScalingState::Computing);
        let candidate = match self.policy.plan(&current, &request.container_name) {
            Ok(SizingDecision::ScaleTo(candidate)) => candidate,
            Ok(SizingDecision::Saturated {
                memory_units,
                ceiling,
            }) => {
                return cycle.finish(ScalingOutcome::Saturated {
                    current: current.allocation_ref(),
                    memory_units,
                    ceiling,
                })
            }
            Err(e) => return cycle.fail(e, None),
        };

        cycle.enter(ScalingState::Registering);

        // Bail out before creating a revision if someone already moved the binding
        match self.describe_binding(request).await {
            Ok(b) if b.active_allocation_ref != expected => {
                return cycle.finish(ScalingOutcome::Superseded {
                    detail: format!(
                        "binding moved from {} to {} before registration",
                        expected, b.active_allocation_ref
                    ),
                    orphaned: None,
                })
            }
            Ok(_) => {}
            Err(e) => return cycle.fail(e, None),
        }

        let new_ref = match self
            .retry
            .run("register", &self.metrics, || {
                self.backends.allocations.register(&candidate)
            })
            .await
        {
            Ok(r) => r,
            Err(e) => return cycle.fail(e, None),
        };
        info!(family = %new_ref.family, revision = new_ref.revision, "Registered new revision");

        cycle.enter(ScalingState::Rebinding);
        let rebind = self
            .retry
            .run("rebind", &self.metrics, || {
                self.backends.orchestrator.rebind(
                    &request.cluster_name,
                    &request.service_name,
                    &expected,
                    &new_ref,
                )
            })
            .await;

        match rebind {
            Ok(()) => {}
            Err(ScalerError::Conflict(detail)) => match self.describe_binding(request).await {
                // An earlier attempt landed before its response was lost
                Ok(b) if b.active_allocation_ref == new_ref => {
                    debug!(revision = new_ref.revision, "Rebind already applied");
                }
                Ok(b) => {
                    return cycle.finish(ScalingOutcome::Superseded {
                        detail: format!(
                            "binding moved from {} to {} during rebind: {}",
                            expected, b.active_allocation_ref, detail
                        ),
                        orphaned: Some(new_ref),
                    })
                }
                Err(e) => return cycle.fail(e, Some(new_ref)),
            },
            Err(e) => return cycle.fail(e, Some(new_ref)),
        }
        self.metrics.set_active_revision(new_ref.revision);

        cycle.enter(ScalingState::AdjustingAlarm);
        let mut registered = candidate;
        registered.revision = new_ref.revision;
        let threshold = self.alarm_policy.threshold(&registered);
        let alarm_name = request.alarm_name.clone();

        let alarm = match self
            .retry
            .run("patch_alarm", &self.metrics, || {
                self.backends.metrics.patch_alarm(&alarm_name, threshold)
            })
            .await
        {
            Ok(()) => {
                cycle.enter(ScalingState::Idle);
                AlarmUpdate::Patched {
                    alarm_name,
                    threshold,
                }
            }
            Err(error) => {
                self.metrics.inc_alarm_patch_failures();
                cycle.enter(ScalingState::Error);
                AlarmUpdate::Stale {
                    alarm_name,
                    threshold,
                    error,
                }
            }
        };

        ScalingReport {
            outcome: ScalingOutcome::Scaled {
                from: expected,
                to: new_ref,
                memory_units: registered.memory_units,
                alarm,
            },
            transitions: cycle.states,
        }
    }
}
