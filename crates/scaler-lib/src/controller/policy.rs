//! Sizing policy for scale-up decisions
//!
//! Computes the next allocation from the current one: step the memory up,
//! clamp to the ceiling, then snap onto the platform's valid (cpu, memory)
//! pairs. The alarm threshold for the new allocation is derived here too.

use crate::error::{ScalerError, ScalerResult};
use crate::models::ResourceAllocation;
use serde::{Deserialize, Serialize};

/// How far one scale-up moves memory
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Add a fixed number of MiB
    Fixed { memory_units: u32 },
    /// Multiply by a factor, rounding up to a whole MiB
    Factor { factor: f64 },
}

impl Step {
    fn apply(&self, memory_units: u32) -> u64 {
        match *self {
            Step::Fixed { memory_units: step } => u64::from(memory_units) + u64::from(step),
            Step::Factor { factor } => (f64::from(memory_units) * factor).ceil() as u64,
        }
    }
}

/// Valid (cpu, memory) combinations for a launch platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Any positive pair is accepted
    #[default]
    Unconstrained,
    /// Serverless task sizes with a discrete compatibility matrix
    Fargate,
}

/// One CPU tier and the memory sizes it supports
#[derive(Debug, Clone, PartialEq, Eq)]
struct CpuTier {
    cpu_units: u32,
    memory_units: Vec<u32>,
}

/// Discrete table of supported (cpu, memory) pairs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityMatrix {
    tiers: Vec<CpuTier>,
}

impl CompatibilityMatrix {
    /// Task sizes accepted by the serverless launch type
    pub fn fargate() -> Self {
        let range = |from: u32, to: u32, step: u32| -> Vec<u32> {
            (from..=to).step_by(step as usize).collect()
        };
        Self {
            tiers: vec![
                CpuTier {
                    cpu_units: 256,
                    memory_units: vec![512, 1024, 2048],
                },
                CpuTier {
                    cpu_units: 512,
                    memory_units: range(1024, 4096, 1024),
                },
                CpuTier {
                    cpu_units: 1024,
                    memory_units: range(2048, 8192, 1024),
                },
                CpuTier {
                    cpu_units: 2048,
                    memory_units: range(4096, 16384, 1024),
                },
                CpuTier {
                    cpu_units: 4096,
                    memory_units: range(8192, 30720, 1024),
                },
                CpuTier {
                    cpu_units: 8192,
                    memory_units: range(16384, 61440, 4096),
                },
                CpuTier {
                    cpu_units: 16384,
                    memory_units: range(32768, 122880, 8192),
                },
            ],
        }
    }

    pub fn contains(&self, cpu_units: u32, memory_units: u32) -> bool {
        self.tiers
            .iter()
            .any(|t| t.cpu_units == cpu_units && t.memory_units.contains(&memory_units))
    }

    /// Smallest valid pair with memory at or above `target_memory` and cpu
    /// at or above `min_cpu`, not exceeding `ceiling`. Ties on memory go
    /// to the smaller cpu.
    pub fn snap(&self, min_cpu: u32, target_memory: u32, ceiling: u32) -> Option<(u32, u32)> {
        self.tiers
            .iter()
            .filter(|t| t.cpu_units >= min_cpu)
            .flat_map(|t| t.memory_units.iter().map(move |m| (t.cpu_units, *m)))
            .filter(|&(_, m)| m >= target_memory && m <= ceiling)
            .min_by_key(|&(cpu, m)| (m, cpu))
    }
}

/// Result of planning one scale-up
#[derive(Debug, Clone, PartialEq)]
pub enum SizingDecision {
    /// Register this candidate
    ScaleTo(ResourceAllocation),
    /// Already at the ceiling; nothing to do
    Saturated { memory_units: u32, ceiling: u32 },
}

/// Scale-up policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingPolicy {
    pub step: Step,
    /// Memory ceiling in MiB
    pub max_memory_units: u32,
    /// Keep the cpu/memory ratio when no compatibility matrix applies
    pub cpu_follows_memory: bool,
    pub platform: Platform,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            step: Step::Fixed { memory_units: 256 },
            max_memory_units: 4096,
            cpu_follows_memory: false,
            platform: Platform::Unconstrained,
        }
    }
}

impl ScalingPolicy {
    pub fn validate(&self) -> ScalerResult<()> {
        match self.step {
            Step::Fixed { memory_units: 0 } => {
                return Err(ScalerError::Validation(
                    "fixed memory step must be positive".into(),
                ))
            }
            Step::Factor { factor } if !(factor.is_finite() && factor > 1.0) => {
                return Err(ScalerError::Validation(format!(
                    "memory factor must be greater than 1, got {}",
                    factor
                )))
            }
            _ => {}
        }
        if self.max_memory_units == 0 {
            return Err(ScalerError::Validation(
                "memory ceiling must be positive".into(),
            ));
        }
        Ok(())
    }

    fn matrix(&self) -> Option<CompatibilityMatrix> {
        match self.platform {
            Platform::Unconstrained => None,
            Platform::Fargate => Some(CompatibilityMatrix::fargate()),
        }
    }

    /// Plan the next allocation for `current`.
    ///
    /// Memory never decreases and never exceeds the ceiling. On a
    /// constrained platform the result is always a valid pair.
    pub fn plan(
        &self,
        current: &ResourceAllocation,
        container_name: &str,
    ) -> ScalerResult<SizingDecision> {
        self.validate()?;

        let stepped = self.step.apply(current.memory_units);
        let target = stepped.min(u64::from(self.max_memory_units)) as u32;

        if target <= current.memory_units {
            return Ok(SizingDecision::Saturated {
                memory_units: current.memory_units,
                ceiling: self.max_memory_units,
            });
        }

        let (cpu_units, memory_units) = match self.matrix() {
            Some(matrix) => matrix
                .snap(current.cpu_units, target, self.max_memory_units)
                .ok_or_else(|| {
                    ScalerError::Validation(format!(
                        "no compatible (cpu, memory) pair with cpu >= {} and {} <= memory <= {}",
                        current.cpu_units, target, self.max_memory_units
                    ))
                })?,
            None if self.cpu_follows_memory => {
                let scaled = (u64::from(current.cpu_units) * u64::from(target))
                    .div_ceil(u64::from(current.memory_units.max(1)));
                (scaled.max(u64::from(current.cpu_units)) as u32, target)
            }
            None => (current.cpu_units, target),
        };

        Ok(SizingDecision::ScaleTo(candidate(
            current,
            container_name,
            cpu_units,
            memory_units,
        )))
    }
}

/// Copy `current` with new task-level sizes. The named container's hard
/// memory limit grows by the same delta, capped at the task memory.
fn candidate(
    current: &ResourceAllocation,
    container_name: &str,
    cpu_units: u32,
    memory_units: u32,
) -> ResourceAllocation {
    let delta = memory_units.saturating_sub(current.memory_units);
    let mut next = current.clone();
    next.cpu_units = cpu_units;
    next.memory_units = memory_units;

    for container in next
        .container_definitions
        .iter_mut()
        .filter(|c| c.name == container_name)
    {
        if let Some(limit) = container.memory {
            container.memory = Some(limit.saturating_add(delta).min(memory_units));
        }
    }

    next
}

/// Derives the alarm threshold for an allocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmThresholdPolicy {
    /// Fraction of the allocated memory at which the alarm fires
    pub utilization_ratio: f64,
}

impl Default for AlarmThresholdPolicy {
    fn default() -> Self {
        Self {
            utilization_ratio: 0.8,
        }
    }
}

impl AlarmThresholdPolicy {
    pub fn validate(&self) -> ScalerResult<()> {
        if !(self.utilization_ratio.is_finite() && self.utilization_ratio > 0.0) {
            return Err(ScalerError::Validation(format!(
                "alarm utilization ratio must be positive, got {}",
                self.utilization_ratio
            )));
        }
        Ok(())
    }

    pub fn threshold(&self, allocation: &ResourceAllocation) -> f64 {
        f64::from(allocation.memory_units) * self.utilization_ratio
    }
}
