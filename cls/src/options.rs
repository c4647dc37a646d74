// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use protos::rc::v1::{FunctionOptions, ResourceConfig, RetryPolicy as WireRetryPolicy};
use rc_errors::RcError;

/// A resource request, expressed the same way the wire does: a base value plus
/// an optional ceiling. `cpu_limit`/`memory_limit` only make sense alongside a
/// base `cpu`/`memory`, and the ceiling can never sit below the base.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resources {
    pub milli_cpu: Option<u32>,
    pub milli_cpu_max: Option<u32>,
    pub memory_mb: Option<u32>,
    pub memory_mb_max: Option<u32>,
    pub gpu_config: Option<String>,
}

impl Resources {
    fn validate(&self) -> Result<(), RcError> {
        if self.milli_cpu_max.is_some() && self.milli_cpu.is_none() {
            return Err(RcError::InvalidArgument(
                "cpu limit requires a base cpu value".to_owned(),
            ));
        }
        if self.memory_mb_max.is_some() && self.memory_mb.is_none() {
            return Err(RcError::InvalidArgument(
                "memory limit requires a base memory value".to_owned(),
            ));
        }
        if let (Some(base), Some(max)) = (self.milli_cpu, self.milli_cpu_max) {
            if max < base {
                return Err(RcError::InvalidArgument(
                    "cpu limit must be at least the base cpu value".to_owned(),
                ));
            }
        }
        if let (Some(base), Some(max)) = (self.memory_mb, self.memory_mb_max) {
            if max < base {
                return Err(RcError::InvalidArgument(
                    "memory limit must be at least the base memory value".to_owned(),
                ));
            }
        }
        Ok(())
    }

    pub fn into_wire(self) -> Result<ResourceConfig, RcError> {
        self.validate()?;
        Ok(ResourceConfig {
            milli_cpu: self.milli_cpu.unwrap_or_default(),
            milli_cpu_max: self.milli_cpu_max,
            memory_mb: self.memory_mb.unwrap_or_default(),
            memory_mb_max: self.memory_mb_max,
            gpu_config: self.gpu_config,
        })
    }
}

/// `retryPolicy` as either a bare retry count (the common case, translated to a
/// fixed backoff of 1.0 coefficient / 1s initial delay) or a fully explicit
/// policy for callers that need custom backoff.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    Count(u32),
    Explicit {
        retries: u32,
        backoff_coefficient: f64,
        initial_delay_ms: u32,
        max_delay_ms: u32,
    },
}

impl RetryPolicy {
    fn into_wire(self) -> WireRetryPolicy {
        match self {
            RetryPolicy::Count(retries) => WireRetryPolicy {
                retries,
                backoff_coefficient: 1.0,
                initial_delay_ms: 1_000,
                max_delay_ms: 1_000,
            },
            RetryPolicy::Explicit {
                retries,
                backoff_coefficient,
                initial_delay_ms,
                max_delay_ms,
            } => WireRetryPolicy {
                retries,
                backoff_coefficient,
                initial_delay_ms,
                max_delay_ms,
            },
        }
    }
}

fn whole_seconds(label: &str, millis: u32) -> Result<u32, RcError> {
    if millis % 1000 != 0 {
        return Err(RcError::InvalidArgument(format!(
            "{label} must be a whole-second multiple of milliseconds, got {millis}ms"
        )));
    }
    Ok(millis / 1000)
}

/// The overlay `withOptions`/`withConcurrency`/`withBatching` accumulate into,
/// merged shallowly (undefined fields never clobber a previously-set value) and
/// only sent over the wire as `FunctionOptions` when at least one field is set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClsOptions {
    pub resources: Option<Resources>,
    pub retry_policy: Option<RetryPolicy>,
    pub secret_ids: Option<Vec<String>>,
    pub volume_mount_ids: Option<Vec<String>>,
    pub task_idle_timeout_ms: Option<u32>,
    pub timeout_ms: Option<u32>,
    pub concurrency_limit: Option<u32>,
    pub batch_max_size: Option<u32>,
    pub batch_wait_ms: Option<u32>,
    pub scaledown_window_secs: Option<u32>,
}

impl ClsOptions {
    pub fn is_empty(&self) -> bool {
        self == &ClsOptions::default()
    }

    /// Merge `other` onto `self`, field by field, preferring `other` whenever it
    /// sets a field. This is what `withOptions`/`withConcurrency`/`withBatching`
    /// use to derive a new `Cls` without mutating the original.
    pub fn merge(&self, other: &ClsOptions) -> ClsOptions {
        ClsOptions {
            resources: other.resources.clone().or_else(|| self.resources.clone()),
            retry_policy: other.retry_policy.clone().or_else(|| self.retry_policy.clone()),
            secret_ids: other.secret_ids.clone().or_else(|| self.secret_ids.clone()),
            volume_mount_ids: other
                .volume_mount_ids
                .clone()
                .or_else(|| self.volume_mount_ids.clone()),
            task_idle_timeout_ms: other.task_idle_timeout_ms.or(self.task_idle_timeout_ms),
            timeout_ms: other.timeout_ms.or(self.timeout_ms),
            concurrency_limit: other.concurrency_limit.or(self.concurrency_limit),
            batch_max_size: other.batch_max_size.or(self.batch_max_size),
            batch_wait_ms: other.batch_wait_ms.or(self.batch_wait_ms),
            scaledown_window_secs: other.scaledown_window_secs.or(self.scaledown_window_secs),
        }
    }

    /// Produce the wire `FunctionOptions` for a `FunctionBindParams` call, or
    /// `None` when the overlay carries no changes (per spec: the overlay is only
    /// sent when non-empty).
    pub fn into_wire(self) -> Result<Option<FunctionOptions>, RcError> {
        if self.is_empty() {
            return Ok(None);
        }

        let secret_ids_set = self.secret_ids.as_ref().is_some_and(|ids| !ids.is_empty());
        let volume_mounts_set = self
            .volume_mount_ids
            .as_ref()
            .is_some_and(|ids| !ids.is_empty());

        Ok(Some(FunctionOptions {
            resources: self.resources.map(Resources::into_wire).transpose()?,
            retry_policy: self.retry_policy.map(RetryPolicy::into_wire),
            secret_ids: self.secret_ids.unwrap_or_default(),
            replace_secret_ids: secret_ids_set,
            volume_mount_ids: self.volume_mount_ids.unwrap_or_default(),
            replace_volume_mount_ids: volume_mounts_set,
            task_idle_timeout_secs: self
                .task_idle_timeout_ms
                .map(|ms| whole_seconds("taskIdleTimeoutSecs", ms))
                .transpose()?,
            timeout_secs: self
                .timeout_ms
                .map(|ms| whole_seconds("timeoutSecs", ms))
                .transpose()?,
            concurrency_limit: self.concurrency_limit,
            batch_max_size: self.batch_max_size,
            batch_wait_ms: self.batch_wait_ms,
            scaledown_window_secs: self.scaledown_window_secs,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_overlay_has_no_wire_representation() {
        assert!(ClsOptions::default().into_wire().unwrap().is_none());
    }

    #[test]
    fn merge_prefers_other_and_falls_back_to_self() {
        let base = ClsOptions {
            concurrency_limit: Some(4),
            batch_max_size: Some(10),
            ..Default::default()
        };
        let overlay = ClsOptions {
            concurrency_limit: Some(8),
            ..Default::default()
        };
        let merged = base.merge(&overlay);
        assert_eq!(merged.concurrency_limit, Some(8));
        assert_eq!(merged.batch_max_size, Some(10));
    }

    #[test]
    fn merging_empty_overlay_is_idempotent() {
        let base = ClsOptions {
            concurrency_limit: Some(4),
            ..Default::default()
        };
        let merged = base.merge(&ClsOptions::default());
        assert_eq!(merged, base);
    }

    #[test]
    fn cpu_limit_without_base_cpu_is_rejected() {
        let resources = Resources {
            milli_cpu_max: Some(2000),
            ..Default::default()
        };
        let err = resources.into_wire().unwrap_err();
        assert!(matches!(err, RcError::InvalidArgument(_)));
    }

    #[test]
    fn cpu_limit_below_base_is_rejected() {
        let resources = Resources {
            milli_cpu: Some(2000),
            milli_cpu_max: Some(1000),
            ..Default::default()
        };
        let err = resources.into_wire().unwrap_err();
        assert!(matches!(err, RcError::InvalidArgument(_)));
    }

    #[test]
    fn timeout_not_a_whole_second_is_rejected() {
        let options = ClsOptions {
            timeout_ms: Some(1500),
            ..Default::default()
        };
        let err = options.into_wire().unwrap_err();
        assert!(matches!(err, RcError::InvalidArgument(_)));
    }

    #[test]
    fn secret_ids_set_replace_flag_only_when_non_empty() {
        let options = ClsOptions {
            secret_ids: Some(vec!["s1".to_owned()]),
            ..Default::default()
        };
        let wire = options.into_wire().unwrap().unwrap();
        assert!(wire.replace_secret_ids);

        let options = ClsOptions {
            secret_ids: Some(vec![]),
            ..Default::default()
        };
        let wire = options.into_wire().unwrap().unwrap();
        assert!(!wire.replace_secret_ids);
    }

    #[test]
    fn retry_policy_count_uses_fixed_backoff() {
        let wire = RetryPolicy::Count(3).into_wire();
        assert_eq!(wire.retries, 3);
        assert_eq!(wire.backoff_coefficient, 1.0);
        assert_eq!(wire.initial_delay_ms, 1_000);
    }
}
