// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;

use cls::Resources;
use protos::rc::v1::{OpenPort, SandboxCreateRequest, SandboxNetworkMode};
use rc_errors::RcError;

const DEFAULT_TIMEOUT_SECS: u32 = 300;

fn whole_seconds(label: &str, millis: u32) -> Result<u32, RcError> {
    if millis % 1000 != 0 {
        return Err(RcError::InvalidArgument(format!(
            "{label} must be a whole-second multiple of milliseconds, got {millis}ms"
        )));
    }
    Ok(millis / 1000)
}

/// Network isolation for a sandbox: at most one of `block_network` or a
/// `cidr_allowlist` may be set, never both.
#[derive(Clone, Debug, Default)]
pub enum NetworkPolicy {
    #[default]
    Open,
    Blocked,
    CidrAllowlist(Vec<String>),
}

/// Where to expose a listening port inside the sandbox.
#[derive(Clone, Debug)]
pub struct Port {
    pub port: u32,
    pub unencrypted: bool,
    pub tunnel: bool,
}

/// Everything `create` needs beyond the resolved image id, mirroring
/// `SandboxCreateRequest` with the same validation [[cls]]'s `ClsOptions`
/// applies to function binding: cpu/memory ceilings require a base, and
/// timeouts are rejected unless they're whole-second multiples.
#[derive(Clone, Debug, Default)]
pub struct SandboxOptions {
    pub command: Vec<String>,
    pub timeout_ms: Option<u32>,
    pub idle_timeout_ms: Option<u32>,
    pub workdir: Option<String>,
    pub resources: Option<Resources>,
    pub network: NetworkPolicy,
    pub open_ports: Vec<Port>,
    pub secret_ids: Vec<String>,
    pub volume_mount_ids: Vec<String>,
    pub name: Option<String>,
    pub tags: HashMap<String, String>,
}

impl SandboxOptions {
    pub(crate) fn into_wire(self, app_id: String, image_id: String) -> Result<SandboxCreateRequest, RcError> {
        if let Some(workdir) = &self.workdir {
            if !workdir.starts_with('/') {
                return Err(RcError::InvalidArgument(format!(
                    "workdir must be absolute, got {workdir}"
                )));
            }
        }

        let timeout_secs = self
            .timeout_ms
            .map(|ms| whole_seconds("timeoutMs", ms))
            .transpose()?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let idle_timeout_secs = self
            .idle_timeout_ms
            .map(|ms| whole_seconds("idleTimeoutMs", ms))
            .transpose()?;

        let (network_mode, block_network, cidr_allowlist) = match self.network {
            NetworkPolicy::Open => (SandboxNetworkMode::Open, false, Vec::new()),
            NetworkPolicy::Blocked => (SandboxNetworkMode::Blocked, true, Vec::new()),
            NetworkPolicy::CidrAllowlist(cidrs) => (SandboxNetworkMode::Open, false, cidrs),
        };

        let resources = self
            .resources
            .map(Resources::into_wire)
            .transpose()?
            .unwrap_or_default();

        Ok(SandboxCreateRequest {
            app_id,
            image_id,
            command: self.command,
            timeout_secs,
            idle_timeout_secs,
            workdir: self.workdir.unwrap_or_else(|| "/".to_owned()),
            resources: Some(resources),
            network_mode: network_mode as i32,
            block_network,
            cidr_allowlist,
            open_ports: self
                .open_ports
                .into_iter()
                .map(|p| OpenPort {
                    port: p.port,
                    unencrypted: p.unencrypted,
                    tunnel: p.tunnel,
                })
                .collect(),
            secret_ids: self.secret_ids,
            volume_mount_ids: self.volume_mount_ids,
            name: self.name,
            tags: self.tags,
        })
    }
}
