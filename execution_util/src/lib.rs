// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use rand::Rng;
use uuid::Uuid;

/// An idempotency key shared by every attempt of one logical retry-middleware call.
pub type IdempotencyKey = String;

/// NB: `rand::thread_rng` is used instead of `Uuid::new_v4` to avoid pulling in the
/// `getrandom`-backed `v4` feature on platforms where it is awkward to vendor.
pub fn generate_uuid() -> String {
    let mut rng = rand::thread_rng();
    Uuid::from_bytes(rng.gen()).to_string()
}

/// Generated once at the entry point of the retry middleware (per Design Notes §9),
/// not per attempt: every attempt of a logical call carries the same key so the
/// server can deduplicate.
pub fn generate_idempotency_key() -> IdempotencyKey {
    generate_uuid()
}

/// Recognized opaque-id prefixes (spec §6). The core never parses beyond equality
/// comparison; this only validates the prefix shape for early, helpful errors.
pub const IMAGE_ID_PREFIX: &str = "im-";
pub const APP_ID_PREFIX: &str = "ap-";
pub const FUNCTION_ID_PREFIXES: [&str; 2] = ["fu-", "fi-"];
pub const SANDBOX_ID_PREFIX: &str = "sb-";
pub const SECRET_ID_PREFIX: &str = "sc-";
pub const VOLUME_ID_PREFIX: &str = "vo-";
pub const PROXY_ID_PREFIX: &str = "pr-";

pub fn has_prefix(id: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| id.starts_with(prefix))
}
