// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![allow(clippy::derive_partial_eq_without_eq)]
#![allow(clippy::doc_lazy_continuation)]

// `prost` emits one file per proto package; all four of our `.proto` sources share the
// `rc.v1` package, so the generator collapses them into a single module.
pub mod rc {
    pub mod v1 {
        include!(concat!(env!("OUT_DIR"), "/rc.v1.rs"));
    }
}

#[cfg(test)]
mod tests;
