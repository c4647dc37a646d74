// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use md5::Md5;
use sha2::{Digest as Sha2Digest, Sha256};

/// Threshold above which a serialized `FunctionInput` is offloaded to blob storage
/// rather than inlined, per the invocation engine's blob-offload rule.
pub const INLINE_SIZE_LIMIT_BYTES: usize = 2 * 1024 * 1024;

/// Content digest of a blob payload, computed the way `BlobCreate` expects it:
/// MD5 for the `Content-MD5` PUT header, SHA-256 for server-side dedup, both
/// base64-encoded (not hex, unlike a REAPI-style digest — blob uploads speak
/// HTTP, and `Content-MD5` is defined in terms of base64).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlobDigest {
    pub md5_base64: String,
    pub sha256_base64: String,
    pub size_bytes: usize,
}

impl BlobDigest {
    pub fn of_bytes(content: &Bytes) -> Self {
        let md5_hash = Md5::digest(&content[..]);
        let sha256_hash = Sha256::digest(&content[..]);
        BlobDigest {
            md5_base64: BASE64.encode(md5_hash),
            sha256_base64: BASE64.encode(sha256_hash),
            size_bytes: content.len(),
        }
    }

    pub fn exceeds_inline_limit(&self) -> bool {
        self.size_bytes > INLINE_SIZE_LIMIT_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_known_bytes() {
        let content = Bytes::from_static(b"foobar");
        let digest = BlobDigest::of_bytes(&content);
        // md5("foobar") = 3858f62230ac3c915f300c664312c63f
        assert_eq!(digest.md5_base64, "OFj2IjCsPJFfMAxmQxLGPw==");
        assert_eq!(digest.size_bytes, 6);
    }

    #[test]
    fn large_payload_exceeds_inline_limit() {
        let content = Bytes::from(vec![b'x'; 3_000_000]);
        let digest = BlobDigest::of_bytes(&content);
        assert!(digest.exceeds_inline_limit());
        assert_eq!(digest.size_bytes, 3_000_000);
    }

    #[test]
    fn small_payload_is_inline() {
        let content = Bytes::from_static(b"hello");
        let digest = BlobDigest::of_bytes(&content);
        assert!(!digest.exceeds_inline_limit());
    }
}
