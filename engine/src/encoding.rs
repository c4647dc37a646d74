// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use ciborium::value::Value;
use digest::BlobDigest;
use protos::rc::v1::DataFormat;
use rc_errors::RcError;

/// A function argument or keyword value. Re-exported so callers building a call
/// don't need to depend on `ciborium` directly.
pub type CborValue = Value;

/// Serialize positional args and keyword args the way every invocation path
/// (`invoke`, `spawn`, `FunctionMap`) encodes a `FunctionInput.bytes` payload: a
/// 2-element CBOR array of `[args, kwargs]`, args as an array and kwargs as a map
/// keyed by name. The server only ever accepts this format; pickle and ASGI-style
/// payloads that the original implementation also emitted are out of scope here.
pub fn encode_args_kwargs(args: &[CborValue], kwargs: &[(String, CborValue)]) -> Result<Bytes, RcError> {
    let kwargs_map = Value::Map(
        kwargs
            .iter()
            .map(|(k, v)| (Value::Text(k.clone()), v.clone()))
            .collect(),
    );
    let payload = Value::Array(vec![Value::Array(args.to_vec()), kwargs_map]);

    let mut buf = Vec::new();
    ciborium::ser::into_writer(&payload, &mut buf)
        .map_err(|err| RcError::InvalidArgument(format!("failed to encode call arguments: {err}")))?;
    Ok(Bytes::from(buf))
}

/// Decode a `GenericResult.data` payload. Only `DataFormat::Cbor` is accepted: any
/// other format (pickle, ASGI) is surfaced as `UnsupportedDataFormat` rather than
/// guessed at, since this core never produces those formats and has no interpreter
/// to safely decode pickle with anyway.
pub fn decode_result(data: &[u8], data_format: DataFormat) -> Result<CborValue, RcError> {
    if data_format != DataFormat::Cbor {
        return Err(RcError::UnsupportedDataFormat(format!(
            "expected CBOR result, got {data_format:?}"
        )));
    }
    ciborium::de::from_reader(data)
        .map_err(|err| RcError::InvalidArgument(format!("failed to decode call result: {err}")))
}

/// Decide whether a serialized `FunctionInput` payload must be offloaded to blob
/// storage rather than inlined in the RPC request, mirroring the engine's
/// `BlobDigest::exceeds_inline_limit` check.
pub fn needs_blob_offload(payload: &Bytes) -> bool {
    BlobDigest::of_bytes(payload).exceeds_inline_limit()
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Collaborator boundary for blob upload/download, letting the invocation engine's
/// offload logic be exercised without a concrete `BlobCreate`/HTTP-PUT
/// implementation wired in (that belongs to the client's blob transport, out of
/// this crate's scope).
pub trait BlobStore: Send + Sync {
    fn upload(&self, content: Bytes) -> BoxFuture<'_, Result<String, RcError>>;
    fn download(&self, blob_id: &str) -> BoxFuture<'_, Result<Bytes, RcError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_args_and_kwargs() {
        let args = vec![Value::Integer(1.into()), Value::Text("a".to_owned())];
        let kwargs = vec![("flag".to_owned(), Value::Bool(true))];
        let encoded = encode_args_kwargs(&args, &kwargs).unwrap();

        let decoded: Value = ciborium::de::from_reader(&encoded[..]).unwrap();
        let Value::Array(top) = decoded else {
            panic!("expected top-level array");
        };
        assert_eq!(top.len(), 2);
        assert_eq!(top[0], Value::Array(args));
    }

    #[test]
    fn rejects_non_cbor_result_format() {
        let err = decode_result(b"\x80", DataFormat::Pickle).unwrap_err();
        assert!(matches!(err, RcError::UnsupportedDataFormat(_)));
    }

    #[test]
    fn small_payload_does_not_need_offload() {
        assert!(!needs_blob_offload(&Bytes::from_static(b"hello")));
    }

    #[test]
    fn large_payload_needs_offload() {
        let payload = Bytes::from(vec![0u8; 3_000_000]);
        assert!(needs_blob_offload(&payload));
    }
}
