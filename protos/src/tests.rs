// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use bytes::BytesMut;
use prost::Message;

use crate::rc::v1 as rc_protos;

#[test]
fn test_function_input_round_trips() {
    let mut input = rc_protos::FunctionInput::default();
    input.args = b"\x82\xf6\xa0".to_vec().into();
    input.data_format = rc_protos::DataFormat::Cbor as i32;

    let mut buf = BytesMut::with_capacity(input.encoded_len());
    input.encode(&mut buf).unwrap();

    let decoded = rc_protos::FunctionInput::decode(&mut buf).expect("decoded function input");
    assert_eq!(input, decoded);
}

#[test]
fn test_class_parameter_set_round_trips() {
    let set = rc_protos::ClassParameterSet {
        parameters: vec![
            rc_protos::ClassParameterValue {
                name: "a".to_owned(),
                r#type: rc_protos::ParameterType::String as i32,
                value: Some(rc_protos::class_parameter_value::Value::StringValue(
                    "x".to_owned(),
                )),
            },
            rc_protos::ClassParameterValue {
                name: "b".to_owned(),
                r#type: rc_protos::ParameterType::Int as i32,
                value: Some(rc_protos::class_parameter_value::Value::IntValue(1)),
            },
        ],
    };

    let mut buf = BytesMut::with_capacity(set.encoded_len());
    set.encode(&mut buf).unwrap();
    let decoded = rc_protos::ClassParameterSet::decode(&mut buf).expect("decoded param set");
    assert_eq!(set, decoded);
}
