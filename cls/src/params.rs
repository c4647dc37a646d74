// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;

use protos::rc::v1::class_parameter_value::Value as ParamWireValue;
use protos::rc::v1::{ClassParameterSet, ClassParameterValue, ParameterType};
use rc_errors::RcError;

/// A parameter value supplied by the caller or taken from a schema default.
/// Mirrors `ClassParameterValue`'s `oneof value` one-to-one so encoding is a
/// straight conversion, not a mapping table.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    String(String),
    Int(i64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl ParamValue {
    fn wire_type(&self) -> ParameterType {
        match self {
            ParamValue::String(_) => ParameterType::String,
            ParamValue::Int(_) => ParameterType::Int,
            ParamValue::Bool(_) => ParameterType::Bool,
            ParamValue::Bytes(_) => ParameterType::Bytes,
        }
    }

    fn into_wire(self) -> ParamWireValue {
        match self {
            ParamValue::String(value) => ParamWireValue::StringValue(value),
            ParamValue::Int(value) => ParamWireValue::IntValue(value),
            ParamValue::Bool(value) => ParamWireValue::BoolValue(value),
            ParamValue::Bytes(value) => ParamWireValue::BytesValue(value.into()),
        }
    }
}

/// One entry in a parameterized class's declared parameter list.
#[derive(Clone, Debug)]
pub struct ParameterSchema {
    pub name: String,
    pub param_type: ParameterType,
    pub default: Option<ParamValue>,
}

impl ParameterSchema {
    pub fn required(name: impl Into<String>, param_type: ParameterType) -> Self {
        ParameterSchema {
            name: name.into(),
            param_type,
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, param_type: ParameterType, default: ParamValue) -> Self {
        ParameterSchema {
            name: name.into(),
            param_type,
            default: Some(default),
        }
    }
}

/// Fill defaults, type-check, and sort a caller-supplied parameter map into the
/// wire's `ClassParameterSet`. Sort order is lexicographic by name: the server
/// keys its parameterized-function cache on the serialized bytes, so two callers
/// supplying the same values in different map-insertion orders must still
/// produce byte-identical output.
pub fn encode_parameters(
    schema: &[ParameterSchema],
    mut supplied: HashMap<String, ParamValue>,
) -> Result<ClassParameterSet, RcError> {
    let mut resolved: Vec<(String, ParamValue)> = Vec::with_capacity(schema.len());

    for field in schema {
        let value = match supplied.remove(&field.name) {
            Some(value) => value,
            None => field.default.clone().ok_or_else(|| {
                RcError::InvalidArgument(format!("missing required parameter `{}`", field.name))
            })?,
        };

        if value.wire_type() != field.param_type {
            return Err(RcError::InvalidArgument(format!(
                "parameter `{}` expects type {:?}, got {:?}",
                field.name,
                field.param_type,
                value.wire_type()
            )));
        }

        resolved.push((field.name.clone(), value));
    }

    if let Some(unknown_name) = supplied.keys().next() {
        return Err(RcError::InvalidArgument(format!(
            "unknown parameter `{unknown_name}`"
        )));
    }

    resolved.sort_by(|(a, _), (b, _)| a.cmp(b));

    let parameters = resolved
        .into_iter()
        .map(|(name, value)| {
            let param_type = value.wire_type() as i32;
            ClassParameterValue {
                name,
                r#type: param_type,
                value: Some(value.into_wire()),
            }
        })
        .collect();

    Ok(ClassParameterSet { parameters })
}
