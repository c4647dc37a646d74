// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use protos::rc::v1::FunctionHandleMetadata;

/// An immutable reference to a deployed function: an id, an optional bound
/// method name (for a `ClsInstance` method), and the metadata the control
/// plane returned when the function was looked up or deployed. This core
/// does not itself resolve a name to a [`Function`] — that lookup lives
/// outside the core's scope; callers construct one from whatever id/metadata
/// their surrounding tooling already has.
#[derive(Clone, Debug)]
pub struct Function {
    pub function_id: String,
    pub method_name: Option<String>,
    pub handle_metadata: FunctionHandleMetadata,
}

impl Function {
    pub fn new(function_id: impl Into<String>, handle_metadata: FunctionHandleMetadata) -> Self {
        Function {
            function_id: function_id.into(),
            method_name: None,
            handle_metadata,
        }
    }

    pub fn with_method_name(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = Some(method_name.into());
        self
    }

    pub fn is_web_endpoint(&self) -> bool {
        self.handle_metadata.web_url.is_some()
    }
}
