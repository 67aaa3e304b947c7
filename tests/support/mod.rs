//! Shared helpers for integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use explain_metadata::metadata::SparseTensorNames;
use explain_metadata::{ExplainMetadata, MetadataError};
use serde_json::Value;

/// The smallest document that parses: one input, one output.
pub const MINIMAL_METADATA: &str = r#"{"inputs":{"x":{"input_tensor_name":"x:0"}},
 "outputs":{"y":{"output_tensor_name":"y:0"}},
 "framework":"tensorflow"}"#;

/// Parse `value` as metadata, panicking on failure.
pub fn parse(value: &Value) -> ExplainMetadata {
    ExplainMetadata::from_dict(value).unwrap_or_else(|e| panic!("parse metadata: {e}"))
}

/// Parse `value` as metadata, panicking unless it is rejected as invalid.
pub fn reject(value: &Value) -> String {
    match ExplainMetadata::from_dict(value) {
        Ok(_) => panic!("metadata unexpectedly accepted: {value}"),
        Err(e @ MetadataError::InvalidMetadata(_)) => e.to_string(),
        Err(e) => panic!("expected InvalidMetadata, got {e}"),
    }
}

/// Names for a sparse tensor `<stem>/values`, `<stem>/indices`,
/// `<stem>/shape`.
pub fn sparse_names(stem: &str) -> SparseTensorNames {
    SparseTensorNames {
        values: format!("{stem}/values"),
        indices: format!("{stem}/indices"),
        dense_shape: format!("{stem}/shape"),
    }
}

pub fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() < tol
}
