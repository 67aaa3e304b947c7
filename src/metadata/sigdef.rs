//! Signature-only inputs that the explainer feeds but never attributes.
//!
//! These are populated by metadata builders, for example when a serving
//! signature accepts a base-64 blob that the graph decodes before the
//! explainable tensor.

use indexmap::IndexMap;
use serde_json::Value;

use super::{
    MetadataError,
    fields::{Dict, as_dict, check_known_keys, emit, lowercase_keys, opt_string, string_value},
    keys::SigDefInputKey,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigDefInputMetadata {
    name: String,
    sigdef_input_tensor_name: Option<String>,
    sigdef_input_tensor_dtype: Option<String>,
}

impl SigDefInputMetadata {
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] if `name` is empty.
    pub fn new(
        name: impl Into<String>,
        tensor_name: Option<String>,
        tensor_dtype: Option<String>,
    ) -> Result<Self, MetadataError> {
        let name = name.into();
        if name.is_empty() {
            return Err(MetadataError::invalid(
                "sigdef input name must be a non-empty string",
            ));
        }
        Ok(Self {
            name,
            sigdef_input_tensor_name: tensor_name,
            sigdef_input_tensor_dtype: tensor_dtype,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The signature tensor; the friendly name when unset.
    #[must_use]
    pub fn sigdef_input_tensor_name(&self) -> &str {
        self.sigdef_input_tensor_name
            .as_deref()
            .unwrap_or(&self.name)
    }

    #[must_use]
    pub fn sigdef_input_tensor_dtype(&self) -> Option<&str> {
        self.sigdef_input_tensor_dtype.as_deref()
    }

    pub fn set_sigdef_input_tensor_dtype(&mut self, dtype: impl Into<String>) {
        self.sigdef_input_tensor_dtype = Some(dtype.into());
    }

    #[must_use]
    pub fn tensor_dtypes(&self) -> IndexMap<String, String> {
        self.sigdef_input_tensor_dtype
            .iter()
            .map(|dtype| (self.sigdef_input_tensor_name().to_owned(), dtype.clone()))
            .collect()
    }

    /// Parse the entry stored under `sigdef_inputs.<name>`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] for unknown keys or wrong
    /// types.
    pub fn from_dict(name: &str, value: &Value) -> Result<Self, MetadataError> {
        let ctx = format!("sigdef_inputs.{name}");
        let dict = lowercase_keys(as_dict(value, &ctx)?, &ctx)?;
        check_known_keys::<SigDefInputKey>(&dict, &[], &ctx)?;
        Self::new(
            name,
            opt_string(&dict, SigDefInputKey::SigdefInputTensorName, &ctx)?,
            opt_string(&dict, SigDefInputKey::SigdefInputTensorDtype, &ctx)?,
        )
    }

    #[must_use]
    pub fn to_dict(&self, full: bool) -> Dict {
        let mut out = Dict::new();
        emit(
            &mut out,
            SigDefInputKey::SigdefInputTensorName,
            string_value(self.sigdef_input_tensor_name.as_ref()),
            full,
        );
        emit(
            &mut out,
            SigDefInputKey::SigdefInputTensorDtype,
            string_value(self.sigdef_input_tensor_dtype.as_ref()),
            full,
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn parses_and_emits() {
        let raw = json!({"sigdef_input_tensor_name": "bytes:0", "sigdef_input_tensor_dtype": "string"});
        let sigdef = SigDefInputMetadata::from_dict("image_bytes", &raw)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(sigdef.sigdef_input_tensor_name(), "bytes:0");
        assert_eq!(Value::Object(sigdef.to_dict(false)), raw);
    }

    #[rstest]
    fn full_output_keeps_nulls() {
        let sigdef =
            SigDefInputMetadata::new("s", None, None).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            Value::Object(sigdef.to_dict(true)),
            json!({"sigdef_input_tensor_name": null, "sigdef_input_tensor_dtype": null})
        );
        assert!(sigdef.tensor_dtypes().is_empty());
    }

    #[rstest]
    fn rejects_unknown_keys() {
        assert!(SigDefInputMetadata::from_dict("s", &json!({"tensor": "t"})).is_err());
    }
}
