//! Value domain of a numeric input feature.

use serde_json::Value;

use super::{
    MetadataError,
    fields::{Dict, as_dict, check_known_keys, emit, lowercase_keys, number_value, opt_number},
    keys::DomainKey,
};

/// Range and original statistics of a feature before any normalisation.
///
/// `min` and `max` travel together: either both are set or neither is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureDomain {
    min: Option<f64>,
    max: Option<f64>,
    original_mean: Option<f64>,
    original_stddev: Option<f64>,
}

impl FeatureDomain {
    /// A domain carrying only a `[min, max]` range.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] when `min > max` or either
    /// bound is not finite.
    pub fn range(min: f64, max: f64) -> Result<Self, MetadataError> {
        Self::new(Some(min), Some(max), None, None)
    }

    /// Build and validate a domain.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] if only one bound is set,
    /// `min > max`, a value is not finite, or `original_stddev` is negative.
    pub fn new(
        min: Option<f64>,
        max: Option<f64>,
        original_mean: Option<f64>,
        original_stddev: Option<f64>,
    ) -> Result<Self, MetadataError> {
        let domain = Self {
            min,
            max,
            original_mean,
            original_stddev,
        };
        domain.validate()?;
        Ok(domain)
    }

    #[must_use]
    pub fn min(&self) -> Option<f64> {
        self.min
    }

    #[must_use]
    pub fn max(&self) -> Option<f64> {
        self.max
    }

    #[must_use]
    pub fn original_mean(&self) -> Option<f64> {
        self.original_mean
    }

    #[must_use]
    pub fn original_stddev(&self) -> Option<f64> {
        self.original_stddev
    }

    /// Whether the domain declares a `[min, max]` range.
    #[must_use]
    pub fn has_range(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    fn validate(&self) -> Result<(), MetadataError> {
        for (key, value) in [
            (DomainKey::Min, self.min),
            (DomainKey::Max, self.max),
            (DomainKey::OriginalMean, self.original_mean),
            (DomainKey::OriginalStddev, self.original_stddev),
        ] {
            if let Some(v) = value.filter(|v| !v.is_finite()) {
                return Err(MetadataError::invalid(format!(
                    "domain.{key} must be finite, got {v}"
                )));
            }
        }
        match (self.min, self.max) {
            (Some(min), Some(max)) if min > max => Err(MetadataError::invalid(format!(
                "domain.min ({min}) must not exceed domain.max ({max})"
            ))),
            (Some(_), None) | (None, Some(_)) => Err(MetadataError::invalid(
                "domain.min and domain.max must be set together",
            )),
            _ => match self.original_stddev {
                Some(s) if s < 0.0 => Err(MetadataError::invalid(format!(
                    "domain.original_stddev must be non-negative, got {s}"
                ))),
                _ => Ok(()),
            },
        }
    }

    pub(crate) fn from_value(value: &Value, context: &str) -> Result<Self, MetadataError> {
        let ctx = format!("{context}.domain");
        let dict = lowercase_keys(as_dict(value, &ctx)?, &ctx)?;
        check_known_keys::<DomainKey>(&dict, &[], &ctx)?;
        Self::new(
            opt_number(&dict, DomainKey::Min, &ctx)?,
            opt_number(&dict, DomainKey::Max, &ctx)?,
            opt_number(&dict, DomainKey::OriginalMean, &ctx)?,
            opt_number(&dict, DomainKey::OriginalStddev, &ctx)?,
        )
        .map_err(|e| match e {
            MetadataError::InvalidMetadata(msg) => {
                MetadataError::invalid(format!("{context}: {msg}"))
            }
            other => other,
        })
    }

    pub(crate) fn to_value(&self, full: bool) -> Value {
        let mut out = Dict::new();
        emit(&mut out, DomainKey::Min, number_value(self.min), full);
        emit(&mut out, DomainKey::Max, number_value(self.max), full);
        emit(
            &mut out,
            DomainKey::OriginalMean,
            number_value(self.original_mean),
            full,
        );
        emit(
            &mut out,
            DomainKey::OriginalStddev,
            number_value(self.original_stddev),
            full,
        );
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!({"min": 0, "max": 1}))]
    #[case(json!({"MIN": -1.5, "Max": -1.5}))]
    #[case(json!({"original_mean": 3.0, "original_stddev": 0.5}))]
    #[case(json!({}))]
    fn accepts_valid(#[case] raw: Value) {
        assert!(FeatureDomain::from_value(&raw, "inputs.x").is_ok());
    }

    #[rstest]
    #[case(json!({"min": 0}), "together")]
    #[case(json!({"max": 0}), "together")]
    #[case(json!({"min": 2, "max": 1}), "(2)")]
    #[case(json!({"min": "0", "max": 1}), "must be a number")]
    #[case(json!({"median": 1}), "median")]
    #[case(json!({"original_stddev": -0.25}), "-0.25")]
    #[case(json!([0, 1]), "must be a mapping")]
    fn rejects_invalid(#[case] raw: Value, #[case] fragment: &str) {
        let msg = FeatureDomain::from_value(&raw, "inputs.x")
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(msg.contains(fragment), "{msg}");
    }

    #[rstest]
    fn emits_present_fields_only() {
        let domain = FeatureDomain::range(0.0, 1.0).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(domain.to_value(false), json!({"min": 0.0, "max": 1.0}));
        assert_eq!(
            domain.to_value(true),
            json!({"min": 0.0, "max": 1.0, "original_mean": null, "original_stddev": null})
        );
    }
}
