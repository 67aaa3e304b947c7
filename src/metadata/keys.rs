//! Closed key registries for every metadata section.
//!
//! Each registry is an enum whose variants map to the lowercase key used in
//! the JSON document. Validators compare document keys against
//! [`FieldKeys::values`] and report the difference verbatim.

/// A closed set of lowercase keys.
pub trait FieldKeys: Copy + Sized + 'static {
    /// Every member of the registry, in emission order.
    const ALL: &'static [Self];

    /// The lowercase key for this member.
    fn as_str(self) -> &'static str;

    /// Every key in the registry, in emission order.
    #[must_use]
    fn values() -> Vec<&'static str> {
        Self::ALL.iter().map(|k| k.as_str()).collect()
    }

    /// Look a key up by its lowercase spelling.
    #[must_use]
    fn lookup(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == key)
    }
}

/// Declares a registry enum and its [`FieldKeys`] implementation.
macro_rules! field_keys {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $key:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $crate::metadata::keys::FieldKeys for $name {
            const ALL: &'static [Self] = &[$(Self::$variant),+];

            fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $key),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::metadata::keys::FieldKeys::as_str(*self))
            }
        }
    };
}

pub(crate) use field_keys;

field_keys! {
    /// Top-level keys of the metadata document.
    pub enum EnvelopeKey {
        Outputs => "outputs",
        Inputs => "inputs",
        Embeddings => "embeddings",
        PreparerVersion => "preparer_version",
        Framework => "framework",
        SigdefInputs => "sigdef_inputs",
        Tags => "tags",
    }
}

field_keys! {
    /// Keys of a single input entry.
    pub enum InputKey {
        InputTensorName => "input_tensor_name",
        InputTensorDtype => "input_tensor_dtype",
        IndicesTensorName => "indices_tensor_name",
        IndicesTensorDtype => "indices_tensor_dtype",
        DenseShapeTensorName => "dense_shape_tensor_name",
        DenseShapeTensorDtype => "dense_shape_tensor_dtype",
        EncodedTensorName => "encoded_tensor_name",
        EncodedTensorDtype => "encoded_tensor_dtype",
        Modality => "modality",
        Encoding => "encoding",
        InputBaselines => "input_baselines",
        EncodedBaselines => "encoded_baselines",
        IndexFeatureMapping => "index_feature_mapping",
        GradientTensorNames => "gradient_tensor_names",
        GradientTensorDtypes => "gradient_tensor_dtypes",
        WeightValuesName => "weight_values_name",
        WeightValuesDtype => "weight_values_dtype",
        WeightIndicesName => "weight_indices_name",
        WeightIndicesDtype => "weight_indices_dtype",
        WeightDenseShapeName => "weight_dense_shape_name",
        WeightDenseShapeDtype => "weight_dense_shape_dtype",
        Domain => "domain",
        Visualization => "visualization",
        GroupName => "group_name",
        IsSequential => "is_sequential",
    }
}

/// Input keys that older documents may carry. They are accepted on ingest
/// and dropped.
pub const DEPRECATED_INPUT_KEYS: &[&str] = &["baseline", "input_baseline"];

field_keys! {
    /// Keys of a single output entry.
    pub enum OutputKey {
        OutputTensorName => "output_tensor_name",
        OutputTensorDtype => "output_tensor_dtype",
        IndexNameMapping => "index_name_mapping",
        IndexNameMappingKey => "index_name_mapping_key",
    }
}

field_keys! {
    /// Keys of a single embedding entry.
    pub enum EmbeddingKey {
        EmbeddingTensorName => "embedding_tensor_name",
        EmbeddingTensorDtype => "embedding_tensor_dtype",
    }
}

field_keys! {
    /// Keys of a single signature-only input entry.
    pub enum SigDefInputKey {
        SigdefInputTensorName => "sigdef_input_tensor_name",
        SigdefInputTensorDtype => "sigdef_input_tensor_dtype",
    }
}

field_keys! {
    /// Keys of an input's `domain` mapping.
    pub enum DomainKey {
        Min => "min",
        Max => "max",
        OriginalMean => "original_mean",
        OriginalStddev => "original_stddev",
    }
}

field_keys! {
    /// Keys shared by every visualization type, including the discriminator.
    pub enum VisualizationKey {
        Type => "type",
        Polarity => "polarity",
        ColorMap => "color_map",
        ClipAbovePercentile => "clip_above_percentile",
        ClipBelowPercentile => "clip_below_percentile",
        OverlayType => "overlay_type",
        OverlayMultiplier => "overlay_multiplier",
    }
}

field_keys! {
    /// Keys only valid for `pixels` visualizations.
    pub enum PixelsVisualizationKey {
        BlurSigma => "blur_sigma",
    }
}

field_keys! {
    /// Keys only valid for `outlines` visualizations.
    pub enum OutlinesVisualizationKey {
        BlurSigma => "blur_sigma",
        ShadeWithinOutlines => "shade_within_outlines",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn values_are_lowercase_and_unique() {
        let mut all = InputKey::values();
        assert!(all.iter().all(|k| k.chars().all(|c| !c.is_ascii_uppercase())));
        let len = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), len);
    }

    #[rstest]
    #[case("framework", Some(EnvelopeKey::Framework))]
    #[case("sigdef_inputs", Some(EnvelopeKey::SigdefInputs))]
    #[case("Framework", None)]
    #[case("nope", None)]
    fn looks_up_keys(#[case] key: &str, #[case] expected: Option<EnvelopeKey>) {
        assert_eq!(EnvelopeKey::lookup(key), expected);
    }

    #[rstest]
    fn envelope_order_matches_document_layout() {
        assert_eq!(
            EnvelopeKey::values(),
            vec![
                "outputs",
                "inputs",
                "embeddings",
                "preparer_version",
                "framework",
                "sigdef_inputs",
                "tags"
            ]
        );
    }

    #[rstest]
    fn deprecated_keys_are_not_registered() {
        assert!(
            DEPRECATED_INPUT_KEYS
                .iter()
                .all(|k| InputKey::lookup(k).is_none())
        );
    }
}
