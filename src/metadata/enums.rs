//! Closed value sets used by metadata entities.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

use super::{
    MetadataError,
    keys::{FieldKeys, field_keys},
};

/// Implements serde and `FromStr` for a value enum via its registry spelling.
macro_rules! keyed_value {
    ($name:ident, $what:literal) => {
        impl FromStr for $name {
            type Err = MetadataError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::lookup(s).ok_or_else(|| {
                    MetadataError::invalid(format!(
                        "{} \"{s}\" is not one of {:?}",
                        $what,
                        Self::values()
                    ))
                })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

field_keys! {
    /// Kind of data an input feature carries.
    pub enum Modality {
        Numeric => "numeric",
        Image => "image",
        Text => "text",
        Structured => "structured",
        Categorical => "categorical",
    }
}
keyed_value!(Modality, "modality");

impl Default for Modality {
    fn default() -> Self {
        Self::Numeric
    }
}

field_keys! {
    /// How an input tensor encodes its feature.
    pub enum Encoding {
        Identity => "identity",
        BagOfFeatures => "bag_of_features",
        BagOfFeaturesSparse => "bag_of_features_sparse",
        Indicator => "indicator",
        CombinedEmbedding => "combined_embedding",
        ConcatEmbedding => "concat_embedding",
    }
}
keyed_value!(Encoding, "encoding");

impl Default for Encoding {
    fn default() -> Self {
        Self::Identity
    }
}

impl Encoding {
    /// Whether each position of the tensor stands for a named feature, so an
    /// `index_feature_mapping` must accompany it.
    #[must_use]
    pub fn requires_index_feature_mapping(self) -> bool {
        matches!(
            self,
            Self::BagOfFeatures | Self::BagOfFeaturesSparse | Self::Indicator
        )
    }
}

field_keys! {
    /// Framework the model artefact was saved with.
    pub enum Framework {
        Tensorflow => "tensorflow",
        Tensorflow2 => "tensorflow2",
        Xgboost => "xgboost",
        CustomContainer => "custom_container",
    }
}

impl Framework {
    /// Parse a framework name, rejecting anything outside the enum.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Unsupported`] for unknown names.
    pub fn parse(name: &str) -> Result<Self, MetadataError> {
        Self::lookup(&name.to_lowercase()).ok_or_else(|| MetadataError::Unsupported {
            framework: name.to_owned(),
        })
    }
}

impl FromStr for Framework {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Framework {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Framework {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

field_keys! {
    /// Visualization discriminator.
    pub enum VisualizationType {
        Pixels => "pixels",
        Outlines => "outlines",
    }
}
keyed_value!(VisualizationType, "visualization type");

field_keys! {
    /// Which attribution signs a visualization shows.
    pub enum Polarity {
        Positive => "positive",
        Negative => "negative",
        Both => "both",
    }
}
keyed_value!(Polarity, "polarity");

field_keys! {
    /// How attributions are overlaid on the original image.
    pub enum OverlayType {
        None => "none",
        Original => "original",
        Grayscale => "grayscale",
        MaskBlack => "mask_black",
    }
}
keyed_value!(OverlayType, "overlay type");

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults() {
        assert_eq!(Modality::default(), Modality::Numeric);
        assert_eq!(Encoding::default(), Encoding::Identity);
    }

    #[rstest]
    #[case(Encoding::Identity, false)]
    #[case(Encoding::BagOfFeatures, true)]
    #[case(Encoding::BagOfFeaturesSparse, true)]
    #[case(Encoding::Indicator, true)]
    #[case(Encoding::CombinedEmbedding, false)]
    #[case(Encoding::ConcatEmbedding, false)]
    fn index_mapping_requirement(#[case] encoding: Encoding, #[case] expected: bool) {
        assert_eq!(encoding.requires_index_feature_mapping(), expected);
    }

    #[rstest]
    #[case("tensorflow", Framework::Tensorflow)]
    #[case("TensorFlow2", Framework::Tensorflow2)]
    #[case("xgboost", Framework::Xgboost)]
    #[case("custom_container", Framework::CustomContainer)]
    fn parses_frameworks(#[case] raw: &str, #[case] expected: Framework) {
        assert_eq!(
            Framework::parse(raw).unwrap_or_else(|e| panic!("framework: {e}")),
            expected
        );
    }

    #[rstest]
    fn unknown_framework_is_unsupported() {
        assert!(matches!(
            Framework::parse("pytorch"),
            Err(MetadataError::Unsupported { framework }) if framework == "pytorch"
        ));
    }

    #[rstest]
    fn unknown_modality_lists_choices() {
        let err = "audio"
            .parse::<Modality>()
            .err()
            .unwrap_or_else(|| panic!("audio should be rejected"));
        let msg = err.to_string();
        assert!(msg.contains("audio"));
        assert!(msg.contains("categorical"));
    }

    #[rstest]
    fn serde_uses_registry_spelling() {
        let json = serde_json::to_string(&OverlayType::MaskBlack)
            .unwrap_or_else(|e| panic!("serialise: {e}"));
        assert_eq!(json, "\"mask_black\"");
        assert!(serde_json::from_str::<Polarity>("\"sideways\"").is_err());
    }
}
