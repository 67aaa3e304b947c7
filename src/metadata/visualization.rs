//! Visualization settings for image attributions.
//!
//! The `type` key selects between [`VisualizationKind::Pixels`] and
//! [`VisualizationKind::Outlines`]; every other key must belong to the shared
//! set or to the chosen type's own set.

use serde_json::Value;

use super::{
    MetadataError,
    enums::{OverlayType, Polarity, VisualizationType},
    fields::{Dict, as_dict, emit, lowercase_keys, number_value, opt_bool, opt_number, opt_string},
    keys::{FieldKeys, OutlinesVisualizationKey, PixelsVisualizationKey, VisualizationKey},
};

/// Type-specific visualization settings.
#[derive(Debug, Clone, PartialEq)]
pub enum VisualizationKind {
    Pixels {
        blur_sigma: Option<f64>,
    },
    Outlines {
        blur_sigma: Option<f64>,
        shade_within_outlines: Option<bool>,
    },
}

impl VisualizationKind {
    #[must_use]
    pub fn visualization_type(&self) -> VisualizationType {
        match self {
            Self::Pixels { .. } => VisualizationType::Pixels,
            Self::Outlines { .. } => VisualizationType::Outlines,
        }
    }

    fn blur_sigma(&self) -> Option<f64> {
        match self {
            Self::Pixels { blur_sigma } | Self::Outlines { blur_sigma, .. } => *blur_sigma,
        }
    }

    fn allowed_keys(&self) -> Vec<&'static str> {
        let mut keys = VisualizationKey::values();
        keys.extend(match self {
            Self::Pixels { .. } => PixelsVisualizationKey::values(),
            Self::Outlines { .. } => OutlinesVisualizationKey::values(),
        });
        keys
    }
}

/// How attributions for an image input are rendered.
///
/// # Examples
///
/// ```
/// use explain_metadata::metadata::{OverlayType, Polarity, Visualization};
///
/// let vis = Visualization::outlines()
///     .with_polarity(Polarity::Positive)
///     .with_overlay_type(OverlayType::Grayscale)
///     .with_clip_percentiles(70.0, 99.9);
/// assert!(vis.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Visualization {
    kind: VisualizationKind,
    polarity: Option<Polarity>,
    color_map: Option<String>,
    clip_above_percentile: Option<f64>,
    clip_below_percentile: Option<f64>,
    overlay_type: Option<OverlayType>,
    overlay_multiplier: Option<f64>,
}

impl Visualization {
    fn with_kind(kind: VisualizationKind) -> Self {
        Self {
            kind,
            polarity: None,
            color_map: None,
            clip_above_percentile: None,
            clip_below_percentile: None,
            overlay_type: None,
            overlay_multiplier: None,
        }
    }

    #[must_use]
    pub fn pixels() -> Self {
        Self::with_kind(VisualizationKind::Pixels { blur_sigma: None })
    }

    #[must_use]
    pub fn outlines() -> Self {
        Self::with_kind(VisualizationKind::Outlines {
            blur_sigma: None,
            shade_within_outlines: None,
        })
    }

    #[must_use]
    pub fn with_polarity(mut self, polarity: Polarity) -> Self {
        self.polarity = Some(polarity);
        self
    }

    #[must_use]
    pub fn with_color_map(mut self, color_map: impl Into<String>) -> Self {
        self.color_map = Some(color_map.into());
        self
    }

    #[must_use]
    pub fn with_clip_percentiles(mut self, below: f64, above: f64) -> Self {
        self.clip_below_percentile = Some(below);
        self.clip_above_percentile = Some(above);
        self
    }

    #[must_use]
    pub fn with_overlay_type(mut self, overlay_type: OverlayType) -> Self {
        self.overlay_type = Some(overlay_type);
        self
    }

    #[must_use]
    pub fn with_overlay_multiplier(mut self, multiplier: f64) -> Self {
        self.overlay_multiplier = Some(multiplier);
        self
    }

    #[must_use]
    pub fn with_blur_sigma(mut self, sigma: f64) -> Self {
        match &mut self.kind {
            VisualizationKind::Pixels { blur_sigma }
            | VisualizationKind::Outlines { blur_sigma, .. } => *blur_sigma = Some(sigma),
        }
        self
    }

    /// Shade the area inside outlines. Ignored for pixel visualizations.
    #[must_use]
    pub fn with_shade_within_outlines(mut self, shade: bool) -> Self {
        if let VisualizationKind::Outlines {
            shade_within_outlines,
            ..
        } = &mut self.kind
        {
            *shade_within_outlines = Some(shade);
        }
        self
    }

    #[must_use]
    pub fn kind(&self) -> &VisualizationKind {
        &self.kind
    }

    #[must_use]
    pub fn polarity(&self) -> Option<Polarity> {
        self.polarity
    }

    #[must_use]
    pub fn color_map(&self) -> Option<&str> {
        self.color_map.as_deref()
    }

    #[must_use]
    pub fn clip_above_percentile(&self) -> Option<f64> {
        self.clip_above_percentile
    }

    #[must_use]
    pub fn clip_below_percentile(&self) -> Option<f64> {
        self.clip_below_percentile
    }

    #[must_use]
    pub fn overlay_type(&self) -> Option<OverlayType> {
        self.overlay_type
    }

    #[must_use]
    pub fn overlay_multiplier(&self) -> Option<f64> {
        self.overlay_multiplier
    }

    /// Check numeric bounds.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] when a percentile lies
    /// outside `[0, 100]`, the clip range is inverted, or a multiplier or
    /// sigma is negative or not finite.
    pub fn validate(&self) -> Result<(), MetadataError> {
        for (key, value) in [
            (
                VisualizationKey::ClipAbovePercentile,
                self.clip_above_percentile,
            ),
            (
                VisualizationKey::ClipBelowPercentile,
                self.clip_below_percentile,
            ),
        ] {
            if let Some(v) = value.filter(|v| !(0.0..=100.0).contains(v)) {
                return Err(MetadataError::invalid(format!(
                    "visualization.{key} must be within [0, 100], got {v}"
                )));
            }
        }
        if let (Some(below), Some(above)) = (self.clip_below_percentile, self.clip_above_percentile) {
            if below > above {
                return Err(MetadataError::invalid(format!(
                    "visualization.clip_below_percentile ({below}) must not exceed \
                     clip_above_percentile ({above})"
                )));
            }
        }
        for (key, value) in [
            ("overlay_multiplier", self.overlay_multiplier),
            ("blur_sigma", self.kind.blur_sigma()),
        ] {
            if let Some(v) = value.filter(|v| !v.is_finite() || *v < 0.0) {
                return Err(MetadataError::invalid(format!(
                    "visualization.{key} must be a non-negative number, got {v}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn from_value(value: &Value, context: &str) -> Result<Self, MetadataError> {
        let ctx = format!("{context}.visualization");
        let dict = lowercase_keys(as_dict(value, &ctx)?, &ctx)?;
        let kind_name = opt_string(&dict, VisualizationKey::Type, &ctx)?
            .ok_or_else(|| MetadataError::invalid(format!("{ctx} must include \"type\"")))?;
        let kind_type: VisualizationType = kind_name
            .to_lowercase()
            .parse()
            .map_err(|e| MetadataError::invalid(format!("{ctx}: {e}")))?;
        let blur_sigma = opt_number(&dict, PixelsVisualizationKey::BlurSigma, &ctx)?;
        let kind = match kind_type {
            VisualizationType::Pixels => VisualizationKind::Pixels { blur_sigma },
            VisualizationType::Outlines => VisualizationKind::Outlines {
                blur_sigma,
                shade_within_outlines: opt_bool(
                    &dict,
                    OutlinesVisualizationKey::ShadeWithinOutlines,
                    &ctx,
                )?,
            },
        };

        let allowed = kind.allowed_keys();
        let unknown: Vec<&str> = dict
            .keys()
            .map(String::as_str)
            .filter(|k| !allowed.contains(k))
            .collect();
        if !unknown.is_empty() {
            return Err(MetadataError::invalid(format!(
                "{ctx} keys {unknown:?} are not permitted for type \"{kind_type}\"; \
                 allowed keys are {allowed:?}"
            )));
        }

        let parse_enum = |key: VisualizationKey| -> Result<Option<String>, MetadataError> {
            Ok(opt_string(&dict, key, &ctx)?.map(|s| s.to_lowercase()))
        };
        let vis = Self {
            kind,
            polarity: parse_enum(VisualizationKey::Polarity)?
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| MetadataError::invalid(format!("{ctx}: {e}")))?,
            color_map: opt_string(&dict, VisualizationKey::ColorMap, &ctx)?,
            clip_above_percentile: opt_number(&dict, VisualizationKey::ClipAbovePercentile, &ctx)?,
            clip_below_percentile: opt_number(&dict, VisualizationKey::ClipBelowPercentile, &ctx)?,
            overlay_type: parse_enum(VisualizationKey::OverlayType)?
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| MetadataError::invalid(format!("{ctx}: {e}")))?,
            overlay_multiplier: opt_number(&dict, VisualizationKey::OverlayMultiplier, &ctx)?,
        };
        vis.validate()
            .map_err(|e| MetadataError::invalid(format!("{context}: {e}")))?;
        Ok(vis)
    }

    pub(crate) fn to_value(&self, full: bool) -> Value {
        let mut out = Dict::new();
        out.insert(
            VisualizationKey::Type.as_str().to_owned(),
            Value::String(self.kind.visualization_type().as_str().to_owned()),
        );
        let text = |s: &str| Some(Value::String(s.to_owned()));
        emit(
            &mut out,
            VisualizationKey::Polarity,
            self.polarity.and_then(|p| text(p.as_str())),
            full,
        );
        emit(
            &mut out,
            VisualizationKey::ColorMap,
            self.color_map.as_deref().and_then(text),
            full,
        );
        emit(
            &mut out,
            VisualizationKey::ClipAbovePercentile,
            number_value(self.clip_above_percentile),
            full,
        );
        emit(
            &mut out,
            VisualizationKey::ClipBelowPercentile,
            number_value(self.clip_below_percentile),
            full,
        );
        emit(
            &mut out,
            VisualizationKey::OverlayType,
            self.overlay_type.and_then(|o| text(o.as_str())),
            full,
        );
        emit(
            &mut out,
            VisualizationKey::OverlayMultiplier,
            number_value(self.overlay_multiplier),
            full,
        );
        match &self.kind {
            VisualizationKind::Pixels { blur_sigma } => {
                emit(
                    &mut out,
                    PixelsVisualizationKey::BlurSigma,
                    number_value(*blur_sigma),
                    full,
                );
            }
            VisualizationKind::Outlines {
                blur_sigma,
                shade_within_outlines,
            } => {
                emit(
                    &mut out,
                    OutlinesVisualizationKey::BlurSigma,
                    number_value(*blur_sigma),
                    full,
                );
                emit(
                    &mut out,
                    OutlinesVisualizationKey::ShadeWithinOutlines,
                    shade_within_outlines.map(Value::Bool),
                    full,
                );
            }
        }
        Value::Object(out)
    }
}
