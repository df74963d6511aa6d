//! Multi-touch revenue attribution — splits a booking's revenue across the
//! touchpoints of its journey under one of five weighting models.

use std::fmt;
use std::str::FromStr;

use campaign_core::config::AttributionConfig;
use campaign_core::error::{AttributionError, AttributionOutcome};
use campaign_core::types::{Journey, Touchpoint};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tolerance used when checking that weights or fractions sum to one.
pub const WEIGHT_EPSILON: f64 = 1e-9;

/// Tag for an attribution model, without its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    FirstTouch,
    LastTouch,
    Linear,
    TimeDecay,
    PositionBased,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::FirstTouch,
        ModelKind::LastTouch,
        ModelKind::Linear,
        ModelKind::TimeDecay,
        ModelKind::PositionBased,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstTouch => "first-touch",
            Self::LastTouch => "last-touch",
            Self::Linear => "linear",
            Self::TimeDecay => "time-decay",
            Self::PositionBased => "position-based",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = AttributionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                AttributionError::invalid_input(format!(
                    "unknown attribution model '{s}', expected one of first-touch, last-touch, linear, time-decay, position-based"
                ))
            })
    }
}

/// First/last/interior split for the position-based model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionWeights {
    pub first: f64,
    pub last: f64,
    pub middle: f64,
}

impl Default for PositionWeights {
    fn default() -> Self {
        Self {
            first: 0.4,
            last: 0.4,
            middle: 0.2,
        }
    }
}

impl PositionWeights {
    pub fn validate(&self) -> AttributionOutcome<()> {
        let parts = [self.first, self.last, self.middle];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AttributionError::invalid_config(format!(
                "position weights must be finite and non-negative, got {self:?}"
            )));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(AttributionError::invalid_config(format!(
                "position weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// An attribution model together with the constants it needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributionModel {
    FirstTouch,
    LastTouch,
    Linear,
    TimeDecay { half_life: Duration },
    PositionBased(PositionWeights),
}

impl AttributionModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::FirstTouch => ModelKind::FirstTouch,
            Self::LastTouch => ModelKind::LastTouch,
            Self::Linear => ModelKind::Linear,
            Self::TimeDecay { .. } => ModelKind::TimeDecay,
            Self::PositionBased(_) => ModelKind::PositionBased,
        }
    }

    pub fn validate(&self) -> AttributionOutcome<()> {
        match self {
            Self::TimeDecay { half_life } if *half_life <= Duration::zero() => {
                Err(AttributionError::invalid_config(format!(
                    "time-decay half-life must be positive, got {half_life}"
                )))
            }
            Self::PositionBased(weights) => weights.validate(),
            _ => Ok(()),
        }
    }

    /// Raw weights over the credit-eligible touchpoints, summing to one.
    /// `touchpoints` is non-empty.
    fn weights(&self, touchpoints: &[Touchpoint], reference: DateTime<Utc>) -> Vec<f64> {
        let n = touchpoints.len();
        let mut weights = vec![0.0; n];
        if n == 1 {
            weights[0] = 1.0;
            return weights;
        }

        match self {
            Self::FirstTouch => weights[0] = 1.0,
            Self::LastTouch => weights[n - 1] = 1.0,
            Self::Linear => weights.fill(1.0 / n as f64),
            Self::TimeDecay { half_life } => {
                let half_life_secs = as_seconds(*half_life);
                let ages: Vec<f64> = touchpoints
                    .iter()
                    .map(|t| as_seconds(reference - t.timestamp).max(0.0))
                    .collect();
                // Measured from the freshest touch so the largest weight is 1.
                let youngest = ages.iter().copied().fold(f64::INFINITY, f64::min);
                for (w, age) in weights.iter_mut().zip(&ages) {
                    *w = (-(age - youngest) / half_life_secs).exp2();
                }
                let total: f64 = weights.iter().sum();
                weights.iter_mut().for_each(|w| *w /= total);
            }
            Self::PositionBased(pw) => {
                if n == 2 {
                    let ends = pw.first + pw.last;
                    if ends > 0.0 {
                        weights[0] = pw.first / ends;
                        weights[1] = pw.last / ends;
                    } else {
                        weights.fill(0.5);
                    }
                } else {
                    let interior = pw.middle / (n - 2) as f64;
                    weights.fill(interior);
                    weights[0] = pw.first;
                    weights[n - 1] = pw.last;
                }
            }
        }
        weights
    }
}

/// Nanosecond precision while it fits in an `i64`, milliseconds beyond.
fn as_seconds(d: Duration) -> f64 {
    match d.num_nanoseconds() {
        Some(ns) => ns as f64 / 1e9,
        None => d.num_milliseconds() as f64 / 1000.0,
    }
}

/// Model constants resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributionSettings {
    pub half_life: Duration,
    pub position: PositionWeights,
}

impl Default for AttributionSettings {
    fn default() -> Self {
        Self {
            half_life: Duration::days(7),
            position: PositionWeights::default(),
        }
    }
}

impl AttributionSettings {
    pub fn from_config(config: &AttributionConfig) -> AttributionOutcome<Self> {
        let hours = config.half_life_hours;
        if !hours.is_finite() || hours <= 0.0 {
            return Err(AttributionError::invalid_config(format!(
                "half_life_hours must be positive, got {hours}"
            )));
        }
        let settings = Self {
            half_life: Duration::milliseconds((hours * 3_600_000.0) as i64),
            position: PositionWeights {
                first: config.position_first,
                last: config.position_last,
                middle: config.position_middle,
            },
        };
        for model in settings.models() {
            model.validate()?;
        }
        Ok(settings)
    }

    pub fn model(&self, kind: ModelKind) -> AttributionModel {
        match kind {
            ModelKind::FirstTouch => AttributionModel::FirstTouch,
            ModelKind::LastTouch => AttributionModel::LastTouch,
            ModelKind::Linear => AttributionModel::Linear,
            ModelKind::TimeDecay => AttributionModel::TimeDecay {
                half_life: self.half_life,
            },
            ModelKind::PositionBased => AttributionModel::PositionBased(self.position),
        }
    }

    /// Every model, in [`ModelKind::ALL`] order.
    pub fn models(&self) -> Vec<AttributionModel> {
        ModelKind::ALL.into_iter().map(|k| self.model(k)).collect()
    }
}

/// Per-touchpoint credit fractions for `journey`, indexed like
/// `journey.touchpoints()`. The fractions are non-negative and sum to one;
/// multiply by `revenue` for attributed revenue.
pub fn attribute(
    journey: &Journey,
    revenue: f64,
    model: &AttributionModel,
) -> AttributionOutcome<Vec<f64>> {
    attribute_with_reference(journey, revenue, model, None)
}

/// Like [`attribute`], with an explicit conversion instant for time-decay.
/// Without one the terminal booking touch, or else the last touch, is used.
pub fn attribute_with_reference(
    journey: &Journey,
    revenue: f64,
    model: &AttributionModel,
    reference: Option<DateTime<Utc>>,
) -> AttributionOutcome<Vec<f64>> {
    if journey.is_empty() {
        return Err(AttributionError::invalid_input("journey has no touchpoints"));
    }
    if !revenue.is_finite() || revenue < 0.0 {
        return Err(AttributionError::invalid_input(format!(
            "revenue must be a non-negative amount, got {revenue}"
        )));
    }
    model.validate()?;

    let eligible = &journey.touchpoints()[..journey.credit_eligible_len()];
    let reference = reference
        .or_else(|| journey.terminal_booking().map(|t| t.timestamp))
        .unwrap_or_else(|| eligible[eligible.len() - 1].timestamp);

    let mut fractions = model.weights(eligible, reference);
    fractions.resize(journey.len(), 0.0);
    Ok(fractions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::TouchpointType;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn journey_of(channels: &[(&str, i64)]) -> Journey {
        Journey::new(
            channels
                .iter()
                .map(|(ch, day)| {
                    Touchpoint::new(*ch, TouchpointType::AdClick, t0() + Duration::days(*day))
                })
                .collect(),
        )
    }

    fn all_models() -> Vec<AttributionModel> {
        AttributionSettings::default().models()
    }

    fn assert_sums_to_one(fractions: &[f64]) {
        let sum: f64 = fractions.iter().sum();
        assert!((sum - 1.0).abs() <= WEIGHT_EPSILON, "sum was {sum}");
        assert!(fractions.iter().all(|f| *f >= 0.0 && f.is_finite()));
    }

    #[test]
    fn test_model_kind_parse_and_display() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.as_str().parse::<ModelKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), kind.as_str());
        }
        let err = "u-shaped".parse::<ModelKind>().unwrap_err();
        assert!(matches!(err, AttributionError::InvalidInput(_)));
        assert_eq!(
            serde_json::to_string(&ModelKind::TimeDecay).unwrap(),
            "\"time-decay\""
        );
    }

    #[test]
    fn test_fractions_sum_to_one_for_all_models() {
        let journeys = [
            journey_of(&[("a", 0)]),
            journey_of(&[("a", 0), ("b", 5)]),
            journey_of(&[("a", 0), ("b", 1), ("c", 2)]),
            journey_of(&[("a", 0), ("b", 1), ("a", 3), ("c", 9), ("d", 30), ("b", 31)]),
        ];
        for journey in &journeys {
            for model in all_models() {
                let fractions = attribute(journey, 250.0, &model).unwrap();
                assert_eq!(fractions.len(), journey.len());
                assert_sums_to_one(&fractions);
            }
        }
    }

    #[test]
    fn test_single_touchpoint_gets_full_credit() {
        let journey = journey_of(&[("only", 0)]);
        for model in all_models() {
            assert_eq!(attribute(&journey, 10.0, &model).unwrap(), vec![1.0]);
        }
    }

    #[test]
    fn test_first_and_last_touch() {
        let journey = journey_of(&[("a", 0), ("b", 1), ("c", 2), ("d", 3)]);
        let first = attribute(&journey, 1.0, &AttributionModel::FirstTouch).unwrap();
        assert_eq!(first, vec![1.0, 0.0, 0.0, 0.0]);
        let last = attribute(&journey, 1.0, &AttributionModel::LastTouch).unwrap();
        assert_eq!(last, vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_last_touch_skips_terminal_booking() {
        let mut tps = journey_of(&[("a", 0), ("b", 1)]).touchpoints().to_vec();
        tps.push(Touchpoint::new(
            "front-desk",
            TouchpointType::Booking,
            t0() + Duration::days(2),
        ));
        let journey = Journey::new(tps);

        let last = attribute(&journey, 1.0, &AttributionModel::LastTouch).unwrap();
        assert_eq!(last, vec![0.0, 1.0, 0.0]);

        let linear = attribute(&journey, 1.0, &AttributionModel::Linear).unwrap();
        assert_eq!(linear, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_linear_is_one_over_n() {
        let journey = journey_of(&[("a", 0), ("b", 1), ("c", 2), ("d", 3), ("e", 4)]);
        let fractions = attribute(&journey, 1.0, &AttributionModel::Linear).unwrap();
        assert!(fractions.iter().all(|f| *f == 1.0 / 5.0));
    }

    #[test]
    fn test_position_based_two_touches_collapses_interior() {
        let journey = journey_of(&[("a", 0), ("b", 5)]);
        let model = AttributionModel::PositionBased(PositionWeights::default());
        assert_eq!(attribute(&journey, 1.0, &model).unwrap(), vec![0.5, 0.5]);

        let skewed = AttributionModel::PositionBased(PositionWeights {
            first: 0.6,
            last: 0.2,
            middle: 0.2,
        });
        let fractions = attribute(&journey, 1.0, &skewed).unwrap();
        assert!((fractions[0] - 0.75).abs() < WEIGHT_EPSILON);
        assert!((fractions[1] - 0.25).abs() < WEIGHT_EPSILON);

        let middle_only = AttributionModel::PositionBased(PositionWeights {
            first: 0.0,
            last: 0.0,
            middle: 1.0,
        });
        assert_eq!(attribute(&journey, 1.0, &middle_only).unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_position_based_spreads_middle() {
        let journey = journey_of(&[("a", 0), ("b", 1), ("c", 2), ("d", 3)]);
        let model = AttributionModel::PositionBased(PositionWeights::default());
        let fractions = attribute(&journey, 1.0, &model).unwrap();
        assert!((fractions[0] - 0.4).abs() < WEIGHT_EPSILON);
        assert!((fractions[1] - 0.1).abs() < WEIGHT_EPSILON);
        assert!((fractions[2] - 0.1).abs() < WEIGHT_EPSILON);
        assert!((fractions[3] - 0.4).abs() < WEIGHT_EPSILON);
    }

    #[test]
    fn test_time_decay_favours_recent_touch() {
        let journey = journey_of(&[("a", 0), ("b", 5)]);
        let model = AttributionModel::TimeDecay {
            half_life: Duration::days(7),
        };
        let fractions = attribute(&journey, 1000.0, &model).unwrap();
        assert!(fractions[1] > 0.5);
        // Five days apart with a seven-day half-life.
        let expected_ratio = (-5.0f64 / 7.0).exp2();
        assert!((fractions[0] / fractions[1] - expected_ratio).abs() < 1e-9);
    }

    #[test]
    fn test_time_decay_uses_booking_reference() {
        let journey = journey_of(&[("a", 0), ("b", 7)]);
        let model = AttributionModel::TimeDecay {
            half_life: Duration::days(7),
        };
        let booked = t0() + Duration::days(14);
        let fractions = attribute_with_reference(&journey, 1.0, &model, Some(booked)).unwrap();
        // Ages 14d and 7d: weights 1/4 and 1/2.
        assert!((fractions[0] - 1.0 / 3.0).abs() < 1e-9);
        assert!((fractions[1] - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_decay_survives_huge_gaps() {
        let journey = journey_of(&[("a", 0), ("b", 36_500)]);
        let model = AttributionModel::TimeDecay {
            half_life: Duration::seconds(1),
        };
        let fractions = attribute(&journey, 1.0, &model).unwrap();
        assert_sums_to_one(&fractions);
        assert_eq!(fractions[1], 1.0);
    }

    #[test]
    fn test_time_decay_sub_millisecond_half_life() {
        let journey = journey_of(&[("a", 0), ("b", 5)]);
        for half_life in [Duration::microseconds(500), Duration::nanoseconds(1)] {
            let model = AttributionModel::TimeDecay { half_life };
            assert!(model.validate().is_ok());
            let fractions = attribute(&journey, 1000.0, &model).unwrap();
            assert_sums_to_one(&fractions);
            assert_eq!(fractions, vec![0.0, 1.0]);
        }
    }

    #[test]
    fn test_time_decay_gap_beyond_nanosecond_range() {
        // ~400 years between touches overflows i64 nanoseconds.
        let journey = journey_of(&[("a", 0), ("b", 146_000)]);
        let model = AttributionModel::TimeDecay {
            half_life: Duration::days(36_500),
        };
        let fractions = attribute(&journey, 1.0, &model).unwrap();
        assert_sums_to_one(&fractions);
        assert!(fractions[1] > fractions[0] && fractions[0] > 0.0);
    }

    #[test]
    fn test_invalid_inputs() {
        let empty = Journey::default();
        let err = attribute(&empty, 1.0, &AttributionModel::Linear).unwrap_err();
        assert!(matches!(err, AttributionError::InvalidInput(_)));

        let journey = journey_of(&[("a", 0)]);
        let err = attribute(&journey, -1.0, &AttributionModel::Linear).unwrap_err();
        assert!(matches!(err, AttributionError::InvalidInput(_)));
        let err = attribute(&journey, f64::NAN, &AttributionModel::Linear).unwrap_err();
        assert!(matches!(err, AttributionError::InvalidInput(_)));
    }

    #[test]
    fn test_invalid_config() {
        let journey = journey_of(&[("a", 0), ("b", 1)]);
        let zero = AttributionModel::TimeDecay {
            half_life: Duration::zero(),
        };
        let err = attribute(&journey, 1.0, &zero).unwrap_err();
        assert!(matches!(err, AttributionError::InvalidConfig(_)));

        let lopsided = AttributionModel::PositionBased(PositionWeights {
            first: 0.5,
            last: 0.5,
            middle: 0.5,
        });
        let err = attribute(&journey, 1.0, &lopsided).unwrap_err();
        assert!(matches!(err, AttributionError::InvalidConfig(_)));

        let negative = AttributionModel::PositionBased(PositionWeights {
            first: 1.2,
            last: -0.2,
            middle: 0.0,
        });
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_settings_from_config() {
        let settings = AttributionSettings::from_config(&AttributionConfig::default()).unwrap();
        assert_eq!(settings.half_life, Duration::days(7));
        assert_eq!(settings.models().len(), 5);

        let bad = AttributionConfig {
            half_life_hours: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            AttributionSettings::from_config(&bad),
            Err(AttributionError::InvalidConfig(_))
        ));

        let bad_weights = AttributionConfig {
            position_middle: 0.3,
            ..Default::default()
        };
        assert!(AttributionSettings::from_config(&bad_weights).is_err());
    }

    #[test]
    fn test_zero_revenue_is_valid() {
        let journey = journey_of(&[("a", 0), ("b", 1)]);
        let fractions = attribute(&journey, 0.0, &AttributionModel::Linear).unwrap();
        assert_sums_to_one(&fractions);
    }
}
