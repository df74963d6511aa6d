use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CAMPAIGN_ATTRIBUTION__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub attribution: AttributionConfig,
}

/// Tunables for the attribution models and the bulk recompute job.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributionConfig {
    /// One of `first-touch`, `last-touch`, `linear`, `time-decay`, `position-based`.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_half_life_hours")]
    pub half_life_hours: f64,
    #[serde(default = "default_position_first")]
    pub position_first: f64,
    #[serde(default = "default_position_last")]
    pub position_last: f64,
    #[serde(default = "default_position_middle")]
    pub position_middle: f64,
    /// Bookings evaluated per blocking task during bulk recompute.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Company scope handed to the touchpoint store.
    #[serde(default)]
    pub company_id: Option<String>,
}

// Default functions
fn default_model() -> String {
    "linear".to_string()
}
fn default_half_life_hours() -> f64 {
    168.0
}
fn default_position_first() -> f64 {
    0.4
}
fn default_position_last() -> f64 {
    0.4
}
fn default_position_middle() -> f64 {
    0.2
}
fn default_chunk_size() -> usize {
    256
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            half_life_hours: default_half_life_hours(),
            position_first: default_position_first(),
            position_last: default_position_last(),
            position_middle: default_position_middle(),
            chunk_size: default_chunk_size(),
            company_id: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            attribution: AttributionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CAMPAIGN_ATTRIBUTION")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.attribution.default_model, "linear");
        assert!((config.attribution.half_life_hours - 168.0).abs() < f64::EPSILON);
        let weights = config.attribution.position_first
            + config.attribution.position_last
            + config.attribution.position_middle;
        assert!((weights - 1.0).abs() < 1e-9);
        assert!(config.attribution.company_id.is_none());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"attribution": {"half_life_hours": 24.0}}"#).unwrap();
        assert!((config.attribution.half_life_hours - 24.0).abs() < f64::EPSILON);
        assert_eq!(config.attribution.chunk_size, 256);
    }
}
