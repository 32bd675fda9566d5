use super::{types::Config, ConfigError};
use crate::geo::ContinentFilter;

/// Validate configuration
/// Currently validates:
/// - Worker pool size and host budget are non-zero
/// - The probe timeout stays below the host budget
/// - Backoff bounds are ordered
/// - Continent filter entries and embargoed country codes are well-formed
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let crawler = &config.crawler;

    if crawler.threads == 0 {
        return Err(ConfigError::ValidationError(
            "crawler.threads cannot be 0".to_string(),
        ));
    }

    if crawler.host_timeout_minutes == 0 {
        return Err(ConfigError::ValidationError(
            "crawler.host_timeout_minutes cannot be 0".to_string(),
        ));
    }

    if crawler.probe_timeout_secs == 0 || crawler.probe_timeout() >= crawler.host_timeout() {
        return Err(ConfigError::ValidationError(format!(
            "crawler.probe_timeout_secs must be between 1 and the host budget ({}s)",
            crawler.host_timeout().as_secs()
        )));
    }

    if crawler.auto_disable_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "crawler.auto_disable_threshold cannot be 0".to_string(),
        ));
    }

    if config.backoff.initial_secs == 0 || config.backoff.initial_secs > config.backoff.max_secs {
        return Err(ConfigError::ValidationError(
            "backoff.initial_secs must be at least 1 and not above backoff.max_secs".to_string(),
        ));
    }

    ContinentFilter::parse(&config.geo.continents)
        .map_err(|e| ConfigError::ValidationError(format!("geo.continents: {}", e)))?;

    for country in &config.geo.embargoed_countries {
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::ValidationError(format!(
                "geo.embargoed_countries: '{}' is not a two-letter country code",
                country
            )));
        }
    }

    if config.notify.buffer_size == 0 {
        return Err(ConfigError::ValidationError(
            "notify.buffer_size cannot be 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CrawlerConfig, GeoConfig};

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_threads_fails() {
        let config = Config {
            crawler: CrawlerConfig {
                threads: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_probe_timeout_above_budget_fails() {
        let config = Config {
            crawler: CrawlerConfig {
                host_timeout_minutes: 1,
                probe_timeout_secs: 60,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_unknown_continent_fails() {
        let config = Config {
            geo: GeoConfig {
                continents: vec!["EU".to_string(), "^XX".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("XX"));
    }

    #[test]
    fn test_validate_bad_embargo_code_fails() {
        let config = Config {
            geo: GeoConfig {
                embargoed_countries: vec!["North".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
