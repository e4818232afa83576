use super::{AppConfigError, Config};
use crate::pipeline::PipelineConfig;
use crate::reliability::BackoffPolicy;
use crate::sender::ClientConfig;
use std::time::Duration;
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), AppConfigError> {
        Url::parse(&self.endpoint).map_err(|e| {
            AppConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", self.endpoint, e))
        })?;

        match &self.api_key {
            Some(key) if !key.trim().is_empty() => {}
            _ => return Err(AppConfigError::MissingApiKey),
        }

        if self.batch_size == 0 {
            return Err(AppConfigError::InvalidConfig(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        if self.flush_interval_ms == 0 {
            return Err(AppConfigError::InvalidConfig(
                "Flush interval must be greater than 0".to_string(),
            ));
        }

        if self.max_retry_attempts == 0 {
            return Err(AppConfigError::InvalidConfig(
                "Retry max attempts must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_deliveries == 0 {
            return Err(AppConfigError::InvalidConfig(
                "Max concurrent deliveries must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(AppConfigError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.drain_timeout_secs == Some(0) {
            return Err(AppConfigError::InvalidConfig(
                "Drain timeout must be greater than 0 when set".to_string(),
            ));
        }

        BackoffPolicy::from_secs(&self.backoff_schedule_secs)?;
        Ok(())
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, AppConfigError> {
        let mut config = PipelineConfig::new()
            .with_batch_size(self.batch_size)
            .with_flush_interval(Duration::from_millis(self.flush_interval_ms))
            .with_max_retry_attempts(self.max_retry_attempts)
            .with_max_concurrent_deliveries(self.max_concurrent_deliveries)
            .with_debug(self.debug_logging)
            .with_backoff(BackoffPolicy::from_secs(&self.backoff_schedule_secs)?);
        if let Some(secs) = self.drain_timeout_secs {
            config = config.with_drain_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn client_config(&self) -> Result<ClientConfig, AppConfigError> {
        let api_key = self.api_key.clone().ok_or(AppConfigError::MissingApiKey)?;
        Ok(ClientConfig {
            endpoint: self.endpoint.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            enable_compression: self.enable_compression,
            ..ClientConfig::new(api_key)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            api_key: Some("key".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_with_key_is_valid() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_api_key() {
        assert!(matches!(
            Config::default().validate(),
            Err(AppConfigError::MissingApiKey)
        ));
        let blank = Config {
            api_key: Some("  ".to_string()),
            ..Config::default()
        };
        assert!(matches!(blank.validate(), Err(AppConfigError::MissingApiKey)));
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            Config {
                endpoint: "not a url".to_string(),
                ..valid()
            },
            Config {
                batch_size: 0,
                ..valid()
            },
            Config {
                flush_interval_ms: 0,
                ..valid()
            },
            Config {
                max_retry_attempts: 0,
                ..valid()
            },
            Config {
                drain_timeout_secs: Some(0),
                ..valid()
            },
            Config {
                backoff_schedule_secs: vec![10, 5],
                ..valid()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }

    #[test]
    fn test_conversion_to_library_configs() {
        let config = Config {
            batch_size: 25,
            flush_interval_ms: 250,
            drain_timeout_secs: Some(9),
            backoff_schedule_secs: vec![1, 2],
            enable_compression: true,
            ..valid()
        };

        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.max_batch_size, 25);
        assert_eq!(pipeline.flush_interval, Duration::from_millis(250));
        assert_eq!(pipeline.drain_timeout, Some(Duration::from_secs(9)));
        assert_eq!(pipeline.backoff.schedule().len(), 2);

        let client = config.client_config().unwrap();
        assert_eq!(client.api_key, "key");
        assert!(client.enable_compression);
        assert_eq!(client.timeout, Duration::from_secs(30));
    }
}
