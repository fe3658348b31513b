use crate::config::types::{Config, CrawlerConfig, HttpConfig, ProcessorConfig, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Upper bound for either worker pool
const MAX_WORKERS: usize = 256;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_processor_config(&config.processor)?;
    validate_http_config(&config.http)?;
    validate_user_agent_config(&config.user_agent)?;
    Ok(())
}

/// Validates crawl limits and the seed URL
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_seed(&config.seed)?;

    // max_depth >= 0 is always true for u32, so no check needed

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    validate_worker_count("spider_workers", config.spider_workers)?;

    if config.timeout_secs == Some(0) {
        return Err(ConfigError::Validation(
            "timeout_secs must be > 0 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates a seed URL: must parse and use http or https
pub fn validate_seed(seed: &str) -> Result<(), ConfigError> {
    let url = Url::parse(seed)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "Seed URL '{}' must use the http or https scheme",
            seed
        )));
    }

    Ok(())
}

fn validate_processor_config(config: &ProcessorConfig) -> Result<(), ConfigError> {
    validate_worker_count("processor workers", config.workers)
}

fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "connect_timeout_secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    if config.crawler_version.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_version cannot be empty".to_string(),
        ));
    }

    if !config.contact_url.is_empty() {
        Url::parse(&config.contact_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;
    }

    Ok(())
}

fn validate_worker_count(name: &str, workers: usize) -> Result<(), ConfigError> {
    if workers < 1 || workers > MAX_WORKERS {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_WORKERS, workers
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{CrawlModel, HandlerKind};

    fn create_valid_config() -> Config {
        Config {
            crawler: CrawlerConfig {
                seed: "https://example.com/docs/".to_string(),
                max_depth: 2,
                max_pages: 100,
                spider_workers: 4,
                model: CrawlModel::Threaded,
                timeout_secs: None,
            },
            processor: ProcessorConfig {
                workers: 3,
                handler: HandlerKind::LinkCount,
            },
            http: HttpConfig::default(),
            user_agent: UserAgentConfig {
                crawler_name: "TestCrawler".to_string(),
                crawler_version: "1.0".to_string(),
                contact_url: "https://example.com/about".to_string(),
            },
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&create_valid_config()).is_ok());
    }

    #[test]
    fn test_invalid_spider_workers() {
        let mut config = create_valid_config();
        config.crawler.spider_workers = 0;
        assert!(validate(&config).is_err());

        config.crawler.spider_workers = 257;
        assert!(validate(&config).is_err());

        config.crawler.spider_workers = 256;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_processor_workers() {
        let mut config = create_valid_config();
        config.processor.workers = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_max_pages() {
        let mut config = create_valid_config();
        config.crawler.max_pages = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_timeouts() {
        let mut config = create_valid_config();
        config.crawler.timeout_secs = Some(0);
        assert!(validate(&config).is_err());

        let mut config = create_valid_config();
        config.http.request_timeout_secs = 0;
        assert!(validate(&config).is_err());

        let mut config = create_valid_config();
        config.http.connect_timeout_secs = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_seed_must_be_http() {
        assert!(validate_seed("https://example.com/").is_ok());
        assert!(validate_seed("http://example.com/").is_ok());
        assert!(matches!(
            validate_seed("ftp://example.com/"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            validate_seed("not a url"),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_invalid_crawler_name() {
        let mut config = create_valid_config();
        config.user_agent.crawler_name = "".to_string();
        assert!(validate(&config).is_err());

        config.user_agent.crawler_name = "Invalid Name!".to_string();
        assert!(validate(&config).is_err());

        config.user_agent.crawler_name = "Valid-Name-123".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_contact_url_optional_but_checked() {
        let mut config = create_valid_config();
        config.user_agent.contact_url = String::new();
        assert!(validate(&config).is_ok());

        config.user_agent.contact_url = "not a url".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }
}
