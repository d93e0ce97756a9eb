use super::types::Config;
use clap::builder::FalseyValueParser;
use clap::Args;
use std::path::PathBuf;

/// Settings given on the command line or through the environment.
/// Anything set here wins over the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigOverrides {
    /// Where to store offsets
    #[arg(long, env = "OFFSET_FILE", help_heading = "General")]
    pub offset_file: Option<PathBuf>,

    /// Parse events and ship them structured (more CPU, less parsing in Humio)
    #[arg(long, env = "ENRICH", value_parser = FalseyValueParser::new(), help_heading = "General")]
    pub enrich: bool,

    /// Increase output verbosity
    #[arg(short, long, env = "VERBOSE", value_parser = FalseyValueParser::new(), help_heading = "General")]
    pub verbose: bool,

    /// Falcon API URL matching the region of the API key
    #[arg(long, env = "FALCON_URL", help_heading = "Falcon")]
    pub falcon_url: Option<String>,

    /// Falcon API client ID used for OAuth2
    #[arg(long, env = "FALCON_API_ID", help_heading = "Falcon")]
    pub falcon_api_id: Option<String>,

    /// Falcon API client secret used for OAuth2
    #[arg(long, env = "FALCON_API_SECRET", hide_env_values = true, help_heading = "Falcon")]
    pub falcon_api_secret: Option<String>,

    /// Humio URL of the cluster ingesting the data
    #[arg(long, env = "HUMIO_URL", help_heading = "Humio")]
    pub humio_url: Option<String>,

    /// Ingest token; assign the parser that matches --enrich
    #[arg(long, env = "HUMIO_TOKEN", hide_env_values = true, help_heading = "Humio")]
    pub humio_token: Option<String>,

    /// App ID used for consuming events
    #[arg(long, env = "APP_ID", help_heading = "Advanced")]
    pub app_id: Option<String>,

    /// User agent used to connect to services
    #[arg(long, env = "USER_AGENT", help_heading = "Advanced")]
    pub user_agent: Option<String>,

    /// Maximum number of events to send in one request
    #[arg(long, env = "BULK_MAX_SIZE", help_heading = "Advanced")]
    pub bulk_max_size: Option<usize>,

    /// Seconds to wait when bulk max size isn't reached
    #[arg(long, env = "FLUSH_WAIT_TIME", help_heading = "Advanced")]
    pub flush_wait_time: Option<u64>,

    /// Timeout in seconds for the event stream connection
    #[arg(long, env = "STREAM_TIMEOUT", help_heading = "Advanced")]
    pub stream_timeout: Option<u64>,

    /// Seconds to wait between failed stream discoveries
    #[arg(long, env = "RETRY_TIMER", help_heading = "Advanced")]
    pub retry_timer: Option<u64>,

    /// Failed discoveries before using a random app id, 0 = disabled
    #[arg(long, env = "APPID_RANDOM", help_heading = "Advanced")]
    pub appid_random: Option<u32>,

    /// Seconds between worker liveness checks
    #[arg(long, env = "KEEPALIVE", help_heading = "Advanced")]
    pub keepalive: Option<u64>,

    /// Log full error chains, used on top of verbose
    #[arg(long, env = "EXCEPTIONS", value_parser = FalseyValueParser::new(), help_heading = "Advanced")]
    pub exceptions: bool,

    /// Undelivered events per partition before its stream restarts, 0 = unbounded
    #[arg(long, env = "BUFFER_LIMIT", help_heading = "Advanced")]
    pub buffer_limit: Option<usize>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut Config) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut config.general.offset_file, &self.offset_file);
        config.general.enrich |= self.enrich;
        config.general.verbose |= self.verbose;

        set(&mut config.falcon.url, &self.falcon_url);
        set(&mut config.falcon.api_id, &self.falcon_api_id);
        set(&mut config.falcon.api_secret, &self.falcon_api_secret);

        set(&mut config.humio.url, &self.humio_url);
        set(&mut config.humio.token, &self.humio_token);

        let advanced = &mut config.advanced;
        set(&mut advanced.app_id, &self.app_id);
        set(&mut advanced.user_agent, &self.user_agent);
        set(&mut advanced.bulk_max_size, &self.bulk_max_size);
        set(&mut advanced.flush_wait_time, &self.flush_wait_time);
        set(&mut advanced.stream_timeout, &self.stream_timeout);
        set(&mut advanced.retry_timer, &self.retry_timer);
        set(&mut advanced.appid_random, &self.appid_random);
        set(&mut advanced.keepalive, &self.keepalive);
        advanced.exceptions |= self.exceptions;
        set(&mut advanced.buffer_limit, &self.buffer_limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_only_overrides_set_values() {
        let mut config = Config::default();
        config.humio.token = "from-file".to_string();
        config.general.enrich = true;

        let overrides = ConfigOverrides {
            bulk_max_size: Some(50),
            falcon_api_id: Some("id".to_string()),
            ..Default::default()
        };
        overrides.apply(&mut config);

        assert_eq!(config.advanced.bulk_max_size, 50);
        assert_eq!(config.falcon.api_id, "id");
        assert_eq!(config.humio.token, "from-file");
        assert!(config.general.enrich);
        assert_eq!(config.advanced.flush_wait_time, 10);
    }
}
