pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# CSES2HUMIO CONFIGURATION
# =============================================================================
# Ships the Falcon event stream to a Humio/LogScale repository.
#
# Every value can also be given as a command line flag (--bulk-max-size) or an
# environment variable (BULK_MAX_SIZE); those win over this file.
# Secrets are best kept out of the file: a value written as $env{...} is
# replaced with the named environment variable before the file is parsed.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/cses2humio/config.yml
#   3. /etc/cses2humio/config.yml

general:
  # Where the next offset per partition is stored
  offset_file: offset.db
  # Parse events before shipping (use the structured ingest parser in Humio)
  enrich: false
  verbose: false

falcon:
  # API URL matching the region the API key was created in
  url: https://api.crowdstrike.com
  api_id: $env{FALCON_API_ID}
  api_secret: $env{FALCON_API_SECRET}

humio:
  url: https://cloud.humio.com
  token: $env{HUMIO_TOKEN}

advanced:
  # Must not be shared by two running shippers
  app_id: cses2humio
  # Maximum number of events per ingest request
  bulk_max_size: 200
  # Seconds before a partial batch is flushed
  flush_wait_time: 10
  # Seconds without data before a stream is reconnected
  stream_timeout: 60
  # Seconds between failed stream discoveries
  retry_timer: 300
  # Failed discoveries before a random app id is tried (0 = never)
  appid_random: 1
  # Seconds between worker liveness checks
  keepalive: 10
  # Undelivered events per partition before its stream restarts (0 = unbounded)
  buffer_limit: 10000
"#
    .to_string()
}
