pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# SENSESTREAM CONFIGURATION
# =============================================================================
# Streams Sense HAT telemetry into Snowflake through the Snowpipe Streaming v2
# REST API.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/sensestream/config.yml
#   3. /etc/sensestream/config.yml
#
# Any value may reference an environment variable with $env{NAME}.

# =============================================================================
# SNOWFLAKE TARGET
# =============================================================================
snowflake:
  account: MYORG-MYACCOUNT
  user: SENSEHAT_USER
  # role: SENSEHAT_ROLE
  # url: https://myorg-myaccount.snowflakecomputing.com
  database: DEMO
  schema: DEMO
  pipe: SENSEHAT_STREAM_PIPE
  # A timestamp suffix is appended at startup: SENSEHAT_CHNL_20260101_120000
  channel_name: SENSEHAT_CHNL

# =============================================================================
# AUTHENTICATION
# =============================================================================
# Configure exactly one of: private_key_file (key-pair JWT) or pat_token.
auth:
  private_key_file: ~/.snowflake/rsa_key.p8
  # private_key_passphrase: $env{SNOWFLAKE_KEY_PASSPHRASE}
  # pat_token: $env{SNOWFLAKE_PAT}

# =============================================================================
# STREAMING
# =============================================================================
streaming:
  # Flush when this many readings are buffered...
  batch_size: 10
  # ...or when the oldest buffered reading is this old, whichever comes first
  batch_interval: 5s
  # Delay between sensor polls
  reading_interval: 500ms
  # Stop after this many batches (0 = run until interrupted)
  max_batches: 0
  request_timeout: 30s
  # Tokens are refreshed this long before they expire
  token_safety_margin: 5m
  retry:
    base_delay: 500ms
    max_delay: 30s
    max_attempts: 5
  shutdown:
    # Wait for the last batch to be committed before exiting
    verify_commit: true
    commit_timeout: 60s
    commit_poll_interval: 2s
    drop_channel_on_close: false

# =============================================================================
# SENSOR
# =============================================================================
sensor:
  # Use generated readings instead of the Sense HAT hardware
  simulate: false
  # seed: 42
  # Colour the LED matrix by temperature (hardware only)
  display: true
"#
    .to_string()
}
