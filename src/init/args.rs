// SPDX-License-Identifier: Apache-2.0

use crate::journal::coordinator::CoordinatorConfig;
use crate::uploader::DEFAULT_ENDPOINT;
use crate::uploader::retry::RetryConfig;
use crate::uploader::tls;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tower::BoxError;

#[derive(Debug, Clone, Args)]
pub struct UploaderArgs {
    /// Directory searched recursively for journal files
    #[arg(value_name = "JOURNAL_DIR")]
    pub journal_dir: PathBuf,

    /// Commander name registered with the journal API
    #[arg(value_name = "COMMANDER_NAME")]
    pub commander_name: String,

    /// API key for the commander
    #[arg(value_name = "API_KEY")]
    pub api_key: String,

    /// Journal API endpoint
    #[arg(long, env = "JOURNAL_UPLOADER_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// File holding the timestamp of the last uploaded line
    #[arg(long, env = "JOURNAL_UPLOADER_CURSOR_FILE", default_value = "latest.txt")]
    pub cursor_file: PathBuf,

    /// Maximum uploads in flight; 1 uploads lines one at a time
    #[arg(
        long,
        env = "JOURNAL_UPLOADER_MAX_CONCURRENT_UPLOADS",
        default_value = "4",
        value_parser = parse_non_zero
    )]
    pub max_concurrent_uploads: usize,

    /// Pause between journal files
    #[arg(
        long,
        env = "JOURNAL_UPLOADER_FILE_INTERVAL",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub file_interval: Duration,

    /// Timeout for a single upload attempt
    #[arg(
        long,
        env = "JOURNAL_UPLOADER_REQUEST_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub request_timeout: Duration,

    /// Attempts per line before giving up, including the first
    #[arg(
        long,
        env = "JOURNAL_UPLOADER_RETRY_MAX_ATTEMPTS",
        default_value = "10",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub retry_max_attempts: u32,

    /// Retry initial backoff
    #[arg(
        long,
        env = "JOURNAL_UPLOADER_RETRY_INITIAL_BACKOFF",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub retry_initial_backoff: Duration,

    /// Retry max backoff
    #[arg(
        long,
        env = "JOURNAL_UPLOADER_RETRY_MAX_BACKOFF",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub retry_max_backoff: Duration,

    /// Stop advancing the cursor after the first failed line, so it is sent again next run
    #[arg(long, env = "JOURNAL_UPLOADER_HOLD_CURSOR_ON_FAILURE", default_value = "false")]
    pub hold_cursor_on_failure: bool,

    /// PEM file with the CA certificate to trust instead of the system roots
    #[arg(long, env = "JOURNAL_UPLOADER_TLS_CA_FILE")]
    pub tls_ca_file: Option<String>,

    /// Disable server certificate verification
    #[arg(long, env = "JOURNAL_UPLOADER_TLS_SKIP_VERIFY", default_value = "false")]
    pub tls_skip_verify: bool,
}

impl UploaderArgs {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            initial_backoff: self.retry_initial_backoff,
            max_backoff: self.retry_max_backoff,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_concurrent_uploads: self.max_concurrent_uploads,
            file_interval: self.file_interval,
            hold_cursor_on_failure: self.hold_cursor_on_failure,
        }
    }

    pub fn tls_config(&self) -> Result<tls::Config, BoxError> {
        let mut builder = tls::Config::builder().with_tls_skip_verify(self.tls_skip_verify);
        if let Some(ca_file) = &self.tls_ca_file {
            builder = builder.with_ca_file(ca_file.clone());
        }
        builder.build()
    }
}

fn parse_non_zero(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}
