use std::{path::PathBuf, sync::Arc, time::Duration};

use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Region;
use clap::Parser;
use partition_refresh::{RefreshOrchestrator, orchestrator};
use refresh_clap_blocks::{
    backoff::{PollBackoffConfig, ServiceBackoffConfig},
    logging::LoggingConfig,
};
use refresh_query::{QueryEngineClient, athena::AthenaQueryService};
use refresh_queue::{MAX_BATCH_SIZE, MessageSource, sqs::SqsQueueService};
use refresh_types::{ConfigError, RefreshConfig, ServiceError};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("could not resolve the queue URL: {0}")]
    QueueUrl(#[source] ServiceError),

    #[error(transparent)]
    Cycle(#[from] orchestrator::Error),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Parser)]
pub(crate) struct Config {
    /// Directory holding `global.json` and `lambda.json`
    #[clap(
        long = "config-dir",
        env = "PARTITION_REFRESH_CONFIG_DIR",
        default_value = "conf",
        action
    )]
    config_dir: PathBuf,

    /// Maximum number of messages received per cycle, at most 10
    #[clap(
        long = "max-messages",
        env = "PARTITION_REFRESH_MAX_MESSAGES",
        default_value_t = MAX_BATCH_SIZE,
        action
    )]
    max_messages: usize,

    /// Wait this long for messages when the queue is empty
    #[clap(
        long = "receive-wait-time",
        env = "PARTITION_REFRESH_RECEIVE_WAIT_TIME",
        value_parser = humantime::parse_duration
    )]
    receive_wait_time: Option<Duration>,

    /// Hide received messages from other consumers for this long
    #[clap(
        long = "visibility-timeout",
        env = "PARTITION_REFRESH_VISIBILITY_TIMEOUT",
        value_parser = humantime::parse_duration
    )]
    visibility_timeout: Option<Duration>,

    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,

    #[clap(flatten)]
    service_backoff: ServiceBackoffConfig,

    #[clap(flatten)]
    poll_backoff: PollBackoffConfig,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let refresh_config = RefreshConfig::load(&config.config_dir)?;
    if !refresh_config.enabled {
        info!("partition refresh is disabled in the configuration, exiting");
        return Ok(());
    }

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(refresh_config.account.region.clone()))
        .load()
        .await;

    let mut sqs = SqsQueueService::new(aws_sdk_sqs::Client::new(&sdk_config));
    if let Some(wait_time) = config.receive_wait_time {
        sqs = sqs.with_wait_time(wait_time);
    }
    if let Some(timeout) = config.visibility_timeout {
        sqs = sqs.with_visibility_timeout(timeout);
    }

    let service_policy = config.service_backoff.policy();
    let queue_name = refresh_config.queue_name.as_str();
    let sqs_ref = &sqs;
    let queue_url = service_policy
        .retry_if("get_queue_url", ServiceError::is_retryable, move || {
            sqs_ref.queue_url(queue_name)
        })
        .await
        .map_err(Error::QueueUrl)?;
    debug!(%queue_url, "resolved queue URL");

    let source = MessageSource::new(Arc::new(sqs), queue_url, service_policy.clone())
        .with_max_messages(config.max_messages);

    let athena = AthenaQueryService::new(aws_sdk_athena::Client::new(&sdk_config));
    let client = QueryEngineClient::new(
        Arc::new(athena),
        refresh_config.database_name,
        refresh_config.results_bucket,
        refresh_config.results_key_prefix,
    )
    .with_retry_policy(service_policy)
    .with_poll_policy(config.poll_backoff.policy());

    let mut orchestrator = RefreshOrchestrator::new(source, client, refresh_config.strategies);
    let outcome = orchestrator.run_cycle().await?;
    info!(%outcome, "partition refresh finished");

    Ok(())
}
