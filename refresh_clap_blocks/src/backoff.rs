//! Config for the retry and polling backoff policies.

use std::{num::NonZeroUsize, time::Duration};

use paste::paste;
use refresh_backoff::{BackoffConfig, BackoffPolicy, Jitter};

fn parse_base(s: &str) -> Result<f64, String> {
    let base: f64 = s
        .parse()
        .map_err(|e| format!("invalid backoff base '{s}': {e}"))?;
    if !base.is_finite() || base < 1.0 {
        return Err(format!("backoff base must be at least 1.0, got {base}"));
    }
    Ok(base)
}

macro_rules! backoff_config {
    (
        name = $name:ident ,
        description = $description:literal ,
        default_init_backoff = $default_init_backoff:expr ,
        default_max_backoff = $default_max_backoff:expr ,
        default_max_attempts = $default_max_attempts:expr ,
    ) => {
        paste! {
            #[doc = "CLI config for the backoff applied to " $description "."]
            #[derive(Debug, Clone, clap::Parser)]
            #[allow(missing_copy_implementations)]
            pub struct [<$name:camel BackoffConfig>] {
                #[doc = "Wait before the first retry of " $description "."]
                #[clap(
                    id = concat!(stringify!([<$name:lower>]), "_init_backoff"),
                    long = concat!(stringify!([<$name:lower>]), "-init-backoff"),
                    env = concat!("PARTITION_REFRESH_", stringify!([<$name:upper>]), "_INIT_BACKOFF"),
                    default_value = $default_init_backoff,
                    value_parser = humantime::parse_duration
                )]
                pub init_backoff: Duration,

                #[doc = "Upper bound for any single wait between attempts of " $description "."]
                #[clap(
                    id = concat!(stringify!([<$name:lower>]), "_max_backoff"),
                    long = concat!(stringify!([<$name:lower>]), "-max-backoff"),
                    env = concat!("PARTITION_REFRESH_", stringify!([<$name:upper>]), "_MAX_BACKOFF"),
                    default_value = $default_max_backoff,
                    value_parser = humantime::parse_duration
                )]
                pub max_backoff: Duration,

                #[doc = "Factor the wait grows by after every failed attempt of " $description "."]
                #[clap(
                    id = concat!(stringify!([<$name:lower>]), "_backoff_base"),
                    long = concat!(stringify!([<$name:lower>]), "-backoff-base"),
                    env = concat!("PARTITION_REFRESH_", stringify!([<$name:upper>]), "_BACKOFF_BASE"),
                    default_value = "2.0",
                    value_parser = parse_base
                )]
                pub base: f64,

                #[doc = "Total number of attempts for " $description ", including the first one."]
                #[clap(
                    id = concat!(stringify!([<$name:lower>]), "_max_attempts"),
                    long = concat!(stringify!([<$name:lower>]), "-max-attempts"),
                    env = concat!("PARTITION_REFRESH_", stringify!([<$name:upper>]), "_MAX_ATTEMPTS"),
                    default_value = $default_max_attempts,
                    action
                )]
                pub max_attempts: NonZeroUsize,

                #[doc = "Wait exactly the computed interval instead of a random share of it."]
                #[clap(
                    id = concat!(stringify!([<$name:lower>]), "_no_jitter"),
                    long = concat!(stringify!([<$name:lower>]), "-no-jitter"),
                    env = concat!("PARTITION_REFRESH_", stringify!([<$name:upper>]), "_NO_JITTER"),
                    action
                )]
                pub no_jitter: bool,
            }

            impl [<$name:camel BackoffConfig>] {
                /// The backoff parameters described by this config.
                pub fn backoff_config(&self) -> BackoffConfig {
                    BackoffConfig {
                        init_backoff: self.init_backoff,
                        max_backoff: self.max_backoff.max(self.init_backoff),
                        base: self.base,
                        max_attempts: self.max_attempts,
                        jitter: if self.no_jitter { Jitter::None } else { Jitter::Full },
                    }
                }

                /// Creates a policy that logs its retries.
                pub fn policy(&self) -> BackoffPolicy {
                    BackoffPolicy::new(self.backoff_config())
                }
            }
        }
    };
}

backoff_config!(
    name = Service,
    description = "queue and query engine calls",
    default_init_backoff = "100ms",
    default_max_backoff = "10s",
    default_max_attempts = "5",
);

backoff_config!(
    name = Poll,
    description = "query status polling",
    default_init_backoff = "1s",
    default_max_backoff = "10s",
    default_max_attempts = "12",
);

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;
    use std::ffi::OsString;

    #[test]
    fn test_defaults() {
        let service = ServiceBackoffConfig::parse_from(std::iter::empty::<OsString>());
        assert_eq!(
            service.backoff_config(),
            BackoffConfig {
                init_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(10),
                base: 2.0,
                max_attempts: NonZeroUsize::new(5).unwrap(),
                jitter: Jitter::Full,
            }
        );

        let poll = PollBackoffConfig::parse_from(std::iter::empty::<OsString>());
        assert_eq!(poll.init_backoff, Duration::from_secs(1));
        assert_eq!(poll.max_attempts.get(), 12);
    }

    #[test]
    fn test_flags() {
        let poll = PollBackoffConfig::parse_from([
            "poll",
            "--poll-init-backoff",
            "250ms",
            "--poll-max-backoff",
            "1m",
            "--poll-backoff-base",
            "1.5",
            "--poll-max-attempts",
            "3",
            "--poll-no-jitter",
        ]);

        let config = *poll.policy().config();
        assert_eq!(config.init_backoff, Duration::from_millis(250));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
        assert_eq!(config.base, 1.5);
        assert_eq!(config.max_attempts.get(), 3);
        assert_eq!(config.jitter, Jitter::None);
    }

    #[test]
    fn test_max_backoff_not_below_init() {
        let service = ServiceBackoffConfig::parse_from([
            "service",
            "--service-init-backoff",
            "5s",
            "--service-max-backoff",
            "1s",
        ]);
        assert_eq!(
            service.backoff_config().max_backoff,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(
            ServiceBackoffConfig::try_parse_from(["service", "--service-backoff-base", "0.5"])
                .is_err()
        );
        assert!(
            ServiceBackoffConfig::try_parse_from(["service", "--service-max-attempts", "0"])
                .is_err()
        );
        assert!(
            ServiceBackoffConfig::try_parse_from(["service", "--service-init-backoff", "soon"])
                .is_err()
        );
    }
}
