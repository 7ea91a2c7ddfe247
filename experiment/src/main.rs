use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use mpc::{coordinator, Group, NetworkProfile, RunConfig, Scalar};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Latency experiment driver: sweeps the secure Lagrange interpolation
/// protocol across participant counts and network profiles and writes the
/// run records as a JSON array to stdout.
#[derive(FromArgs, Debug)]
struct Options {
    /// path to JSON experiment configuration
    #[argh(option)]
    config: String,
}

/// Raw parsed JSON experiment configuration.
#[derive(Clone, Debug, Deserialize)]
struct RawExperimentConfig {
    group: Option<RawGroupConfig>,
    eval_at: Option<String>,
    parties: Vec<usize>,
    profiles: Vec<RawProfileConfig>,
    deadline_ms: Option<u64>,
    #[serde(default = "default_test_mode")]
    test_mode: bool,
    repeats: Option<usize>,
}

/// Raw group parameters, decimal strings.
#[derive(Clone, Debug, Deserialize)]
struct RawGroupConfig {
    prime_p: String,
    order_q: String,
    generator_g: String,
}

/// Raw network profile entry.
#[derive(Clone, Debug, Deserialize)]
struct RawProfileConfig {
    name: String,
    one_way_delay_ms: u64,
    /// Absent means unlimited bandwidth.
    bandwidth_bps: Option<u64>,
    #[serde(default)]
    loss_probability: f64,
}

fn default_test_mode() -> bool {
    true
}

/// Validated experiment configuration.
struct ExperimentConfig {
    group: Group,
    eval_at: Scalar,
    parties: Vec<usize>,
    profiles: Vec<NetworkProfile>,
    deadline: Duration,
    test_mode: bool,
    repeats: usize,
}

/// Load configuration from JSON file.
fn load_config(path: impl AsRef<Path>) -> Result<ExperimentConfig> {
    let file = File::open(path.as_ref())
        .with_context(|| format!("cannot open config {}", path.as_ref().display()))?;
    let raw: RawExperimentConfig =
        serde_json::from_reader(BufReader::new(file)).context("cannot parse config")?;
    parse_raw_config(raw)
}

/// Parse raw configuration into validated form.
fn parse_raw_config(raw: RawExperimentConfig) -> Result<ExperimentConfig> {
    let group = match raw.group {
        Some(group) => Group::new(
            parse_decimal(&group.prime_p, "prime_p")?,
            parse_decimal(&group.order_q, "order_q")?,
            parse_decimal(&group.generator_g, "generator_g")?,
        )
        .context("invalid group parameters")?,
        None => Group::modp_2048(),
    };

    let eval_at = match raw.eval_at {
        Some(value) => parse_decimal(&value, "eval_at")?,
        None => Scalar::zero(),
    };

    let profiles = raw
        .profiles
        .into_iter()
        .map(|profile| NetworkProfile {
            name: profile.name,
            one_way_delay: Duration::from_millis(profile.one_way_delay_ms),
            bandwidth_bps: profile.bandwidth_bps,
            loss_probability: profile.loss_probability,
        })
        .collect();

    Ok(ExperimentConfig {
        group,
        eval_at,
        parties: raw.parties,
        profiles,
        deadline: raw
            .deadline_ms
            .map(Duration::from_millis)
            .unwrap_or(mpc::DEFAULT_DEADLINE),
        test_mode: raw.test_mode,
        repeats: raw.repeats.unwrap_or(1),
    })
}

fn parse_decimal(value: &str, what: &str) -> Result<BigUint> {
    value
        .parse::<BigUint>()
        .with_context(|| format!("{} is not a decimal integer", what))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let options: Options = argh::from_env();
    let config = load_config(&options.config)?;

    let mut records = Vec::new();
    let mut all_ok = true;

    for profile in &config.profiles {
        for &parties in &config.parties {
            for _ in 0..config.repeats {
                let run_config = RunConfig {
                    group: config.group.clone(),
                    eval_at: config.eval_at.clone(),
                    parties,
                    profile: profile.clone(),
                    deadline: config.deadline,
                    test_mode: config.test_mode,
                };
                let record = coordinator::run(&run_config, None).await;
                if record.ok {
                    info!(
                        parties,
                        profile = %record.profile,
                        wall_clock_ms = record.wall_clock_ns / 1_000_000,
                        network_wait_ms = record.network_wait_ns / 1_000_000,
                        bytes_sent = record.bytes_sent,
                        "run succeeded"
                    );
                } else {
                    warn!(
                        parties,
                        profile = %record.profile,
                        error = record.error.as_deref().unwrap_or("unknown"),
                        "run failed"
                    );
                    all_ok = false;
                }
                records.push(record);
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&records)?);

    if !all_ok {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let raw: RawExperimentConfig = serde_json::from_str(
            r#"{
                "parties": [3, 5],
                "profiles": [
                    {"name": "lan_50ms", "one_way_delay_ms": 50, "bandwidth_bps": 100000000},
                    {"name": "slow", "one_way_delay_ms": 200, "loss_probability": 0.01}
                ]
            }"#,
        )
        .unwrap();
        let config = parse_raw_config(raw).unwrap();

        assert_eq!(config.parties, vec![3, 5]);
        assert_eq!(config.group, Group::modp_2048());
        assert_eq!(config.eval_at, Scalar::zero());
        assert_eq!(config.deadline, mpc::DEFAULT_DEADLINE);
        assert!(config.test_mode);
        assert_eq!(config.repeats, 1);
        assert_eq!(config.profiles[1].bandwidth_bps, None);
        assert_eq!(config.profiles[1].loss_probability, 0.01);
    }

    #[test]
    fn parses_custom_group() {
        let raw: RawExperimentConfig = serde_json::from_str(
            r#"{
                "group": {"prime_p": "23", "order_q": "11", "generator_g": "2"},
                "eval_at": "7",
                "parties": [3],
                "profiles": [{"name": "loopback", "one_way_delay_ms": 0}],
                "deadline_ms": 5000,
                "test_mode": false,
                "repeats": 2
            }"#,
        )
        .unwrap();
        let config = parse_raw_config(raw).unwrap();

        assert_eq!(config.group.order(), &Scalar::from(11u32));
        assert_eq!(config.eval_at, Scalar::from(7u32));
        assert_eq!(config.deadline, Duration::from_secs(5));
        assert!(!config.test_mode);
        assert_eq!(config.repeats, 2);
    }

    #[test]
    fn rejects_bad_group_parameters() {
        let raw: RawExperimentConfig = serde_json::from_str(
            r#"{
                "group": {"prime_p": "23", "order_q": "7", "generator_g": "2"},
                "parties": [3],
                "profiles": [{"name": "loopback", "one_way_delay_ms": 0}]
            }"#,
        )
        .unwrap();
        assert!(parse_raw_config(raw).is_err());
    }
}
