use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use num_traits::Zero;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::group::{Group, GroupError, Scalar};
use crate::metrics::{MetricsSink, RunRecord};
use crate::protocol::{Participant, PrivatePoint, ProtocolMessage};
use crate::transport::{connect_full_mesh, NetworkProfile};

/// Default per-run wall-clock deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);

/// Configuration of a single protocol run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub group: Group,
    pub eval_at: Scalar,
    pub parties: usize,
    pub profile: NetworkProfile,
    pub deadline: Duration,
    /// When true, caller-supplied inputs are treated as public and the
    /// result is verified against a clear-text interpolation.
    pub test_mode: bool,
}

impl RunConfig {
    pub fn new(group: Group, parties: usize, profile: NetworkProfile) -> Self {
        RunConfig {
            group,
            eval_at: Scalar::zero(),
            parties,
            profile,
            deadline: DEFAULT_DEADLINE,
            test_mode: false,
        }
    }
}

/// Run the full protocol once: wire N participants through a shaped bus,
/// drive them to completion and collect the accounting.
///
/// `inputs` may be supplied by the caller; otherwise the coordinator
/// generates abscissas 1..=N with uniformly random ordinates. Runs whose
/// ordinates are known here (generated, or supplied in test mode) are
/// verified against a clear-text interpolation. Any failure is reported
/// through the record, never panicked.
pub async fn run(config: &RunConfig, inputs: Option<Vec<PrivatePoint>>) -> RunRecord {
    let mut record = RunRecord {
        parties: config.parties,
        profile: config.profile.name.clone(),
        wall_clock_ns: 0,
        compute_ns: 0,
        network_wait_ns: 0,
        bytes_sent: 0,
        bytes_recv: 0,
        interpolated_value: None,
        expected_value: None,
        ok: false,
        error: None,
    };

    let (inputs, generated) = match inputs {
        Some(inputs) => (inputs, false),
        None => match generate_inputs(&config.group, config.parties) {
            Ok(inputs) => (inputs, true),
            Err(err) => {
                record.error = Some(err.kind().to_string());
                return record;
            }
        },
    };

    if let Err(err) = validate(config, &inputs) {
        record.error = Some(err.kind().to_string());
        return record;
    }

    // The clear-text expectation is computable whenever the ordinates are
    // known here: in test mode, or for inputs this coordinator generated
    // itself. An agreed-upon but wrong result must not pass as ok.
    let expected = if config.test_mode || generated {
        let points: Vec<_> = inputs
            .iter()
            .map(|p| (p.x.clone(), p.y.clone()))
            .collect();
        match config.group.interpolate_clear(&points, &config.eval_at) {
            Ok(value) => Some(value),
            Err(err) => {
                record.error = Some(err.kind().to_string());
                return record;
            }
        }
    } else {
        None
    };
    record.expected_value = expected.as_ref().map(|v| v.to_str_radix(10));

    let group = Arc::new(config.group.clone());
    let abscissas: Vec<Scalar> = inputs.iter().map(|p| p.x.clone()).collect();
    let cancel = CancellationToken::new();
    let sink = MetricsSink::new(config.parties);
    let transports =
        connect_full_mesh::<ProtocolMessage>(config.parties, &config.profile, &cancel, &sink);

    let mut tasks = FuturesUnordered::new();
    for (id, (transport, point)) in transports.into_iter().zip(inputs).enumerate() {
        let participant = Participant::new(
            id,
            Arc::clone(&group),
            point,
            abscissas.clone(),
            config.eval_at.clone(),
            transport,
            sink.party(id),
        );
        tasks.push(async move { (id, participant.run().await) });
    }

    let started = tokio::time::Instant::now();
    let deadline = tokio::time::sleep(config.deadline);
    tokio::pin!(deadline);

    let mut outputs: Vec<Option<Scalar>> = vec![None; config.parties];
    let mut failure: Option<&'static str> = None;
    let mut timed_out = false;

    loop {
        tokio::select! {
            _ = &mut deadline, if !timed_out => {
                timed_out = true;
                failure.get_or_insert("Timeout");
                cancel.cancel();
            }
            next = tasks.next() => match next {
                None => break,
                Some((id, Ok(value))) => outputs[id] = Some(value),
                Some((id, Err(err))) => {
                    debug!(party = id, error = %err, "participant failed");
                    failure.get_or_insert(err.kind());
                    cancel.cancel();
                }
            }
        }
    }

    record.wall_clock_ns = started.elapsed().as_nanos() as u64;
    let totals = sink.totals();
    record.compute_ns = totals.compute_ns;
    record.network_wait_ns = totals.network_wait_ns;
    record.bytes_sent = totals.bytes_sent;
    record.bytes_recv = totals.bytes_recv;

    if let Some(tag) = failure {
        record.error = Some(tag.to_string());
    } else {
        let values: Vec<Scalar> = outputs.into_iter().flatten().collect();
        match values.first() {
            Some(first) if values.len() == config.parties && values.iter().all(|v| v == first) => {
                record.interpolated_value = Some(first.to_str_radix(10));
                record.ok = match &expected {
                    Some(expected) => expected == first,
                    None => true,
                };
            }
            _ => record.error = Some("ProtocolViolation".to_string()),
        }
    }

    debug!(
        parties = record.parties,
        profile = %record.profile,
        ok = record.ok,
        wall_clock_ms = record.wall_clock_ns / 1_000_000,
        "run finished"
    );
    record
}

/// Abscissas 1..=N with uniformly random private ordinates.
fn generate_inputs(group: &Group, parties: usize) -> Result<Vec<PrivatePoint>, GroupError> {
    (1..=parties)
        .map(|i| {
            Ok(PrivatePoint {
                x: Scalar::from(i as u64),
                y: group.random_scalar()?,
            })
        })
        .collect()
}

/// Reject configurations the protocol cannot run: too few parties, abscissa
/// collisions (these surface as `NotInvertible` from the Lagrange
/// precomputation) or zero abscissas.
fn validate(config: &RunConfig, inputs: &[PrivatePoint]) -> Result<(), GroupError> {
    if config.parties < 2 {
        return Err(GroupError::BadParams("at least two participants required"));
    }
    if inputs.len() != config.parties {
        return Err(GroupError::BadParams("input count does not match party count"));
    }
    let xs: Vec<Scalar> = inputs.iter().map(|p| p.x.clone()).collect();
    if xs.iter().any(|x| (x % config.group.order()).is_zero()) {
        return Err(GroupError::BadParams("abscissa must be non-zero"));
    }
    config
        .group
        .lagrange_coefficients(&xs, &config.eval_at)
        .map(|_| ())
}
