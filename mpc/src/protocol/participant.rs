use std::sync::Arc;

use num_traits::Zero;
use tracing::debug;

use crate::group::{Group, GroupError, Scalar};
use crate::metrics::{timed_compute, PartyMetrics};
use crate::transport::MultipartyTransport;

use super::{MessageKind, ProtocolError, ProtocolMessage, PARTIAL_ROUND, SHARE_ROUND};

/// A participant's input: the public abscissa x and the private ordinate y.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivatePoint {
    pub x: Scalar,
    pub y: Scalar,
}

/// Phases of the per-party state machine. Transitions are linear forward;
/// any transport, arithmetic or validation error jumps to `Failed`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParticipantState {
    Init,
    Sharing,
    Exchanging,
    Computing,
    Broadcasting,
    Aggregating,
    Done,
    Failed,
}

/// One protocol party.
///
/// Owns its private point, its bus endpoint and its received shares; never
/// sees any peer's y except through uniformly masked shares.
pub struct Participant {
    id: usize,
    group: Arc<Group>,
    point: PrivatePoint,
    abscissas: Vec<Scalar>,
    eval_at: Scalar,
    transport: MultipartyTransport<ProtocolMessage>,
    metrics: Arc<PartyMetrics>,
    state: ParticipantState,
}

impl Participant {
    pub fn new(
        id: usize,
        group: Arc<Group>,
        point: PrivatePoint,
        abscissas: Vec<Scalar>,
        eval_at: Scalar,
        transport: MultipartyTransport<ProtocolMessage>,
        metrics: Arc<PartyMetrics>,
    ) -> Self {
        Participant {
            id,
            group,
            point,
            abscissas,
            eval_at,
            transport,
            metrics,
            state: ParticipantState::Init,
        }
    }

    /// Drive the party through all protocol rounds. On error the endpoint is
    /// closed, which tears down the whole run.
    pub async fn run(mut self) -> Result<Scalar, ProtocolError> {
        match self.execute().await {
            Ok(result) => {
                self.set_state(ParticipantState::Done);
                Ok(result)
            }
            Err(err) => {
                debug!(party = self.id, error = %err, "participant failed");
                self.set_state(ParticipantState::Failed);
                self.transport.close();
                Err(err)
            }
        }
    }

    async fn execute(&mut self) -> Result<Scalar, ProtocolError> {
        let group = Arc::clone(&self.group);
        let sender_id = self.id as u16;

        let (lambda, elapsed) =
            timed_compute(|| group.lagrange_coefficient(&self.abscissas, self.id, &self.eval_at));
        self.metrics.add_compute(elapsed);
        let lambda = lambda?;

        // Round 1: split lambda_i * y_i additively and hand every peer one
        // share.
        self.set_state(ParticipantState::Sharing);
        let (shares, elapsed) = timed_compute(|| self.make_shares(&lambda));
        self.metrics.add_compute(elapsed);
        let shares = shares?;
        self.transport
            .scatter(|peer| ProtocolMessage::share(sender_id, group.scalar_bytes(&shares[peer])))
            .await?;

        self.set_state(ParticipantState::Exchanging);
        let received = self.transport.receive_from_all().await?;

        // Every held share is already weighted by its originator's Lagrange
        // coefficient, so the local partial is plain summation and the final
        // aggregate telescopes to sum_j lambda_j * y_j.
        self.set_state(ParticipantState::Computing);
        let own_share = shares[self.id].clone();
        let (partial, elapsed) = timed_compute(|| -> Result<Scalar, ProtocolError> {
            let mut sum = own_share;
            for (peer, msg) in &received {
                check_message(msg, MessageKind::Share, SHARE_ROUND, *peer)?;
                let share = group
                    .scalar_from_bytes(&msg.value)
                    .ok_or(ProtocolError::Violation("share is not a canonical scalar"))?;
                sum = group.add_scalar(&sum, &share);
            }
            Ok(sum)
        });
        self.metrics.add_compute(elapsed);
        let partial = partial?;

        // Round 2: broadcast the partial, collect everyone else's.
        self.set_state(ParticipantState::Broadcasting);
        self.transport
            .send_to_all(&ProtocolMessage::partial(
                sender_id,
                group.scalar_bytes(&partial),
            ))
            .await?;

        self.set_state(ParticipantState::Aggregating);
        let partials = self.transport.receive_from_all().await?;
        let (result, elapsed) = timed_compute(|| -> Result<Scalar, ProtocolError> {
            let mut acc = partial;
            for (peer, msg) in &partials {
                check_message(msg, MessageKind::Partial, PARTIAL_ROUND, *peer)?;
                let value = group
                    .scalar_from_bytes(&msg.value)
                    .ok_or(ProtocolError::Violation("partial is not a canonical scalar"))?;
                acc = group.add_scalar(&acc, &value);
            }
            Ok(acc)
        });
        self.metrics.add_compute(elapsed);
        result
    }

    /// Additive sharing of this party's weighted contribution
    /// lambda_i * y_i: fresh random scalars for every peer, with the kept
    /// share chosen so the full set sums back to the contribution (mod q).
    fn make_shares(&self, lambda: &Scalar) -> Result<Vec<Scalar>, GroupError> {
        let n = self.abscissas.len();
        let mut shares = vec![Scalar::zero(); n];
        let mut drawn = Scalar::zero();
        for peer in 0..n {
            if peer == self.id {
                continue;
            }
            let r = self.group.random_scalar()?;
            drawn = self.group.add_scalar(&drawn, &r);
            shares[peer] = r;
        }
        let contribution = self.group.mul_scalar(lambda, &self.point.y);
        shares[self.id] = self.group.sub_scalar(&contribution, &drawn);
        Ok(shares)
    }

    fn set_state(&mut self, next: ParticipantState) {
        debug!(party = self.id, from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }
}

fn check_message(
    msg: &ProtocolMessage,
    kind: MessageKind,
    round: u8,
    from: usize,
) -> Result<(), ProtocolError> {
    if msg.kind != kind {
        return Err(ProtocolError::Violation("unexpected message kind"));
    }
    if msg.round != round {
        return Err(ProtocolError::Violation("unexpected round tag"));
    }
    if msg.sender as usize != from {
        return Err(ProtocolError::Violation("sender ID does not match link"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures::stream::{FuturesUnordered, StreamExt};
    use num_bigint::BigUint;
    use tokio_util::sync::CancellationToken;

    use crate::metrics::MetricsSink;
    use crate::transport::{connect_full_mesh, NetworkProfile};

    use super::*;

    fn toy_group() -> Arc<Group> {
        Arc::new(
            Group::new(
                BigUint::from(23u32),
                BigUint::from(11u32),
                BigUint::from(2u32),
            )
            .unwrap(),
        )
    }

    fn scalar(x: u32) -> Scalar {
        BigUint::from(x)
    }

    fn spawn_parties(
        group: &Arc<Group>,
        points: &[(u32, u32)],
        eval_at: u32,
    ) -> (FuturesUnordered<impl std::future::Future<Output = Result<Scalar, ProtocolError>>>, MetricsSink)
    {
        let n = points.len();
        let cancel = CancellationToken::new();
        let sink = MetricsSink::new(n);
        let transports = connect_full_mesh(n, &NetworkProfile::loopback(), &cancel, &sink);
        let abscissas: Vec<Scalar> = points.iter().map(|(x, _)| scalar(*x)).collect();

        let futures = FuturesUnordered::new();
        for (id, transport) in transports.into_iter().enumerate() {
            let participant = Participant::new(
                id,
                Arc::clone(group),
                PrivatePoint {
                    x: scalar(points[id].0),
                    y: scalar(points[id].1),
                },
                abscissas.clone(),
                scalar(eval_at),
                transport,
                sink.party(id),
            );
            futures.push(participant.run());
        }
        (futures, sink)
    }

    #[tokio::test]
    async fn three_parties_interpolate_at_zero() {
        let group = toy_group();
        let (futures, _sink) = spawn_parties(&group, &[(1, 4), (2, 5), (3, 6)], 0);
        let results: Vec<_> = futures.map(|result| result.unwrap()).collect().await;
        assert_eq!(results, vec![scalar(3); 3]);
    }

    #[tokio::test]
    async fn evaluation_point_is_configurable() {
        let group = toy_group();
        // f(x) = x + 3 through (1,4),(2,5): f(7) = 10
        let (futures, _sink) = spawn_parties(&group, &[(1, 4), (2, 5)], 7);
        let results: Vec<_> = futures.map(|result| result.unwrap()).collect().await;
        assert_eq!(results, vec![scalar(10); 2]);
    }

    #[tokio::test]
    async fn shares_sum_back_to_the_weighted_contribution() {
        let group = toy_group();
        let abscissas = vec![scalar(1), scalar(2), scalar(3)];
        let cancel = CancellationToken::new();
        let sink = MetricsSink::new(3);
        let mut transports = connect_full_mesh(3, &NetworkProfile::loopback(), &cancel, &sink);
        let participant = Participant::new(
            1,
            Arc::clone(&group),
            PrivatePoint {
                x: scalar(2),
                y: scalar(9),
            },
            abscissas.clone(),
            scalar(0),
            transports.remove(1),
            sink.party(1),
        );

        let lambda = group.lagrange_coefficient(&abscissas, 1, &scalar(0)).unwrap();
        let contribution = group.mul_scalar(&lambda, &scalar(9));
        for _ in 0..20 {
            let shares = participant.make_shares(&lambda).unwrap();
            assert_eq!(shares.len(), 3);
            let sum = shares
                .iter()
                .fold(Scalar::zero(), |acc, s| group.add_scalar(&acc, s));
            assert_eq!(sum, contribution);
        }
    }
}
