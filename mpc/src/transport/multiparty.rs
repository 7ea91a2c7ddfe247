use std::io;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use futures::future::try_join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::metrics::{MetricsSink, PartyMetrics};

use super::{shaped_pipe, NetworkProfile, ShapedReceiver, ShapedSender, TransportError, Wire};

/// Point-to-point message bus for a fixed set of participant IDs.
///
/// Each peer is reached through a dedicated pair of shaped unidirectional
/// pipes, so ordering is FIFO per (sender, receiver) pair and nothing is
/// guaranteed across pairs. Shutting down the shared cancellation token wakes
/// every pending receive with `Closed`.
pub struct MultipartyTransport<T> {
    links: Vec<Option<(ShapedSender, ShapedReceiver)>>,
    party_id: usize,
    cancel: CancellationToken,
    metrics: Arc<PartyMetrics>,
    _msg: PhantomData<T>,
}

impl<T: Wire> MultipartyTransport<T> {
    /// Create a bus endpoint from per-peer links. All links but `party_id`
    /// must be present.
    pub fn new(
        links: Vec<Option<(ShapedSender, ShapedReceiver)>>,
        party_id: usize,
        cancel: CancellationToken,
        metrics: Arc<PartyMetrics>,
    ) -> Self {
        for (j, link) in links.iter().enumerate() {
            if j != party_id && link.is_none() {
                panic!("Link missing for party {}", j);
            }
        }
        Self {
            links,
            party_id,
            cancel,
            metrics,
            _msg: PhantomData,
        }
    }

    /// Number of parties on the bus.
    pub fn num_parties(&self) -> usize {
        self.links.len()
    }

    /// ID of current party.
    pub fn party_id(&self) -> usize {
        self.party_id
    }

    /// Shut down the bus. Idempotent; wakes every pending receive on every
    /// endpoint sharing this token.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Send message to party with given ID. Returns once the local send
    /// buffer has accepted the frame, not when it is delivered.
    pub async fn send_to(&mut self, other_id: usize, msg: &T) -> Result<(), TransportError> {
        if other_id == self.party_id {
            panic!("Cannot send message on loopback");
        }
        let frame = encode_frame(msg);
        let cancel = self.cancel.clone();
        let metrics = Arc::clone(&self.metrics);
        let (sender, _) = self.links[other_id].as_mut().unwrap();
        send_frame(sender, &cancel, &metrics, other_id, frame).await
    }

    /// Receive message from party with given ID.
    pub async fn receive_from(&mut self, other_id: usize) -> Result<T, TransportError> {
        if other_id == self.party_id {
            panic!("Cannot receive message on loopback");
        }
        let cancel = self.cancel.clone();
        let metrics = Arc::clone(&self.metrics);
        let (_, receiver) = self.links[other_id].as_mut().unwrap();
        recv_frame(receiver, &cancel, &metrics, other_id).await
    }

    /// Send a per-peer message to every other party concurrently.
    pub async fn scatter<F>(&mut self, mut message_for: F) -> Result<(), TransportError>
    where
        F: FnMut(usize) -> T,
    {
        let party_id = self.party_id;
        let cancel = &self.cancel;
        let metrics = &*self.metrics;
        try_join_all(
            self.links
                .iter_mut()
                .enumerate()
                .filter(|(id, _)| *id != party_id)
                .map(|(id, link)| {
                    let (sender, _) = link.as_mut().unwrap();
                    let frame = encode_frame(&message_for(id));
                    send_frame(sender, cancel, metrics, id, frame)
                }),
        )
        .await
        .map(|_| ())
    }

    /// Send the same message to every other party (N-1 sends, each link
    /// shaped independently).
    pub async fn send_to_all(&mut self, msg: &T) -> Result<(), TransportError> {
        let party_id = self.party_id;
        let cancel = &self.cancel;
        let metrics = &*self.metrics;
        let frame = encode_frame(msg);
        try_join_all(
            self.links
                .iter_mut()
                .enumerate()
                .filter(|(id, _)| *id != party_id)
                .map(|(id, link)| {
                    let (sender, _) = link.as_mut().unwrap();
                    send_frame(sender, cancel, metrics, id, frame.clone())
                }),
        )
        .await
        .map(|_| ())
    }

    /// Receive one message from every other party.
    pub async fn receive_from_all(&mut self) -> Result<Vec<(usize, T)>, TransportError> {
        let party_id = self.party_id;
        let cancel = &self.cancel;
        let metrics = &*self.metrics;
        try_join_all(
            self.links
                .iter_mut()
                .enumerate()
                .filter(|(id, _)| *id != party_id)
                .map(|(id, link)| {
                    let (_, receiver) = link.as_mut().unwrap();
                    async move {
                        let msg = recv_frame(receiver, cancel, metrics, id).await?;
                        Ok::<_, TransportError>((id, msg))
                    }
                }),
        )
        .await
    }
}

async fn send_frame(
    sender: &mut ShapedSender,
    cancel: &CancellationToken,
    metrics: &PartyMetrics,
    other_id: usize,
    frame: Bytes,
) -> Result<(), TransportError> {
    metrics.add_bytes_sent(frame.len() as u64);
    tokio::select! {
        _ = cancel.cancelled() => Err(TransportError::Closed),
        sent = sender.send(frame) => {
            sent.map_err(|_| TransportError::PeerUnreachable(other_id))
        }
    }
}

async fn recv_frame<T: Wire>(
    receiver: &mut ShapedReceiver,
    cancel: &CancellationToken,
    metrics: &PartyMetrics,
    other_id: usize,
) -> Result<T, TransportError> {
    let start = Instant::now();
    let bytes = tokio::select! {
        _ = cancel.cancelled() => return Err(TransportError::Closed),
        frame = receiver.recv() => frame.ok_or(TransportError::Recv(other_id))?,
    };
    metrics.add_network_wait(start.elapsed());
    metrics.add_bytes_recv(bytes.len() as u64);
    decode_frame(&bytes).map_err(|_| TransportError::Frame(other_id))
}

/// Frame a payload: 4-byte big-endian length, then the payload bytes.
fn encode_frame<T: Wire>(msg: &T) -> Bytes {
    let mut payload = BytesMut::new();
    msg.encode(&mut payload);
    let mut frame = BytesMut::with_capacity(payload.len() + 4);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);
    frame.freeze()
}

fn decode_frame<T: Wire>(frame: &[u8]) -> io::Result<T> {
    if frame.len() < 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame shorter than length prefix",
        ));
    }
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&frame[..4]);
    if u32::from_be_bytes(prefix) as usize != frame.len() - 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "length prefix does not match payload",
        ));
    }
    T::decode(&frame[4..])
}

/// Wire every party to every other through independently shaped links.
/// Returns one bus endpoint per party, sharing the cancellation token.
pub fn connect_full_mesh<T: Wire>(
    num_parties: usize,
    profile: &NetworkProfile,
    cancel: &CancellationToken,
    sink: &MetricsSink,
) -> Vec<MultipartyTransport<T>> {
    let mut matrix: Vec<Vec<_>> = (0..num_parties)
        .map(|_| (0..num_parties).map(|_| None).collect())
        .collect();

    for i in 0..num_parties {
        for j in 0..i {
            let (tx_ij, rx_ij) = shaped_pipe(profile);
            let (tx_ji, rx_ji) = shaped_pipe(profile);
            matrix[i][j] = Some((tx_ij, rx_ji));
            matrix[j][i] = Some((tx_ji, rx_ij));
        }
    }

    matrix
        .into_iter()
        .enumerate()
        .map(|(id, row)| MultipartyTransport::new(row, id, cancel.clone(), sink.party(id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// Minimal payload type for bus tests.
    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Ping(u32);

    impl Wire for Ping {
        fn encode(&self, dst: &mut BytesMut) {
            dst.put_u32(self.0);
        }

        fn decode(src: &[u8]) -> io::Result<Self> {
            if src.len() != 4 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "bad ping"));
            }
            let mut raw = [0u8; 4];
            raw.copy_from_slice(src);
            Ok(Ping(u32::from_be_bytes(raw)))
        }
    }

    fn mesh(num_parties: usize) -> (Vec<MultipartyTransport<Ping>>, CancellationToken) {
        let cancel = CancellationToken::new();
        let sink = MetricsSink::new(num_parties);
        let transports = connect_full_mesh(num_parties, &NetworkProfile::loopback(), &cancel, &sink);
        (transports, cancel)
    }

    #[tokio::test]
    async fn send_and_receive_between_parties() {
        let (mut transports, _cancel) = mesh(2);
        let mut right = transports.pop().unwrap();
        let mut left = transports.pop().unwrap();

        left.send_to(1, &Ping(7)).await.unwrap();
        assert_eq!(right.receive_from(0).await.unwrap(), Ping(7));
    }

    #[tokio::test]
    async fn per_pair_order_is_preserved() {
        let (mut transports, _cancel) = mesh(2);
        let mut right = transports.pop().unwrap();
        let mut left = transports.pop().unwrap();

        for i in 0..10 {
            left.send_to(1, &Ping(i)).await.unwrap();
        }
        for i in 0..10 {
            assert_eq!(right.receive_from(0).await.unwrap(), Ping(i));
        }
    }

    #[tokio::test]
    async fn scatter_and_gather_round() {
        let (transports, _cancel) = mesh(3);
        let handles: Vec<_> = transports
            .into_iter()
            .enumerate()
            .map(|(id, mut transport)| {
                tokio::spawn(async move {
                    transport
                        .scatter(|peer| Ping((id * 10 + peer) as u32))
                        .await
                        .unwrap();
                    transport.receive_from_all().await.unwrap()
                })
            })
            .collect();

        for (id, handle) in handles.into_iter().enumerate() {
            let mut received = handle.await.unwrap();
            received.sort_by_key(|(from, _)| *from);
            for (from, msg) in received {
                assert_eq!(msg, Ping((from * 10 + id) as u32));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn close_wakes_pending_receives() {
        let (mut transports, cancel) = mesh(2);
        let mut left = transports.remove(0);

        let pending = tokio::spawn(async move { left.receive_from(1).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert_eq!(pending.await.unwrap(), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn byte_counters_include_length_prefix() {
        let cancel = CancellationToken::new();
        let sink = MetricsSink::new(2);
        let mut transports =
            connect_full_mesh::<Ping>(2, &NetworkProfile::loopback(), &cancel, &sink);
        let mut right = transports.pop().unwrap();
        let mut left = transports.pop().unwrap();

        left.send_to(1, &Ping(1)).await.unwrap();
        right.receive_from(0).await.unwrap();

        assert_eq!(sink.party(0).snapshot().bytes_sent, 8);
        assert_eq!(sink.party(1).snapshot().bytes_recv, 8);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(decode_frame::<Ping>(&[0, 0]).is_err());
        assert!(decode_frame::<Ping>(&[0, 0, 0, 9, 1, 2, 3, 4]).is_err());
        let frame = encode_frame(&Ping(42));
        assert_eq!(decode_frame::<Ping>(&frame).unwrap(), Ping(42));
    }
}
