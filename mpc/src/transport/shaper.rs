use std::time::Duration;

use bytes::Bytes;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Frames buffered per link direction before `send` applies backpressure.
const LINK_BUFFER: usize = 64;

/// Simulated network conditions applied to each direction of a link.
#[derive(Clone, Debug)]
pub struct NetworkProfile {
    pub name: String,
    pub one_way_delay: Duration,
    /// None means unlimited bandwidth.
    pub bandwidth_bps: Option<u64>,
    pub loss_probability: f64,
}

impl NetworkProfile {
    /// In-process pipe with no simulated impairment.
    pub fn loopback() -> Self {
        NetworkProfile {
            name: "loopback".into(),
            one_way_delay: Duration::ZERO,
            bandwidth_bps: None,
            loss_probability: 0.0,
        }
    }

    /// 100 Mbps local network with the given one-way delay.
    pub fn lan(one_way_delay: Duration) -> Self {
        NetworkProfile {
            name: format!("lan_{}ms", one_way_delay.as_millis()),
            one_way_delay,
            bandwidth_bps: Some(100_000_000),
            loss_probability: 0.0,
        }
    }

    /// 10 Mbps wide-area network with the given one-way delay.
    pub fn wan(one_way_delay: Duration) -> Self {
        NetworkProfile {
            name: format!("wan_{}ms", one_way_delay.as_millis()),
            one_way_delay,
            bandwidth_bps: Some(10_000_000),
            loss_probability: 0.0,
        }
    }
}

/// Frame in flight with its earliest permitted delivery time.
#[derive(Debug)]
struct Frame {
    deliver_at: Instant,
    payload: Bytes,
}

/// The receiving end of the pipe has been dropped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PipeClosed;

/// Sending half of a unidirectional shaped byte pipe.
///
/// Delivery deadlines are computed at send time and are monotone
/// non-decreasing, so the pipe is FIFO even under bandwidth bursts.
pub struct ShapedSender {
    tx: mpsc::Sender<Frame>,
    one_way_delay: Duration,
    bandwidth_bps: Option<u64>,
    loss_probability: f64,
    /// Earliest time the link can start serializing the next frame
    /// (continuously refilling token bucket).
    link_free_at: Instant,
    last_delivery_at: Instant,
    rng: SmallRng,
}

/// Receiving half of a unidirectional shaped byte pipe.
pub struct ShapedReceiver {
    rx: mpsc::Receiver<Frame>,
}

/// Create a unidirectional in-process pipe shaped by `profile`.
pub fn shaped_pipe(profile: &NetworkProfile) -> (ShapedSender, ShapedReceiver) {
    let (tx, rx) = mpsc::channel(LINK_BUFFER);
    let now = Instant::now();
    let sender = ShapedSender {
        tx,
        one_way_delay: profile.one_way_delay,
        bandwidth_bps: profile.bandwidth_bps,
        loss_probability: profile.loss_probability,
        link_free_at: now,
        last_delivery_at: now,
        rng: SmallRng::from_entropy(),
    };
    (sender, ShapedReceiver { rx })
}

impl ShapedSender {
    /// Enqueue a frame. Returns once the local buffer accepted it, not when
    /// it is delivered. Lost frames still consume link capacity.
    pub async fn send(&mut self, payload: Bytes) -> Result<(), PipeClosed> {
        let now = Instant::now();
        let dispatch_at = self.link_free_at.max(now);
        let serialization = match self.bandwidth_bps {
            Some(bps) => Duration::from_secs_f64(payload.len() as f64 * 8.0 / bps as f64),
            None => Duration::ZERO,
        };
        self.link_free_at = dispatch_at + serialization;
        let deliver_at = (self.link_free_at + self.one_way_delay).max(self.last_delivery_at);
        self.last_delivery_at = deliver_at;

        if self.loss_probability > 0.0 && self.rng.gen::<f64>() < self.loss_probability {
            return Ok(());
        }

        self.tx
            .send(Frame {
                deliver_at,
                payload,
            })
            .await
            .map_err(|_| PipeClosed)
    }
}

impl ShapedReceiver {
    /// Next frame, no earlier than its delivery deadline. None once the
    /// sending half is gone and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        let frame = self.rx.recv().await?;
        tokio::time::sleep_until(frame.deliver_at).await;
        Some(frame.payload)
    }
}
