//! The physical layer: datagram I/O over a local substrate, with injected
//! loss, bit corruption, and latency applied at send time (§4.6).

use crate::error::LinkError;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Parameters governing how unreliable the simulated channel is. Mirrors
/// the teacher's `networks::unreliable`/`networks::latent` wrappers, which
/// apply randomness at the network edge rather than modelling a real PHY.
#[derive(Debug, Clone, Copy)]
pub struct ChannelProfile {
    /// Probability in `[0, 1]` that an outgoing frame is silently dropped.
    pub loss_probability: f64,
    /// Probability in `[0, 1]` that an outgoing frame has a byte flipped,
    /// which will surface as a CRC mismatch at the link layer.
    pub corruption_probability: f64,
    /// Lower bound of the simulated one-way latency applied before send.
    pub min_latency: Duration,
    /// Upper bound of the simulated one-way latency applied before send.
    pub max_latency: Duration,
}

impl ChannelProfile {
    /// A perfectly reliable channel: no loss, no corruption, no latency.
    pub const RELIABLE: Self = Self {
        loss_probability: 0.0,
        corruption_probability: 0.0,
        min_latency: Duration::ZERO,
        max_latency: Duration::ZERO,
    };

    /// A channel that drops `p` of segments symmetrically (§8, scenario S3).
    pub fn lossy(p: f64) -> Self {
        Self { loss_probability: p, ..Self::RELIABLE }
    }
}

impl Default for ChannelProfile {
    fn default() -> Self {
        Self::RELIABLE
    }
}

/// The retransmission timeout `T` calibrated for a channel profile: `2 *
/// max_simulated_latency + 0.5s` (§4.2).
pub fn retransmit_timeout(profile: &ChannelProfile) -> Duration {
    2 * profile.max_latency + Duration::from_millis(500)
}

/// A simulated physical layer: one UDP socket per node, with loss,
/// corruption, and latency injected at send time.
pub struct PhysicalLayer {
    socket: UdpSocket,
    profile: ChannelProfile,
    rng: Mutex<SmallRng>,
}

impl PhysicalLayer {
    pub async fn bind(addr: SocketAddr, profile: ChannelProfile) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            profile,
            rng: Mutex::new(SmallRng::from_entropy()),
        })
    }

    /// Sends `bytes` to `to`, subject to injected latency, loss, and
    /// corruption. A "sent but corrupted" frame is still transmitted (the
    /// corruption is only observable downstream as a CRC mismatch); a
    /// "dropped" frame is never put on the wire at all.
    pub async fn send_frame(&self, to: SocketAddr, mut bytes: Vec<u8>) -> Result<(), LinkError> {
        let (drop, corrupt, delay) = {
            let mut rng = self.rng.lock().unwrap();
            let drop = rng.gen_bool(self.profile.loss_probability.clamp(0.0, 1.0));
            let corrupt = rng.gen_bool(self.profile.corruption_probability.clamp(0.0, 1.0));
            let delay = if self.profile.max_latency > self.profile.min_latency {
                rng.gen_range(self.profile.min_latency..self.profile.max_latency)
            } else {
                self.profile.min_latency
            };
            (drop, corrupt, delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if drop {
            return Ok(());
        }

        if corrupt && !bytes.is_empty() {
            let idx = {
                let mut rng = self.rng.lock().unwrap();
                rng.gen_range(0..bytes.len())
            };
            bytes[idx] ^= 0xFF;
        }

        self.socket
            .send_to(&bytes, to)
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        Ok(())
    }

    /// Blocks until a frame arrives, returning its bytes as received
    /// (possibly corrupted; the link layer is responsible for checking the
    /// CRC).
    pub async fn recv_frame(&self) -> Result<Vec<u8>, LinkError> {
        let mut buf = vec![0u8; 64 * 1024];
        let (n, _from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        buf.truncate(n);
        Ok(buf)
    }
}
