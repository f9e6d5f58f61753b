//! Networking primitives.
//!
//! Goals:
//! - Describe the state samples the sync layer consumes.
//! - Provide a simple unreliable (UDP) channel that carries them.
//! - Keep serialization explicit and versionable.
//!
//! The JSON-over-UDP framing here is a default transport, not a contract;
//! anything that can produce [`SyncMessage`] values can feed the client.

use std::net::SocketAddr;

use anyhow::Context;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::{net::UdpSocket, time};
use tracing::{debug, trace};

use crate::{
    ids::{ModelId, NetworkId, PeerId, Seat, WeaponId},
    marker::MarkerProperties,
    math::Vec3,
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest datagram we accept.
pub const MAX_DATAGRAM: usize = 64 * 1024;

bitflags::bitflags! {
    /// Boolean vehicle state carried by every snapshot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct VehicleFlags: u16 {
        const SIREN = 1 << 0;
        const HORN = 1 << 1;
        const BURNOUT = 1 << 2;
        const DESTROYED = 1 << 3;
        const SHOOTING = 1 << 4;
        const AIMING = 1 << 5;
        const ENTERING = 1 << 6;
        const EXITING = 1 << 7;
    }
}

/// One authoritative sample of a vehicle and whoever is driving it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleSnapshot {
    pub vehicle: NetworkId,
    pub model: ModelId,
    /// Peer whose client produced this sample.
    pub peer: PeerId,
    /// Character of the sending peer, if it is inside the vehicle.
    pub occupant: Option<NetworkId>,
    /// Seat the occupant is in; `None` for a driverless update.
    pub seat: Option<Seat>,
    pub position: Vec3,
    /// Euler rotation in degrees.
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub engine_health: f32,
    pub rpm: f32,
    /// Steering angle in degrees.
    pub steering: f32,
    pub flags: VehicleFlags,
    pub weapon: WeaponId,
    pub aim: Vec3,
    /// Round-trip latency the sender measured, in milliseconds.
    pub latency_ms: f32,
    /// Per-vehicle sequence number, wrapping.
    pub sequence: u16,
}

impl VehicleSnapshot {
    /// Blank sample with identity fields set; handy for builders and tests.
    pub fn new(vehicle: NetworkId, model: ModelId, peer: PeerId) -> Self {
        Self {
            vehicle,
            model,
            peer,
            occupant: None,
            seat: None,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            velocity: Vec3::ZERO,
            engine_health: 1000.0,
            rpm: 0.0,
            steering: 0.0,
            flags: VehicleFlags::empty(),
            weapon: WeaponId::UNARMED,
            aim: Vec3::ZERO,
            latency_ms: 0.0,
            sequence: 0,
        }
    }

    pub fn speed(&self) -> f32 {
        self.velocity.len()
    }
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SyncMessage {
    /// Vehicle state sample.
    VehicleUpdate(VehicleSnapshot),
    /// Object left the network.
    EntityDelete { id: NetworkId },
    /// Create or update a network marker.
    MarkerUpsert { id: NetworkId, props: MarkerProperties },
    /// Create a map blip for a network object.
    BlipCreate { id: NetworkId, position: Vec3 },
    /// Standalone round-trip time measurement for a peer.
    LatencySample { peer: PeerId, rtt_ms: f32 },
    /// Session ended by the server.
    Disconnect { reason: String },
}

/// True when `a` is newer than `b` under u16 wraparound.
pub fn sequence_greater_than(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < u16::MAX / 2
}

/// Unreliable channel over UDP.
///
/// Unconnected: receives from whichever peer relays snapshots.
#[derive(Debug)]
pub struct DatagramChannel {
    socket: UdpSocket,
}

impl DatagramChannel {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await.context("udp bind")?;
        debug!(local = ?socket.local_addr().ok(), "datagram channel bound");
        Ok(Self { socket })
    }

    pub async fn send_to(&self, msg: &SyncMessage, peer: SocketAddr) -> anyhow::Result<()> {
        let payload = encode_to_bytes(msg)?;
        anyhow::ensure!(
            payload.len() <= MAX_DATAGRAM,
            "datagram too large: {} bytes",
            payload.len()
        );
        trace!(%peer, len = payload.len(), "udp send");
        self.socket
            .send_to(&payload, peer)
            .await
            .context("udp send")?;
        Ok(())
    }

    pub async fn recv(&self) -> anyhow::Result<(SyncMessage, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, from) = self.socket.recv_from(&mut buf).await.context("udp recv")?;
        let msg = decode_from_bytes(&buf[..n])?;
        Ok((msg, from))
    }

    /// Receives a datagram within the given timeout.
    pub async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<(SyncMessage, SocketAddr)>> {
        match time::timeout(timeout, self.recv()).await {
            Ok(res) => res.map(Some),
            Err(_) => Ok(None),
        }
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &SyncMessage) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<SyncMessage> {
    serde_json::from_slice(b).context("deserialize")
}
