//! Realtime broadcast hub
//!
//! Fans claim, presence and location events out to every subscriber over a
//! bounded `tokio::sync::broadcast` channel. Delivery is at-most-once with no
//! replay: a subscriber that falls more than `capacity` events behind skips
//! ahead and has to re-query state. Publishing never blocks and never fails
//! the operation that triggered it.

use crate::domain::{AuthContext, ClaimId, ClaimStatus, ConnectionId, GeoPoint, HouseClaim, SessionId, VolunteerId};
use crate::infra::metrics::Metrics;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Logical channel an event is published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubChannel {
    HouseStatusUpdate,
    CanvasserUpdate,
    CanvasserLocationUpdate,
}

impl HubChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubChannel::HouseStatusUpdate => "HouseStatusUpdate",
            HubChannel::CanvasserUpdate => "CanvasserUpdate",
            HubChannel::CanvasserLocationUpdate => "CanvasserLocationUpdate",
        }
    }
}

/// Claim state change as seen by other canvassers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseUpdate {
    pub claim_id: ClaimId,
    pub session_id: SessionId,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: ClaimStatus,
    pub volunteer_id: Option<VolunteerId>,
    pub timestamp: DateTime<Utc>,
}

impl HouseUpdate {
    pub fn from_claim(claim: &HouseClaim, volunteer_id: Option<VolunteerId>, timestamp: DateTime<Utc>) -> Self {
        Self {
            claim_id: claim.id,
            session_id: claim.walk_session_id,
            address: claim.address.clone(),
            latitude: claim.latitude,
            longitude: claim.longitude,
            status: claim.status,
            volunteer_id,
            timestamp,
        }
    }
}

/// Canvasser joined or left the hub
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasserPresence {
    pub volunteer_id: VolunteerId,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

/// Last reported position of a canvasser
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasserPosition {
    pub volunteer_id: VolunteerId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: DateTime<Utc>,
}

impl CanvasserPosition {
    #[inline]
    pub fn point(&self) -> GeoPoint {
        GeoPoint { latitude: self.latitude, longitude: self.longitude }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum HubEvent {
    HouseClaimed(HouseUpdate),
    HouseReleased(HouseUpdate),
    HouseCompleted(HouseUpdate),
    HouseExpired(HouseUpdate),
    CanvasserJoined(CanvasserPresence),
    CanvasserLeft(CanvasserPresence),
    CanvasserLocationUpdate(CanvasserPosition),
}

impl HubEvent {
    pub fn channel(&self) -> HubChannel {
        match self {
            HubEvent::HouseClaimed(_)
            | HubEvent::HouseReleased(_)
            | HubEvent::HouseCompleted(_)
            | HubEvent::HouseExpired(_) => HubChannel::HouseStatusUpdate,
            HubEvent::CanvasserJoined(_) | HubEvent::CanvasserLeft(_) => HubChannel::CanvasserUpdate,
            HubEvent::CanvasserLocationUpdate(_) => HubChannel::CanvasserLocationUpdate,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::HouseClaimed(_) => "HouseClaimed",
            HubEvent::HouseReleased(_) => "HouseReleased",
            HubEvent::HouseCompleted(_) => "HouseCompleted",
            HubEvent::HouseExpired(_) => "HouseExpired",
            HubEvent::CanvasserJoined(_) => "CanvasserJoined",
            HubEvent::CanvasserLeft(_) => "CanvasserLeft",
            HubEvent::CanvasserLocationUpdate(_) => "CanvasserLocationUpdate",
        }
    }
}

struct Connection {
    volunteer_id: VolunteerId,
    name: String,
}

pub struct Hub {
    tx: broadcast::Sender<HubEvent>,
    connections: RwLock<FxHashMap<ConnectionId, Connection>>,
    positions: RwLock<FxHashMap<VolunteerId, CanvasserPosition>>,
    stale_after: Duration,
    metrics: Arc<Metrics>,
}

impl Hub {
    pub fn new(capacity: usize, stale_after_secs: i64, metrics: Arc<Metrics>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            connections: RwLock::new(FxHashMap::default()),
            positions: RwLock::new(FxHashMap::default()),
            stale_after: Duration::seconds(stale_after_secs),
            metrics,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget publish; returns the number of subscribers reached
    pub fn publish(&self, event: HubEvent) -> usize {
        self.metrics.record_hub_event();
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event = %name, receivers = %receivers, "hub_event_published");
                receivers
            }
            // No subscribers is not an error
            Err(_) => 0,
        }
    }

    /// Register a connection and announce the canvasser
    pub fn join(&self, connection: ConnectionId, auth: &AuthContext, now: DateTime<Utc>) {
        let previous = self.connections.write().insert(
            connection.clone(),
            Connection { volunteer_id: auth.volunteer_id.clone(), name: auth.name.clone() },
        );
        if previous.is_some() {
            debug!(connection = %connection, "hub_connection_rebound");
        }
        info!(connection = %connection, volunteer_id = %auth.volunteer_id, "canvasser_joined");
        self.publish(HubEvent::CanvasserJoined(CanvasserPresence {
            volunteer_id: auth.volunteer_id.clone(),
            name: auth.name.clone(),
            timestamp: now,
        }));
    }

    /// Drop a connection. The canvasser's position is forgotten once its
    /// last connection is gone.
    pub fn leave(&self, connection: &ConnectionId, now: DateTime<Utc>) -> Option<VolunteerId> {
        let (removed, still_connected) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(connection)?;
            let still = connections.values().any(|c| c.volunteer_id == removed.volunteer_id);
            (removed, still)
        };

        if !still_connected {
            self.positions.write().remove(&removed.volunteer_id);
        }
        info!(connection = %connection, volunteer_id = %removed.volunteer_id, "canvasser_left");
        self.publish(HubEvent::CanvasserLeft(CanvasserPresence {
            volunteer_id: removed.volunteer_id.clone(),
            name: removed.name,
            timestamp: now,
        }));
        Some(removed.volunteer_id)
    }

    /// Record a position and broadcast it
    pub fn update_location(&self, auth: &AuthContext, point: GeoPoint, now: DateTime<Utc>) {
        let position = CanvasserPosition {
            volunteer_id: auth.volunteer_id.clone(),
            name: auth.name.clone(),
            latitude: point.latitude,
            longitude: point.longitude,
            updated_at: now,
        };
        self.positions.write().insert(auth.volunteer_id.clone(), position.clone());
        self.publish(HubEvent::CanvasserLocationUpdate(position));
    }

    /// Positions updated within the staleness window
    pub fn fresh_positions(&self, now: DateTime<Utc>) -> Vec<CanvasserPosition> {
        let cutoff = now - self.stale_after;
        self.positions.read().values().filter(|p| p.updated_at >= cutoff).cloned().collect()
    }

    pub fn forget(&self, volunteer_id: &VolunteerId) {
        self.positions.write().remove(volunteer_id);
    }

    /// Remove stale positions, returning how many were dropped
    pub fn prune_stale(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.stale_after;
        let mut positions = self.positions.write();
        let before = positions.len();
        positions.retain(|_, p| p.updated_at >= cutoff);
        before - positions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }
}
