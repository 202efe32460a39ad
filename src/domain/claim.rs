//! House claim model: an exclusive, time-limited reservation of an address

use crate::domain::types::{normalize_address, ClaimId, GeoPoint, SessionId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Stored claim status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    /// Reserved by a canvasser
    Claimed,
    /// Canvasser is at the house
    Visiting,
    /// Successfully visited
    Visited,
    /// Claim lapsed without a visit
    Expired,
    /// Given up by the canvasser
    Released,
}

impl ClaimStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Claimed => "claimed",
            ClaimStatus::Visiting => "visiting",
            ClaimStatus::Visited => "visited",
            ClaimStatus::Expired => "expired",
            ClaimStatus::Released => "released",
        }
    }

    /// Statuses that hold the address (subject to the TTL)
    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(self, ClaimStatus::Claimed | ClaimStatus::Visiting)
    }
}

/// A claim on a house for one walk session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseClaim {
    pub id: ClaimId,
    pub walk_session_id: SessionId,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ClaimStatus,
    pub visited_at: Option<DateTime<Utc>>,
    pub voters_contacted: u32,
    pub voters_home: u32,
}

impl HouseClaim {
    pub fn new(
        walk_session_id: SessionId,
        address: &str,
        point: GeoPoint,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: ClaimId::new(),
            walk_session_id,
            address: address.trim().to_string(),
            latitude: point.latitude,
            longitude: point.longitude,
            claimed_at: now,
            expires_at: now + ttl,
            status: ClaimStatus::Claimed,
            visited_at: None,
            voters_contacted: 0,
            voters_home: 0,
        }
    }

    /// Uniqueness key for this claim's address
    #[inline]
    pub fn address_key(&self) -> String {
        normalize_address(&self.address)
    }

    #[inline]
    pub fn point(&self) -> GeoPoint {
        GeoPoint { latitude: self.latitude, longitude: self.longitude }
    }

    /// Status as observed at `now`.
    ///
    /// A claimed/visiting row whose TTL has passed reads as `Expired`
    /// whatever the stored status says.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ClaimStatus {
        if self.status.is_live() && self.expires_at <= now {
            ClaimStatus::Expired
        } else {
            self.status
        }
    }

    /// Holds its address at `now`
    #[inline]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now).is_live()
    }

    /// Copy with the status replaced by the effective status, for responses
    pub fn observed(&self, now: DateTime<Utc>) -> Self {
        let mut claim = self.clone();
        claim.status = self.effective_status(now);
        claim
    }
}
