//! Append-only walk activity log entries

use crate::domain::types::{ClaimId, GeoPoint, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of activity recorded during a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    SessionStarted,
    RouteGenerated,
    HouseClaimed,
    HouseReleased,
    ArrivedAtHouse,
    DepartedHouse,
    ContactMade,
    SessionPaused,
    SessionResumed,
    SessionEnded,
    SessionAbandoned,
    ClaimExpired,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::SessionStarted => "session_started",
            ActivityType::RouteGenerated => "route_generated",
            ActivityType::HouseClaimed => "house_claimed",
            ActivityType::HouseReleased => "house_released",
            ActivityType::ArrivedAtHouse => "arrived_at_house",
            ActivityType::DepartedHouse => "departed_house",
            ActivityType::ContactMade => "contact_made",
            ActivityType::SessionPaused => "session_paused",
            ActivityType::SessionResumed => "session_resumed",
            ActivityType::SessionEnded => "session_ended",
            ActivityType::SessionAbandoned => "session_abandoned",
            ActivityType::ClaimExpired => "claim_expired",
        }
    }
}

/// One immutable activity record.
///
/// Fields are public for reading; construct with [`WalkActivity::new`] and the
/// `with_*` builders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkActivity {
    pub id: Uuid,
    pub walk_session_id: SessionId,
    pub activity_type: ActivityType,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub house_claim_id: Option<ClaimId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl WalkActivity {
    pub fn new(
        walk_session_id: SessionId,
        activity_type: ActivityType,
        point: Option<GeoPoint>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let (latitude, longitude) = point.map(|p| (p.latitude, p.longitude)).unwrap_or((0.0, 0.0));
        Self {
            id: Uuid::now_v7(),
            walk_session_id,
            activity_type,
            latitude,
            longitude,
            house_claim_id: None,
            description: None,
            data: None,
            timestamp,
        }
    }

    pub fn with_claim(mut self, claim_id: ClaimId) -> Self {
        self.house_claim_id = Some(claim_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_activity_builder() {
        let session = SessionId::new();
        let claim = ClaimId::new();
        let act = WalkActivity::new(
            session,
            ActivityType::DepartedHouse,
            Some(GeoPoint { latitude: 1.0, longitude: 2.0 }),
            Utc::now(),
        )
        .with_claim(claim)
        .with_data(json!({"votersContacted": 2, "votersHome": 1}));

        assert_eq!(act.walk_session_id, session);
        assert_eq!(act.house_claim_id, Some(claim));
        assert_eq!(act.latitude, 1.0);

        let v: serde_json::Value = serde_json::to_value(&act).unwrap();
        assert_eq!(v["activityType"], "departed_house");
        assert_eq!(v["data"]["votersHome"], 1);
        assert!(v.get("description").is_none());
    }
}
