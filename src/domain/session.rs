//! Walk session model: one volunteer's continuous canvassing outing

use crate::domain::types::{GeoPoint, SessionId, VolunteerId};
use crate::infra::error::WalkError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl SessionStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    /// Active or paused
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Paused)
    }
}

/// A volunteer's walk session with aggregate statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkSession {
    pub id: SessionId,
    pub volunteer_id: VolunteerId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub houses_visited: u32,
    pub voters_contacted: u32,
    pub total_distance_meters: f64,
    pub duration_minutes: i64,
    pub start_point: Option<GeoPoint>,
    pub last_point: Option<GeoPoint>,
    pub last_activity_at: DateTime<Utc>,
}

impl WalkSession {
    /// Create a new active session
    pub fn start(volunteer_id: VolunteerId, start_point: Option<GeoPoint>, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            volunteer_id,
            started_at: now,
            ended_at: None,
            status: SessionStatus::Active,
            houses_visited: 0,
            voters_contacted: 0,
            total_distance_meters: 0.0,
            duration_minutes: 0,
            start_point,
            last_point: start_point,
            last_activity_at: now,
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), WalkError> {
        if self.status != SessionStatus::Active {
            return Err(self.invalid_transition("pause"));
        }
        self.status = SessionStatus::Paused;
        self.last_activity_at = now;
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), WalkError> {
        if self.status != SessionStatus::Paused {
            return Err(self.invalid_transition("resume"));
        }
        self.status = SessionStatus::Active;
        self.last_activity_at = now;
        Ok(())
    }

    /// Close the session as completed (normal end) or abandoned
    pub fn finish(&mut self, outcome: SessionStatus, now: DateTime<Utc>) -> Result<(), WalkError> {
        debug_assert!(!outcome.is_open());
        if !self.status.is_open() {
            return Err(self.invalid_transition(outcome.as_str()));
        }
        self.status = outcome;
        self.ended_at = Some(now);
        self.duration_minutes = (now - self.started_at).num_minutes().max(0);
        self.last_activity_at = now;
        Ok(())
    }

    /// Count a completed house visit. Counters only ever grow.
    pub fn record_visit(&mut self, voters_contacted: u32, now: DateTime<Utc>) {
        self.houses_visited = self.houses_visited.saturating_add(1);
        self.voters_contacted = self.voters_contacted.saturating_add(voters_contacted);
        self.last_activity_at = now;
    }

    /// Add a walked step; negative or non-finite steps are ignored
    pub fn add_distance(&mut self, meters: f64) {
        if meters.is_finite() && meters > 0.0 {
            self.total_distance_meters += meters;
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    fn invalid_transition(&self, action: &str) -> WalkError {
        WalkError::Conflict(format!("cannot {action} session {} in state {}", self.id, self.status.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session() -> WalkSession {
        WalkSession::start(VolunteerId::new("v-1"), None, Utc::now())
    }

    #[test]
    fn test_start_is_active() {
        let s = session();
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.houses_visited, 0);
        assert!(s.ended_at.is_none());
    }

    #[test]
    fn test_pause_resume() {
        let mut s = session();
        let now = Utc::now();
        s.pause(now).unwrap();
        assert_eq!(s.status, SessionStatus::Paused);
        assert!(matches!(s.pause(now), Err(WalkError::Conflict(_))));
        s.resume(now).unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        assert!(matches!(s.resume(now), Err(WalkError::Conflict(_))));
    }

    #[test]
    fn test_finish_is_terminal() {
        let mut s = session();
        let end = s.started_at + Duration::minutes(42);
        s.finish(SessionStatus::Completed, end).unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.duration_minutes, 42);
        assert_eq!(s.ended_at, Some(end));
        assert!(s.finish(SessionStatus::Abandoned, end).is_err());
        assert!(s.resume(end).is_err());
    }

    #[test]
    fn test_counters_monotonic() {
        let mut s = session();
        let now = Utc::now();
        s.record_visit(2, now);
        s.record_visit(0, now);
        assert_eq!(s.houses_visited, 2);
        assert_eq!(s.voters_contacted, 2);

        s.add_distance(10.0);
        s.add_distance(-5.0);
        s.add_distance(f64::NAN);
        assert_eq!(s.total_distance_meters, 10.0);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SessionStatus::Paused).unwrap(), "\"paused\"");
    }
}
