//! Shared types for the walk coordinator

use crate::infra::error::WalkError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype wrapper for walk session IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for house claim IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(pub Uuid);

impl ClaimId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClaimId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ClaimId {
    type Err = WalkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(ClaimId)
            .map_err(|_| WalkError::Validation(format!("invalid claim id: {s}")))
    }
}

/// Volunteer identifier as issued by the auth provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolunteerId(pub String);

impl VolunteerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VolunteerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hub connection identifier (one per connected client)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated WGS84 coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Build a point, rejecting NaN/infinite values and out-of-range degrees
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, WalkError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(WalkError::Validation(format!("latitude out of range: {latitude}")));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(WalkError::Validation(format!("longitude out of range: {longitude}")));
        }
        Ok(Self { latitude, longitude })
    }
}

/// Canonical form of a street address used as the claim uniqueness key.
///
/// Trims, collapses inner whitespace and lowercases ASCII so that
/// "12 Main St" and " 12  main st " contend for the same house.
pub fn normalize_address(address: &str) -> String {
    address.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase()
}

/// Caller identity resolved from the request credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub volunteer_id: VolunteerId,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_accepts_valid_range() {
        let p = GeoPoint::new(38.9, -77.03).unwrap();
        assert_eq!(p.latitude, 38.9);
        assert!(GeoPoint::new(90.0, 180.0).is_ok());
        assert!(GeoPoint::new(-90.0, -180.0).is_ok());
    }

    #[test]
    fn test_geo_point_rejects_bad_coordinates() {
        assert!(matches!(GeoPoint::new(91.0, 0.0), Err(WalkError::Validation(_))));
        assert!(matches!(GeoPoint::new(0.0, -180.5), Err(WalkError::Validation(_))));
        assert!(matches!(GeoPoint::new(f64::NAN, 0.0), Err(WalkError::Validation(_))));
        assert!(matches!(GeoPoint::new(0.0, f64::INFINITY), Err(WalkError::Validation(_))));
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("  12  Main St "), "12 main st");
        assert_eq!(normalize_address("12 MAIN ST"), normalize_address("12 main st"));
    }

    #[test]
    fn test_claim_id_parse() {
        let id = ClaimId::new();
        assert_eq!(id.to_string().parse::<ClaimId>().unwrap(), id);
        assert!("not-a-uuid".parse::<ClaimId>().is_err());
    }
}
