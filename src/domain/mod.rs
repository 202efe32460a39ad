//! Domain models - walk sessions, house claims and activities
//!
//! This module contains the canonical data types used throughout the system:
//! - `WalkSession` - a volunteer's canvassing outing with aggregate stats
//! - `HouseClaim` - time-limited reservation of an address
//! - `WalkActivity` - append-only event log entry
//! - `GeoPoint` / `geo` - validated coordinates and distance math

pub mod activity;
pub mod claim;
pub mod geo;
pub mod session;
pub mod types;

pub use activity::{ActivityType, WalkActivity};
pub use claim::{ClaimStatus, HouseClaim};
pub use session::{SessionStatus, WalkSession};
pub use types::{AuthContext, ClaimId, ConnectionId, GeoPoint, SessionId, VolunteerId};
