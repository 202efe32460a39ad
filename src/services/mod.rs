//! Services - business logic and state management
//!
//! - `walk` - Session lifecycle, claiming and visit flow
//! - `store` - Storage port plus the in-memory implementation
//! - `hub` - Realtime broadcast and canvasser presence
//! - `houses` - House directory loaded from JSON
//! - `proximity` - Radius queries over houses and positions
//! - `route` - Walking route optimisation

pub mod houses;
pub mod hub;
pub mod proximity;
pub mod route;
pub mod store;
pub mod walk;

// Re-export commonly used types
pub use houses::HouseDirectory;
pub use hub::{Hub, HubEvent};
pub use store::{MemoryWalkStore, WalkStore};
pub use walk::WalkService;
