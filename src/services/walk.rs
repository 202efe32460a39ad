//! Walk service - session lifecycle, claiming and visit flow
//!
//! Orchestrates the store, the house directory and the hub. Every write goes
//! to the store first; broadcasts and activity log records follow and are
//! best-effort. Callers are identified by an [`AuthContext`] and always act
//! on their own open session.

use crate::domain::geo::haversine_m;
use crate::domain::types::normalize_address;
use crate::domain::{
    ActivityType, AuthContext, ClaimId, ConnectionId, GeoPoint, HouseClaim, SessionStatus, VolunteerId,
    WalkActivity, WalkSession,
};
use crate::infra::config::Config;
use crate::infra::error::{WalkError, WalkResult};
use crate::infra::metrics::Metrics;
use crate::io::activity_log::ActivityLogSender;
use crate::services::houses::HouseDirectory;
use crate::services::hub::{CanvasserPosition, Hub, HubEvent, HouseUpdate};
use crate::services::proximity::{self, AvailableHouse};
use crate::services::route::{self, OptimizedRoute};
use crate::services::store::{ClaimTransition, WalkStore};
use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashSet;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Steps shorter than this are GPS jitter and not added to the distance
pub const MIN_STEP_METERS: f64 = 3.0;
/// Most addresses accepted by one batch claim or route request
pub const MAX_BATCH_ADDRESSES: usize = 200;

/// Time source, swappable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Open session with the claims it currently holds
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(flatten)]
    pub session: WalkSession,
    pub active_claims: Vec<HouseClaim>,
}

/// Result of a batch claim
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBatch {
    pub claimed: Vec<HouseClaim>,
    /// Addresses already held by another active claim
    pub conflicts: Vec<String>,
    /// Addresses not present in the house directory
    pub unknown: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitOutcome {
    pub claim: HouseClaim,
    pub session: WalkSession,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCanvasser {
    pub volunteer_id: VolunteerId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub last_update_time: DateTime<Utc>,
    pub houses_visited: u32,
    pub distance_meters: f64,
}

/// What one housekeeping tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_claims: usize,
    pub abandoned_sessions: usize,
    pub pruned_positions: usize,
}

/// Gauges for the metrics reporter
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkStats {
    pub open_sessions: usize,
    pub active_claims: usize,
    pub connected: usize,
}

pub struct WalkService {
    store: Arc<dyn WalkStore>,
    hub: Arc<Hub>,
    houses: Arc<HouseDirectory>,
    metrics: Arc<Metrics>,
    activity_log: Option<ActivityLogSender>,
    clock: Arc<dyn Clock>,
    claim_ttl: Duration,
    max_claim_ttl_minutes: i64,
    abandon_after: Duration,
    houses_radius_km: f64,
    houses_limit: usize,
    canvasser_radius_km: f64,
}

impl WalkService {
    pub fn new(
        config: &Config,
        store: Arc<dyn WalkStore>,
        hub: Arc<Hub>,
        houses: Arc<HouseDirectory>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            hub,
            houses,
            metrics,
            activity_log: None,
            clock: Arc::new(SystemClock),
            claim_ttl: Duration::minutes(config.claim_ttl_minutes()),
            max_claim_ttl_minutes: config.claim_max_ttl_minutes(),
            abandon_after: Duration::minutes(config.abandon_after_mins()),
            houses_radius_km: config.houses_radius_km(),
            houses_limit: config.houses_limit(),
            canvasser_radius_km: config.canvasser_radius_km(),
        }
    }

    pub fn with_activity_log(mut self, sender: ActivityLogSender) -> Self {
        self.activity_log = Some(sender);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    // ---- sessions ----

    pub async fn start_session(&self, auth: &AuthContext, point: Option<GeoPoint>) -> WalkResult<WalkSession> {
        let now = self.clock.now();
        let session = self.store.insert_session(WalkSession::start(auth.volunteer_id.clone(), point, now)).await?;
        self.metrics.record_session_started();
        info!(session_id = %session.id, volunteer_id = %auth.volunteer_id, "session_started");

        self.record(
            WalkActivity::new(session.id, ActivityType::SessionStarted, point, now)
                .with_description(format!("{} started walking", auth.name)),
        )
        .await?;
        Ok(session)
    }

    pub async fn pause_session(&self, auth: &AuthContext) -> WalkResult<WalkSession> {
        let now = self.clock.now();
        let open = self.open_session(&auth.volunteer_id).await?;
        let session = self.store.modify_session(open.id, &|s| s.pause(now)).await?;
        info!(session_id = %session.id, "session_paused");
        self.record(WalkActivity::new(session.id, ActivityType::SessionPaused, session.last_point, now)).await?;
        Ok(session)
    }

    pub async fn resume_session(&self, auth: &AuthContext) -> WalkResult<WalkSession> {
        let now = self.clock.now();
        let open = self.open_session(&auth.volunteer_id).await?;
        let session = self.store.modify_session(open.id, &|s| s.resume(now)).await?;
        info!(session_id = %session.id, "session_resumed");
        self.record(WalkActivity::new(session.id, ActivityType::SessionResumed, session.last_point, now)).await?;
        Ok(session)
    }

    /// Complete the caller's open session, releasing its claimed and visiting houses
    pub async fn end_session(&self, auth: &AuthContext, point: Option<GeoPoint>) -> WalkResult<WalkSession> {
        let open = self.open_session(&auth.volunteer_id).await?;
        let session = self.close(open, SessionStatus::Completed).await?;
        let point = point.or(session.last_point);
        self.record(
            WalkActivity::new(session.id, ActivityType::SessionEnded, point, self.clock.now()).with_data(json!({
                "housesVisited": session.houses_visited,
                "votersContacted": session.voters_contacted,
                "totalDistanceMeters": session.total_distance_meters,
                "durationMinutes": session.duration_minutes,
            })),
        )
        .await?;
        Ok(session)
    }

    pub async fn abandon_session(&self, auth: &AuthContext) -> WalkResult<WalkSession> {
        let open = self.open_session(&auth.volunteer_id).await?;
        self.abandon(open).await
    }

    pub async fn current_session(&self, auth: &AuthContext) -> WalkResult<SessionView> {
        let now = self.clock.now();
        let session = self.open_session(&auth.volunteer_id).await?;
        let active_claims = self
            .store
            .claims_for_session(session.id)
            .await?
            .into_iter()
            .filter(|c| c.is_active(now))
            .collect();
        Ok(SessionView { session, active_claims })
    }

    pub async fn session_activities(&self, auth: &AuthContext) -> WalkResult<Vec<WalkActivity>> {
        let session = self.open_session(&auth.volunteer_id).await?;
        self.store.activities_for_session(session.id).await
    }

    /// Record the caller's position and broadcast it.
    ///
    /// Returns the updated session if the caller has one open.
    pub async fn update_location(&self, auth: &AuthContext, point: GeoPoint) -> WalkResult<Option<WalkSession>> {
        let now = self.clock.now();
        self.hub.update_location(auth, point, now);

        let Some(open) = self.store.open_session_for(&auth.volunteer_id).await? else {
            return Ok(None);
        };
        let session = self
            .store
            .modify_session(open.id, &|s: &mut WalkSession| {
                if !s.status.is_open() {
                    return Err(WalkError::NotFound(format!("no open session {}", s.id)));
                }
                if s.status == SessionStatus::Active {
                    if let Some(last) = s.last_point {
                        let step = haversine_m(last, point);
                        if step >= MIN_STEP_METERS {
                            s.add_distance(step);
                        }
                    }
                }
                s.last_point = Some(point);
                s.touch(now);
                Ok(())
            })
            .await?;
        debug!(session_id = %session.id, distance_m = %session.total_distance_meters, "location_updated");
        Ok(Some(session))
    }

    // ---- houses & claims ----

    pub async fn available_houses(
        &self,
        origin: GeoPoint,
        radius_km: Option<f64>,
        limit: Option<usize>,
    ) -> WalkResult<Vec<AvailableHouse>> {
        let claimed = self.claimed_addresses().await?;
        proximity::available_houses(
            &self.houses,
            &claimed,
            origin,
            radius_km.unwrap_or(self.houses_radius_km),
            limit.unwrap_or(self.houses_limit),
        )
    }

    /// Claim a single address at the given coordinates
    pub async fn claim_house(
        &self,
        auth: &AuthContext,
        address: &str,
        point: GeoPoint,
        ttl_minutes: Option<i64>,
    ) -> WalkResult<HouseClaim> {
        if address.trim().is_empty() {
            return Err(WalkError::Validation("address must not be empty".to_string()));
        }
        let ttl = self.ttl(ttl_minutes)?;
        let session = self.active_session(&auth.volunteer_id).await?;
        self.claim_one(auth, &session, address, point, ttl).await
    }

    /// Claim several directory addresses; each one is claimed independently
    pub async fn claim_houses(
        &self,
        auth: &AuthContext,
        addresses: &[String],
        ttl_minutes: Option<i64>,
    ) -> WalkResult<ClaimBatch> {
        check_batch(addresses)?;
        let ttl = self.ttl(ttl_minutes)?;
        let session = self.active_session(&auth.volunteer_id).await?;

        let mut batch = ClaimBatch::default();
        let mut seen = FxHashSet::default();
        for address in addresses {
            if !seen.insert(normalize_address(address)) {
                continue;
            }
            let Some(house) = self.houses.get(address) else {
                batch.unknown.push(address.clone());
                continue;
            };
            match self.claim_one(auth, &session, &house.address, house.point(), ttl).await {
                Ok(claim) => batch.claimed.push(claim),
                Err(WalkError::Conflict(_)) => batch.conflicts.push(house.address.clone()),
                Err(e) => return Err(e),
            }
        }
        info!(
            session_id = %session.id,
            claimed = %batch.claimed.len(),
            conflicts = %batch.conflicts.len(),
            unknown = %batch.unknown.len(),
            "houses_claimed"
        );
        Ok(batch)
    }

    pub async fn arrive_at_house(
        &self,
        auth: &AuthContext,
        claim_id: ClaimId,
        point: Option<GeoPoint>,
    ) -> WalkResult<HouseClaim> {
        let session = self.open_session(&auth.volunteer_id).await?;
        let now = self.clock.now();
        let (claim, _) = self
            .store
            .transition_claim(claim_id, session.id, ClaimTransition::Arrive { ttl: self.claim_ttl }, now)
            .await?;
        info!(claim_id = %claim.id, address = %claim.address, "arrived_at_house");
        self.record(
            WalkActivity::new(session.id, ActivityType::ArrivedAtHouse, point.or(Some(claim.point())), now)
                .with_claim(claim.id)
                .with_description(format!("Arrived at {}", claim.address)),
        )
        .await?;
        Ok(claim)
    }

    pub async fn complete_visit(
        &self,
        auth: &AuthContext,
        claim_id: ClaimId,
        voters_contacted: u32,
        voters_home: u32,
        notes: Option<String>,
    ) -> WalkResult<VisitOutcome> {
        if voters_home > voters_contacted {
            return Err(WalkError::Validation(format!(
                "votersHome ({voters_home}) exceeds votersContacted ({voters_contacted})"
            )));
        }
        let session = self.open_session(&auth.volunteer_id).await?;
        let now = self.clock.now();
        let (claim, session) = self
            .store
            .transition_claim(
                claim_id,
                session.id,
                ClaimTransition::Complete { voters_contacted, voters_home },
                now,
            )
            .await?;
        self.metrics.record_visit_completed();
        info!(
            claim_id = %claim.id,
            address = %claim.address,
            voters_contacted = %voters_contacted,
            houses_visited = %session.houses_visited,
            "visit_completed"
        );
        self.hub.publish(HubEvent::HouseCompleted(HouseUpdate::from_claim(
            &claim,
            Some(auth.volunteer_id.clone()),
            now,
        )));

        let mut departed = WalkActivity::new(session.id, ActivityType::DepartedHouse, Some(claim.point()), now)
            .with_claim(claim.id)
            .with_data(json!({ "votersContacted": voters_contacted, "votersHome": voters_home }));
        if let Some(notes) = notes {
            departed = departed.with_description(notes);
        }
        self.record(departed).await?;
        if voters_contacted > 0 {
            self.record(
                WalkActivity::new(session.id, ActivityType::ContactMade, Some(claim.point()), now)
                    .with_claim(claim.id)
                    .with_description(format!("Contacted {voters_contacted} voters at {}", claim.address)),
            )
            .await?;
        }
        Ok(VisitOutcome { claim, session })
    }

    pub async fn release_claim(&self, auth: &AuthContext, claim_id: ClaimId) -> WalkResult<HouseClaim> {
        let session = self.open_session(&auth.volunteer_id).await?;
        let now = self.clock.now();
        let (claim, _) = self.store.transition_claim(claim_id, session.id, ClaimTransition::Release, now).await?;
        self.metrics.record_claim_released();
        info!(claim_id = %claim.id, address = %claim.address, "claim_released");
        self.hub.publish(HubEvent::HouseReleased(HouseUpdate::from_claim(&claim, Some(auth.volunteer_id.clone()), now)));
        self.record(
            WalkActivity::new(session.id, ActivityType::HouseReleased, Some(claim.point()), now).with_claim(claim.id),
        )
        .await?;
        Ok(claim)
    }

    // ---- routing & canvassers ----

    pub async fn optimize_route(
        &self,
        auth: &AuthContext,
        start: GeoPoint,
        addresses: &[String],
    ) -> WalkResult<OptimizedRoute> {
        check_batch(addresses)?;
        let mut seen = FxHashSet::default();
        let houses: Vec<_> = addresses
            .iter()
            .filter(|a| seen.insert(normalize_address(a)))
            .filter_map(|a| self.houses.get(a))
            .collect();
        let route = route::optimize_route(start, &houses);
        info!(
            houses = %route.houses.len(),
            total_distance_m = %format!("{:.0}", route.total_distance_meters),
            "route_generated"
        );

        if let Some(session) = self.store.open_session_for(&auth.volunteer_id).await? {
            if session.status == SessionStatus::Active {
                self.record(
                    WalkActivity::new(session.id, ActivityType::RouteGenerated, Some(start), self.clock.now())
                        .with_data(json!({
                            "houses": route.houses.len(),
                            "totalDistanceMeters": route.total_distance_meters,
                            "estimatedDurationMinutes": route.estimated_duration_minutes,
                        })),
                )
                .await?;
            }
        }
        Ok(route)
    }

    pub async fn nearby_canvassers(&self, origin: GeoPoint, radius_km: Option<f64>) -> WalkResult<Vec<ActiveCanvasser>> {
        let radius_m = proximity::radius_meters(radius_km.unwrap_or(self.canvasser_radius_km))?;
        let now = self.clock.now();
        let hits = proximity::nearest(self.hub.fresh_positions(now), origin, radius_m, CanvasserPosition::point);

        let mut canvassers = Vec::with_capacity(hits.len());
        for (position, distance) in hits {
            let houses_visited = self
                .store
                .open_session_for(&position.volunteer_id)
                .await?
                .map(|s| s.houses_visited)
                .unwrap_or(0);
            canvassers.push(ActiveCanvasser {
                volunteer_id: position.volunteer_id,
                name: position.name,
                latitude: position.latitude,
                longitude: position.longitude,
                last_update_time: position.updated_at,
                houses_visited,
                distance_meters: distance,
            });
        }
        Ok(canvassers)
    }

    /// Register a hub connection, optionally seeding the canvasser's position
    pub fn join_hub(&self, auth: &AuthContext, connection: ConnectionId, point: Option<GeoPoint>) {
        let now = self.clock.now();
        self.hub.join(connection, auth, now);
        if let Some(point) = point {
            self.hub.update_location(auth, point, now);
        }
    }

    pub fn leave_hub(&self, connection: &ConnectionId) -> WalkResult<VolunteerId> {
        self.hub
            .leave(connection, self.clock.now())
            .ok_or_else(|| WalkError::NotFound(format!("connection {connection}")))
    }

    // ---- housekeeping ----

    /// Mark lapsed claims expired, abandon idle sessions, prune positions
    pub async fn sweep(&self) -> WalkResult<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for claim in self.store.expire_stale_claims(now).await? {
            self.metrics.record_claim_expired();
            info!(claim_id = %claim.id, address = %claim.address, "claim_expired");
            self.hub.publish(HubEvent::HouseExpired(HouseUpdate::from_claim(&claim, None, now)));
            self.record(
                WalkActivity::new(claim.walk_session_id, ActivityType::ClaimExpired, Some(claim.point()), now)
                    .with_claim(claim.id),
            )
            .await?;
            report.expired_claims += 1;
        }

        for session in self.store.idle_open_sessions(now - self.abandon_after).await? {
            match self.abandon(session).await {
                Ok(_) => report.abandoned_sessions += 1,
                // Closed by its owner since the scan
                Err(WalkError::Conflict(e)) | Err(WalkError::NotFound(e)) => debug!(reason = %e, "abandon_skipped"),
                Err(e) => return Err(e),
            }
        }

        report.pruned_positions = self.hub.prune_stale(now);
        if report != SweepReport::default() {
            info!(
                expired_claims = %report.expired_claims,
                abandoned_sessions = %report.abandoned_sessions,
                pruned_positions = %report.pruned_positions,
                "sweep_completed"
            );
        }
        Ok(report)
    }

    pub async fn stats(&self) -> WalkResult<WalkStats> {
        Ok(WalkStats {
            open_sessions: self.store.open_session_count().await?,
            active_claims: self.store.active_claims(self.clock.now()).await?.len(),
            connected: self.hub.connection_count(),
        })
    }

    // ---- helpers ----

    async fn open_session(&self, volunteer: &VolunteerId) -> WalkResult<WalkSession> {
        self.store
            .open_session_for(volunteer)
            .await?
            .ok_or_else(|| WalkError::NotFound(format!("no open session for volunteer {volunteer}")))
    }

    async fn active_session(&self, volunteer: &VolunteerId) -> WalkResult<WalkSession> {
        let session = self.open_session(volunteer).await?;
        if session.status != SessionStatus::Active {
            return Err(WalkError::NotFound(format!("no active session for volunteer {volunteer}")));
        }
        Ok(session)
    }

    async fn claim_one(
        &self,
        auth: &AuthContext,
        session: &WalkSession,
        address: &str,
        point: GeoPoint,
        ttl: Duration,
    ) -> WalkResult<HouseClaim> {
        let now = self.clock.now();
        let claim = match self.store.try_claim(HouseClaim::new(session.id, address, point, now, ttl), now).await {
            Ok(claim) => claim,
            Err(e) => {
                if matches!(e, WalkError::Conflict(_)) {
                    self.metrics.record_claim_conflict();
                    info!(address = %address.trim(), session_id = %session.id, "claim_conflict");
                }
                return Err(e);
            }
        };

        self.metrics.record_claim();
        info!(claim_id = %claim.id, address = %claim.address, session_id = %session.id, "house_claimed");
        self.hub.publish(HubEvent::HouseClaimed(HouseUpdate::from_claim(&claim, Some(auth.volunteer_id.clone()), now)));
        self.record(
            WalkActivity::new(session.id, ActivityType::HouseClaimed, Some(point), now)
                .with_claim(claim.id)
                .with_description(claim.address.clone()),
        )
        .await?;
        Ok(claim)
    }

    async fn close(&self, session: WalkSession, outcome: SessionStatus) -> WalkResult<WalkSession> {
        let now = self.clock.now();
        let (session, released) = self.store.close_session(session.id, outcome, now).await?;
        self.hub.forget(&session.volunteer_id);
        for claim in &released {
            self.metrics.record_claim_released();
            self.hub.publish(HubEvent::HouseReleased(HouseUpdate::from_claim(
                claim,
                Some(session.volunteer_id.clone()),
                now,
            )));
        }
        match outcome {
            SessionStatus::Abandoned => self.metrics.record_session_abandoned(),
            _ => self.metrics.record_session_ended(),
        }
        info!(
            session_id = %session.id,
            status = %session.status.as_str(),
            houses_visited = %session.houses_visited,
            voters_contacted = %session.voters_contacted,
            duration_min = %session.duration_minutes,
            released = %released.len(),
            "session_closed"
        );
        Ok(session)
    }

    async fn abandon(&self, session: WalkSession) -> WalkResult<WalkSession> {
        let session = self.close(session, SessionStatus::Abandoned).await?;
        self.record(WalkActivity::new(session.id, ActivityType::SessionAbandoned, session.last_point, self.clock.now()))
            .await?;
        Ok(session)
    }

    fn ttl(&self, minutes: Option<i64>) -> WalkResult<Duration> {
        match minutes {
            None => Ok(self.claim_ttl),
            Some(m) if (1..=self.max_claim_ttl_minutes).contains(&m) => Ok(Duration::minutes(m)),
            Some(m) => Err(WalkError::Validation(format!(
                "ttlMinutes must be in 1..={}, got {m}",
                self.max_claim_ttl_minutes
            ))),
        }
    }

    async fn claimed_addresses(&self) -> WalkResult<FxHashSet<String>> {
        let now = self.clock.now();
        Ok(self.store.active_claims(now).await?.iter().map(HouseClaim::address_key).collect())
    }

    async fn record(&self, activity: WalkActivity) -> WalkResult<()> {
        if let Some(log) = &self.activity_log {
            log.send(&activity);
        }
        self.store.append_activity(activity).await.map_err(|e| {
            warn!(error = %e, "activity_append_failed");
            e
        })
    }
}

fn check_batch(addresses: &[String]) -> WalkResult<()> {
    if addresses.is_empty() {
        return Err(WalkError::Validation("addresses must not be empty".to_string()));
    }
    if addresses.len() > MAX_BATCH_ADDRESSES {
        return Err(WalkError::Validation(format!(
            "at most {MAX_BATCH_ADDRESSES} addresses per request, got {}",
            addresses.len()
        )));
    }
    Ok(())
}
