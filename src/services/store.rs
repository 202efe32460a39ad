//! Persistence port for sessions, claims and activities
//!
//! `WalkStore` is the seam a database-backed implementation plugs into.
//! `MemoryWalkStore` keeps everything behind one mutex; each claim write is a
//! single read-modify-write against the address index, which gives the same
//! guarantee a unique constraint on "live claim per address" would.

use crate::domain::{
    ClaimId, ClaimStatus, HouseClaim, SessionId, SessionStatus, VolunteerId, WalkActivity,
    WalkSession,
};
use crate::infra::error::{WalkError, WalkResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// State change requested on an existing claim
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClaimTransition {
    /// claimed/visiting -> visiting, expiry extended to at least `now + ttl`
    Arrive { ttl: Duration },
    /// claimed/visiting -> visited, session counters bumped
    Complete { voters_contacted: u32, voters_home: u32 },
    /// claimed/visiting -> released
    Release,
}

impl ClaimTransition {
    fn name(&self) -> &'static str {
        match self {
            ClaimTransition::Arrive { .. } => "arrive",
            ClaimTransition::Complete { .. } => "complete",
            ClaimTransition::Release => "release",
        }
    }
}

/// Mutation applied to a session copy; the copy is only stored on `Ok`
pub type SessionUpdate<'a> = &'a (dyn Fn(&mut WalkSession) -> WalkResult<()> + Send + Sync);

#[async_trait]
pub trait WalkStore: Send + Sync {
    /// Insert a new open session. Conflict if the volunteer already has one.
    async fn insert_session(&self, session: WalkSession) -> WalkResult<WalkSession>;

    async fn session(&self, id: SessionId) -> WalkResult<Option<WalkSession>>;

    /// The volunteer's active or paused session
    async fn open_session_for(&self, volunteer: &VolunteerId) -> WalkResult<Option<WalkSession>>;

    /// Apply `update` atomically. NotFound if the session does not exist.
    async fn modify_session(&self, id: SessionId, update: SessionUpdate<'_>) -> WalkResult<WalkSession>;

    /// Finish an open session and release its live claims in one step
    async fn close_session(
        &self,
        id: SessionId,
        outcome: SessionStatus,
        now: DateTime<Utc>,
    ) -> WalkResult<(WalkSession, Vec<HouseClaim>)>;

    /// Open sessions with no activity since `cutoff`
    async fn idle_open_sessions(&self, cutoff: DateTime<Utc>) -> WalkResult<Vec<WalkSession>>;

    async fn open_session_count(&self) -> WalkResult<usize>;

    /// Insert a claim if its address has no active claim at `now`.
    ///
    /// NotFound if the owning session is not active, Conflict if the address
    /// is held. A lapsed live claim on the address is marked expired.
    async fn try_claim(&self, claim: HouseClaim, now: DateTime<Utc>) -> WalkResult<HouseClaim>;

    async fn claim(&self, id: ClaimId) -> WalkResult<Option<HouseClaim>>;

    /// Move a claim owned by `session_id` through `transition`.
    ///
    /// NotFound if the claim is unknown, owned by another session, or no
    /// longer active (terminal or past its expiry). Nothing changes on error.
    async fn transition_claim(
        &self,
        id: ClaimId,
        session_id: SessionId,
        transition: ClaimTransition,
        now: DateTime<Utc>,
    ) -> WalkResult<(HouseClaim, WalkSession)>;

    async fn claims_for_session(&self, session_id: SessionId) -> WalkResult<Vec<HouseClaim>>;

    /// Claims holding their address at `now`
    async fn active_claims(&self, now: DateTime<Utc>) -> WalkResult<Vec<HouseClaim>>;

    /// Mark live claims past their expiry as expired, returning them
    async fn expire_stale_claims(&self, now: DateTime<Utc>) -> WalkResult<Vec<HouseClaim>>;

    async fn append_activity(&self, activity: WalkActivity) -> WalkResult<()>;

    async fn activities_for_session(&self, session_id: SessionId) -> WalkResult<Vec<WalkActivity>>;
}

#[derive(Default)]
struct StoreState {
    sessions: FxHashMap<SessionId, WalkSession>,
    open_by_volunteer: FxHashMap<VolunteerId, SessionId>,
    claims: FxHashMap<ClaimId, HouseClaim>,
    /// Normalised address -> most recent claim on it
    by_address: FxHashMap<String, ClaimId>,
    session_claims: FxHashMap<SessionId, Vec<ClaimId>>,
    activities: FxHashMap<SessionId, Vec<WalkActivity>>,
}

impl StoreState {
    fn session_claims(&self, session_id: SessionId) -> impl Iterator<Item = &HouseClaim> {
        self.session_claims
            .get(&session_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.claims.get(id))
    }
}

/// In-process store
#[derive(Default)]
pub struct MemoryWalkStore {
    state: Mutex<StoreState>,
}

impl MemoryWalkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn session_not_found(id: SessionId) -> WalkError {
    WalkError::NotFound(format!("session {id}"))
}

#[async_trait]
impl WalkStore for MemoryWalkStore {
    async fn insert_session(&self, session: WalkSession) -> WalkResult<WalkSession> {
        let mut state = self.state.lock();
        if let Some(existing) = state.open_by_volunteer.get(&session.volunteer_id) {
            return Err(WalkError::Conflict(format!(
                "volunteer {} already has open session {existing}",
                session.volunteer_id
            )));
        }
        state.open_by_volunteer.insert(session.volunteer_id.clone(), session.id);
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn session(&self, id: SessionId) -> WalkResult<Option<WalkSession>> {
        Ok(self.state.lock().sessions.get(&id).cloned())
    }

    async fn open_session_for(&self, volunteer: &VolunteerId) -> WalkResult<Option<WalkSession>> {
        let state = self.state.lock();
        Ok(state.open_by_volunteer.get(volunteer).and_then(|id| state.sessions.get(id)).cloned())
    }

    async fn modify_session(&self, id: SessionId, update: SessionUpdate<'_>) -> WalkResult<WalkSession> {
        let mut state = self.state.lock();
        let stored = state.sessions.get_mut(&id).ok_or_else(|| session_not_found(id))?;
        let mut next = stored.clone();
        update(&mut next)?;
        *stored = next.clone();
        if !next.status.is_open() {
            state.open_by_volunteer.remove(&next.volunteer_id);
        }
        Ok(next)
    }

    async fn close_session(
        &self,
        id: SessionId,
        outcome: SessionStatus,
        now: DateTime<Utc>,
    ) -> WalkResult<(WalkSession, Vec<HouseClaim>)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let stored = state.sessions.get_mut(&id).ok_or_else(|| session_not_found(id))?;
        let mut session = stored.clone();
        session.finish(outcome, now)?;
        *stored = session.clone();
        state.open_by_volunteer.remove(&session.volunteer_id);

        let mut released = Vec::new();
        for claim_id in state.session_claims.get(&id).into_iter().flatten() {
            let Some(claim) = state.claims.get_mut(claim_id) else {
                continue;
            };
            if claim.is_active(now) {
                claim.status = ClaimStatus::Released;
                released.push(claim.clone());
            }
        }
        Ok((session, released))
    }

    async fn idle_open_sessions(&self, cutoff: DateTime<Utc>) -> WalkResult<Vec<WalkSession>> {
        let state = self.state.lock();
        Ok(state
            .open_by_volunteer
            .values()
            .filter_map(|id| state.sessions.get(id))
            .filter(|s| s.last_activity_at < cutoff)
            .cloned()
            .collect())
    }

    async fn open_session_count(&self) -> WalkResult<usize> {
        Ok(self.state.lock().open_by_volunteer.len())
    }

    async fn try_claim(&self, claim: HouseClaim, now: DateTime<Utc>) -> WalkResult<HouseClaim> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match state.sessions.get(&claim.walk_session_id) {
            Some(s) if s.status == SessionStatus::Active => {}
            _ => {
                return Err(WalkError::NotFound(format!(
                    "no active session {}",
                    claim.walk_session_id
                )))
            }
        }

        let key = claim.address_key();
        if let Some(previous) = state.by_address.get(&key).and_then(|id| state.claims.get_mut(id)) {
            if previous.is_active(now) {
                return Err(WalkError::Conflict(format!("{} is already claimed", claim.address)));
            }
            // Lapsed but never swept
            if previous.status.is_live() {
                previous.status = ClaimStatus::Expired;
            }
        }

        state.by_address.insert(key, claim.id);
        state.session_claims.entry(claim.walk_session_id).or_default().push(claim.id);
        state.claims.insert(claim.id, claim.clone());
        Ok(claim)
    }

    async fn claim(&self, id: ClaimId) -> WalkResult<Option<HouseClaim>> {
        Ok(self.state.lock().claims.get(&id).cloned())
    }

    async fn transition_claim(
        &self,
        id: ClaimId,
        session_id: SessionId,
        transition: ClaimTransition,
        now: DateTime<Utc>,
    ) -> WalkResult<(HouseClaim, WalkSession)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let claim = state
            .claims
            .get_mut(&id)
            .filter(|c| c.walk_session_id == session_id)
            .ok_or_else(|| WalkError::NotFound(format!("claim {id}")))?;
        if !claim.is_active(now) {
            return Err(WalkError::NotFound(format!(
                "claim {id} is {}, cannot {}",
                claim.effective_status(now).as_str(),
                transition.name()
            )));
        }
        // The session may have closed since the caller looked it up
        let session = state
            .sessions
            .get_mut(&session_id)
            .filter(|s| s.status.is_open())
            .ok_or_else(|| WalkError::NotFound(format!("no open session {session_id}")))?;

        match transition {
            ClaimTransition::Arrive { ttl } => {
                claim.status = ClaimStatus::Visiting;
                claim.visited_at = Some(now);
                claim.expires_at = claim.expires_at.max(now + ttl);
                session.touch(now);
            }
            ClaimTransition::Complete { voters_contacted, voters_home } => {
                claim.status = ClaimStatus::Visited;
                claim.visited_at.get_or_insert(now);
                claim.voters_contacted = voters_contacted;
                claim.voters_home = voters_home;
                session.record_visit(voters_contacted, now);
            }
            ClaimTransition::Release => {
                claim.status = ClaimStatus::Released;
                session.touch(now);
            }
        }
        Ok((claim.clone(), session.clone()))
    }

    async fn claims_for_session(&self, session_id: SessionId) -> WalkResult<Vec<HouseClaim>> {
        let state = self.state.lock();
        Ok(state.session_claims(session_id).cloned().collect())
    }

    async fn active_claims(&self, now: DateTime<Utc>) -> WalkResult<Vec<HouseClaim>> {
        let state = self.state.lock();
        Ok(state
            .by_address
            .values()
            .filter_map(|id| state.claims.get(id))
            .filter(|c| c.is_active(now))
            .cloned()
            .collect())
    }

    async fn expire_stale_claims(&self, now: DateTime<Utc>) -> WalkResult<Vec<HouseClaim>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut expired = Vec::new();
        for id in state.by_address.values() {
            if let Some(claim) = state.claims.get_mut(id) {
                if claim.status.is_live() && claim.expires_at <= now {
                    claim.status = ClaimStatus::Expired;
                    expired.push(claim.clone());
                }
            }
        }
        Ok(expired)
    }

    async fn append_activity(&self, activity: WalkActivity) -> WalkResult<()> {
        let mut state = self.state.lock();
        state.activities.entry(activity.walk_session_id).or_default().push(activity);
        Ok(())
    }

    async fn activities_for_session(&self, session_id: SessionId) -> WalkResult<Vec<WalkActivity>> {
        Ok(self.state.lock().activities.get(&session_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivityType, GeoPoint};
    use std::sync::Arc;

    const TTL_MIN: i64 = 30;

    fn point() -> GeoPoint {
        GeoPoint { latitude: 38.9, longitude: -77.0 }
    }

    async fn open_session(store: &MemoryWalkStore, volunteer: &str) -> WalkSession {
        let session = WalkSession::start(VolunteerId::new(volunteer), None, Utc::now());
        store.insert_session(session).await.unwrap()
    }

    fn new_claim(session: &WalkSession, address: &str, now: DateTime<Utc>) -> HouseClaim {
        HouseClaim::new(session.id, address, point(), now, Duration::minutes(TTL_MIN))
    }

    #[tokio::test]
    async fn test_one_open_session_per_volunteer() {
        let store = MemoryWalkStore::new();
        let first = open_session(&store, "v-1").await;
        let second = WalkSession::start(VolunteerId::new("v-1"), None, Utc::now());
        assert!(matches!(store.insert_session(second).await, Err(WalkError::Conflict(_))));

        store
            .close_session(first.id, SessionStatus::Completed, Utc::now())
            .await
            .unwrap();
        assert!(store.open_session_for(&VolunteerId::new("v-1")).await.unwrap().is_none());
        open_session(&store, "v-1").await;
    }

    #[tokio::test]
    async fn test_claim_conflict_on_same_address() {
        let store = MemoryWalkStore::new();
        let a = open_session(&store, "v-a").await;
        let b = open_session(&store, "v-b").await;
        let now = Utc::now();

        store.try_claim(new_claim(&a, "12 Main St", now), now).await.unwrap();
        let err = store.try_claim(new_claim(&b, " 12  MAIN st", now), now).await.unwrap_err();
        assert!(matches!(err, WalkError::Conflict(_)));
        assert_eq!(store.active_claims(now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reclaim_after_lazy_expiry() {
        let store = MemoryWalkStore::new();
        let a = open_session(&store, "v-a").await;
        let b = open_session(&store, "v-b").await;
        let now = Utc::now();

        let first = store.try_claim(new_claim(&a, "12 Main St", now), now).await.unwrap();
        let later = now + Duration::minutes(TTL_MIN + 1);
        let second = store.try_claim(new_claim(&b, "12 Main St", later), later).await.unwrap();

        let superseded = store.claim(first.id).await.unwrap().unwrap();
        assert_eq!(superseded.status, ClaimStatus::Expired);
        let active = store.active_claims(later).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
    }

    #[tokio::test]
    async fn test_claim_requires_active_session() {
        let store = MemoryWalkStore::new();
        let s = open_session(&store, "v-1").await;
        store.modify_session(s.id, &|s| s.pause(Utc::now())).await.unwrap();

        let now = Utc::now();
        let err = store.try_claim(new_claim(&s, "1 Elm St", now), now).await.unwrap_err();
        assert!(matches!(err, WalkError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_foreign_claim_is_not_found_and_untouched() {
        let store = MemoryWalkStore::new();
        let a = open_session(&store, "v-a").await;
        let b = open_session(&store, "v-b").await;
        let now = Utc::now();
        let claim = store.try_claim(new_claim(&a, "1 Elm St", now), now).await.unwrap();

        for t in [
            ClaimTransition::Release,
            ClaimTransition::Complete { voters_contacted: 1, voters_home: 1 },
        ] {
            let err = store.transition_claim(claim.id, b.id, t, now).await.unwrap_err();
            assert!(matches!(err, WalkError::NotFound(_)));
        }
        assert_eq!(store.claim(claim.id).await.unwrap().unwrap(), claim);
        assert_eq!(store.session(b.id).await.unwrap().unwrap().houses_visited, 0);
    }

    #[tokio::test]
    async fn test_terminal_claim_rejects_transitions() {
        let store = MemoryWalkStore::new();
        let s = open_session(&store, "v-1").await;
        let now = Utc::now();
        let claim = store.try_claim(new_claim(&s, "1 Elm St", now), now).await.unwrap();

        store.transition_claim(claim.id, s.id, ClaimTransition::Release, now).await.unwrap();
        let err = store
            .transition_claim(claim.id, s.id, ClaimTransition::Complete { voters_contacted: 2, voters_home: 1 }, now)
            .await
            .unwrap_err();
        assert!(matches!(err, WalkError::NotFound(_)));
        assert_eq!(store.claim(claim.id).await.unwrap().unwrap().status, ClaimStatus::Released);
        assert_eq!(store.session(s.id).await.unwrap().unwrap().houses_visited, 0);
    }

    #[tokio::test]
    async fn test_expired_claim_cannot_complete() {
        let store = MemoryWalkStore::new();
        let s = open_session(&store, "v-1").await;
        let now = Utc::now();
        let claim = store.try_claim(new_claim(&s, "1 Elm St", now), now).await.unwrap();

        let later = now + Duration::minutes(TTL_MIN);
        let err = store
            .transition_claim(claim.id, s.id, ClaimTransition::Complete { voters_contacted: 1, voters_home: 1 }, later)
            .await
            .unwrap_err();
        assert!(matches!(err, WalkError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_arrive_then_complete_updates_session() {
        let store = MemoryWalkStore::new();
        let s = open_session(&store, "v-1").await;
        let now = Utc::now();
        let claim = store.try_claim(new_claim(&s, "1 Elm St", now), now).await.unwrap();

        let arrive_at = now + Duration::minutes(20);
        let (visiting, _) = store
            .transition_claim(claim.id, s.id, ClaimTransition::Arrive { ttl: Duration::minutes(TTL_MIN) }, arrive_at)
            .await
            .unwrap();
        assert_eq!(visiting.status, ClaimStatus::Visiting);
        assert_eq!(visiting.expires_at, arrive_at + Duration::minutes(TTL_MIN));

        // Past the original expiry but within the refreshed one
        let done_at = now + Duration::minutes(40);
        let (visited, session) = store
            .transition_claim(claim.id, s.id, ClaimTransition::Complete { voters_contacted: 3, voters_home: 2 }, done_at)
            .await
            .unwrap();
        assert_eq!(visited.status, ClaimStatus::Visited);
        assert_eq!(visited.visited_at, Some(arrive_at));
        assert_eq!(visited.voters_home, 2);
        assert_eq!(session.houses_visited, 1);
        assert_eq!(session.voters_contacted, 3);
    }

    #[tokio::test]
    async fn test_close_session_releases_claimed_and_visiting() {
        let store = MemoryWalkStore::new();
        let s = open_session(&store, "v-1").await;
        let now = Utc::now();
        let c1 = store.try_claim(new_claim(&s, "1 Elm St", now), now).await.unwrap();
        let c2 = store.try_claim(new_claim(&s, "2 Elm St", now), now).await.unwrap();
        let c3 = store.try_claim(new_claim(&s, "3 Elm St", now), now).await.unwrap();
        store
            .transition_claim(c2.id, s.id, ClaimTransition::Arrive { ttl: Duration::minutes(TTL_MIN) }, now)
            .await
            .unwrap();
        store
            .transition_claim(c3.id, s.id, ClaimTransition::Complete { voters_contacted: 1, voters_home: 1 }, now)
            .await
            .unwrap();

        let (session, released) = store.close_session(s.id, SessionStatus::Completed, now).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        let mut ids: Vec<ClaimId> = released.iter().map(|c| c.id).collect();
        ids.sort();
        let mut expected = vec![c1.id, c2.id];
        expected.sort();
        assert_eq!(ids, expected);
        assert_eq!(store.claim(c2.id).await.unwrap().unwrap().status, ClaimStatus::Released);
        assert_eq!(store.claim(c3.id).await.unwrap().unwrap().status, ClaimStatus::Visited);
        assert!(store.active_claims(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_visiting_address_reclaimable_after_session_ends() {
        let store = MemoryWalkStore::new();
        let a = open_session(&store, "v-a").await;
        let b = open_session(&store, "v-b").await;
        let now = Utc::now();
        let claim = store.try_claim(new_claim(&a, "1 Elm St", now), now).await.unwrap();
        store
            .transition_claim(claim.id, a.id, ClaimTransition::Arrive { ttl: Duration::minutes(TTL_MIN) }, now)
            .await
            .unwrap();
        store.close_session(a.id, SessionStatus::Completed, now).await.unwrap();

        // Well before the visiting claim would have expired
        let later = now + Duration::minutes(1);
        store.try_claim(new_claim(&b, "1 Elm St", later), later).await.unwrap();
    }

    #[tokio::test]
    async fn test_transition_rejected_after_session_closed() {
        let store = MemoryWalkStore::new();
        let s = open_session(&store, "v-1").await;
        let now = Utc::now();
        let claim = store.try_claim(new_claim(&s, "1 Elm St", now), now).await.unwrap();

        // Finish the session without going through close_session so the claim stays live
        store.modify_session(s.id, &|s| s.finish(SessionStatus::Completed, now)).await.unwrap();
        assert!(store.claim(claim.id).await.unwrap().unwrap().is_active(now));

        let err = store
            .transition_claim(claim.id, s.id, ClaimTransition::Complete { voters_contacted: 2, voters_home: 1 }, now)
            .await
            .unwrap_err();
        assert!(matches!(err, WalkError::NotFound(_)));
        let session = store.session(s.id).await.unwrap().unwrap();
        assert_eq!(session.houses_visited, 0);
        assert_eq!(session.voters_contacted, 0);
        assert_eq!(store.claim(claim.id).await.unwrap().unwrap().status, ClaimStatus::Claimed);
    }

    #[tokio::test]
    async fn test_arrive_keeps_longer_expiry() {
        let store = MemoryWalkStore::new();
        let s = open_session(&store, "v-1").await;
        let now = Utc::now();
        let long = HouseClaim::new(s.id, "1 Elm St", point(), now, Duration::minutes(120));
        let claim = store.try_claim(long, now).await.unwrap();

        let (visiting, _) = store
            .transition_claim(claim.id, s.id, ClaimTransition::Arrive { ttl: Duration::minutes(TTL_MIN) }, now)
            .await
            .unwrap();
        assert_eq!(visiting.status, ClaimStatus::Visiting);
        assert_eq!(visiting.expires_at, now + Duration::minutes(120));
    }

    #[tokio::test]
    async fn test_failed_session_update_does_not_mutate() {
        let store = MemoryWalkStore::new();
        let s = open_session(&store, "v-1").await;
        let err = store.modify_session(s.id, &|s| s.resume(Utc::now())).await.unwrap_err();
        assert!(matches!(err, WalkError::Conflict(_)));
        assert_eq!(store.session(s.id).await.unwrap().unwrap(), s);
    }

    #[tokio::test]
    async fn test_expire_stale_claims() {
        let store = MemoryWalkStore::new();
        let s = open_session(&store, "v-1").await;
        let now = Utc::now();
        store.try_claim(new_claim(&s, "1 Elm St", now), now).await.unwrap();

        assert!(store.expire_stale_claims(now).await.unwrap().is_empty());
        let later = now + Duration::minutes(TTL_MIN);
        let expired = store.expire_stale_claims(later).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, ClaimStatus::Expired);
        // Second sweep finds nothing new
        assert!(store.expire_stale_claims(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idle_open_sessions() {
        let store = MemoryWalkStore::new();
        let s = open_session(&store, "v-1").await;
        assert!(store.idle_open_sessions(s.last_activity_at).await.unwrap().is_empty());
        let idle = store.idle_open_sessions(s.last_activity_at + Duration::seconds(1)).await.unwrap();
        assert_eq!(idle.len(), 1);
    }

    #[tokio::test]
    async fn test_activities_append_only_per_session() {
        let store = MemoryWalkStore::new();
        let s = open_session(&store, "v-1").await;
        let now = Utc::now();
        store.append_activity(WalkActivity::new(s.id, ActivityType::SessionStarted, None, now)).await.unwrap();
        store.append_activity(WalkActivity::new(s.id, ActivityType::SessionPaused, None, now)).await.unwrap();

        let acts = store.activities_for_session(s.id).await.unwrap();
        assert_eq!(acts.len(), 2);
        assert_eq!(acts[1].activity_type, ActivityType::SessionPaused);
        assert!(store.activities_for_session(SessionId::new()).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_single_winner() {
        let store = Arc::new(MemoryWalkStore::new());
        let mut sessions = Vec::new();
        for i in 0..32 {
            sessions.push(open_session(&store, &format!("v-{i}")).await);
        }

        let now = Utc::now();
        let mut handles = Vec::new();
        for session in sessions {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.try_claim(new_claim(&session, "99 Race Ave", now), now).await
            }));
        }

        let mut won = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(WalkError::Conflict(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(conflicts, 31);
    }
}
