//! Endpoint groups and selection
//!
//! Every endpoint carries the mode and status it reported at its last login.
//! Its score combines that state with the preference of the configured
//! [`LoginMode`]; candidates are tried best score first. An endpoint whose
//! state is older than [`STATUS_TTL`] scores as unknown, which sorts it ahead
//! of everything else so it gets checked again.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{Config, EpSelector, HostPort, LoginMode};
use crate::constants::{ServerMode, ServerStatus};
use crate::error::{Error, Result};

/// Age after which a reported status is no longer trusted
pub const STATUS_TTL: Duration = Duration::from_secs(20);

/// Score of an endpoint whose status is unknown or stale
pub const UNKNOWN_SCORE: i64 = i32::MAX as i64;

/// Last state reported by an endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointState {
    /// Last connect succeeded
    pub alive: bool,
    /// When the state was recorded
    pub refreshed: Option<Instant>,
    /// Server mode
    pub mode: ServerMode,
    /// Server status
    pub status: ServerStatus,
    /// Instance belongs to a shared-storage cluster
    pub dsc_control: bool,
}

/// One server address in a group
#[derive(Debug)]
pub struct Endpoint {
    /// Address
    pub addr: HostPort,
    /// Position in the group
    pub seq_no: usize,
    state: Mutex<EndpointState>,
}

fn status_addend(status: ServerStatus) -> Option<i64> {
    match status {
        ServerStatus::Open => Some(3),
        ServerStatus::Mount => Some(2),
        ServerStatus::Suspend => Some(1),
        ServerStatus::Unknown => None,
    }
}

/// Preference weight of `mode` under `login_mode`; `None` when not allowed
pub fn mode_weight(login_mode: LoginMode, mode: ServerMode) -> Option<i64> {
    use ServerMode::*;
    match (login_mode, mode) {
        (LoginMode::PrimaryFirst, Primary) => Some(100),
        (LoginMode::PrimaryFirst, Normal) => Some(10),
        (LoginMode::PrimaryFirst, Standby) => Some(1),
        (LoginMode::StandbyFirst, Primary) => Some(10),
        (LoginMode::StandbyFirst, Normal) => Some(1),
        (LoginMode::StandbyFirst, Standby) => Some(100),
        (LoginMode::NormalFirst, Primary) => Some(10),
        (LoginMode::NormalFirst, Normal) => Some(100),
        (LoginMode::NormalFirst, Standby) => Some(1),
        (LoginMode::PrimaryOnly, Primary) | (LoginMode::StandbyOnly, Standby) => Some(0),
        (LoginMode::PrimaryOnly, _) | (LoginMode::StandbyOnly, _) => None,
    }
}

/// Score for a known `(mode, status)` pair
pub fn score(login_mode: LoginMode, mode: ServerMode, status: ServerStatus) -> Option<i64> {
    let addend = status_addend(status)?;
    Some(mode_weight(login_mode, mode)? + addend)
}

/// Highest score any endpoint could reach under `login_mode`
pub fn best_score(login_mode: LoginMode) -> i64 {
    [ServerMode::Primary, ServerMode::Normal, ServerMode::Standby]
        .into_iter()
        .filter_map(|m| score(login_mode, m, ServerStatus::Open))
        .max()
        .unwrap_or(0)
}

impl Endpoint {
    /// Create an endpoint with unknown state
    pub fn new(addr: HostPort, seq_no: usize) -> Self {
        Self {
            addr,
            seq_no,
            state: Mutex::new(EndpointState::default()),
        }
    }

    /// Snapshot of the last reported state
    pub fn state(&self) -> EndpointState {
        self.state.lock().map(|s| *s).unwrap_or_default()
    }

    /// Record a successful login
    pub fn record(&self, mode: ServerMode, status: ServerStatus, dsc_control: bool) {
        if let Ok(mut s) = self.state.lock() {
            *s = EndpointState {
                alive: true,
                refreshed: Some(Instant::now()),
                mode,
                status,
                dsc_control,
            };
        }
    }

    /// Record a failed connect or a broken session
    pub fn mark_down(&self) {
        if let Ok(mut s) = self.state.lock() {
            s.alive = false;
            s.refreshed = Some(Instant::now());
        }
    }

    /// Score under `login_mode`; `None` when the known mode is not allowed
    /// or the endpoint is known to be down
    pub fn score(&self, login_mode: LoginMode) -> Option<i64> {
        let state = self.state();
        let fresh = state.refreshed.is_some_and(|t| t.elapsed() < STATUS_TTL);
        if !fresh {
            return Some(UNKNOWN_SCORE);
        }
        if !state.alive {
            return None;
        }
        score(login_mode, state.mode, state.status)
    }
}

/// An ordered set of endpoints sharing failover state
#[derive(Debug)]
pub struct EndpointGroup {
    /// Group name (the service name, or the address list)
    pub name: String,
    endpoints: Vec<Endpoint>,
    rotation: AtomicUsize,
}

impl EndpointGroup {
    /// Create a group from addresses in configured order
    pub fn new(name: impl Into<String>, addrs: &[HostPort]) -> Self {
        Self {
            name: name.into(),
            endpoints: addrs
                .iter()
                .enumerate()
                .map(|(i, a)| Endpoint::new(a.clone(), i))
                .collect(),
            rotation: AtomicUsize::new(0),
        }
    }

    /// Endpoints in configured order
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Endpoint at `index`
    pub fn get(&self, index: usize) -> Option<&Endpoint> {
        self.endpoints.get(index)
    }

    /// Number of endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Check if the group has no endpoints
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Traversal order for one connect attempt
    pub fn traversal(&self, selector: EpSelector) -> Vec<usize> {
        let n = self.endpoints.len();
        let start = match selector {
            EpSelector::HeadFirst => 0,
            EpSelector::WellDistribute if n > 0 => self.rotation.fetch_add(1, Ordering::Relaxed) % n,
            EpSelector::WellDistribute => 0,
        };
        (0..n).map(|i| (start + i) % n).collect()
    }

    /// Candidates for one round, best score first; ties keep traversal order
    pub fn candidates(&self, order: &[usize], login_mode: LoginMode, last_round: bool) -> Vec<usize> {
        let mut scored: Vec<(usize, i64)> = order
            .iter()
            .filter_map(|&i| {
                let ep = self.endpoints.get(i)?;
                match ep.score(login_mode) {
                    Some(s) => Some((i, s)),
                    // a down endpoint gets another chance on the last round
                    None if last_round && !ep.state().alive => Some((i, 0)),
                    None => None,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.into_iter().map(|(i, _)| i).collect()
    }
}

/// Walk `group` in `switch_times + 1` rounds and return the first endpoint
/// whose session `dial` opens with the best attainable score
///
/// `dial` reports the mode and status the server advertised. A session whose
/// mode the login mode does not allow is dropped; one that scores below the
/// best attainable is kept as a fallback and used if nothing better answers
/// in the same round.
pub async fn connect_group<T, F, Fut>(group: &EndpointGroup, config: &Config, mut dial: F) -> Result<(usize, T)>
where
    F: FnMut(usize, HostPort) -> Fut,
    Fut: Future<Output = Result<(T, ServerMode, ServerStatus, bool)>>,
{
    if group.is_empty() {
        return Err(Error::NoAvailableEndpoint(format!("group {} is empty", group.name)));
    }
    let rounds = config.switch_times as usize + 1;
    let best = best_score(config.login_mode);
    let order = group.traversal(config.ep_selector);
    let mut failures: Vec<String> = Vec::new();

    for round in 0..rounds {
        let last_round = round + 1 == rounds;
        if round > 0 {
            tokio::time::sleep(config.switch_interval).await;
        }
        let mut fallback: Option<(usize, T, i64)> = None;
        for index in group.candidates(&order, config.login_mode, last_round) {
            let Some(ep) = group.get(index) else { continue };
            debug!(endpoint = %ep.addr, round, "trying endpoint");
            match dial(index, ep.addr.clone()).await {
                Ok((session, mode, status, dsc)) => {
                    ep.record(mode, status, dsc);
                    let Some(s) = score(config.login_mode, mode, status) else {
                        debug!(endpoint = %ep.addr, ?mode, "server mode not allowed by login mode");
                        failures.push(format!("{}: server mode {:?} not allowed", ep.addr, mode));
                        continue;
                    };
                    if s >= best {
                        info!(endpoint = %ep.addr, ?mode, ?status, "endpoint selected");
                        return Ok((index, session));
                    }
                    if fallback.as_ref().map_or(true, |(_, _, f)| s > *f) {
                        fallback = Some((index, session, s));
                    }
                }
                Err(e) => {
                    warn!(endpoint = %ep.addr, error = %e, "endpoint connect failed");
                    ep.mark_down();
                    failures.push(format!("{}: {}", ep.addr, e));
                }
            }
        }
        if let Some((index, session, s)) = fallback {
            info!(endpoint = %group.endpoints[index].addr, score = s, "endpoint selected as fallback");
            return Ok((index, session));
        }
    }
    Err(Error::NoAvailableEndpoint(failures.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn group(n: usize) -> EndpointGroup {
        let addrs: Vec<HostPort> = (0..n).map(|i| HostPort::new(format!("h{i}"), 5236)).collect();
        EndpointGroup::new("test", &addrs)
    }

    #[test]
    fn test_score_table() {
        use ServerMode::*;
        assert_eq!(score(LoginMode::PrimaryFirst, Primary, ServerStatus::Open), Some(103));
        assert_eq!(score(LoginMode::PrimaryFirst, Standby, ServerStatus::Mount), Some(3));
        assert_eq!(score(LoginMode::NormalFirst, Normal, ServerStatus::Suspend), Some(101));
        assert_eq!(score(LoginMode::StandbyFirst, Standby, ServerStatus::Open), Some(103));
        assert_eq!(score(LoginMode::PrimaryOnly, Primary, ServerStatus::Open), Some(3));
        assert_eq!(score(LoginMode::PrimaryOnly, Normal, ServerStatus::Open), None);
        assert_eq!(score(LoginMode::StandbyOnly, Primary, ServerStatus::Open), None);
        assert_eq!(score(LoginMode::NormalFirst, Normal, ServerStatus::Unknown), None);
        assert_eq!(best_score(LoginMode::PrimaryOnly), 3);
        assert_eq!(best_score(LoginMode::NormalFirst), 103);
    }

    #[test]
    fn test_unknown_state_sorts_first() {
        let g = group(3);
        g.get(0).unwrap().record(ServerMode::Normal, ServerStatus::Open, false);
        g.get(1).unwrap().record(ServerMode::Standby, ServerStatus::Open, false);
        let order = g.traversal(EpSelector::HeadFirst);
        assert_eq!(g.candidates(&order, LoginMode::NormalFirst, false), vec![2, 0, 1]);
        g.get(2).unwrap().mark_down();
        assert_eq!(g.candidates(&order, LoginMode::NormalFirst, false), vec![0, 1]);
    }

    #[test]
    fn test_well_distribute_rotates() {
        let g = group(3);
        assert_eq!(g.traversal(EpSelector::WellDistribute), vec![0, 1, 2]);
        assert_eq!(g.traversal(EpSelector::WellDistribute), vec![1, 2, 0]);
        assert_eq!(g.traversal(EpSelector::HeadFirst), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_connect_prefers_best_mode() {
        let g = group(2);
        let config = Config::default().with_login_mode(LoginMode::PrimaryFirst);
        let (index, name) = connect_group(&g, &config, |i, addr| async move {
            let mode = if i == 0 { ServerMode::Standby } else { ServerMode::Primary };
            Ok((addr.host, mode, ServerStatus::Open, false))
        })
        .await
        .unwrap();
        assert_eq!((index, name.as_str()), (1, "h1"));
    }

    #[tokio::test]
    async fn test_connect_uses_fallback() {
        let g = group(1);
        let config = Config::default().with_login_mode(LoginMode::PrimaryFirst);
        let (index, _) = connect_group(&g, &config, |_, _| async {
            Ok(((), ServerMode::Standby, ServerStatus::Open, false))
        })
        .await
        .unwrap();
        assert_eq!(index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_rounds_and_failure() {
        let g = group(2);
        let mut config = Config::default();
        config.switch_times = 2;
        let attempts = AtomicU32::new(0);
        let err = connect_group(&g, &config, |_, addr| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async move { Err::<((), ServerMode, ServerStatus, bool), _>(Error::communication(format!("refused {addr}"))) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NoAvailableEndpoint(_)));
        // round one tries both; endpoints are then known down until the last round
        assert_eq!(attempts.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_only_mode_rejects_mismatch() {
        let g = group(1);
        let mut config = Config::default().with_login_mode(LoginMode::PrimaryOnly);
        config.switch_times = 0;
        let err = connect_group(&g, &config, |_, _| async {
            Ok(((), ServerMode::Normal, ServerStatus::Open, false))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }
}
