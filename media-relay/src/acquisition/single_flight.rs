//! Coalescing of identical concurrent acquisitions.
//!
//! The first request for a key becomes the leader and runs the acquisition;
//! requests arriving while it runs wait for and share its result. Nothing is
//! remembered once the flight lands.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Notify, OnceCell};
use tracing::debug;

use super::types::{AcquisitionResult, StrategyOutcome};
use crate::Error;

/// Failure as seen by followers.
#[derive(Debug, Clone)]
pub(crate) enum FlightFailure {
    /// The leader was dropped before finishing; a follower should take over.
    Abandoned,
    Failed(Vec<StrategyOutcome>),
    Error(String),
}

impl FlightFailure {
    fn from_error(err: &Error) -> Self {
        match err {
            Error::TotalAcquisitionFailure { outcomes } => Self::Failed(outcomes.clone()),
            other => Self::Error(other.to_string()),
        }
    }
}

pub(crate) type FlightResult = std::result::Result<AcquisitionResult, FlightFailure>;

pub(crate) struct FlightState {
    result: OnceCell<FlightResult>,
    notify: Notify,
}

impl FlightState {
    fn new() -> Self {
        Self {
            result: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    fn set_result(&self, result: FlightResult) {
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    pub(crate) async fn wait(&self) -> FlightResult {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }
}

/// Outcome of joining a flight.
pub(crate) enum Joined<'a> {
    Leader(FlightLeader<'a>),
    Follower(Arc<FlightState>),
}

/// Held by the request that runs the acquisition.
///
/// Dropping it without calling [`FlightLeader::complete`] marks the flight
/// abandoned so waiting requests can retry.
pub(crate) struct FlightLeader<'a> {
    flights: &'a SingleFlight,
    key: String,
    state: Arc<FlightState>,
    landed: bool,
}

impl FlightLeader<'_> {
    pub(crate) fn complete(mut self, result: &crate::Result<AcquisitionResult>) {
        let shared = match result {
            Ok(result) => Ok(result.clone()),
            Err(e) => Err(FlightFailure::from_error(e)),
        };
        self.flights.land(&self.key, &self.state, shared);
        self.landed = true;
    }
}

impl Drop for FlightLeader<'_> {
    fn drop(&mut self) {
        if !self.landed {
            debug!(key = %self.key, "Acquisition leader dropped, releasing waiters");
            self.flights
                .land(&self.key, &self.state, Err(FlightFailure::Abandoned));
        }
    }
}

/// Table of in-flight acquisitions keyed by normalized request.
#[derive(Default)]
pub struct SingleFlight {
    in_flight: DashMap<String, Arc<FlightState>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, starting one if none is running.
    pub(crate) fn join(&self, key: &str) -> Joined<'_> {
        if let Some(existing) = self.in_flight.get(key) {
            return Joined::Follower(existing.clone());
        }

        match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                // Another request beat us to it
                Joined::Follower(entry.get().clone())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let state = Arc::new(FlightState::new());
                entry.insert(state.clone());
                Joined::Leader(FlightLeader {
                    flights: self,
                    key: key.to_string(),
                    state,
                    landed: false,
                })
            }
        }
    }

    /// Remove the flight from the table, then wake everyone waiting on it.
    fn land(&self, key: &str, state: &Arc<FlightState>, result: FlightResult) {
        self.in_flight
            .remove_if(key, |_, current| Arc::ptr_eq(current, state));
        state.set_result(result);
    }

    /// Number of acquisitions currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
