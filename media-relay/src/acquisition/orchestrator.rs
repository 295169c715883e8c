//! Ordered, first-success-wins acquisition across strategies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::single_flight::{FlightFailure, Joined, SingleFlight};
use super::strategy::{
    ConverterApiStrategy, DirectHttpStrategy, PlaceholderStrategy, YtDlpStrategy,
};
use super::traits::{AcquisitionStrategy, StrategyContext, StrategyOutput};
use super::types::{AcquisitionRequest, AcquisitionResult, MediaFormat, StrategyOutcome};
use crate::config::{AcquisitionConfig, FailureMode};
use crate::store::{ArtifactId, ArtifactStore};
use crate::utils::fs::remove_file_if_exists;
use crate::{Error, Result};

/// Budget for the last-resort strategy.
const LAST_RESORT_TIMEOUT: Duration = Duration::from_secs(10);

/// A strategy together with its scheduling parameters.
#[derive(Clone)]
pub struct StrategySlot {
    strategy: Arc<dyn AcquisitionStrategy>,
    timeout: Duration,
    aggressive: bool,
}

impl StrategySlot {
    pub fn new(strategy: Arc<dyn AcquisitionStrategy>, timeout: Duration) -> Self {
        Self {
            strategy,
            timeout,
            aggressive: false,
        }
    }

    /// Mark this strategy as one to move to the front in aggressive mode.
    pub fn aggressive(mut self) -> Self {
        self.aggressive = true;
        self
    }

    pub fn name(&self) -> &str {
        self.strategy.name()
    }
}

/// One scheduled step of a plan.
struct PlannedAttempt<'a> {
    strategy: &'a dyn AcquisitionStrategy,
    timeout: Duration,
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    store: Arc<ArtifactStore>,
    plans: HashMap<MediaFormat, Vec<StrategySlot>>,
    last_resort: Option<Arc<dyn AcquisitionStrategy>>,
    mode: FailureMode,
    coalesce: bool,
    aggressive_timeout_factor: u32,
}

impl OrchestratorBuilder {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self {
            store,
            plans: HashMap::new(),
            last_resort: None,
            mode: FailureMode::Strict,
            coalesce: true,
            aggressive_timeout_factor: 2,
        }
    }

    /// Append a strategy to the plan of every format it supports.
    pub fn strategy(mut self, slot: StrategySlot) -> Self {
        for format in [MediaFormat::Audio, MediaFormat::Video] {
            if slot.strategy.supports(format) {
                self.plans.entry(format).or_default().push(slot.clone());
            }
        }
        self
    }

    /// Strategy used in lenient mode once every planned strategy has failed.
    pub fn last_resort(mut self, strategy: Arc<dyn AcquisitionStrategy>) -> Self {
        self.last_resort = Some(strategy);
        self
    }

    pub fn mode(mut self, mode: FailureMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable or disable single-flight coalescing.
    pub fn coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn aggressive_timeout_factor(mut self, factor: u32) -> Self {
        self.aggressive_timeout_factor = factor.max(1);
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            store: self.store,
            plans: self.plans,
            last_resort: self.last_resort,
            mode: self.mode,
            aggressive_timeout_factor: self.aggressive_timeout_factor,
            flights: self.coalesce.then(SingleFlight::new),
        }
    }
}

/// Runs strategies in order until one produces an artifact.
///
/// Strategies within one acquisition run strictly one after another; the
/// first success wins and nothing is remembered between acquisitions.
pub struct Orchestrator {
    store: Arc<ArtifactStore>,
    plans: HashMap<MediaFormat, Vec<StrategySlot>>,
    last_resort: Option<Arc<dyn AcquisitionStrategy>>,
    mode: FailureMode,
    aggressive_timeout_factor: u32,
    flights: Option<SingleFlight>,
}

impl Orchestrator {
    pub fn builder(store: Arc<ArtifactStore>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(store)
    }

    /// The production plan: direct fetch, then yt-dlp, then the converter
    /// service when one is configured. The placeholder strategy is the last
    /// resort in lenient mode.
    pub fn from_config(
        config: &AcquisitionConfig,
        store: Arc<ArtifactStore>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let mut builder = Self::builder(store)
            .mode(config.mode)
            .coalesce(config.coalesce_requests)
            .aggressive_timeout_factor(config.aggressive_timeout_factor)
            .strategy(StrategySlot::new(
                Arc::new(DirectHttpStrategy::new(
                    client.clone(),
                    config.max_artifact_bytes,
                )),
                config.direct_fetch_timeout,
            ))
            .strategy(
                StrategySlot::new(
                    Arc::new(YtDlpStrategy::new(config.ytdlp_path.clone())),
                    config.ytdlp_timeout,
                )
                .aggressive(),
            );

        if let Some(endpoint) = &config.converter_api_url {
            let converter =
                ConverterApiStrategy::new(client, endpoint, config.max_artifact_bytes)?
                    .with_api_key(config.converter_api_key.clone());
            builder = builder.strategy(StrategySlot::new(
                Arc::new(converter),
                config.converter_timeout,
            ));
        }

        Ok(builder
            .last_resort(Arc::new(PlaceholderStrategy::new()))
            .build())
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn mode(&self) -> FailureMode {
        self.mode
    }

    /// All distinct strategies across plans, in first-seen order.
    pub fn strategies(&self) -> Vec<Arc<dyn AcquisitionStrategy>> {
        let mut seen: Vec<Arc<dyn AcquisitionStrategy>> = Vec::new();
        let slots = [MediaFormat::Audio, MediaFormat::Video]
            .into_iter()
            .filter_map(|f| self.plans.get(&f))
            .flatten();
        for slot in slots {
            if !seen.iter().any(|s| s.name() == slot.name()) {
                seen.push(slot.strategy.clone());
            }
        }
        seen
    }

    /// Names of the strategies that would run for `request`, in order.
    pub fn plan_names(&self, request: &AcquisitionRequest) -> Vec<String> {
        self.plan(request)
            .iter()
            .map(|step| step.strategy.name().to_string())
            .collect()
    }

    fn plan(&self, request: &AcquisitionRequest) -> Vec<PlannedAttempt<'_>> {
        let Some(slots) = self.plans.get(&request.format) else {
            return Vec::new();
        };

        let mut ordered: Vec<&StrategySlot> = slots.iter().collect();
        if request.aggressive {
            // Stable: aggressive strategies first, relative order otherwise kept.
            ordered.sort_by_key(|slot| !slot.aggressive);
        }

        ordered
            .into_iter()
            .map(|slot| PlannedAttempt {
                strategy: slot.strategy.as_ref(),
                timeout: if request.aggressive {
                    slot.timeout.saturating_mul(self.aggressive_timeout_factor)
                } else {
                    slot.timeout
                },
            })
            .collect()
    }

    /// Acquire an artifact for `request` and register it with the store.
    ///
    /// Dropping the returned future cancels the strategy in progress.
    pub async fn acquire(&self, request: &AcquisitionRequest) -> Result<AcquisitionResult> {
        let Some(flights) = &self.flights else {
            return self.acquire_uncoalesced(request).await;
        };

        let key = request.flight_key();
        loop {
            match flights.join(&key) {
                Joined::Leader(leader) => {
                    let result = self.acquire_uncoalesced(request).await;
                    leader.complete(&result);
                    return result;
                }
                Joined::Follower(flight) => {
                    debug!(url = %request.source_url, "Joining in-flight acquisition");
                    match flight.wait().await {
                        Ok(result) => return Ok(result),
                        Err(FlightFailure::Abandoned) => continue,
                        Err(FlightFailure::Failed(outcomes)) => {
                            return Err(Error::TotalAcquisitionFailure { outcomes });
                        }
                        Err(FlightFailure::Error(message)) => return Err(Error::Other(message)),
                    }
                }
            }
        }
    }

    async fn acquire_uncoalesced(&self, request: &AcquisitionRequest) -> Result<AcquisitionResult> {
        let started = Instant::now();
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let plan = self.plan(request);
        let mut outcomes = Vec::with_capacity(plan.len());

        info!(
            url = %request.source_url,
            format = %request.format,
            quality = %request.quality,
            aggressive = request.aggressive,
            strategies = plan.len(),
            "Starting acquisition"
        );

        for step in &plan {
            let name = step.strategy.name();
            if !step.strategy.is_available().await {
                debug!(strategy = name, "Strategy unavailable, skipping");
                outcomes.push(StrategyOutcome::failed(name, "unavailable"));
                continue;
            }

            match self
                .run_attempt(step.strategy, step.timeout, request, &cancel)
                .await
            {
                Ok(result) => {
                    info!(
                        artifact_id = %result.artifact_id,
                        strategy = name,
                        size = result.size_bytes,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Acquisition succeeded"
                    );
                    return Ok(result);
                }
                Err(e) => {
                    warn!(strategy = name, url = %request.source_url, error = %e, "Acquisition strategy failed");
                    outcomes.push(StrategyOutcome::failed(name, e.to_string()));
                }
            }
        }

        warn!(
            url = %request.source_url,
            attempts = outcomes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "All acquisition strategies failed"
        );

        match (self.mode, &self.last_resort) {
            (FailureMode::Lenient, Some(last_resort)) => {
                match self
                    .run_attempt(
                        last_resort.as_ref(),
                        LAST_RESORT_TIMEOUT,
                        request,
                        &cancel,
                    )
                    .await
                {
                    Ok(mut result) => {
                        result.placeholder = true;
                        info!(
                            artifact_id = %result.artifact_id,
                            strategy = last_resort.name(),
                            "Served placeholder artifact"
                        );
                        Ok(result)
                    }
                    Err(e) => {
                        warn!(strategy = last_resort.name(), error = %e, "Last-resort strategy failed");
                        outcomes.push(StrategyOutcome::failed(last_resort.name(), e.to_string()));
                        Err(Error::TotalAcquisitionFailure { outcomes })
                    }
                }
            }
            _ => Err(Error::TotalAcquisitionFailure { outcomes }),
        }
    }

    async fn run_attempt(
        &self,
        strategy: &dyn AcquisitionStrategy,
        timeout: Duration,
        request: &AcquisitionRequest,
        cancel: &CancellationToken,
    ) -> Result<AcquisitionResult> {
        let id = ArtifactId::generate();
        let ctx = StrategyContext {
            cancel: cancel.child_token(),
            target: self.store.staging_target(&id, request.format),
            timeout,
        };
        let mut staged = DiscardStagedOnDrop::new(self.store.clone(), id.clone());

        debug!(
            strategy = strategy.name(),
            artifact_id = %id,
            timeout_secs = timeout.as_secs(),
            "Attempting strategy"
        );

        let output = match tokio::time::timeout(timeout, strategy.attempt(&ctx, request)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                // The attempt future is gone, so it cannot clean up after itself.
                ctx.cancel.cancel();
                if let Err(e) = self.store.discard_staged(&id).await {
                    warn!(artifact_id = %id, error = %e, "Failed to discard staged files");
                }
                staged.disarm();
                return Err(Error::Timeout {
                    secs: timeout.as_secs(),
                });
            }
        };

        let result = self.commit(&id, strategy.name(), output, request).await;
        if result.is_ok() {
            staged.disarm();
        }
        result
    }

    /// Validate a strategy's output and move it into the store.
    async fn commit(
        &self,
        id: &ArtifactId,
        strategy: &str,
        output: StrategyOutput,
        request: &AcquisitionRequest,
    ) -> Result<AcquisitionResult> {
        let size = match tokio::fs::metadata(&output.path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                return Err(Error::strategy(
                    strategy,
                    "reported success but produced no file",
                ));
            }
        };
        if size == 0 {
            let _ = remove_file_if_exists(&output.path).await;
            return Err(Error::strategy(strategy, "produced an empty file"));
        }

        let entry = match self.store.put(id, &output.path).await {
            Ok(entry) => entry,
            Err(e) => {
                let _ = remove_file_if_exists(&output.path).await;
                return Err(e);
            }
        };

        Ok(AcquisitionResult {
            artifact_id: entry.id,
            local_path: entry.path,
            size_bytes: entry.size_bytes,
            strategy_used: strategy.to_string(),
            succeeded: true,
            placeholder: false,
            format: request.format,
            quality: request.quality,
            info: output.info.unwrap_or_default(),
        })
    }
}

/// Discards an attempt's staged files unless disarmed.
///
/// Covers the attempt future being dropped mid-write, when neither the
/// strategy nor the timeout path gets to clean up.
struct DiscardStagedOnDrop {
    store: Arc<ArtifactStore>,
    id: Option<ArtifactId>,
}

impl DiscardStagedOnDrop {
    fn new(store: Arc<ArtifactStore>, id: ArtifactId) -> Self {
        Self {
            store,
            id: Some(id),
        }
    }

    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for DiscardStagedOnDrop {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let Ok(handle) = Handle::try_current() else {
            warn!(artifact_id = %id, "No runtime to discard staged files; leaving them to the sweeper");
            return;
        };

        let store = self.store.clone();
        handle.spawn(async move {
            match store.discard_staged(&id).await {
                Ok(0) => {}
                Ok(removed) => debug!(artifact_id = %id, removed, "Discarded abandoned staged files"),
                Err(e) => warn!(artifact_id = %id, error = %e, "Failed to discard staged files"),
            }
        });
    }
}
