//! Fetch execution: the only path from a logical query to the network.
//!
//! Every fetch runs the same gauntlet: fresh-cache check, single-flight
//! join, circuit breaker, rate limiter, bounded worker pool, SLA-bounded
//! network call with classified retries, then a generation-checked cache
//! write. The driving task is detached from the caller's deadline, so a
//! caller giving up early still lets the result land in the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::cache::TieredCache;
use crate::config::{CoreConfig, ProviderConfig};
use crate::connector::Connector;
use crate::domain::{now_ms, NormalizedRecord};
use crate::error::FetchError;
use crate::events::{CoreEvent, EventBus};
use crate::limiter::ProviderLimiter;
use crate::query::FetchKey;
use crate::singleflight::FlightGroup;
use crate::ProviderId;

type FetchOutcome = Result<Arc<Vec<NormalizedRecord>>, FetchError>;

/// Admission gates for one provider.
struct ProviderGate {
    config: ProviderConfig,
    limiter: ProviderLimiter,
    breaker: CircuitBreaker,
}

/// Shared fetch pipeline over all registered providers.
pub struct FetchExecutor {
    connectors: HashMap<ProviderId, Arc<dyn Connector>>,
    gates: HashMap<ProviderId, Arc<ProviderGate>>,
    cache: Arc<TieredCache>,
    flights: FlightGroup<FetchOutcome>,
    /// Global fetch generation, assigned when a drive starts.
    generation: AtomicU64,
    workers: Arc<Semaphore>,
    config: CoreConfig,
    events: EventBus,
}

impl FetchExecutor {
    pub fn new(
        config: CoreConfig,
        connectors: Vec<Arc<dyn Connector>>,
        cache: Arc<TieredCache>,
        events: EventBus,
    ) -> Self {
        let connectors: HashMap<_, _> = connectors.into_iter().map(|c| (c.id(), c)).collect();

        let gates = config
            .providers
            .values()
            .map(|provider| {
                let gate = ProviderGate {
                    config: provider.clone(),
                    limiter: ProviderLimiter::from_config(provider),
                    breaker: CircuitBreaker::new(provider.id, config.breaker, events.clone()),
                };
                (provider.id, Arc::new(gate))
            })
            .collect();

        Self {
            connectors,
            gates,
            cache,
            flights: FlightGroup::new(),
            generation: AtomicU64::new(0),
            workers: Arc::new(Semaphore::new(config.aggregation.worker_pool_size)),
            config,
            events,
        }
    }

    /// Breaker state for one provider, for health reporting.
    pub fn breaker_state(&self, provider: ProviderId) -> Option<crate::breaker::CircuitState> {
        self.gates.get(&provider).map(|gate| gate.breaker.state())
    }

    /// Resolve one fetch key within the caller's deadline.
    ///
    /// Identical concurrent calls collapse onto one network fetch. When the
    /// live path fails or the deadline expires, an expired cache entry is
    /// served as a last resort with a [`CoreEvent::StaleServed`] event.
    pub async fn fetch(
        self: &Arc<Self>,
        key: &FetchKey,
        deadline: Instant,
    ) -> Result<Arc<Vec<NormalizedRecord>>, FetchError> {
        let signature = key.signature();

        if let Some(entry) = self.cache.lookup_fresh(&signature, now_ms()) {
            return Ok(entry.records);
        }

        let flight = self.flights.join(&signature);
        if flight.is_leader() {
            let executor = Arc::clone(self);
            let key = key.clone();
            let flight_key = signature.clone();
            // Detached on purpose: the drive keeps going past the caller's
            // deadline so late results still refresh the cache.
            tokio::spawn(async move {
                let outcome = executor.drive(&key).await;
                executor.flights.complete(&flight_key, outcome);
            });
        }

        let mut receiver = flight.into_receiver();
        let now = Instant::now();
        let outcome = if deadline <= now {
            None
        } else {
            match tokio::time::timeout(deadline - now, receiver.recv()).await {
                Ok(Ok(outcome)) => Some(outcome),
                // Lagged or closed channel: treat like a miss.
                Ok(Err(_)) | Err(_) => None,
            }
        };

        match outcome {
            Some(Ok(records)) => Ok(records),
            Some(Err(error)) => self.stale_fallback(key, &signature, error),
            None => self.stale_fallback(key, &signature, FetchError::DeadlineExceeded(key.provider)),
        }
    }

    fn stale_fallback(
        &self,
        key: &FetchKey,
        signature: &str,
        error: FetchError,
    ) -> Result<Arc<Vec<NormalizedRecord>>, FetchError> {
        match self.cache.lookup_any(signature) {
            Some(entry) => {
                debug!(%key, %error, "serving stale cache entry after live failure");
                self.events.publish(CoreEvent::StaleServed {
                    provider: key.provider,
                    key: signature.to_owned(),
                });
                Ok(entry.records)
            }
            None => Err(error),
        }
    }

    /// Perform the real fetch: gates, retries, cache write.
    async fn drive(&self, key: &FetchKey) -> FetchOutcome {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let gate = self
            .gates
            .get(&key.provider)
            .ok_or(FetchError::CircuitOpen(key.provider))?;
        let connector = self
            .connectors
            .get(&key.provider)
            .ok_or(FetchError::CircuitOpen(key.provider))?;

        let budget_deadline = Instant::now() + gate.config.total_budget;

        let _permit = {
            let now = Instant::now();
            if budget_deadline <= now {
                return Err(FetchError::DeadlineExceeded(key.provider));
            }
            match tokio::time::timeout(
                budget_deadline - now,
                Arc::clone(&self.workers).acquire_owned(),
            )
            .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) | Err(_) => return Err(FetchError::DeadlineExceeded(key.provider)),
            }
        };

        let mut attempt: u32 = 0;
        loop {
            if !gate.breaker.allow_request() {
                return Err(FetchError::CircuitOpen(key.provider));
            }

            if let Err(error) = gate.limiter.acquire(budget_deadline).await {
                // The admitted request never went out; a held half-open
                // probe slot must be released or the breaker wedges.
                gate.breaker.abandon_probe();
                return Err(error);
            }

            let error = match self.attempt_fetch(connector.as_ref(), gate, key).await {
                Ok(records) => {
                    gate.breaker.record_success();
                    let records = Arc::new(records);
                    let ttl = key.data_class().ttl(&self.config.cache);
                    let applied = self.cache.store(
                        &key.signature(),
                        Arc::clone(&records),
                        ttl,
                        generation,
                        now_ms(),
                    );
                    if !applied {
                        debug!(%key, generation, "discarded fetch result behind a newer generation");
                    }
                    return Ok(records);
                }
                Err(error) => error,
            };

            if error.counts_as_provider_failure() {
                gate.breaker.record_failure();
            }
            if let FetchError::RateLimited { retry_after, .. } = &error {
                gate.limiter.record_throttle(*retry_after);
            }

            if !error.is_transient() || attempt >= self.config.retry.max_retries {
                warn!(%key, %error, attempt, "fetch failed");
                return Err(error);
            }

            let delay = self.config.retry.delay_for_attempt(attempt);
            if Instant::now() + delay >= budget_deadline {
                // Not enough budget left for another attempt.
                return Err(FetchError::DeadlineExceeded(key.provider));
            }
            debug!(%key, %error, attempt, ?delay, "retrying after transient failure");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt_fetch(
        &self,
        connector: &dyn Connector,
        gate: &ProviderGate,
        key: &FetchKey,
    ) -> Result<Vec<NormalizedRecord>, FetchError> {
        let sla = gate.config.sla_timeout;
        match tokio::time::timeout(sla, connector.fetch(&key.query)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                provider: key.provider,
                elapsed: sla,
            }),
        }
    }
}
