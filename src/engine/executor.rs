use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{Config, VerifyKind};
use crate::error::{AppError, ConfigError};
use crate::protocol::client_factory;
use crate::shutdown::Shutdown;
use crate::stats::{Collector, RealtimeServer, Report};
use crate::verify;

use super::breaker::Circuit;
use super::middleware::{
    breaker_middleware, retry_middleware, verify_middleware, MiddlewareChain, SharedHandler,
    TransportHandler,
};
use super::pool::ClientPool;
use super::scheduler::Scheduler;
use super::selector::ApiSelector;

/// Assembles the engine from a finalized config and runs it.
pub struct Executor {
    config: Arc<Config>,
    collector: Arc<Collector>,
    pool: Arc<ClientPool>,
    scheduler: Scheduler,
    realtime: Arc<RealtimeServer>,
}

impl Executor {
    /// Assembly order: collector → client factory → pool → middleware chain
    /// over a probe client → selector → scheduler.
    ///
    /// # Errors
    ///
    /// Probe-client failure and unknown protocols are fatal startup errors;
    /// bad selectors, extractors and verifier names are config errors.
    pub fn new(config: Config) -> Result<Self, AppError> {
        validate_custom_verifiers(&config)?;

        let config = Arc::new(config);
        let collector = Arc::new(Collector::new());

        let factory = client_factory(Arc::clone(&config));
        let pool_size = usize::try_from(config.concurrency).unwrap_or(usize::MAX);
        let pool = Arc::new(ClientPool::new(Arc::clone(&factory), pool_size));

        // The probe client only seeds the chain; workers use pooled ones.
        let probe = factory()?;
        let handler = build_chain(&config, probe)?;

        let selector = Arc::new(ApiSelector::from_config(&config)?);

        let ramp_up = match &config.advanced.ramp_up {
            Some(value) => value.to_duration()?,
            None => Duration::ZERO,
        };

        let scheduler = Scheduler::new(
            config.concurrency,
            config.requests,
            ramp_up,
            Arc::clone(&pool),
            handler,
            Arc::clone(&collector),
            selector,
        );

        let realtime = Arc::new(RealtimeServer::new(
            Arc::clone(&collector),
            config.advanced.realtime_port,
        ));

        Ok(Executor {
            config,
            collector,
            pool,
            scheduler,
            realtime,
        })
    }

    #[must_use]
    pub fn collector(&self) -> Arc<Collector> {
        Arc::clone(&self.collector)
    }

    #[must_use]
    pub fn realtime(&self) -> Arc<RealtimeServer> {
        Arc::clone(&self.realtime)
    }

    /// Runs the load: banner, realtime server (bind failure is a warning),
    /// optional duration timer, scheduler, completion mark, pool teardown,
    /// final report.
    ///
    /// # Errors
    ///
    /// Returns the first fatal worker error; request-level failures end up
    /// in the report instead.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<Report, AppError> {
        self.print_banner();

        match self.realtime.start().await {
            Ok(_) => {}
            Err(err) => warn!("realtime server disabled: {}", err),
        }

        if let Some(duration) = &self.config.duration {
            let limit = duration.to_duration()?;
            let timer_shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = timer_shutdown.triggered() => {}
                    () = tokio::time::sleep(limit) => {
                        info!("duration elapsed, stopping workers");
                        timer_shutdown.trigger();
                    }
                }
            });
        }

        let started = Instant::now();
        let run_result = self.scheduler.run(shutdown).await;
        let total_time = started.elapsed();

        self.realtime.mark_completed();
        self.pool.close().await;

        run_result?;
        Ok(self.collector.generate_report(total_time))
    }

    /// Stops the realtime surface; call once artifacts are written.
    pub fn stop_realtime(&self) {
        self.realtime.stop();
    }

    fn print_banner(&self) {
        info!("starting load test");
        info!("  protocol     {}", self.config.protocol);
        info!("  concurrency  {}", self.config.concurrency);
        if self.config.requests > 0 {
            info!("  requests     {} per worker", self.config.requests);
        }
        if let Some(duration) = &self.config.duration {
            if let Ok(limit) = duration.to_duration() {
                info!("  duration     {:?}", limit);
            }
        }
        if let Ok(timeout) = self.config.timeout.to_duration() {
            info!("  timeout      {:?}", timeout);
        }
        if let Some(ramp_up) = &self.config.advanced.ramp_up {
            if let Ok(ramp) = ramp_up.to_duration() {
                info!("  ramp-up      {:?}", ramp);
            }
        }
        if !self.config.apis.is_empty() {
            info!("  endpoints    {}", self.config.apis.len());
        }
    }
}

/// Declared order breaker → retry → verify becomes the runtime call order;
/// the terminal stage adapts the probe client's `send`.
fn build_chain(
    config: &Config,
    probe: crate::protocol::SharedClient,
) -> Result<SharedHandler, AppError> {
    let mut chain = MiddlewareChain::new();

    if config.advanced.enable_breaker {
        let circuit = Arc::new(Circuit::new(
            config.advanced.max_failures,
            config.advanced.reset_timeout.to_duration()?,
        ));
        chain = chain.with(breaker_middleware(circuit));
    }

    if config.advanced.enable_retry {
        chain = chain.with(retry_middleware(
            config.advanced.max_retries,
            config.advanced.retry_interval.to_duration()?,
        ));
    }

    // In multi-endpoint mode the loader has already folded the global verify
    // rule into each API, where the worker applies it; installing it here
    // too would double-record every assertion.
    if config.apis.is_empty() {
        if let Some(rule) = &config.verify {
            chain = chain.with(verify_middleware(rule.clone()));
        }
    }

    Ok(chain.build(Arc::new(TransportHandler::new(probe))))
}

fn validate_custom_verifiers(config: &Config) -> Result<(), ConfigError> {
    let rules = config.apis.iter().flat_map(|api| {
        api.verify
            .iter()
            .map(move |rule| (api.name.as_str(), rule))
    });
    let global = config
        .verify
        .iter()
        .map(|rule| ("default", rule));

    for (api, rule) in rules.chain(global) {
        if rule.kind == VerifyKind::Custom {
            let name = rule.custom.clone().unwrap_or_default();
            if verify::lookup_custom(&name).is_none() {
                return Err(ConfigError::UnknownCustomVerifier {
                    api: api.to_owned(),
                    name,
                });
            }
        }
    }
    Ok(())
}
