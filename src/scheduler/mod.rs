//! Cycle scheduler: resolves the request list against the current date,
//! runs one meter session, hands the outcome to the publisher and sleeps
//! until the next cycle or a shutdown signal.

use crate::config::Config;
use crate::meter::client::MeterClient;
use crate::meter::structs::{SessionError, SessionOutcome};
use crate::meter::MeterSession;
use crate::mqtt::ReadingPublisher;
use crate::resolver;
use chrono::Local;
use log::{error, info};
use std::time::Duration;
use tokio::sync::watch;

pub struct CycleScheduler<C: MeterClient, P: ReadingPublisher> {
    config: Config,
    client: C,
    publisher: P,
    shutdown: watch::Receiver<bool>,
}

impl<C: MeterClient, P: ReadingPublisher> CycleScheduler<C, P> {
    pub fn new(config: Config, client: C, publisher: P, shutdown: watch::Receiver<bool>) -> Self {
        CycleScheduler {
            config,
            client,
            publisher,
            shutdown,
        }
    }

    /// Runs cycles until a shutdown is signalled, or exactly one cycle in
    /// oneshot mode. The oneshot return value reflects the cycle outcome;
    /// in continuous mode a failed cycle flags the meter offline, the
    /// scheduler keeps going, and a requested shutdown is a clean exit.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let result = loop {
            let outcome: SessionOutcome = self.run_cycle().await;

            match &outcome {
                Ok(cycle) => {
                    info!(
                        "Cycle complete: {} reading(s), {} failed request(s)",
                        cycle.readings.len(),
                        cycle.failures.len()
                    );
                    if let Err(e) = self.publisher.publish_cycle(cycle).await {
                        error!("Failed to publish cycle readings: {e}");
                    }
                    if let Err(e) = self.publisher.set_online(true).await {
                        error!("Failed to publish online state: {e}");
                    }
                }
                Err(e) => {
                    error!("Meter interaction cycle failed: {e}");
                    if let Err(e) = self.publisher.set_online(false).await {
                        error!("Failed to publish online state: {e}");
                    }
                }
            }

            if self.config.general.oneshot {
                info!("Oneshot mode, exiting after single cycle");
                break outcome.map(|_| ());
            }

            let delay = Duration::from_secs(self.config.general.intercycle_delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => {
                    info!("Shutdown requested, stopping cycle scheduler");
                    break Ok(());
                }
            }
        };

        self.publisher.finalize().await;
        result
    }

    async fn run_cycle(&mut self) -> SessionOutcome {
        // Templates are re-evaluated each cycle so a long-running process
        // crosses day and month boundaries correctly
        let reference = Local::now().date_naive();
        let requests = resolver::resolve(
            &self.config.parameters,
            self.config.general.include_default_parameters,
            reference,
        );

        MeterSession::new(&mut self.client, &self.config.meter.password)
            .run(&requests)
            .await
    }
}
