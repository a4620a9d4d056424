use chrono::{DateTime, Utc};
use log::{debug, info, trace};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{
    Connect, ModbusClient, PollerSettings, RegisterCatalog, RegisterDescriptor, Schedule, Sink,
};

/// Polls every register of a catalog at its own frequency over one client.
///
/// The loop always serves the register due earliest, so a slow device delays polls
/// but never makes any register read more often than its frequency allows. Optionally
/// polls are aligned to wall-clock period boundaries, and consecutive reads are held
/// `min_request_interval` apart for devices that cannot take back-to-back requests.
#[derive(Debug)]
pub struct Poller<C>
where
    C: Connect,
{
    client: ModbusClient<C>,
    catalog: RegisterCatalog,
    settings: PollerSettings,
}

impl<C> Poller<C>
where
    C: Connect,
{
    pub fn new(client: ModbusClient<C>, catalog: RegisterCatalog, settings: PollerSettings) -> Poller<C> {
        Poller {
            client,
            catalog,
            settings,
        }
    }

    pub fn client(&self) -> &ModbusClient<C> {
        &self.client
    }

    pub fn catalog(&self) -> &RegisterCatalog {
        &self.catalog
    }

    pub fn into_client(self) -> ModbusClient<C> {
        self.client
    }

    /// Polls until `shutdown` is cancelled, then closes the client.
    ///
    /// Cancellation is honoured while waiting for the next register and while a read
    /// is in flight; an interrupted read produces no result.
    pub async fn run<S>(&mut self, sink: &mut S, shutdown: &CancellationToken)
    where
        S: Sink,
    {
        let mut schedule = Schedule::new(&self.catalog, Instant::now());
        if self.settings.align {
            let wall_clock = Utc::now()
                .signed_duration_since(DateTime::<Utc>::default())
                .to_std()
                .unwrap_or_default();
            schedule = schedule.aligned(wall_clock);
        }

        let planner = self.settings.planner();
        let min_interval = self.settings.min_request_interval;
        let mut last_request: Option<Instant> = None;

        info!(
            "Polling {} register(s) on {}{}",
            schedule.len(),
            self.client.config(),
            if self.settings.coalesce { " with coalesced reads" } else { "" }
        );

        while let Some((index, due)) = schedule.peek() {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(due) => {}
            }

            if let Some(last) = last_request.filter(|_| !min_interval.is_zero()) {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep_until(last + min_interval) => {}
                }
            }

            let started = Instant::now();
            let registers = self.catalog.registers();

            if self.settings.coalesce {
                let indices = schedule.due(started);
                let descriptors: Vec<&RegisterDescriptor> =
                    indices.iter().map(|i| &registers[*i]).collect();

                trace!("{} register(s) due together", descriptors.len());
                let results = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    results = self.client.read_batch(&descriptors, planner) => results,
                };

                last_request = Some(Instant::now());
                for (index, result) in indices.into_iter().zip(results) {
                    schedule.complete(index, started);
                    sink.accept(&result);
                }
            } else {
                let descriptor = &registers[index];

                trace!("Polling `{}`", descriptor.name);
                let result = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    result = self.client.read_holding_register(descriptor) => result,
                };

                last_request = Some(Instant::now());
                schedule.complete(index, started);
                sink.accept(&result);
            }
        }

        debug!("Poll loop stopped");
        self.client.close().await;
    }
}
