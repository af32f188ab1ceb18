use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::ingest::Ingestor;

/// Periodic trigger for ingestion cycles.
///
/// Each tick spawns its own cycle, so a slow cycle may overlap the next one.
/// Stopping cancels future ticks; cycles already running finish on their own.
pub struct Scheduler {
    ingestor: Arc<Ingestor>,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(ingestor: Arc<Ingestor>, interval: Duration) -> Self {
        Self {
            ingestor,
            interval: interval.max(Duration::from_secs(1)),
            handle: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking, with the first cycle fired immediately.
    /// Returns false if the scheduler was already running.
    pub fn start(&self) -> bool {
        let mut handle = self.handle();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        info!(
            "Starting scheduler, refreshing every {} seconds",
            self.interval.as_secs()
        );
        *handle = Some(tokio::spawn(run_schedule(
            self.ingestor.clone(),
            self.interval,
        )));
        true
    }

    /// Returns false if the scheduler was not running.
    pub fn stop(&self) -> bool {
        match self.handle().take() {
            Some(handle) => {
                handle.abort();
                info!("Scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle().as_ref().is_some_and(|h| !h.is_finished())
    }

    fn handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_schedule(ingestor: Arc<Ingestor>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately
        ticker.tick().await;
        info!("Starting scheduled feed refresh");

        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            if let Err(e) = ingestor.run_ingestion_cycle().await {
                error!("Scheduled feed refresh failed: {:#}", e);
            }
        });
    }
}
