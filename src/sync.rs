use serde::Deserialize;
use time::OffsetDateTime;

use std::sync::Arc;

use crate::fetch::{ApiClient, FetchError};
use crate::notify::Presenter;
use crate::ports::{HttpClient, Notifier, Reporter, TimeProvider};
use crate::schedule::{ScheduleEntry, ScheduleStore, entry_id};
use crate::store::{BucketStore, StoreError};

/// One row of the authoritative schedule list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSchedule {
    pub participant_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub schedule_time: OffsetDateTime,
    #[serde(default)]
    pub bus_time: String,
}

#[derive(Debug, PartialEq)]
pub enum SyncOutcome {
    /// Background sync without a resolvable token is not a failure.
    SkippedNoToken,
    Completed { entries: usize, pruned: usize },
}

#[derive(Debug)]
pub enum SyncError {
    Fetch(FetchError),
    Storage(StoreError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Fetch(err) => write!(f, "schedule fetch failed: {err}"),
            SyncError::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Storage(err)
    }
}

/// Reconciles the server's schedule list with the local entries and
/// fires due reminders on a fixed polling cadence.
#[derive(Clone)]
pub struct Synchronizer<S, C, T, N> {
    schedules: ScheduleStore<S>,
    api: ApiClient<C>,
    presenter: Presenter<C, N>,
    time: T,
    reporter: Arc<dyn Reporter>,
    notifications_allowed: bool,
    poll_interval: std::time::Duration,
}

impl<S, C, T, N> Synchronizer<S, C, T, N>
where
    S: BucketStore,
    C: HttpClient,
    T: TimeProvider,
    N: Notifier,
{
    pub fn new(
        schedules: ScheduleStore<S>,
        api: ApiClient<C>,
        presenter: Presenter<C, N>,
        time: T,
        reporter: Arc<dyn Reporter>,
        notifications_allowed: bool,
        poll_interval: std::time::Duration,
    ) -> Self {
        Self {
            schedules,
            api,
            presenter,
            time,
            reporter,
            notifications_allowed,
            poll_interval,
        }
    }

    /// Fetches the authoritative list, withdraws notifications for
    /// entries still pending, upserts one entry per server schedule and
    /// prunes entries the server no longer knows. Running it twice over
    /// unchanged data leaves exactly one entry per id. An id that
    /// already fired keeps `processed = true` and never fires again.
    pub async fn sync(&self) -> Result<SyncOutcome, SyncError> {
        let server_list: Vec<ServerSchedule> = match self
            .api
            .get_json("/api/notifications/schedules")
            .await
        {
            Ok(list) => list,
            Err(FetchError::Unauthenticated) => return Ok(SyncOutcome::SkippedNoToken),
            Err(err) => return Err(SyncError::Fetch(err)),
        };

        let existing = self.schedules.get_all()?;
        for entry in existing.iter().filter(|entry| !entry.processed) {
            self.presenter.withdraw(&entry.id).await;
        }

        let mut server_ids = Vec::with_capacity(server_list.len());
        for schedule in &server_list {
            let id = entry_id(schedule.participant_id, schedule.schedule_time);
            let processed = existing
                .iter()
                .find(|entry| entry.id == id)
                .map(|entry| entry.processed)
                .unwrap_or(false);
            self.schedules.put(&ScheduleEntry {
                id: id.clone(),
                participant_id: schedule.participant_id,
                schedule_time: schedule.schedule_time,
                trigger_label: schedule.bus_time.clone(),
                processed,
            })?;
            server_ids.push(id);
        }

        let mut pruned = 0;
        for entry in &existing {
            if !server_ids.contains(&entry.id) {
                self.schedules.delete(&entry.id)?;
                pruned += 1;
            }
        }

        Ok(SyncOutcome::Completed {
            entries: server_ids.len(),
            pruned,
        })
    }

    /// One polling pass: presents every unprocessed entry whose trigger
    /// time has passed and flips it to processed. A presentation
    /// failure is reported and retried on the next pass; the flag only
    /// flips after the notification was actually shown. No-op until
    /// notification permission has been granted.
    pub async fn tick(&self) -> Result<usize, SyncError> {
        if !self.notifications_allowed {
            return Ok(0);
        }
        let now = self.time.now();
        let mut fired = 0;
        for mut entry in self.schedules.get_all()? {
            if entry.processed || entry.schedule_time > now {
                continue;
            }
            match self.presenter.present_reminder(&entry, now).await {
                Ok(()) => {
                    entry.processed = true;
                    self.schedules.put(&entry)?;
                    fired += 1;
                }
                Err(err) => self.reporter.report("reminder-present", &err),
            }
        }
        Ok(fired)
    }

    /// The fixed-interval polling loop. Tick failures are reported and
    /// must never end the loop.
    pub async fn run(&self) {
        loop {
            self.time.sleep(self.poll_interval).await;
            if let Err(err) = self.tick().await {
                self.reporter.report("schedule-poll", &err);
            }
        }
    }
}
