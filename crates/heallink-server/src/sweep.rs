//! Orphan reclamation: delete remote objects that no record references once
//! they are older than the grace period.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use cron::Schedule;
use heallink_core::attachment::in_folder;
use heallink_core::sweep::SweepReport;
use heallink_db::Database;
use heallink_store::{AssetHost, RemoteAsset};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::attachments::destroy_all;

/// Daily at 02:00 local time.
pub const DEFAULT_SCHEDULE: &str = "0 0 2 * * * *";

/// How long a pass may hold the database lease before another process may
/// take it over.
const LEASE_TTL_MINUTES: i64 = 60;

pub struct OrphanSweeper {
    db: Arc<dyn Database>,
    host: Arc<dyn AssetHost>,
    folder: String,
    grace: chrono::Duration,
    holder: String,
    running: Mutex<()>,
}

impl OrphanSweeper {
    pub fn new(
        db: Arc<dyn Database>,
        host: Arc<dyn AssetHost>,
        folder: &str,
        grace: chrono::Duration,
    ) -> Self {
        Self {
            db,
            host,
            folder: folder.to_string(),
            grace,
            holder: uuid::Uuid::new_v4().to_string(),
            running: Mutex::new(()),
        }
    }

    pub async fn run(&self) -> SweepReport {
        self.run_at(Utc::now()).await
    }

    /// One pass, treating `now` as the current time. Skips with a failure
    /// report when another pass holds the lock or the lease.
    pub async fn run_at(&self, now: DateTime<Utc>) -> SweepReport {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("sweep already running in this process, skipping");
            return SweepReport::failure("sweep already running");
        };

        let ttl = chrono::Duration::minutes(LEASE_TTL_MINUTES);
        match self.db.try_acquire_sweep_lease(&self.holder, ttl).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("sweep lease held by another instance, skipping");
                return SweepReport::failure("sweep already running");
            }
            Err(e) => {
                error!("failed to acquire sweep lease: {e}");
                return SweepReport::failure(format!("sweep lease: {e}"));
            }
        }

        let report = self.sweep(now).await;

        if let Err(e) = self.db.release_sweep_lease(&self.holder).await {
            error!("failed to release sweep lease: {e}");
        }
        report
    }

    async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        info!(folder = %self.folder, "starting orphan sweep");

        let listed = match self.host.list_all(&self.folder).await {
            Ok(assets) => assets,
            Err(e) => {
                error!("orphan sweep listing failed: {e}");
                return SweepReport::failure(e.to_string());
            }
        };
        info!("Found {} objects at the asset host", listed.len());

        let referenced = match self.db.list_referenced_remote_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("orphan sweep reference scan failed: {e}");
                return SweepReport::failure(e.to_string());
            }
        };
        info!("Found {} attachment references in database", referenced.len());

        let Some(cutoff) = now.checked_sub_signed(self.grace) else {
            warn!("grace period reaches before the earliest timestamp, nothing is old enough");
            return SweepReport {
                success: true,
                listed: listed.len(),
                referenced: referenced.len(),
                ..SweepReport::default()
            };
        };
        let orphans = find_orphans(&self.folder, &listed, &referenced, cutoff);
        let outcome = destroy_all(&*self.host, &orphans).await;

        let report = SweepReport {
            success: true,
            listed: listed.len(),
            referenced: referenced.len(),
            orphaned: orphans.len(),
            deleted: outcome.deleted,
            failed: outcome.failed,
            error: None,
        };
        info!(
            listed = report.listed,
            referenced = report.referenced,
            orphaned = report.orphaned,
            deleted = report.deleted,
            failed = report.failed,
            "orphan sweep complete"
        );
        report
    }
}

/// Unreferenced objects inside `folder` created strictly before `cutoff`.
/// Host listings match prefixes by string, so siblings such as
/// `heallink/records-old` can show up and are skipped here.
fn find_orphans(
    folder: &str,
    listed: &[RemoteAsset],
    referenced: &HashSet<String>,
    cutoff: DateTime<Utc>,
) -> Vec<String> {
    listed
        .iter()
        .filter(|asset| in_folder(folder, &asset.remote_id))
        .filter(|asset| !referenced.contains(&asset.remote_id) && asset.created_at < cutoff)
        .map(|asset| asset.remote_id.clone())
        .collect()
}

pub fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    Schedule::from_str(expr)
}

/// Run a pass at every tick of `schedule`, in local time, forever.
pub async fn run_scheduled(sweeper: Arc<OrphanSweeper>, schedule: Schedule) {
    loop {
        let Some(next) = schedule.upcoming(Local).next() else {
            warn!("sweep schedule has no upcoming run, stopping");
            return;
        };
        let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
        info!("next orphan sweep at {next}");
        tokio::time::sleep(wait).await;

        let report = sweeper.run().await;
        if !report.success {
            error!(
                "scheduled sweep failed: {}",
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::tests::{rid, seed_record, RecordingHost, FOLDER};
    use heallink_db::SqliteDatabase;

    fn asset(name: &str, created_at: DateTime<Utc>) -> RemoteAsset {
        RemoteAsset {
            remote_id: rid(name),
            created_at,
        }
    }

    fn hours(h: i64) -> chrono::Duration {
        chrono::Duration::hours(h)
    }

    fn sweeper(db: Arc<dyn Database>, host: Arc<RecordingHost>) -> OrphanSweeper {
        OrphanSweeper::new(db, host, FOLDER, hours(48))
    }

    fn memory_db() -> Arc<dyn Database> {
        Arc::new(SqliteDatabase::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn deletes_only_old_unreferenced_objects() {
        let now = Utc::now();
        let db = memory_db();
        seed_record(&*db, "acct", &[rid("A")]).await;
        let host = Arc::new(RecordingHost::with_assets(vec![
            asset("A", now - hours(72)),
            asset("B", now - hours(72)),
            asset("C", now - hours(1)),
        ]));

        let report = sweeper(db, host.clone()).run_at(now).await;
        assert_eq!(
            report,
            SweepReport {
                success: true,
                listed: 3,
                referenced: 1,
                orphaned: 1,
                deleted: 1,
                failed: 0,
                error: None,
            }
        );
        assert_eq!(host.destroyed(), vec![rid("B")]);
    }

    #[tokio::test]
    async fn grace_boundary_is_strict() {
        let now = Utc::now();
        let host = Arc::new(RecordingHost::with_assets(vec![
            asset("exact", now - hours(48)),
            asset("older", now - hours(48) - chrono::Duration::seconds(1)),
        ]));

        let report = sweeper(memory_db(), host.clone()).run_at(now).await;
        assert_eq!(report.orphaned, 1);
        assert_eq!(host.destroyed(), vec![rid("older")]);
    }

    #[tokio::test]
    async fn huge_grace_period_deletes_nothing() {
        let now = Utc::now();
        let host = Arc::new(RecordingHost::with_assets(vec![asset("B", now - hours(72))]));
        let grace = chrono::Duration::milliseconds(i64::MAX);
        let sweeper = OrphanSweeper::new(memory_db(), host.clone(), FOLDER, grace);

        let report = sweeper.run_at(now).await;
        assert!(report.success);
        assert_eq!((report.listed, report.orphaned), (1, 0));
        assert!(host.destroyed().is_empty());
    }

    #[tokio::test]
    async fn skips_objects_outside_the_folder() {
        let now = Utc::now();
        let old = now - hours(72);
        let host = Arc::new(RecordingHost::with_assets(vec![
            asset("B", old),
            RemoteAsset {
                remote_id: "heallink/records-old/B".into(),
                created_at: old,
            },
            RemoteAsset {
                remote_id: "other-app/B".into(),
                created_at: old,
            },
        ]));

        let report = sweeper(memory_db(), host.clone()).run_at(now).await;
        assert_eq!((report.listed, report.orphaned, report.deleted), (3, 1, 1));
        assert_eq!(host.destroyed(), vec![rid("B")]);
    }

    #[tokio::test]
    async fn follows_every_listing_page() {
        let now = Utc::now();
        let assets = (0..7)
            .map(|i| asset(&format!("old-{i}"), now - hours(100)))
            .collect();
        let host = Arc::new(RecordingHost {
            page_size: Some(3),
            ..RecordingHost::with_assets(assets)
        });

        let report = sweeper(memory_db(), host.clone()).run_at(now).await;
        assert_eq!(report.listed, 7);
        assert_eq!(report.deleted, 7);
    }

    #[tokio::test]
    async fn listing_failure_fails_the_run_and_deletes_nothing() {
        let now = Utc::now();
        let host = Arc::new(RecordingHost {
            list_error: Some("rate limited".into()),
            ..RecordingHost::with_assets(vec![asset("B", now - hours(72))])
        });

        let report = sweeper(memory_db(), host.clone()).run_at(now).await;
        assert!(!report.success);
        assert!(report.error.unwrap().contains("rate limited"));
        assert!(host.destroyed().is_empty());
    }

    #[tokio::test]
    async fn delete_failures_are_counted_not_fatal() {
        let now = Utc::now();
        let host = RecordingHost::failing_on(&["B"]);
        *host.assets.lock().unwrap() = vec![asset("B", now - hours(72)), asset("D", now - hours(72))];

        let report = sweeper(memory_db(), Arc::new(host)).run_at(now).await;
        assert!(report.success);
        assert_eq!((report.orphaned, report.deleted, report.failed), (2, 1, 1));
    }

    #[tokio::test]
    async fn skips_while_another_instance_holds_the_lease() {
        let now = Utc::now();
        let db = memory_db();
        let host = Arc::new(RecordingHost::with_assets(vec![asset("B", now - hours(72))]));
        assert!(db
            .try_acquire_sweep_lease("other-process", hours(1))
            .await
            .unwrap());

        let report = sweeper(db.clone(), host.clone()).run_at(now).await;
        assert!(!report.success);
        assert!(host.destroyed().is_empty());

        db.release_sweep_lease("other-process").await.unwrap();
        let report = sweeper(db, host.clone()).run_at(now).await;
        assert!(report.success);
        assert_eq!(host.destroyed(), vec![rid("B")]);
    }

    #[tokio::test]
    async fn skips_while_running_in_process() {
        let now = Utc::now();
        let host = Arc::new(RecordingHost::with_assets(vec![asset("B", now - hours(72))]));
        let sweeper = sweeper(memory_db(), host.clone());

        let _held = sweeper.running.lock().await;
        let report = sweeper.run_at(now).await;
        assert!(!report.success);
        assert!(host.destroyed().is_empty());
    }

    #[tokio::test]
    async fn lease_is_released_after_a_pass() {
        let db = memory_db();
        let host = Arc::new(RecordingHost::default());
        sweeper(db.clone(), host).run().await;
        assert!(db
            .try_acquire_sweep_lease("someone-else", hours(1))
            .await
            .unwrap());
    }

    #[test]
    fn default_schedule_parses() {
        let schedule = parse_schedule(DEFAULT_SCHEDULE).unwrap();
        let next = schedule.upcoming(Local).next().unwrap();
        assert_eq!(next.format("%H:%M:%S").to_string(), "02:00:00");
    }
}
