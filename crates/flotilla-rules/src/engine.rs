//! Rule persistence, scheduling, and dispatch.

use std::collections::{BinaryHeap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use flotilla_core::Instance;
use flotilla_data::{ActivityWriter, Database, NewActivity, RuleRowPatch};
use flotilla_qbit::BulkVerb;
use flotilla_sync::SyncService;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{RuleError, RuleResult};
use crate::freespace::FreeSpaceSource;
use crate::model::{DeleteMode, Rule, RulePayload};
use crate::planner::{PlannedAction, PlannedItem, RulePlan, plan_rule, reconcile};
use crate::program::launch;
use crate::validate::validate_payload;

/// Engine tuning supplied by process config.
#[derive(Debug, Clone)]
pub struct RuleEngineConfig {
    /// Worker tasks draining due instance ticks.
    pub workers: usize,
    /// Interval for rules that do not set one.
    pub default_interval_secs: i64,
    /// Absolute paths external programs may live under.
    pub program_allow_list: Vec<PathBuf>,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            default_interval_secs: 900,
            program_allow_list: Vec::new(),
        }
    }
}

/// Outcome of one manual or scheduled evaluation run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Groups the run's activity records.
    pub run_id: String,
    /// Rules evaluated.
    pub rules_evaluated: usize,
    /// Actions planned across all rules after reconciliation.
    pub actions_planned: usize,
    /// Actions dispatched upstream (zero for dry runs).
    pub actions_dispatched: usize,
    /// Batches that failed to dispatch.
    pub errors: usize,
}

/// The automation engine: owns rule CRUD, the per-instance scheduler, and
/// action dispatch.
pub struct RuleEngine {
    sync: Arc<SyncService>,
    db: Database,
    activity: ActivityWriter,
    config: RuleEngineConfig,
    instance_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    last_runs: Mutex<HashMap<i64, Instant>>,
}

impl RuleEngine {
    /// Build the engine. Must be called inside a Tokio runtime (the
    /// activity writer spawns its flush task).
    #[must_use]
    pub fn new(sync: Arc<SyncService>, db: Database, config: RuleEngineConfig) -> Self {
        let activity = db.activity().writer();
        Self {
            sync,
            db,
            activity,
            config,
            instance_locks: Mutex::new(HashMap::new()),
            last_runs: Mutex::new(HashMap::new()),
        }
    }

    /// Validate and persist a new rule.
    ///
    /// # Errors
    ///
    /// Returns a validation or store failure; nothing is persisted on
    /// validation failure.
    pub async fn create_rule(&self, instance_id: i64, payload: RulePayload) -> RuleResult<Rule> {
        let instance = self.db.instances().get(instance_id).await?;
        validate_payload(&payload, &instance)?;
        let row = Rule::row_from_payload(instance_id, &payload, self.config.default_interval_secs)?;
        let stored = self.db.rules().create(row).await?;
        info!(rule_id = stored.id, instance_id, "rule created");
        Rule::from_row(stored)
    }

    /// Validate and replace an existing rule.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids and validation failures
    /// otherwise.
    pub async fn update_rule(&self, rule_id: i64, payload: RulePayload) -> RuleResult<Rule> {
        let existing = self.get_rule(rule_id).await?;
        let instance = self.db.instances().get(existing.instance_id).await?;
        validate_payload(&payload, &instance)?;
        let row =
            Rule::row_from_payload(existing.instance_id, &payload, self.config.default_interval_secs)?;
        let patch = RuleRowPatch {
            name: Some(row.name),
            enabled: Some(row.enabled),
            dry_run: Some(row.dry_run),
            sort_order: Some(row.sort_order),
            tracker_scope: Some(row.tracker_scope),
            interval_seconds: Some(row.interval_seconds),
            conditions: Some(row.conditions),
            free_space_source: Some(row.free_space_source),
        };
        let stored = self.db.rules().update(rule_id, patch).await?;
        Rule::from_row(stored)
    }

    /// Delete a rule.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub async fn delete_rule(&self, rule_id: i64) -> RuleResult<()> {
        self.db.rules().delete(rule_id).await?;
        self.last_runs.lock().await.remove(&rule_id);
        Ok(())
    }

    /// Fetch one rule.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub async fn get_rule(&self, rule_id: i64) -> RuleResult<Rule> {
        match self.db.rules().get(rule_id).await {
            Ok(row) => Rule::from_row(row),
            Err(flotilla_data::StoreError::NotFound { .. }) => {
                Err(RuleError::NotFound { id: rule_id })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// List an instance's rules in evaluation order.
    ///
    /// # Errors
    ///
    /// Returns a store failure.
    pub async fn list_rules(&self, instance_id: i64) -> RuleResult<Vec<Rule>> {
        let rows = self.db.rules().list_for_instance(instance_id).await?;
        rows.into_iter().map(Rule::from_row).collect()
    }

    /// Evaluate an unsaved payload without dispatching, returning the
    /// paginated plan.
    ///
    /// # Errors
    ///
    /// Returns validation failures and snapshot read errors.
    pub async fn preview(
        &self,
        instance_id: i64,
        payload: RulePayload,
        offset: usize,
        limit: usize,
    ) -> RuleResult<(Vec<PlannedItem>, usize)> {
        let instance = self.db.instances().get(instance_id).await?;
        validate_payload(&payload, &instance)?;
        let rule = Rule {
            id: 0,
            instance_id,
            name: payload.name.clone(),
            enabled: true,
            dry_run: true,
            sort_order: payload.sort_order,
            tracker_scope: crate::model::TrackerScope::parse(&payload.tracker_scope),
            interval_seconds: payload
                .interval_seconds
                .unwrap_or(self.config.default_interval_secs),
            conditions: payload.conditions,
            free_space_source: payload.free_space_source,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let read = self.sync.read(instance_id).await?;
        let free_space = self.free_space_for(&rule, read.snapshot.free_space_on_disk);
        let plan = plan_rule(
            &rule,
            &read.snapshot,
            free_space,
            Utc::now().timestamp(),
            instance.has_local_filesystem_access,
        )?;
        let total = plan.items.len();
        let page = plan
            .items
            .into_iter()
            .skip(offset)
            .take(limit.max(1))
            .collect();
        Ok((page, total))
    }

    /// Manually run one rule now, sharing the scheduled pipeline. Dry-run
    /// rules log planned actions without dispatching.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown rules and snapshot read failures.
    pub async fn apply_once(&self, rule_id: i64, force_dry_run: bool) -> RuleResult<RunSummary> {
        let rule = self.get_rule(rule_id).await?;
        let instance = self.db.instances().get(rule.instance_id).await?;
        let lock = self.instance_lock(rule.instance_id).await;
        let _guard = lock.lock().await;
        self.evaluate(&instance, vec![rule], force_dry_run).await
    }

    /// Manually run every enabled rule for an instance.
    ///
    /// # Errors
    ///
    /// Returns snapshot read failures.
    pub async fn apply_instance(&self, instance_id: i64) -> RuleResult<RunSummary> {
        let instance = self.db.instances().get(instance_id).await?;
        let rules: Vec<Rule> = self
            .list_rules(instance_id)
            .await?
            .into_iter()
            .filter(|rule| rule.enabled)
            .collect();
        let lock = self.instance_lock(instance_id).await;
        let _guard = lock.lock().await;
        self.evaluate(&instance, rules, false).await
    }

    /// Run the scheduler until `shutdown` flips. Due instances are drained
    /// by a bounded worker pool; ticks for one instance serialize on its
    /// lock while different instances proceed in parallel.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        info!(workers = self.config.workers, "rule scheduler started");
        loop {
            let wait = match self.next_wakeup().await {
                Ok((due_instances, wait)) => {
                    for instance_id in due_instances {
                        let engine = Arc::clone(&self);
                        let semaphore = Arc::clone(&semaphore);
                        tokio::spawn(async move {
                            let Ok(_permit) = semaphore.acquire().await else {
                                return;
                            };
                            engine.tick_instance(instance_id).await;
                        });
                    }
                    wait
                }
                Err(err) => {
                    warn!(error = %err, "scheduler failed to load rules");
                    Duration::from_secs(30)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    info!("rule scheduler stopping");
                    return;
                }
            }
        }
    }

    /// Compute instances due now and the sleep until the next fire, from
    /// a min-heap of per-instance next-fire times.
    async fn next_wakeup(&self) -> RuleResult<(Vec<i64>, Duration)> {
        use std::cmp::Reverse;

        let rows = self.db.rules().list_all().await?;
        let now = Instant::now();
        let last_runs = self.last_runs.lock().await;

        let mut next_fire: HashMap<i64, Instant> = HashMap::new();
        for row in rows {
            if !row.enabled {
                continue;
            }
            let interval = Duration::from_secs(
                u64::try_from(row.interval_seconds.max(60)).unwrap_or(900),
            );
            let fire = last_runs
                .get(&row.id)
                .map_or(now, |last| *last + interval);
            next_fire
                .entry(row.instance_id)
                .and_modify(|existing| *existing = (*existing).min(fire))
                .or_insert(fire);
        }
        drop(last_runs);

        let mut heap: BinaryHeap<Reverse<(Instant, i64)>> = next_fire
            .into_iter()
            .map(|(instance_id, fire)| Reverse((fire, instance_id)))
            .collect();

        let mut due = Vec::new();
        let mut wait = Duration::from_secs(30);
        while let Some(Reverse((fire, instance_id))) = heap.pop() {
            if fire <= now {
                due.push(instance_id);
            } else {
                wait = wait.min(fire - now);
                break;
            }
        }
        Ok((due, wait))
    }

    async fn tick_instance(self: &Arc<Self>, instance_id: i64) {
        let lock = self.instance_lock(instance_id).await;
        let _guard = lock.lock().await;

        let instance = match self.db.instances().find(instance_id).await {
            Ok(Some(instance)) if instance.enabled => instance,
            Ok(_) => return,
            Err(err) => {
                warn!(instance_id, error = %err, "tick skipped: instance load failed");
                return;
            }
        };
        let rules = match self.due_rules(instance_id).await {
            Ok(rules) if !rules.is_empty() => rules,
            Ok(_) => return,
            Err(err) => {
                warn!(instance_id, error = %err, "tick skipped: rule load failed");
                return;
            }
        };

        // Transient read errors are absorbed; the tick retries at the next
        // scheduled time.
        if let Err(err) = self.evaluate(&instance, rules, false).await {
            warn!(instance_id, error = %err, "rule tick failed");
        }
    }

    async fn due_rules(&self, instance_id: i64) -> RuleResult<Vec<Rule>> {
        let rules = self.list_rules(instance_id).await?;
        let last_runs = self.last_runs.lock().await;
        let now = Instant::now();
        Ok(rules
            .into_iter()
            .filter(|rule| {
                if !rule.enabled {
                    return false;
                }
                let interval = Duration::from_secs(
                    u64::try_from(rule.interval_seconds.max(60)).unwrap_or(900),
                );
                last_runs
                    .get(&rule.id)
                    .is_none_or(|last| now.duration_since(*last) >= interval)
            })
            .collect())
    }

    async fn evaluate(
        &self,
        instance: &Instance,
        rules: Vec<Rule>,
        force_dry_run: bool,
    ) -> RuleResult<RunSummary> {
        let run_id = new_run_id();
        let read = self.sync.read(instance.id).await?;
        let now = Utc::now().timestamp();

        let mut plans: Vec<RulePlan> = Vec::with_capacity(rules.len());
        for rule in &rules {
            let free_space = self.free_space_for(rule, read.snapshot.free_space_on_disk);
            plans.push(plan_rule(
                rule,
                &read.snapshot,
                free_space,
                now,
                instance.has_local_filesystem_access,
            )?);
        }
        reconcile(&mut plans);

        let mut summary = RunSummary {
            run_id: run_id.clone(),
            rules_evaluated: rules.len(),
            actions_planned: plans.iter().map(|plan| plan.items.len()).sum(),
            actions_dispatched: 0,
            errors: 0,
        };

        for (rule, plan) in rules.iter().zip(&plans) {
            if plan.dry_run || force_dry_run {
                for item in &plan.items {
                    self.record(instance.id, rule.id, &run_id, item, "would_have_applied", None);
                }
                debug!(
                    rule_id = rule.id,
                    planned = plan.items.len(),
                    "dry run recorded"
                );
            } else {
                let (dispatched, errors) = self.dispatch(instance.id, rule.id, &run_id, plan).await;
                summary.actions_dispatched += dispatched;
                summary.errors += errors;
            }
        }

        let mut last_runs = self.last_runs.lock().await;
        let finished = Instant::now();
        for rule in &rules {
            last_runs.insert(rule.id, finished);
        }
        Ok(summary)
    }

    /// Dispatch one plan in batches grouped by action fingerprint. A
    /// failed batch marks its records errored without aborting the rest.
    async fn dispatch(
        &self,
        instance_id: i64,
        rule_id: i64,
        run_id: &str,
        plan: &RulePlan,
    ) -> (usize, usize) {
        let mut dispatched = 0;
        let mut errors = 0;

        // Batches keyed by fingerprint, in first-seen order.
        let mut batches: Vec<(String, PlannedAction, Vec<PlannedItem>)> = Vec::new();
        for item in &plan.items {
            let key = item.action.fingerprint();
            match batches.iter_mut().find(|(existing, _, _)| *existing == key) {
                Some((_, _, items)) => items.push(item.clone()),
                None => batches.push((key, item.action.clone(), vec![item.clone()])),
            }
        }

        for (_, action, items) in batches {
            let hashes: Vec<String> = items.iter().map(|item| item.hash.clone()).collect();
            let result = self.dispatch_batch(instance_id, &action, hashes, &items).await;
            match result {
                Ok(()) => {
                    dispatched += items.len();
                    for item in &items {
                        self.record(instance_id, rule_id, run_id, item, "applied", None);
                    }
                }
                Err(err) => {
                    errors += 1;
                    warn!(
                        instance_id,
                        rule_id,
                        action = action.label(),
                        error = %err,
                        "action batch failed"
                    );
                    let detail = err.to_string();
                    for item in &items {
                        self.record(
                            instance_id,
                            rule_id,
                            run_id,
                            item,
                            "errored",
                            Some(detail.clone()),
                        );
                    }
                }
            }
        }
        (dispatched, errors)
    }

    async fn dispatch_batch(
        &self,
        instance_id: i64,
        action: &PlannedAction,
        hashes: Vec<String>,
        items: &[PlannedItem],
    ) -> RuleResult<()> {
        match action {
            PlannedAction::SetShareLimit {
                ratio_limit,
                seeding_time_limit,
                inactive_seeding_time_limit,
            } => {
                self.sync
                    .set_share_limits(
                        instance_id,
                        hashes,
                        *ratio_limit,
                        *seeding_time_limit,
                        *inactive_seeding_time_limit,
                    )
                    .await?;
            }
            PlannedAction::SetSpeedLimits {
                upload_bps,
                download_bps,
            } => {
                self.sync
                    .set_speed_limits(instance_id, hashes, *upload_bps, *download_bps)
                    .await?;
            }
            PlannedAction::Pause => {
                self.sync
                    .bulk_action(instance_id, BulkVerb::Stop, hashes)
                    .await?;
            }
            PlannedAction::Resume => {
                self.sync
                    .bulk_action(instance_id, BulkVerb::Start, hashes)
                    .await?;
            }
            PlannedAction::AddTags { tags } => {
                self.sync.add_tags(instance_id, hashes, tags.clone()).await?;
            }
            PlannedAction::SetTags { tags } => {
                self.sync.set_tags(instance_id, hashes, tags.clone()).await?;
            }
            PlannedAction::RemoveTags { tags } => {
                self.sync
                    .remove_tags(instance_id, hashes, tags.clone())
                    .await?;
            }
            PlannedAction::SetCategory { name } => {
                self.sync
                    .set_category(instance_id, hashes, name.clone())
                    .await?;
            }
            PlannedAction::Move { save_path } => {
                self.sync
                    .set_location(instance_id, hashes, save_path.clone())
                    .await?;
            }
            PlannedAction::Delete { mode } => {
                let delete_files = *mode != DeleteMode::KeepFiles;
                self.sync
                    .bulk_action(instance_id, BulkVerb::Delete { delete_files }, hashes)
                    .await?;
            }
            PlannedAction::RunProgram { program_id } => {
                let program = self.db.programs().get(*program_id).await?;
                if !program.enabled {
                    return Err(RuleError::invalid(format!(
                        "program {} is disabled",
                        program.name
                    )));
                }
                let snapshot = self.sync.read(instance_id).await?.snapshot;
                for item in items {
                    let Some(view) = snapshot.torrents.get(&item.hash) else {
                        continue;
                    };
                    launch(&program, view, &self.config.program_allow_list)?;
                }
            }
        }
        Ok(())
    }

    fn record(
        &self,
        instance_id: i64,
        rule_id: i64,
        run_id: &str,
        item: &PlannedItem,
        outcome: &str,
        detail: Option<String>,
    ) {
        self.activity.append(NewActivity {
            rule_id: (rule_id > 0).then_some(rule_id),
            instance_id,
            hash: item.hash.clone(),
            torrent_name: item.name.clone(),
            action: item.action.label().to_string(),
            outcome: outcome.to_string(),
            detail: detail.or_else(|| Some(item.action.fingerprint())),
            run_id: run_id.to_string(),
        });
    }

    fn free_space_for(&self, rule: &Rule, upstream_free: Option<i64>) -> Option<i64> {
        match FreeSpaceSource::parse(rule.free_space_source.as_deref()) {
            Ok(source) => source.read(upstream_free),
            Err(err) => {
                warn!(rule_id = rule.id, error = %err, "bad free-space source, treating as unknown");
                None
            }
        }
    }

    async fn instance_lock(&self, instance_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.instance_locks.lock().await;
        Arc::clone(locks.entry(instance_id).or_default())
    }
}

fn new_run_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}
