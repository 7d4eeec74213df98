//! Per-action pipelines over phases, tabs and the delegated write token.
//!
//! Reads: registry -> phase -> tab (cached) -> bindings -> classifiers ->
//! view. Writes: token -> re-fetch and re-validate -> compile -> one batch
//! write -> drop cache -> re-fetch. A failed write also drops the cache
//! entry since the upstream state is then unknown.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::append::AppendRowResolver;
use crate::append::WatchWindow;
use crate::auth::LoopbackConsentFlow;
use crate::auth::SessionCredentials;
use crate::auth::TokenLifecycleManager;
use crate::batch;
use crate::batch::BatchCompiler;
use crate::batch::FieldRef;
use crate::batch::WriteRequest;
use crate::bindings::BindingCache;
use crate::bindings::BindingRules;
use crate::bindings::ColumnBindings;
use crate::bindings::FieldRole;
use crate::cancel::OrCancelExt;
use crate::classify;
use crate::classify::DowntimeClassifier;
use crate::classify::DowntimeDuration;
use crate::classify::EscalationClassifier;
use crate::classify::EscalationGap;
use crate::classify::NoUptimeClassifier;
use crate::classify::parse_timestamp;
use crate::config::SitewatchConfig;
use crate::downtime::DowntimeColumns;
use crate::downtime::DowntimeEntry;
use crate::downtime::format_timestamp;
use crate::error::Result;
use crate::error::SheetsError;
use crate::phase::NewPhase;
use crate::phase::Phase;
use crate::phase::PhaseRegistry;
use crate::retry::RetryConfig;
use crate::sheets::HttpSheetsClient;
use crate::sheets::SheetsApi;
use crate::tabular::Record;
use crate::tabular::TabSnapshot;
use crate::tabular::TabularAdapter;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub downtime_header_row: usize,
    pub escalation_header_row: usize,
    pub watch_window: WatchWindow,
    pub downtime_columns: DowntimeColumns,
    pub bindings: BindingRules,
    pub retry: RetryConfig,
    pub write_pacing: Duration,
    pub append_attempts: u32,
}

impl OrchestratorSettings {
    pub fn from_config(config: &SitewatchConfig) -> Result<Self> {
        Ok(Self {
            downtime_header_row: config.layout.downtime_header_row,
            escalation_header_row: config.layout.escalation_header_row,
            watch_window: config.layout.watch_window()?,
            downtime_columns: config.layout.downtime_columns.clone(),
            bindings: config.layout.bindings.clone(),
            retry: config.retry.clone(),
            write_pacing: Duration::from_millis(config.write_pacing_ms),
            append_attempts: config.append_attempts.max(1),
        })
    }
}

/// Which layout a tab follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabKind {
    Downtime,
    Escalation,
}

/// A concrete tab to read or write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabTarget {
    pub spreadsheet_id: String,
    pub tab_name: String,
    pub header_row_index: usize,
}

/// Annotated snapshot plus the bindings of its header signature.
#[derive(Debug, Clone)]
pub struct TabView {
    pub snapshot: TabSnapshot,
    pub bindings: Arc<ColumnBindings>,
}

#[derive(Debug, Clone)]
pub struct DowntimeRow {
    pub record: Record,
    pub duration: DowntimeDuration,
}

#[derive(Debug, Clone)]
pub struct EscalationRow {
    pub record: Record,
    pub gap: EscalationGap,
}

#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub row: u32,
    /// Tab as re-read after the write; `None` when that read failed, which
    /// does not undo the write.
    pub view: Option<Arc<TabView>>,
}

/// Result of one site in a multi-site append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteOutcome {
    pub site_code: String,
    pub row: Option<u32>,
    pub error: Option<String>,
}

impl SiteOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Orchestrator {
    api: Arc<dyn SheetsApi>,
    adapter: Arc<TabularAdapter>,
    resolver: AppendRowResolver,
    registry: Arc<dyn PhaseRegistry>,
    tokens: Arc<TokenLifecycleManager>,
    bindings: BindingCache,
    cache: Mutex<HashMap<TabTarget, Arc<TabView>>>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn SheetsApi>,
        registry: Arc<dyn PhaseRegistry>,
        tokens: Arc<TokenLifecycleManager>,
        settings: OrchestratorSettings,
    ) -> Self {
        let adapter = Arc::new(TabularAdapter::new(Arc::clone(&api), settings.retry.clone()));
        Self {
            resolver: AppendRowResolver::new(Arc::clone(&adapter)),
            adapter,
            api,
            registry,
            tokens,
            bindings: BindingCache::new(settings.bindings.clone()),
            cache: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// HTTP transport, in-memory session token and browser consent.
    ///
    /// The API key is not checked here so that phase management works
    /// without one; callers that read sheets check
    /// [`SitewatchConfig::require_api_key`] first.
    pub fn from_config(config: &SitewatchConfig, registry: Arc<dyn PhaseRegistry>) -> Result<Self> {
        let api = Arc::new(HttpSheetsClient::new(
            config.api_base_url.clone(),
            config.api_key.expose(),
        ));
        let tokens = Arc::new(TokenLifecycleManager::new(
            Arc::new(SessionCredentials::new()),
            Arc::new(LoopbackConsentFlow::new(config.oauth.clone())),
        ));
        Ok(Self::new(
            api,
            registry,
            tokens,
            OrchestratorSettings::from_config(config)?,
        ))
    }

    pub fn tokens(&self) -> &TokenLifecycleManager {
        &self.tokens
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    // ---- phases ----

    /// Registered phases, oldest first. Rows with unusable links are skipped.
    pub async fn phases(&self, cancel: &CancellationToken) -> Result<Vec<Phase>> {
        let rows = self.registry.list().or_cancel(cancel).await??;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let name = row.name.clone();
                Phase::try_from(row)
                    .map_err(|err| warn!(phase = %name, %err, "skipping phase with invalid link"))
                    .ok()
            })
            .collect())
    }

    /// Phase by name (case-insensitive) or id; the first phase when `None`.
    pub async fn phase(&self, name: Option<&str>, cancel: &CancellationToken) -> Result<Phase> {
        let phases = self.phases(cancel).await?;
        match name.map(str::trim) {
            None | Some("") => phases
                .into_iter()
                .next()
                .ok_or_else(|| SheetsError::NotFound("no phases are registered".to_string())),
            Some(wanted) => phases
                .into_iter()
                .find(|p| p.id == wanted || p.name.eq_ignore_ascii_case(wanted))
                .ok_or_else(|| SheetsError::NotFound(format!("phase '{wanted}'"))),
        }
    }

    pub async fn add_phase(&self, phase: NewPhase, cancel: &CancellationToken) -> Result<Phase> {
        let row = self.registry.insert(phase).or_cancel(cancel).await??;
        Phase::try_from(row)
    }

    /// Unregister a phase. The spreadsheet is left untouched.
    pub async fn remove_phase(&self, name: &str, cancel: &CancellationToken) -> Result<Phase> {
        let phase = self.phase(Some(name), cancel).await?;
        if !self.registry.delete(&phase.id).or_cancel(cancel).await?? {
            return Err(SheetsError::NotFound(format!("phase '{name}'")));
        }
        Ok(phase)
    }

    pub async fn list_tabs(&self, phase: &Phase, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.adapter.list_tabs(&phase.spreadsheet_id, cancel).await
    }

    /// Resolve phase + optional tab override into a target.
    pub async fn target(
        &self,
        phase: Option<&str>,
        tab: Option<&str>,
        kind: TabKind,
        cancel: &CancellationToken,
    ) -> Result<TabTarget> {
        let phase = self.phase(phase, cancel).await?;
        let tab_name = tab
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map_or(phase.default_tab_name, str::to_string);
        Ok(TabTarget {
            spreadsheet_id: phase.spreadsheet_id,
            tab_name,
            header_row_index: match kind {
                TabKind::Downtime => self.settings.downtime_header_row,
                TabKind::Escalation => self.settings.escalation_header_row,
            },
        })
    }

    // ---- reads ----

    /// Cached view of a tab, fetched on first use.
    pub async fn load_tab(&self, target: &TabTarget, cancel: &CancellationToken) -> Result<Arc<TabView>> {
        if let Some(hit) = self.cached(target) {
            return Ok(hit);
        }
        self.refetch(target, cancel).await
    }

    /// Drop any cached copy and read the tab again.
    pub async fn invalidate_and_refetch(
        &self,
        target: &TabTarget,
        cancel: &CancellationToken,
    ) -> Result<Arc<TabView>> {
        self.invalidate(target);
        self.refetch(target, cancel).await
    }

    pub async fn downtime_view(
        &self,
        target: &TabTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<DowntimeRow>> {
        let view = self.load_tab(target, cancel).await?;
        let classifier = DowntimeClassifier::new(&view.bindings)?;
        Ok(view
            .snapshot
            .records
            .iter()
            .filter(|r| classifier.is_match(r))
            .map(|r| DowntimeRow {
                duration: classifier.duration(r),
                record: r.clone(),
            })
            .collect())
    }

    pub async fn no_uptime_view(
        &self,
        target: &TabTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>> {
        let view = self.load_tab(target, cancel).await?;
        let classifier = NoUptimeClassifier::new(&view.bindings)?;
        Ok(view
            .snapshot
            .records
            .iter()
            .filter(|r| classifier.is_match(r))
            .cloned()
            .collect())
    }

    pub async fn escalation_view(
        &self,
        target: &TabTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<EscalationRow>> {
        let view = self.load_tab(target, cancel).await?;
        let classifier = EscalationClassifier::new(&view.bindings)?;
        Ok(view
            .snapshot
            .records
            .iter()
            .filter_map(|r| {
                classifier.gap(r).map(|gap| EscalationRow {
                    record: r.clone(),
                    gap,
                })
            })
            .collect())
    }

    pub async fn next_append_row(&self, target: &TabTarget, cancel: &CancellationToken) -> Result<u32> {
        self.resolver
            .resolve(
                &target.spreadsheet_id,
                &target.tab_name,
                &self.settings.watch_window,
                target.header_row_index,
                cancel,
            )
            .await
    }

    // ---- writes ----

    /// Close open downtime on `rows` with `end`.
    pub async fn update_end_time(
        &self,
        target: &TabTarget,
        rows: &[u32],
        end: NaiveDateTime,
        cancel: &CancellationToken,
    ) -> Result<Arc<TabView>> {
        let view = self.load_tab(target, cancel).await?;
        let classifier = NoUptimeClassifier::new(&view.bindings)?;
        let start_col = view.bindings.require(FieldRole::StartTime)?;
        for row in rows {
            let record = selected(&view, *row)?;
            if !classifier.is_match(record) {
                return Err(SheetsError::InvalidInput(format!(
                    "row {row} has no open downtime"
                )));
            }
            if let Some(start) = parse_timestamp(record.cell(start_col))
                && end <= start
            {
                return Err(SheetsError::InvalidInput(format!(
                    "end time must be after the start of row {row}"
                )));
            }
        }
        let edits = vec![(FieldRef::Role(FieldRole::EndTime), format_timestamp(end))];
        self.commit_edits(target, rows, &edits, cancel).await
    }

    /// Fill cause and/or action plan on the selected escalation rows.
    pub async fn update_escalation_fields(
        &self,
        target: &TabTarget,
        rows: &[u32],
        cause: Option<&str>,
        action_plan: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Arc<TabView>> {
        let mut edits = Vec::new();
        if let Some(cause) = cause.map(str::trim).filter(|c| !c.is_empty()) {
            edits.push((FieldRef::Role(FieldRole::Cause), cause.to_string()));
        }
        if let Some(plan) = action_plan.map(str::trim).filter(|p| !p.is_empty()) {
            edits.push((FieldRef::Role(FieldRole::ActionPlan), plan.to_string()));
        }
        if edits.is_empty() {
            return Err(SheetsError::InvalidInput(
                "provide a cause, an action plan, or both".to_string(),
            ));
        }
        self.commit_edits(target, rows, &edits, cancel).await
    }

    /// Append one downtime entry below the last occupied row.
    pub async fn append_downtime(
        &self,
        target: &TabTarget,
        entry: &DowntimeEntry,
        cancel: &CancellationToken,
    ) -> Result<AppendOutcome> {
        let access_token = self.tokens.ensure_valid(cancel).await?.value;
        let row = match self.append_once(target, entry, &access_token, cancel).await {
            Ok(row) => row,
            Err(err) => {
                self.invalidate(target);
                return Err(err);
            }
        };
        let view = self.refetch_after_write(target, cancel).await;
        Ok(AppendOutcome { row, view })
    }

    /// The same event for several sites, written one after another with a
    /// pause between writes. A failing site does not stop the others;
    /// cancellation does.
    pub async fn append_downtime_for_sites(
        &self,
        target: &TabTarget,
        entry: &DowntimeEntry,
        sites: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<SiteOutcome>> {
        if sites.is_empty() {
            return Err(SheetsError::InvalidInput("select at least one site".to_string()));
        }
        let access_token = self.tokens.ensure_valid(cancel).await?.value;

        let mut outcomes = Vec::with_capacity(sites.len());
        for (idx, site) in sites.iter().enumerate() {
            if idx > 0 && !pause(self.settings.write_pacing, cancel).await {
                outcomes.push(cancelled_outcome(site));
                continue;
            }
            if cancel.is_cancelled() {
                outcomes.push(cancelled_outcome(site));
                continue;
            }
            let result = match entry.for_site(site) {
                Ok(site_entry) => self.append_once(target, &site_entry, &access_token, cancel).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(row) => {
                    info!(site = %site, row, "downtime appended");
                    outcomes.push(SiteOutcome {
                        site_code: site.clone(),
                        row: Some(row),
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(site = %site, %err, "downtime append failed");
                    outcomes.push(SiteOutcome {
                        site_code: site.clone(),
                        row: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            self.invalidate(target);
        } else {
            self.refetch_after_write(target, cancel).await;
        }
        Ok(outcomes)
    }

    async fn append_once(
        &self,
        target: &TabTarget,
        entry: &DowntimeEntry,
        access_token: &str,
        cancel: &CancellationToken,
    ) -> Result<u32> {
        let cells = self.settings.downtime_columns.cells(entry)?;
        let window = &self.settings.watch_window;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let row = self.next_append_row(target, cancel).await?;
            match self
                .resolver
                .verify_row_free(&target.spreadsheet_id, &target.tab_name, window, row, cancel)
                .await
            {
                Ok(()) => {
                    let request = batch::compile_row(&target.tab_name, row, &cells)?;
                    self.submit(target, &request, access_token, cancel).await?;
                    return Ok(row);
                }
                Err(SheetsError::AppendConflict { row }) if attempt < self.settings.append_attempts => {
                    warn!(row, attempt, "append row was taken, resolving again");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn commit_edits(
        &self,
        target: &TabTarget,
        rows: &[u32],
        edits: &[(FieldRef, String)],
        cancel: &CancellationToken,
    ) -> Result<Arc<TabView>> {
        if rows.is_empty() {
            return Err(SheetsError::InvalidInput("no records selected".to_string()));
        }
        let access_token = self.tokens.ensure_valid(cancel).await?.value;

        let baseline = self.load_tab(target, cancel).await?;
        let live = self.fetch_view(target, cancel).await?;
        if live.snapshot.schema.headers() != baseline.snapshot.schema.headers() {
            self.store(target, live);
            return Err(SheetsError::StaleRecord { row: rows[0] });
        }
        for row in rows {
            let before = selected(&baseline, *row)?;
            let unchanged = live
                .snapshot
                .record(*row)
                .is_some_and(|now| now.fingerprint() == before.fingerprint());
            if !unchanged {
                self.store(target, live);
                return Err(SheetsError::StaleRecord { row: *row });
            }
        }
        let selection: Vec<&Record> = rows
            .iter()
            .filter_map(|row| live.snapshot.record(*row))
            .collect();

        let compiler = BatchCompiler::new(&live.snapshot.schema, &live.bindings);
        let request = compiler.compile(&selection, edits)?;
        self.submit(target, &request, &access_token, cancel).await?;
        self.invalidate_and_refetch(target, cancel).await
    }

    /// Single batch write. Any failure leaves the tab cache empty.
    async fn submit(
        &self,
        target: &TabTarget,
        request: &WriteRequest,
        access_token: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let result = self
            .api
            .batch_update(&target.spreadsheet_id, request, access_token)
            .or_cancel(cancel)
            .await;
        match result {
            Ok(Ok(summary)) => {
                info!(
                    spreadsheet_id = %target.spreadsheet_id,
                    tab = %target.tab_name,
                    ranges = request.len(),
                    cells = summary.total_updated_cells,
                    "batch update applied"
                );
                Ok(())
            }
            Err(cancelled) => {
                self.invalidate(target);
                Err(cancelled)
            }
            Ok(Err(SheetsError::AuthFailed(msg))) => {
                self.invalidate(target);
                self.tokens.invalidate();
                Err(SheetsError::AuthFailed(msg))
            }
            Ok(Err(err)) => {
                self.invalidate(target);
                Err(SheetsError::BatchFailed {
                    ranges: request.len(),
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn fetch_view(&self, target: &TabTarget, cancel: &CancellationToken) -> Result<Arc<TabView>> {
        let mut snapshot = self
            .adapter
            .fetch(
                &target.spreadsheet_id,
                &target.tab_name,
                target.header_row_index,
                cancel,
            )
            .await?;
        let bindings = self.bindings.bindings_for(&snapshot.schema)?;
        classify::annotate(&mut snapshot.records, &bindings);
        Ok(Arc::new(TabView { snapshot, bindings }))
    }

    /// Re-read after a write that already landed. A tab that still has no
    /// readable header row (an append into an empty tab) stays uncached.
    async fn refetch_after_write(
        &self,
        target: &TabTarget,
        cancel: &CancellationToken,
    ) -> Option<Arc<TabView>> {
        match self.invalidate_and_refetch(target, cancel).await {
            Ok(view) => Some(view),
            Err(err) => {
                warn!(tab = %target.tab_name, %err, "could not re-read tab after write");
                None
            }
        }
    }

    async fn refetch(&self, target: &TabTarget, cancel: &CancellationToken) -> Result<Arc<TabView>> {
        let view = self.fetch_view(target, cancel).await?;
        self.store(target, Arc::clone(&view));
        Ok(view)
    }

    fn cached(&self, target: &TabTarget) -> Option<Arc<TabView>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    fn store(&self, target: &TabTarget, view: Arc<TabView>) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.clone(), view);
    }

    fn invalidate(&self, target: &TabTarget) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target);
    }
}

fn selected(view: &TabView, row: u32) -> Result<&Record> {
    view.snapshot.record(row).ok_or_else(|| {
        SheetsError::InvalidInput(format!(
            "row {row} is not a record of tab '{}'",
            view.snapshot.schema.tab_name()
        ))
    })
}

fn cancelled_outcome(site: &str) -> SiteOutcome {
    SiteOutcome {
        site_code: site.to_string(),
        row: None,
        error: Some(SheetsError::Cancelled.to_string()),
    }
}

/// `false` when cancelled during the pause.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
