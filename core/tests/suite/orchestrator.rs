use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use pretty_assertions::assert_eq;
use serde_json::json;
use sitewatch_core::Orchestrator;
use sitewatch_core::OrchestratorSettings;
use sitewatch_core::SheetsError;
use sitewatch_core::SitewatchConfig;
use sitewatch_core::TabKind;
use sitewatch_core::TabTarget;
use sitewatch_core::auth::DelegatedAuthFlow;
use sitewatch_core::auth::DelegatedGrant;
use sitewatch_core::auth::SessionCredentials;
use sitewatch_core::auth::TokenLifecycleManager;
use sitewatch_core::auth::TokenState;
use sitewatch_core::classify::DowntimeDuration;
use sitewatch_core::downtime::DowntimeEntry;
use sitewatch_core::phase::FilePhaseRegistry;
use sitewatch_core::phase::NewPhase;
use sitewatch_core::retry::RetryConfig;
use sitewatch_core::sheets::HttpSheetsClient;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_partial_json;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;

use super::API_KEY;
use super::SHEET_ID;
use super::values;

const HEADERS: &[&str] = &[
    "SITE CODE", "PROJECT", "REGION", "TECH", "NOTES", "START TIME", "END TIME", "CAUSE",
];

/// Consent that succeeds immediately and counts how often it ran.
#[derive(Default)]
struct InstantConsent {
    calls: AtomicU32,
}

#[async_trait]
impl DelegatedAuthFlow for InstantConsent {
    async fn obtain(&self) -> sitewatch_core::Result<DelegatedGrant> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DelegatedGrant {
            access_token: "write-token".to_string(),
            expires_in_ms: None,
        })
    }
}

struct Harness {
    server: MockServer,
    orchestrator: Orchestrator,
    consent: Arc<InstantConsent>,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = SitewatchConfig {
        retry: RetryConfig {
            max_attempts: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            ..RetryConfig::default()
        },
        write_pacing_ms: 0,
        ..SitewatchConfig::default()
    };
    let consent = Arc::new(InstantConsent::default());
    let tokens = Arc::new(TokenLifecycleManager::new(
        Arc::new(SessionCredentials::new()),
        consent.clone(),
    ));
    let orchestrator = Orchestrator::new(
        Arc::new(HttpSheetsClient::new(server.uri(), API_KEY)),
        Arc::new(FilePhaseRegistry::new(dir.path().join("phases.json"))),
        tokens,
        OrchestratorSettings::from_config(&config).unwrap(),
    );
    Harness {
        server,
        orchestrator,
        consent,
        _dir: dir,
    }
}

fn downtime_target() -> TabTarget {
    TabTarget {
        spreadsheet_id: SHEET_ID.to_string(),
        tab_name: "Downtime".to_string(),
        header_row_index: 0,
    }
}

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn tab_path() -> String {
    format!("/v4/spreadsheets/{SHEET_ID}/values/%27Downtime%27")
}

fn batch_path() -> String {
    format!("/v4/spreadsheets/{SHEET_ID}/values:batchUpdate")
}

async fn mount_tab(server: &MockServer, rows: &[&[&str]], times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path(tab_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(values(rows)));
    match times {
        Some(n) => mock.up_to_n_times(n).mount(server).await,
        None => mock.mount(server).await,
    }
}

async fn mount_write_ok(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(batch_path()))
        .and(header("authorization", "Bearer write-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "spreadsheetId": SHEET_ID,
            "totalUpdatedCells": 1
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn open_and_closed() -> Vec<&'static [&'static str]> {
    vec![
        HEADERS,
        &["S1", "North", "", "", "", "2025-01-01 10:00", "", "Power"],
        &["S2", "South", "", "", "", "2025-01-02 09:00", "2025-01-02 10:00", "Fiber"],
    ]
}

#[tokio::test]
async fn no_uptime_returns_only_the_open_record() {
    let h = harness().await;
    mount_tab(&h.server, &open_and_closed(), None).await;
    let cancel = CancellationToken::new();

    let open = h
        .orchestrator
        .no_uptime_view(&downtime_target(), &cancel)
        .await
        .unwrap();

    assert_eq!(open.len(), 1);
    assert_eq!(open[0].get("SITE CODE"), Some("S1"));
    assert_eq!(open[0].row_number(), 2);
}

#[tokio::test]
async fn downtime_view_carries_durations() {
    let h = harness().await;
    mount_tab(&h.server, &open_and_closed(), None).await;

    let rows = h
        .orchestrator
        .downtime_view(&downtime_target(), &CancellationToken::new())
        .await
        .unwrap();

    let durations: Vec<String> = rows.iter().map(|r| r.duration.to_string()).collect();
    assert_eq!(durations, vec!["N/A".to_string(), "1h 0m".to_string()]);
    assert_eq!(rows[0].duration, DowntimeDuration::NotAvailable);
}

#[tokio::test]
async fn reads_are_served_from_cache_until_invalidated() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path(tab_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(values(&open_and_closed())))
        .expect(2)
        .mount(&h.server)
        .await;
    let cancel = CancellationToken::new();
    let target = downtime_target();

    h.orchestrator.load_tab(&target, &cancel).await.unwrap();
    h.orchestrator.no_uptime_view(&target, &cancel).await.unwrap();
    h.orchestrator
        .invalidate_and_refetch(&target, &cancel)
        .await
        .unwrap();
}

#[tokio::test]
async fn set_end_time_writes_one_cell_and_refetches() {
    let h = harness().await;
    // Initial load and the pre-commit re-read see the open record.
    mount_tab(&h.server, &open_and_closed(), Some(2)).await;
    mount_tab(
        &h.server,
        &[
            HEADERS,
            &["S1", "North", "", "", "", "2025-01-01 10:00", "01/01/2025 12:00:00", "Power"],
            &["S2", "South", "", "", "", "2025-01-02 09:00", "2025-01-02 10:00", "Fiber"],
        ],
        None,
    )
    .await;
    Mock::given(method("POST"))
        .and(path(batch_path()))
        .and(header("authorization", "Bearer write-token"))
        .and(body_partial_json(json!({
            "valueInputOption": "USER_ENTERED",
            "data": [{"range": "'Downtime'!G2", "values": [["01/01/2025 12:00:00"]]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&h.server)
        .await;
    let cancel = CancellationToken::new();
    let target = downtime_target();

    h.orchestrator.no_uptime_view(&target, &cancel).await.unwrap();
    let view = h
        .orchestrator
        .update_end_time(&target, &[2], at(1, 12), &cancel)
        .await
        .unwrap();

    assert_eq!(
        view.snapshot.record(2).and_then(|r| r.get("END TIME")),
        Some("01/01/2025 12:00:00")
    );
    assert!(
        h.orchestrator
            .no_uptime_view(&target, &cancel)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(h.consent.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn end_time_before_start_is_rejected_without_consent() {
    let h = harness().await;
    mount_tab(&h.server, &open_and_closed(), None).await;
    mount_write_ok(&h.server, 0).await;

    let err = h
        .orchestrator
        .update_end_time(&downtime_target(), &[2], at(1, 9), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SheetsError::InvalidInput(_)), "{err:?}");
    assert_eq!(h.consent.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn changed_record_is_reported_stale_and_not_written() {
    let h = harness().await;
    mount_tab(&h.server, &open_and_closed(), Some(1)).await;
    mount_tab(
        &h.server,
        &[
            HEADERS,
            &["S1", "North", "", "", "", "2025-01-01 10:00", "2025-01-01 11:00", "Power"],
            &["S2", "South", "", "", "", "2025-01-02 09:00", "2025-01-02 10:00", "Fiber"],
        ],
        None,
    )
    .await;
    mount_write_ok(&h.server, 0).await;
    let cancel = CancellationToken::new();
    let target = downtime_target();

    h.orchestrator.load_tab(&target, &cancel).await.unwrap();
    let err = h
        .orchestrator
        .update_end_time(&target, &[2], at(1, 12), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SheetsError::StaleRecord { row: 2 }), "{err:?}");
    // The live copy replaced the stale one.
    assert!(
        h.orchestrator
            .no_uptime_view(&target, &cancel)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn escalation_update_requires_a_field() {
    let h = harness().await;
    let err = h
        .orchestrator
        .update_escalation_fields(
            &downtime_target(),
            &[2],
            Some("  "),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SheetsError::InvalidInput(_)));
}

#[tokio::test]
async fn escalation_view_uses_offset_header_row() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/v4/spreadsheets/{SHEET_ID}/values/%27Escalation%20Report%27"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(values(&[
            &["Weekly escalation report"],
            &[],
            &["Generated 2025-01-06"],
            &["SITE", "PROJECT", "DATE", "CAUSE", "ACTION PLAN"],
            &["S1", "North", "01/05/2025", "Power", "Replace rectifier"],
            &["S2", "North", "01/05/2025", "", "Dispatch"],
            &["S3", "South", "01/05/2025", "Fiber cut", " "],
            &[],
            &["S5", "South", "01/06/2025", "Power", "Reboot"],
        ])))
        .mount(&h.server)
        .await;
    let target = TabTarget {
        spreadsheet_id: SHEET_ID.to_string(),
        tab_name: "Escalation Report".to_string(),
        header_row_index: 3,
    };

    let rows = h
        .orchestrator
        .escalation_view(&target, &CancellationToken::new())
        .await
        .unwrap();

    let summary: Vec<(u32, bool, bool)> = rows
        .iter()
        .map(|r| (r.record.row_number(), r.gap.missing_cause, r.gap.missing_action_plan))
        .collect();
    assert_eq!(
        summary,
        vec![(6, true, false), (7, false, true), (8, true, true)]
    );
}

async fn mount_span(server: &MockServer, rows: &[&[&str]], times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path(format!(
            "/v4/spreadsheets/{SHEET_ID}/values/%27Downtime%27%21F%3AH"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(values(rows)));
    match times {
        Some(n) => mock.up_to_n_times(n).mount(server).await,
        None => mock.mount(server).await,
    }
}

async fn mount_row(server: &MockServer, row: u32, cells: &[&str]) {
    let body = if cells.is_empty() {
        json!({})
    } else {
        values(&[cells])
    };
    Mock::given(method("GET"))
        .and(path(format!(
            "/v4/spreadsheets/{SHEET_ID}/values/%27Downtime%27%21F{row}%3AH{row}"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn next_row_follows_last_watched_cell() {
    let h = harness().await;
    mount_span(
        &h.server,
        &[
            &["START TIME", "END TIME", "CAUSE"],
            &["2025-01-01 10:00", "", "Power"],
            &[],
            &["", "", " "],
        ],
        None,
    )
    .await;
    let cancel = CancellationToken::new();
    let target = downtime_target();

    let first = h.orchestrator.next_append_row(&target, &cancel).await.unwrap();
    let second = h.orchestrator.next_append_row(&target, &cancel).await.unwrap();

    assert_eq!(first, 5);
    assert_eq!(first, second);
}

#[tokio::test]
async fn append_writes_entry_cells_on_the_free_row() {
    let h = harness().await;
    mount_tab(&h.server, &open_and_closed(), None).await;
    mount_span(
        &h.server,
        &[&["START TIME", "END TIME", "CAUSE"], &["a", "", ""], &["b", "c", "d"]],
        None,
    )
    .await;
    mount_row(&h.server, 4, &[]).await;
    Mock::given(method("POST"))
        .and(path(batch_path()))
        .and(body_partial_json(json!({
            "data": [
                {"range": "'Downtime'!A4", "values": [["S9"]]},
                {"range": "'Downtime'!F4", "values": [["01/03/2025 08:00:00"]]},
                {"range": "'Downtime'!G4", "values": [[""]]},
                {"range": "'Downtime'!H4", "values": [["Generator fault"]]}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&h.server)
        .await;
    let entry = DowntimeEntry::new("S9", at(3, 8), None, "Generator fault", None).unwrap();

    let outcome = h
        .orchestrator
        .append_downtime(&downtime_target(), &entry, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.row, 4);
}

#[tokio::test]
async fn append_conflict_re_resolves_the_row() {
    let h = harness().await;
    mount_tab(&h.server, &open_and_closed(), None).await;
    mount_span(&h.server, &[&["START TIME"], &["a"], &["b"]], Some(1)).await;
    mount_span(&h.server, &[&["START TIME"], &["a"], &["b"], &["taken"]], None).await;
    mount_row(&h.server, 4, &["taken"]).await;
    mount_row(&h.server, 5, &[]).await;
    Mock::given(method("POST"))
        .and(path(batch_path()))
        .and(body_partial_json(json!({
            "data": [{"range": "'Downtime'!A5", "values": [["S9"]]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&h.server)
        .await;
    let entry = DowntimeEntry::new("S9", at(3, 8), None, "Power", None).unwrap();

    let outcome = h
        .orchestrator
        .append_downtime(&downtime_target(), &entry, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.row, 5);
}

#[tokio::test]
async fn append_into_empty_tab_writes_below_header_row() {
    let h = harness().await;
    mount_tab(&h.server, &[], None).await;
    mount_span(&h.server, &[], None).await;
    mount_row(&h.server, 2, &[]).await;
    Mock::given(method("POST"))
        .and(path(batch_path()))
        .and(body_partial_json(json!({
            "data": [
                {"range": "'Downtime'!A2", "values": [["S4"]]},
                {"range": "'Downtime'!F2", "values": [["01/03/2025 08:00:00"]]}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&h.server)
        .await;
    let entry = DowntimeEntry::new("S4", at(3, 8), None, "Power", None).unwrap();

    let outcome = h
        .orchestrator
        .append_downtime(&downtime_target(), &entry, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.row, 2);
    assert!(outcome.view.is_none());
    assert_eq!(h.consent.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn multi_site_append_reports_each_site() {
    let h = harness().await;
    mount_tab(&h.server, &open_and_closed(), None).await;
    mount_span(&h.server, &[&["START TIME"], &["a"]], None).await;
    mount_row(&h.server, 3, &[]).await;
    mount_write_ok(&h.server, 1).await;
    let entry = DowntimeEntry::new("S1", at(3, 8), Some(at(3, 9)), "Power", None).unwrap();
    let sites = vec!["S7".to_string(), "   ".to_string()];

    let outcomes = h
        .orchestrator
        .append_downtime_for_sites(&downtime_target(), &entry, &sites, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].row, Some(3));
    assert!(outcomes[0].succeeded());
    assert!(!outcomes[1].succeeded());
    assert_eq!(h.consent.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_write_token_is_discarded() {
    let h = harness().await;
    mount_tab(&h.server, &open_and_closed(), None).await;
    Mock::given(method("POST"))
        .and(path(batch_path()))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "message": "Invalid Credentials"}
        })))
        .mount(&h.server)
        .await;
    let cancel = CancellationToken::new();

    let err = h
        .orchestrator
        .update_end_time(&downtime_target(), &[2], at(1, 12), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SheetsError::AuthFailed(_)), "{err:?}");
    assert_eq!(h.orchestrator.tokens().state(), TokenState::Absent);
}

#[tokio::test]
async fn failed_write_is_reported_as_batch_failure() {
    let h = harness().await;
    mount_tab(&h.server, &open_and_closed(), None).await;
    Mock::given(method("POST"))
        .and(path(batch_path()))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .expect(1)
        .mount(&h.server)
        .await;

    let err = h
        .orchestrator
        .update_end_time(&downtime_target(), &[2], at(1, 12), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SheetsError::BatchFailed { ranges: 1, .. }), "{err:?}");
}

#[tokio::test]
async fn cancelled_token_stops_reads() {
    let h = harness().await;
    mount_tab(&h.server, &open_and_closed(), None).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .orchestrator
        .load_tab(&downtime_target(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SheetsError::Cancelled), "{err:?}");
}

#[tokio::test]
async fn phases_resolve_to_targets() {
    let h = harness().await;
    let cancel = CancellationToken::new();
    let link = format!("https://docs.google.com/spreadsheets/d/{SHEET_ID}/edit#gid=0");

    let first = h
        .orchestrator
        .add_phase(NewPhase::new("Phase 1", &link, Some("Downtime")).unwrap(), &cancel)
        .await
        .unwrap();
    h.orchestrator
        .add_phase(NewPhase::new("Phase 2", SHEET_ID, None).unwrap(), &cancel)
        .await
        .unwrap();

    let default = h
        .orchestrator
        .target(None, None, TabKind::Downtime, &cancel)
        .await
        .unwrap();
    assert_eq!(default, downtime_target());

    let escalation = h
        .orchestrator
        .target(Some("phase 2"), Some("Escalation Report"), TabKind::Escalation, &cancel)
        .await
        .unwrap();
    assert_eq!(escalation.tab_name, "Escalation Report");
    assert_eq!(escalation.header_row_index, 3);

    let removed = h.orchestrator.remove_phase("Phase 1", &cancel).await.unwrap();
    assert_eq!(removed.id, first.id);
    let names: Vec<String> = h
        .orchestrator
        .phases(&cancel)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["Phase 2".to_string()]);
    assert!(matches!(
        h.orchestrator.remove_phase("Phase 1", &cancel).await,
        Err(SheetsError::NotFound(_))
    ));
}
