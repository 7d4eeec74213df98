use pretty_assertions::assert_eq;
use serde_json::json;
use sitewatch_core::SheetsError;
use sitewatch_core::batch::ValueInputOption;
use sitewatch_core::batch::ValueRange;
use sitewatch_core::batch::WriteRequest;
use sitewatch_core::sheets::HttpSheetsClient;
use sitewatch_core::sheets::SheetsApi;
use std::time::Duration;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_json;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

use super::API_KEY;
use super::SHEET_ID;

fn client(server: &MockServer) -> HttpSheetsClient {
    HttpSheetsClient::new(format!("{}/", server.uri()), API_KEY)
}

#[tokio::test]
async fn reads_values_and_stringifies_cells() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v4/spreadsheets/{SHEET_ID}/values/%27Site%20Log%27")))
        .and(query_param("key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "range": "'Site Log'!A1:C3",
            "values": [["SITE", "COUNT", "UP"], ["S1", 3, true], ["S2"]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let grid = client(&server)
        .get_values(SHEET_ID, "'Site Log'")
        .await
        .unwrap();

    assert_eq!(
        grid,
        vec![
            vec!["SITE".to_string(), "COUNT".to_string(), "UP".to_string()],
            vec!["S1".to_string(), "3".to_string(), "true".to_string()],
            vec!["S2".to_string()],
        ]
    );
}

#[tokio::test]
async fn empty_tab_has_no_values_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v4/spreadsheets/{SHEET_ID}/values/Empty")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "range": "Empty!A1:Z1000" })))
        .mount(&server)
        .await;

    let grid = client(&server).get_values(SHEET_ID, "Empty").await.unwrap();
    assert!(grid.is_empty());
}

#[tokio::test]
async fn lists_tab_titles_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v4/spreadsheets/{SHEET_ID}")))
        .and(query_param("fields", "sheets.properties.title"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sheets": [
                {"properties": {"title": "Downtime"}},
                {"properties": {"title": "Escalation Report"}}
            ]
        })))
        .mount(&server)
        .await;

    let tabs = client(&server).list_tabs(SHEET_ID).await.unwrap();
    assert_eq!(tabs, vec!["Downtime".to_string(), "Escalation Report".to_string()]);
}

#[tokio::test]
async fn maps_upstream_statuses() {
    let server = MockServer::start().await;
    let error = |message: &str| json!({ "error": { "code": 0, "message": message } });
    Mock::given(path(format!("/v4/spreadsheets/{SHEET_ID}/values/Missing")))
        .respond_with(ResponseTemplate::new(400).set_body_json(error("Unable to parse range: Missing")))
        .mount(&server)
        .await;
    Mock::given(path(format!("/v4/spreadsheets/{SHEET_ID}/values/Private")))
        .respond_with(ResponseTemplate::new(403).set_body_json(error("The caller does not have permission")))
        .mount(&server)
        .await;
    Mock::given(path(format!("/v4/spreadsheets/{SHEET_ID}/values/Busy")))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;
    Mock::given(path(format!("/v4/spreadsheets/{SHEET_ID}/values/Broken")))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(matches!(
        client.get_values(SHEET_ID, "Missing").await,
        Err(SheetsError::NotFound(_))
    ));
    assert!(matches!(
        client.get_values(SHEET_ID, "Private").await,
        Err(SheetsError::AccessDenied(_))
    ));
    match client.get_values(SHEET_ID, "Busy").await {
        Err(SheetsError::RateLimited { retry_after }) => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
    match client.get_values(SHEET_ID, "Broken").await {
        Err(SheetsError::Upstream { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "backend unavailable");
        }
        other => panic!("expected Upstream, got {other:?}"),
    }
}

#[tokio::test]
async fn batch_update_sends_bearer_and_payload() {
    let server = MockServer::start().await;
    let request = WriteRequest {
        tab_name: "Downtime".to_string(),
        value_input_option: ValueInputOption::UserEntered,
        data: vec![ValueRange {
            range: "Downtime!G2".to_string(),
            values: vec![vec!["01/05/2025 12:00:00".to_string()]],
        }],
    };
    Mock::given(method("POST"))
        .and(path(format!("/v4/spreadsheets/{SHEET_ID}/values:batchUpdate")))
        .and(header("authorization", "Bearer write-token"))
        .and(body_json(json!({
            "valueInputOption": "USER_ENTERED",
            "data": [{"range": "Downtime!G2", "values": [["01/05/2025 12:00:00"]]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "spreadsheetId": SHEET_ID,
            "totalUpdatedRows": 1,
            "totalUpdatedCells": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let summary = client(&server)
        .batch_update(SHEET_ID, &request, "write-token")
        .await
        .unwrap();
    assert_eq!(summary.total_updated_cells, 1);
}

#[tokio::test]
async fn unauthorized_write_is_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "message": "Request had invalid authentication credentials."}
        })))
        .mount(&server)
        .await;
    let request = WriteRequest {
        tab_name: "Downtime".to_string(),
        value_input_option: ValueInputOption::UserEntered,
        data: Vec::new(),
    };

    let err = client(&server)
        .batch_update(SHEET_ID, &request, "expired")
        .await
        .unwrap_err();
    assert!(matches!(err, SheetsError::AuthFailed(_)), "{err:?}");
}
