use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::Mutex;

use pretty_assertions::assert_eq;
use serde_json::json;
use sitewatch_core::SheetsError;
use sitewatch_core::auth::DelegatedAuthFlow;
use sitewatch_core::auth::LoopbackConsentFlow;
use sitewatch_core::auth::OAuthSettings;
use url::Url;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_string_contains;
use wiremock::matchers::method;
use wiremock::matchers::path;

fn settings(server: &MockServer) -> OAuthSettings {
    OAuthSettings {
        client_id: "client-1".to_string(),
        auth_url: format!("{}/auth", server.uri()),
        token_url: format!("{}/token", server.uri()),
        callback_timeout_secs: 10,
        ..OAuthSettings::default()
    }
}

/// Plays the browser: follows the consent URL straight to the redirect.
fn redirect_with(
    code: Option<&'static str>,
    seen: Arc<Mutex<Option<Url>>>,
) -> impl Fn(&str) -> std::io::Result<()> + Send + Sync + 'static {
    move |consent_url: &str| {
        let url = Url::parse(consent_url).map_err(std::io::Error::other)?;
        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default()
        };
        let redirect = Url::parse(&param("redirect_uri")).map_err(std::io::Error::other)?;
        let state = param("state");
        *seen.lock().unwrap() = Some(url.clone());

        let port = redirect.port().unwrap_or(80);
        let query = match code {
            Some(code) => format!("code={code}&state={state}"),
            None => format!("error=access_denied&state={state}"),
        };
        std::thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            write!(
                stream,
                "GET /callback?{query} HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n"
            )
            .unwrap();
            let mut response = String::new();
            let _ = stream.read_to_string(&mut response);
        });
        Ok(())
    }
}

#[tokio::test]
async fn exchanges_the_redirected_code_for_a_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=granted-code"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "delegated",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let seen = Arc::new(Mutex::new(None));
    let flow = LoopbackConsentFlow::new(settings(&server))
        .with_opener(redirect_with(Some("granted-code"), seen.clone()));

    let grant = flow.obtain().await.unwrap();

    assert_eq!(grant.access_token, "delegated");
    assert_eq!(grant.expires_in_ms, Some(3_599_000));
    let consent_url = seen.lock().unwrap().clone().unwrap();
    assert_eq!(consent_url.path(), "/auth");
    let pairs: Vec<(String, String)> = consent_url.query_pairs().into_owned().collect();
    assert!(pairs.contains(&("client_id".to_string(), "client-1".to_string())));
    assert!(pairs.contains(&("code_challenge_method".to_string(), "S256".to_string())));
}

#[tokio::test]
async fn declined_consent_is_an_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let flow = LoopbackConsentFlow::new(settings(&server))
        .with_opener(redirect_with(None, Arc::new(Mutex::new(None))));

    let err = flow.obtain().await.unwrap_err();
    assert!(matches!(err, SheetsError::AuthFailed(_)), "{err:?}");
}

#[tokio::test]
async fn rejected_exchange_is_an_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;
    let flow = LoopbackConsentFlow::new(settings(&server))
        .with_opener(redirect_with(Some("stale"), Arc::new(Mutex::new(None))));

    let err = flow.obtain().await.unwrap_err();
    assert!(matches!(err, SheetsError::AuthFailed(_)), "{err:?}");
}

#[tokio::test]
async fn missing_client_id_fails_before_listening() {
    let flow = LoopbackConsentFlow::new(OAuthSettings::default())
        .with_opener(|_: &str| panic!("browser must not open"));
    let err = flow.obtain().await.unwrap_err();
    assert!(matches!(err, SheetsError::AuthFailed(_)));
}
