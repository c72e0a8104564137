//! Gateway client integration tests against a mock HTTP backend

use rewards_gateway_client::{Credentials, ErrorKind, GatewayClient, GatewayConfig, Query};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> GatewayClient {
    GatewayClient::new(GatewayConfig {
        base_url: server.uri(),
        anon_key: "anon-key".into(),
        ..Default::default()
    })
    .expect("client builds")
}

// =============================================================================
// Procedures
// =============================================================================

#[tokio::test]
async fn test_call_procedure_returns_rows() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/claim_offer"))
        .and(header("apikey", "anon-key"))
        .and(body_json(json!({"user_id": "u-1", "offer_id": "offer-1"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"claimed": true, "new_coins": 150}])),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .call_procedure("claim_offer", &json!({"user_id": "u-1", "offer_id": "offer-1"}))
        .await
        .unwrap();

    assert_eq!(result[0]["claimed"], true);
    assert_eq!(result[0]["new_coins"], 150);
}

#[tokio::test]
async fn test_missing_procedure_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/claim_daily_points"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "PGRST202",
            "message": "Could not find the function public.claim_daily_points(p_points, p_user_id) in the schema cache"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .call_procedure("claim_daily_points", &json!({"p_user_id": "u-1", "p_points": 5}))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProcedureMissing);
}

#[tokio::test]
async fn test_procedure_validation_error_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/redeem_reward"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "P0001",
            "message": "reward is not available"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .call_procedure("redeem_reward", &json!({"p_reward_id": "r-1"}))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert!(err.to_string().contains("reward is not available"));
}

// =============================================================================
// Tables
// =============================================================================

#[tokio::test]
async fn test_select_sends_filters_and_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .and(query_param("select", "coins"))
        .and(query_param("id", "eq.u-1"))
        .and(header("authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"coins": 120}])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.set_access_token(Some("user-token".into()));

    let rows = client
        .select("users", &Query::new().select("coins").eq("id", "u-1"))
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["coins"], 120);
}

#[tokio::test]
async fn test_insert_into_missing_table_is_schema_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/daily_claims"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "42P01",
            "message": "relation \"public.daily_claims\" does not exist"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .insert("daily_claims", &json!({"user_id": "u-1", "claimed_date": "2026-10-18", "points": 5}))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
}

#[tokio::test]
async fn test_update_patches_filtered_rows() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/users"))
        .and(query_param("id", "eq.u-1"))
        .and(body_json(json!({"coins": 55})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .update("users", &Query::new().eq("id", "u-1"), &json!({"coins": 55}))
        .await
        .unwrap();
}

// =============================================================================
// Auth
// =============================================================================

#[tokio::test]
async fn test_sign_up_pending_confirmation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u-9",
            "email": "new@example.com",
            "email_confirmed_at": null,
            "user_metadata": {}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let response = client
        .sign_up(&Credentials::new("new@example.com", "Password1!"))
        .await
        .unwrap();

    assert!(response.requires_confirmation());
    assert_eq!(response.user.unwrap().id, "u-9");
}

#[tokio::test]
async fn test_sign_in_returns_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "jwt",
            "refresh_token": "refresh",
            "expires_in": 3600,
            "user": {"id": "u-1", "email": "me@example.com", "user_metadata": {"referral_code": "me1"}}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let session = client
        .sign_in_with_password(&Credentials::new("me@example.com", "Password1!"))
        .await
        .unwrap();

    assert_eq!(session.access_token, "jwt");
    assert_eq!(session.user.user_metadata["referral_code"], "me1");
}

#[tokio::test]
async fn test_sign_in_bad_credentials_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .sign_in_with_password(&Credentials::new("me@example.com", "wrong"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert_eq!(err.to_string(), "Auth error: Invalid login credentials");
}
