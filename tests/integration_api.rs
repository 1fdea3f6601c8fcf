//! API Integration Tests
//!
//! Drive the full router over the in-memory store.

use axum::http::StatusCode;
use retail_ledger::domain::NewAccount;
use retail_ledger::Config;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

mod common;

use common::{decimal, TestApp};

// =========================================================================
// Boundary
// =========================================================================

#[tokio::test]
async fn test_health_needs_no_token() {
    let app = TestApp::new();
    let response = app.call("GET", "/health", None, None).await;
    assert_eq!(response.0, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let app = TestApp::new();

    let (status, body) = app.call("GET", "/api/account", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errorCode"], "unauthorized");

    let (status, _) = app.call("GET", "/api/account", Some("not.a.jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Valid signature, unknown account
    let orphan = app.tokens.issue(Uuid::new_v4(), chrono::Duration::hours(1)).unwrap();
    let (status, _) = app.call("GET", "/api/account", Some(&orphan), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_account_summary() {
    let app = TestApp::new();
    let (account, token) = app.open("ACCX", dec!(250.75)).await;

    let (status, body) = app.call("GET", "/api/account", Some(&token), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accountNumber"], "ACCX");
    assert_eq!(body["id"], account.id.to_string());
    assert_eq!(decimal(&body["balance"]), dec!(250.75));
    assert_eq!(body["role"], "customer");
}

#[tokio::test]
async fn test_customer_cannot_reach_admin_routes() {
    let app = TestApp::new();
    let (_, token) = app.open("ACCX", dec!(0)).await;

    for uri in ["/api/admin/stats", "/api/admin/loans", "/api/admin/transactions"] {
        let (status, body) = app.call("GET", uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body["errorCode"], "forbidden");
    }

    let (status, _) = app
        .call("POST", &format!("/api/admin/loans/approve/{}", Uuid::new_v4()), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// =========================================================================
// Step-up authorization
// =========================================================================

#[tokio::test]
async fn test_otp_code_hidden_unless_exposed() {
    let app = TestApp::with_config(Config::in_memory(common::SECRET));
    let (_, token) = app.open("ACCX", dec!(0)).await;

    let (status, body) = app.call("POST", "/api/auth/otp/generate", Some(&token), None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.get("otp").is_none());
    assert!(body["expiresAt"].is_string());
}

#[tokio::test]
async fn test_otp_verify_errors() {
    let app = TestApp::new();
    let (_, token) = app.open("ACCX", dec!(0)).await;

    let (status, body) = app
        .call("POST", "/api/auth/otp/verify", Some(&token), Some(json!({ "otp": "123456" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorCode"], "challenge_not_found");

    let (_, issued) = app.call("POST", "/api/auth/otp/generate", Some(&token), None).await;
    let code = issued["otp"].as_str().unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let (status, body) = app
        .call("POST", "/api/auth/otp/verify", Some(&token), Some(json!({ "otp": wrong })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], "challenge_mismatch");
}

#[tokio::test]
async fn test_expired_challenge_is_gone() {
    let mut config = Config::in_memory(common::SECRET);
    config.otp_expose_code = true;
    config.otp_ttl_seconds = 0;
    let app = TestApp::with_config(config);
    let (_, token) = app.open("ACCX", dec!(0)).await;

    let (_, issued) = app.call("POST", "/api/auth/otp/generate", Some(&token), None).await;
    let (status, body) = app
        .call("POST", "/api/auth/otp/verify", Some(&token), Some(json!({ "otp": issued["otp"] })))
        .await;

    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["errorCode"], "challenge_expired");
}

// =========================================================================
// Transfers
// =========================================================================

#[tokio::test]
async fn test_transfer_scenario() {
    let app = TestApp::new();
    let (x, token) = app.open("ACCX", dec!(1000)).await;
    let (y, _) = app.open("ACCY", dec!(500)).await;
    let grant = app.authorize(&token).await;

    let (status, body) = app
        .call_with(
            "POST",
            "/api/transactions/transfer",
            Some(&token),
            Some(json!({ "recipientAccount": "ACCY", "amount": 300, "description": "rent" })),
            &[("x-authorization-grant", grant)],
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["transferId"].is_string());
    assert_eq!(app.balance(x.id).await, dec!(700));
    assert_eq!(app.balance(y.id).await, dec!(800));

    let (status, history) = app.call("GET", "/api/transactions/history", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = history.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["direction"], "debit");
    assert_eq!(entries[0]["correlationId"], body["transferId"]);
    assert_eq!(entries[0]["memo"], "Transfer to Holder ACCY (ACCY): rent");
    assert_eq!(decimal(&entries[0]["amount"]), dec!(300));
}

#[tokio::test]
async fn test_transfer_uses_newest_grant_without_header() {
    let app = TestApp::new();
    let (_, token) = app.open("ACCX", dec!(100)).await;
    app.open("ACCY", dec!(0)).await;
    app.authorize(&token).await;

    let body = json!({ "recipientAccount": "ACCY", "amount": "10" });
    let (status, _) = app
        .call("POST", "/api/transactions/transfer", Some(&token), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);

    // The grant was spent by the first transfer
    let (status, response) = app
        .call("POST", "/api/transactions/transfer", Some(&token), Some(body))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(response["errorCode"], "authorization_required");
}

#[tokio::test]
async fn test_transfer_rejections() {
    let app = TestApp::new();
    let (_, token) = app.open("ACCX", dec!(100)).await;
    let grant = app.authorize(&token).await;
    let header = [("x-authorization-grant", grant)];

    let cases = [
        (json!({ "recipientAccount": "ACCX", "amount": "10" }), StatusCode::BAD_REQUEST, "self_transfer_not_allowed"),
        (json!({ "recipientAccount": "NOPE", "amount": "10" }), StatusCode::NOT_FOUND, "account_not_found"),
        (json!({ "recipientAccount": "ACCX", "amount": "-1" }), StatusCode::BAD_REQUEST, "invalid_amount"),
    ];

    for (body, expected, code) in cases {
        let (status, response) = app
            .call_with("POST", "/api/transactions/transfer", Some(&token), Some(body), &header)
            .await;
        assert_eq!(status, expected, "{code}");
        assert_eq!(response["errorCode"], code);
    }

    let (status, _) = app
        .call_with(
            "POST",
            "/api/transactions/transfer",
            Some(&token),
            Some(json!({ "recipientAccount": "ACCY", "amount": "10" })),
            &[("x-authorization-grant", "garbage".to_string())],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_international_transfer() {
    let app = TestApp::new();
    let (x, token) = app.open("ACCX", dec!(1000)).await;
    let grant = app.authorize(&token).await;

    let (status, body) = app
        .call_with(
            "POST",
            "/api/transactions/international",
            Some(&token),
            Some(json!({
                "recipientAccount": "GB29NWBK60161331926819",
                "amount": "10",
                "currency": "EUR",
                "swiftCode": "NWBKGB2L"
            })),
            &[("x-authorization-grant", grant)],
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(decimal(&body["debited"]), dec!(880));
    assert_eq!(app.balance(x.id).await, dec!(120));
}

// =========================================================================
// Bills
// =========================================================================

#[tokio::test]
async fn test_bill_payment_scenario() {
    let app = TestApp::new();
    let (x, token) = app.open("ACCX", dec!(50)).await;

    let (status, bill) = app
        .call(
            "POST",
            "/api/bills",
            Some(&token),
            Some(json!({ "billerName": "Power Co", "amount": "100", "dueDate": "2030-01-31" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(bill["category"], "Utilities");
    let bill_id = bill["id"].as_str().unwrap();

    let (status, body) = app
        .call("POST", &format!("/api/bills/pay/{bill_id}"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], "insufficient_funds");
    assert_eq!(app.balance(x.id).await, dec!(50));

    let (_, bills) = app.call("GET", "/api/bills", Some(&token), None).await;
    assert_eq!(bills[0]["status"], "unpaid");
}

#[tokio::test]
async fn test_bill_paid_twice_conflicts() {
    let app = TestApp::new();
    let (_, token) = app.open("ACCX", dec!(500)).await;
    let (_, bill) = app
        .call(
            "POST",
            "/api/bills",
            Some(&token),
            Some(json!({ "billerName": "Water", "amount": 40, "dueDate": "2030-01-31", "category": "Water" })),
        )
        .await;
    let uri = format!("/api/bills/pay/{}", bill["id"].as_str().unwrap());

    let (status, body) = app.call("POST", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["balance"]), dec!(460));

    let (status, body) = app.call("POST", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorCode"], "already_paid");

    let (_, spending) = app.call("GET", "/api/analytics/spending", Some(&token), None).await;
    assert_eq!(spending[0]["category"], "Water");
    assert_eq!(decimal(&spending[0]["total"]), dec!(40));
}

// =========================================================================
// Loans
// =========================================================================

async fn apply(app: &TestApp, token: &str, amount: &str) -> String {
    let (status, body) = app
        .call(
            "POST",
            "/api/loans/apply",
            Some(token),
            Some(json!({ "amount": amount, "reason": "working capital" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    body["loanId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_low_credit_score_scenario() {
    let app = TestApp::new();
    let (_, admin) = app.open_admin().await;
    let (_, token) = app
        .open_account(NewAccount::new("ACCX", "Risky").with_credit_score(300))
        .await;
    let loan_id = apply(&app, &token, "1000").await;

    let (status, body) = app
        .call("POST", &format!("/api/admin/loans/approve/{loan_id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errorCode"], "credit_score_too_low");

    let (_, loans) = app.call("GET", "/api/loans/my-loans", Some(&token), None).await;
    assert_eq!(loans[0]["status"], "pending");
}

#[tokio::test]
async fn test_loan_lifecycle_scenario() {
    let app = TestApp::new();
    let (_, admin) = app.open_admin().await;
    let (x, token) = app.open("ACCX", dec!(100)).await;
    let loan_id = apply(&app, &token, "1000").await;

    let (status, body) = app
        .call("POST", &format!("/api/admin/loans/approve/{loan_id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["loan"]["status"], "approved");
    assert_eq!(app.balance(x.id).await, dec!(1100));

    let (status, body) = app
        .call("POST", &format!("/api/admin/loans/collect/{loan_id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(decimal(&body["total"]), dec!(1050));
    assert_eq!(app.balance(x.id).await, dec!(50));

    let (_, loans) = app.call("GET", "/api/loans/my-loans", Some(&token), None).await;
    assert_eq!(loans[0]["status"], "paid");

    // Terminal
    let (status, body) = app
        .call("POST", &format!("/api/admin/loans/reject/{loan_id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorCode"], "invalid_transition");
}

#[tokio::test]
async fn test_admin_views() {
    let app = TestApp::new();
    let (_, admin) = app.open_admin().await;
    let (_, token) = app.open("ACCX", dec!(500)).await;
    app.open("ACCY", dec!(0)).await;
    apply(&app, &token, "200").await;

    let grant = app.authorize(&token).await;
    let (status, _) = app
        .call_with(
            "POST",
            "/api/transactions/transfer",
            Some(&token),
            Some(json!({ "recipientAccount": "ACCY", "amount": "25" })),
            &[("x-authorization-grant", grant)],
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, stats) = app.call("GET", "/api/admin/stats", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalUsers"], 3);
    assert_eq!(stats["totalTransactions"], 2);
    assert_eq!(stats["activeLoans"], 1);
    assert_eq!(decimal(&stats["totalDeposits"]), dec!(1000500));

    let (_, loans) = app.call("GET", "/api/admin/loans", Some(&admin), None).await;
    assert_eq!(loans[0]["holderName"], "Holder ACCX");

    let (status, feed) = app
        .call("GET", "/api/admin/transactions?limit=1", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feed.as_array().unwrap().len(), 1);
    assert!(feed[0]["holderName"].is_string());

    let (status, _) = app
        .call("GET", "/api/admin/transactions?limit=0", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_loan_application_without_reason() {
    let app = TestApp::new();
    let (_, token) = app.open("ACCX", dec!(0)).await;

    let (status, body) = app
        .call("POST", "/api/loans/apply", Some(&token), Some(json!({ "amount": "500" })))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, loans) = app.call("GET", "/api/loans/my-loans", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(loans[0]["reason"], "");
    assert_eq!(loans[0]["status"], "pending");
}
