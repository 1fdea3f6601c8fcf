//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use retail_ledger::auth::TokenService;
use retail_ledger::domain::{Account, Balance, NewAccount, Role};
use retail_ledger::store::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use retail_ledger::{build_router, AppState, Config};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const SECRET: &str = "integration-test-secret";

/// Router over a fresh in-memory store with inline challenge codes
pub struct TestApp {
    pub app: Router,
    pub store: Arc<InMemoryLedgerStore>,
    pub tokens: TokenService,
}

impl TestApp {
    pub fn new() -> Self {
        let mut config = Config::in_memory(SECRET);
        config.otp_expose_code = true;
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let app = build_router(AppState::new(store.clone(), config));
        Self {
            app,
            store,
            tokens: TokenService::new(SECRET),
        }
    }

    /// Open an account and return it with a bearer token
    pub async fn open(&self, number: &str, balance: Decimal) -> (Account, String) {
        self.open_account(NewAccount::new(number, format!("Holder {number}")).with_balance(Balance::new(balance).unwrap()))
            .await
    }

    pub async fn open_admin(&self) -> (Account, String) {
        self.open_account(
            NewAccount::new("ADMIN001", "Bank Admin")
                .with_balance(Balance::new(Decimal::from(1_000_000)).unwrap())
                .with_role(Role::Admin)
                .verified(),
        )
        .await
    }

    pub async fn open_account(&self, new: NewAccount) -> (Account, String) {
        let account = self.store.open_account(new).await.unwrap();
        let token = self.tokens.issue(account.id, chrono::Duration::hours(1)).unwrap();
        (account, token)
    }

    pub async fn balance(&self, account_id: Uuid) -> Decimal {
        self.store.account(account_id).await.unwrap().unwrap().balance.value()
    }

    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.call_with(method, uri, token, body, &[]).await
    }

    pub async fn call_with(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        headers: &[(&str, String)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);

        let response = self.app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Run the challenge/verify flow and return the grant id
    pub async fn authorize(&self, token: &str) -> String {
        let (status, issued) = self.call("POST", "/api/auth/otp/generate", Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
        let otp = issued["otp"].as_str().unwrap().to_string();

        let (status, grant) = self
            .call(
                "POST",
                "/api/auth/otp/verify",
                Some(token),
                Some(serde_json::json!({ "otp": otp })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        grant["grantId"].as_str().unwrap().to_string()
    }
}

/// Decimal from a JSON string or number
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}

/// PostgreSQL store over `DATABASE_URL` with every ledger table emptied
pub async fn setup_pg_store() -> (PgLedgerStore, PgPool) {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query(
        "TRUNCATE TABLE authorization_grants, authorization_challenges, bills, loans, ledger_entries, accounts CASCADE",
    )
    .execute(&pool)
    .await
    .expect("Failed to clean up DB");

    (PgLedgerStore::new(pool.clone()), pool)
}
