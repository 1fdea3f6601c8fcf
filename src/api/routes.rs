//! API Routes
//!
//! HTTP endpoint definitions. Bodies are camelCase JSON.

use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    Bill, Caller, CategoryTotal, DomainError, FeedEntry, LedgerEntry, LedgerStats, Loan,
    LoanWithBorrower, OperationContext, Privileged, Role,
};
use crate::error::{AppError, AppResult};
use crate::handlers::{
    CreateBillCommand, InternationalTransferCommand, LoanApplicationCommand, TransferCommand,
};

use super::middleware::{auth_middleware, require_privileged};
use super::AppState;

/// Header carrying the step-up grant id for protected operations
pub const GRANT_HEADER: &str = "x-authorization-grant";

// =========================================================================
// Request/Response types
// =========================================================================

/// Monetary input accepted either as a JSON string or a JSON number
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    fn into_string(self) -> String {
        match self {
            AmountInput::Text(s) => s,
            AmountInput::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub recipient_account: String,
    pub amount: AmountInput,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub message: String,
    pub transfer_id: Uuid,
    pub balance: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternationalTransferRequest {
    pub recipient_account: String,
    pub amount: AmountInput,
    pub currency: String,
    pub swift_code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternationalTransferResponse {
    pub message: String,
    pub debited: Decimal,
    pub rate: Decimal,
    pub balance: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBillRequest {
    pub biller_name: String,
    pub amount: AmountInput,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillPaymentResponse {
    pub message: String,
    pub balance: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct LoanApplicationRequest {
    pub amount: AmountInput,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanApplicationResponse {
    pub message: String,
    pub loan_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanActionResponse {
    pub message: String,
    pub loan: Loan,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanCollectionResponse {
    pub message: String,
    pub loan: Loan,
    pub total: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub message: String,
    pub challenge_id: Uuid,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub otp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantResponse {
    pub message: String,
    pub grant_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: Uuid,
    pub account_number: String,
    pub holder_name: String,
    pub balance: Decimal,
    pub credit_score: i32,
    pub kyc_verified: bool,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Optional grant id from the request headers
fn grant_from_headers(headers: &HeaderMap) -> AppResult<Option<Uuid>> {
    headers
        .get(GRANT_HEADER)
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|s| Uuid::parse_str(s.trim()).ok())
                .ok_or_else(|| AppError::InvalidRequest(format!("Malformed {} header", GRANT_HEADER)))
        })
        .transpose()
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router. Every route requires a bearer token; `/admin`
/// routes additionally require the admin role.
pub fn create_router(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route("/loans", get(list_all_loans))
        .route("/loans/approve/:loan_id", post(approve_loan))
        .route("/loans/collect/:loan_id", post(collect_loan))
        .route("/loans/reject/:loan_id", post(reject_loan))
        .route("/stats", get(stats))
        .route("/transactions", get(transaction_feed))
        .layer(middleware::from_fn(require_privileged));

    Router::new()
        // Step-up authorization
        .route("/auth/otp/generate", post(generate_otp))
        .route("/auth/otp/verify", post(verify_otp))
        // Account
        .route("/account", get(account_summary))
        .route("/analytics/spending", get(spending))
        // Transactions
        .route("/transactions/transfer", post(transfer))
        .route("/transactions/international", post(international_transfer))
        .route("/transactions/history", get(history))
        // Bills
        .route("/bills", get(list_bills).post(create_bill))
        .route("/bills/pay/:bill_id", post(pay_bill))
        // Loans
        .route("/loans/apply", post(apply_loan))
        .route("/loans/my-loans", get(my_loans))
        .nest("/admin", admin)
        .layer(middleware::from_fn_with_state(state, auth_middleware))
}

// =========================================================================
// Step-up authorization
// =========================================================================

async fn generate_otp(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> AppResult<Json<ChallengeResponse>> {
    let issued = state.gate.issue_challenge(&caller).await?;

    Ok(Json(ChallengeResponse {
        message: "Verification code sent".to_string(),
        challenge_id: issued.challenge_id,
        expires_at: issued.expires_at,
        otp: issued.code,
    }))
}

async fn verify_otp(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<VerifyRequest>,
) -> AppResult<Json<GrantResponse>> {
    let grant = state.gate.verify(&caller, request.otp.trim()).await?;

    Ok(Json(GrantResponse {
        message: "Verification successful".to_string(),
        grant_id: grant.id,
        expires_at: grant.expires_at,
    }))
}

// =========================================================================
// Account
// =========================================================================

async fn account_summary(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> AppResult<Json<AccountSummary>> {
    let account = state
        .store
        .account(caller.account_id)
        .await?
        .ok_or_else(|| DomainError::AccountNotFound(caller.account_id.to_string()))?;

    Ok(Json(AccountSummary {
        id: account.id,
        account_number: account.account_number,
        holder_name: account.holder_name,
        balance: account.balance.value(),
        credit_score: account.credit_score,
        kyc_verified: account.kyc_verified,
        role: account.role,
        created_at: account.created_at,
    }))
}

/// Debit totals per category for the caller
async fn spending(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> AppResult<Json<Vec<CategoryTotal>>> {
    Ok(Json(state.store.spending_by_category(caller.account_id).await?))
}

// =========================================================================
// Transactions
// =========================================================================

async fn transfer(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Extension(context): Extension<OperationContext>,
    headers: HeaderMap,
    Json(request): Json<TransferRequest>,
) -> AppResult<Json<TransferResponse>> {
    let grant_id = grant_from_headers(&headers)?;

    let mut command = TransferCommand::new(request.recipient_account, request.amount.into_string());
    if let Some(description) = request.description {
        command = command.with_description(description);
    }

    let result = state
        .transfers
        .transfer_domestic(&caller, grant_id, command, &context)
        .await?;

    Ok(Json(TransferResponse {
        message: format!("Transfer of {} to {} successful", result.amount, result.recipient_account),
        transfer_id: result.transfer_id,
        balance: result.balance,
    }))
}

async fn international_transfer(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Extension(context): Extension<OperationContext>,
    headers: HeaderMap,
    Json(request): Json<InternationalTransferRequest>,
) -> AppResult<Json<InternationalTransferResponse>> {
    let grant_id = grant_from_headers(&headers)?;
    let command = InternationalTransferCommand::new(
        request.recipient_account,
        request.amount.into_string(),
        request.currency,
        request.swift_code,
    );

    let result = state
        .transfers
        .transfer_international(&caller, grant_id, command, &context)
        .await?;

    Ok(Json(InternationalTransferResponse {
        message: format!("International transfer in {} initiated", result.currency),
        debited: result.debited,
        rate: result.rate,
        balance: result.balance,
    }))
}

/// The caller's ledger entries, newest first
async fn history(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> AppResult<Json<Vec<LedgerEntry>>> {
    Ok(Json(state.store.history(caller.account_id).await?))
}

// =========================================================================
// Bills
// =========================================================================

async fn list_bills(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> AppResult<Json<Vec<Bill>>> {
    Ok(Json(state.bills.list(&caller).await?))
}

async fn create_bill(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<CreateBillRequest>,
) -> AppResult<(StatusCode, Json<Bill>)> {
    let mut command =
        CreateBillCommand::new(request.biller_name, request.amount.into_string(), request.due_date);
    if let Some(category) = request.category {
        command = command.with_category(category);
    }

    let bill = state.bills.create(&caller, command).await?;
    Ok((StatusCode::CREATED, Json(bill)))
}

async fn pay_bill(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Extension(context): Extension<OperationContext>,
    Path(bill_id): Path<Uuid>,
) -> AppResult<Json<BillPaymentResponse>> {
    let result = state.bills.pay(&caller, bill_id, &context).await?;

    Ok(Json(BillPaymentResponse {
        message: "Bill paid successfully".to_string(),
        balance: result.balance,
    }))
}

// =========================================================================
// Loans
// =========================================================================

async fn apply_loan(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<LoanApplicationRequest>,
) -> AppResult<(StatusCode, Json<LoanApplicationResponse>)> {
    let command = LoanApplicationCommand::new(request.amount.into_string(), request.reason);
    let loan = state.loans.apply(&caller, command).await?;

    Ok((
        StatusCode::CREATED,
        Json(LoanApplicationResponse {
            message: "Loan application submitted".to_string(),
            loan_id: loan.id,
        }),
    ))
}

async fn my_loans(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> AppResult<Json<Vec<Loan>>> {
    Ok(Json(state.loans.list_for(&caller).await?))
}

// =========================================================================
// Admin
// =========================================================================

async fn list_all_loans(
    State(state): State<AppState>,
    Extension(admin): Extension<Privileged>,
) -> AppResult<Json<Vec<LoanWithBorrower>>> {
    Ok(Json(state.loans.list_all(&admin).await?))
}

async fn approve_loan(
    State(state): State<AppState>,
    Extension(admin): Extension<Privileged>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<LoanActionResponse>> {
    let loan = state.loans.approve(&admin, loan_id, &context).await?;

    Ok(Json(LoanActionResponse {
        message: "Loan approved and funds disbursed".to_string(),
        loan,
    }))
}

async fn collect_loan(
    State(state): State<AppState>,
    Extension(admin): Extension<Privileged>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<LoanCollectionResponse>> {
    let result = state.loans.collect(&admin, loan_id, &context).await?;

    Ok(Json(LoanCollectionResponse {
        message: format!("Collected {} including interest", result.total),
        loan: result.loan,
        total: result.total,
    }))
}

async fn reject_loan(
    State(state): State<AppState>,
    Extension(admin): Extension<Privileged>,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<LoanActionResponse>> {
    let loan = state.loans.reject(&admin, loan_id).await?;

    Ok(Json(LoanActionResponse {
        message: "Loan rejected".to_string(),
        loan,
    }))
}

async fn stats(
    State(state): State<AppState>,
    Extension(_admin): Extension<Privileged>,
) -> AppResult<Json<LedgerStats>> {
    Ok(Json(state.store.stats().await?))
}

/// Global entry feed, newest first. Page size is capped by configuration.
async fn transaction_feed(
    State(state): State<AppState>,
    Extension(_admin): Extension<Privileged>,
    Query(query): Query<FeedQuery>,
) -> AppResult<Json<Vec<FeedEntry>>> {
    if query.limit < 1 || query.offset < 0 {
        return Err(AppError::InvalidRequest(
            "limit must be positive and offset non-negative".to_string(),
        ));
    }
    let limit = query.limit.min(state.config.admin_feed_max_limit);

    Ok(Json(state.store.feed(limit, query.offset).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_input_accepts_string_and_number() {
        let text: AmountInput = serde_json::from_str(r#""300.50""#).unwrap();
        let number: AmountInput = serde_json::from_str("300.5").unwrap();
        assert_eq!(text.into_string(), "300.50");
        assert_eq!(number.into_string(), "300.5");
    }

    #[test]
    fn test_grant_header_parsing() {
        let mut headers = HeaderMap::new();
        assert!(grant_from_headers(&headers).unwrap().is_none());

        let id = Uuid::new_v4();
        headers.insert(GRANT_HEADER, id.to_string().parse().unwrap());
        assert_eq!(grant_from_headers(&headers).unwrap(), Some(id));

        headers.insert(GRANT_HEADER, "not-a-uuid".parse().unwrap());
        assert!(matches!(grant_from_headers(&headers), Err(AppError::InvalidRequest(_))));
    }
}
