//! PostgreSQL ledger store
//!
//! A plan runs in one transaction: the accounts are locked with
//! `SELECT ... ORDER BY id FOR UPDATE`, every guard is an UPDATE whose
//! `WHERE` clause carries the expected state, and the transaction rolls back
//! when dropped on any early return.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use super::{next_balances, AppliedPlan, LedgerStore, StoreError};
use crate::domain::{
    Account, Amount, AuthorizationGrant, Balance, Bill, CategoryTotal, Challenge, FeedEntry,
    LedgerEntry, LedgerStats, Loan, LoanWithBorrower, NewAccount,
};
use crate::mutator::{MutationPlan, Transition};

const ACCOUNT_COLUMNS: &str = "id, account_number, holder_name, balance, credit_score, \
     kyc_verified, role, version, created_at";

const ENTRY_COLUMNS: &str =
    "id, sequence, account_id, direction, amount, category, memo, correlation_id, created_at";

const LOAN_COLUMNS: &str =
    "id, account_id, amount, reason, status, created_at, approved_at, collected_at, rejected_at";

const BILL_COLUMNS: &str = "id, account_id, biller_name, amount, due_date, status, category, paid_at";

const CHALLENGE_COLUMNS: &str = "id, account_id, code_hash, failed_attempts, issued_at, \
     expires_at, consumed_at, invalidated_at";

const GRANT_COLUMNS: &str = "id, account_id, challenge_id, issued_at, expires_at, consumed_at";

/// PostgreSQL-backed store
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Guarded transitions
    // =========================================================================

    /// Apply one guard inside the plan's transaction
    async fn apply_transition(
        tx: &mut Transaction<'_, Postgres>,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let rows_affected = match transition {
            Transition::SettleBill {
                bill_id,
                account_id,
            } => {
                sqlx::query(
                    r#"
                    UPDATE bills
                    SET status = 'paid', paid_at = $3
                    WHERE id = $1 AND account_id = $2 AND status = 'unpaid'
                    "#,
                )
                .bind(bill_id)
                .bind(account_id)
                .bind(now)
                .execute(&mut **tx)
                .await?
                .rows_affected()
            }
            Transition::AdvanceLoan {
                loan_id,
                account_id,
                from,
                to,
            } => {
                sqlx::query(
                    r#"
                    UPDATE loans
                    SET status = $4,
                        approved_at = CASE WHEN $4 = 'approved' THEN $5 ELSE approved_at END,
                        collected_at = CASE WHEN $4 = 'paid' THEN $5 ELSE collected_at END,
                        rejected_at = CASE WHEN $4 = 'rejected' THEN $5 ELSE rejected_at END
                    WHERE id = $1 AND account_id = $2 AND status = $3
                    "#,
                )
                .bind(loan_id)
                .bind(account_id)
                .bind(from.as_str())
                .bind(to.as_str())
                .bind(now)
                .execute(&mut **tx)
                .await?
                .rows_affected()
            }
            Transition::ConsumeGrant {
                grant_id,
                account_id,
            } => {
                sqlx::query(
                    r#"
                    UPDATE authorization_grants
                    SET consumed_at = $3
                    WHERE id = $1 AND account_id = $2
                      AND consumed_at IS NULL AND expires_at > $3
                    "#,
                )
                .bind(grant_id)
                .bind(account_id)
                .bind(now)
                .execute(&mut **tx)
                .await?
                .rows_affected()
            }
        };

        if rows_affected == 0 {
            return Err(StoreError::GuardRejected(transition.clone()));
        }
        Ok(())
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn parse<T: FromStr<Err = String>>(value: String) -> Result<T, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

fn amount(value: Decimal) -> Result<Amount, StoreError> {
    Amount::new(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    Ok(Account {
        id: row.try_get("id")?,
        account_number: row.try_get("account_number")?,
        holder_name: row.try_get("holder_name")?,
        balance: Balance::new(row.try_get("balance")?)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        credit_score: row.try_get("credit_score")?,
        kyc_verified: row.try_get("kyc_verified")?,
        role: parse(row.try_get("role")?)?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        sequence: row.try_get("sequence")?,
        account_id: row.try_get("account_id")?,
        direction: parse(row.try_get("direction")?)?,
        amount: amount(row.try_get("amount")?)?,
        category: row.try_get("category")?,
        memo: row.try_get("memo")?,
        correlation_id: row.try_get("correlation_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn loan_from_row(row: &PgRow) -> Result<Loan, StoreError> {
    Ok(Loan {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        amount: amount(row.try_get("amount")?)?,
        reason: row.try_get("reason")?,
        status: parse(row.try_get("status")?)?,
        created_at: row.try_get("created_at")?,
        approved_at: row.try_get("approved_at")?,
        collected_at: row.try_get("collected_at")?,
        rejected_at: row.try_get("rejected_at")?,
    })
}

fn bill_from_row(row: &PgRow) -> Result<Bill, StoreError> {
    Ok(Bill {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        biller_name: row.try_get("biller_name")?,
        amount: amount(row.try_get("amount")?)?,
        due_date: row.try_get("due_date")?,
        status: parse(row.try_get("status")?)?,
        category: row.try_get("category")?,
        paid_at: row.try_get("paid_at")?,
    })
}

fn challenge_from_row(row: &PgRow) -> Result<Challenge, StoreError> {
    Ok(Challenge {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        code_hash: row.try_get("code_hash")?,
        failed_attempts: row.try_get("failed_attempts")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        consumed_at: row.try_get("consumed_at")?,
        invalidated_at: row.try_get("invalidated_at")?,
    })
}

fn grant_from_row(row: &PgRow) -> Result<AuthorizationGrant, StoreError> {
    Ok(AuthorizationGrant {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        challenge_id: row.try_get("challenge_id")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        consumed_at: row.try_get("consumed_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn open_account(&self, new: NewAccount) -> Result<Account, StoreError> {
        let account = new.into_account(Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO accounts (id, account_number, holder_name, balance, credit_score,
                                  kyc_verified, role, version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(account.id)
        .bind(&account.account_number)
        .bind(&account.holder_name)
        .bind(account.balance.value())
        .bind(account.credit_score)
        .bind(account.kyc_verified)
        .bind(account.role.as_str())
        .bind(account.version)
        .bind(account.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(account),
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::DuplicateAccountNumber(account.account_number))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn account_by_number(&self, number: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_number = $1"
        ))
        .bind(number.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    // =========================================================================
    // Atomic unit
    // =========================================================================

    async fn apply_plan(&self, plan: &MutationPlan) -> Result<AppliedPlan, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let rows = sqlx::query(
            r#"
            SELECT id, balance FROM accounts
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(plan.lock_set().to_vec())
        .fetch_all(&mut *tx)
        .await?;

        let mut current = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.try_get("id")?;
            let balance = Balance::new(row.try_get("balance")?)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            current.push((id, balance));
        }

        for transition in plan.transitions() {
            Self::apply_transition(&mut tx, transition, now).await?;
        }

        let next = next_balances(plan, &current)?;

        for (account_id, balance) in &next {
            sqlx::query(
                r#"
                UPDATE accounts
                SET balance = $2, version = version + 1
                WHERE id = $1
                "#,
            )
            .bind(account_id)
            .bind(balance.value())
            .execute(&mut *tx)
            .await?;
        }

        let mut entries = Vec::with_capacity(plan.legs().len());
        for leg in plan.legs() {
            let id = Uuid::new_v4();
            let sequence: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO ledger_entries (id, account_id, direction, amount, category, memo,
                                            correlation_id, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING sequence
                "#,
            )
            .bind(id)
            .bind(leg.account_id)
            .bind(leg.direction.as_str())
            .bind(leg.amount.value())
            .bind(&leg.category)
            .bind(&leg.memo)
            .bind(plan.correlation_id())
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            entries.push(LedgerEntry {
                id,
                sequence,
                account_id: leg.account_id,
                direction: leg.direction,
                amount: leg.amount,
                category: leg.category.clone(),
                memo: leg.memo.clone(),
                correlation_id: plan.correlation_id(),
                created_at: now,
            });
        }

        tx.commit().await?;

        Ok(AppliedPlan {
            entries,
            balances: next,
        })
    }

    async fn history(&self, account_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = $1 \
             ORDER BY created_at DESC, sequence DESC"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn feed(&self, limit: i64, offset: i64) -> Result<Vec<FeedEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.sequence, e.account_id, e.direction, e.amount, e.category, e.memo,
                   e.correlation_id, e.created_at, a.holder_name
            FROM ledger_entries e
            JOIN accounts a ON a.id = e.account_id
            ORDER BY e.created_at DESC, e.sequence DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<FeedEntry, StoreError> {
                Ok(FeedEntry {
                    entry: entry_from_row(row)?,
                    holder_name: row.try_get("holder_name")?,
                })
            })
            .collect()
    }

    async fn stats(&self) -> Result<LedgerStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM accounts) AS total_users,
                (SELECT COALESCE(SUM(balance), 0) FROM accounts) AS total_deposits,
                (SELECT COUNT(*) FROM ledger_entries) AS total_transactions,
                (SELECT COUNT(*) FROM loans WHERE status IN ('pending', 'approved')) AS active_loans
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerStats {
            total_users: row.try_get("total_users")?,
            total_deposits: row.try_get("total_deposits")?,
            total_transactions: row.try_get("total_transactions")?,
            active_loans: row.try_get("active_loans")?,
        })
    }

    async fn spending_by_category(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<CategoryTotal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT category, SUM(amount) AS total
            FROM ledger_entries
            WHERE account_id = $1 AND direction = 'debit'
            GROUP BY category
            ORDER BY total DESC, category
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<CategoryTotal, StoreError> {
                Ok(CategoryTotal {
                    category: row.try_get("category")?,
                    total: row.try_get("total")?,
                })
            })
            .collect()
    }

    // =========================================================================
    // Loans
    // =========================================================================

    async fn insert_loan(&self, loan: &Loan) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO loans (id, account_id, amount, reason, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(loan.id)
        .bind(loan.account_id)
        .bind(loan.amount.value())
        .bind(&loan.reason)
        .bind(loan.status.as_str())
        .bind(loan.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn loan(&self, id: Uuid) -> Result<Option<Loan>, StoreError> {
        let row = sqlx::query(&format!("SELECT {LOAN_COLUMNS} FROM loans WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(loan_from_row).transpose()
    }

    async fn loans_for(&self, account_id: Uuid) -> Result<Vec<Loan>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans WHERE account_id = $1 ORDER BY created_at DESC"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(loan_from_row).collect()
    }

    async fn all_loans(&self) -> Result<Vec<LoanWithBorrower>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT l.id, l.account_id, l.amount, l.reason, l.status, l.created_at,
                   l.approved_at, l.collected_at, l.rejected_at,
                   a.holder_name, a.credit_score, a.balance AS borrower_balance
            FROM loans l
            JOIN accounts a ON a.id = l.account_id
            ORDER BY l.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<LoanWithBorrower, StoreError> {
                Ok(LoanWithBorrower {
                    loan: loan_from_row(row)?,
                    holder_name: row.try_get("holder_name")?,
                    credit_score: row.try_get("credit_score")?,
                    borrower_balance: row.try_get("borrower_balance")?,
                })
            })
            .collect()
    }

    async fn reject_loan(&self, loan_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET status = 'rejected', rejected_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(loan_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Bills
    // =========================================================================

    async fn insert_bill(&self, bill: &Bill) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bills (id, account_id, biller_name, amount, due_date, status, category)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(bill.id)
        .bind(bill.account_id)
        .bind(&bill.biller_name)
        .bind(bill.amount.value())
        .bind(bill.due_date)
        .bind(bill.status.as_str())
        .bind(&bill.category)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bill(&self, id: Uuid) -> Result<Option<Bill>, StoreError> {
        let row = sqlx::query(&format!("SELECT {BILL_COLUMNS} FROM bills WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(bill_from_row).transpose()
    }

    async fn bills_for(&self, account_id: Uuid) -> Result<Vec<Bill>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BILL_COLUMNS} FROM bills WHERE account_id = $1 ORDER BY due_date ASC"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bill_from_row).collect()
    }

    // =========================================================================
    // Step-up authorization
    // =========================================================================

    async fn replace_challenge(&self, challenge: &Challenge) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialize issuance per account until commit, so each issue sees
        // the previous one's row and invalidates it
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(challenge.account_id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE authorization_challenges
            SET invalidated_at = $2
            WHERE account_id = $1 AND consumed_at IS NULL AND invalidated_at IS NULL
            "#,
        )
        .bind(challenge.account_id)
        .bind(challenge.issued_at)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO authorization_challenges (id, account_id, code_hash, failed_attempts,
                                                  issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(challenge.id)
        .bind(challenge.account_id)
        .bind(&challenge.code_hash)
        .bind(challenge.failed_attempts)
        .bind(challenge.issued_at)
        .bind(challenge.expires_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StoreError::Conflict),
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        Ok(())
    }

    async fn active_challenge(&self, account_id: Uuid) -> Result<Option<Challenge>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM authorization_challenges \
             WHERE account_id = $1 AND consumed_at IS NULL AND invalidated_at IS NULL"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(challenge_from_row).transpose()
    }

    async fn record_failed_attempt(
        &self,
        challenge_id: Uuid,
        max_attempts: i32,
        at: DateTime<Utc>,
    ) -> Result<i32, StoreError> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE authorization_challenges
            SET failed_attempts = failed_attempts + 1,
                invalidated_at = CASE
                    WHEN failed_attempts + 1 >= $2 AND invalidated_at IS NULL THEN $3
                    ELSE invalidated_at
                END
            WHERE id = $1
            RETURNING failed_attempts
            "#,
        )
        .bind(challenge_id)
        .bind(max_attempts)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(attempts.unwrap_or(0))
    }

    async fn redeem_challenge(
        &self,
        challenge_id: Uuid,
        grant: &AuthorizationGrant,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query(
            r#"
            UPDATE authorization_challenges
            SET consumed_at = $2
            WHERE id = $1 AND consumed_at IS NULL AND invalidated_at IS NULL
            "#,
        )
        .bind(challenge_id)
        .bind(grant.issued_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if consumed == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO authorization_grants (id, account_id, challenge_id, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(grant.id)
        .bind(grant.account_id)
        .bind(grant.challenge_id)
        .bind(grant.issued_at)
        .bind(grant.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn grant(&self, id: Uuid) -> Result<Option<AuthorizationGrant>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {GRANT_COLUMNS} FROM authorization_grants WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(grant_from_row).transpose()
    }

    async fn latest_grant(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationGrant>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {GRANT_COLUMNS} FROM authorization_grants \
             WHERE account_id = $1 AND consumed_at IS NULL AND expires_at > $2 \
             ORDER BY issued_at DESC LIMIT 1"
        ))
        .bind(account_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(grant_from_row).transpose()
    }

    async fn purge_authorizations(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let challenges = sqlx::query(
            r#"
            DELETE FROM authorization_challenges
            WHERE issued_at < $1
              AND (consumed_at IS NOT NULL OR invalidated_at IS NOT NULL OR expires_at <= $1)
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let grants = sqlx::query(
            r#"
            DELETE FROM authorization_grants
            WHERE issued_at < $1 AND (consumed_at IS NOT NULL OR expires_at <= $1)
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(challenges + grants)
    }
}
