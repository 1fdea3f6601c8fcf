//! In-memory ledger store
//!
//! Each account sits behind its own `tokio::sync::Mutex`; a plan locks its
//! accounts in ascending id order, so operations on one account serialize
//! while disjoint accounts run in parallel. Every write happens after the
//! last await point, so a cancelled call leaves nothing behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{next_balances, AppliedPlan, LedgerStore, StoreError};
use crate::domain::ledger::sort_newest_first;
use crate::domain::{
    Account, AuthorizationGrant, Balance, Bill, BillStatus, CategoryTotal, Challenge, Direction,
    FeedEntry, LedgerEntry, LedgerStats, Loan, LoanStatus, LoanWithBorrower, NewAccount,
};
use crate::mutator::{MutationPlan, Transition};

#[derive(Default)]
struct Tables {
    numbers: HashMap<String, Uuid>,
    holders: HashMap<Uuid, String>,
    entries: Vec<LedgerEntry>,
    next_sequence: i64,
    loans: HashMap<Uuid, Loan>,
    bills: HashMap<Uuid, Bill>,
    challenges: HashMap<Uuid, Challenge>,
    grants: HashMap<Uuid, AuthorizationGrant>,
}

/// Record state staged by a passing guard, written on commit
enum Staged {
    Bill(Bill),
    Loan(Loan),
    Grant(AuthorizationGrant),
}

/// Thread-safe in-memory store. Cloning shares the same state.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    accounts: Arc<RwLock<HashMap<Uuid, Arc<Mutex<Account>>>>>,
    tables: Arc<StdMutex<Tables>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<StdMutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("ledger tables lock poisoned".to_string()))
    }

    async fn handle(&self, id: Uuid) -> Option<Arc<Mutex<Account>>> {
        self.accounts.read().await.get(&id).cloned()
    }

    async fn snapshot(&self, id: Uuid) -> Option<Account> {
        match self.handle(id).await {
            Some(handle) => Some(handle.lock().await.clone()),
            None => None,
        }
    }

    /// Every account handle in ascending id order, the plan lock order
    async fn all_handles(&self) -> Vec<Arc<Mutex<Account>>> {
        let accounts = self.accounts.read().await;
        let mut ids: Vec<Uuid> = accounts.keys().copied().collect();
        ids.sort();
        ids.iter().filter_map(|id| accounts.get(id).cloned()).collect()
    }
}

fn stage(tables: &Tables, transition: &Transition, now: DateTime<Utc>) -> Option<Staged> {
    match transition {
        Transition::SettleBill {
            bill_id,
            account_id,
        } => {
            let bill = tables.bills.get(bill_id)?;
            if bill.account_id != *account_id || bill.is_paid() {
                return None;
            }
            let mut bill = bill.clone();
            bill.status = BillStatus::Paid;
            bill.paid_at = Some(now);
            Some(Staged::Bill(bill))
        }
        Transition::AdvanceLoan {
            loan_id,
            account_id,
            from,
            to,
        } => {
            let loan = tables.loans.get(loan_id)?;
            if loan.account_id != *account_id || loan.status != *from {
                return None;
            }
            loan.clone().transition(*to, now).ok().map(Staged::Loan)
        }
        Transition::ConsumeGrant {
            grant_id,
            account_id,
        } => {
            let grant = tables.grants.get(grant_id)?;
            if !grant.is_usable_by(*account_id, now) {
                return None;
            }
            let mut grant = grant.clone();
            grant.consumed_at = Some(now);
            Some(Staged::Grant(grant))
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn open_account(&self, new: NewAccount) -> Result<Account, StoreError> {
        let account = new.into_account(Utc::now());
        {
            let mut tables = self.tables()?;
            if tables.numbers.contains_key(&account.account_number) {
                return Err(StoreError::DuplicateAccountNumber(account.account_number));
            }
            tables
                .numbers
                .insert(account.account_number.clone(), account.id);
            tables
                .holders
                .insert(account.id, account.holder_name.clone());
        }

        self.accounts
            .write()
            .await
            .insert(account.id, Arc::new(Mutex::new(account.clone())));
        Ok(account)
    }

    async fn account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.snapshot(id).await)
    }

    async fn account_by_number(&self, number: &str) -> Result<Option<Account>, StoreError> {
        let id = self.tables()?.numbers.get(number.trim()).copied();
        match id {
            Some(id) => Ok(self.snapshot(id).await),
            None => Ok(None),
        }
    }

    async fn apply_plan(&self, plan: &MutationPlan) -> Result<AppliedPlan, StoreError> {
        let handles = {
            let accounts = self.accounts.read().await;
            plan.lock_set()
                .iter()
                .map(|id| {
                    accounts
                        .get(id)
                        .cloned()
                        .ok_or(StoreError::AccountNotFound(*id))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut guards = Vec::with_capacity(handles.len());
        for handle in &handles {
            guards.push(handle.lock().await);
        }

        // No await past this point
        let now = Utc::now();
        let mut tables = self.tables()?;

        let mut staged = Vec::with_capacity(plan.transitions().len());
        for transition in plan.transitions() {
            let record = stage(&tables, transition, now)
                .ok_or_else(|| StoreError::GuardRejected(transition.clone()))?;
            staged.push(record);
        }

        let current: Vec<(Uuid, Balance)> = guards.iter().map(|a| (a.id, a.balance)).collect();
        let next = next_balances(plan, &current)?;

        for record in staged {
            match record {
                Staged::Bill(bill) => {
                    tables.bills.insert(bill.id, bill);
                }
                Staged::Loan(loan) => {
                    tables.loans.insert(loan.id, loan);
                }
                Staged::Grant(grant) => {
                    tables.grants.insert(grant.id, grant);
                }
            }
        }

        for guard in guards.iter_mut() {
            if let Some((_, balance)) = next.iter().find(|(id, _)| *id == guard.id) {
                guard.balance = *balance;
                guard.version += 1;
            }
        }

        let mut entries = Vec::with_capacity(plan.legs().len());
        for leg in plan.legs() {
            tables.next_sequence += 1;
            let entry = LedgerEntry {
                id: Uuid::new_v4(),
                sequence: tables.next_sequence,
                account_id: leg.account_id,
                direction: leg.direction,
                amount: leg.amount,
                category: leg.category.clone(),
                memo: leg.memo.clone(),
                correlation_id: plan.correlation_id(),
                created_at: now,
            };
            tables.entries.push(entry.clone());
            entries.push(entry);
        }

        Ok(AppliedPlan {
            entries,
            balances: next,
        })
    }

    async fn history(&self, account_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut entries: Vec<LedgerEntry> = self
            .tables()?
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    async fn feed(&self, limit: i64, offset: i64) -> Result<Vec<FeedEntry>, StoreError> {
        let tables = self.tables()?;
        let mut entries = tables.entries.clone();
        sort_newest_first(&mut entries);

        Ok(entries
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|entry| FeedEntry {
                holder_name: tables
                    .holders
                    .get(&entry.account_id)
                    .cloned()
                    .unwrap_or_default(),
                entry,
            })
            .collect())
    }

    async fn stats(&self) -> Result<LedgerStats, StoreError> {
        // Hold every account at once so no plan is seen half-applied
        let handles = self.all_handles().await;
        let mut guards = Vec::with_capacity(handles.len());
        for handle in &handles {
            guards.push(handle.lock().await);
        }
        let total_deposits: Decimal = guards.iter().map(|a| a.balance.value()).sum();

        let tables = self.tables()?;
        Ok(LedgerStats {
            total_users: handles.len() as i64,
            total_deposits,
            total_transactions: tables.entries.len() as i64,
            active_loans: tables
                .loans
                .values()
                .filter(|l| l.status.is_active())
                .count() as i64,
        })
    }

    async fn spending_by_category(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<CategoryTotal>, StoreError> {
        let tables = self.tables()?;
        let mut totals: HashMap<&str, Decimal> = HashMap::new();
        for entry in tables
            .entries
            .iter()
            .filter(|e| e.account_id == account_id && e.direction == Direction::Debit)
        {
            *totals.entry(entry.category.as_str()).or_default() += entry.amount.value();
        }

        let mut totals: Vec<CategoryTotal> = totals
            .into_iter()
            .map(|(category, total)| CategoryTotal {
                category: category.to_string(),
                total,
            })
            .collect();
        totals.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.category.cmp(&b.category)));
        Ok(totals)
    }

    async fn insert_loan(&self, loan: &Loan) -> Result<(), StoreError> {
        if !self.accounts.read().await.contains_key(&loan.account_id) {
            return Err(StoreError::AccountNotFound(loan.account_id));
        }
        self.tables()?.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn loan(&self, id: Uuid) -> Result<Option<Loan>, StoreError> {
        Ok(self.tables()?.loans.get(&id).cloned())
    }

    async fn loans_for(&self, account_id: Uuid) -> Result<Vec<Loan>, StoreError> {
        let mut loans: Vec<Loan> = self
            .tables()?
            .loans
            .values()
            .filter(|l| l.account_id == account_id)
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(loans)
    }

    async fn all_loans(&self) -> Result<Vec<LoanWithBorrower>, StoreError> {
        let mut loans: Vec<Loan> = self.tables()?.loans.values().cloned().collect();
        loans.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut joined = Vec::with_capacity(loans.len());
        for loan in loans {
            let borrower = self
                .snapshot(loan.account_id)
                .await
                .ok_or(StoreError::AccountNotFound(loan.account_id))?;
            joined.push(LoanWithBorrower {
                loan,
                holder_name: borrower.holder_name,
                credit_score: borrower.credit_score,
                borrower_balance: borrower.balance.value(),
            });
        }
        Ok(joined)
    }

    async fn reject_loan(&self, loan_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.tables()?;
        let Some(loan) = tables.loans.get(&loan_id) else {
            return Ok(false);
        };
        match loan.clone().transition(LoanStatus::Rejected, at) {
            Ok(rejected) => {
                tables.loans.insert(loan_id, rejected);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn insert_bill(&self, bill: &Bill) -> Result<(), StoreError> {
        if !self.accounts.read().await.contains_key(&bill.account_id) {
            return Err(StoreError::AccountNotFound(bill.account_id));
        }
        self.tables()?.bills.insert(bill.id, bill.clone());
        Ok(())
    }

    async fn bill(&self, id: Uuid) -> Result<Option<Bill>, StoreError> {
        Ok(self.tables()?.bills.get(&id).cloned())
    }

    async fn bills_for(&self, account_id: Uuid) -> Result<Vec<Bill>, StoreError> {
        let mut bills: Vec<Bill> = self
            .tables()?
            .bills
            .values()
            .filter(|b| b.account_id == account_id)
            .cloned()
            .collect();
        bills.sort_by(|a, b| a.due_date.cmp(&b.due_date));
        Ok(bills)
    }

    async fn replace_challenge(&self, challenge: &Challenge) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        for existing in tables.challenges.values_mut() {
            if existing.account_id == challenge.account_id && existing.is_active() {
                existing.invalidated_at = Some(challenge.issued_at);
            }
        }
        tables.challenges.insert(challenge.id, challenge.clone());
        Ok(())
    }

    async fn active_challenge(&self, account_id: Uuid) -> Result<Option<Challenge>, StoreError> {
        Ok(self
            .tables()?
            .challenges
            .values()
            .filter(|c| c.account_id == account_id && c.is_active())
            .max_by_key(|c| c.issued_at)
            .cloned())
    }

    async fn record_failed_attempt(
        &self,
        challenge_id: Uuid,
        max_attempts: i32,
        at: DateTime<Utc>,
    ) -> Result<i32, StoreError> {
        let mut tables = self.tables()?;
        let Some(challenge) = tables.challenges.get_mut(&challenge_id) else {
            return Ok(0);
        };
        challenge.failed_attempts += 1;
        if challenge.failed_attempts >= max_attempts && challenge.invalidated_at.is_none() {
            challenge.invalidated_at = Some(at);
        }
        Ok(challenge.failed_attempts)
    }

    async fn redeem_challenge(
        &self,
        challenge_id: Uuid,
        grant: &AuthorizationGrant,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables()?;
        match tables.challenges.get_mut(&challenge_id) {
            Some(challenge) if challenge.is_active() => {
                challenge.consumed_at = Some(grant.issued_at);
            }
            _ => return Ok(false),
        }
        tables.grants.insert(grant.id, grant.clone());
        Ok(true)
    }

    async fn grant(&self, id: Uuid) -> Result<Option<AuthorizationGrant>, StoreError> {
        Ok(self.tables()?.grants.get(&id).cloned())
    }

    async fn latest_grant(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationGrant>, StoreError> {
        Ok(self
            .tables()?
            .grants
            .values()
            .filter(|g| g.is_usable_by(account_id, now))
            .max_by_key(|g| g.issued_at)
            .cloned())
    }

    async fn purge_authorizations(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables()?;
        let challenges = tables.challenges.len();
        let grants = tables.grants.len();

        tables
            .challenges
            .retain(|_, c| c.issued_at >= before || (c.is_active() && c.expires_at > before));
        tables
            .grants
            .retain(|_, g| g.issued_at >= before || (g.consumed_at.is_none() && g.expires_at > before));

        Ok((challenges - tables.challenges.len() + grants - tables.grants.len()) as u64)
    }
}
