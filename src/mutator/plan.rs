//! Mutation plans
//!
//! A plan is the full description of one atomic unit: balance legs, the
//! guarded record transitions that commit with them, and an optional
//! correlation id linking the legs of one logical transfer.

use rust_decimal::Decimal;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::{Amount, Direction, LoanStatus};

/// One signed balance delta and the ledger entry recording it
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub account_id: Uuid,
    pub direction: Direction,
    pub amount: Amount,
    pub category: String,
    pub memo: String,
}

impl Leg {
    pub fn signed_amount(&self) -> Decimal {
        self.direction.signed(&self.amount)
    }
}

/// Record state change committed in the same unit as the legs.
///
/// Each transition is a compare-and-set: the store rejects it when the
/// record is no longer in the expected state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    SettleBill {
        bill_id: Uuid,
        account_id: Uuid,
    },
    AdvanceLoan {
        loan_id: Uuid,
        account_id: Uuid,
        from: LoanStatus,
        to: LoanStatus,
    },
    ConsumeGrant {
        grant_id: Uuid,
        account_id: Uuid,
    },
}

impl Transition {
    pub fn account_id(&self) -> Uuid {
        match self {
            Transition::SettleBill { account_id, .. }
            | Transition::AdvanceLoan { account_id, .. }
            | Transition::ConsumeGrant { account_id, .. } => *account_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("Plan has no balance legs")]
    Empty,

    #[error("Correlated legs do not balance (net {0})")]
    Unbalanced(Decimal),

    #[error("Transition targets account {0} outside the plan")]
    ForeignTransition(Uuid),

    #[error("Loan cannot move from {from} to {to}")]
    IllegalLoanTransition { from: LoanStatus, to: LoanStatus },
}

/// Validated plan. Only constructible through [`PlanBuilder::build`].
#[derive(Debug, Clone)]
pub struct MutationPlan {
    legs: Vec<Leg>,
    transitions: Vec<Transition>,
    correlation_id: Option<Uuid>,
    lock_set: Vec<Uuid>,
}

impl MutationPlan {
    pub fn builder() -> PlanBuilder {
        PlanBuilder::default()
    }

    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    /// Distinct account ids touched by the plan, ascending.
    /// Stores must lock in exactly this order.
    pub fn lock_set(&self) -> &[Uuid] {
        &self.lock_set
    }

    /// Net delta per account, in lock order
    pub fn net_deltas(&self) -> Vec<(Uuid, Decimal)> {
        self.lock_set
            .iter()
            .map(|id| {
                let net = self
                    .legs
                    .iter()
                    .filter(|leg| leg.account_id == *id)
                    .map(Leg::signed_amount)
                    .sum();
                (*id, net)
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct PlanBuilder {
    legs: Vec<Leg>,
    transitions: Vec<Transition>,
    correlation_id: Option<Uuid>,
}

impl PlanBuilder {
    pub fn credit(
        self,
        account_id: Uuid,
        amount: Amount,
        category: impl Into<String>,
        memo: impl Into<String>,
    ) -> Self {
        self.leg(account_id, Direction::Credit, amount, category, memo)
    }

    pub fn debit(
        self,
        account_id: Uuid,
        amount: Amount,
        category: impl Into<String>,
        memo: impl Into<String>,
    ) -> Self {
        self.leg(account_id, Direction::Debit, amount, category, memo)
    }

    fn leg(
        mut self,
        account_id: Uuid,
        direction: Direction,
        amount: Amount,
        category: impl Into<String>,
        memo: impl Into<String>,
    ) -> Self {
        self.legs.push(Leg {
            account_id,
            direction,
            amount,
            category: category.into(),
            memo: memo.into(),
        });
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Consume a step-up grant in the same unit
    pub fn consume_grant(self, grant_id: Uuid, account_id: Uuid) -> Self {
        self.transition(Transition::ConsumeGrant {
            grant_id,
            account_id,
        })
    }

    /// Mark the legs as one logical transfer. Correlated legs must net to zero.
    pub fn correlated(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn build(self) -> Result<MutationPlan, PlanError> {
        if self.legs.is_empty() {
            return Err(PlanError::Empty);
        }

        if self.correlation_id.is_some() {
            let net: Decimal = self.legs.iter().map(Leg::signed_amount).sum();
            if !net.is_zero() {
                return Err(PlanError::Unbalanced(net));
            }
        }

        let lock_set: Vec<Uuid> = self
            .legs
            .iter()
            .map(|leg| leg.account_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        for transition in &self.transitions {
            if lock_set.binary_search(&transition.account_id()).is_err() {
                return Err(PlanError::ForeignTransition(transition.account_id()));
            }
            if let Transition::AdvanceLoan { from, to, .. } = transition {
                if !from.can_transition_to(*to) {
                    return Err(PlanError::IllegalLoanTransition {
                        from: *from,
                        to: *to,
                    });
                }
            }
        }

        Ok(MutationPlan {
            legs: self.legs,
            transitions: self.transitions,
            correlation_id: self.correlation_id,
            lock_set,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert!(matches!(MutationPlan::builder().build(), Err(PlanError::Empty)));
    }

    #[test]
    fn test_lock_set_sorted_and_unique() {
        let a = Uuid::from_u128(3);
        let b = Uuid::from_u128(1);
        let plan = MutationPlan::builder()
            .debit(a, amount(dec!(10)), "Transfer", "out")
            .credit(b, amount(dec!(10)), "Transfer", "in")
            .debit(a, amount(dec!(1)), "Fee", "fee")
            .build()
            .unwrap();

        assert_eq!(plan.lock_set(), &[b, a]);
        assert_eq!(plan.net_deltas(), vec![(b, dec!(10)), (a, dec!(-11))]);
    }

    #[test]
    fn test_correlated_legs_must_balance() {
        let result = MutationPlan::builder()
            .debit(Uuid::new_v4(), amount(dec!(10)), "Transfer", "out")
            .credit(Uuid::new_v4(), amount(dec!(9.99)), "Transfer", "in")
            .correlated(Uuid::new_v4())
            .build();

        assert!(matches!(result, Err(PlanError::Unbalanced(net)) if net == dec!(-0.01)));
    }

    #[test]
    fn test_transition_outside_lock_set_rejected() {
        let result = MutationPlan::builder()
            .debit(Uuid::new_v4(), amount(dec!(10)), "Utilities", "Bill Payment: Power")
            .consume_grant(Uuid::new_v4(), Uuid::new_v4())
            .build();

        assert!(matches!(result, Err(PlanError::ForeignTransition(_))));
    }

    #[test]
    fn test_illegal_loan_transition_rejected() {
        let borrower = Uuid::new_v4();
        let result = MutationPlan::builder()
            .credit(borrower, amount(dec!(500)), "Loan", "Loan Disbursed")
            .transition(Transition::AdvanceLoan {
                loan_id: Uuid::new_v4(),
                account_id: borrower,
                from: LoanStatus::Pending,
                to: LoanStatus::Paid,
            })
            .build();

        assert!(matches!(result, Err(PlanError::IllegalLoanTransition { .. })));
    }
}
