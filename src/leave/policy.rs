//! Per-leave-type rules: which types draw down a balance, which ones carry
//! a salary deduction, and who may take them.
//!
//! The two tables are independent; a type can be balance-managed without
//! touching salary and the other way around.

use std::collections::HashSet;

use strum::IntoEnumIterator;

use crate::error::{Error, Result};
use crate::model::{EmployeeProfile, Gender, LeaveType, MaritalStatus};

/// Types whose approved days are deducted from salary.
pub const SALARY_DEDUCTING: &[LeaveType] = &[LeaveType::Annual, LeaveType::Sick];

#[derive(Debug, Clone)]
pub struct LeavePolicy {
    balance_managed: HashSet<LeaveType>,
    salary_deducting: HashSet<LeaveType>,
    daily_rate: f64,
}

impl LeavePolicy {
    /// Every type draws down a balance; only `SALARY_DEDUCTING` types cost
    /// salary.
    pub fn new(daily_rate: f64) -> Self {
        Self::with_tables(
            LeaveType::iter(),
            SALARY_DEDUCTING.iter().copied(),
            daily_rate,
        )
    }

    pub fn with_tables(
        balance_managed: impl IntoIterator<Item = LeaveType>,
        salary_deducting: impl IntoIterator<Item = LeaveType>,
        daily_rate: f64,
    ) -> Self {
        Self {
            balance_managed: balance_managed.into_iter().collect(),
            salary_deducting: salary_deducting.into_iter().collect(),
            daily_rate,
        }
    }

    pub fn is_balance_managed(&self, leave_type: LeaveType) -> bool {
        self.balance_managed.contains(&leave_type)
    }

    pub fn is_salary_deducting(&self, leave_type: LeaveType) -> bool {
        self.salary_deducting.contains(&leave_type)
    }

    pub fn salary_deduction(&self, leave_type: LeaveType, days: u32) -> Option<f64> {
        self.is_salary_deducting(leave_type)
            .then(|| f64::from(days) * self.daily_rate)
    }

    /// Type-specific eligibility. Maternity needs a married female employee,
    /// paternity a married male one; everything else is open.
    pub fn check_eligibility(
        &self,
        leave_type: LeaveType,
        employee: &EmployeeProfile,
    ) -> Result<()> {
        let married = employee.marital_status == MaritalStatus::Married;
        match leave_type {
            LeaveType::Maternity if employee.gender != Gender::Female || !married => Err(
                Error::validation("maternity leave is only available to married female employees"),
            ),
            LeaveType::Paternity if employee.gender != Gender::Male || !married => Err(
                Error::validation("paternity leave is only available to married male employees"),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee(gender: Gender, marital_status: MaritalStatus) -> EmployeeProfile {
        EmployeeProfile {
            id: 1,
            name: "Sam Lee".to_string(),
            email: "sam@example.com".to_string(),
            gender,
            marital_status,
        }
    }

    #[test]
    fn managed_and_paid_are_independent() {
        let policy = LeavePolicy::new(150.0);

        for leave_type in [LeaveType::Annual, LeaveType::Sick] {
            assert!(policy.is_balance_managed(leave_type));
            assert!(policy.is_salary_deducting(leave_type));
        }
        for leave_type in [
            LeaveType::Maternity,
            LeaveType::Paternity,
            LeaveType::Unpaid,
            LeaveType::Personal,
            LeaveType::Casual,
        ] {
            assert!(policy.is_balance_managed(leave_type));
            assert!(!policy.is_salary_deducting(leave_type));
        }
    }

    #[test]
    fn custom_tables() {
        let policy = LeavePolicy::with_tables([LeaveType::Annual], [LeaveType::Unpaid], 10.0);
        assert!(!policy.is_balance_managed(LeaveType::Unpaid));
        assert_eq!(policy.salary_deduction(LeaveType::Unpaid, 2), Some(20.0));
        assert_eq!(policy.salary_deduction(LeaveType::Annual, 2), None);
    }

    #[test]
    fn deduction_is_days_times_rate() {
        let policy = LeavePolicy::new(150.0);
        assert_eq!(policy.salary_deduction(LeaveType::Annual, 3), Some(450.0));
        assert_eq!(policy.salary_deduction(LeaveType::Casual, 3), None);
    }

    #[test]
    fn maternity_eligibility() {
        let policy = LeavePolicy::new(0.0);
        assert!(
            policy
                .check_eligibility(
                    LeaveType::Maternity,
                    &employee(Gender::Female, MaritalStatus::Married)
                )
                .is_ok()
        );
        for (gender, status) in [
            (Gender::Female, MaritalStatus::Single),
            (Gender::Male, MaritalStatus::Married),
            (Gender::Other, MaritalStatus::Married),
        ] {
            let err = policy
                .check_eligibility(LeaveType::Maternity, &employee(gender, status))
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
    }

    #[test]
    fn paternity_eligibility() {
        let policy = LeavePolicy::new(0.0);
        assert!(
            policy
                .check_eligibility(
                    LeaveType::Paternity,
                    &employee(Gender::Male, MaritalStatus::Married)
                )
                .is_ok()
        );
        assert!(
            policy
                .check_eligibility(
                    LeaveType::Paternity,
                    &employee(Gender::Male, MaritalStatus::Divorced)
                )
                .is_err()
        );
        assert!(
            policy
                .check_eligibility(
                    LeaveType::Annual,
                    &employee(Gender::Other, MaritalStatus::Single)
                )
                .is_ok()
        );
    }
}
