use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::leave_request::LeaveType;

/// Remaining days for one (employee, leave type) pair. Never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveBalance {
    pub employee_id: u64,
    pub leave_type: LeaveType,
    pub balance: u32,
    pub updated_at: DateTime<Utc>,
}
