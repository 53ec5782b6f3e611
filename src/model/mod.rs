pub mod employee;
pub mod leave_balance;
pub mod leave_request;
pub mod notification;

pub use employee::{EmployeeProfile, Gender, MaritalStatus};
pub use leave_balance::LeaveBalance;
pub use leave_request::{LeaveRequest, LeaveStatus, LeaveType, NewLeaveRequest};
pub use notification::{
    NewNotification, Notification, NotificationEvent, NotificationStatus, NotificationTask,
};
