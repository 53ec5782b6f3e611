//! Renders notification subject and body text. Pure and deterministic.

use chrono::NaiveDate;

use crate::model::{LeaveType, NotificationEvent};

/// Leave attributes interpolated into a message.
#[derive(Debug, Clone)]
pub struct MessageFields<'a> {
    pub employee_name: &'a str,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days_count: u32,
    pub reason: &'a str,
    pub notes: Option<&'a str>,
    pub salary_deduction: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

fn leave_label(leave_type: LeaveType) -> &'static str {
    match leave_type {
        LeaveType::Annual => "Annual",
        LeaveType::Sick => "Sick",
        LeaveType::Casual => "Casual",
        LeaveType::Personal => "Personal",
        LeaveType::Maternity => "Maternity",
        LeaveType::Paternity => "Paternity",
        LeaveType::Unpaid => "Unpaid",
    }
}

pub fn compose(
    event: NotificationEvent,
    leave_type: LeaveType,
    is_paid_leave: bool,
    fields: &MessageFields<'_>,
) -> RenderedMessage {
    let label = leave_label(leave_type);
    let period = format!("{} to {}", fields.start_date, fields.end_date);

    let (headline, outcome) = match event {
        NotificationEvent::LeaveSubmitted => (
            "Leave request received",
            "has been submitted and is awaiting approval",
        ),
        NotificationEvent::LeaveApproved => ("Leave approved", "has been approved"),
        NotificationEvent::LeaveRejected => ("Leave rejected", "has been rejected"),
        NotificationEvent::LeaveCancelled => ("Leave cancelled", "has been cancelled"),
    };

    let mut body = format!(
        "Hello {},\n\nYour {} leave request for {} working day(s) from {} {}.\n",
        fields.employee_name,
        label.to_lowercase(),
        fields.days_count,
        period,
        outcome,
    );

    match event {
        NotificationEvent::LeaveSubmitted => {
            body.push_str(&format!("\nReason: {}\n", fields.reason));
        }
        NotificationEvent::LeaveApproved if is_paid_leave => {
            body.push_str(&format!(
                "\nA salary deduction of {:.2} will be applied for this leave.\n",
                fields.salary_deduction.unwrap_or_default()
            ));
        }
        NotificationEvent::LeaveApproved => {
            body.push_str("\nThis leave does not affect your salary.\n");
        }
        NotificationEvent::LeaveRejected | NotificationEvent::LeaveCancelled => {}
    }

    if let Some(notes) = fields.notes.filter(|n| !n.trim().is_empty()) {
        body.push_str(&format!("\nNotes: {notes}\n"));
    }
    body.push_str("\nRegards,\nHR Team\n");

    RenderedMessage {
        subject: format!("{headline}: {label} leave ({period})"),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(
        notes: Option<&'static str>,
        salary_deduction: Option<f64>,
    ) -> MessageFields<'static> {
        MessageFields {
            employee_name: "Jane Doe",
            start_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 4).unwrap(),
            days_count: 3,
            reason: "family trip",
            notes,
            salary_deduction,
        }
    }

    #[test]
    fn submitted() {
        let message = compose(
            NotificationEvent::LeaveSubmitted,
            LeaveType::Annual,
            true,
            &fields(None, None),
        );
        assert_eq!(
            message.subject,
            "Leave request received: Annual leave (2026-03-02 to 2026-03-04)"
        );
        assert_eq!(
            message.body,
            "Hello Jane Doe,\n\n\
             Your annual leave request for 3 working day(s) from 2026-03-02 to 2026-03-04 \
             has been submitted and is awaiting approval.\n\
             \nReason: family trip\n\
             \nRegards,\nHR Team\n"
        );
    }

    #[test]
    fn approved_paid_variant() {
        let message = compose(
            NotificationEvent::LeaveApproved,
            LeaveType::Annual,
            true,
            &fields(Some("enjoy"), Some(450.0)),
        );
        assert_eq!(
            message.subject,
            "Leave approved: Annual leave (2026-03-02 to 2026-03-04)"
        );
        assert_eq!(
            message.body,
            "Hello Jane Doe,\n\n\
             Your annual leave request for 3 working day(s) from 2026-03-02 to 2026-03-04 \
             has been approved.\n\
             \nA salary deduction of 450.00 will be applied for this leave.\n\
             \nNotes: enjoy\n\
             \nRegards,\nHR Team\n"
        );
    }

    #[test]
    fn approved_unpaid_variant() {
        let message = compose(
            NotificationEvent::LeaveApproved,
            LeaveType::Maternity,
            false,
            &fields(None, None),
        );
        assert_eq!(
            message.subject,
            "Leave approved: Maternity leave (2026-03-02 to 2026-03-04)"
        );
        assert!(message.body.contains("has been approved.\n"));
        assert!(message.body.contains("This leave does not affect your salary."));
        assert!(!message.body.contains("salary deduction"));
    }

    #[test]
    fn rejected_carries_reason_as_notes() {
        let message = compose(
            NotificationEvent::LeaveRejected,
            LeaveType::Sick,
            true,
            &fields(Some("missing certificate"), None),
        );
        assert_eq!(
            message.body,
            "Hello Jane Doe,\n\n\
             Your sick leave request for 3 working day(s) from 2026-03-02 to 2026-03-04 \
             has been rejected.\n\
             \nNotes: missing certificate\n\
             \nRegards,\nHR Team\n"
        );
    }

    #[test]
    fn cancelled_ignores_blank_notes() {
        let message = compose(
            NotificationEvent::LeaveCancelled,
            LeaveType::Casual,
            false,
            &fields(Some("  "), None),
        );
        assert_eq!(
            message.subject,
            "Leave cancelled: Casual leave (2026-03-02 to 2026-03-04)"
        );
        assert!(!message.body.contains("Notes:"));
    }

    #[test]
    fn deterministic() {
        let a = compose(
            NotificationEvent::LeaveApproved,
            LeaveType::Sick,
            true,
            &fields(None, Some(12.5)),
        );
        let b = compose(
            NotificationEvent::LeaveApproved,
            LeaveType::Sick,
            true,
            &fields(None, Some(12.5)),
        );
        assert_eq!(a, b);
        assert!(a.body.contains("12.50"));
    }
}
