//! Test orders and their payment/fulfillment state machine.
//!
//! ```text
//! ordered ─┬─> payment_pending ─┬─> payment_failed ──┐
//!          │                    └───────────────────>├─> ready_for_test ─> in_progress ─> completed
//!          └─────────────── (payment waived) ───────>┘
//!
//! any non-terminal state ─> cancelled
//! ```
//!
//! The transition methods are pure: they check the guard against the
//! in-memory order and either mutate it or return a [`TransitionError`]
//! leaving it untouched. Persisting the result as a compare-and-swap is the
//! caller's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Urgency of a test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Regular queue.
    #[default]
    Routine,
    /// Ahead of routine work.
    Urgent,
    /// Immediately.
    Stat,
}

/// Fulfillment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOrderStatus {
    /// Placed, payment not yet requested.
    Ordered,
    /// Awaiting payment.
    PaymentPending,
    /// The last payment attempt failed.
    PaymentFailed,
    /// Paid or waived, waiting for the department.
    ReadyForTest,
    /// Being performed.
    InProgress,
    /// Result uploaded. Terminal.
    Completed,
    /// Cancelled. Terminal.
    Cancelled,
}

impl TestOrderStatus {
    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TestOrderStatus::Ordered => "ordered",
            TestOrderStatus::PaymentPending => "payment_pending",
            TestOrderStatus::PaymentFailed => "payment_failed",
            TestOrderStatus::ReadyForTest => "ready_for_test",
            TestOrderStatus::InProgress => "in_progress",
            TestOrderStatus::Completed => "completed",
            TestOrderStatus::Cancelled => "cancelled",
        }
    }

    /// True for completed and cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestOrderStatus::Completed | TestOrderStatus::Cancelled)
    }
}

impl std::fmt::Display for TestOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Not paid yet.
    Pending,
    /// Paid.
    Paid,
    /// The last attempt failed.
    Failed,
    /// No payment required.
    Waived,
}

impl PaymentStatus {
    /// True when the test may be performed.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Waived)
    }
}

/// Payment details of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Whether the patient must pay before the test.
    pub required: bool,
    /// Payment status.
    pub status: PaymentStatus,
    /// Amount due.
    pub amount: f64,
    /// Payment method (card, cash, insurance, ...).
    #[serde(default)]
    pub method: Option<String>,
    /// External (simulated) payment reference.
    #[serde(default)]
    pub reference: Option<String>,
    /// Who recorded the payment.
    #[serde(default)]
    pub paid_by: Option<String>,
    /// When it was paid.
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    /// Why the last attempt failed.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// A rejected transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Payment is outstanding.
    #[error("Payment is required before the test can proceed")]
    PaymentRequired,

    /// The order's status does not allow the action.
    #[error("Cannot {action} a test order in status {status}")]
    InvalidState {
        /// The attempted action.
        action: &'static str,
        /// The order's current status.
        status: TestOrderStatus,
    },

    /// Payment has already been recorded.
    #[error("The test order is already paid")]
    AlreadyPaid,

    /// Payment was waived.
    #[error("The test order does not require payment")]
    PaymentNotRequired,
}

/// A test ordered by a doctor for a patient at a department.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOrder {
    /// Order ID.
    pub id: String,
    /// Patient.
    pub patient_id: String,
    /// Hospital of the ordering doctor and the department.
    pub hospital_id: String,
    /// Performing department.
    pub department_id: String,
    /// Ordering doctor.
    pub ordered_by: String,
    /// Related medical record.
    #[serde(default)]
    pub medical_record_id: Option<String>,
    /// Test name.
    pub test_name: String,
    /// Test code.
    #[serde(default)]
    pub test_code: Option<String>,
    /// Urgency.
    #[serde(default)]
    pub priority: Priority,
    /// Clinical notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Fulfillment status.
    pub status: TestOrderStatus,
    /// Payment details.
    pub payment: Payment,
    /// Who started the test.
    #[serde(default)]
    pub started_by: Option<String>,
    /// When the test was started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the result was uploaded.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// The uploaded result.
    #[serde(default)]
    pub result_id: Option<String>,
    /// Who uploaded the result.
    #[serde(default)]
    pub result_uploaded_by: Option<String>,
    /// Report file uploaded ahead of the result.
    #[serde(default)]
    pub result_file_url: Option<String>,
    /// Who cancelled the order.
    #[serde(default)]
    pub cancelled_by: Option<String>,
    /// When the order was cancelled.
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Why the order was cancelled.
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Fields of a new order.
#[derive(Debug, Clone)]
pub struct NewTestOrder {
    /// Patient.
    pub patient_id: String,
    /// Hospital.
    pub hospital_id: String,
    /// Department.
    pub department_id: String,
    /// Ordering doctor.
    pub ordered_by: String,
    /// Related medical record.
    pub medical_record_id: Option<String>,
    /// Test name.
    pub test_name: String,
    /// Test code.
    pub test_code: Option<String>,
    /// Urgency.
    pub priority: Priority,
    /// Clinical notes.
    pub notes: Option<String>,
    /// Whether payment is required.
    pub payment_required: bool,
    /// Amount due.
    pub amount: f64,
}

impl TestOrder {
    /// Places an order. It starts in `payment_pending` when payment is
    /// required and in `ready_for_test` otherwise.
    pub fn place(id: String, new: NewTestOrder, now: DateTime<Utc>) -> Self {
        let (status, payment_status) = if new.payment_required {
            (TestOrderStatus::PaymentPending, PaymentStatus::Pending)
        } else {
            (TestOrderStatus::ReadyForTest, PaymentStatus::Waived)
        };
        Self {
            id,
            patient_id: new.patient_id,
            hospital_id: new.hospital_id,
            department_id: new.department_id,
            ordered_by: new.ordered_by,
            medical_record_id: new.medical_record_id,
            test_name: new.test_name,
            test_code: new.test_code,
            priority: new.priority,
            notes: new.notes,
            status,
            payment: Payment {
                required: new.payment_required,
                status: payment_status,
                amount: new.amount,
                method: None,
                reference: None,
                paid_by: None,
                paid_at: None,
                failure_reason: None,
            },
            started_by: None,
            started_at: None,
            completed_at: None,
            result_id: None,
            result_uploaded_by: None,
            result_file_url: None,
            cancelled_by: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn invalid(&self, action: &'static str) -> TransitionError {
        TransitionError::InvalidState {
            action,
            status: self.status,
        }
    }

    /// True when a result may be uploaded.
    pub fn can_upload_result(&self) -> bool {
        self.payment.status.is_settled()
            && matches!(
                self.status,
                TestOrderStatus::ReadyForTest | TestOrderStatus::InProgress
            )
    }

    fn check_accepts_result(&self, action: &'static str) -> Result<(), TransitionError> {
        if !self.payment.status.is_settled() {
            return Err(TransitionError::PaymentRequired);
        }
        if !matches!(
            self.status,
            TestOrderStatus::ReadyForTest | TestOrderStatus::InProgress
        ) {
            return Err(self.invalid(action));
        }
        Ok(())
    }

    /// Records a payment. Advances the order to `ready_for_test` only when
    /// it was still waiting for payment; later states are never regressed.
    pub fn mark_paid(
        &mut self,
        method: String,
        reference: Option<String>,
        payer: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        match self.payment.status {
            PaymentStatus::Paid => return Err(TransitionError::AlreadyPaid),
            PaymentStatus::Waived => return Err(TransitionError::PaymentNotRequired),
            PaymentStatus::Pending | PaymentStatus::Failed => {}
        }
        if self.status == TestOrderStatus::Cancelled {
            return Err(self.invalid("pay"));
        }

        self.payment.status = PaymentStatus::Paid;
        self.payment.method = Some(method);
        self.payment.reference = reference;
        self.payment.paid_by = Some(payer.to_string());
        self.payment.paid_at = Some(now);
        self.payment.failure_reason = None;
        if matches!(
            self.status,
            TestOrderStatus::Ordered | TestOrderStatus::PaymentPending | TestOrderStatus::PaymentFailed
        ) {
            self.status = TestOrderStatus::ReadyForTest;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Records a failed payment attempt.
    pub fn mark_payment_failed(
        &mut self,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        match self.payment.status {
            PaymentStatus::Paid => return Err(TransitionError::AlreadyPaid),
            PaymentStatus::Waived => return Err(TransitionError::PaymentNotRequired),
            PaymentStatus::Pending | PaymentStatus::Failed => {}
        }
        if !matches!(
            self.status,
            TestOrderStatus::Ordered | TestOrderStatus::PaymentPending
        ) {
            return Err(self.invalid("fail payment of"));
        }

        self.payment.status = PaymentStatus::Failed;
        self.payment.failure_reason = reason;
        self.status = TestOrderStatus::PaymentFailed;
        self.updated_at = now;
        Ok(())
    }

    /// Moves a ready order into `in_progress`.
    pub fn start(&mut self, by: &str, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.payment.status.is_settled() {
            return Err(TransitionError::PaymentRequired);
        }
        if self.status != TestOrderStatus::ReadyForTest {
            return Err(self.invalid("start"));
        }

        self.status = TestOrderStatus::InProgress;
        self.started_by = Some(by.to_string());
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Stores the URL of an uploaded report file.
    pub fn attach_result_file(
        &mut self,
        url: String,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.check_accepts_result("attach a result file to")?;
        self.result_file_url = Some(url);
        self.updated_at = now;
        Ok(())
    }

    /// Completes the order with the given result.
    pub fn upload_result(
        &mut self,
        result_id: &str,
        uploader: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.check_accepts_result("upload a result for")?;

        self.status = TestOrderStatus::Completed;
        self.completed_at = Some(now);
        self.result_id = Some(result_id.to_string());
        self.result_uploaded_by = Some(uploader.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Cancels the order unless it is already completed or cancelled.
    pub fn cancel(
        &mut self,
        by: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.invalid("cancel"));
        }

        self.status = TestOrderStatus::Cancelled;
        self.cancelled_by = Some(by.to_string());
        self.cancelled_at = Some(now);
        self.cancellation_reason = reason;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(payment_required: bool) -> TestOrder {
        TestOrder::place(
            "o-1".to_string(),
            NewTestOrder {
                patient_id: "p-1".to_string(),
                hospital_id: "h-1".to_string(),
                department_id: "d-1".to_string(),
                ordered_by: "doc-1".to_string(),
                medical_record_id: None,
                test_name: "CBC".to_string(),
                test_code: None,
                priority: Priority::Routine,
                notes: None,
                payment_required,
                amount: 25.0,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_initial_state_follows_payment_requirement() {
        let paid = order(true);
        assert_eq!(paid.status, TestOrderStatus::PaymentPending);
        assert_eq!(paid.payment.status, PaymentStatus::Pending);

        let free = order(false);
        assert_eq!(free.status, TestOrderStatus::ReadyForTest);
        assert_eq!(free.payment.status, PaymentStatus::Waived);
    }

    #[test]
    fn test_full_paid_flow() {
        let now = Utc::now();
        let mut o = order(true);
        o.mark_paid("card".to_string(), Some("ref-1".to_string()), "p-1", now)
            .unwrap();
        assert_eq!(o.status, TestOrderStatus::ReadyForTest);
        o.start("staff-1", now).unwrap();
        assert_eq!(o.status, TestOrderStatus::InProgress);
        o.upload_result("r-1", "staff-1", now).unwrap();
        assert_eq!(o.status, TestOrderStatus::Completed);
        assert_eq!(o.result_uploaded_by.as_deref(), Some("staff-1"));
        assert!(o.completed_at.is_some());
    }

    #[test]
    fn test_mark_paid_twice_keeps_progress() {
        let now = Utc::now();
        let mut o = order(true);
        o.mark_paid("card".to_string(), None, "p-1", now).unwrap();
        o.start("staff-1", now).unwrap();

        let before = o.clone();
        let err = o.mark_paid("card".to_string(), None, "p-1", now).unwrap_err();
        assert_eq!(err, TransitionError::AlreadyPaid);
        assert_eq!(o, before);
        assert_eq!(o.status, TestOrderStatus::InProgress);
        assert_eq!(o.payment.status, PaymentStatus::Paid);
    }

    #[test]
    fn test_mark_paid_on_waived_order() {
        let mut o = order(false);
        let err = o
            .mark_paid("cash".to_string(), None, "p-1", Utc::now())
            .unwrap_err();
        assert_eq!(err, TransitionError::PaymentNotRequired);
    }

    #[test]
    fn test_payment_failed_then_recovered() {
        let now = Utc::now();
        let mut o = order(true);
        o.mark_payment_failed(Some("card declined".to_string()), now)
            .unwrap();
        assert_eq!(o.status, TestOrderStatus::PaymentFailed);
        assert_eq!(o.payment.status, PaymentStatus::Failed);

        assert_eq!(
            o.start("staff-1", now).unwrap_err(),
            TransitionError::PaymentRequired
        );

        o.mark_paid("card".to_string(), None, "p-1", now).unwrap();
        assert_eq!(o.status, TestOrderStatus::ReadyForTest);
        assert!(o.payment.failure_reason.is_none());
    }

    #[test]
    fn test_start_requires_payment() {
        let mut o = order(true);
        let before = o.clone();
        assert_eq!(
            o.start("staff-1", Utc::now()).unwrap_err(),
            TransitionError::PaymentRequired
        );
        assert_eq!(o, before);
    }

    #[test]
    fn test_start_twice_is_invalid_state() {
        let now = Utc::now();
        let mut o = order(false);
        o.start("staff-1", now).unwrap();
        assert!(matches!(
            o.start("staff-2", now).unwrap_err(),
            TransitionError::InvalidState {
                status: TestOrderStatus::InProgress,
                ..
            }
        ));
        assert_eq!(o.started_by.as_deref(), Some("staff-1"));
    }

    #[test]
    fn test_upload_result_guard_matrix() {
        let now = Utc::now();
        let statuses = [
            TestOrderStatus::Ordered,
            TestOrderStatus::PaymentPending,
            TestOrderStatus::PaymentFailed,
            TestOrderStatus::ReadyForTest,
            TestOrderStatus::InProgress,
            TestOrderStatus::Completed,
            TestOrderStatus::Cancelled,
        ];
        let payments = [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::Waived,
        ];

        for status in statuses {
            for payment in payments {
                let mut o = order(true);
                o.status = status;
                o.payment.status = payment;
                let before = o.clone();

                let expected_ok = payment.is_settled()
                    && matches!(
                        status,
                        TestOrderStatus::ReadyForTest | TestOrderStatus::InProgress
                    );
                assert_eq!(o.can_upload_result(), expected_ok);
                let result = o.upload_result("r-1", "staff-1", now);
                assert_eq!(result.is_ok(), expected_ok, "{status} / {payment:?}");
                if result.is_err() {
                    assert_eq!(o, before);
                }
            }
        }
    }

    #[test]
    fn test_cancel_rules() {
        let now = Utc::now();
        let mut o = order(true);
        o.cancel("doc-1", Some("wrong test".to_string()), now).unwrap();
        assert_eq!(o.status, TestOrderStatus::Cancelled);
        assert_eq!(o.cancelled_by.as_deref(), Some("doc-1"));

        assert!(o.cancel("doc-1", None, now).is_err());
        assert!(o.mark_paid("card".to_string(), None, "p-1", now).is_err());

        let mut done = order(false);
        done.upload_result("r-1", "staff-1", now).unwrap();
        let before = done.clone();
        assert!(done.cancel("doc-1", None, now).is_err());
        assert_eq!(done, before);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_value(TestOrderStatus::ReadyForTest).unwrap();
        assert_eq!(json, "ready_for_test");
    }
}
