//! TestOrder lifecycle service.
//!
//! Loads an order, checks who may act on it, applies the pure transition
//! from [`crate::domain::test_order`] and writes the result back as a
//! compare-and-swap on the version that was read. Two requests racing on
//! the same order cannot both succeed: the loser gets a
//! `concurrent_modification` conflict and the order keeps the winner's state.

use std::sync::Arc;

use carenet_persistence::types::{Pagination, SortOrder};
use carenet_persistence::{BlobMetadata, BlobStore, DocumentStore};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::access::{
    Authorizer, ReadAccess, ResourceKind, Target, WriteAction, owning_hospital,
};
use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::directory::department_operational;
use crate::domain::{
    Department, NewTestOrder, Priority, ResultValue, Role, TestOrder, TestOrderStatus, TestResult,
    TransitionError, User, new_id,
};
use crate::error::{DenyReason, RestError, RestResult};
use crate::records::DownloadLink;
use crate::repository::{Repository, Versioned, query};
use crate::sharing::GrantLookup;
use crate::uploads::Upload;

/// Test order creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTestOrder {
    /// The patient.
    pub patient_id: String,
    /// Performing department.
    pub department_id: String,
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
    /// Related medical record.
    #[serde(default)]
    pub medical_record_id: Option<String>,
    /// Whether payment is required; defaults to true.
    #[serde(default)]
    pub payment_required: Option<bool>,
    /// Amount due; defaults to the department's price for the test.
    #[serde(default)]
    pub amount: Option<f64>,
}

/// Payment confirmation.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkPaid {
    /// Payment method (cash, card, insurance, ...).
    pub method: String,
    /// External payment reference.
    #[serde(default)]
    pub reference: Option<String>,
}

/// Failed payment report.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentFailure {
    /// Why the payment failed.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Result upload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResult {
    /// Summary or conclusion.
    #[serde(default)]
    pub summary: Option<String>,
    /// Measured values.
    #[serde(default)]
    pub values: Vec<ResultValue>,
    /// Notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Cancellation request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelOrder {
    /// Why the order is cancelled.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Queue filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueFilter {
    /// Only orders in this status.
    #[serde(default)]
    pub status: Option<TestOrderStatus>,
}

/// Department staff of the order's own department.
fn fulfiller(actor: &User, order: &TestOrder) -> Result<(), DenyReason> {
    if actor.role != Role::DepartmentStaff {
        return Err(DenyReason::InsufficientRole);
    }
    if actor.department_id.as_deref() != Some(order.department_id.as_str()) {
        return Err(DenyReason::WrongDepartment);
    }
    Ok(())
}

/// The patient, department staff of the department, or a hospital admin.
fn payer(actor: &User, order: &TestOrder) -> Result<(), DenyReason> {
    match actor.role {
        Role::Patient if actor.id == order.patient_id => Ok(()),
        Role::Patient => Err(DenyReason::NotOwnData),
        Role::DepartmentStaff => fulfiller(actor, order),
        Role::HospitalAdmin if actor.hospital_id.as_deref() == Some(order.hospital_id.as_str()) => {
            Ok(())
        }
        Role::HospitalAdmin => Err(DenyReason::OtherTenant),
        _ => Err(DenyReason::InsufficientRole),
    }
}

/// The ordering doctor or a hospital admin of the owning hospital.
fn canceller(actor: &User, order: &TestOrder) -> Result<(), DenyReason> {
    let same_hospital = actor.hospital_id.as_deref() == Some(order.hospital_id.as_str());
    match actor.role {
        Role::Doctor if actor.id == order.ordered_by => Ok(()),
        Role::HospitalAdmin if same_hospital => Ok(()),
        Role::HospitalAdmin => Err(DenyReason::OtherTenant),
        Role::Doctor => Err(DenyReason::NotAuthor),
        _ => Err(DenyReason::InsufficientRole),
    }
}

fn order_target(order: &TestOrder) -> Target<'_> {
    Target {
        kind: ResourceKind::TestOrder,
        id: &order.id,
        patient_id: &order.patient_id,
        hospital_id: &order.hospital_id,
        author_id: Some(&order.ordered_by),
    }
}

/// Test order operations.
pub struct TestOrders<S, G> {
    repo: Repository<S>,
    authz: Authorizer<G>,
    blobs: Arc<dyn BlobStore>,
    audit: Arc<dyn AuditSink>,
    max_upload_size: usize,
}

impl<S: DocumentStore, G: GrantLookup> TestOrders<S, G> {
    /// Creates the service.
    pub fn new(
        repo: Repository<S>,
        authz: Authorizer<G>,
        blobs: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditSink>,
        max_upload_size: usize,
    ) -> Self {
        Self {
            repo,
            authz,
            blobs,
            audit,
            max_upload_size,
        }
    }

    async fn audit(
        &self,
        actor: &User,
        action: &str,
        order_id: &str,
        outcome: AuditOutcome,
        detail: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let mut event = AuditEvent::new(&actor.id, action, "test_order", order_id, outcome, now);
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        self.audit.record(event).await;
    }

    async fn deny(
        &self,
        actor: &User,
        action: &str,
        order_id: &str,
        reason: DenyReason,
        now: DateTime<Utc>,
    ) -> RestError {
        warn!(actor_id = %actor.id, order_id = %order_id, action = %action, reason = reason.code(), "Test order action denied");
        self.audit(actor, action, order_id, AuditOutcome::Denied, Some(reason.code()), now)
            .await;
        RestError::forbidden(reason)
    }

    /// Places an order at a department of the doctor's own hospital.
    pub async fn create(
        &self,
        actor: &User,
        request: CreateTestOrder,
        now: DateTime<Utc>,
    ) -> RestResult<TestOrder> {
        const ACTION: &str = "test_order.create";
        if actor.role != Role::Doctor {
            return Err(self
                .deny(actor, ACTION, "-", DenyReason::InsufficientRole, now)
                .await);
        }
        if request.test_name.trim().is_empty() {
            return Err(RestError::validation("A test name is required"));
        }
        let department = self
            .repo
            .get::<Department>(&request.department_id)
            .await?
            .into_inner();
        if actor.hospital_id.as_deref() != Some(department.hospital_id.as_str()) {
            return Err(self
                .deny(actor, ACTION, "-", DenyReason::CrossHospitalOrder, now)
                .await);
        }
        if !department_operational(&self.repo, &department, now).await? {
            return Err(RestError::validation_code(
                "department_unavailable",
                format!("Department {} is not accepting orders", department.id),
            ));
        }

        let patient = self.repo.get::<User>(&request.patient_id).await?.into_inner();
        if patient.role != Role::Patient {
            return Err(RestError::validation_code(
                "not_a_patient",
                format!("User {} is not a patient", patient.id),
            ));
        }
        let id = new_id();
        let patient_hospital = owning_hospital(&patient)?.to_string();
        self.authz
            .authorize_write(
                actor,
                &Target {
                    kind: ResourceKind::TestOrder,
                    id: &id,
                    patient_id: &patient.id,
                    hospital_id: &patient_hospital,
                    author_id: None,
                },
                WriteAction::Create,
                now,
            )
            .await?;

        let amount = request
            .amount
            .or_else(|| department.service_price(&request.test_name))
            .unwrap_or(0.0);
        if !amount.is_finite() || amount < 0.0 {
            return Err(RestError::validation("Amount cannot be negative"));
        }

        let order = TestOrder::place(
            id,
            NewTestOrder {
                patient_id: patient.id,
                hospital_id: department.hospital_id,
                department_id: department.id,
                ordered_by: actor.id.clone(),
                medical_record_id: request.medical_record_id,
                test_name: request.test_name.trim().to_string(),
                test_code: request.test_code,
                priority: request.priority,
                notes: request.notes,
                payment_required: request.payment_required.unwrap_or(true),
                amount,
            },
            now,
        );
        let order = self.repo.insert(order, vec![]).await?.into_inner();
        info!(
            order_id = %order.id,
            department_id = %order.department_id,
            status = %order.status,
            amount,
            "Test order placed"
        );
        self.audit(actor, ACTION, &order.id, AuditOutcome::Succeeded, None, now)
            .await;
        Ok(order)
    }

    /// Checks read access to an order. Department staff read the orders of
    /// their own department; everyone else goes through the authorizer.
    async fn authorize_order_read(
        &self,
        actor: &User,
        order: &TestOrder,
        now: DateTime<Utc>,
    ) -> RestResult<()> {
        if actor.role == Role::DepartmentStaff {
            return match fulfiller(actor, order) {
                Ok(()) => Ok(()),
                Err(reason) => Err(self.deny(actor, "test_order.read", &order.id, reason, now).await),
            };
        }
        self.authz
            .authorize_read(actor, &order_target(order), now)
            .await
            .map(|_| ())
    }

    /// Reads an order.
    pub async fn get(&self, actor: &User, id: &str, now: DateTime<Utc>) -> RestResult<TestOrder> {
        let order = self.repo.get::<TestOrder>(id).await?.into_inner();
        self.authorize_order_read(actor, &order, now).await?;
        Ok(order)
    }

    /// Lists a patient's orders.
    pub async fn for_patient(
        &self,
        actor: &User,
        patient_id: &str,
        pagination: Pagination,
        now: DateTime<Utc>,
    ) -> RestResult<Vec<TestOrder>> {
        let patient = self.repo.get::<User>(patient_id).await?.into_inner();
        let hospital_id = owning_hospital(&patient)?.to_string();
        let access = self
            .authz
            .authorize_read(
                actor,
                &Target {
                    kind: ResourceKind::TestOrder,
                    id: patient_id,
                    patient_id,
                    hospital_id: &hospital_id,
                    author_id: None,
                },
                now,
            )
            .await?;
        let all = matches!(access, ReadAccess::SuperAdmin | ReadAccess::OwnData);
        let orders = self
            .repo
            .list::<TestOrder>(
                &query::<TestOrder>()
                    .with_eq("patient_id", patient_id)
                    .with_sort(SortOrder::CreatedDesc)
                    .with_pagination(pagination),
            )
            .await?;
        Ok(orders
            .into_iter()
            .filter(|o| all || o.hospital_id == hospital_id)
            .collect())
    }

    /// A department's work queue, oldest first.
    pub async fn department_queue(
        &self,
        actor: &User,
        department_id: &str,
        filter: QueueFilter,
        pagination: Pagination,
    ) -> RestResult<Vec<TestOrder>> {
        let department = self.repo.get::<Department>(department_id).await?.into_inner();
        let allowed = match actor.role {
            Role::SuperAdmin => Ok(()),
            Role::DepartmentStaff if actor.department_id.as_deref() == Some(department_id) => Ok(()),
            Role::DepartmentStaff => Err(DenyReason::WrongDepartment),
            Role::HospitalAdmin
                if actor.hospital_id.as_deref() == Some(department.hospital_id.as_str()) =>
            {
                Ok(())
            }
            Role::HospitalAdmin => Err(DenyReason::OtherTenant),
            _ => Err(DenyReason::InsufficientRole),
        };
        allowed.map_err(RestError::forbidden)?;

        let mut q = query::<TestOrder>()
            .with_eq("department_id", department_id)
            .with_sort(SortOrder::CreatedAsc)
            .with_pagination(pagination);
        if let Some(status) = filter.status {
            q = q.with_eq("status", status.as_str());
        }
        self.repo.list(&q).await
    }

    /// Loads an order, checks the actor, applies a transition and saves it.
    async fn transition<F>(
        &self,
        actor: &User,
        id: &str,
        action: &str,
        permitted: fn(&User, &TestOrder) -> Result<(), DenyReason>,
        now: DateTime<Utc>,
        apply: F,
    ) -> RestResult<TestOrder>
    where
        F: FnOnce(&mut TestOrder) -> Result<(), TransitionError>,
    {
        let mut order = self.repo.get::<TestOrder>(id).await?;
        if let Err(reason) = permitted(actor, &order.value) {
            return Err(self.deny(actor, action, id, reason, now).await);
        }
        let from = order.value.status;
        if let Err(e) = apply(&mut order.value) {
            let err = RestError::from(e);
            debug!(order_id = %id, action = %action, status = %from, error = %err, "Transition rejected");
            self.audit(actor, action, id, AuditOutcome::Rejected, Some(err.code()), now)
                .await;
            return Err(err);
        }
        let order = self.save(actor, action, order, now).await?;
        info!(order_id = %id, action = %action, from = %from, to = %order.status, "Test order transitioned");
        self.audit(actor, action, id, AuditOutcome::Succeeded, None, now)
            .await;
        Ok(order)
    }

    async fn save(
        &self,
        actor: &User,
        action: &str,
        order: Versioned<TestOrder>,
        now: DateTime<Utc>,
    ) -> RestResult<TestOrder> {
        let id = order.value.id.clone();
        match self.repo.save(order).await {
            Ok(saved) => Ok(saved.into_inner()),
            Err(err) => {
                self.audit(actor, action, &id, AuditOutcome::Rejected, Some(err.code()), now)
                    .await;
                Err(err)
            }
        }
    }

    /// Records a payment.
    pub async fn mark_paid(
        &self,
        actor: &User,
        id: &str,
        request: MarkPaid,
        now: DateTime<Utc>,
    ) -> RestResult<TestOrder> {
        if request.method.trim().is_empty() {
            return Err(RestError::validation("A payment method is required"));
        }
        let payer_id = actor.id.clone();
        self.transition(actor, id, "test_order.mark_paid", payer, now, move |order| {
            order.mark_paid(request.method.trim().to_string(), request.reference, &payer_id, now)
        })
        .await
    }

    /// Records a failed payment attempt.
    pub async fn mark_payment_failed(
        &self,
        actor: &User,
        id: &str,
        request: PaymentFailure,
        now: DateTime<Utc>,
    ) -> RestResult<TestOrder> {
        self.transition(actor, id, "test_order.mark_payment_failed", payer, now, move |order| {
            order.mark_payment_failed(request.reason, now)
        })
        .await
    }

    /// Starts a paid or waived order.
    pub async fn start(&self, actor: &User, id: &str, now: DateTime<Utc>) -> RestResult<TestOrder> {
        let by = actor.id.clone();
        self.transition(actor, id, "test_order.start", fulfiller, now, move |order| {
            order.start(&by, now)
        })
        .await
    }

    /// Cancels an order that is not completed yet.
    pub async fn cancel(
        &self,
        actor: &User,
        id: &str,
        request: CancelOrder,
        now: DateTime<Utc>,
    ) -> RestResult<TestOrder> {
        let by = actor.id.clone();
        self.transition(actor, id, "test_order.cancel", canceller, now, move |order| {
            order.cancel(&by, request.reason, now)
        })
        .await
    }

    /// Completes an order with its result. The result is created first and
    /// removed again if the order changed underneath.
    pub async fn upload_result(
        &self,
        actor: &User,
        id: &str,
        request: UploadResult,
        now: DateTime<Utc>,
    ) -> RestResult<(TestOrder, TestResult)> {
        const ACTION: &str = "test_order.upload_result";
        let mut order = self.repo.get::<TestOrder>(id).await?;
        if let Err(reason) = fulfiller(actor, &order.value) {
            return Err(self.deny(actor, ACTION, id, reason, now).await);
        }

        let result_id = new_id();
        if let Err(e) = order.value.upload_result(&result_id, &actor.id, now) {
            let err = RestError::from(e);
            self.audit(actor, ACTION, id, AuditOutcome::Rejected, Some(err.code()), now)
                .await;
            return Err(err);
        }

        let o = &order.value;
        let result = TestResult {
            id: result_id.clone(),
            test_order_id: o.id.clone(),
            patient_id: o.patient_id.clone(),
            hospital_id: o.hospital_id.clone(),
            department_id: o.department_id.clone(),
            author_id: actor.id.clone(),
            test_name: o.test_name.clone(),
            summary: request.summary,
            values: request.values,
            file_url: o.result_file_url.clone(),
            notes: request.notes,
            created_at: now,
        };
        let result = self.repo.insert(result, vec![]).await?.into_inner();

        let order = match self.save(actor, ACTION, order, now).await {
            Ok(order) => order,
            Err(err) => {
                if let Err(cleanup) = self.repo.remove::<TestResult>(&result_id).await {
                    warn!(result_id = %result_id, error = %cleanup, "Failed to remove orphaned test result");
                }
                return Err(err);
            }
        };
        info!(order_id = %id, result_id = %result.id, uploaded_by = %actor.id, "Test result uploaded");
        self.audit(actor, ACTION, id, AuditOutcome::Succeeded, Some(&result.id), now)
            .await;
        Ok((order, result))
    }

    /// Stores a report file on an order that accepts results.
    pub async fn attach_result_file(
        &self,
        actor: &User,
        id: &str,
        upload: Upload,
        now: DateTime<Utc>,
    ) -> RestResult<TestOrder> {
        const ACTION: &str = "test_order.result_file";
        let mut order = self.repo.get::<TestOrder>(id).await?;
        if let Err(reason) = fulfiller(actor, &order.value) {
            return Err(self.deny(actor, ACTION, id, reason, now).await);
        }
        if !order.value.can_upload_result() {
            let err = RestError::from(if order.value.payment.status.is_settled() {
                TransitionError::InvalidState {
                    action: "attach a result file to",
                    status: order.value.status,
                }
            } else {
                TransitionError::PaymentRequired
            });
            self.audit(actor, ACTION, id, AuditOutcome::Rejected, Some(err.code()), now)
                .await;
            return Err(err);
        }
        let extension = upload.validate(self.max_upload_size)?;

        let metadata = BlobMetadata::new(
            "test-results",
            order.value.patient_id.clone(),
            extension,
            upload.content_type.clone(),
        );
        let url = self.blobs.put(upload.data, metadata).await?;
        order.value.attach_result_file(url.clone(), now)?;
        match self.save(actor, ACTION, order, now).await {
            Ok(order) => {
                self.audit(actor, ACTION, id, AuditOutcome::Succeeded, None, now)
                    .await;
                Ok(order)
            }
            Err(err) => {
                if let Err(cleanup) = self.blobs.delete(&url).await {
                    warn!(url = %url, error = %cleanup, "Failed to remove orphaned result file");
                }
                Err(err)
            }
        }
    }

    /// Returns a presigned link to an order's report file.
    pub async fn result_file_link(
        &self,
        actor: &User,
        id: &str,
        now: DateTime<Utc>,
    ) -> RestResult<DownloadLink> {
        let order = self.get(actor, id, now).await?;
        let url = order
            .result_file_url
            .ok_or_else(|| RestError::not_found("result_file", id))?;
        Ok(DownloadLink {
            url: self.blobs.get(&url)?,
            file_name: format!("{}-result", order.id),
            content_type: carenet_persistence::blob::content_type_for(&url).to_string(),
        })
    }
}
