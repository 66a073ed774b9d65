//! carenet route configuration.
//!
//! Defines all routes for the carenet REST API.

use axum::{
    Router,
    routing::{get, post, put},
};
use carenet_persistence::DocumentStore;

use crate::handlers::{
    self, auth, departments, files, hospitals, records, sharing, test_orders, users,
};
use crate::state::AppState;

/// Creates all carenet REST API routes.
///
/// # Routes
///
/// ## Probes
/// - `GET /health`, `GET /_liveness`, `GET /_readiness`
///
/// ## Identity
/// - `POST /auth/register`, `POST /auth/login`, `POST /auth/refresh`, `POST /auth/logout`
/// - `GET|PUT /auth/me`, `PUT /auth/me/password`
///
/// ## Tenant Directory
/// - `GET /hospitals`, `POST /hospitals/register`, `GET /hospitals/pending`
/// - `GET /hospitals/{id}`, `POST /hospitals/{id}/approve|reject|suspend|subscription`
/// - `PUT /hospitals/{id}/features`, `GET /hospitals/{id}/stats|departments`
/// - `POST /departments`, `GET|PUT|DELETE /departments/{id}`
///
/// ## Users
/// - `GET /users`, `GET /users/pending`, `GET|DELETE /users/{id}`
/// - `POST /users/{id}/approve|reject`, `GET /patients/search?q=`
///
/// ## Sharing Ledger
/// - `POST /hospital-sharing/request`, `GET /hospital-sharing`
/// - `GET|DELETE /hospital-sharing/{id}`, `POST /hospital-sharing/{id}/approve|reject|revoke`
///
/// ## Clinical records
/// - `POST /medical-records`, `GET|PUT /medical-records/{id}`,
///   `GET /medical-records/patient/{id}`
/// - `POST /medical-records/{id}/attachments`,
///   `GET /medical-records/{id}/attachments/{attachment_id}`
/// - `POST /prescriptions`, `GET|PUT /prescriptions/{id}`, `GET /prescriptions/patient/{id}`
/// - `GET /test-results/{id}`, `GET /test-results/patient/{id}`
///
/// ## Test orders
/// - `POST /test-orders`, `GET /test-orders/{id}`
/// - `GET /test-orders/patient/{id}`, `GET /test-orders/department/{id}`
/// - `PUT /test-orders/{id}/start|upload-result|mark-paid|mark-payment-failed|cancel`
/// - `POST|GET /test-orders/{id}/result-file`
///
/// ## Files
/// - `GET /files/{*key}` - Presigned download
pub fn create_routes<S>(state: AppState<S>) -> Router
where
    S: DocumentStore + 'static,
{
    Router::new()
        // Probes
        .route("/health", get(handlers::health_handler::<S>))
        .route("/_liveness", get(handlers::liveness_handler))
        .route("/_readiness", get(handlers::readiness_handler::<S>))
        // Identity
        .route("/auth/register", post(auth::register_handler::<S>))
        .route("/auth/login", post(auth::login_handler::<S>))
        .route("/auth/refresh", post(auth::refresh_handler::<S>))
        .route("/auth/logout", post(auth::logout_handler::<S>))
        .route(
            "/auth/me",
            get(auth::me_handler).put(auth::update_me_handler::<S>),
        )
        .route("/auth/me/password", put(auth::change_password_handler::<S>))
        // Tenant Directory
        .route("/hospitals", get(hospitals::list_hospitals_handler::<S>))
        .route(
            "/hospitals/register",
            post(hospitals::register_hospital_handler::<S>),
        )
        .route(
            "/hospitals/pending",
            get(hospitals::pending_hospitals_handler::<S>),
        )
        .route("/hospitals/{id}", get(hospitals::read_hospital_handler::<S>))
        .route(
            "/hospitals/{id}/approve",
            post(hospitals::approve_hospital_handler::<S>),
        )
        .route(
            "/hospitals/{id}/reject",
            post(hospitals::reject_hospital_handler::<S>),
        )
        .route(
            "/hospitals/{id}/suspend",
            post(hospitals::suspend_hospital_handler::<S>),
        )
        .route(
            "/hospitals/{id}/subscription",
            post(hospitals::renew_subscription_handler::<S>),
        )
        .route(
            "/hospitals/{id}/features",
            put(hospitals::update_features_handler::<S>),
        )
        .route(
            "/hospitals/{id}/stats",
            get(hospitals::hospital_stats_handler::<S>),
        )
        .route(
            "/hospitals/{id}/departments",
            get(hospitals::hospital_departments_handler::<S>),
        )
        .route(
            "/departments",
            post(departments::create_department_handler::<S>),
        )
        .route(
            "/departments/{id}",
            get(departments::read_department_handler::<S>)
                .put(departments::update_department_handler::<S>)
                .delete(departments::delete_department_handler::<S>),
        )
        // Users
        .route("/users", get(users::list_users_handler::<S>))
        .route("/users/pending", get(users::pending_users_handler::<S>))
        .route(
            "/users/{id}",
            get(users::read_user_handler::<S>).delete(users::deactivate_user_handler::<S>),
        )
        .route("/users/{id}/approve", post(users::approve_user_handler::<S>))
        .route("/users/{id}/reject", post(users::reject_user_handler::<S>))
        .route(
            "/patients/search",
            get(users::search_patients_handler::<S>),
        )
        // Sharing Ledger
        .route(
            "/hospital-sharing",
            get(sharing::list_sharing_handler::<S>),
        )
        .route(
            "/hospital-sharing/request",
            post(sharing::request_sharing_handler::<S>),
        )
        .route(
            "/hospital-sharing/{id}",
            get(sharing::read_sharing_handler::<S>).delete(sharing::cancel_sharing_handler::<S>),
        )
        .route(
            "/hospital-sharing/{id}/approve",
            post(sharing::approve_sharing_handler::<S>),
        )
        .route(
            "/hospital-sharing/{id}/reject",
            post(sharing::reject_sharing_handler::<S>),
        )
        .route(
            "/hospital-sharing/{id}/revoke",
            post(sharing::revoke_sharing_handler::<S>),
        )
        // Clinical records
        .route(
            "/medical-records",
            post(records::create_medical_record_handler::<S>),
        )
        .route(
            "/medical-records/{id}",
            get(records::read_medical_record_handler::<S>)
                .put(records::update_medical_record_handler::<S>),
        )
        .route(
            "/medical-records/patient/{patient_id}",
            get(records::patient_medical_records_handler::<S>),
        )
        .route(
            "/medical-records/{id}/attachments",
            post(records::add_attachment_handler::<S>),
        )
        .route(
            "/medical-records/{id}/attachments/{attachment_id}",
            get(records::attachment_link_handler::<S>),
        )
        .route(
            "/prescriptions",
            post(records::create_prescription_handler::<S>),
        )
        .route(
            "/prescriptions/{id}",
            get(records::read_prescription_handler::<S>)
                .put(records::update_prescription_handler::<S>),
        )
        .route(
            "/prescriptions/patient/{patient_id}",
            get(records::patient_prescriptions_handler::<S>),
        )
        .route(
            "/test-results/{id}",
            get(records::read_test_result_handler::<S>),
        )
        .route(
            "/test-results/patient/{patient_id}",
            get(records::patient_test_results_handler::<S>),
        )
        // Test orders
        .route(
            "/test-orders",
            post(test_orders::create_test_order_handler::<S>),
        )
        .route(
            "/test-orders/{id}",
            get(test_orders::read_test_order_handler::<S>),
        )
        .route(
            "/test-orders/patient/{patient_id}",
            get(test_orders::patient_test_orders_handler::<S>),
        )
        .route(
            "/test-orders/department/{department_id}",
            get(test_orders::department_queue_handler::<S>),
        )
        .route(
            "/test-orders/{id}/start",
            put(test_orders::start_test_handler::<S>),
        )
        .route(
            "/test-orders/{id}/upload-result",
            put(test_orders::upload_result_handler::<S>),
        )
        .route(
            "/test-orders/{id}/mark-paid",
            put(test_orders::mark_paid_handler::<S>),
        )
        .route(
            "/test-orders/{id}/mark-payment-failed",
            put(test_orders::mark_payment_failed_handler::<S>),
        )
        .route(
            "/test-orders/{id}/cancel",
            put(test_orders::cancel_test_order_handler::<S>),
        )
        .route(
            "/test-orders/{id}/result-file",
            post(test_orders::attach_result_file_handler::<S>)
                .get(test_orders::result_file_link_handler::<S>),
        )
        // Files
        .route("/files/{*key}", get(files::download_file_handler::<S>))
        // State
        .with_state(state)
}
