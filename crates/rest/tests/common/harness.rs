//! REST API test harness.
//!
//! Provides a test server over an in-memory SQLite backend with a bootstrap
//! super admin, plus helpers that onboard hospitals, staff and patients
//! through the public API.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum_test::{TestResponse, TestServer};
use carenet_persistence::ObjectBlobStore;
use carenet_persistence::backends::sqlite::SqliteBackend;
use carenet_rest::audit::StorageAuditSink;
use carenet_rest::{AppState, ServerConfig, create_app_with_state};
use chrono::{Duration, Utc};
use serde_json::{Value, json};

/// Password used for every account created by the harness.
pub const PASSWORD: &str = "correct-horse-battery";

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique(prefix: &str) -> String {
    format!("{}{}", prefix, COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// A signed-in user.
#[derive(Debug, Clone)]
pub struct Session {
    /// User ID.
    pub id: String,
    /// Login email.
    pub email: String,
    /// Bearer access token.
    pub token: String,
    /// Refresh token.
    pub refresh_token: String,
}

/// An approved hospital and its admin.
#[derive(Debug, Clone)]
pub struct Tenant {
    /// Hospital ID.
    pub id: String,
    /// The hospital admin.
    pub admin: Session,
}

/// A department with its shared staff login.
#[derive(Debug, Clone)]
pub struct Dept {
    /// Department ID.
    pub id: String,
    /// The department-staff login.
    pub staff: Session,
}

/// Test harness for REST API testing.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_read() {
///     let app = TestApp::new().await;
///     let h1 = app.hospital("St. Mary").await;
///     let response = app.get("/users/pending", &h1.admin.token).await;
///     assert_status(&response, 200);
/// }
/// ```
pub struct TestApp {
    /// The test server instance.
    pub server: TestServer,
    /// Shared state, for reaching past the HTTP surface.
    pub state: AppState<SqliteBackend>,
    /// The bootstrap super admin.
    pub super_admin: Session,
}

impl TestApp {
    /// Creates a harness with the testing configuration.
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::for_testing()).await
    }

    /// Creates a harness with the given configuration.
    pub async fn with_config(config: ServerConfig) -> Self {
        let backend = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
        backend.init_schema().expect("Failed to init schema");
        Self::with_state(AppState::new(Arc::new(backend), config)).await
    }

    /// Creates a harness over a SQLite database file and a blob directory.
    pub async fn on_disk(dir: &Path, config: ServerConfig) -> Self {
        let backend =
            SqliteBackend::open(dir.join("carenet.db")).expect("Failed to open SQLite database");
        backend.init_schema().expect("Failed to init schema");
        let storage = Arc::new(backend);
        let blobs = ObjectBlobStore::local(
            dir.join("blobs"),
            config.public_base_url.clone(),
            config.jwt_secret.as_bytes().to_vec(),
            Duration::seconds(config.presign_ttl as i64),
        )
        .expect("Failed to create blob store");
        let audit = Arc::new(StorageAuditSink::new(Arc::clone(&storage)));
        Self::with_state(AppState::with_parts(storage, config, audit, Arc::new(blobs))).await
    }

    async fn with_state(state: AppState<SqliteBackend>) -> Self {
        state
            .sessions()
            .bootstrap_super_admin("root@carenet.test", PASSWORD, Utc::now())
            .await
            .expect("Failed to bootstrap super admin");

        let server =
            TestServer::new(create_app_with_state(state.clone())).expect("Failed to create test server");
        let mut app = Self {
            server,
            state,
            super_admin: Session {
                id: String::new(),
                email: String::new(),
                token: String::new(),
                refresh_token: String::new(),
            },
        };
        app.super_admin = app.login("root@carenet.test", PASSWORD).await;
        app
    }

    /// Makes an authenticated GET request.
    pub async fn get(&self, path: &str, token: &str) -> TestResponse {
        self.server.get(path).authorization_bearer(token).await
    }

    /// Makes an authenticated POST request with a JSON body.
    pub async fn post(&self, path: &str, token: &str, body: Value) -> TestResponse {
        self.server
            .post(path)
            .authorization_bearer(token)
            .json(&body)
            .await
    }

    /// Makes an authenticated PUT request with a JSON body.
    pub async fn put(&self, path: &str, token: &str, body: Value) -> TestResponse {
        self.server
            .put(path)
            .authorization_bearer(token)
            .json(&body)
            .await
    }

    /// Makes an authenticated DELETE request.
    pub async fn delete(&self, path: &str, token: &str) -> TestResponse {
        self.server.delete(path).authorization_bearer(token).await
    }

    /// Logs in and returns the session.
    pub async fn login(&self, email: &str, password: &str) -> Session {
        let response = self
            .server
            .post("/auth/login")
            .json(&json!({"email": email, "password": password}))
            .await;
        assert_eq!(response.status_code().as_u16(), 200, "login failed: {}", response.text());
        let body: Value = response.json();
        Session {
            id: body["user"]["id"].as_str().unwrap().to_string(),
            email: email.to_string(),
            token: body["access_token"].as_str().unwrap().to_string(),
            refresh_token: body["refresh_token"].as_str().unwrap().to_string(),
        }
    }

    /// Registers a hospital without approving it. Returns its ID and the
    /// admin's email.
    pub async fn register_hospital(&self, name: &str) -> (String, String) {
        let slug = unique("h");
        let admin_email = format!("admin@{}.test", slug);
        let response = self
            .server
            .post("/hospitals/register")
            .json(&json!({
                "name": format!("{} {}", name, slug),
                "registration_number": format!("REG-{}", slug),
                "email": format!("contact@{}.test", slug),
                "plan": "basic",
                "admin": {
                    "name": format!("{} Admin", name),
                    "email": admin_email,
                    "password": PASSWORD
                }
            }))
            .await;
        assert_eq!(response.status_code().as_u16(), 201, "{}", response.text());
        let body: Value = response.json();
        (
            body["hospital"]["id"].as_str().unwrap().to_string(),
            admin_email,
        )
    }

    /// Registers and approves a hospital and signs its admin in.
    pub async fn hospital(&self, name: &str) -> Tenant {
        let (id, admin_email) = self.register_hospital(name).await;
        let response = self
            .post(&format!("/hospitals/{}/approve", id), &self.super_admin.token, json!({}))
            .await;
        assert_eq!(response.status_code().as_u16(), 200, "{}", response.text());
        let admin = self.login(&admin_email, PASSWORD).await;
        Tenant { id, admin }
    }

    /// Turns on cross-hospital sharing for a hospital.
    pub async fn enable_sharing(&self, tenant: &Tenant) {
        let response = self
            .put(
                &format!("/hospitals/{}/features", tenant.id),
                &tenant.admin.token,
                json!({"cross_hospital_sharing": true}),
            )
            .await;
        assert_eq!(response.status_code().as_u16(), 200, "{}", response.text());
    }

    /// Self-registers a staff member, has the hospital admin approve them,
    /// and signs them in.
    pub async fn staff(&self, tenant: &Tenant, role: &str, department_id: Option<&str>) -> Session {
        let email = format!("{}@staff.test", unique(role));
        let response = self
            .server
            .post("/auth/register")
            .json(&json!({
                "email": email,
                "password": PASSWORD,
                "name": format!("Test {}", role),
                "role": role,
                "hospital_id": tenant.id,
                "department_id": department_id
            }))
            .await;
        assert_eq!(response.status_code().as_u16(), 201, "{}", response.text());
        let user_id = response.json::<Value>()["id"].as_str().unwrap().to_string();

        let response = self
            .post(&format!("/users/{}/approve", user_id), &tenant.admin.token, json!({}))
            .await;
        assert_eq!(response.status_code().as_u16(), 200, "{}", response.text());
        self.login(&email, PASSWORD).await
    }

    /// Self-registers a patient at the hospital and signs them in.
    pub async fn patient(&self, tenant: &Tenant, name: &str) -> Session {
        let email = format!("{}@patients.test", unique("p"));
        let response = self
            .server
            .post("/auth/register")
            .json(&json!({
                "email": email,
                "password": PASSWORD,
                "name": name,
                "phone": "+1-555-0100",
                "role": "patient",
                "hospital_id": tenant.id
            }))
            .await;
        assert_eq!(response.status_code().as_u16(), 201, "{}", response.text());
        self.login(&email, PASSWORD).await
    }

    /// Creates a department with a priced service and a staff login.
    pub async fn department(&self, tenant: &Tenant, name: &str) -> Dept {
        let code = unique("D");
        let email = format!("{}@departments.test", code.to_lowercase());
        let response = self
            .post(
                "/departments",
                &tenant.admin.token,
                json!({
                    "name": name,
                    "code": code,
                    "department_type": "laboratory",
                    "services": [{"name": "Complete Blood Count", "price": 25.0}],
                    "login": {"email": email, "password": PASSWORD}
                }),
            )
            .await;
        assert_eq!(response.status_code().as_u16(), 201, "{}", response.text());
        let id = response.json::<Value>()["id"].as_str().unwrap().to_string();
        let staff = self.login(&email, PASSWORD).await;
        Dept { id, staff }
    }

    /// Creates a medical record and returns its ID.
    pub async fn medical_record(&self, author: &Session, patient_id: &str, diagnosis: &str) -> String {
        let response = self
            .post(
                "/medical-records",
                &author.token,
                json!({
                    "patient_id": patient_id,
                    "chief_complaint": "Persistent cough",
                    "diagnosis": diagnosis,
                    "symptoms": ["cough", "fever"]
                }),
            )
            .await;
        assert_eq!(response.status_code().as_u16(), 201, "{}", response.text());
        response.json::<Value>()["id"].as_str().unwrap().to_string()
    }

    /// Orders a blood count and returns the order body.
    pub async fn order_test(&self, doctor: &Session, patient_id: &str, department_id: &str, payment_required: bool) -> Value {
        let response = self
            .post(
                "/test-orders",
                &doctor.token,
                json!({
                    "patient_id": patient_id,
                    "department_id": department_id,
                    "test_name": "Complete Blood Count",
                    "payment_required": payment_required
                }),
            )
            .await;
        assert_eq!(response.status_code().as_u16(), 201, "{}", response.text());
        response.json()
    }
}
