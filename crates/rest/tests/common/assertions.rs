//! HTTP response assertions.

use axum_test::TestResponse;
use serde_json::Value;

/// Asserts that the response has the expected status code.
pub fn assert_status(response: &TestResponse, expected: u16) {
    let actual = response.status_code().as_u16();
    assert_eq!(
        actual,
        expected,
        "Expected status {}, got {}: {}",
        expected,
        actual,
        response.text()
    );
}

/// Asserts an error envelope with the given status and code.
pub fn assert_error(response: &TestResponse, expected_status: u16, expected_code: &str) {
    assert_status(response, expected_status);
    let body: Value = response.json();
    assert_eq!(
        body["error"]["code"], expected_code,
        "Unexpected error body: {}",
        body
    );
}

/// Asserts an error envelope with the given category.
pub fn assert_category(response: &TestResponse, expected_category: &str) {
    let body: Value = response.json();
    assert_eq!(
        body["error"]["category"], expected_category,
        "Unexpected error body: {}",
        body
    );
}
