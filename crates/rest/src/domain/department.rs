//! Department entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of department.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepartmentType {
    /// Laboratory.
    Laboratory,
    /// Radiology and imaging.
    Radiology,
    /// Pharmacy.
    Pharmacy,
    /// Cardiology.
    Cardiology,
    /// Emergency.
    Emergency,
    /// Outpatient or general medicine.
    #[default]
    General,
    /// Anything else.
    Other,
}

/// A billable service offered by a department.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentService {
    /// Service name, matched against test names when pricing orders.
    pub name: String,
    /// Price in the hospital's currency.
    pub price: f64,
    /// Expected duration in minutes.
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

/// Day of the week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    /// Monday.
    Monday,
    /// Tuesday.
    Tuesday,
    /// Wednesday.
    Wednesday,
    /// Thursday.
    Thursday,
    /// Friday.
    Friday,
    /// Saturday.
    Saturday,
    /// Sunday.
    Sunday,
}

/// Opening hours for one weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    /// The day.
    pub day: Weekday,
    /// Opening time (`HH:MM`).
    pub open: String,
    /// Closing time (`HH:MM`).
    pub close: String,
}

/// A department of a hospital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    /// Department ID.
    pub id: String,
    /// Owning hospital.
    pub hospital_id: String,
    /// Display name.
    pub name: String,
    /// Code, upper-cased and unique within the hospital.
    pub code: String,
    /// Kind of department.
    pub department_type: DepartmentType,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Offered services.
    #[serde(default)]
    pub services: Vec<DepartmentService>,
    /// Weekly opening hours.
    #[serde(default)]
    pub operating_hours: Vec<OperatingHours>,
    /// The department-staff user provisioned for the department login.
    #[serde(default)]
    pub login_user_id: Option<String>,
    /// Soft-delete flag.
    pub active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Department {
    /// Looks up a service price by case-insensitive name.
    pub fn service_price(&self, name: &str) -> Option<f64> {
        self.services
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.price)
    }
}

/// Normalizes a department code for storage and uniqueness checks.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" card "), "CARD");
    }

    #[test]
    fn test_service_price_lookup() {
        let now = Utc::now();
        let dept = Department {
            id: "d-1".to_string(),
            hospital_id: "h-1".to_string(),
            name: "Lab".to_string(),
            code: "LAB".to_string(),
            department_type: DepartmentType::Laboratory,
            description: None,
            services: vec![DepartmentService {
                name: "Complete Blood Count".to_string(),
                price: 25.0,
                duration_minutes: Some(30),
            }],
            operating_hours: vec![],
            login_user_id: None,
            active: true,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(dept.service_price("complete blood count"), Some(25.0));
        assert_eq!(dept.service_price("MRI"), None);
    }
}
