// libs/scheduling-cell/src/services/patients.rs
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::error::SchedulingError;

/// Patient directory collaborator. Find-or-create is idempotent on email,
/// then phone, as natural keys; approval treats a failure here as a blocking
/// precondition.
pub struct PatientDirectoryService {
    supabase: Arc<SupabaseClient>,
}

impl PatientDirectoryService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn find_or_create_patient(
        &self,
        name: &str,
        phone: &str,
        email: &str,
        auth_token: &str,
    ) -> Result<Uuid, SchedulingError> {
        if let Some(id) = self.find_by("email", email, auth_token).await? {
            debug!("Patient matched by email: {}", id);
            return Ok(id);
        }
        if let Some(id) = self.find_by("phone", phone, auth_token).await? {
            debug!("Patient matched by phone: {}", id);
            return Ok(id);
        }

        let patient_data = json!({
            "full_name": name,
            "phone": phone,
            "email": email,
            "created_at": chrono::Utc::now().to_rfc3339(),
            "updated_at": chrono::Utc::now().to_rfc3339(),
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/patients",
            Some(auth_token),
            Some(patient_data),
            Some(headers),
        ).await.map_err(|e| SchedulingError::PatientDirectory(e.to_string()))?;

        let id = result
            .first()
            .and_then(|row| row.get("id"))
            .and_then(|value| value.as_str())
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| {
                SchedulingError::PatientDirectory("patient creation returned no id".to_string())
            })?;

        debug!("Patient created: {}", id);
        Ok(id)
    }

    async fn find_by(
        &self,
        column: &str,
        value: &str,
        auth_token: &str,
    ) -> Result<Option<Uuid>, SchedulingError> {
        if value.trim().is_empty() {
            return Ok(None);
        }

        let path = format!(
            "/rest/v1/patients?{}=eq.{}&limit=1",
            column,
            urlencoding::encode(value)
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::PatientDirectory(e.to_string()))?;

        Ok(result
            .first()
            .and_then(|row| row.get("id"))
            .and_then(|value| value.as_str())
            .and_then(|raw| Uuid::parse_str(raw).ok()))
    }
}
