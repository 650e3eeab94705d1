use async_trait::async_trait;
use heallink_core::appointment::{Appointment, CreateAppointment, UpdateAppointment};
use heallink_core::attachment::NewAttachment;
use heallink_core::family::{CreateFamilyMember, FamilyMember, UpdateFamilyMember};
use heallink_core::record::{
    CreateRecord, HealthRecord, RemovalReport, RemoveFiles, ReplaceFiles, UpdateRecord,
};
use heallink_core::sweep::SweepReport;
use reqwest::{Client, RequestBuilder, StatusCode};

use crate::{RecordService, ServiceError};

/// Async HTTP client implementation of RecordService.
/// Connects to a running heallink-server.
pub struct HttpService {
    base_url: String,
    client: Client,
    api_key: Option<String>,
}

impl HttpService {
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            client: Client::new(),
            api_key: None,
        }
    }

    pub fn with_api_key(base_url: &str, key: String) -> Self {
        Self {
            api_key: Some(key),
            ..Self::new(base_url)
        }
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    /// Check if the server is reachable.
    /// Health endpoint is NOT authenticated.
    pub async fn health_check(&self) -> Result<(), ServiceError> {
        let resp = self
            .client
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await
            .map_err(|e| ServiceError::Internal(format!("connection failed: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ServiceError::Internal(format!(
                "health check failed: {}",
                resp.status()
            )))
        }
    }

    /// Run one orphan sweep pass on the server.
    pub async fn run_sweep(&self) -> Result<SweepReport, ServiceError> {
        self.post_json("/api/admin/sweep", &serde_json::json!({}))
            .await
    }

    pub async fn list_family_members(&self) -> Result<Vec<FamilyMember>, ServiceError> {
        self.get_json("/api/family").await
    }

    pub async fn get_family_member(&self, id: &str) -> Result<FamilyMember, ServiceError> {
        self.get_json(&format!("/api/family/{id}")).await
    }

    pub async fn create_family_member(
        &self,
        input: &CreateFamilyMember,
    ) -> Result<FamilyMember, ServiceError> {
        self.post_json("/api/family", input).await
    }

    pub async fn update_family_member(
        &self,
        id: &str,
        update: &UpdateFamilyMember,
    ) -> Result<FamilyMember, ServiceError> {
        self.put_json(&format!("/api/family/{id}"), update).await
    }

    /// Fails with `Conflict` while records or appointments name the member.
    pub async fn delete_family_member(&self, id: &str) -> Result<(), ServiceError> {
        self.delete_req(&format!("/api/family/{id}")).await
    }

    pub async fn list_appointments(&self) -> Result<Vec<Appointment>, ServiceError> {
        self.get_json("/api/appointments").await
    }

    pub async fn get_appointment(&self, id: &str) -> Result<Appointment, ServiceError> {
        self.get_json(&format!("/api/appointments/{id}")).await
    }

    pub async fn create_appointment(
        &self,
        input: &CreateAppointment,
    ) -> Result<Appointment, ServiceError> {
        self.post_json("/api/appointments", input).await
    }

    pub async fn update_appointment(
        &self,
        id: &str,
        update: &UpdateAppointment,
    ) -> Result<Appointment, ServiceError> {
        self.put_json(&format!("/api/appointments/{id}"), update)
            .await
    }

    pub async fn delete_appointment(&self, id: &str) -> Result<(), ServiceError> {
        self.delete_req(&format!("/api/appointments/{id}")).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        let builder = self.client.get(format!("{}{path}", self.base_url));
        let resp = self
            .with_auth(builder)
            .send()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        handle_response(resp).await
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ServiceError> {
        let builder = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body);
        let resp = self
            .with_auth(builder)
            .send()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        handle_response(resp).await
    }

    async fn put_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ServiceError> {
        let builder = self
            .client
            .put(format!("{}{path}", self.base_url))
            .json(body);
        let resp = self
            .with_auth(builder)
            .send()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        handle_response(resp).await
    }

    async fn delete_req(&self, path: &str) -> Result<(), ServiceError> {
        let builder = self.client.delete(format!("{}{path}", self.base_url));
        let resp = self
            .with_auth(builder)
            .send()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(parse_error(resp).await)
        }
    }
}

async fn handle_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        resp.json::<T>()
            .await
            .map_err(|e| ServiceError::Internal(format!("json decode: {e}")))
    } else {
        Err(parse_error_with_status(status, resp).await)
    }
}

async fn parse_error(resp: reqwest::Response) -> ServiceError {
    let status = resp.status();
    parse_error_with_status(status, resp).await
}

async fn parse_error_with_status(status: StatusCode, resp: reqwest::Response) -> ServiceError {
    let body = resp.text().await.unwrap_or_default();
    let msg = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(String::from))
        .unwrap_or(body);

    match status {
        StatusCode::NOT_FOUND => ServiceError::NotFound(msg),
        StatusCode::BAD_REQUEST => ServiceError::InvalidInput(msg),
        StatusCode::CONFLICT => ServiceError::Conflict(msg),
        StatusCode::UNAUTHORIZED => ServiceError::Unauthorized(msg),
        StatusCode::FORBIDDEN => ServiceError::Forbidden(msg),
        _ => ServiceError::Internal(msg),
    }
}

#[async_trait]
impl RecordService for HttpService {
    async fn list_records(&self) -> Result<Vec<HealthRecord>, ServiceError> {
        self.get_json("/api/records").await
    }

    async fn get_record(&self, id: &str) -> Result<HealthRecord, ServiceError> {
        self.get_json(&format!("/api/records/{id}")).await
    }

    async fn create_record(&self, input: &CreateRecord) -> Result<HealthRecord, ServiceError> {
        self.post_json("/api/records", input).await
    }

    async fn update_record(
        &self,
        id: &str,
        update: &UpdateRecord,
    ) -> Result<HealthRecord, ServiceError> {
        self.put_json(&format!("/api/records/{id}"), update).await
    }

    async fn delete_record(&self, id: &str) -> Result<(), ServiceError> {
        self.delete_req(&format!("/api/records/{id}")).await
    }

    async fn update_record_files(
        &self,
        id: &str,
        files: &[NewAttachment],
        expected_version: Option<i64>,
    ) -> Result<HealthRecord, ServiceError> {
        let body = ReplaceFiles {
            files: files.to_vec(),
            expected_version,
        };
        self.put_json(&format!("/api/records/{id}/files"), &body)
            .await
    }

    async fn delete_files_from_record(
        &self,
        id: &str,
        remote_ids: &[String],
    ) -> Result<RemovalReport, ServiceError> {
        let body = RemoveFiles {
            remote_ids: remote_ids.to_vec(),
        };
        self.post_json(&format!("/api/records/{id}/files/delete"), &body)
            .await
    }
}
