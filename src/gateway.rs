/// Backend gateway: the only module that talks HTTP to the resume and
/// job-search service. One attempt per call; callers decide what to show.
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use crate::errors::GatewayError;
use crate::models::{
    AnalyzeJobRequest, AnalyzeJobResponse, ApplicationSummary, JobRecord, JobSearchRequest,
    JobSearchResponse, ResumeParseRequest, ResumeParseResponse, ResumePdfRequest,
    ResumeTailorRequest, ResumeTailorResponse, TrackAck, UploadResponse,
};

/// The two calls the panel makes.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the tailored resume text for `job`.
    async fn analyze_job(&self, job: &JobRecord) -> Result<String, GatewayError>;
    async fn track_application(
        &self,
        summary: &ApplicationSummary,
    ) -> Result<TrackAck, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    detail: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    /// Without `timeout` the transport default applies.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        debug!("POST {}", path);
        let response = self.client.post(self.url(path)).json(body).send().await;
        let response = check(path, response).await?;
        decode(path, response).await
    }

    async fn post_json_bytes<B>(&self, path: &str, body: &B) -> Result<Vec<u8>, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
    {
        debug!("POST {} (binary)", path);
        let response = self.client.post(self.url(path)).json(body).send().await;
        let response = check(path, response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn post_form(&self, path: &str, form: Form) -> Result<Response, GatewayError> {
        debug!("POST {} (multipart)", path);
        let response = self.client.post(self.url(path)).multipart(form).send().await;
        check(path, response).await
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, GatewayError> {
        debug!("GET {}", path);
        let response = self.client.get(self.url(path)).send().await;
        let response = check(path, response).await?;
        decode(path, response).await
    }

    // --- Job search ---

    pub async fn search_jobs(
        &self,
        request: &JobSearchRequest,
    ) -> Result<JobSearchResponse, GatewayError> {
        self.post_json("/api/v1/jobs/search", request).await
    }

    pub async fn experience_levels(&self) -> Result<Vec<String>, GatewayError> {
        self.get_json("/api/v1/jobs/experience-levels").await
    }

    // --- Resume processing ---

    pub async fn tailor_resume(
        &self,
        request: &ResumeTailorRequest,
    ) -> Result<ResumeTailorResponse, GatewayError> {
        self.post_json("/api/v1/resume/tailor", request).await
    }

    /// PDF bytes of the tailored resume.
    pub async fn tailor_resume_pdf(
        &self,
        request: &ResumeTailorRequest,
    ) -> Result<Vec<u8>, GatewayError> {
        self.post_json_bytes("/api/v1/resume/tailor-pdf", request)
            .await
    }

    pub async fn generate_pdf_from_text(
        &self,
        request: &ResumePdfRequest,
    ) -> Result<Vec<u8>, GatewayError> {
        self.post_json_bytes("/api/v1/resume/generate-pdf-from-text", request)
            .await
    }

    pub async fn upload_and_tailor_pdf(
        &self,
        file_name: &str,
        pdf: Vec<u8>,
        job_description: &str,
        job_title: &str,
        company_name: &str,
    ) -> Result<Vec<u8>, GatewayError> {
        let form = Form::new()
            .part("file", pdf_part(file_name, pdf)?)
            .text("job_description", job_description.to_string())
            .text("job_title", job_title.to_string())
            .text("company_name", company_name.to_string());
        let response = self
            .post_form("/api/v1/resume/upload-and-tailor-pdf", form)
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn extract_from_pdf(
        &self,
        file_name: &str,
        pdf: Vec<u8>,
    ) -> Result<UploadResponse, GatewayError> {
        let path = "/api/v1/resume/extract-from-pdf";
        let form = Form::new().part("file", pdf_part(file_name, pdf)?);
        let response = self.post_form(path, form).await?;
        decode(path, response).await
    }

    pub async fn parse_resume(
        &self,
        request: &ResumeParseRequest,
    ) -> Result<ResumeParseResponse, GatewayError> {
        self.post_json("/api/v1/resume/parse", request).await
    }

    pub async fn health(&self) -> Result<serde_json::Value, GatewayError> {
        self.get_json("/").await
    }
}

#[async_trait]
impl Backend for HttpGateway {
    async fn analyze_job(&self, job: &JobRecord) -> Result<String, GatewayError> {
        let request = AnalyzeJobRequest::from(job);
        let response: AnalyzeJobResponse =
            self.post_json("/extension/analyze-job", &request).await?;
        Ok(response.tailored_resume)
    }

    async fn track_application(
        &self,
        summary: &ApplicationSummary,
    ) -> Result<TrackAck, GatewayError> {
        let path = "/extension/track-application";
        debug!("POST {}", path);
        let response = self.client.post(self.url(path)).json(summary).send().await;
        let response = check(path, response).await?;

        // any 2xx is an ack, whatever the body says
        let body = response.text().await?;
        let mut ack: TrackAck = serde_json::from_str(&body).unwrap_or_default();
        ack.success = true;
        Ok(ack)
    }
}

fn pdf_part(file_name: &str, pdf: Vec<u8>) -> Result<Part, GatewayError> {
    Ok(Part::bytes(pdf)
        .file_name(file_name.to_string())
        .mime_str("application/pdf")?)
}

/// Map transport failures and non-2xx statuses to `GatewayError`.
async fn check(
    path: &str,
    response: Result<Response, reqwest::Error>,
) -> Result<Response, GatewayError> {
    let response = match response {
        Ok(r) => r,
        Err(e) => {
            error!("Request to {} failed: {}", path, e);
            return Err(GatewayError::Network(e));
        }
    };

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body)
        .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()));
    error!("{} returned {}: {}", path, status, message);
    Err(GatewayError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn decode<R: DeserializeOwned>(path: &str, response: Response) -> Result<R, GatewayError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        error!("Unexpected response from {}: {}", path, e);
        GatewayError::Decode(e.to_string())
    })
}

/// Pull a human-readable message out of an error body: `message`, or
/// FastAPI's `detail` (string or structured).
fn error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    if let Some(message) = parsed.message.filter(|m| !m.is_empty()) {
        return Some(message);
    }
    match parsed.detail? {
        serde_json::Value::String(detail) if !detail.is_empty() => Some(detail),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}
