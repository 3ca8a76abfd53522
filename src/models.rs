use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    Linkedin,
    Indeed,
    Glassdoor,
    Google,
    Angellist,
    Generic,
}

impl Site {
    pub fn as_str(&self) -> &'static str {
        match self {
            Site::Linkedin => "linkedin",
            Site::Indeed => "indeed",
            Site::Glassdoor => "glassdoor",
            Site::Google => "google",
            Site::Angellist => "angellist",
            Site::Generic => "generic",
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scraped job posting. Built once by an extraction strategy and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub description: String,
    pub url: String,
    pub site: Site,
}

impl JobRecord {
    /// Title, company and description must all carry text before the record
    /// may be sent to the backend.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty()
            && !self.company.trim().is_empty()
            && !self.description.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailoredResult {
    pub job: JobRecord,
    pub tailored_resume_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Applied,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub job_title: String,
    pub company: String,
    pub url: String,
    pub applied_at: DateTime<Utc>,
    pub status: ApplicationStatus,
}

impl ApplicationRecord {
    pub fn applied(job: &JobRecord, applied_at: DateTime<Utc>) -> Self {
        Self {
            job_title: job.title.clone(),
            company: job.company.clone(),
            url: job.url.clone(),
            applied_at,
            status: ApplicationStatus::Applied,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    pub auto_apply_enabled: bool,
    pub max_applications_per_day: u32,
    pub applications_today: u32,
    pub last_application_date: Option<NaiveDate>,
}

impl QuotaState {
    pub fn remaining(&self) -> u32 {
        self.max_applications_per_day
            .saturating_sub(self.applications_today)
    }

    pub fn is_exhausted(&self) -> bool {
        self.applications_today >= self.max_applications_per_day
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio: Option<String>,
}

impl UserProfile {
    /// Explicit first name, or the first word of the full name.
    pub fn first_name(&self) -> Option<String> {
        non_empty(self.first_name.as_deref())
            .or_else(|| self.full_name.split_whitespace().next().map(str::to_string))
    }

    /// Explicit last name, or everything after the first word of the full name.
    pub fn last_name(&self) -> Option<String> {
        if let Some(last) = non_empty(self.last_name.as_deref()) {
            return Some(last);
        }
        let rest: Vec<&str> = self.full_name.split_whitespace().skip(1).collect();
        if rest.is_empty() {
            None
        } else {
            Some(rest.join(" "))
        }
    }

    pub fn full_name(&self) -> Option<String> {
        non_empty(Some(&self.full_name))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Third-party keys the user supplies for the backend's job search and LLM
/// calls. Stored client-side only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serpapi_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
}

impl ApiKeys {
    pub fn has_valid_keys(&self) -> bool {
        self.serpapi_key.as_deref().is_some_and(|k| !k.is_empty())
            && self.gemini_api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

// --- Backend wire types ---

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeJobRequest<'a> {
    pub job_description: &'a str,
    pub job_title: &'a str,
    pub company: &'a str,
    pub location: &'a str,
    pub url: &'a str,
    pub site: Site,
}

impl<'a> From<&'a JobRecord> for AnalyzeJobRequest<'a> {
    fn from(job: &'a JobRecord) -> Self {
        Self {
            job_description: &job.description,
            job_title: &job.title,
            company: &job.company,
            location: job.location.as_deref().unwrap_or(""),
            url: &job.url,
            site: job.site,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeJobResponse {
    pub tailored_resume: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub job_title: String,
    pub company: String,
    pub url: String,
    pub site: Site,
    pub status: ApplicationStatus,
}

impl From<&JobRecord> for ApplicationSummary {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_title: job.title.clone(),
            company: job.company.clone(),
            url: job.url.clone(),
            site: job.site,
            status: ApplicationStatus::Applied,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackAck {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperienceLevel {
    #[serde(rename = "entry level")]
    Entry,
    #[serde(rename = "junior")]
    Junior,
    #[serde(rename = "mid level")]
    Mid,
    #[serde(rename = "senior")]
    Senior,
    #[serde(rename = "lead")]
    Lead,
    #[serde(rename = "executive")]
    Executive,
}

impl std::str::FromStr for ExperienceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "entry" | "entry level" | "entry-level" => Ok(Self::Entry),
            "junior" => Ok(Self::Junior),
            "mid" | "mid level" | "mid-level" => Ok(Self::Mid),
            "senior" => Ok(Self::Senior),
            "lead" => Ok(Self::Lead),
            "executive" => Ok(Self::Executive),
            other => Err(format!(
                "Unknown experience level '{}'. Available: entry, junior, mid, senior, lead, executive",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSearchRequest {
    pub job_title: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience: Option<ExperienceLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_keys: Option<ApiKeys>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResult {
    pub title: Option<String>,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub job_url: Option<String>,
    pub job_id: Option<String>,
    #[serde(default)]
    pub raw_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobSearchResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub jobs: Vec<JobResult>,
    #[serde(default)]
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeTailorRequest {
    pub resume_text: String,
    pub job_description: String,
    pub job_title: String,
    pub company_name: String,
    pub api_keys: ApiKeys,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResumeTailorResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub tailored_resume_text: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumePdfRequest {
    pub tailored_resume_text: String,
    pub job_title: String,
    pub company_name: String,
    pub api_keys: ApiKeys,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeParseRequest {
    pub resume_text: String,
    pub api_keys: ApiKeys,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResumeParseResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub parsed_data: Option<std::collections::BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub resume_text: Option<String>,
    pub filename: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobRecord {
        JobRecord {
            title: "Backend Engineer".to_string(),
            company: "Acme".to_string(),
            location: None,
            description: "Build services.".to_string(),
            url: "https://www.indeed.com/viewjob?jk=1".to_string(),
            site: Site::Indeed,
        }
    }

    #[test]
    fn test_job_record_requires_title_company_description() {
        assert!(job().is_valid());

        let mut missing = job();
        missing.description = "   ".to_string();
        assert!(!missing.is_valid());

        let mut missing = job();
        missing.company = String::new();
        assert!(!missing.is_valid());
    }

    #[test]
    fn test_site_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Site::Angellist).unwrap(), "\"angellist\"");
        let site: Site = serde_json::from_str("\"glassdoor\"").unwrap();
        assert_eq!(site, Site::Glassdoor);
    }

    #[test]
    fn test_profile_name_fallbacks() {
        let profile = UserProfile {
            full_name: "Ada King Lovelace".to_string(),
            ..Default::default()
        };
        assert_eq!(profile.first_name(), Some("Ada".to_string()));
        assert_eq!(profile.last_name(), Some("King Lovelace".to_string()));

        let explicit = UserProfile {
            full_name: "Ada Lovelace".to_string(),
            first_name: Some("Augusta".to_string()),
            last_name: Some("Byron".to_string()),
            ..Default::default()
        };
        assert_eq!(explicit.first_name(), Some("Augusta".to_string()));
        assert_eq!(explicit.last_name(), Some("Byron".to_string()));

        let empty = UserProfile::default();
        assert_eq!(empty.first_name(), None);
        assert_eq!(empty.last_name(), None);
        assert_eq!(empty.full_name(), None);
    }

    #[test]
    fn test_profile_uses_camel_case_keys() {
        let json = r#"{"fullName":"Ada Lovelace","email":"ada@example.com","phone":"555"}"#;
        let profile: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.full_name, "Ada Lovelace");
        assert_eq!(profile.email, "ada@example.com");
        assert!(profile.linkedin.is_none());
    }

    #[test]
    fn test_application_record_wire_format() {
        let applied_at = DateTime::parse_from_rfc3339("2026-10-14T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = ApplicationRecord::applied(&job(), applied_at);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["jobTitle"], "Backend Engineer");
        assert_eq!(value["status"], "applied");
        assert_eq!(value["appliedAt"], "2026-10-14T09:30:00Z");
    }

    #[test]
    fn test_analyze_request_defaults_missing_location() {
        let job = job();
        let value = serde_json::to_value(AnalyzeJobRequest::from(&job)).unwrap();
        assert_eq!(value["location"], "");
        assert_eq!(value["site"], "indeed");
        assert_eq!(value["job_title"], "Backend Engineer");
    }

    #[test]
    fn test_api_keys_validity() {
        let mut keys = ApiKeys::default();
        assert!(!keys.has_valid_keys());
        keys.serpapi_key = Some("serp".to_string());
        assert!(!keys.has_valid_keys());
        keys.gemini_api_key = Some("gem".to_string());
        assert!(keys.has_valid_keys());
    }

    #[test]
    fn test_experience_level_parsing() {
        assert_eq!("Senior".parse::<ExperienceLevel>(), Ok(ExperienceLevel::Senior));
        assert_eq!("mid".parse::<ExperienceLevel>(), Ok(ExperienceLevel::Mid));
        assert!("wizard".parse::<ExperienceLevel>().is_err());
        assert_eq!(
            serde_json::to_string(&ExperienceLevel::Entry).unwrap(),
            "\"entry level\""
        );
    }
}
