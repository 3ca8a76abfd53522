/// Application form detection and auto-fill.
///
/// Locating and classifying happens on a parsed snapshot of the page; the
/// actual writes go through a `FieldWriter` so the browser-specific event
/// dispatch stays outside this module.
use anyhow::Result;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::models::{JobRecord, TailoredResult, UserProfile};

const FORM_SELECTOR: &str = "form";
const CONTROL_SELECTOR: &str = "input, textarea, select";

/// Input types that never take profile text.
const SKIPPED_INPUT_TYPES: &[&str] = &["hidden", "submit", "button", "reset", "checkbox", "radio", "image"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    ResumeFile,
    Email,
    Phone,
    FirstName,
    LastName,
    FullName,
    CoverLetter,
}

/// Addresses one control by document position: the `form_index`-th form on
/// the page and the `control_index`-th `input, textarea, select` inside it.
/// A browser resolves the same node through `document.forms[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTarget {
    pub form_index: usize,
    pub control_index: usize,
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocatedForm {
    pub form_index: usize,
    pub fields: Vec<FieldTarget>,
    /// A file or resume/cv field is present. Informational only.
    pub has_resume_field: bool,
}

/// Writes a value into a page control so that host-page scripts see it.
#[async_trait]
pub trait FieldWriter: Send + Sync {
    async fn write_field(&self, target: &FieldTarget, value: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FillReport {
    pub filled: Vec<FieldTarget>,
    pub notes: Vec<String>,
}

struct Control<'a> {
    element: ElementRef<'a>,
    tag: &'a str,
    name: String,
    input_type: String,
}

impl<'a> Control<'a> {
    fn new(element: ElementRef<'a>) -> Self {
        let value = element.value();
        Self {
            element,
            tag: value.name(),
            name: value.attr("name").unwrap_or_default().to_lowercase(),
            input_type: value.attr("type").unwrap_or("text").to_lowercase(),
        }
    }

    fn is_input(&self) -> bool {
        self.tag == "input"
    }

    fn is_text_input(&self) -> bool {
        self.is_input()
            && self.input_type != "file"
            && !SKIPPED_INPUT_TYPES.contains(&self.input_type.as_str())
    }

    fn name_has(&self, needles: &[&str]) -> bool {
        needles.iter().any(|n| self.name.contains(n))
    }

    fn is_name_like(&self) -> bool {
        self.is_text_input() && self.name_has(&["name", "first", "last"])
    }

    fn is_email(&self) -> bool {
        self.is_text_input() && (self.input_type == "email" || self.name_has(&["email"]))
    }

    fn mentions_resume(&self) -> bool {
        (self.is_input() && self.input_type == "file") || self.name_has(&["resume", "cv"])
    }

    fn classify(&self) -> Option<FieldKind> {
        if self.is_input() && self.input_type == "file" {
            return self.name_has(&["resume", "cv"]).then_some(FieldKind::ResumeFile);
        }
        if self.is_email() {
            return Some(FieldKind::Email);
        }
        if self.is_text_input() && (self.input_type == "tel" || self.name_has(&["phone"])) {
            return Some(FieldKind::Phone);
        }
        if self.is_name_like() {
            return Some(if self.name.contains("first") {
                FieldKind::FirstName
            } else if self.name.contains("last") {
                FieldKind::LastName
            } else {
                FieldKind::FullName
            });
        }
        if self.tag == "textarea" && self.name_has(&["cover", "letter", "additional"]) {
            return Some(FieldKind::CoverLetter);
        }
        None
    }
}

/// First form in document order with both a name-like and an email input.
pub fn locate_application_form(document: &Html) -> Option<LocatedForm> {
    let forms = Selector::parse(FORM_SELECTOR).ok()?;
    let controls = Selector::parse(CONTROL_SELECTOR).ok()?;

    for (form_index, form) in document.select(&forms).enumerate() {
        let parsed: Vec<Control> = form.select(&controls).map(Control::new).collect();

        let has_name = parsed.iter().any(Control::is_name_like);
        let has_email = parsed.iter().any(Control::is_email);
        if !(has_name && has_email) {
            debug!(
                "form #{} skipped (name field: {}, email field: {})",
                form_index, has_name, has_email
            );
            continue;
        }

        let fields = parsed
            .iter()
            .enumerate()
            .filter_map(|(control_index, control)| {
                control.classify().map(|kind| FieldTarget {
                    form_index,
                    control_index,
                    name: control
                        .element
                        .value()
                        .attr("name")
                        .unwrap_or_default()
                        .to_string(),
                    kind,
                })
            })
            .collect();

        return Some(LocatedForm {
            form_index,
            fields,
            has_resume_field: parsed.iter().any(Control::mentions_resume),
        });
    }

    None
}

/// Fixed cover letter for free-text fields.
pub fn cover_letter(job: &JobRecord) -> String {
    format!(
        "Dear Hiring Manager,\n\n\
         I am excited to apply for the {} position at {}.\n\n\
         Based on the job requirements, I believe my skills and experience make me an excellent \
         candidate for this role. I have carefully reviewed the position details and tailored my \
         application accordingly.\n\n\
         I look forward to discussing how I can contribute to your team's success.\n\n\
         Best regards,\n\
         [Your Name]",
        job.title, job.company
    )
}

fn value_for(
    kind: FieldKind,
    profile: &UserProfile,
    tailored: Option<&TailoredResult>,
) -> Option<String> {
    let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.to_string());
    match kind {
        FieldKind::FirstName => profile.first_name().or_else(|| profile.full_name()),
        FieldKind::LastName => profile.last_name().or_else(|| profile.full_name()),
        FieldKind::FullName => profile.full_name(),
        FieldKind::Email => non_empty(&profile.email),
        FieldKind::Phone => non_empty(&profile.phone),
        FieldKind::CoverLetter => tailored.map(|t| cover_letter(&t.job)),
        FieldKind::ResumeFile => None,
    }
}

/// Write profile values into every classified field of `form`.
///
/// Fields without a matching profile value are left alone. Resume file
/// inputs are never written; a note is added instead.
pub async fn fill_application_form<W>(
    writer: &W,
    form: &LocatedForm,
    profile: &UserProfile,
    tailored: Option<&TailoredResult>,
) -> Result<FillReport>
where
    W: FieldWriter + ?Sized,
{
    let mut report = FillReport::default();

    for field in &form.fields {
        if field.kind == FieldKind::ResumeFile {
            let note = match tailored {
                Some(_) => format!(
                    "Resume field '{}' left empty: file inputs cannot be set from script, upload the tailored resume manually",
                    field.name
                ),
                None => format!("Resume field '{}' left empty", field.name),
            };
            info!("{}", note);
            report.notes.push(note);
            continue;
        }

        let Some(value) = value_for(field.kind, profile, tailored) else {
            debug!("no value for {:?} field '{}'", field.kind, field.name);
            continue;
        };

        writer.write_field(field, &value).await?;
        report.filled.push(field.clone());
    }

    info!(
        "Filled {} field(s) in form #{}",
        report.filled.len(),
        form.form_index
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Site;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<(FieldTarget, String)>>,
    }

    impl RecordingWriter {
        fn value_of(&self, name: &str) -> Option<String> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .find(|(t, _)| t.name == name)
                .map(|(_, v)| v.clone())
        }
    }

    #[async_trait]
    impl FieldWriter for RecordingWriter {
        async fn write_field(&self, target: &FieldTarget, value: &str) -> Result<()> {
            self.writes
                .lock()
                .unwrap()
                .push((target.clone(), value.to_string()));
            Ok(())
        }
    }

    fn locate(html: &str) -> Option<LocatedForm> {
        locate_application_form(&Html::parse_document(html))
    }

    fn profile() -> UserProfile {
        UserProfile {
            full_name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: "555-0100".to_string(),
            ..Default::default()
        }
    }

    fn tailored() -> TailoredResult {
        TailoredResult {
            job: JobRecord {
                title: "Backend Engineer".to_string(),
                company: "Acme".to_string(),
                location: None,
                description: "Build services".to_string(),
                url: "https://acme.example/jobs/1".to_string(),
                site: Site::Generic,
            },
            tailored_resume_text: "Tailored".to_string(),
        }
    }

    const APPLICATION_FORM: &str = r#"
        <form id="search"><input name="q"></form>
        <form id="apply">
            <input type="hidden" name="form_name" value="apply">
            <input name="first_name">
            <input name="last_name">
            <input type="email" name="contact">
            <input type="tel" name="mobile">
            <input type="file" name="resume_upload">
            <select name="country"><option>US</option></select>
            <textarea name="cover_letter"></textarea>
            <textarea name="notes"></textarea>
        </form>
    "#;

    #[test]
    fn test_phone_only_form_rejected() {
        assert!(locate(r#"<form><input type="tel" name="phone"></form>"#).is_none());
    }

    #[test]
    fn test_email_and_first_name_form_accepted() {
        let form = locate(
            r#"<form><input type="email"><input name="first_name"></form>"#,
        )
        .unwrap();
        assert_eq!(form.form_index, 0);
        let kinds: Vec<FieldKind> = form.fields.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FieldKind::Email, FieldKind::FirstName]);
        assert!(!form.has_resume_field);
    }

    #[test]
    fn test_first_qualifying_form_wins() {
        let form = locate(APPLICATION_FORM).unwrap();
        assert_eq!(form.form_index, 1);
        assert!(form.has_resume_field);

        let kinds: Vec<(usize, FieldKind)> =
            form.fields.iter().map(|f| (f.control_index, f.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (1, FieldKind::FirstName),
                (2, FieldKind::LastName),
                (3, FieldKind::Email),
                (4, FieldKind::Phone),
                (5, FieldKind::ResumeFile),
                (7, FieldKind::CoverLetter),
            ]
        );
    }

    #[test]
    fn test_hidden_name_input_does_not_qualify() {
        let html = r#"<form><input type="hidden" name="username"><input type="email"></form>"#;
        assert!(locate(html).is_none());
    }

    #[test]
    fn test_no_forms_is_not_found() {
        assert!(locate("<div><input name=\"email\"></div>").is_none());
    }

    #[tokio::test]
    async fn test_fill_writes_profile_values() {
        let form = locate(APPLICATION_FORM).unwrap();
        let writer = RecordingWriter::default();
        let tailored = tailored();

        let report = fill_application_form(&writer, &form, &profile(), Some(&tailored))
            .await
            .unwrap();

        assert_eq!(writer.value_of("first_name").as_deref(), Some("Ada"));
        assert_eq!(writer.value_of("last_name").as_deref(), Some("Lovelace"));
        assert_eq!(writer.value_of("contact").as_deref(), Some("ada@example.com"));
        assert_eq!(writer.value_of("mobile").as_deref(), Some("555-0100"));
        assert!(writer.value_of("resume_upload").is_none());
        assert!(writer.value_of("notes").is_none());

        let letter = writer.value_of("cover_letter").unwrap();
        assert!(letter.contains("Backend Engineer position at Acme"));
        assert!(!letter.contains("Tailored"));

        assert_eq!(report.filled.len(), 5);
        assert_eq!(report.notes.len(), 1);
        assert!(report.notes[0].contains("upload the tailored resume manually"));
    }

    #[tokio::test]
    async fn test_fill_skips_fields_without_values() {
        let form = locate(APPLICATION_FORM).unwrap();
        let writer = RecordingWriter::default();
        let sparse = UserProfile {
            email: "ada@example.com".to_string(),
            ..Default::default()
        };

        let report = fill_application_form(&writer, &form, &sparse, None)
            .await
            .unwrap();
        assert_eq!(report.filled.len(), 1);
        assert_eq!(report.filled[0].kind, FieldKind::Email);
        assert!(writer.value_of("cover_letter").is_none());
    }

    #[tokio::test]
    async fn test_name_fields_fall_back_to_full_name() {
        let form = locate(
            r#"<form><input name="firstname"><input name="full_name"><input name="email"></form>"#,
        )
        .unwrap();
        let writer = RecordingWriter::default();
        let single = UserProfile {
            full_name: "Cher".to_string(),
            ..Default::default()
        };

        fill_application_form(&writer, &form, &single, None)
            .await
            .unwrap();
        assert_eq!(writer.value_of("firstname").as_deref(), Some("Cher"));
        assert_eq!(writer.value_of("full_name").as_deref(), Some("Cher"));
    }

    #[test]
    fn test_cover_letter_mentions_title_and_company() {
        let letter = cover_letter(&tailored().job);
        assert!(letter.starts_with("Dear Hiring Manager,"));
        assert!(letter.contains("Backend Engineer"));
        assert!(letter.contains("Acme"));
    }
}
