mod browser;
mod config;
mod errors;
mod extract;
mod forms;
mod gateway;
mod models;
mod panel;
mod site;
mod store;
mod tui;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use browser::{NavigationWatcher, StaticPage, WebDriverPage};
use config::Config;
use extract::StrategyRegistry;
use gateway::{Backend, HttpGateway};
use models::{
    ApiKeys, ExperienceLevel, JobSearchRequest, ResumeParseRequest, ResumePdfRequest,
    ResumeTailorRequest, UserProfile,
};
use panel::PanelController;
use store::{SettingsStore, SqliteStore, SystemClock};

const NAVIGATION_POLL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "hirepilot")]
#[command(about = "Job search assistant - detect postings, tailor resumes, auto-fill applications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the settings store with defaults
    Init,

    /// Show which job site a URL belongs to
    Detect {
        /// Page URL or hostname
        url: String,
    },

    /// Extract the job posting from a page
    Extract {
        /// Page URL
        url: String,

        /// Read HTML from this file instead of fetching the URL
        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Extract a job posting and get a tailored resume for it
    Analyze {
        /// Page URL
        url: String,

        /// Read HTML from this file instead of fetching the URL
        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Open a page in a WebDriver browser, analyze it and fill its application form
    Apply {
        /// Page URL
        url: String,

        /// Run the browser without a window
        #[arg(long)]
        headless: bool,
    },

    /// Preview what auto-fill would write into a page's application form
    Fill {
        /// Page URL
        url: String,

        /// Read HTML from this file instead of fetching the URL
        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Interactive panel for a page
    Panel {
        /// Page URL
        url: String,

        /// Read HTML from this file instead of fetching the URL
        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Auto-apply settings and daily quota
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },

    /// Profile used to fill application forms
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// List recorded applications
    History {
        /// Only applications made today
        #[arg(long)]
        today: bool,
    },

    /// Third-party API keys sent along with backend requests
    Keys {
        #[command(subcommand)]
        command: KeysCommands,
    },

    /// Check that the backend is reachable
    Status,

    /// Search job postings through the backend
    Search {
        /// Job title to search for
        title: String,

        /// Location
        #[arg(short, long)]
        location: String,

        /// Experience level (entry, junior, mid, senior, lead, executive)
        #[arg(short, long)]
        experience: Option<ExperienceLevel>,

        /// Number of jobs to return
        #[arg(short, long)]
        count: Option<u32>,
    },

    /// Resume processing through the backend
    Resume {
        #[command(subcommand)]
        command: ResumeCommands,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Show current settings
    Show {
        /// Print the stored values as JSON
        #[arg(long)]
        json: bool,
    },

    /// Enable auto-apply
    Enable,

    /// Disable auto-apply
    Disable,

    /// Set the maximum number of applications per day
    Max {
        limit: u32,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show the stored profile
    Show,

    /// Update profile fields (unset fields keep their value)
    Set {
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        linkedin: Option<String>,
        #[arg(long)]
        portfolio: Option<String>,
    },
}

#[derive(Subcommand)]
enum KeysCommands {
    /// Show stored keys (masked)
    Show,

    /// Store keys
    Set {
        #[arg(long)]
        serpapi: Option<String>,
        #[arg(long)]
        gemini: Option<String>,
    },

    /// Remove stored keys
    Clear,
}

#[derive(Subcommand)]
enum ResumeCommands {
    /// Tailor resume text for a job
    Tailor {
        #[command(flatten)]
        job: JobArgs,

        /// Resume text file
        #[arg(short, long)]
        resume: PathBuf,

        /// Write the tailored text here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Tailor resume text for a job and download it as PDF
    TailorPdf {
        #[command(flatten)]
        job: JobArgs,

        /// Resume text file
        #[arg(short, long)]
        resume: PathBuf,

        /// Output PDF path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Render already-tailored resume text as PDF
    PdfFromText {
        /// Tailored resume text file
        text: PathBuf,

        #[arg(long)]
        title: String,

        #[arg(long)]
        company: String,

        /// Output PDF path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Upload a PDF resume and get a tailored PDF back
    UploadTailorPdf {
        #[command(flatten)]
        job: JobArgs,

        /// Resume PDF
        pdf: PathBuf,

        /// Output PDF path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Extract resume text from a PDF
    Extract {
        pdf: PathBuf,
    },

    /// Parse resume text into structured fields
    Parse {
        /// Resume text file
        resume: PathBuf,
    },
}

#[derive(clap::Args)]
struct JobArgs {
    /// Job description text file
    #[arg(long)]
    description: PathBuf,

    #[arg(long)]
    title: String,

    #[arg(long)]
    company: String,
}

fn init_logging(config: &Config) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_settings(config: &Config) -> Result<SettingsStore> {
    let store = SqliteStore::open(&config.db_path)?;
    Ok(SettingsStore::new(Box::new(store), Arc::new(SystemClock)))
}

async fn load_page(config: &Config, url: &str, html: Option<&Path>) -> Result<StaticPage> {
    match html {
        Some(path) => {
            let html = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read HTML file: {}", path.display()))?;
            Ok(StaticPage::new(url, html))
        }
        None => StaticPage::fetch(url, config.http_timeout).await,
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn write_pdf(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write to {}", path.display()))?;
    println!("PDF saved to: {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Stored keys, or empty ones with a warning; the backend decides whether
/// it can do without them.
fn api_keys(settings: &SettingsStore) -> Result<ApiKeys> {
    let keys = settings.api_keys()?.unwrap_or_default();
    if !keys.has_valid_keys() {
        warn!("API keys are not fully configured; run: hirepilot keys set --serpapi .. --gemini ..");
    }
    Ok(keys)
}

fn mask(key: Option<&str>) -> String {
    match key {
        Some(k) if k.chars().count() > 4 => {
            let tail: String = k.chars().skip(k.chars().count() - 4).collect();
            format!("****{}", tail)
        }
        Some(k) if !k.is_empty() => "****".to_string(),
        _ => "(not set)".to_string(),
    }
}

fn panel_for<P>(
    page: Arc<P>,
    gateway: &HttpGateway,
    settings: SettingsStore,
) -> PanelController<P>
where
    P: browser::Page + forms::FieldWriter,
{
    let backend: Arc<dyn Backend> = Arc::new(gateway.clone());
    PanelController::new(
        page,
        backend,
        Arc::new(Mutex::new(settings)),
        Arc::new(StrategyRegistry::with_defaults()),
    )
}

fn print_outcome(outcome: &errors::Outcome) {
    match (&outcome.message, &outcome.error) {
        (_, Some(error)) => println!("Error: {}", error),
        (Some(message), None) => println!("{}", message),
        (None, None) => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_logging(&config);

    let gateway = HttpGateway::new(&config.api_url, config.http_timeout)?;

    match cli.command {
        Commands::Init => {
            let mut settings = open_settings(&config)?;
            settings.initialize_defaults()?;
            println!("Settings initialized at {}", config.db_path.display());
        }

        Commands::Detect { url } => {
            println!("{}", site::detect_from_url(&url));
        }

        Commands::Extract { url, html } => {
            let page = load_page(&config, &url, html.as_deref()).await?;
            let html = browser::Page::html(&page).await?;
            match StrategyRegistry::with_defaults().extract_page(&html, &url) {
                Some(job) => {
                    println!("Site: {}", job.site);
                    println!("Title: {}", job.title);
                    println!("Company: {}", job.company);
                    if let Some(location) = &job.location {
                        println!("Location: {}", location);
                    }
                    println!("URL: {}", job.url);
                    println!("\n--- Description ---\n{}", textwrap::fill(&job.description, 80));
                }
                None => println!("{}", errors::AssistError::NoJobFound),
            }
        }

        Commands::Analyze { url, html } => {
            let page = Arc::new(load_page(&config, &url, html.as_deref()).await?);
            let panel = panel_for(page, &gateway, open_settings(&config)?);

            let outcome = panel.analyze().await;
            print_outcome(&outcome);
            if let Some(result) = panel.job_data() {
                println!("\n--- Tailored Resume ---\n{}", result.tailored_resume_text);
            }
        }

        Commands::Apply { url, headless } => {
            let page = WebDriverPage::connect(&config.webdriver_url, headless).await?;
            page.open(&url).await?;
            // let the page render before scraping
            tokio::time::sleep(config.settle_delay).await;

            let page = Arc::new(page);
            let panel = panel_for(page.clone(), &gateway, open_settings(&config)?);

            let analyzed = panel.analyze().await;
            print_outcome(&analyzed);
            if analyzed.success {
                print_outcome(&panel.apply().await);
            }

            drop(panel);
            match Arc::try_unwrap(page) {
                Ok(page) => page.quit().await?,
                Err(_) => warn!("Browser session still in use; leaving it open"),
            }
        }

        Commands::Fill { url, html } => {
            let page = load_page(&config, &url, html.as_deref()).await?;
            let settings = open_settings(&config)?;
            let document = scraper::Html::parse_document(&browser::Page::html(&page).await?);

            let Some(form) = forms::locate_application_form(&document) else {
                println!("{}", errors::AssistError::FormNotFound);
                return Ok(());
            };
            let profile = settings.profile()?.unwrap_or_default();
            let tailored = StrategyRegistry::with_defaults()
                .extract(site::detect_from_url(&url), &document, &url)
                .map(|job| models::TailoredResult {
                    job,
                    tailored_resume_text: String::new(),
                });

            let report =
                forms::fill_application_form(&page, &form, &profile, tailored.as_ref()).await?;
            println!("Form #{} ({} field(s) filled)", form.form_index, report.filled.len());
            for write in page.writes().await {
                println!(
                    "  {:<24} {}",
                    write.target.name,
                    truncate(&write.value.replace('\n', " "), 60)
                );
            }
            for note in &report.notes {
                println!("Note: {}", note);
            }
        }

        Commands::Panel { url, html } => {
            let page = Arc::new(load_page(&config, &url, html.as_deref()).await?);
            let settings = open_settings(&config)?;
            let changes = settings.subscribe();
            tokio::spawn(store::follow_changes(changes, |keys| {
                debug!("settings changed: {}", keys.join(", "));
            }));
            let panel = Arc::new(panel_for(page, &gateway, settings));
            let watcher = NavigationWatcher::new(NAVIGATION_POLL, config.settle_delay);
            tui::run_panel(panel, watcher).await?;
        }

        Commands::Settings { command } => {
            let mut settings = open_settings(&config)?;
            match command {
                SettingsCommands::Show { json } => {
                    let state = settings.settings()?;
                    if json {
                        let entries = settings.get(&store::SETTINGS_KEYS)?;
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                        return Ok(());
                    }
                    println!(
                        "Auto-apply:          {}",
                        if state.auto_apply_enabled { "enabled" } else { "disabled" }
                    );
                    println!("Max per day:         {}", state.max_applications_per_day);
                    println!("Applications today:  {}", state.applications_today);
                    println!("Remaining today:     {}", state.remaining());
                    if let Some(date) = state.last_application_date {
                        println!("Counter date:        {}", date);
                    }
                }
                SettingsCommands::Enable => {
                    settings.set_auto_apply(true)?;
                    println!("Auto-apply enabled.");
                }
                SettingsCommands::Disable => {
                    settings.set_auto_apply(false)?;
                    println!("Auto-apply disabled.");
                }
                SettingsCommands::Max { limit } => {
                    settings.set_max_per_day(limit)?;
                    println!("Daily application limit set to {}.", limit);
                }
            }
        }

        Commands::Profile { command } => {
            let mut settings = open_settings(&config)?;
            match command {
                ProfileCommands::Show => match settings.profile()? {
                    Some(profile) => {
                        println!("Name: {}", profile.full_name);
                        if let Some(first) = profile.first_name() {
                            println!("First name: {}", first);
                        }
                        if let Some(last) = profile.last_name() {
                            println!("Last name: {}", last);
                        }
                        println!("Email: {}", profile.email);
                        println!("Phone: {}", profile.phone);
                        if let Some(linkedin) = &profile.linkedin {
                            println!("LinkedIn: {}", linkedin);
                        }
                        if let Some(portfolio) = &profile.portfolio {
                            println!("Portfolio: {}", portfolio);
                        }
                    }
                    None => println!("No profile set. Run: hirepilot profile set --full-name .. --email .."),
                },
                ProfileCommands::Set {
                    full_name,
                    first_name,
                    last_name,
                    email,
                    phone,
                    linkedin,
                    portfolio,
                } => {
                    let mut profile: UserProfile = settings.profile()?.unwrap_or_default();
                    if let Some(v) = full_name {
                        profile.full_name = v;
                    }
                    if let Some(v) = email {
                        profile.email = v;
                    }
                    if let Some(v) = phone {
                        profile.phone = v;
                    }
                    profile.first_name = first_name.or(profile.first_name);
                    profile.last_name = last_name.or(profile.last_name);
                    profile.linkedin = linkedin.or(profile.linkedin);
                    profile.portfolio = portfolio.or(profile.portfolio);

                    settings.set_profile(&profile)?;
                    println!("Profile saved.");
                }
            }
        }

        Commands::History { today } => {
            let settings = open_settings(&config)?;
            let applications = if today {
                settings.applications_on(settings.clock().today())?
            } else {
                settings.applications()?
            };

            if applications.is_empty() {
                println!("No applications found.");
            } else {
                println!("{:<20} {:<30} {:<20} {:<40}", "APPLIED", "TITLE", "COMPANY", "URL");
                println!("{}", "-".repeat(110));
                for app in applications {
                    println!(
                        "{:<20} {:<30} {:<20} {:<40}",
                        app.applied_at
                            .with_timezone(&chrono::Local)
                            .format("%Y-%m-%d %H:%M"),
                        truncate(&app.job_title, 28),
                        truncate(&app.company, 18),
                        truncate(&app.url, 40)
                    );
                }
            }
        }

        Commands::Keys { command } => {
            let mut settings = open_settings(&config)?;
            match command {
                KeysCommands::Show => {
                    let keys = settings.api_keys()?.unwrap_or_default();
                    println!("SerpAPI: {}", mask(keys.serpapi_key.as_deref()));
                    println!("Gemini:  {}", mask(keys.gemini_api_key.as_deref()));
                    if !keys.has_valid_keys() {
                        println!("\nBoth keys are required for search and tailoring.");
                    }
                }
                KeysCommands::Set { serpapi, gemini } => {
                    let mut keys = settings.api_keys()?.unwrap_or_default();
                    keys.serpapi_key = serpapi.or(keys.serpapi_key);
                    keys.gemini_api_key = gemini.or(keys.gemini_api_key);
                    settings.set_api_keys(&keys)?;
                    println!("API keys saved.");
                }
                KeysCommands::Clear => {
                    settings.clear_api_keys()?;
                    println!("API keys cleared.");
                }
            }
        }

        Commands::Status => {
            println!("Backend: {}", config.api_url);
            match gateway.health().await {
                Ok(body) => {
                    println!("Status: reachable");
                    if let Some(message) = body.get("message").and_then(|m| m.as_str()) {
                        println!("Message: {}", message);
                    }
                    match gateway.experience_levels().await {
                        Ok(levels) => println!("Experience levels: {}", levels.join(", ")),
                        Err(e) => warn!("Could not list experience levels: {}", e),
                    }
                }
                Err(e) => match e.status() {
                    Some(code) => println!("Status: responded with HTTP {}", code),
                    None => println!("Status: unreachable ({})", e),
                },
            }
        }

        Commands::Search {
            title,
            location,
            experience,
            count,
        } => {
            let settings = open_settings(&config)?;
            let request = JobSearchRequest {
                job_title: title,
                location,
                experience,
                job_count: count,
                api_keys: Some(api_keys(&settings)?),
            };
            info!("Searching for '{}' in {}", request.job_title, request.location);
            let response = gateway.search_jobs(&request).await?;

            if response.jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{:<4} {:<35} {:<25} {:<20}", "#", "TITLE", "COMPANY", "LOCATION");
                println!("{}", "-".repeat(86));
                for (i, job) in response.jobs.iter().enumerate() {
                    println!(
                        "{:<4} {:<35} {:<25} {:<20}",
                        i + 1,
                        truncate(job.title.as_deref().unwrap_or("?"), 33),
                        truncate(job.company_name.as_deref().unwrap_or("?"), 23),
                        truncate(job.location.as_deref().unwrap_or("-"), 20)
                    );
                    if let Some(url) = &job.job_url {
                        println!("     {}", url);
                    }
                }
                println!("\nTotal: {}", response.total_count);
            }
        }

        Commands::Resume { command } => {
            let settings = open_settings(&config)?;
            match command {
                ResumeCommands::Tailor { job, resume, output } => {
                    let request = tailor_request(&job, &resume, api_keys(&settings)?)?;
                    let response = gateway.tailor_resume(&request).await?;
                    let text = response
                        .tailored_resume_text
                        .ok_or_else(|| anyhow!("Backend returned no resume: {}", response.message))?;

                    if let Some(out_path) = output {
                        std::fs::write(&out_path, &text)
                            .with_context(|| format!("Failed to write to {}", out_path.display()))?;
                        println!("Tailored resume saved to: {}", out_path.display());
                    } else {
                        println!("\n--- Tailored Resume ---\n{}", text);
                    }
                }

                ResumeCommands::TailorPdf { job, resume, output } => {
                    let request = tailor_request(&job, &resume, api_keys(&settings)?)?;
                    let pdf = gateway.tailor_resume_pdf(&request).await?;
                    write_pdf(&output, &pdf)?;
                }

                ResumeCommands::PdfFromText {
                    text,
                    title,
                    company,
                    output,
                } => {
                    let request = ResumePdfRequest {
                        tailored_resume_text: read_text(&text)?,
                        job_title: title,
                        company_name: company,
                        api_keys: api_keys(&settings)?,
                    };
                    let pdf = gateway.generate_pdf_from_text(&request).await?;
                    write_pdf(&output, &pdf)?;
                }

                ResumeCommands::UploadTailorPdf { job, pdf, output } => {
                    let bytes = std::fs::read(&pdf)
                        .with_context(|| format!("Failed to read {}", pdf.display()))?;
                    let tailored = gateway
                        .upload_and_tailor_pdf(
                            &file_name(&pdf),
                            bytes,
                            &read_text(&job.description)?,
                            &job.title,
                            &job.company,
                        )
                        .await?;
                    write_pdf(&output, &tailored)?;
                }

                ResumeCommands::Extract { pdf } => {
                    let bytes = std::fs::read(&pdf)
                        .with_context(|| format!("Failed to read {}", pdf.display()))?;
                    let response = gateway.extract_from_pdf(&file_name(&pdf), bytes).await?;
                    match response.resume_text {
                        Some(text) => println!("{}", text),
                        None => println!("No text extracted: {}", response.message),
                    }
                }

                ResumeCommands::Parse { resume } => {
                    let request = ResumeParseRequest {
                        resume_text: read_text(&resume)?,
                        api_keys: api_keys(&settings)?,
                    };
                    let response = gateway.parse_resume(&request).await?;
                    match response.parsed_data {
                        Some(fields) => {
                            for (key, value) in fields {
                                println!("{:<16} {}", key, value);
                            }
                        }
                        None => println!("Nothing parsed: {}", response.message),
                    }
                }
            }
        }
    }

    Ok(())
}

fn tailor_request(job: &JobArgs, resume: &Path, api_keys: ApiKeys) -> Result<ResumeTailorRequest> {
    Ok(ResumeTailorRequest {
        resume_text: read_text(resume)?,
        job_description: read_text(&job.description)?,
        job_title: job.title.clone(),
        company_name: job.company.clone(),
        api_keys,
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("resume.pdf")
        .to_string()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
