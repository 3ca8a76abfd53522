use anyhow::Result;
use scraper::Html;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

use crate::browser::{NavigationWatcher, Page};
use crate::errors::{Action, AssistError, Outcome};
use crate::extract::StrategyRegistry;
use crate::forms::{fill_application_form, locate_application_form, FieldWriter, FillReport};
use crate::gateway::Backend;
use crate::models::{ApplicationRecord, ApplicationSummary, JobRecord, TailoredResult};
use crate::store::SettingsStore;

pub const STATUS_IDLE: &str = "Ready to detect job posting...";
pub const STATUS_ANALYZING: &str = "Analyzing job posting...";
pub const STATUS_READY: &str = "Job analyzed! Ready to apply.";
pub const STATUS_APPLYING: &str = "Starting auto-application...";
pub const STATUS_APPLIED: &str = "Application submitted successfully!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    Idle,
    Analyzing,
    Ready,
}

/// What the user asked the panel to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Analyze,
    Apply,
    Reset,
    Toggle,
    Close,
}

/// Everything a renderer needs to draw the panel.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelView {
    pub state: PanelState,
    pub status: String,
    pub progress: bool,
    pub analyze_enabled: bool,
    pub apply_enabled: bool,
    pub visible: bool,
    pub job: Option<TailoredResult>,
}

#[derive(Debug)]
struct Inner {
    state: PanelState,
    status: String,
    processing: bool,
    visible: bool,
    /// Bumped on every reset so late responses can be told apart.
    epoch: u64,
    result: Option<TailoredResult>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: PanelState::Idle,
            status: STATUS_IDLE.to_string(),
            processing: false,
            visible: true,
            epoch: 0,
            result: None,
        }
    }
}

/// Drives analyze and apply for one page. Only one of them runs at a time;
/// a second request while one is in flight is turned away with `Busy`.
pub struct PanelController<P: ?Sized> {
    page: Arc<P>,
    backend: Arc<dyn Backend>,
    settings: Arc<Mutex<SettingsStore>>,
    registry: Arc<StrategyRegistry>,
    inner: Mutex<Inner>,
}

impl<P> PanelController<P>
where
    P: Page + FieldWriter + ?Sized,
{
    pub fn new(
        page: Arc<P>,
        backend: Arc<dyn Backend>,
        settings: Arc<Mutex<SettingsStore>>,
        registry: Arc<StrategyRegistry>,
    ) -> Self {
        Self {
            page,
            backend,
            settings,
            registry,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn page(&self) -> &Arc<P> {
        &self.page
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings(&self) -> MutexGuard<'_, SettingsStore> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn view(&self) -> PanelView {
        let inner = self.inner();
        PanelView {
            state: inner.state,
            status: inner.status.clone(),
            progress: inner.processing,
            analyze_enabled: !inner.processing,
            apply_enabled: !inner.processing && inner.state == PanelState::Ready,
            visible: inner.visible,
            job: inner.result.clone(),
        }
    }

    /// The current tailored result, if a job has been analyzed.
    pub fn job_data(&self) -> Option<TailoredResult> {
        self.inner().result.clone()
    }

    pub async fn dispatch(&self, intent: Intent) -> Outcome {
        match intent {
            Intent::Analyze => self.analyze().await,
            Intent::Apply => self.apply().await,
            Intent::Reset => {
                self.reset();
                Outcome::ok(STATUS_IDLE)
            }
            Intent::Toggle => {
                let mut inner = self.inner();
                inner.visible = !inner.visible;
                Outcome::ok(if inner.visible { "Panel shown" } else { "Panel hidden" })
            }
            Intent::Close => {
                self.inner().visible = false;
                Outcome::ok("Panel hidden")
            }
        }
    }

    /// Forget the current job. Anything still in flight finishes quietly.
    pub fn reset(&self) {
        let mut inner = self.inner();
        inner.epoch += 1;
        inner.state = PanelState::Idle;
        inner.status = STATUS_IDLE.to_string();
        inner.result = None;
        info!("Panel reset");
    }

    /// Reset the panel whenever the page navigates, once the new page has
    /// settled. Runs until the page can no longer be read.
    pub async fn watch_navigation(&self, watcher: NavigationWatcher) -> Result<()> {
        watcher
            .run(self.page.as_ref(), |url| {
                info!("Page changed to {}", url);
                self.reset();
            })
            .await
    }

    /// Claim the processing flag. Returns the epoch the operation belongs to.
    fn begin(&self, action: Action) -> Result<u64, AssistError> {
        let mut inner = self.inner();
        if inner.processing {
            return Err(AssistError::Busy);
        }
        if action == Action::Apply && inner.state != PanelState::Ready {
            return Err(AssistError::NotAnalyzed);
        }

        inner.processing = true;
        match action {
            Action::Analyze => {
                inner.state = PanelState::Analyzing;
                inner.status = STATUS_ANALYZING.to_string();
                inner.result = None;
            }
            Action::Apply => inner.status = STATUS_APPLYING.to_string(),
        }
        Ok(inner.epoch)
    }

    pub async fn analyze(&self) -> Outcome {
        let epoch = match self.begin(Action::Analyze) {
            Ok(epoch) => epoch,
            Err(e) => return Outcome::failed(e.user_message(Action::Analyze)),
        };

        let result = self.run_analysis().await;

        let mut inner = self.inner();
        inner.processing = false;
        if inner.epoch != epoch {
            warn!("Dropping analysis for a page that is no longer shown");
            return Outcome::failed(AssistError::Superseded.to_string());
        }

        match result {
            Ok(tailored) => {
                info!(
                    "Analyzed '{}' at {}",
                    tailored.job.title, tailored.job.company
                );
                inner.state = PanelState::Ready;
                inner.status = STATUS_READY.to_string();
                inner.result = Some(tailored);
                Outcome::ok(STATUS_READY)
            }
            Err(e) => {
                error!("Analysis failed: {}", e);
                inner.state = PanelState::Idle;
                inner.status = e.user_message(Action::Analyze);
                Outcome::failed(inner.status.clone())
            }
        }
    }

    async fn run_analysis(&self) -> Result<TailoredResult, AssistError> {
        self.settings().authorize()?;

        let job = self.extract_job().await?;
        let tailored_resume_text = self.backend.analyze_job(&job).await?;

        Ok(TailoredResult {
            job,
            tailored_resume_text,
        })
    }

    async fn extract_job(&self) -> Result<JobRecord, AssistError> {
        let url = self.page.current_url().await.map_err(AssistError::Page)?;
        let html = self.page.html().await.map_err(AssistError::Page)?;
        self.registry
            .extract_page(&html, &url)
            .ok_or(AssistError::NoJobFound)
    }

    pub async fn apply(&self) -> Outcome {
        let epoch = match self.begin(Action::Apply) {
            Ok(epoch) => epoch,
            Err(e) => return Outcome::failed(e.user_message(Action::Apply)),
        };
        let tailored = self.job_data();

        let result = match tailored {
            Some(tailored) => self.run_apply(&tailored).await,
            None => Err(AssistError::NotAnalyzed),
        };

        let mut inner = self.inner();
        inner.processing = false;
        let current = inner.epoch == epoch;

        let outcome = match result {
            Ok(message) => Outcome::ok(message),
            Err(e) => {
                error!("Auto-apply failed: {}", e);
                Outcome::failed(e.user_message(Action::Apply))
            }
        };
        if current {
            inner.status = outcome
                .message
                .clone()
                .or_else(|| outcome.error.clone())
                .unwrap_or_default();
        }
        outcome
    }

    async fn run_apply(&self, tailored: &TailoredResult) -> Result<String, AssistError> {
        // Checked again here: the quota may have moved since analysis.
        self.settings().authorize()?;

        let html = self.page.html().await.map_err(AssistError::Page)?;
        let form = {
            let document = Html::parse_document(&html);
            locate_application_form(&document).ok_or(AssistError::FormNotFound)?
        };

        let profile = self
            .settings()
            .profile()
            .map_err(AssistError::Storage)?
            .unwrap_or_default();

        let report: FillReport =
            fill_application_form(self.page.as_ref(), &form, &profile, Some(tailored))
                .await
                .map_err(AssistError::Page)?;

        let clock = self.settings().clock().clone();
        let record = ApplicationRecord::applied(&tailored.job, clock.now());
        self.settings().record_application(record)?;

        let summary = ApplicationSummary::from(&tailored.job);
        let mut message = STATUS_APPLIED.to_string();
        match self.backend.track_application(&summary).await {
            Ok(ack) => info!(
                "Application tracked{}",
                ack.application_id
                    .map(|id| format!(" as {}", id))
                    .unwrap_or_default()
            ),
            Err(e) => {
                error!("Failed to track application: {}", e);
                message.push_str(" (tracking failed)");
            }
        }
        for note in &report.notes {
            info!("{}", note);
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::StaticPage;
    use crate::errors::GatewayError;
    use crate::models::{ApplicationStatus, TrackAck, UserProfile};
    use crate::store::{FixedClock, MemoryStore, APPLICATIONS_TODAY};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    const INDEED_URL: &str = "https://www.indeed.com/viewjob?jk=abc";

    #[derive(Default)]
    struct FakeBackend {
        analyze_calls: AtomicUsize,
        track_calls: AtomicUsize,
        fail_analyze: AtomicBool,
        fail_track: bool,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn analyze_job(&self, job: &JobRecord) -> Result<String, GatewayError> {
            self.analyze_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_analyze.load(Ordering::SeqCst) {
                return Err(GatewayError::Status {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(format!("Resume tailored for {}", job.title))
        }

        async fn track_application(
            &self,
            _summary: &ApplicationSummary,
        ) -> Result<TrackAck, GatewayError> {
            self.track_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_track {
                return Err(GatewayError::Decode("bad".to_string()));
            }
            Ok(TrackAck {
                success: true,
                ..Default::default()
            })
        }
    }

    fn indeed_html(with_form: bool) -> String {
        let description = "Design, build and run the services behind our platform. ".repeat(5);
        let form = if with_form {
            r#"<form><input name="first_name"><input name="last_name"><input type="email" name="email"><input type="file" name="resume"></form>"#
        } else {
            ""
        };
        format!(
            r#"
            <h1 data-testid="jobsearch-JobInfoHeader-title"><span>Backend Engineer</span></h1>
            <div data-testid="inlineHeader-companyName"><a>Acme</a></div>
            <div id="jobDescriptionText">{}</div>
            {}
            "#,
            description, form
        )
    }

    fn settings(enabled: bool, max: u32) -> Arc<Mutex<SettingsStore>> {
        let mut store = SettingsStore::new(
            Box::new(MemoryStore::new()),
            Arc::new(FixedClock::at("2026-10-14T09:00:00Z")),
        );
        store.initialize_defaults().unwrap();
        store.set_auto_apply(enabled).unwrap();
        store.set_max_per_day(max).unwrap();
        store
            .set_profile(&UserProfile {
                full_name: "Ada Lovelace".to_string(),
                email: "ada@example.com".to_string(),
                phone: "555-0100".to_string(),
                ..Default::default()
            })
            .unwrap();
        Arc::new(Mutex::new(store))
    }

    fn panel(
        html: String,
        backend: Arc<FakeBackend>,
        settings: Arc<Mutex<SettingsStore>>,
    ) -> PanelController<StaticPage> {
        PanelController::new(
            Arc::new(StaticPage::new(INDEED_URL, html)),
            backend,
            settings,
            Arc::new(StrategyRegistry::with_defaults()),
        )
    }

    fn applications_today(settings: &Arc<Mutex<SettingsStore>>) -> u32 {
        settings.lock().unwrap().settings().unwrap().applications_today
    }

    #[tokio::test]
    async fn test_analyze_then_apply_end_to_end() {
        let backend = Arc::new(FakeBackend::default());
        let store = settings(true, 10);
        let panel = panel(indeed_html(true), backend.clone(), store.clone());
        assert_eq!(panel.view().state, PanelState::Idle);
        assert!(!panel.view().apply_enabled);

        let outcome = panel.dispatch(Intent::Analyze).await;
        assert!(outcome.success, "{:?}", outcome);
        assert_eq!(panel.view().state, PanelState::Ready);
        let view = panel.view();
        assert!(view.apply_enabled);
        assert_eq!(view.status, STATUS_READY);
        let job = panel.job_data().unwrap();
        assert_eq!(job.job.title, "Backend Engineer");
        assert_eq!(job.job.company, "Acme");
        assert_eq!(job.tailored_resume_text, "Resume tailored for Backend Engineer");

        let outcome = panel.dispatch(Intent::Apply).await;
        assert!(outcome.success, "{:?}", outcome);
        assert_eq!(panel.view().status, STATUS_APPLIED);

        let writes = panel.page().writes().await;
        let written: Vec<(&str, &str)> = writes
            .iter()
            .map(|w| (w.target.name.as_str(), w.value.as_str()))
            .collect();
        assert_eq!(
            written,
            vec![
                ("first_name", "Ada"),
                ("last_name", "Lovelace"),
                ("email", "ada@example.com"),
            ]
        );

        let history = store.lock().unwrap().applications().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ApplicationStatus::Applied);
        assert_eq!(history[0].job_title, "Backend Engineer");
        assert_eq!(applications_today(&store), 1);
        assert_eq!(backend.track_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_quota_reached_blocks_before_network() {
        let backend = Arc::new(FakeBackend::default());
        let store = settings(true, 2);
        {
            let mut entries = serde_json::Map::new();
            entries.insert(APPLICATIONS_TODAY.to_string(), json!(2));
            store.lock().unwrap().set(entries).unwrap();
        }
        let panel = panel(indeed_html(true), backend.clone(), store.clone());

        let outcome = panel.analyze().await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Daily application limit reached (2)")
        );
        assert_eq!(panel.view().state, PanelState::Idle);
        assert_eq!(backend.analyze_calls.load(Ordering::SeqCst), 0);
        assert_eq!(applications_today(&store), 2);
    }

    #[tokio::test]
    async fn test_apply_rechecks_quota_before_touching_page() {
        let backend = Arc::new(FakeBackend::default());
        let store = settings(true, 1);
        let panel = panel(indeed_html(true), backend.clone(), store.clone());
        assert!(panel.analyze().await.success);

        {
            let mut entries = serde_json::Map::new();
            entries.insert(APPLICATIONS_TODAY.to_string(), json!(1));
            store.lock().unwrap().set(entries).unwrap();
        }

        let outcome = panel.apply().await;
        assert!(!outcome.success);
        assert!(panel.page().writes().await.is_empty());
        assert_eq!(backend.track_calls.load(Ordering::SeqCst), 0);
        assert_eq!(applications_today(&store), 1);
        assert!(panel.view().apply_enabled);
    }

    #[tokio::test]
    async fn test_disabled_auto_apply_rejects_analysis() {
        let backend = Arc::new(FakeBackend::default());
        let panel = panel(indeed_html(true), backend.clone(), settings(false, 10));

        let outcome = panel.analyze().await;
        assert_eq!(outcome.error.as_deref(), Some("Auto-apply is disabled"));
        assert_eq!(backend.analyze_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_job_found_returns_to_idle() {
        let backend = Arc::new(FakeBackend::default());
        let panel = panel("<html><body>nothing</body></html>".to_string(), backend.clone(), settings(true, 10));

        let outcome = panel.analyze().await;
        assert_eq!(
            outcome.error.as_deref(),
            Some("No job posting found on this page")
        );
        assert_eq!(panel.view().state, PanelState::Idle);
        assert!(panel.view().analyze_enabled);
        assert_eq!(backend.analyze_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_shows_generic_message() {
        let backend = Arc::new(FakeBackend {
            fail_analyze: AtomicBool::new(true),
            ..Default::default()
        });
        let panel = panel(indeed_html(true), backend.clone(), settings(true, 10));

        let outcome = panel.analyze().await;
        assert_eq!(outcome.error.as_deref(), Some("Failed to analyze job posting"));
        let view = panel.view();
        assert_eq!(view.state, PanelState::Idle);
        assert_eq!(view.status, "Failed to analyze job posting");
        assert!(view.job.is_none());
    }

    #[tokio::test]
    async fn test_apply_without_form_is_distinct_error() {
        let backend = Arc::new(FakeBackend::default());
        let store = settings(true, 10);
        let panel = panel(indeed_html(false), backend.clone(), store.clone());
        assert!(panel.analyze().await.success);

        let outcome = panel.apply().await;
        assert_eq!(
            outcome.error.as_deref(),
            Some("No application form found on this page")
        );
        assert_eq!(applications_today(&store), 0);
        assert_eq!(panel.view().state, PanelState::Ready);
    }

    #[tokio::test]
    async fn test_apply_requires_analysis() {
        let backend = Arc::new(FakeBackend::default());
        let panel = panel(indeed_html(true), backend, settings(true, 10));

        let outcome = panel.apply().await;
        assert_eq!(outcome.error.as_deref(), Some("Analyze a job before applying"));
        assert!(panel.page().writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_tracking_failure_keeps_local_record() {
        let backend = Arc::new(FakeBackend {
            fail_track: true,
            ..Default::default()
        });
        let store = settings(true, 10);
        let panel = panel(indeed_html(true), backend, store.clone());
        assert!(panel.analyze().await.success);

        let outcome = panel.apply().await;
        assert!(outcome.success);
        assert!(outcome.message.unwrap().contains("tracking failed"));
        assert_eq!(applications_today(&store), 1);
    }

    #[tokio::test]
    async fn test_overlapping_requests_are_rejected() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(FakeBackend {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let panel = Arc::new(panel(indeed_html(true), backend.clone(), settings(true, 10)));

        let first = {
            let panel = panel.clone();
            tokio::spawn(async move { panel.analyze().await })
        };
        while backend.analyze_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let view = panel.view();
        assert_eq!(view.state, PanelState::Analyzing);
        assert!(view.progress);
        assert!(!view.analyze_enabled);

        let second = panel.analyze().await;
        assert_eq!(
            second.error.as_deref(),
            Some("Another operation is already in progress")
        );
        assert_eq!(panel.apply().await.error, second.error);

        gate.notify_one();
        assert!(first.await.unwrap().success);
        assert_eq!(backend.analyze_calls.load(Ordering::SeqCst), 1);
        assert_eq!(panel.view().state, PanelState::Ready);
    }

    #[tokio::test]
    async fn test_late_response_after_reset_is_dropped() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(FakeBackend {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let panel = Arc::new(panel(indeed_html(true), backend.clone(), settings(true, 10)));

        let pending = {
            let panel = panel.clone();
            tokio::spawn(async move { panel.analyze().await })
        };
        while backend.analyze_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        panel.reset();
        gate.notify_one();

        let outcome = pending.await.unwrap();
        assert!(!outcome.success);
        let view = panel.view();
        assert_eq!(view.state, PanelState::Idle);
        assert_eq!(view.status, STATUS_IDLE);
        assert!(view.job.is_none());
        assert!(view.analyze_enabled);
    }

    #[tokio::test]
    async fn test_failed_reanalysis_drops_previous_result() {
        let backend = Arc::new(FakeBackend::default());
        let panel = panel(indeed_html(true), backend.clone(), settings(true, 10));

        assert!(panel.analyze().await.success);
        assert!(panel.view().job.is_some());

        backend.fail_analyze.store(true, Ordering::SeqCst);
        let outcome = panel.analyze().await;
        assert!(!outcome.success);

        let view = panel.view();
        assert_eq!(view.state, PanelState::Idle);
        assert!(view.job.is_none());
        assert!(panel.job_data().is_none());
        assert!(!view.apply_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_resets_ready_panel_after_settle() {
        let backend = Arc::new(FakeBackend::default());
        let panel = Arc::new(panel(indeed_html(true), backend, settings(true, 10)));
        assert!(panel.analyze().await.success);
        assert_eq!(panel.view().state, PanelState::Ready);

        let watcher = NavigationWatcher::new(Duration::from_millis(100), Duration::from_secs(1));
        let task = {
            let panel = panel.clone();
            tokio::spawn(async move { panel.watch_navigation(watcher).await })
        };

        tokio::time::sleep(Duration::from_millis(250)).await;
        panel
            .page()
            .navigate("https://www.indeed.com/viewjob?jk=def", indeed_html(false))
            .await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(panel.view().state, PanelState::Ready);
        assert!(panel.view().job.is_some());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let view = panel.view();
        assert_eq!(view.state, PanelState::Idle);
        assert_eq!(view.status, STATUS_IDLE);
        assert!(view.job.is_none());

        task.abort();
    }

    #[tokio::test]
    async fn test_toggle_and_close_visibility() {
        let panel = panel(String::new(), Arc::new(FakeBackend::default()), settings(true, 10));
        assert!(panel.view().visible);
        panel.dispatch(Intent::Toggle).await;
        assert!(!panel.view().visible);
        panel.dispatch(Intent::Toggle).await;
        assert!(panel.view().visible);
        panel.dispatch(Intent::Close).await;
        assert!(!panel.view().visible);
    }
}
