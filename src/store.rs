use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::errors::AssistError;
use crate::models::{ApiKeys, ApplicationRecord, QuotaState, UserProfile};

pub const AUTO_APPLY_ENABLED: &str = "autoApplyEnabled";
pub const MAX_APPLICATIONS_PER_DAY: &str = "maxApplicationsPerDay";
pub const APPLICATIONS_TODAY: &str = "applicationsToday";
pub const LAST_APPLICATION_DATE: &str = "lastApplicationDate";
pub const USER_PROFILE: &str = "userProfile";
pub const APPLICATIONS: &str = "applications";
pub const API_KEYS: &str = "hirepilot_api_keys";

pub const DEFAULT_MAX_APPLICATIONS_PER_DAY: u32 = 10;

/// Everything `settings show` reports.
pub const SETTINGS_KEYS: [&str; 5] = [
    AUTO_APPLY_ENABLED,
    MAX_APPLICATIONS_PER_DAY,
    APPLICATIONS_TODAY,
    LAST_APPLICATION_DATE,
    USER_PROFILE,
];

const QUOTA_KEYS: [&str; 4] = [
    AUTO_APPLY_ENABLED,
    MAX_APPLICATIONS_PER_DAY,
    APPLICATIONS_TODAY,
    LAST_APPLICATION_DATE,
];

pub type Entries = Map<String, Value>;

/// Persistent key-value storage with JSON values.
pub trait KeyValueStore: Send {
    /// Returns only the keys that are present.
    fn get(&self, keys: &[&str]) -> Result<Entries>;
    fn set(&mut self, entries: Entries) -> Result<()>;
    fn remove(&mut self, keys: &[&str]) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Entries,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<Entries> {
        Ok(keys
            .iter()
            .filter_map(|key| self.entries.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    fn set(&mut self, entries: Entries) -> Result<()> {
        self.entries.extend(entries);
        Ok(())
    }

    fn remove(&mut self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.entries.remove(*key);
        }
        Ok(())
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open settings store at {}", path.display()))?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, keys: &[&str]) -> Result<Entries> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut entries = Entries::new();
        for key in keys {
            let raw: Option<String> = stmt.query_row([key], |row| row.get(0)).optional()?;
            if let Some(raw) = raw {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("Corrupt value stored under '{}'", key))?;
                entries.insert(key.to_string(), value);
            }
        }
        Ok(entries)
    }

    fn set(&mut self, entries: Entries) -> Result<()> {
        let tx = self.conn.transaction()?;
        for (key, value) in &entries {
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                params![key, value.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&mut self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        }
        Ok(())
    }
}

/// Source of "now" for quota bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    /// The calendar day a timestamp falls on for the user.
    fn date_of(&self, at: DateTime<Utc>) -> NaiveDate;

    fn today(&self) -> NaiveDate {
        self.date_of(self.now())
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn date_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&Local).date_naive()
    }
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl FixedClock {
    pub fn at(rfc3339: &str) -> Self {
        Self(
            DateTime::parse_from_rfc3339(rfc3339)
                .expect("valid timestamp")
                .with_timezone(&Utc),
        )
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }

    fn date_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.date_naive()
    }
}

/// Settings, quota counters, profile and application history on top of a
/// key-value store. All quota rollover goes through `reset_if_new_day`.
pub struct SettingsStore {
    store: Box<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    changes: broadcast::Sender<Vec<String>>,
}

impl SettingsStore {
    pub fn new(store: Box<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            store,
            clock,
            changes,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Receives the names of keys changed by each `set`.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<String>> {
        self.changes.subscribe()
    }

    pub fn get(&self, keys: &[&str]) -> Result<Entries> {
        self.store.get(keys)
    }

    pub fn set(&mut self, entries: Entries) -> Result<()> {
        let changed: Vec<String> = entries.keys().cloned().collect();
        self.store.set(entries)?;
        // no subscribers is fine
        let _ = self.changes.send(changed);
        Ok(())
    }

    /// Write defaults for any setting that has never been stored.
    pub fn initialize_defaults(&mut self) -> Result<()> {
        let existing = self.store.get(&QUOTA_KEYS)?;
        let defaults = [
            (AUTO_APPLY_ENABLED, json!(false)),
            (MAX_APPLICATIONS_PER_DAY, json!(DEFAULT_MAX_APPLICATIONS_PER_DAY)),
            (APPLICATIONS_TODAY, json!(0)),
            (LAST_APPLICATION_DATE, json!(self.clock.today())),
        ];

        let missing: Entries = defaults
            .into_iter()
            .filter(|(key, _)| !existing.contains_key(*key))
            .map(|(key, value)| (key.to_string(), value))
            .collect();

        if !missing.is_empty() {
            info!("Initializing {} default setting(s)", missing.len());
            self.set(missing)?;
        }
        Ok(())
    }

    /// Zero the daily counter if the stored date is not today. Returns whether
    /// a reset happened; a second call on the same day is a no-op.
    pub fn reset_if_new_day(&mut self) -> Result<bool> {
        let today = self.clock.today();
        let entries = self.store.get(&[LAST_APPLICATION_DATE])?;
        let last: Option<NaiveDate> = entries
            .get(LAST_APPLICATION_DATE)
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        if last == Some(today) {
            return Ok(false);
        }

        debug!("Day rollover: {:?} -> {}", last, today);
        let mut reset = Entries::new();
        reset.insert(APPLICATIONS_TODAY.to_string(), json!(0));
        reset.insert(LAST_APPLICATION_DATE.to_string(), json!(today));
        self.set(reset)?;
        Ok(true)
    }

    /// Current quota state, after applying any pending day rollover.
    pub fn settings(&mut self) -> Result<QuotaState> {
        self.reset_if_new_day()?;
        let entries = self.store.get(&QUOTA_KEYS)?;

        Ok(QuotaState {
            auto_apply_enabled: read(&entries, AUTO_APPLY_ENABLED)?.unwrap_or(false),
            max_applications_per_day: read(&entries, MAX_APPLICATIONS_PER_DAY)?
                .unwrap_or(DEFAULT_MAX_APPLICATIONS_PER_DAY),
            applications_today: read(&entries, APPLICATIONS_TODAY)?.unwrap_or(0),
            last_application_date: entries
                .get(LAST_APPLICATION_DATE)
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
        })
    }

    /// Gate for analyze and apply: auto-apply must be on and today's cap not
    /// yet reached.
    pub fn authorize(&mut self) -> Result<QuotaState, AssistError> {
        let state = self.settings().map_err(AssistError::Storage)?;
        if !state.auto_apply_enabled {
            return Err(AssistError::AutoApplyDisabled);
        }
        if state.is_exhausted() {
            return Err(AssistError::QuotaExceeded {
                limit: state.max_applications_per_day,
            });
        }
        Ok(state)
    }

    /// Append `record` to the history and count it against today's quota in
    /// one write.
    pub fn record_application(
        &mut self,
        record: ApplicationRecord,
    ) -> Result<QuotaState, AssistError> {
        let mut state = self.settings().map_err(AssistError::Storage)?;
        if state.is_exhausted() {
            return Err(AssistError::QuotaExceeded {
                limit: state.max_applications_per_day,
            });
        }

        let mut history = self.applications().map_err(AssistError::Storage)?;
        history.push(record);
        state.applications_today += 1;
        state.last_application_date = Some(self.clock.today());

        let mut update = Entries::new();
        update.insert(
            APPLICATIONS.to_string(),
            serde_json::to_value(&history).map_err(|e| AssistError::Storage(e.into()))?,
        );
        update.insert(
            APPLICATIONS_TODAY.to_string(),
            json!(state.applications_today),
        );
        update.insert(
            LAST_APPLICATION_DATE.to_string(),
            json!(state.last_application_date),
        );
        self.set(update).map_err(AssistError::Storage)?;

        info!(
            "Recorded application {}/{} for today",
            state.applications_today, state.max_applications_per_day
        );
        Ok(state)
    }

    pub fn applications(&self) -> Result<Vec<ApplicationRecord>> {
        let entries = self.store.get(&[APPLICATIONS])?;
        Ok(read(&entries, APPLICATIONS)?.unwrap_or_default())
    }

    /// History entries whose timestamp falls on `date`.
    pub fn applications_on(&self, date: NaiveDate) -> Result<Vec<ApplicationRecord>> {
        Ok(self
            .applications()?
            .into_iter()
            .filter(|app| self.clock.date_of(app.applied_at) == date)
            .collect())
    }

    pub fn set_auto_apply(&mut self, enabled: bool) -> Result<()> {
        self.set_one(AUTO_APPLY_ENABLED, json!(enabled))
    }

    pub fn set_max_per_day(&mut self, max: u32) -> Result<()> {
        self.set_one(MAX_APPLICATIONS_PER_DAY, json!(max))
    }

    pub fn profile(&self) -> Result<Option<UserProfile>> {
        let entries = self.store.get(&[USER_PROFILE])?;
        read(&entries, USER_PROFILE)
    }

    pub fn set_profile(&mut self, profile: &UserProfile) -> Result<()> {
        self.set_one(USER_PROFILE, serde_json::to_value(profile)?)
    }

    /// Keys are kept as a serialized JSON string under a fixed key. An
    /// unreadable value is reported as absent.
    pub fn api_keys(&self) -> Result<Option<ApiKeys>> {
        let entries = self.store.get(&[API_KEYS])?;
        let Some(Value::String(raw)) = entries.get(API_KEYS) else {
            return Ok(None);
        };
        match serde_json::from_str(raw) {
            Ok(keys) => Ok(Some(keys)),
            Err(e) => {
                warn!("Error parsing stored API keys: {}", e);
                Ok(None)
            }
        }
    }

    pub fn set_api_keys(&mut self, keys: &ApiKeys) -> Result<()> {
        let raw = serde_json::to_string(keys)?;
        self.set_one(API_KEYS, Value::String(raw))
    }

    pub fn clear_api_keys(&mut self) -> Result<()> {
        self.store.remove(&[API_KEYS])?;
        let _ = self.changes.send(vec![API_KEYS.to_string()]);
        Ok(())
    }

    fn set_one(&mut self, key: &str, value: Value) -> Result<()> {
        let mut entries = Entries::new();
        entries.insert(key.to_string(), value);
        self.set(entries)
    }
}

fn read<T: DeserializeOwned>(entries: &Entries, key: &str) -> Result<Option<T>> {
    match entries.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .with_context(|| format!("Stored '{}' has an unexpected shape", key)),
    }
}

/// Feed every change notification to `on_change` until the store is dropped.
/// A slow receiver skips what it missed and keeps going.
pub async fn follow_changes(
    mut changes: broadcast::Receiver<Vec<String>>,
    mut on_change: impl FnMut(&[String]),
) {
    loop {
        match changes.recv().await {
            Ok(keys) => on_change(&keys),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Missed {} settings change notification(s)", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
