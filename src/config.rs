use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_TRANSIT_API_URL: &str = "http://localhost:8000";
const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Madrid;

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub transit_api_url: String,
    pub api_timeout: Duration,
    pub auto_refresh_period: Duration,
    pub search_debounce: Duration,
    pub page_size: usize,
    pub schedule_limit: usize,
    pub upcoming_limit: usize,
    pub stop_names_limit: usize,
    pub search_limit: usize,
    pub timezone: Tz,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            transit_api_url: DEFAULT_TRANSIT_API_URL.to_string(),
            api_timeout: Duration::from_secs(10),
            auto_refresh_period: Duration::from_secs(30),
            search_debounce: Duration::from_millis(300),
            page_size: 50,
            schedule_limit: 1000,
            upcoming_limit: 10,
            stop_names_limit: 2000,
            search_limit: 20,
            timezone: DEFAULT_TIMEZONE,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Settings::default();

        let page_size = parsed_var(&lookup, "SCHEDULE_PAGE_SIZE", defaults.page_size);
        let page_size = if page_size == 0 {
            tracing::warn!("SCHEDULE_PAGE_SIZE must be positive, using default: {}", defaults.page_size);
            defaults.page_size
        } else {
            page_size
        };

        Settings {
            bind_addr: string_var(&lookup, "DASHBOARD_BIND", defaults.bind_addr),
            transit_api_url: string_var(&lookup, "TRANSIT_API_URL", defaults.transit_api_url),
            api_timeout: Duration::from_secs(parsed_var(
                &lookup,
                "TRANSIT_API_TIMEOUT_SECS",
                defaults.api_timeout.as_secs(),
            )),
            auto_refresh_period: Duration::from_secs(parsed_var(
                &lookup,
                "AUTO_REFRESH_SECS",
                defaults.auto_refresh_period.as_secs(),
            ).max(1)),
            search_debounce: Duration::from_millis(parsed_var(
                &lookup,
                "SEARCH_DEBOUNCE_MS",
                defaults.search_debounce.as_millis() as u64,
            )),
            page_size,
            schedule_limit: parsed_var(&lookup, "SCHEDULE_LIMIT", defaults.schedule_limit),
            upcoming_limit: parsed_var(&lookup, "UPCOMING_LIMIT", defaults.upcoming_limit),
            stop_names_limit: parsed_var(&lookup, "STOP_NAMES_LIMIT", defaults.stop_names_limit),
            search_limit: parsed_var(&lookup, "SEARCH_LIMIT", defaults.search_limit),
            timezone: parsed_var(&lookup, "DASHBOARD_TIMEZONE", defaults.timezone),
        }
    }

    /// Wall clock in the network's timezone.
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone)
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

fn string_var(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: String) -> String {
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(value) => value,
        None => {
            tracing::trace!("{key} not set, using default: {default}");
            default
        }
    }
}

fn parsed_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        tracing::trace!("{key} not set, using default: {default}");
        return default;
    };

    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("{key}={raw:?} is invalid ({e}), using default: {default}");
            default
        }
    }
}
