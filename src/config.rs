use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use log::{warn, LevelFilter};
use url::Url;
use crate::error::{GradeError, Result};
use crate::models::Term;
use crate::utils::portal::LOGIN_SETTLE;

pub const DEFAULT_PORTAL_URL: &str = "https://campus.concordia.ca";
pub const DEFAULT_HOME_URL: &str =
    "https://campus.concordia.ca/psc/pscsprd/EMPLOYEE/SA/c/SA_LEARNER_SERVICES.SSS_STUDENT_CENTER.GBL";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_INTERVAL_SECS: u64 = 1800;

/// Loop behaviour toggles.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub console_log_tables: bool,
    pub email_notification: bool,
    pub time_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            console_log_tables: true,
            email_notification: true,
            time_interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailSettings {
    pub source_email: String,
    pub target_email: String,
    pub smtp_host: String,
    pub smtp_port: u16,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub portal_url: Url,
    pub home_url: Url,
    pub webdriver_url: Url,
    pub work_dir: PathBuf,
    pub settle_scale: f64,
    pub term_mapping: Option<Vec<Term>>,
    /// Present only when email notification is on.
    pub mail: Option<MailSettings>,
    pub options: Options,
}

impl Settings {
    // Reads settings from the process environment (after dotenv).
    pub fn from_env() -> Result<Settings> {
        Settings::from_lookup(|key| std::env::var(key).ok())
    }

    // Builds settings from any key lookup, validating every value up front.
    pub fn from_lookup<F>(lookup: F) -> Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let options = Options {
            console_log_tables: parse_bool("CONSOLE_LOG_TABLES", var("CONSOLE_LOG_TABLES"), true)?,
            email_notification: parse_bool("EMAIL_NOTIFICATION", var("EMAIL_NOTIFICATION"), true)?,
            time_interval: Duration::from_secs(parse_num("TIME_INTERVAL", var("TIME_INTERVAL"), DEFAULT_INTERVAL_SECS)?),
        };

        let mail = if options.email_notification {
            Some(MailSettings {
                source_email: var("SOURCE_EMAIL").ok_or_else(|| missing("SOURCE_EMAIL"))?,
                target_email: var("TARGET_EMAIL").ok_or_else(|| missing("TARGET_EMAIL"))?,
                smtp_host: var("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
                smtp_port: parse_num("SMTP_PORT", var("SMTP_PORT"), DEFAULT_SMTP_PORT)?,
            })
        } else {
            None
        };

        let settle_scale: f64 = parse_num("SETTLE_SCALE", var("SETTLE_SCALE"), 1.0)?;
        if !settle_scale.is_finite() || settle_scale < 0.0 {
            return Err(GradeError::Config(format!("SETTLE_SCALE must be a non-negative number, got {settle_scale}")));
        }
        // The login wait is the longest one; if it fits in a Duration they all do.
        if Duration::try_from_secs_f64(LOGIN_SETTLE.as_secs_f64() * settle_scale).is_err() {
            return Err(GradeError::Config(format!("SETTLE_SCALE {settle_scale} makes the settle delays too long")));
        }

        Ok(Settings {
            portal_url: parse_url("PORTAL_URL", var("PORTAL_URL"), DEFAULT_PORTAL_URL)?,
            home_url: parse_url("PORTAL_HOME_URL", var("PORTAL_HOME_URL"), DEFAULT_HOME_URL)?,
            webdriver_url: parse_url("WEBDRIVER_URL", var("WEBDRIVER_URL"), DEFAULT_WEBDRIVER_URL)?,
            work_dir: var("WORK_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            settle_scale,
            term_mapping: var("TERM_MAPPING").map(|raw| parse_term_mapping(&raw)).transpose()?,
            mail,
            options,
        })
    }

    // Scales a base settle delay, saturating instead of overflowing.
    pub fn settle(&self, base: Duration) -> Duration {
        Duration::try_from_secs_f64(base.as_secs_f64() * self.settle_scale).unwrap_or(Duration::MAX)
    }
}

// Reads `LOG_LEVEL`, falling back to info.
pub fn log_level() -> LevelFilter {
    match std::env::var("LOG_LEVEL") {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            // The logger is not up yet, so this goes straight to stderr.
            eprintln!("Unknown LOG_LEVEL \"{raw}\", using info");
            LevelFilter::Info
        }),
        Err(_) => LevelFilter::Info,
    }
}

// Error for a mail setting that must be present.
fn missing(key: &str) -> GradeError {
    GradeError::Config(format!("{key} is required when email notification is enabled"))
}

// Accepts true/false, 1/0, yes/no and on/off, any case.
fn parse_bool(key: &str, raw: Option<String>, default: bool) -> Result<bool> {
    let Some(raw) = raw else { return Ok(default) };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(GradeError::Config(format!("{key} must be a boolean, got \"{raw}\""))),
    }
}

// Parses a numeric setting, or returns the default when unset.
fn parse_num<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|_| GradeError::Config(format!("{key} must be a number, got \"{raw}\""))),
        None => Ok(default),
    }
}

// Parses a URL setting, falling back to the default.
fn parse_url(key: &str, raw: Option<String>, default: &str) -> Result<Url> {
    let raw = raw.unwrap_or_else(|| default.to_string());
    Url::parse(&raw).map_err(|e| GradeError::Config(format!("{key} is not a valid URL ({e}): {raw}")))
}

// TERM_MAPPING='{"Fall 2023": 2, "Winter 2024": 3}'
fn parse_term_mapping(raw: &str) -> Result<Vec<Term>> {
    let map: HashMap<String, usize> = serde_json::from_str(raw)
        .map_err(|e| GradeError::Config(format!("TERM_MAPPING is not a JSON object of term indices: {e}")))?;
    let mut terms: Vec<Term> = map
        .into_iter()
        .map(|(label, index)| Term { label, index })
        .collect();
    terms.sort_by_key(|t| t.index);
    if terms.is_empty() {
        warn!("TERM_MAPPING is empty, no term can be selected");
    }
    Ok(terms)
}
