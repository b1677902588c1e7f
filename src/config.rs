use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use teloxide::types::{ChatId, UserId};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Unknown IANA timezone name.
    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),
    /// Validation error.
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Telegram user ids admitted to the bot.
    #[serde(default)]
    allowed_users: Vec<u64>,
    /// Expense types offered as buttons. Anything typed is still accepted.
    #[serde(default = "default_categories")]
    categories: Vec<String>,
    /// Directory for state files (database, logs, reports). Defaults to current directory.
    data_dir: Option<String>,
    database_path: Option<String>,
    report_dir: Option<String>,
    /// IANA timezone used to date new expenses.
    timezone: Option<String>,
    #[serde(default = "default_recent_limit")]
    recent_limit: usize,
    /// Maximum records in a report (0 = all).
    #[serde(default)]
    report_limit: usize,
    /// Chat that receives WARN/ERROR log lines.
    log_chat_id: Option<i64>,
    #[serde(default)]
    texts: Texts,
    sheets: Option<SheetsFile>,
}

#[derive(Deserialize)]
struct SheetsFile {
    credentials_path: String,
    sheet_name: String,
    spreadsheet_id: Option<String>,
    #[serde(default)]
    share_with: Vec<String>,
    #[serde(default = "default_retry_delay_secs")]
    retry_delay_secs: u64,
}

fn default_categories() -> Vec<String> {
    vec!["FOOD".to_string(), "OTHER".to_string()]
}

fn default_recent_limit() -> usize {
    5
}

fn default_retry_delay_secs() -> u64 {
    // Sheets quota is per minute.
    61
}

/// Every user-facing string. Missing keys fall back to the English defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Texts {
    pub add_button: String,
    pub delete_button: String,
    pub report_button: String,
    pub cancel_button: String,
    pub yes_button: String,
    pub no_button: String,
    pub main_menu: String,
    pub choose_type: String,
    /// `{type}` is replaced by the chosen type.
    pub ask_description: String,
    /// `{description}` is replaced by the description.
    pub ask_amount: String,
    pub confirm_entry: String,
    pub entry_saved: String,
    pub entry_discarded: String,
    pub store_failed: String,
    pub no_expenses: String,
    pub list_to_delete: String,
    pub nothing_to_delete: String,
    pub confirm_delete: String,
    pub deleted: String,
    pub not_found: String,
    pub delete_discarded: String,
    pub report_caption: String,
    pub report_failed: String,
    pub report_title: String,
    pub restart_hint: String,
    pub cancelled: String,
    pub not_allowed: String,
    pub user_label: String,
    pub type_label: String,
    pub description_label: String,
    pub amount_label: String,
    pub id_label: String,
    pub date_label: String,
    /// Report headings: "<month> <total_label>: <total>".
    pub total_label: String,
    pub by_type_label: String,
    pub history_label: String,
}

impl Default for Texts {
    fn default() -> Self {
        Self {
            add_button: "ADD".to_string(),
            delete_button: "DELETE".to_string(),
            report_button: "REPORT".to_string(),
            cancel_button: "CANCEL".to_string(),
            yes_button: "YES".to_string(),
            no_button: "NO".to_string(),
            main_menu: "What do you want to do?".to_string(),
            choose_type: "Which kind of expense?".to_string(),
            ask_description: "Expense type: {type}\nAdd a description or shop name".to_string(),
            ask_amount: "Description: {description}\nAdd the amount:".to_string(),
            confirm_entry: "Is this correct?".to_string(),
            entry_saved: "Expense stored:".to_string(),
            entry_discarded: "Nothing was stored.".to_string(),
            store_failed: "The expense database is not available right now.".to_string(),
            no_expenses: "There are no expenses yet.".to_string(),
            list_to_delete: "Write the IDs to delete, separated by commas:".to_string(),
            nothing_to_delete: "Nothing to delete.".to_string(),
            confirm_delete: "Delete these expenses?".to_string(),
            deleted: "Expenses deleted.".to_string(),
            not_found: "These IDs were not found:".to_string(),
            delete_discarded: "Nothing was deleted.".to_string(),
            report_caption: "Expenses report".to_string(),
            report_failed: "The report could not be generated.".to_string(),
            report_title: "Expenses Report".to_string(),
            restart_hint: "To start again write /start".to_string(),
            cancelled: "Bye! I hope we can talk again some day.".to_string(),
            not_allowed: "You are not allowed to use this bot.".to_string(),
            user_label: "User".to_string(),
            type_label: "Type".to_string(),
            description_label: "Description".to_string(),
            amount_label: "Amount".to_string(),
            id_label: "ID".to_string(),
            date_label: "Date".to_string(),
            total_label: "Total".to_string(),
            by_type_label: "Expenses by type".to_string(),
            history_label: "Expenses per month".to_string(),
        }
    }
}

/// Google Sheets mirror settings.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    /// Service-account JSON key.
    pub credentials_path: PathBuf,
    /// Spreadsheet title, used to find or create it.
    pub sheet_name: String,
    /// Skips the lookup by name when set.
    pub spreadsheet_id: Option<String>,
    /// Addresses given writer access when the spreadsheet is created.
    pub share_with: Vec<String>,
    /// Pause before the single retry after a rate-limit answer.
    pub retry_delay_secs: u64,
}

/// Immutable configuration built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub allowed_users: HashSet<UserId>,
    pub categories: Vec<String>,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub report_dir: PathBuf,
    pub timezone: Tz,
    /// Records offered in the delete flow.
    pub recent_limit: usize,
    /// Records included in a report (0 = all).
    pub report_limit: usize,
    pub log_chat_id: Option<ChatId>,
    pub texts: Texts,
    pub sheets: Option<SheetsConfig>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadFile {
            path: config_path.clone(),
            source: e,
        })?;
        Self::parse(&config_path, &content)
    }

    fn parse(config_path: &Path, content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(content).map_err(|e| ConfigError::ParseJson {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        if file.allowed_users.is_empty() {
            return Err(ConfigError::Validation(
                "allowed_users must contain at least one user ID".into(),
            ));
        }
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        let categories: Vec<String> = file
            .categories
            .iter()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        if categories.is_empty() {
            return Err(ConfigError::Validation("categories must not be empty".into()));
        }
        if file.recent_limit == 0 {
            return Err(ConfigError::Validation("recent_limit must be at least 1".into()));
        }

        let timezone = match file.timezone {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ConfigError::InvalidTimezone(name))?,
            None => Tz::UTC,
        };

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let database_path = file
            .database_path
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("household_expenses.db"));
        let report_dir = file
            .report_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("reports"));

        let sheets = match file.sheets {
            Some(s) => {
                if s.sheet_name.trim().is_empty() {
                    return Err(ConfigError::Validation("sheets.sheet_name is required".into()));
                }
                Some(SheetsConfig {
                    credentials_path: PathBuf::from(s.credentials_path),
                    sheet_name: s.sheet_name,
                    spreadsheet_id: s.spreadsheet_id.filter(|id| !id.is_empty()),
                    share_with: s.share_with,
                    retry_delay_secs: s.retry_delay_secs,
                })
            }
            None => None,
        };

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            allowed_users: file.allowed_users.into_iter().map(UserId).collect(),
            categories,
            data_dir,
            database_path,
            report_dir,
            timezone,
            recent_limit: file.recent_limit,
            report_limit: file.report_limit,
            log_chat_id: file.log_chat_id.map(ChatId),
            texts: file.texts,
            sheets,
        })
    }

    /// Current date in the configured timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    /// Configuration for tests: one allowed user, defaults everywhere else.
    #[cfg(test)]
    pub fn for_tests(allowed: &[u64]) -> Self {
        Self {
            telegram_bot_token: "123456789:test".to_string(),
            allowed_users: allowed.iter().copied().map(UserId).collect(),
            categories: default_categories(),
            data_dir: PathBuf::from("."),
            database_path: PathBuf::from("household_expenses.db"),
            report_dir: std::env::temp_dir().join("household_expenses_reports"),
            timezone: Tz::UTC,
            recent_limit: default_recent_limit(),
            report_limit: 0,
            log_chat_id: None,
            texts: Texts::default(),
            sheets: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config_uses_defaults() {
        let file = write_config(r#"{
            "allowed_users": [123456],
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "data_dir": "/var/lib/expenses"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert!(config.allowed_users.contains(&UserId(123456)));
        assert_eq!(config.categories, vec!["FOOD", "OTHER"]);
        assert_eq!(config.recent_limit, 5);
        assert_eq!(config.report_limit, 0);
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(
            config.database_path,
            PathBuf::from("/var/lib/expenses/household_expenses.db")
        );
        assert_eq!(config.report_dir, PathBuf::from("/var/lib/expenses/reports"));
        assert_eq!(config.texts.yes_button, "YES");
        assert!(config.sheets.is_none());
    }

    #[test]
    fn test_partial_texts_keep_other_defaults() {
        let file = write_config(r#"{
            "allowed_users": [1],
            "telegram_bot_token": "123456789:ABCdef",
            "texts": { "yes_button": "SI", "no_button": "NO" },
            "categories": ["alimentacion", " casa "]
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.texts.yes_button, "SI");
        assert_eq!(config.texts.add_button, "ADD");
        assert_eq!(config.categories, vec!["ALIMENTACION", "CASA"]);
    }

    #[test]
    fn test_sheets_section() {
        let file = write_config(r#"{
            "allowed_users": [1],
            "telegram_bot_token": "123456789:ABCdef",
            "timezone": "Europe/Madrid",
            "sheets": {
                "credentials_path": "conf/credentials.json",
                "sheet_name": "household",
                "share_with": ["someone@example.com"]
            }
        }"#);
        let config = Config::load(file.path()).unwrap();
        let sheets = config.sheets.unwrap();
        assert_eq!(sheets.sheet_name, "household");
        assert_eq!(sheets.retry_delay_secs, 61);
        assert!(sheets.spreadsheet_id.is_none());
        assert_eq!(config.timezone, chrono_tz::Europe::Madrid);
    }

    #[test]
    fn test_today_follows_timezone() {
        let mut config = Config::for_tests(&[1]);
        for timezone in [Tz::UTC, chrono_tz::Pacific::Kiritimati, chrono_tz::Pacific::Pago_Pago] {
            config.timezone = timezone;
            let before = Utc::now().with_timezone(&timezone).date_naive();
            let today = config.today();
            let after = Utc::now().with_timezone(&timezone).date_naive();
            assert!(today == before || today == after, "{timezone}");
        }
    }

    #[test]
    fn test_missing_allow_list_is_fatal() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("allowed_users"));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{
            "allowed_users": [123],
            "telegram_bot_token": ""
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format() {
        for token in ["invalid_token_no_colon", "notanumber:ABCdef", "123456789:"] {
            let file = write_config(&format!(
                r#"{{ "allowed_users": [123], "telegram_bot_token": "{token}" }}"#
            ));
            let err = assert_err(Config::load(file.path()));
            assert!(matches!(err, ConfigError::Validation(_)), "token {token}");
        }
    }

    #[test]
    fn test_invalid_timezone() {
        let file = write_config(r#"{
            "allowed_users": [123],
            "telegram_bot_token": "123456789:ABCdef",
            "timezone": "Mars/Olympus"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::InvalidTimezone(_)));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
