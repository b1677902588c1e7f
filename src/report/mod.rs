//! Monthly expense report: aggregation plus PDF rendering.
//!
//! Aggregation is pure and lives here; [`pdf`] only lays out what
//! [`ReportBuilder::build`] produced.

pub mod pdf;

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{Config, Texts};
use crate::store::Expense;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("PDF rendering failed: {0}")]
    Render(String),
    #[error("failed to write report '{}': {source}", .path.display())]
    Write { path: PathBuf, source: std::io::Error },
}

/// One table line. Description is already cut to the display width and the
/// amount rounded to cents.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub id: i64,
    pub date: i64,
    pub expense_type: String,
    pub description: String,
    pub amount: f64,
}

impl From<&Expense> for ReportRow {
    fn from(expense: &Expense) -> Self {
        Self {
            id: expense.id,
            date: expense.date,
            expense_type: expense.expense_type.clone(),
            description: expense.short_description(),
            amount: round_cents(expense.amount),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeSection {
    pub expense_type: String,
    pub rows: Vec<ReportRow>,
    /// Sum rounded up to a whole unit.
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthSection {
    pub year: i32,
    pub month: u32,
    pub rows: Vec<ReportRow>,
    /// Sum rounded up to a whole unit.
    pub total: i64,
    /// Alphabetical by type.
    pub by_type: Vec<TypeSection>,
}

impl MonthSection {
    /// "YYYY-MM"
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

/// One bar of the history chart.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBar {
    pub label: String,
    pub total: i64,
}

/// Fixed words printed in the PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLabels {
    pub id: String,
    pub date: String,
    pub expense_type: String,
    pub description: String,
    pub amount: String,
    pub total: String,
    pub by_type: String,
    pub history: String,
}

impl Default for ReportLabels {
    fn default() -> Self {
        Self::from(&Texts::default())
    }
}

impl From<&Texts> for ReportLabels {
    fn from(texts: &Texts) -> Self {
        Self {
            id: texts.id_label.clone(),
            date: texts.date_label.clone(),
            expense_type: texts.type_label.clone(),
            description: texts.description_label.clone(),
            amount: texts.amount_label.clone(),
            total: texts.total_label.clone(),
            by_type: texts.by_type_label.clone(),
            history: texts.history_label.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub title: String,
    pub labels: ReportLabels,
    pub generated_on: NaiveDate,
    /// Chronological.
    pub months: Vec<MonthSection>,
    /// Oldest month first.
    pub history: Vec<HistoryBar>,
}

/// A rendered report ready to send.
#[derive(Debug, Clone)]
pub struct GeneratedReport {
    pub file_name: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Sum of `amounts` rounded up to a whole unit. The sum is first settled to
/// millionths so float noise cannot push an exact total to the next unit,
/// while any real fraction still rounds up.
pub fn rounded_up_total<I: IntoIterator<Item = f64>>(amounts: I) -> i64 {
    let sum: f64 = amounts.into_iter().sum();
    ((sum * 1e6).round() / 1e6).ceil() as i64
}

/// Group expenses by month (chronological) and, inside each month, by type.
/// Rows keep the input order.
pub fn summarize(expenses: &[Expense]) -> Vec<MonthSection> {
    let mut by_month: BTreeMap<i64, Vec<&Expense>> = BTreeMap::new();
    for expense in expenses {
        by_month.entry(expense.year_month()).or_default().push(expense);
    }

    by_month
        .into_iter()
        .map(|(year_month, items)| {
            let mut by_type: BTreeMap<&str, Vec<&Expense>> = BTreeMap::new();
            for expense in &items {
                by_type
                    .entry(expense.expense_type.as_str())
                    .or_default()
                    .push(expense);
            }

            let by_type = by_type
                .into_iter()
                .map(|(expense_type, typed)| TypeSection {
                    expense_type: expense_type.to_string(),
                    total: rounded_up_total(typed.iter().map(|e| e.amount)),
                    rows: typed.iter().map(|e| ReportRow::from(*e)).collect(),
                })
                .collect();

            MonthSection {
                year: (year_month / 100) as i32,
                month: (year_month % 100) as u32,
                total: rounded_up_total(items.iter().map(|e| e.amount)),
                rows: items.iter().map(|e| ReportRow::from(*e)).collect(),
                by_type,
            }
        })
        .collect()
}

/// Builds, renders and files expense reports.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    title: String,
    labels: ReportLabels,
    output_dir: PathBuf,
}

impl ReportBuilder {
    pub fn new(title: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            title: title.into(),
            labels: ReportLabels::default(),
            output_dir: output_dir.into(),
        }
    }

    /// Title, labels and output directory as configured for the bot.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.texts.report_title.clone(), config.report_dir.clone())
            .with_labels(ReportLabels::from(&config.texts))
    }

    pub fn with_labels(mut self, labels: ReportLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn build(&self, expenses: &[Expense], generated_on: NaiveDate) -> Report {
        let months = summarize(expenses);
        let history = months
            .iter()
            .map(|m| HistoryBar {
                label: m.label(),
                total: m.total,
            })
            .collect();
        Report {
            title: self.title.clone(),
            labels: self.labels.clone(),
            generated_on,
            months,
            history,
        }
    }

    /// Build and render the report, and keep a copy in the output directory.
    pub fn generate(&self, expenses: &[Expense], generated_on: NaiveDate) -> Result<GeneratedReport, ReportError> {
        let report = self.build(expenses, generated_on);
        let bytes = pdf::render(&report)?;
        let file_name = format!("report_{}.pdf", generated_on.format("%Y%m%d"));
        let path = self.output_dir.join(&file_name);
        write_file(&path, &bytes)?;
        info!(
            "📊 Report with {} month(s) written to {:?} ({} bytes)",
            report.months.len(),
            path,
            bytes.len()
        );
        Ok(GeneratedReport { file_name, path, bytes })
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ReportError> {
    let to_error = |source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(to_error)?;
    }
    std::fs::write(path, bytes).map_err(to_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expense(id: i64, date: i64, expense_type: &str, description: &str, amount: f64) -> Expense {
        Expense {
            id,
            date,
            user: "Nook".to_string(),
            expense_type: expense_type.to_string(),
            description: description.to_string(),
            amount,
        }
    }

    /// Newest first, as `list_recent` returns them.
    fn sample() -> Vec<Expense> {
        vec![
            expense(8, 20240321, "FOOD", "DIA", 123.22),
            expense(7, 20240320, "FOOD", "CARREFOUR EXPRESS CENTRO", 123.32),
            expense(6, 20240320, "HOME", "LUZ", 22.11),
            expense(5, 20240320, "OTHER", "REPSOL", 123.222222),
            expense(4, 20240220, "FOOD", "AAA", 222.2),
            expense(3, 20240220, "OTHER", "MES", 123.222222),
            expense(2, 20240120, "FOOD", "AAA", 222.2),
            expense(1, 20240120, "OTHER", "MES", 123.222222),
        ]
    }

    #[test]
    fn test_two_expenses_in_one_month() {
        let expenses = vec![
            expense(2, 20240102, "FOOD", "STORE", 7.0),
            expense(1, 20240101, "FOOD", "STORE", 12.50),
        ];
        let months = summarize(&expenses);
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].total, 20);
        assert_eq!(months[0].label(), "2024-01");
        assert_eq!(months[0].rows.len(), 2);
    }

    #[test]
    fn test_months_are_chronological() {
        let months = summarize(&sample());
        let labels: Vec<String> = months.iter().map(MonthSection::label).collect();
        assert_eq!(labels, vec!["2024-01", "2024-02", "2024-03"]);
    }

    #[test]
    fn test_month_total_is_rounded_up_sum() {
        // 345.42, 345.42 and 391.87
        let totals: Vec<i64> = summarize(&sample()).iter().map(|m| m.total).collect();
        assert_eq!(totals, vec![346, 346, 392]);
    }

    #[test]
    fn test_type_totals_add_up_to_month_total() {
        for month in summarize(&sample()) {
            let type_sum: i64 = month.by_type.iter().map(|t| t.total).sum();
            // Each type total is rounded up on its own.
            assert!(type_sum >= month.total);
            assert!(type_sum - month.total < month.by_type.len() as i64);
            let rows: usize = month.by_type.iter().map(|t| t.rows.len()).sum();
            assert_eq!(rows, month.rows.len());
        }
    }

    #[test]
    fn test_types_sorted_and_rows_truncated() {
        let months = summarize(&sample());
        let march = &months[2];
        let types: Vec<&str> = march.by_type.iter().map(|t| t.expense_type.as_str()).collect();
        assert_eq!(types, vec!["FOOD", "HOME", "OTHER"]);

        let row = march.rows.iter().find(|r| r.id == 7).unwrap();
        assert_eq!(row.description, "CARREFOUR EXPRE");
        let row = march.rows.iter().find(|r| r.id == 5).unwrap();
        assert_eq!(row.amount, 123.22);
    }

    #[test]
    fn test_exact_totals_are_not_bumped() {
        assert_eq!(rounded_up_total([10.1, 9.9]), 20);
        assert_eq!(rounded_up_total([0.1, 0.2]), 1);
        assert_eq!(rounded_up_total(Vec::<f64>::new()), 0);
    }

    #[test]
    fn test_sub_cent_totals_round_up() {
        assert_eq!(rounded_up_total([20.004]), 21);
        assert_eq!(rounded_up_total([10.0, 10.001]), 21);

        let months = summarize(&[expense(1, 20240105, "FOOD", "MARKET", 20.004)]);
        assert_eq!(months[0].total, 21);
        assert_eq!(months[0].by_type[0].total, 21);
    }

    #[test]
    fn test_history_oldest_first() {
        let builder = ReportBuilder::new("Expenses Report", std::env::temp_dir());
        let report = builder.build(&sample(), NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        let labels: Vec<&str> = report.history.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(report.history[0].total, report.months[0].total);
    }

    #[test]
    fn test_labels_follow_texts() {
        let texts = Texts {
            total_label: "Gesamt".to_string(),
            history_label: "Ausgaben pro Monat".to_string(),
            amount_label: "Betrag".to_string(),
            ..Texts::default()
        };
        let report = ReportBuilder::new("Ausgaben", std::env::temp_dir())
            .with_labels(ReportLabels::from(&texts))
            .build(&sample(), NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        assert_eq!(report.labels.total, "Gesamt");
        assert_eq!(report.labels.history, "Ausgaben pro Monat");
        assert_eq!(report.labels.amount, "Betrag");
        assert_eq!(report.labels.id, "ID");
    }

    #[test]
    fn test_builder_from_config() {
        let mut config = Config::for_tests(&[1]);
        config.texts.report_title = "Gastos".to_string();
        config.texts.total_label = "Suma".to_string();
        let today = config.today();
        let report = ReportBuilder::from_config(&config).build(&sample(), today);
        assert_eq!(report.title, "Gastos");
        assert_eq!(report.labels.total, "Suma");
        assert_eq!(report.generated_on, today);
    }

    #[test]
    fn test_generate_writes_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ReportBuilder::new("Expenses Report", dir.path().join("reports"));
        let generated = builder
            .generate(&sample(), NaiveDate::from_ymd_opt(2024, 4, 1).unwrap())
            .unwrap();

        assert_eq!(generated.file_name, "report_20240401.pdf");
        assert!(generated.bytes.starts_with(b"%PDF"));
        assert_eq!(std::fs::read(&generated.path).unwrap(), generated.bytes);
    }
}
