//! The conversation state machine.

use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use teloxide::types::UserId;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::parsing::{Command, matches_button, normalize, parse_amount, parse_command, parse_ids};
use super::reply::{Reply, escape_html};
use super::state::{Session, State};
use crate::access::AccessGate;
use crate::config::{Config, Texts};
use crate::report::ReportBuilder;
use crate::sheets::Mirror;
use crate::store::{Expense, ExpenseStore, NewExpense};

/// Outcome of one step: the session to keep (if the flow goes on) and the
/// replies to send.
type Step = (Option<Session>, Vec<Reply>);

/// Drives one expense-entry or deletion flow per user.
pub struct DialogueController<M: Mirror> {
    config: Arc<Config>,
    gate: AccessGate,
    store: Arc<ExpenseStore>,
    mirror: M,
    reports: ReportBuilder,
    /// Sessions are taken out while a step runs, so the lock is never held
    /// across store, mirror or report work.
    sessions: Mutex<HashMap<UserId, Session>>,
}

impl<M: Mirror> DialogueController<M> {
    pub fn new(config: Arc<Config>, store: Arc<ExpenseStore>, mirror: M) -> Self {
        let gate = AccessGate::new(config.allowed_users.clone());
        let reports = ReportBuilder::from_config(&config);
        Self {
            config,
            gate,
            store,
            mirror,
            reports,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn texts(&self) -> &Texts {
        &self.config.texts
    }

    /// Current state of a user's session, if one is active.
    pub async fn state_of(&self, user_id: UserId) -> Option<State> {
        self.sessions.lock().await.get(&user_id).map(|s| s.state)
    }

    /// Process one inbound text message and return the replies for it.
    pub async fn handle(&self, user_id: UserId, display_name: &str, text: &str) -> Vec<Reply> {
        if !self.gate.admits(user_id, display_name) {
            return vec![Reply::text(&self.texts().not_allowed).removing_keyboard()];
        }

        let text = text.trim();
        match parse_command(text) {
            Some(Command::Start) => {
                info!("▶️ {} ({}) started a session", display_name, user_id);
                self.sessions.lock().await.insert(user_id, Session::new());
                return vec![self.main_menu()];
            }
            Some(Command::Cancel) => return self.cancel(user_id, display_name).await,
            None => {}
        }
        if matches_button(text, &self.texts().cancel_button) {
            return self.cancel(user_id, display_name).await;
        }

        let session = self.sessions.lock().await.remove(&user_id);
        let Some(session) = session else {
            debug!("No session for {} ({})", display_name, user_id);
            return vec![Reply::text(&self.texts().restart_hint).removing_keyboard()];
        };

        debug!("{} ({}) in {:?}: {:?}", display_name, user_id, session.state, text);
        let (next, replies) = self.step(session, display_name, text).await;
        if let Some(next) = next {
            self.sessions.lock().await.insert(user_id, next);
        }
        replies
    }

    async fn cancel(&self, user_id: UserId, display_name: &str) -> Vec<Reply> {
        self.sessions.lock().await.remove(&user_id);
        info!("{} ({}) cancelled the conversation", display_name, user_id);
        vec![Reply::text(&self.texts().cancelled).removing_keyboard()]
    }

    async fn step(&self, mut session: Session, display_name: &str, text: &str) -> Step {
        match session.state {
            State::MainAction => self.main_action(session, text).await,
            State::ExpenseType => {
                session.draft.expense_type = normalize(text);
                let reply = self
                    .texts()
                    .ask_description
                    .replace("{type}", &escape_html(&session.draft.expense_type));
                (
                    Some(session.with_state(State::ExpenseDescription)),
                    vec![Reply::html(reply).removing_keyboard()],
                )
            }
            State::ExpenseDescription => {
                session.draft.description = normalize(text);
                let reply = self
                    .texts()
                    .ask_amount
                    .replace("{description}", &escape_html(&session.draft.description));
                (Some(session.with_state(State::ExpenseAmount)), vec![Reply::html(reply)])
            }
            State::ExpenseAmount => {
                session.draft.amount = parse_amount(text);
                let summary = self.summary(
                    display_name,
                    &session.draft.expense_type,
                    &session.draft.description,
                    session.draft.amount,
                );
                let reply = Reply::html(format!("{summary}\n{}", self.texts().confirm_entry))
                    .with_buttons(self.yes_no_buttons());
                (Some(session.with_state(State::ConfirmEntry)), vec![reply])
            }
            State::ConfirmEntry => {
                if matches_button(text, &self.texts().yes_button) {
                    (None, self.save_entry(session, display_name).await)
                } else {
                    info!("{} discarded the expense", display_name);
                    (None, vec![self.terminal(&self.texts().entry_discarded)])
                }
            }
            State::ListToDelete => {
                let ids = parse_ids(text);
                if ids.is_empty() {
                    return (None, vec![self.terminal(&self.texts().nothing_to_delete)]);
                }
                let listed = join_ids(&ids);
                session.pending_ids = ids;
                let reply = Reply::html(format!("{}\n<b>{}</b>", self.texts().confirm_delete, listed))
                    .with_buttons(self.yes_no_buttons());
                (Some(session.with_state(State::ConfirmDelete)), vec![reply])
            }
            State::ConfirmDelete => {
                if matches_button(text, &self.texts().yes_button) {
                    (None, self.delete_entries(&session.pending_ids, display_name).await)
                } else {
                    info!("{} kept expenses {:?}", display_name, session.pending_ids);
                    (None, vec![self.terminal(&self.texts().delete_discarded)])
                }
            }
        }
    }

    async fn main_action(&self, session: Session, text: &str) -> Step {
        let texts = self.texts();
        if matches_button(text, &texts.add_button) {
            let reply = Reply::text(&texts.choose_type).with_buttons(self.category_buttons());
            (Some(session.with_state(State::ExpenseType)), vec![reply])
        } else if matches_button(text, &texts.delete_button) {
            self.list_for_deletion(session).await
        } else if matches_button(text, &texts.report_button) {
            (None, self.report().await)
        } else {
            (None, vec![Reply::text(&texts.restart_hint).removing_keyboard()])
        }
    }

    async fn list_for_deletion(&self, session: Session) -> Step {
        let recent = match self.store.list_recent(self.config.recent_limit) {
            Ok(recent) => recent,
            Err(e) => {
                error!("Failed to list expenses: {e}");
                return (None, vec![self.terminal(&self.texts().store_failed)]);
            }
        };
        if recent.is_empty() {
            return (None, vec![self.terminal(&self.texts().no_expenses)]);
        }

        let mut listing = self.texts().list_to_delete.clone();
        for expense in &recent {
            listing.push_str(&format!(
                "\n<b>{}</b> {} {} {} {:.2}",
                expense.id,
                expense.date,
                escape_html(&expense.expense_type),
                escape_html(&expense.short_description()),
                expense.amount
            ));
        }
        let reply = Reply::html(listing).with_buttons(vec![vec![self.texts().cancel_button.clone()]]);
        (Some(session.with_state(State::ListToDelete)), vec![reply])
    }

    async fn save_entry(&self, session: Session, display_name: &str) -> Vec<Reply> {
        let draft = session.draft;
        let new = NewExpense {
            date: date_number(self.today()),
            user: display_name.to_string(),
            expense_type: draft.expense_type,
            description: draft.description,
            amount: draft.amount,
        };

        let id = match self.store.insert(&new) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to store expense: {e}");
                return vec![self.terminal(&self.texts().store_failed)];
            }
        };
        let expense = new.into_expense(id);
        info!(
            "💾 Stored expense {} for {}: {} {} {:.2}",
            expense.id, expense.user, expense.expense_type, expense.description, expense.amount
        );

        if let Err(e) = self.mirror.upsert(&expense).await {
            warn!("Failed to mirror expense {}: {e}", expense.id);
        }

        let summary = self.summary(
            &expense.user,
            &expense.expense_type,
            &expense.description,
            expense.amount,
        );
        let text = format!(
            "{} <b>{}</b>\n{summary}\n\n{}",
            self.texts().entry_saved,
            expense.id,
            self.texts().restart_hint
        );
        vec![Reply::html(text).removing_keyboard()]
    }

    async fn delete_entries(&self, ids: &[i64], display_name: &str) -> Vec<Reply> {
        // Years of the targets, read before they are gone.
        let targets = match self.store.get_many(ids) {
            Ok(targets) => targets,
            Err(e) => {
                error!("Failed to read expenses {:?}: {e}", ids);
                return vec![self.terminal(&self.texts().store_failed)];
            }
        };
        let not_found = match self.store.delete_many(ids) {
            Ok(not_found) => not_found,
            Err(e) => {
                error!("Failed to delete expenses {:?}: {e}", ids);
                return vec![self.terminal(&self.texts().store_failed)];
            }
        };
        info!(
            "🗑️ {} deleted {:?} (not found: {:?})",
            display_name, ids, not_found
        );

        for (year, year_ids) in ids_by_year(&targets, &not_found) {
            if let Err(e) = self.mirror.delete(&year_ids, year).await {
                warn!("Failed to remove mirrored expenses {:?} from {}: {e}", year_ids, year);
            }
        }

        let texts = self.texts();
        let mut text = String::new();
        if not_found.len() < ids.len() {
            text.push_str(&texts.deleted);
            text.push('\n');
        }
        if !not_found.is_empty() {
            text.push_str(&format!("{} <b>{}</b>\n", texts.not_found, join_ids(&not_found)));
        }
        text.push_str(&texts.restart_hint);
        vec![Reply::html(text).removing_keyboard()]
    }

    async fn report(&self) -> Vec<Reply> {
        let expenses = match self.store.list_recent(self.config.report_limit) {
            Ok(expenses) => expenses,
            Err(e) => {
                error!("Failed to load expenses for the report: {e}");
                return vec![self.terminal(&self.texts().store_failed)];
            }
        };
        if expenses.is_empty() {
            return vec![self.terminal(&self.texts().no_expenses)];
        }

        let builder = self.reports.clone();
        let today = self.today();
        let generated = tokio::task::spawn_blocking(move || builder.generate(&expenses, today)).await;
        match generated {
            Ok(Ok(report)) => vec![
                Reply::Document {
                    file_name: report.file_name,
                    bytes: report.bytes,
                    caption: self.texts().report_caption.clone(),
                },
                Reply::text(&self.texts().restart_hint).removing_keyboard(),
            ],
            Ok(Err(e)) => {
                error!("Failed to generate report: {e}");
                vec![self.terminal(&self.texts().report_failed)]
            }
            Err(e) => {
                error!("Report task failed: {e}");
                vec![self.terminal(&self.texts().report_failed)]
            }
        }
    }

    /// Message ending a flow, followed by the restart hint.
    fn terminal(&self, text: &str) -> Reply {
        Reply::text(format!("{text}\n{}", self.texts().restart_hint)).removing_keyboard()
    }

    fn main_menu(&self) -> Reply {
        let texts = self.texts();
        Reply::text(&texts.main_menu).with_buttons(vec![
            vec![texts.add_button.clone(), texts.delete_button.clone()],
            vec![texts.report_button.clone()],
            vec![texts.cancel_button.clone()],
        ])
    }

    fn category_buttons(&self) -> Vec<Vec<String>> {
        let mut rows: Vec<Vec<String>> = self
            .config
            .categories
            .chunks(2)
            .map(|pair| pair.to_vec())
            .collect();
        rows.push(vec![self.texts().cancel_button.clone()]);
        rows
    }

    fn yes_no_buttons(&self) -> Vec<Vec<String>> {
        vec![vec![self.texts().yes_button.clone(), self.texts().no_button.clone()]]
    }

    fn summary(&self, user: &str, expense_type: &str, description: &str, amount: f64) -> String {
        let texts = self.texts();
        format!(
            "<b>{}:</b> {}\n<b>{}:</b> {}\n<b>{}:</b> {}\n<b>{}:</b> {:.2}",
            texts.user_label,
            escape_html(user),
            texts.type_label,
            escape_html(expense_type),
            texts.description_label,
            escape_html(description),
            texts.amount_label,
            amount
        )
    }

    fn today(&self) -> NaiveDate {
        self.config.today()
    }
}

/// YYYYMMDD
pub fn date_number(date: NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
}

/// Ids actually deleted, grouped by the year of their record.
fn ids_by_year(targets: &[Expense], not_found: &[i64]) -> BTreeMap<i32, Vec<i64>> {
    let mut by_year: BTreeMap<i32, Vec<i64>> = BTreeMap::new();
    for expense in targets.iter().filter(|e| !not_found.contains(&e.id)) {
        by_year.entry(expense.year()).or_default().push(expense.id);
    }
    by_year
}
