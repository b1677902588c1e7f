/// Where a user's conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    MainAction,
    ExpenseType,
    ExpenseDescription,
    ExpenseAmount,
    ConfirmEntry,
    ListToDelete,
    ConfirmDelete,
}

/// Expense being collected by the add flow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub expense_type: String,
    pub description: String,
    pub amount: f64,
}

/// Per-user transient context. Dropped when the flow ends.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub state: State,
    pub draft: Draft,
    /// Ids awaiting confirmation in the delete flow.
    pub pending_ids: Vec<i64>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: State::MainAction,
            draft: Draft::default(),
            pending_ids: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
