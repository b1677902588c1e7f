//! Allow-list check in front of the dialogue.

use std::collections::HashSet;
use teloxide::types::UserId;
use tracing::{debug, info};

/// Admits only the configured Telegram users.
#[derive(Debug, Clone)]
pub struct AccessGate {
    allowed: HashSet<UserId>,
}

impl AccessGate {
    pub fn new(allowed: HashSet<UserId>) -> Self {
        Self { allowed }
    }

    pub fn admits(&self, user_id: UserId, display_name: &str) -> bool {
        let admitted = self.allowed.contains(&user_id);
        if admitted {
            debug!("Admitted {} ({})", display_name, user_id);
        } else {
            info!("⛔ Denied {} ({})", display_name, user_id);
        }
        admitted
    }
}
