//! Household expense tracking over Telegram: a guided dialogue records
//! expenses in SQLite, mirrors them to Google Sheets and renders PDF reports.

pub mod access;
pub mod alert;
pub mod config;
pub mod dialogue;
pub mod report;
pub mod sheets;
pub mod store;
pub mod telegram;
