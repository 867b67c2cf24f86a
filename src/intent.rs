/// The closed set of user-intent tokens recognized before any slot-specific
/// parsing. Everything else is free text for the current slot.

const TRIGGER_PREFIXES: &[&str] = &["bolletta", "bill"];
const CANCEL_TOKENS: &[&str] = &["annulla", "annullare", "cancel", "stop"];
const NO_DUE_DATE_TOKENS: &[&str] = &["nessuna", "nessuno", "none", "n/a"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserIntent {
    /// Start (or restart) a bill intake sequence.
    StartBill,
    /// Abandon the current sequence.
    Cancel,
    /// Explicitly no due date; only meaningful at the due-date slot.
    NoDueDate,
    /// Ordinary slot text.
    Free,
}

pub fn classify(text: &str) -> UserIntent {
    let normalized = text.trim().to_lowercase();
    if TRIGGER_PREFIXES.iter().any(|p| normalized.starts_with(p)) {
        return UserIntent::StartBill;
    }
    if CANCEL_TOKENS.iter().any(|t| normalized == *t) {
        return UserIntent::Cancel;
    }
    if is_no_due_date(&normalized) {
        return UserIntent::NoDueDate;
    }
    UserIntent::Free
}

pub fn is_no_due_date(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    NO_DUE_DATE_TOKENS.iter().any(|t| normalized == *t)
}
