use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::fields::ValidatedFields;
use crate::intent::{self, UserIntent};
use crate::store::{RecordFields, RecordStore, StoredRecord};
use crate::validators::{self, DateOutcome};

/// Ordered slot sequence of the conversational intake. Completion is
/// represented by session deletion, not a stored terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Payee,
    Amount,
    Account,
    DueDate,
}

impl Slot {
    fn as_str(self) -> &'static str {
        match self {
            Slot::Payee => "payee",
            Slot::Amount => "amount",
            Slot::Account => "account",
            Slot::DueDate => "due-date",
        }
    }

    fn parse(value: &str) -> Option<Slot> {
        match value {
            "payee" => Some(Slot::Payee),
            "amount" => Some(Slot::Amount),
            "account" => Some(Slot::Account),
            "due-date" => Some(Slot::DueDate),
            _ => None,
        }
    }
}

pub const PROMPT_PAYEE: &str = "Ok 👌 chi è il fornitore da pagare? (es. Enel Energia)";
pub const REPLY_IMPLICIT_START: &str =
    "Posso aiutarti a pagare una bolletta. Chi è il fornitore?";
pub const PROMPT_AMOUNT: &str = "Quanto devi pagare? (es. 49,90)";
pub const HINT_AMOUNT: &str = "Non ho capito l'importo. Scrivilo come 49,90";
pub const PROMPT_ACCOUNT: &str = "Qual è l'IBAN del fornitore?";
pub const HINT_ACCOUNT: &str =
    "IBAN non valido: ricontrolla e riprova (es. IT60X0542811101000000123456)";
pub const PROMPT_DUE_DATE: &str =
    "Qual è la scadenza? (AAAA-MM-GG o GG/MM/AAAA, oppure \"nessuna\")";
pub const HINT_DUE_DATE: &str =
    "Data non valida. Usa AAAA-MM-GG o GG/MM/AAAA, oppure scrivi \"nessuna\"";
pub const REPLY_CANCELLED: &str = "Ok, annullato. Scrivi \"bolletta\" quando vuoi ricominciare.";

const FIELD_SENDER: &str = "Sender";
const FIELD_STEP: &str = "Step";
const FIELD_ENTE: &str = "Ente";
const FIELD_IMPORTO: &str = "Importo";
const FIELD_IBAN: &str = "Iban";
const FIELD_LAST_ACTIVITY: &str = "LastActivity";

#[derive(Debug, Clone)]
struct Session {
    id: String,
    slot: Slot,
    ente: Option<String>,
    importo: Option<f64>,
    iban: Option<String>,
    last_activity: DateTime<Utc>,
}

impl Session {
    fn from_record(record: &StoredRecord) -> Option<Session> {
        let slot = record
            .fields
            .get(FIELD_STEP)
            .and_then(Value::as_str)
            .and_then(Slot::parse)?;
        let last_activity = record
            .fields
            .get(FIELD_LAST_ACTIVITY)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
            .with_timezone(&Utc);
        Some(Session {
            id: record.id.clone(),
            slot,
            ente: record
                .fields
                .get(FIELD_ENTE)
                .and_then(Value::as_str)
                .map(str::to_string),
            importo: record.fields.get(FIELD_IMPORTO).and_then(Value::as_f64),
            iban: record
                .fields
                .get(FIELD_IBAN)
                .and_then(Value::as_str)
                .map(str::to_string),
            last_activity,
        })
    }

    /// Serialize every field, absent ones as null, so an in-place reset
    /// clears stale values.
    fn to_fields(&self) -> RecordFields {
        let mut fields = RecordFields::new();
        fields.insert(FIELD_STEP.into(), Value::String(self.slot.as_str().into()));
        fields.insert(
            FIELD_ENTE.into(),
            self.ente.clone().map(Value::String).unwrap_or(Value::Null),
        );
        fields.insert(
            FIELD_IMPORTO.into(),
            self.importo
                .and_then(|v| serde_json::Number::from_f64(v).map(Value::Number))
                .unwrap_or(Value::Null),
        );
        fields.insert(
            FIELD_IBAN.into(),
            self.iban.clone().map(Value::String).unwrap_or(Value::Null),
        );
        fields.insert(
            FIELD_LAST_ACTIVITY.into(),
            Value::String(self.last_activity.to_rfc3339()),
        );
        fields
    }
}

/// Result of one conversational turn.
#[derive(Debug)]
pub enum TurnOutcome {
    /// A prompt, hint or acknowledgment to send back.
    Reply(String),
    /// All slots collected; the caller runs the shared finalization step.
    Finalized(ValidatedFields),
}

/// Per-sender finite-state machine collecting the payment fields turn by
/// turn. All state lives in the external record store; the engine tolerates
/// store unavailability by degrading to "no session" instead of failing the
/// turn.
pub struct SessionEngine {
    store: Arc<dyn RecordStore>,
    table: String,
    timeout: Duration,
}

impl SessionEngine {
    pub fn new(store: Arc<dyn RecordStore>, table: impl Into<String>, timeout_minutes: i64) -> Self {
        Self {
            store,
            table: table.into(),
            timeout: Duration::minutes(timeout_minutes),
        }
    }

    pub async fn handle_text(&self, sender: &str, text: &str) -> TurnOutcome {
        match intent::classify(text) {
            UserIntent::StartBill => {
                self.start_fresh(sender).await;
                TurnOutcome::Reply(PROMPT_PAYEE.to_string())
            }
            UserIntent::Cancel => {
                self.clear(sender).await;
                TurnOutcome::Reply(REPLY_CANCELLED.to_string())
            }
            other => match self.load(sender).await {
                None => {
                    // implicit fresh start: the message is not consumed as
                    // the payee value, it only opens the sequence
                    self.start_fresh(sender).await;
                    TurnOutcome::Reply(REPLY_IMPLICIT_START.to_string())
                }
                Some(session) => self.advance(session, text, other).await,
            },
        }
    }

    /// Delete the sender's session if one exists, stale or not. Best effort.
    pub async fn clear(&self, sender: &str) {
        if let Some(record) = self.find_record(sender).await {
            if let Err(e) = self.store.delete(&self.table, &record.id).await {
                log::warn!("failed to delete session for {sender}: {e}");
            }
        }
    }

    async fn advance(&self, mut session: Session, text: &str, intent: UserIntent) -> TurnOutcome {
        match session.slot {
            Slot::Payee => {
                let name = text.trim();
                if name.is_empty() {
                    return TurnOutcome::Reply(PROMPT_PAYEE.to_string());
                }
                session.ente = Some(name.to_string());
                session.slot = Slot::Amount;
                self.save(&mut session).await;
                TurnOutcome::Reply(PROMPT_AMOUNT.to_string())
            }
            Slot::Amount => match validators::parse_amount(text) {
                Some(amount) => {
                    session.importo = Some(amount);
                    session.slot = Slot::Account;
                    self.save(&mut session).await;
                    TurnOutcome::Reply(PROMPT_ACCOUNT.to_string())
                }
                None => TurnOutcome::Reply(HINT_AMOUNT.to_string()),
            },
            Slot::Account => match validators::normalize_iban(text) {
                Some(iban) => {
                    session.iban = Some(iban);
                    session.slot = Slot::DueDate;
                    self.save(&mut session).await;
                    TurnOutcome::Reply(PROMPT_DUE_DATE.to_string())
                }
                None => TurnOutcome::Reply(HINT_ACCOUNT.to_string()),
            },
            Slot::DueDate => {
                let scadenza = if intent == UserIntent::NoDueDate {
                    None
                } else {
                    match validators::normalize_due_date(text) {
                        DateOutcome::Date(date) => Some(date),
                        DateOutcome::NoDueDate => None,
                        DateOutcome::Invalid => {
                            return TurnOutcome::Reply(HINT_DUE_DATE.to_string())
                        }
                    }
                };
                if let Err(e) = self.store.delete(&self.table, &session.id).await {
                    log::warn!("failed to delete finalized session: {e}");
                }
                TurnOutcome::Finalized(ValidatedFields::assemble(
                    session.ente,
                    session.iban,
                    session.importo,
                    scadenza,
                    None,
                ))
            }
        }
    }

    /// Load the sender's session with lazy expiry: a record older than the
    /// inactivity window is treated as absent, never deleted here.
    async fn load(&self, sender: &str) -> Option<Session> {
        let record = self.find_record(sender).await?;
        let session = Session::from_record(&record).or_else(|| {
            log::warn!("unreadable session record {} for {sender}", record.id);
            None
        })?;
        if Utc::now() - session.last_activity > self.timeout {
            log::debug!("session for {sender} expired, treating as absent");
            return None;
        }
        Some(session)
    }

    /// Reset to a fresh session at the payee slot, overwriting any existing
    /// record (in progress or stale) in place.
    async fn start_fresh(&self, sender: &str) {
        let fresh = Session {
            id: String::new(),
            slot: Slot::Payee,
            ente: None,
            importo: None,
            iban: None,
            last_activity: Utc::now(),
        };
        let result = match self.find_record(sender).await {
            Some(existing) => {
                self.store
                    .update(&self.table, &existing.id, fresh.to_fields())
                    .await
            }
            None => {
                let mut fields = fresh.to_fields();
                fields.insert(FIELD_SENDER.into(), Value::String(sender.to_string()));
                self.store.create(&self.table, fields).await.map(|_| ())
            }
        };
        if let Err(e) = result {
            log::warn!("failed to persist fresh session for {sender}: {e}");
        }
    }

    async fn save(&self, session: &mut Session) {
        session.last_activity = Utc::now();
        if let Err(e) = self
            .store
            .update(&self.table, &session.id, session.to_fields())
            .await
        {
            log::warn!("failed to persist session step: {e}");
        }
    }

    async fn find_record(&self, sender: &str) -> Option<StoredRecord> {
        match self
            .store
            .find_one_by_field(&self.table, FIELD_SENDER, sender)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                log::warn!("session lookup failed for {sender}, degrading to no session: {e}");
                None
            }
        }
    }
}
