use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::fields::{CandidateFields, ValidatedFields};
use crate::heuristic_extractor::HeuristicExtractor;
use crate::link_builder::LinkBuilder;
use crate::merge;
use crate::model_extractor::{DocumentInput, ModelExtractor};
use crate::session::{SessionEngine, TurnOutcome};
use crate::store::{RecordFields, RecordStore};

/// One inbound transport event: sender identity, free text and at most one
/// media payload (already fetched by the document source).
#[derive(Debug)]
pub struct InboundEvent {
    pub sender: String,
    pub text: String,
    pub media: Option<MediaRef>,
}

#[derive(Debug)]
pub struct MediaRef {
    pub content_type: String,
    pub data: Vec<u8>,
}

pub const REPLY_UNSUPPORTED: &str =
    "Formato non supportato: inviami una foto della bolletta o il testo del documento.";
pub const REPLY_COULD_NOT_READ: &str =
    "Non sono riuscito a leggere la bolletta 😕 Prova con una foto più nitida, oppure scrivi \"bolletta\" per inserirla a mano.";
pub const REPLY_MISSING_IBAN: &str =
    "Nella bolletta non ho trovato un IBAN valido. Scrivi \"bolletta\" per inserire i dati a mano.";

/// Routes each inbound event to document extraction or the conversational
/// engine and reconciles both paths onto the same finalization step. Every
/// event terminates in a user-facing reply.
pub struct IntakeCoordinator {
    sessions: SessionEngine,
    heuristics: HeuristicExtractor,
    model: Option<ModelExtractor>,
    links: LinkBuilder,
    store: Arc<dyn RecordStore>,
    bills_table: String,
    require_iban: bool,
    // serialization point for same-sender turns; the map grows with the
    // number of distinct senders seen by this process
    sender_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IntakeCoordinator {
    pub fn new(
        config: &Config,
        store: Arc<dyn RecordStore>,
        model: Option<ModelExtractor>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            sessions: SessionEngine::new(
                store.clone(),
                config.store.sessions_table.clone(),
                config.session.timeout_minutes,
            ),
            heuristics: HeuristicExtractor::new(),
            model,
            links: LinkBuilder::new(&config.payment.base_url)?,
            store,
            bills_table: config.store.bills_table.clone(),
            require_iban: config.payment.require_iban,
            sender_locks: Mutex::new(HashMap::new()),
        })
    }

    pub async fn handle(&self, event: InboundEvent) -> String {
        let _guard = self.lock_sender(&event.sender).await;
        match event.media {
            Some(media) => self.handle_document(&event.sender, media).await,
            None => match self.sessions.handle_text(&event.sender, &event.text).await {
                TurnOutcome::Reply(reply) => reply,
                TurnOutcome::Finalized(fields) => self.finalize(&event.sender, fields).await,
            },
        }
    }

    /// A document short-circuits the state machine: it never consumes or
    /// advances the stored slot, and on success it goes straight to the
    /// shared finalization.
    async fn handle_document(&self, sender: &str, media: MediaRef) -> String {
        let document = match classify_document(media) {
            Some(document) => document,
            None => {
                log::info!("unsupported document type from {sender}");
                return REPLY_UNSUPPORTED.to_string();
            }
        };

        let model_fields = match &self.model {
            Some(extractor) => match extractor.extract(&document).await {
                Ok(fields) => fields,
                Err(e) => {
                    log::warn!("model extraction failed, heuristics only: {e}");
                    CandidateFields::default()
                }
            },
            None => CandidateFields::default(),
        };
        let heuristic_fields = match &document {
            DocumentInput::Text(text) => self.heuristics.extract(text),
            DocumentInput::Image { .. } => CandidateFields::default(),
        };

        let merged = merge::merge(&model_fields, &heuristic_fields);
        if merged.amount.is_none() && merged.iban.is_none() {
            return REPLY_COULD_NOT_READ.to_string();
        }
        if self.require_iban && merged.iban.is_none() {
            return REPLY_MISSING_IBAN.to_string();
        }

        // clearing (not advancing) the session keeps a later text turn from
        // resuming a sequence the document already settled
        self.sessions.clear(sender).await;
        self.finalize(sender, merged).await
    }

    /// Shared finalization: payment link, best-effort intent record, summary.
    /// A persistence failure is logged, never surfaced to the user.
    async fn finalize(&self, sender: &str, fields: ValidatedFields) -> String {
        let link = self.links.build(&fields);
        if let Err(e) = self
            .store
            .create(&self.bills_table, bill_record(sender, &fields, &link))
            .await
        {
            log::error!("failed to record finalized bill for {sender}: {e}");
        }
        summary(&fields, &link)
    }

    async fn lock_sender(&self, sender: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.sender_locks.lock().unwrap();
            locks
                .entry(sender.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

fn classify_document(media: MediaRef) -> Option<DocumentInput> {
    let content_type = media.content_type.to_lowercase();
    if content_type.starts_with("image/") {
        Some(DocumentInput::Image {
            media_type: content_type,
            data: media.data,
        })
    } else if content_type.starts_with("text/") {
        Some(DocumentInput::Text(
            String::from_utf8_lossy(&media.data).into_owned(),
        ))
    } else {
        None
    }
}

fn bill_record(sender: &str, fields: &ValidatedFields, link: &str) -> RecordFields {
    let mut record = RecordFields::new();
    record.insert("Utente".into(), serde_json::Value::String(sender.into()));
    record.insert(
        "Ente".into(),
        serde_json::Value::String(fields.ente.clone()),
    );
    if let Some(amount) = fields.amount {
        if let Some(n) = serde_json::Number::from_f64(amount) {
            record.insert("Importo".into(), serde_json::Value::Number(n));
        }
    }
    if let Some(iban) = &fields.iban {
        record.insert("IBAN".into(), serde_json::Value::String(iban.clone()));
    }
    if let Some(scadenza) = &fields.scadenza {
        record.insert(
            "Scadenza".into(),
            serde_json::Value::String(scadenza.clone()),
        );
    }
    record.insert(
        "Descrizione".into(),
        serde_json::Value::String(fields.descr.clone()),
    );
    record.insert("Link".into(), serde_json::Value::String(link.into()));
    record
}

fn summary(fields: &ValidatedFields, link: &str) -> String {
    let mut lines = vec![
        "Ecco il riepilogo 👌".to_string(),
        format!("Ente: {}", fields.ente),
    ];
    if let Some(amount) = fields.amount {
        lines.push(format!("Importo: € {amount:.2}"));
    }
    if let Some(iban) = &fields.iban {
        lines.push(format!("IBAN: {iban}"));
    }
    lines.push(format!(
        "Scadenza: {}",
        fields.scadenza.as_deref().unwrap_or("nessuna")
    ));
    lines.push(String::new());
    lines.push(format!("Paga qui: {link}"));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session;
    use crate::store::MemoryStore;

    const SENDER: &str = "whatsapp:+393331234567";
    const IBAN: &str = "IT60X0542811101000000123456";

    const SAMPLE_BILL: &str = "\
Enel Energia S.p.A.
Totale da pagare: € 49,90
Scadenza: 10/09/2025
IBAN: IT60 X054 2811 1010 0000 0123 456
";

    fn coordinator(store: Arc<MemoryStore>) -> IntakeCoordinator {
        let mut config = Config::default();
        config.payment.base_url = "https://runner.example.com".to_string();
        IntakeCoordinator::new(&config, store, None).unwrap()
    }

    fn text_event(text: &str) -> InboundEvent {
        InboundEvent {
            sender: SENDER.to_string(),
            text: text.to_string(),
            media: None,
        }
    }

    fn media_event(content_type: &str, data: &[u8]) -> InboundEvent {
        InboundEvent {
            sender: SENDER.to_string(),
            text: String::new(),
            media: Some(MediaRef {
                content_type: content_type.to_string(),
                data: data.to_vec(),
            }),
        }
    }

    #[tokio::test]
    async fn test_conversation_finalizes_with_link_and_record() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(store.clone());

        coordinator.handle(text_event("bolletta")).await;
        coordinator.handle(text_event("Acme Energy")).await;
        coordinator.handle(text_event("49,90")).await;
        coordinator.handle(text_event(IBAN)).await;
        let reply = coordinator.handle(text_event("2025-09-10")).await;

        assert!(reply.contains("Acme Energy"));
        assert!(reply.contains("https://runner.example.com/pay-bolletta?"));
        assert!(reply.contains("importo=49.90"));

        let bills = store.records("Bollette");
        assert_eq!(bills.len(), 1);
        assert_eq!(
            bills[0].fields.get("IBAN").and_then(serde_json::Value::as_str),
            Some(IBAN)
        );
        assert!(store.records("Sessions").is_empty());
    }

    #[tokio::test]
    async fn test_document_finalizes_via_extraction() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(store.clone());

        let reply = coordinator
            .handle(media_event("text/plain", SAMPLE_BILL.as_bytes()))
            .await;
        assert!(reply.contains("Enel Energia"));
        assert!(reply.contains("€ 49.90"));
        assert!(reply.contains("pay-bolletta?"));
        assert_eq!(store.records("Bollette").len(), 1);
    }

    #[tokio::test]
    async fn test_media_interrupt_ignores_partial_slots_and_ends_session() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(store.clone());

        coordinator.handle(text_event("bolletta")).await;
        coordinator.handle(text_event("Qualcun Altro")).await;
        coordinator.handle(text_event("99,99")).await;

        let reply = coordinator
            .handle(media_event("text/plain", SAMPLE_BILL.as_bytes()))
            .await;
        // only the document's fields are used
        assert!(reply.contains("Enel Energia"));
        assert!(!reply.contains("Qualcun Altro"));
        assert!(!reply.contains("99.99"));

        // the abandoned sequence is not resumed later
        let followup = coordinator.handle(text_event("ciao")).await;
        assert_eq!(followup, session::REPLY_IMPLICIT_START);
    }

    #[tokio::test]
    async fn test_unsupported_media_leaves_session_untouched() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(store.clone());

        coordinator.handle(text_event("bolletta")).await;
        coordinator.handle(text_event("Acme Energy")).await;

        let reply = coordinator
            .handle(media_event("application/zip", b"PK..."))
            .await;
        assert_eq!(reply, REPLY_UNSUPPORTED);

        // still at the amount slot
        let next = coordinator.handle(text_event("49,90")).await;
        assert_eq!(next, session::PROMPT_ACCOUNT);
    }

    #[tokio::test]
    async fn test_unreadable_document_answers_could_not_read() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(store.clone());

        let reply = coordinator
            .handle(media_event("text/plain", b"niente di utile qui"))
            .await;
        assert_eq!(reply, REPLY_COULD_NOT_READ);
        assert!(store.records("Bollette").is_empty());
    }

    #[tokio::test]
    async fn test_require_iban_policy_refuses_best_effort_link() {
        let store = Arc::new(MemoryStore::new());
        let mut config = Config::default();
        config.payment.base_url = "https://runner.example.com".to_string();
        config.payment.require_iban = true;
        let coordinator = IntakeCoordinator::new(&config, store.clone(), None).unwrap();

        let reply = coordinator
            .handle(media_event(
                "text/plain",
                b"Totale da pagare: 12,00\nScadenza: 10/09/2025",
            ))
            .await;
        assert_eq!(reply, REPLY_MISSING_IBAN);
        assert!(store.records("Bollette").is_empty());
    }

    #[tokio::test]
    async fn test_finalization_survives_store_outage() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(store.clone());

        store.set_unavailable(true);
        let reply = coordinator
            .handle(media_event("text/plain", SAMPLE_BILL.as_bytes()))
            .await;
        // the intent record could not be written, the user still gets a
        // summary and a link
        assert!(reply.contains("pay-bolletta?"));
        assert!(reply.contains("Enel Energia"));
    }

    #[tokio::test]
    async fn test_distinct_senders_proceed_independently() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = Arc::new(coordinator(store));

        let a = coordinator.handle(InboundEvent {
            sender: "whatsapp:+391".to_string(),
            text: "bolletta".to_string(),
            media: None,
        });
        let b = coordinator.handle(InboundEvent {
            sender: "whatsapp:+392".to_string(),
            text: "bolletta".to_string(),
            media: None,
        });
        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra, session::PROMPT_PAYEE);
        assert_eq!(rb, session::PROMPT_PAYEE);
    }
}
