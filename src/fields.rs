use serde::{Deserialize, Serialize};

/// Raw extractor output. Any field may be missing or malformed; nothing has
/// been validated yet. This struct doubles as the JSON schema the model
/// extractor asks for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateFields {
    pub ente: Option<String>,
    pub iban: Option<String>,
    pub amount: Option<f64>,
    pub scadenza: Option<String>,
    pub descr: Option<String>,
}

impl CandidateFields {
    pub fn is_empty(&self) -> bool {
        self.ente.is_none()
            && self.iban.is_none()
            && self.amount.is_none()
            && self.scadenza.is_none()
            && self.descr.is_none()
    }
}

/// Finalized field set consumed by the link builder.
///
/// Invariants: `iban` is uppercase and checksum-valid when present; `amount`
/// is finite, positive and quantized to two fractional digits; `scadenza` is
/// canonical `YYYY-MM-DD`; `ente` and `descr` are never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedFields {
    pub ente: String,
    pub iban: Option<String>,
    pub amount: Option<f64>,
    pub scadenza: Option<String>,
    pub descr: String,
}

pub const DEFAULT_PAYEE: &str = "Fornitore";
pub const DEFAULT_DESCR: &str = "Pagamento bolletta";

impl ValidatedFields {
    /// Apply the default payee and synthesize a description when absent.
    pub fn assemble(
        ente: Option<String>,
        iban: Option<String>,
        amount: Option<f64>,
        scadenza: Option<String>,
        descr: Option<String>,
    ) -> Self {
        let descr = descr
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| synthesize_descr(scadenza.as_deref()));
        let ente = ente
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PAYEE.to_string());
        ValidatedFields {
            ente,
            iban,
            amount,
            scadenza,
            descr,
        }
    }
}

pub fn synthesize_descr(scadenza: Option<&str>) -> String {
    match scadenza {
        Some(date) => format!("Bolletta scadenza {date}"),
        None => DEFAULT_DESCR.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_when_absent() {
        let fields = ValidatedFields::assemble(None, None, Some(12.0), None, None);
        assert_eq!(fields.ente, "Fornitore");
        assert_eq!(fields.descr, "Pagamento bolletta");
    }

    #[test]
    fn test_descr_synthesized_from_due_date() {
        let fields = ValidatedFields::assemble(
            Some("Acme Energia".to_string()),
            None,
            Some(49.9),
            Some("2025-09-10".to_string()),
            None,
        );
        assert_eq!(fields.descr, "Bolletta scadenza 2025-09-10");
        assert_eq!(fields.ente, "Acme Energia");
    }

    #[test]
    fn test_blank_values_fall_back() {
        let fields =
            ValidatedFields::assemble(Some("  ".to_string()), None, None, None, Some(String::new()));
        assert_eq!(fields.ente, "Fornitore");
        assert_eq!(fields.descr, "Pagamento bolletta");
    }
}
