use crate::fields::{CandidateFields, ValidatedFields};
use crate::validators::{self, DateOutcome};

/// Combine model and heuristic candidates into one validated field set.
///
/// Pure and field-local: the model's value wins when it is present and
/// independently valid, otherwise the heuristic's. A valid model amount and
/// a heuristic-only IBAN can coexist in one result.
pub fn merge(model: &CandidateFields, heuristic: &CandidateFields) -> ValidatedFields {
    let iban = model
        .iban
        .as_deref()
        .and_then(validators::normalize_iban)
        .or_else(|| heuristic.iban.as_deref().and_then(validators::normalize_iban));

    let amount = model
        .amount
        .and_then(quantize_positive)
        .or_else(|| heuristic.amount.and_then(quantize_positive));

    let scadenza = model
        .scadenza
        .as_deref()
        .and_then(valid_date)
        .or_else(|| heuristic.scadenza.as_deref().and_then(valid_date));

    let ente = non_empty(model.ente.as_deref()).or_else(|| non_empty(heuristic.ente.as_deref()));
    let descr = non_empty(model.descr.as_deref()).or_else(|| non_empty(heuristic.descr.as_deref()));

    ValidatedFields::assemble(ente, iban, amount, scadenza, descr)
}

fn quantize_positive(value: f64) -> Option<f64> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    Some((value * 100.0).round() / 100.0)
}

fn valid_date(raw: &str) -> Option<String> {
    match validators::normalize_due_date(raw) {
        DateOutcome::Date(date) => Some(date),
        _ => None,
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_amount_and_heuristic_iban_coexist() {
        let model = CandidateFields {
            amount: Some(49.9),
            iban: Some("IT61X0542811101000000123456".to_string()), // bad checksum
            ..Default::default()
        };
        let heuristic = CandidateFields {
            iban: Some("IT60X0542811101000000123456".to_string()),
            ..Default::default()
        };

        let merged = merge(&model, &heuristic);
        assert_eq!(merged.amount, Some(49.9));
        assert_eq!(merged.iban.as_deref(), Some("IT60X0542811101000000123456"));
    }

    #[test]
    fn test_model_wins_when_valid() {
        let model = CandidateFields {
            ente: Some("Enel Energia".to_string()),
            scadenza: Some("2025-09-10".to_string()),
            ..Default::default()
        };
        let heuristic = CandidateFields {
            ente: Some("Bolletta n. 42".to_string()),
            scadenza: Some("01/08/2025".to_string()),
            ..Default::default()
        };

        let merged = merge(&model, &heuristic);
        assert_eq!(merged.ente, "Enel Energia");
        assert_eq!(merged.scadenza.as_deref(), Some("2025-09-10"));
    }

    #[test]
    fn test_invalid_model_values_fall_back() {
        let model = CandidateFields {
            amount: Some(-3.0),
            scadenza: Some("31/02/2025".to_string()),
            ..Default::default()
        };
        let heuristic = CandidateFields {
            amount: Some(15.0),
            scadenza: Some("10/09/2025".to_string()),
            ..Default::default()
        };

        let merged = merge(&model, &heuristic);
        assert_eq!(merged.amount, Some(15.0));
        assert_eq!(merged.scadenza.as_deref(), Some("2025-09-10"));
    }

    #[test]
    fn test_descr_synthesized_after_merge() {
        let merged = merge(
            &CandidateFields::default(),
            &CandidateFields {
                scadenza: Some("2025-09-10".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(merged.descr, "Bolletta scadenza 2025-09-10");
    }
}
