use regex::Regex;

use crate::fields::CandidateFields;
use crate::validators::{self, DateOutcome};

/// One named candidate rule for a field. Rules are tried in order and the
/// first one that matches and survives validation wins.
#[derive(Debug)]
struct FieldRule {
    name: &'static str,
    pattern: Regex,
}

/// Pattern-based field recovery from raw document text. Intentionally
/// low-precision and deterministic: it is the fallback when the model
/// extractor is unavailable or wrong.
#[derive(Debug)]
pub struct HeuristicExtractor {
    iban_rule: FieldRule,
    amount_rules: Vec<FieldRule>,
    date_rules: Vec<FieldRule>,
    payee_label_prefix: Regex,
    provider_vocabulary: Vec<&'static str>,
}

// How many leading lines the payee scan looks at.
const PAYEE_WINDOW_LINES: usize = 12;
const PAYEE_MIN_LEN: usize = 4;
const PAYEE_MAX_LEN: usize = 49;

const PROVIDER_VOCABULARY: &[&str] = &[
    "enel",
    "eni",
    "plenitude",
    "a2a",
    "hera",
    "iren",
    "acea",
    "edison",
    "sorgenia",
    "engie",
    "tim",
    "vodafone",
    "fastweb",
    "windtre",
    "wind tre",
    "iliad",
    "acquedotto",
];

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self {
            iban_rule: FieldRule {
                name: "italian-iban-shape",
                pattern: Regex::new(r"IT\d{2}[A-Z]\d{10}[0-9A-Z]{12}").unwrap(),
            },
            amount_rules: vec![
                FieldRule {
                    name: "keyword-window",
                    pattern: Regex::new(
                        r"(?i)(?:totale da pagare|totale|importo|da pagare|amount due|total)\D{0,40}?(\d{1,3}(?:\.\d{3})+,\d{2}|\d+,\d{2}|\d+\.\d{2})",
                    )
                    .unwrap(),
                },
                FieldRule {
                    name: "generic-currency",
                    pattern: Regex::new(
                        r"(?:€|EUR)\s*(\d{1,3}(?:\.\d{3})+,\d{2}|\d+[.,]\d{2})|(\d{1,3}(?:\.\d{3})+,\d{2}|\d+,\d{2})",
                    )
                    .unwrap(),
                },
            ],
            date_rules: vec![
                FieldRule {
                    name: "iso-date",
                    pattern: Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").unwrap(),
                },
                FieldRule {
                    name: "day-first-date",
                    pattern: Regex::new(r"\b(\d{2}[/.\-]\d{2}[/.\-]\d{4})\b").unwrap(),
                },
            ],
            payee_label_prefix: Regex::new(r"(?i)^(?:bolletta|fattura|invoice|bill)[\s:.\-]*")
                .unwrap(),
            provider_vocabulary: PROVIDER_VOCABULARY.to_vec(),
        }
    }

    pub fn extract(&self, text: &str) -> CandidateFields {
        CandidateFields {
            ente: self.extract_payee(text),
            iban: self.extract_iban(text),
            amount: self.extract_amount(text),
            scadenza: self.extract_due_date(text),
            descr: None,
        }
    }

    /// First shape match only; an invalid match is discarded, not retried
    /// against a later one.
    fn extract_iban(&self, text: &str) -> Option<String> {
        let compact: String = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let matched = self.iban_rule.pattern.find(&compact)?;
        let normalized = validators::normalize_iban(matched.as_str());
        if normalized.is_none() {
            log::debug!(
                "heuristic rule {} matched but checksum failed, discarding",
                self.iban_rule.name
            );
        }
        normalized
    }

    fn extract_amount(&self, text: &str) -> Option<f64> {
        for rule in &self.amount_rules {
            if let Some(caps) = rule.pattern.captures(text) {
                let raw = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .next()
                    .map(|m| m.as_str())?;
                if let Some(amount) = validators::parse_amount(raw) {
                    log::debug!("heuristic amount via rule {}: {}", rule.name, amount);
                    return Some(amount);
                }
            }
        }
        None
    }

    fn extract_due_date(&self, text: &str) -> Option<String> {
        for rule in &self.date_rules {
            if let Some(caps) = rule.pattern.captures(text) {
                let raw = caps.get(1).map(|m| m.as_str())?;
                // first match wins or the field stays absent
                return match validators::normalize_due_date(raw) {
                    DateOutcome::Date(date) => Some(date),
                    _ => None,
                };
            }
        }
        None
    }

    /// Scan the leading lines for a known provider keyword; fall back to the
    /// first line whose length is plausible for a company name.
    fn extract_payee(&self, text: &str) -> Option<String> {
        let window: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(PAYEE_WINDOW_LINES)
            .collect();

        for line in &window {
            let lower = line.to_lowercase();
            if self.provider_vocabulary.iter().any(|kw| lower.contains(kw)) {
                return Some(self.strip_label_prefix(line));
            }
        }

        window
            .iter()
            .find(|l| (PAYEE_MIN_LEN..=PAYEE_MAX_LEN).contains(&l.chars().count()))
            .map(|l| self.strip_label_prefix(l))
    }

    fn strip_label_prefix(&self, line: &str) -> String {
        self.payee_label_prefix.replace(line, "").trim().to_string()
    }
}
