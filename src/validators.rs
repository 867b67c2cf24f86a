use chrono::NaiveDate;

use crate::intent;

/// Parse a monetary amount written with European separators.
///
/// `.` is treated as a thousands separator unless it sits immediately before
/// exactly two trailing digits; `,` is the decimal mark. The result is
/// quantized to two fractional digits. Non-finite and non-positive values
/// are rejected.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: Vec<char> = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let mut normalized = String::with_capacity(cleaned.len());
    for (i, &c) in cleaned.iter().enumerate() {
        match c {
            '.' => {
                let rest = &cleaned[i + 1..];
                if rest.len() == 2 && rest.iter().all(|d| d.is_ascii_digit()) {
                    normalized.push('.');
                }
                // otherwise a thousands separator, dropped
            }
            ',' => normalized.push('.'),
            d => normalized.push(d),
        }
    }

    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    Some((value * 100.0).round() / 100.0)
}

// Italian IBAN: IT + 2 check digits + CIN letter + 5-digit ABI + 5-digit CAB
// + 12 alphanumeric account characters.
const ITALIAN_IBAN_LEN: usize = 27;

/// Normalize and validate an Italian IBAN: strip whitespace, uppercase,
/// check the national shape, then the ISO 13616 mod-97 checksum. A value
/// that looks right but fails the checksum is absent, never passed through.
pub fn normalize_iban(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if !has_italian_shape(&compact) {
        return None;
    }
    if mod97(&compact)? != 1 {
        return None;
    }
    Some(compact)
}

fn has_italian_shape(iban: &str) -> bool {
    let bytes = iban.as_bytes();
    if bytes.len() != ITALIAN_IBAN_LEN || !iban.starts_with("IT") {
        return false;
    }
    bytes[2].is_ascii_digit()
        && bytes[3].is_ascii_digit()
        && bytes[4].is_ascii_uppercase()
        && bytes[5..15].iter().all(|b| b.is_ascii_digit())
        && bytes[15..27]
            .iter()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
}

/// ISO 13616 checksum: move the first four characters to the end, map
/// letters to 10..35, and take the whole number mod 97.
fn mod97(iban: &str) -> Option<u32> {
    let rearranged = format!("{}{}", &iban[4..], &iban[..4]);
    let mut rem: u32 = 0;
    for c in rearranged.chars() {
        let v = c.to_digit(36)?;
        rem = if v < 10 {
            (rem * 10 + v) % 97
        } else {
            (rem * 100 + v) % 97
        };
    }
    Some(rem)
}

/// Outcome of due-date normalization. `NoDueDate` is an accepted, explicit
/// absence (the user said there is no deadline), distinct from `Invalid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateOutcome {
    Date(String),
    NoDueDate,
    Invalid,
}

const DAY_FIRST_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

/// Normalize a due date to canonical `YYYY-MM-DD`. Accepts the canonical
/// form and day-first `DD/MM/YYYY` variants (also `-` and `.` separators);
/// anything else is `Invalid` rather than silently misparsed.
pub fn normalize_due_date(raw: &str) -> DateOutcome {
    let trimmed = raw.trim();
    if intent::is_no_due_date(trimmed) {
        return DateOutcome::NoDueDate;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return DateOutcome::Date(date.format("%Y-%m-%d").to_string());
    }
    for fmt in DAY_FIRST_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return DateOutcome::Date(date.format("%Y-%m-%d").to_string());
        }
    }
    DateOutcome::Invalid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_decimal_comma() {
        assert_eq!(parse_amount("49,90"), Some(49.90));
    }

    #[test]
    fn test_amount_thousands_and_decimal() {
        assert_eq!(parse_amount("1.234,56"), Some(1234.56));
        assert_eq!(parse_amount("€ 1.234,56"), Some(1234.56));
    }

    #[test]
    fn test_amount_plain_integer() {
        assert_eq!(parse_amount("12"), Some(12.0));
    }

    #[test]
    fn test_amount_dot_decimal_kept() {
        assert_eq!(parse_amount("49.90"), Some(49.90));
        // three trailing digits means thousands, not decimals
        assert_eq!(parse_amount("1.234"), Some(1234.0));
    }

    #[test]
    fn test_amount_rejects_garbage() {
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("-12,50"), Some(12.5)); // sign stripped with other symbols
        assert_eq!(parse_amount("0"), None);
        assert_eq!(parse_amount("0,00"), None);
    }

    #[test]
    fn test_iban_valid() {
        assert_eq!(
            normalize_iban("IT60X0542811101000000123456"),
            Some("IT60X0542811101000000123456".to_string())
        );
    }

    #[test]
    fn test_iban_whitespace_and_case_normalized() {
        assert_eq!(
            normalize_iban("it60 x054 2811 1010 0000 0123 456"),
            Some("IT60X0542811101000000123456".to_string())
        );
    }

    #[test]
    fn test_iban_bad_checksum_rejected() {
        // same shape, one check digit off
        assert_eq!(normalize_iban("IT61X0542811101000000123456"), None);
    }

    #[test]
    fn test_iban_wrong_shape_rejected() {
        assert_eq!(normalize_iban("DE89370400440532013000"), None);
        assert_eq!(normalize_iban("IT60X054281110100000012345"), None); // short
        assert_eq!(normalize_iban(""), None);
    }

    #[test]
    fn test_date_canonical_passthrough() {
        assert_eq!(
            normalize_due_date("2025-09-10"),
            DateOutcome::Date("2025-09-10".to_string())
        );
    }

    #[test]
    fn test_date_day_first_reordered() {
        assert_eq!(
            normalize_due_date("10/09/2025"),
            DateOutcome::Date("2025-09-10".to_string())
        );
        assert_eq!(
            normalize_due_date("10-09-2025"),
            DateOutcome::Date("2025-09-10".to_string())
        );
        assert_eq!(
            normalize_due_date("10.09.2025"),
            DateOutcome::Date("2025-09-10".to_string())
        );
    }

    #[test]
    fn test_date_sentinel_is_explicit_absence() {
        assert_eq!(normalize_due_date("nessuna"), DateOutcome::NoDueDate);
        assert_eq!(normalize_due_date("NONE"), DateOutcome::NoDueDate);
    }

    #[test]
    fn test_date_impossible_calendar_date_rejected() {
        assert_eq!(normalize_due_date("31/02/2025"), DateOutcome::Invalid);
    }

    #[test]
    fn test_date_garbage_rejected() {
        assert_eq!(normalize_due_date("domani"), DateOutcome::Invalid);
        assert_eq!(normalize_due_date("09/10/25"), DateOutcome::Invalid);
    }
}
