//! Irreversible anonymization of stored payloads.
//!
//! Two strategies, picked by data type:
//!
//! - **Summaries** collapse free text, financial records and locations to
//!   statistics (word count, amount and category, coarse coordinates) plus a
//!   day-granularity date.
//! - **Scrubbing** replaces recognizable identifiers with fixed placeholder
//!   tokens throughout any other payload, recursing into arrays and objects.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::classify::{CARD_PATTERN, COORDINATES_PATTERN, CURRENCY_PATTERN, EMAIL_PATTERN, PHONE_PATTERN, SSN_PATTERN, scan_text};

/// Placeholder written in place of each identifier class.
pub const CARD_TOKEN: &str = "[CARD]";
pub const SSN_TOKEN: &str = "[SSN]";
pub const EMAIL_TOKEN: &str = "[EMAIL]";
pub const PHONE_TOKEN: &str = "[PHONE]";

const FREE_TEXT_TYPES: &[&str] = &["note", "message", "text", "email", "voice"];
const FINANCIAL_TYPES: &[&str] = &["financial", "transaction"];

/// Compiled patterns used by the anonymizers.
pub struct Anonymizer {
    /// Scrub order: card before SSN before phone, so digit runs are claimed by
    /// the most specific pattern.
    scrubbers: Vec<(Regex, &'static str)>,
    currency: Option<Regex>,
    coordinates: Option<Regex>,
}

impl Anonymizer {
    pub fn new() -> Self {
        let scrubbers = [
            (CARD_PATTERN, CARD_TOKEN),
            (SSN_PATTERN, SSN_TOKEN),
            (EMAIL_PATTERN, EMAIL_TOKEN),
            (PHONE_PATTERN, PHONE_TOKEN),
        ]
        .into_iter()
        .filter_map(|(pattern, token)| compile(pattern).map(|re| (re, token)))
        .collect();

        Self {
            scrubbers,
            currency: compile(CURRENCY_PATTERN),
            coordinates: compile(COORDINATES_PATTERN),
        }
    }

    /// Replace every card, SSN, email and phone match with its token.
    pub fn scrub_identifiers(&self, text: &str) -> String {
        self.scrubbers
            .iter()
            .fold(text.to_string(), |acc, (re, token)| {
                re.replace_all(&acc, *token).into_owned()
            })
    }

    /// Anonymized form of `data`, chosen by `data_type`.
    pub fn summarize(&self, data_type: &str, data: &Value, created_at: DateTime<Utc>) -> Value {
        let date = created_at.format("%Y-%m-%d").to_string();

        if FREE_TEXT_TYPES.contains(&data_type) {
            let words = scan_text(data).split_whitespace().count();
            return json!({ "wordCount": words, "date": date });
        }
        if FINANCIAL_TYPES.contains(&data_type) {
            return json!({
                "amount": self.amount_of(data),
                "category": category_of(data),
                "date": date,
            });
        }
        if data_type == "location" {
            return match self.coordinates_of(data) {
                Some((lat, lng)) => json!({
                    "latitude": round_coarse(lat),
                    "longitude": round_coarse(lng),
                    "date": date,
                }),
                None => json!({ "date": date }),
            };
        }
        self.scrub_value(data)
    }

    /// Recursively scrub every string inside `data`.
    pub fn scrub_value(&self, data: &Value) -> Value {
        match data {
            Value::String(s) => Value::String(self.scrub_identifiers(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.scrub_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.scrub_value(v)))
                    .collect::<Map<String, Value>>(),
            ),
            other => other.clone(),
        }
    }

    fn amount_of(&self, data: &Value) -> Value {
        if let Some(amount) = data.get("amount").filter(|v| v.is_number()) {
            return amount.clone();
        }
        let text = scan_text(data);
        self.currency
            .as_ref()
            .and_then(|re| re.find(&text))
            .and_then(|m| parse_number(m.as_str()))
            .map_or(Value::Null, Value::from)
    }

    fn coordinates_of(&self, data: &Value) -> Option<(f64, f64)> {
        let field = |names: &[&str]| names.iter().find_map(|n| data.get(*n).and_then(Value::as_f64));
        if let (Some(lat), Some(lng)) = (
            field(&["latitude", "lat"]),
            field(&["longitude", "lng", "lon"]),
        ) {
            return Some((lat, lng));
        }

        let text = scan_text(data);
        let found = self.coordinates.as_ref()?.find(&text)?;
        let (lat, lng) = found.as_str().split_once(',')?;
        Some((lat.trim().parse().ok()?, lng.trim().parse().ok()?))
    }
}

impl Default for Anonymizer {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(error = %e, "anonymizer pattern failed to compile");
            None
        }
    }
}

fn category_of(data: &Value) -> String {
    data.get("category")
        .and_then(Value::as_str)
        .unwrap_or("uncategorized")
        .to_string()
}

/// First decimal number inside a currency match, ignoring symbols and
/// thousands separators.
fn parse_number(text: &str) -> Option<f64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .filter(|c| *c != ',')
        .collect();
    digits.parse().ok()
}

/// One decimal place, roughly 11 km.
fn round_coarse(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap()
    }

    #[test]
    fn scrub_replaces_each_identifier_class() {
        let text = "card 4111 1111 1111 1111, ssn 123-45-6789, mail a@b.io, call 555-123-4567";
        let scrubbed = Anonymizer::new().scrub_identifiers(text);
        assert_eq!(scrubbed, "card [CARD], ssn [SSN], mail [EMAIL], call [PHONE]");
    }

    #[test]
    fn free_text_becomes_word_count_and_day() {
        let summary = Anonymizer::new().summarize("note", &json!("meet Jane at the cafe"), day());
        assert_eq!(summary, json!({"wordCount": 5, "date": "2026-03-14"}));
    }

    #[test]
    fn financial_keeps_amount_and_category() {
        let a = Anonymizer::new();
        let structured = json!({"amount": 42.5, "category": "food", "merchant": "Corner Deli"});
        assert_eq!(
            a.summarize("transaction", &structured, day()),
            json!({"amount": 42.5, "category": "food", "date": "2026-03-14"})
        );

        let text = json!("paid $1,200.00 rent to landlord");
        assert_eq!(
            a.summarize("financial", &text, day()),
            json!({"amount": 1200.0, "category": "uncategorized", "date": "2026-03-14"})
        );
    }

    #[test]
    fn location_is_coarsened() {
        let a = Anonymizer::new();
        let summary = a.summarize("location", &json!({"lat": 48.8584, "lng": 2.2945}), day());
        assert_eq!(summary, json!({"latitude": 48.9, "longitude": 2.3, "date": "2026-03-14"}));

        let from_text = a.summarize("location", &json!("parked at 40.7128, -74.0060"), day());
        assert_eq!(from_text["latitude"], json!(40.7));
        assert_eq!(from_text["longitude"], json!(-74.0));
    }

    #[test]
    fn other_types_are_scrubbed_recursively() {
        let data = json!({"name": "Jane", "emails": ["jane@example.com"], "age": 40});
        let out = Anonymizer::new().summarize("contact", &data, day());
        assert_eq!(out, json!({"name": "Jane", "emails": ["[EMAIL]"], "age": 40}));
    }
}
