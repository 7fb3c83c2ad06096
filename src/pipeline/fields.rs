//! Category-keyed field extraction.
//!
//! Pure pattern matching over cleaned OCR text: each category maps to a
//! strategy function populating a flat key/value map. Keys are only present
//! for fields that actually matched. This is regex matching, not semantic
//! understanding — false positives and misses on structurally unusual
//! documents are inherent to the approach.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::Category;

/// A field value: a single string or a list for multi-value fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Many(Vec<String>),
}

pub type FieldMap = BTreeMap<String, FieldValue>;

// ── Shared date patterns ────────────────────────────────────────────────────

static RE_DATE_SLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\b").unwrap());
static RE_DATE_DASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}-\d{1,2}-\d{4}\b").unwrap());
static RE_DATE_LONG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{1,2},\s*\d{4}",
    )
    .unwrap()
});

// ── Certificate ─────────────────────────────────────────────────────────────

static RE_CERT_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)certificate of [a-z][a-z ]*").unwrap());
static RE_CERT_RECIPIENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:presented to|awarded to|this certifies that)\s*:?\s*([A-Za-z][A-Za-z .'-]*)")
        .unwrap()
});

// ── Resume ──────────────────────────────────────────────────────────────────

static RE_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static RE_PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").unwrap());

// ── License ─────────────────────────────────────────────────────────────────

static RE_LICENSE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:license|lic\.?|no\.?)(?:\s*(?:license|lic\.?|no\.?))*\s*#?\s*:?\s*([A-Za-z0-9][A-Za-z0-9-]*)",
    )
    .unwrap()
});
static RE_EXPIRATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:expires?|exp\.?|expiration)\s*(?:date)?\s*:?\s*(?:on\s+)?(\d{1,2}/\d{1,2}/\d{4})")
        .unwrap()
});

// ── Default ─────────────────────────────────────────────────────────────────

static RE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3,}\b").unwrap());

/// Extract structured fields from recognized text.
///
/// Deterministic: identical (text, category) inputs always produce the same
/// map. `form`, `auto-detect`, and anything unrecognized route to the
/// default extractor.
pub fn extract_fields(text: &str, category: Category) -> FieldMap {
    match category {
        Category::Certificate => extract_certificate(text),
        Category::Resume => extract_resume(text),
        Category::License => extract_license(text),
        Category::Form | Category::AutoDetect => extract_default(text),
    }
}

fn extract_certificate(text: &str) -> FieldMap {
    let mut fields = FieldMap::new();

    if let Some(m) = RE_CERT_TITLE.find(text) {
        set_single(&mut fields, "title", m.as_str().trim_end());
    }
    if let Some(caps) = RE_CERT_RECIPIENT.captures(text) {
        let name = caps[1].trim_end_matches(|c: char| !c.is_alphabetic());
        set_single(&mut fields, "recipient_name", name);
    }
    if let Some(date) = first_date(text) {
        set_single(&mut fields, "date", &date);
    }

    fields
}

fn extract_resume(text: &str) -> FieldMap {
    let mut fields = FieldMap::new();

    // Positional heuristic: resumes lead with the candidate's name
    if let Some(first_line) = text.lines().find(|l| !l.trim().is_empty()) {
        set_single(&mut fields, "name", first_line.trim());
    }
    if let Some(m) = RE_EMAIL.find(text) {
        set_single(&mut fields, "email", m.as_str());
    }
    if let Some(m) = RE_PHONE.find(text) {
        set_single(&mut fields, "phone", m.as_str());
    }

    fields
}

fn extract_license(text: &str) -> FieldMap {
    let mut fields = FieldMap::new();

    if let Some(caps) = RE_LICENSE_NUMBER.captures(text) {
        set_single(&mut fields, "license_number", &caps[1]);
    }
    if let Some(caps) = RE_EXPIRATION.captures(text) {
        set_single(&mut fields, "expiration_date", &caps[1]);
    }

    fields
}

fn extract_default(text: &str) -> FieldMap {
    let mut fields = FieldMap::new();

    let mut dates: Vec<String> = Vec::new();
    for re in [&*RE_DATE_SLASH, &*RE_DATE_DASH, &*RE_DATE_LONG] {
        dates.extend(re.find_iter(text).map(|m| m.as_str().to_string()));
    }
    if !dates.is_empty() {
        fields.insert("dates".into(), FieldValue::Many(dates));
    }

    let numbers: Vec<String> = RE_NUMBER
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    if !numbers.is_empty() {
        fields.insert("numbers".into(), FieldValue::Many(numbers));
    }

    fields
}

/// First match of any supported date format, tried in format order.
fn first_date(text: &str) -> Option<String> {
    for re in [&*RE_DATE_SLASH, &*RE_DATE_DASH, &*RE_DATE_LONG] {
        if let Some(m) = re.find(text) {
            return Some(m.as_str().to_string());
        }
    }
    None
}

fn set_single(fields: &mut FieldMap, key: &str, value: &str) {
    if !value.is_empty() {
        fields.insert(key.into(), FieldValue::Single(value.to_string()));
    }
}
