//! Rule-based entity extraction shared by the classifier and the handlers.

use std::sync::OnceLock;

use chrono::NaiveDate;
use hrflow_core::domain::hr::{LeaveType, PayPeriod};
use hrflow_core::domain::intent::Entities;
use regex::Regex;

const SKILL_KEYWORDS: &[&str] = &[
    "java",
    "python",
    "rust",
    "golang",
    "javascript",
    "typescript",
    "react",
    "node",
    "sql",
    "kotlin",
    "swift",
    "c#",
    "c++",
    "aws",
    "kubernetes",
    "docker",
    "machine learning",
    "data analysis",
    "figma",
    "recruiting",
];

const DEPARTMENTS: &[(&str, &str)] = &[
    ("engineering", "Engineering"),
    ("sales", "Sales"),
    ("marketing", "Marketing"),
    ("finance", "Finance"),
    ("human resources", "HR"),
    ("hr department", "HR"),
    ("operations", "Operations"),
    ("design", "Design"),
];

const MONTHS: &[&str] = &[
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

struct Patterns {
    iso_date: Regex,
    year_month: Regex,
    month_year: Regex,
    employee_id: Regex,
    candidate_name: Regex,
    position: Regex,
    reason: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                iso_date: Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").ok()?,
                year_month: Regex::new(r"\b(\d{4})-(\d{2})\b").ok()?,
                month_year: Regex::new(concat!(
                    r"(?i)\b(january|february|march|april|may|june|july|august|september|",
                    r"october|november|december)\s+(\d{4})\b",
                ))
                .ok()?,
                employee_id: Regex::new(r"(?i)\bemp-?(\d{3,})\b").ok()?,
                candidate_name: Regex::new(concat!(
                    r"(?:candidate|profile (?:of|for)|details (?:of|for|on|about))",
                    r"\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)",
                ))
                .ok()?,
                position: Regex::new(concat!(
                    r"(?i)\b((?:senior|junior|lead|backend|frontend|full[- ]stack|data|software|",
                    r"product|ux)\s+)?(developer|engineer|designer|analyst|scientist|recruiter|",
                    r"manager)s?\b",
                ))
                .ok()?,
                reason: Regex::new(r"(?i)\b(?:because(?: of)?|due to|reason:)\s+(.+)$").ok()?,
            })
        })
        .as_ref()
}

/// Extracts structured fields from a message without any external calls.
#[derive(Clone, Debug, Default)]
pub struct EntityExtractor;

impl EntityExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, message: &str) -> Entities {
        let normalized = normalize_text(message);
        let mut entities = Entities {
            leave_type: extract_leave_type(&normalized),
            skills: extract_skills(&normalized),
            department: extract_department(&normalized),
            ..Entities::default()
        };

        let Some(patterns) = patterns() else {
            return entities;
        };

        let mut dates = patterns.iso_date.captures_iter(message).filter_map(|captures| {
            let year = captures.get(1)?.as_str().parse().ok()?;
            let month = captures.get(2)?.as_str().parse().ok()?;
            let day = captures.get(3)?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        });
        entities.start_date = dates.next();
        entities.end_date = dates.next().or(entities.start_date);

        entities.pay_period = extract_pay_period(patterns, message);
        entities.employee_id = patterns
            .employee_id
            .captures(message)
            .and_then(|captures| captures.get(1))
            .map(|digits| format!("EMP{}", digits.as_str()));
        entities.candidate_name = patterns
            .candidate_name
            .captures(message)
            .and_then(|captures| captures.get(1))
            .map(|name| name.as_str().to_string());
        entities.position = patterns.position.captures(message).map(|captures| {
            let qualifier = captures.get(1).map(|m| m.as_str().trim().to_ascii_lowercase());
            let role = captures.get(2).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
            match qualifier {
                Some(qualifier) if !qualifier.is_empty() => format!("{qualifier} {role}"),
                _ => role,
            }
        });
        entities.reason = patterns
            .reason
            .captures(message)
            .and_then(|captures| captures.get(1))
            .map(|reason| reason.as_str().trim().trim_end_matches('.').to_string())
            .filter(|reason| !reason.is_empty());

        entities
    }
}

fn normalize_text(text: &str) -> String {
    text.to_ascii_lowercase()
}

fn tokenize(text: &str) -> Vec<&str> {
    text.split(|ch: char| !(ch.is_ascii_alphanumeric() || matches!(ch, '#' | '+')))
        .filter(|token| !token.is_empty())
        .collect()
}

fn extract_leave_type(normalized: &str) -> Option<LeaveType> {
    let tokens = tokenize(normalized);
    let has = |word: &str| tokens.iter().any(|token| *token == word);

    if has("maternity") {
        Some(LeaveType::Maternity)
    } else if has("paternity") {
        Some(LeaveType::Paternity)
    } else if has("sick") || has("ill") || has("unwell") {
        Some(LeaveType::Sick)
    } else if has("unpaid") {
        Some(LeaveType::Unpaid)
    } else if has("personal") {
        Some(LeaveType::Personal)
    } else if has("annual") || has("vacation") || has("holiday") || has("holidays") {
        Some(LeaveType::Annual)
    } else {
        None
    }
}

fn extract_skills(normalized: &str) -> Vec<String> {
    let tokens = tokenize(normalized);
    SKILL_KEYWORDS
        .iter()
        .filter(|skill| {
            if skill.contains(' ') {
                normalized.contains(*skill)
            } else {
                tokens.iter().any(|token| token == *skill)
            }
        })
        .map(|skill| skill.to_string())
        .collect()
}

fn extract_department(normalized: &str) -> Option<String> {
    let tokens = tokenize(normalized);
    DEPARTMENTS
        .iter()
        .find(|(keyword, _)| {
            if keyword.contains(' ') {
                normalized.contains(*keyword)
            } else {
                tokens.iter().any(|token| token == keyword)
            }
        })
        .map(|(_, department)| department.to_string())
}

fn extract_pay_period(patterns: &Patterns, message: &str) -> Option<PayPeriod> {
    if let Some(captures) = patterns.month_year.captures(message) {
        let month_name = captures.get(1)?.as_str().to_ascii_lowercase();
        let month = MONTHS.iter().position(|name| *name == month_name)? as u32 + 1;
        let year = captures.get(2)?.as_str().parse().ok()?;
        return Some(PayPeriod { year, month });
    }

    // `YYYY-MM` that is not the prefix of a full date.
    patterns.year_month.captures_iter(message).find_map(|captures| {
        let whole = captures.get(0)?;
        if message[whole.end()..].starts_with('-') {
            return None;
        }
        let year = captures.get(1)?.as_str().parse().ok()?;
        let month = captures.get(2)?.as_str().parse().ok()?;
        (1..=12).contains(&month).then_some(PayPeriod { year, month })
    })
}
