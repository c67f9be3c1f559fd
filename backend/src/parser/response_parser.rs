use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use shared::{Action, ActionCategory, IdentificationResult};
use uuid::Uuid;

pub const DEFAULT_PROBLEM_NAME: &str = "Unknown issue";
pub const DEFAULT_DESCRIPTION: &str = "No description available";
pub const DEFAULT_SEVERITY: u8 = 2;

const BASE_CONFIDENCE: f32 = 65.0;
const SCIENTIFIC_NAME_BONUS: f32 = 15.0;
const DETAILED_RESPONSE_BONUS: f32 = 10.0;
const DETAILED_RESPONSE_CHARS: usize = 200;
const MAX_LENGTH_BONUS: usize = 10;
const MAX_ACTION_TITLE_CHARS: usize = 60;

const ACTION_LABELS: &str = r"recommended\s+actions?|actions?|recommendations?|treatments?";
const SCIENTIFIC_LABELS: &str = r"scientific\s+name";
const TYPE_LABELS: &str = r"(?:problem\s+)?type";

/// A section label either opening a line (optionally decorated with markdown)
/// or followed by a colon anywhere in the text. Emphasis markers after the
/// label belong to the header, not the section body.
fn header(labels: &str) -> String {
    format!(
        r"(?:(?m:^)[ \t*#_-]*(?:{labels})\b[ \t*_]*:?[ \t*_]*|\b(?:{labels})[ \t*_]*:[ \t*_]*)"
    )
}

fn labeled_line(labels: &str) -> String {
    format!(r"(?i)\b(?:{labels})[ \t*_]*:[ \t*_]*([^\n]*)")
}

lazy_static! {
    static ref SEVERITY_RE: Regex = Regex::new(r"(?i)severity[^0-9\n]*(\d)").unwrap();
    static ref DESCRIPTION_RE: Regex = Regex::new(&format!(
        r"(?is){}\s*(.*?)\s*(?:{}|{}|\z)",
        header("description"),
        header(ACTION_LABELS),
        header(SCIENTIFIC_LABELS)
    ))
    .unwrap();
    static ref ACTIONS_RE: Regex = Regex::new(&format!(
        r"(?is){}\s*(.*?)\s*(?:{}|{}|\z)",
        header(ACTION_LABELS),
        header(SCIENTIFIC_LABELS),
        header(TYPE_LABELS)
    ))
    .unwrap();
    static ref SCIENTIFIC_NAME_RE: Regex = Regex::new(&labeled_line(SCIENTIFIC_LABELS)).unwrap();
    static ref PROBLEM_TYPE_RE: Regex = Regex::new(&labeled_line(TYPE_LABELS)).unwrap();
    static ref SCIENTIFIC_LABEL_RE: Regex = Regex::new(r"(?i)scientific\s+name").unwrap();
    static ref LIST_MARKER_RE: Regex =
        Regex::new(r"(?m)(?:^|\s)\d{1,2}[.)]\s+|^[ \t]*[-*•][ \t]+").unwrap();
    static ref PEST_CONTROL_RE: Regex =
        Regex::new(r"(?i)\b(?:spray|fungicid|pesticid|insecticid|bactericid|chemical)").unwrap();
    static ref PRUNING_RE: Regex = Regex::new(r"(?i)\b(?:remove|prune|pruning|cut|dispose|destroy)").unwrap();
    static ref GENERAL_RE: Regex =
        Regex::new(r"(?i)\b(?:water|irrigat|fertili[sz]|nutrient|compost|mulch)").unwrap();
    static ref APPLY_RE: Regex = Regex::new(r"(?i)\bappl(?:y|ied|ication)").unwrap();
}

/// Caller-supplied fields copied onto every parsed result.
#[derive(Debug, Clone, Copy)]
pub struct ResultContext<'a> {
    pub crop_id: &'a str,
    pub crop_name: &'a str,
    pub image_url: &'a str,
    pub user_id: &'a str,
}

/// Turns the AI's free-text reply into a structured result. Never fails:
/// every field falls back to a default when it cannot be found.
pub fn parse(raw_text: &str, context: ResultContext<'_>) -> IdentificationResult {
    let scientific_name = extract_scientific_name(raw_text);
    let problem_type = extract_problem_type(raw_text);

    IdentificationResult {
        id: Uuid::new_v4().to_string(),
        crop_id: context.crop_id.to_string(),
        crop_name: context.crop_name.to_string(),
        image_url: context.image_url.to_string(),
        problem_name: extract_problem_name(raw_text),
        description: extract_description(raw_text),
        severity: extract_severity(raw_text),
        confidence: estimate_confidence(raw_text),
        actions: extract_actions(raw_text),
        scientific_name,
        problem_type,
        timestamp: Utc::now(),
        user_id: context.user_id.to_string(),
        error_reason: None,
        feedback: None,
    }
}

pub fn extract_problem_name(raw_text: &str) -> String {
    raw_text
        .lines()
        .map(|line| line.trim().trim_matches(|c| matches!(c, '*' | '#' | '_')).trim())
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            log::debug!("No problem name in AI response, using default");
            DEFAULT_PROBLEM_NAME.to_string()
        })
}

pub fn extract_severity(raw_text: &str) -> u8 {
    SEVERITY_RE
        .captures(raw_text)
        .and_then(|caps| caps[1].parse::<u8>().ok())
        .map(|level| level.clamp(1, 3))
        .unwrap_or_else(|| {
            log::debug!("No severity in AI response, defaulting to {}", DEFAULT_SEVERITY);
            DEFAULT_SEVERITY
        })
}

pub fn extract_description(raw_text: &str) -> String {
    DESCRIPTION_RE
        .captures(raw_text)
        .map(|caps| strip_emphasis(&caps[1]).to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| {
            log::debug!("No description in AI response, using default");
            DEFAULT_DESCRIPTION.to_string()
        })
}

pub fn extract_actions(raw_text: &str) -> Vec<Action> {
    let Some(section) = ACTIONS_RE.captures(raw_text).map(|caps| caps[1].to_string()) else {
        log::debug!("No action section in AI response");
        return Vec::new();
    };

    let mut fragments: Vec<String> = LIST_MARKER_RE
        .split(&section)
        .map(|fragment| fragment.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|fragment| has_content(fragment))
        .collect();

    if fragments.len() == 1 && section.trim().contains('\n') {
        fragments = section
            .lines()
            .map(str::trim)
            .filter(|line| has_content(line))
            .map(str::to_string)
            .collect();
    }

    fragments
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            Action::new(
                action_title(&text),
                text.clone(),
                index as u32 + 1,
                classify_action(&text),
            )
        })
        .collect()
}

pub fn extract_scientific_name(raw_text: &str) -> Option<String> {
    labeled_value(&SCIENTIFIC_NAME_RE, raw_text)
}

pub fn extract_problem_type(raw_text: &str) -> Option<String> {
    labeled_value(&PROBLEM_TYPE_RE, raw_text)
}

/// Heuristic 0..=100 score from response shape, not a calibrated probability.
pub fn estimate_confidence(raw_text: &str) -> f32 {
    let length = raw_text.chars().count();
    let mut score = BASE_CONFIDENCE;
    if SCIENTIFIC_LABEL_RE.is_match(raw_text) {
        score += SCIENTIFIC_NAME_BONUS;
    }
    if length > DETAILED_RESPONSE_CHARS {
        score += DETAILED_RESPONSE_BONUS;
    }
    score += (length / 100).min(MAX_LENGTH_BONUS) as f32;
    score.clamp(0.0, 100.0)
}

pub fn classify_action(text: &str) -> ActionCategory {
    if PEST_CONTROL_RE.is_match(text) {
        ActionCategory::PestControl
    } else if PRUNING_RE.is_match(text) {
        ActionCategory::Pruning
    } else if GENERAL_RE.is_match(text) {
        ActionCategory::General
    } else if APPLY_RE.is_match(text) {
        ActionCategory::PestControl
    } else {
        // monitor / observe / watch, and anything unrecognised
        ActionCategory::Monitoring
    }
}

fn labeled_value(pattern: &Regex, raw_text: &str) -> Option<String> {
    pattern
        .captures(raw_text)
        .map(|caps| {
            caps[1]
                .trim()
                .trim_matches(|c| matches!(c, '*' | '_'))
                .trim_end_matches('.')
                .trim()
                .to_string()
        })
        .filter(|value| !value.is_empty())
}

fn strip_emphasis(text: &str) -> &str {
    text.trim().trim_matches(|c| matches!(c, '*' | '_')).trim()
}

/// False for empty fragments and leftover markdown such as `**`.
fn has_content(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

fn action_title(text: &str) -> String {
    let clause = text
        .split(['.', ':', ';'])
        .next()
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .unwrap_or(text);

    if clause.chars().count() <= MAX_ACTION_TITLE_CHARS {
        return clause.to_string();
    }
    let cut: String = clause.chars().take(MAX_ACTION_TITLE_CHARS).collect();
    match cut.rfind(' ') {
        Some(space) => format!("{}…", &cut[..space]),
        None => format!("{}…", cut),
    }
}
