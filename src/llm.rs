//! Structured extraction via a local language model.
//!
//! Sends truncated opinion text to an Ollama-style `/api/generate` endpoint
//! and turns the response into an [`ExtractedCase`]. Model output is rarely
//! clean JSON, so parsing runs through a repair cascade: direct parse, then
//! trailing-comma removal, then quote normalization, then per-field regex
//! recovery. A response that survives none of the strategies is an
//! extraction failure, not a panic.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::models::{Attorney, Citation, Issue, Judge, Party, StatuteRef};

const SYSTEM_PROMPT: &str = "You are a legal analyst extracting structured data from Washington \
State appellate court opinions. Respond with a single JSON object and nothing else. Use null for \
unknown values. Do not invent parties, judges, or citations that do not appear in the text.";

const SEPARATOR: &str = "\n\n[...document continues...]\n\n";

/// The model's answer after schema normalization.
#[derive(Debug, Clone, Default)]
pub struct ExtractedCase {
    pub summary: Option<String>,
    pub case_type: Option<String>,
    pub county: Option<String>,
    pub trial_court: Option<String>,
    pub trial_judge: Option<String>,
    pub source_docket_number: Option<String>,
    pub opinion_filed_date: Option<String>,
    pub appeal_outcome: Option<String>,
    pub outcome_detail: Option<String>,
    pub winner_legal_role: Option<String>,
    pub winner_personal_role: Option<String>,
    pub parties: Vec<Party>,
    pub attorneys: Vec<Attorney>,
    pub judges: Vec<Judge>,
    pub citations: Vec<Citation>,
    pub statutes: Vec<StatuteRef>,
    pub issues: Vec<Issue>,
}

/// Run structured extraction over opinion text.
///
/// No automatic retry: a malformed or refused response is a per-case
/// failure the batch layer records and moves past.
pub async fn extract_case(config: &ModelConfig, text: &str) -> Result<ExtractedCase> {
    let truncated = smart_truncate(text, config.max_chars);
    let prompt = build_prompt(&truncated);
    let raw = generate(config, &prompt).await?;
    let value = match parse_model_json(&raw) {
        Some(v) => v,
        None => bail!("model response could not be parsed as JSON"),
    };
    Ok(normalize_extraction(&value))
}

/// Keep the caption-heavy head and the disposition-heavy tail of long
/// opinions: 40% head, 25% tail, and a middle slice for whatever budget
/// remains, marked with a continuation notice.
pub fn smart_truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let total = text.chars().count();
    let header_len = max_chars * 40 / 100;
    let footer_len = max_chars * 25 / 100;
    let middle_len = max_chars.saturating_sub(header_len + footer_len);

    let header: String = text.chars().take(header_len).collect();
    let footer: String = text.chars().skip(total - footer_len).collect();
    let middle_start = total / 2 - middle_len / 2;
    let middle: String = text.chars().skip(middle_start).take(middle_len).collect();

    format!("{}{}{}{}{}", header, SEPARATOR, middle, SEPARATOR, footer)
}

fn build_prompt(text: &str) -> String {
    format!(
        r#"Extract the following fields from this court opinion as JSON:

{{
  "summary": "two to four sentence summary of the case",
  "case_category": "primary area of law (e.g. Criminal Law, Tort Law)",
  "originating_court": {{
    "county": "county of the trial court, if stated",
    "court_name": "name of the trial court",
    "trial_judge": "trial judge's name",
    "source_docket_number": "trial court docket number"
  }},
  "outcome": {{
    "disposition": "affirmed | reversed | remanded | affirmed in part | other",
    "details": "one sentence on what the disposition means here",
    "prevailing_party": "appellant | respondent | neither",
    "winner_personal_role": "plaintiff | defendant | state | other"
  }},
  "parties_parsed": [{{"name": "", "appellate_role": "", "trial_role": "", "party_type": ""}}],
  "judicial_panel": [{{"name": "", "role": "author | concurring | dissenting | panel"}}],
  "legal_representation": [{{"name": "", "firm_name": "", "representing": ""}}],
  "cases_cited": ["full case citations as they appear"],
  "legal_analysis": {{
    "issues": [{{
      "category": "", "subcategory": "", "summary": "", "ruling": "",
      "winner": "", "keywords": "", "related_rcws": [], "confidence": 0.0,
      "appellant_argument": "", "respondent_argument": ""
    }}],
    "key_statutes_cited": ["RCW citations as they appear"]
  }},
  "procedural_dates": {{"opinion_filed_date": "YYYY-MM-DD"}}
}}

OPINION TEXT:
{}"#,
        text
    )
}

async fn generate(config: &ModelConfig, prompt: &str) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": config.model,
        "prompt": prompt,
        "system": SYSTEM_PROMPT,
        "stream": false,
        "options": {
            "temperature": config.temperature,
            "num_predict": config.num_predict,
            "num_ctx": config.num_ctx,
        },
    });

    let response = client
        .post(format!("{}/api/generate", config.base_url.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .context("model request failed")?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("model API error {}: {}", status, body_text);
    }

    let json: Value = response.json().await?;
    json.get("response")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("model API response missing 'response' field"))
}

// ---- Repair cascade ----

static TRAILING_COMMA_OBJ: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*\}").unwrap());
static TRAILING_COMMA_ARR: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*\]").unwrap());

/// Parse model output into a JSON object, repairing common defects.
/// Returns None only when every strategy fails.
pub fn parse_model_json(raw: &str) -> Option<Value> {
    let stripped = strip_fences(raw);
    let start = stripped.find('{')?;
    let tail = &stripped[start..];
    // Bound the candidate at the outermost braces when a close brace exists;
    // a truncated response keeps everything from the first brace onward
    let candidate = match tail.rfind('}') {
        Some(end) => &tail[..=end],
        None => tail,
    };

    // Strategy 1: direct parse
    if let Some(v) = parse_object(candidate) {
        return Some(v);
    }

    // Strategy 2: remove trailing commas
    let no_commas = fix_trailing_commas(candidate);
    if let Some(v) = parse_object(&no_commas) {
        return Some(v);
    }

    // Strategy 3: single quotes to double, then trailing commas again
    let requoted = fix_trailing_commas(&candidate.replace('\'', "\""));
    if let Some(v) = parse_object(&requoted) {
        return Some(v);
    }

    // Strategy 4: per-field regex recovery over everything after the brace
    recover_fields(tail)
}

fn strip_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(Value::is_object)
}

fn fix_trailing_commas(text: &str) -> String {
    let pass = TRAILING_COMMA_OBJ.replace_all(text, "}");
    TRAILING_COMMA_ARR.replace_all(&pass, "]").into_owned()
}

/// Last resort: pull individual fields out of broken JSON with regexes.
/// Produces a partial object; missing fields simply stay absent.
fn recover_fields(text: &str) -> Option<Value> {
    let mut map = serde_json::Map::new();

    for field in [
        "summary",
        "case_type",
        "case_category",
        "county",
        "trial_judge",
        "source_docket_number",
        "appeal_outcome",
        "winner_legal_role",
        "winner_personal_role",
    ] {
        let re = Regex::new(&format!(r#""{}"\s*:\s*"([^"]*)""#, field)).ok()?;
        if let Some(caps) = re.captures(text) {
            map.insert(field.to_string(), Value::String(caps[1].to_string()));
        }
    }

    for key in [
        "parties_parsed",
        "parties",
        "judicial_panel",
        "judges",
        "legal_representation",
        "citations",
        "cases_cited",
        "statutes",
        "issues",
    ] {
        let re = Regex::new(&format!(r#"(?s)"{}"\s*:\s*\[(.*?)\]"#, key)).ok()?;
        if let Some(caps) = re.captures(text) {
            let body = fix_trailing_commas(&format!("[{}]", &caps[1]));
            if let Ok(v @ Value::Array(_)) = serde_json::from_str::<Value>(&body) {
                map.insert(key.to_string(), v);
            }
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

// ---- Schema normalization ----

/// Fold the model's answer (either the nested schema from the prompt or the
/// flat legacy shape) onto [`ExtractedCase`]. The literal string "null" is
/// treated as absent throughout.
pub fn normalize_extraction(value: &Value) -> ExtractedCase {
    let mut case = ExtractedCase {
        summary: get_str(value, &["summary"]),
        ..Default::default()
    };

    // case_category may be pipe-separated; the primary category wins
    case.case_type = get_str(value, &["case_category", "case_type"])
        .map(|c| c.split('|').next().unwrap_or("").trim().to_string())
        .filter(|c| !c.is_empty());

    let originating = value.get("originating_court");
    case.county = originating
        .and_then(|o| get_str(o, &["county"]))
        .or_else(|| get_str(value, &["county"]));
    case.trial_court = originating
        .and_then(|o| get_str(o, &["court_name", "trial_court"]))
        .or_else(|| get_str(value, &["trial_court"]));
    case.trial_judge = originating
        .and_then(|o| get_str(o, &["trial_judge"]))
        .or_else(|| get_str(value, &["trial_judge"]));
    case.source_docket_number = originating
        .and_then(|o| get_str(o, &["source_docket_number"]))
        .or_else(|| get_str(value, &["source_docket_number"]));

    let outcome = value.get("outcome");
    case.appeal_outcome = outcome
        .and_then(|o| get_str(o, &["disposition", "appeal_outcome"]))
        .or_else(|| get_str(value, &["appeal_outcome"]));
    case.outcome_detail = outcome
        .and_then(|o| get_str(o, &["details", "outcome_detail"]))
        .or_else(|| get_str(value, &["outcome_detail"]));
    case.winner_legal_role = outcome
        .and_then(|o| get_str(o, &["prevailing_party", "winner_legal_role"]))
        .or_else(|| get_str(value, &["winner_legal_role"]));
    case.winner_personal_role = outcome
        .and_then(|o| get_str(o, &["winner_personal_role"]))
        .or_else(|| get_str(value, &["winner_personal_role"]));

    case.opinion_filed_date = value
        .get("procedural_dates")
        .and_then(|d| get_str(d, &["opinion_filed_date"]))
        .or_else(|| get_str(value, &["opinion_filed_date"]));

    for item in get_array(value, &["parties_parsed", "parties"]) {
        let name = match get_str(&item, &["name"]) {
            Some(n) => n,
            None => continue,
        };
        case.parties.push(Party {
            name,
            legal_role: get_str(&item, &["appellate_role", "legal_role", "role"]),
            personal_role: get_str(&item, &["trial_role", "personal_role"]),
            party_type: get_str(&item, &["party_type"]),
        });
    }

    for item in get_array(value, &["judicial_panel", "judges"]) {
        let name = match get_str(&item, &["name", "judge_name"]) {
            Some(n) => n,
            None => continue,
        };
        case.judges.push(Judge {
            name,
            role: get_str(&item, &["role"]),
        });
    }

    for item in get_array(value, &["legal_representation", "attorneys"]) {
        let name = match get_str(&item, &["name", "attorney_name"]) {
            Some(n) => n,
            None => continue,
        };
        case.attorneys.push(Attorney {
            name,
            firm_name: get_str(&item, &["firm_name", "firm_or_agency"]),
            representing: get_str(&item, &["representing"]),
        });
    }

    for item in get_array(value, &["cases_cited", "citations"]) {
        let target = match &item {
            Value::String(s) => non_null(s),
            other => get_str(other, &["citation", "case"]),
        };
        if let Some(target) = target {
            let relationship = get_str(&item, &["relationship"]).unwrap_or_else(|| "cited".to_string());
            case.citations.push(Citation {
                target,
                relationship,
            });
        }
    }

    let analysis = value.get("legal_analysis");
    let statute_items: Vec<Value> = analysis
        .map(|a| get_array(a, &["key_statutes_cited", "statutes"]))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| get_array(value, &["statutes"]));
    for item in statute_items {
        let raw = match &item {
            Value::String(s) => non_null(s),
            other => get_str(other, &["citation"]),
        };
        if let Some(raw_text) = raw {
            case.statutes.push(StatuteRef { raw_text });
        }
    }

    let issue_items: Vec<Value> = analysis
        .map(|a| {
            let issues = get_array(a, &["issues"]);
            if issues.is_empty() {
                get_array(a, &["major_issues"])
            } else {
                issues
            }
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| get_array(value, &["issues"]));
    for item in issue_items {
        case.issues.push(normalize_issue(&item));
    }

    case
}

fn normalize_issue(item: &Value) -> Issue {
    let rcw_references = get_array(item, &["related_rcws", "rcw_references"])
        .into_iter()
        .filter_map(|v| v.as_str().and_then(non_null))
        .collect();
    Issue {
        category: get_str(item, &["category"]).unwrap_or_else(|| "General".to_string()),
        subcategory: get_str(item, &["subcategory"]).unwrap_or_else(|| "General".to_string()),
        issue_summary: get_str(item, &["summary", "question"]),
        decision_summary: get_str(item, &["ruling", "decision_summary"]),
        appeal_outcome: get_str(item, &["outcome", "appeal_outcome"]),
        winner_legal_role: get_str(item, &["winner", "winner_legal_role"]),
        winner_personal_role: get_str(item, &["winner_personal_role"]),
        keywords: get_str(item, &["keywords"]),
        rcw_references,
        decision_stage: get_str(item, &["decision_stage"]).unwrap_or_else(|| "appeal".to_string()),
        confidence_score: item
            .get("confidence")
            .or_else(|| item.get("confidence_score"))
            .and_then(parse_confidence),
        appellant_argument: get_str(item, &["appellant_argument"]),
        respondent_argument: get_str(item, &["respondent_argument"]),
    }
}

fn parse_confidence(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn get_str(value: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = value.get(key).and_then(Value::as_str) {
            if let Some(s) = non_null(s) {
                return Some(s);
            }
        }
    }
    None
}

fn non_null(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn get_array(value: &Value, keys: &[&str]) -> Vec<Value> {
    for key in keys {
        if let Some(arr) = value.get(key).and_then(Value::as_array) {
            return arr.clone();
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_keeps_head_and_tail() {
        let text: String = (0..1000).map(|i| format!("w{} ", i)).collect();
        let out = smart_truncate(&text, 1000);
        assert!(out.starts_with("w0 "));
        assert!(out.trim_end().ends_with("w999"));
        assert!(out.contains("[...document continues...]"));
        assert!(out.chars().count() < text.chars().count());
    }

    #[test]
    fn short_text_is_untouched() {
        let text = "short opinion text";
        assert_eq!(smart_truncate(text, 25_000), text);
    }

    #[test]
    fn direct_parse_with_fences() {
        let raw = "```json\n{\"summary\": \"Affirmed.\"}\n```";
        let v = parse_model_json(raw).unwrap();
        assert_eq!(v["summary"], "Affirmed.");
    }

    #[test]
    fn trailing_commas_are_repaired() {
        let raw = r#"{"summary": "Reversed.", "parties_parsed": [{"name": "Smith",},],}"#;
        let v = parse_model_json(raw).unwrap();
        assert_eq!(v["summary"], "Reversed.");
        assert_eq!(v["parties_parsed"][0]["name"], "Smith");
    }

    #[test]
    fn single_quotes_are_normalized() {
        let raw = "{'summary': 'Remanded for resentencing.'}";
        let v = parse_model_json(raw).unwrap();
        assert_eq!(v["summary"], "Remanded for resentencing.");
    }

    #[test]
    fn truncated_response_recovers_parsed_fields() {
        // No closing brace: strategies 1-3 fail, field recovery salvages
        // the summary and the one complete party
        let raw = r#"{"summary": "Affirmed on all grounds", "parties_parsed": [{"name": "Jones", "appellate_role": "Appellant"}], "judicial_panel": [{"name": "Fear"#;
        let v = parse_model_json(raw).unwrap();
        assert_eq!(v["summary"], "Affirmed on all grounds");
        assert_eq!(v["parties_parsed"][0]["name"], "Jones");
        assert!(v.get("judicial_panel").is_none());
    }

    #[test]
    fn garbage_yields_none() {
        assert!(parse_model_json("I cannot extract this document.").is_none());
    }

    #[test]
    fn nested_and_flat_schemas_normalize_identically() {
        let nested = serde_json::json!({
            "summary": "Affirmed.",
            "case_category": "Criminal Law | Sentencing",
            "originating_court": {"county": "King", "trial_judge": "Doe"},
            "outcome": {"disposition": "affirmed", "prevailing_party": "respondent"},
        });
        let flat = serde_json::json!({
            "summary": "Affirmed.",
            "case_type": "Criminal Law",
            "county": "King",
            "trial_judge": "Doe",
            "appeal_outcome": "affirmed",
            "winner_legal_role": "respondent",
        });
        let a = normalize_extraction(&nested);
        let b = normalize_extraction(&flat);
        assert_eq!(a.case_type.as_deref(), Some("Criminal Law"));
        assert_eq!(a.case_type, b.case_type);
        assert_eq!(a.county, b.county);
        assert_eq!(a.trial_judge, b.trial_judge);
        assert_eq!(a.appeal_outcome, b.appeal_outcome);
        assert_eq!(a.winner_legal_role, b.winner_legal_role);
    }

    #[test]
    fn null_strings_become_absent() {
        let v = serde_json::json!({"summary": "null", "county": "  "});
        let case = normalize_extraction(&v);
        assert!(case.summary.is_none());
        assert!(case.county.is_none());
    }

    #[test]
    fn issue_defaults_fill_in() {
        let v = serde_json::json!({
            "legal_analysis": {"issues": [{"summary": "Was the search lawful?", "confidence": "0.9"}]}
        });
        let case = normalize_extraction(&v);
        assert_eq!(case.issues.len(), 1);
        let issue = &case.issues[0];
        assert_eq!(issue.category, "General");
        assert_eq!(issue.decision_stage, "appeal");
        assert_eq!(issue.confidence_score, Some(0.9));
    }
}
