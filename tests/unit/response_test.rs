//! Unit tests for analyzer response parsing

use std::time::Duration;

use memtriage::analysis::{parse_assessment, parse_rate_limit_hint, AnalyzerError, Severity};

#[test]
fn assessment_inside_prose_and_code_fence() {
    let response = r#"Here is my assessment of the process listing.

```json
{
  "threat_score": 8.5,
  "confidence": 0.75,
  "findings": [
    {
      "category": "injection",
      "description": "Executable private memory in svchost.exe",
      "severity": "critical",
      "evidence_text": "VadS PAGE_EXECUTE_READWRITE"
    }
  ],
  "indicators": ["185.220.101.4"],
  "recommended_actions": ["Dump the VAD region"],
  "executive_summary": "Likely process injection."
}
```

Let me know if you need anything else."#;

    let assessment = parse_assessment(response).unwrap();
    assert_eq!(assessment.threat_score, 8.5);
    assert_eq!(assessment.findings.len(), 1);
    assert_eq!(assessment.findings[0].severity, Severity::Critical);
    assert_eq!(assessment.findings[0].score, 0.0);
    assert!(assessment.indicators.contains("185.220.101.4"));
    assert_eq!(assessment.raw["executive_summary"], "Likely process injection.");
}

#[test]
fn refusal_is_invalid_response() {
    let err = parse_assessment("I cannot analyze this content.").unwrap_err();
    assert!(matches!(err, AnalyzerError::InvalidResponse { .. }));
}

#[test]
fn missing_required_scores_is_json_error() {
    let err = parse_assessment(r#"{"findings": []}"#).unwrap_err();
    assert!(matches!(err, AnalyzerError::JsonParse(_)));
}

#[test]
fn rate_limit_hint_in_minutes() {
    let info = parse_rate_limit_hint("Quota exceeded for model. Retry in 2 min.").unwrap();
    assert_eq!(info.retry_after, Some(Duration::from_secs(120)));
    assert_eq!(info.message, "Quota exceeded for model. Retry in 2 min.");
}

#[test]
fn rate_limit_hint_from_status_code() {
    let info = parse_rate_limit_hint("HTTP 429 Too Many Requests\nretry-after: 7").unwrap();
    assert_eq!(info.message, "HTTP 429 Too Many Requests");
    assert_eq!(info.retry_after, Some(Duration::from_secs(7)));
}

#[test]
fn ordinary_errors_are_not_rate_limits() {
    assert!(parse_rate_limit_hint("invalid api key").is_none());
}
