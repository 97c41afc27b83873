use std::sync::OnceLock;

use regex::Regex;

use super::event::CapturedEvent;
use super::probe::ObservedResponse;

const NO_CONTENT_PREFIX: &str = "No content found";
const IGNORED_WHEN_MISSING: &[&str] = &["X-Powered-By"];

fn whitespace_between_tags() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r">\s+<").expect("valid regex"))
}

fn url_scheme() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^https?://").expect("valid regex"))
}

pub fn normalise_html(body: &str) -> String {
    whitespace_between_tags()
        .replace_all(body.trim(), "><")
        .into_owned()
}

fn normalise_header_value(value: &str) -> String {
    url_scheme()
        .replace(value.trim(), "http://")
        .trim()
        .to_string()
}

fn bodies_match(expected: &str, actual: &str) -> bool {
    expected == actual
        || (actual.starts_with(NO_CONTENT_PREFIX) && expected.is_empty())
        || (actual.is_empty() && expected.starts_with(NO_CONTENT_PREFIX))
}

/// Every difference between the recorded and the observed response; empty means a pass.
pub fn compare_response(event: &CapturedEvent, observed: &ObservedResponse) -> Vec<String> {
    let mut problems = Vec::new();

    if observed.status != event.expected_status {
        problems.push(format!(
            "expected response {} got {}",
            event.expected_status, observed.status
        ));
    }

    let html = observed
        .header("Content-Type")
        .is_some_and(|content_type| content_type.starts_with("text/html"));
    let (expected_body, actual_body) = if html {
        (
            normalise_html(&event.expected_body),
            normalise_html(&observed.body),
        )
    } else {
        (
            event.expected_body.trim().to_string(),
            observed.body.trim().to_string(),
        )
    };
    if !bodies_match(&expected_body, &actual_body) {
        problems.push(format!(
            "expected body '{expected_body}' got '{actual_body}'"
        ));
    }

    for (name, expected) in &event.expected_headers {
        let name = if name == "Content-type" {
            "Content-Type"
        } else {
            name.as_str()
        };
        match observed.header(name) {
            Some(actual) => {
                let expected = if expected == "text/plain" {
                    "text/plain;charset=UTF-8"
                } else {
                    expected.as_str()
                };
                let expected = normalise_header_value(expected);
                let actual = normalise_header_value(actual);
                if actual != expected {
                    problems.push(format!(
                        "header {name} got value {actual} expected {expected}"
                    ));
                }
            }
            None if IGNORED_WHEN_MISSING
                .iter()
                .any(|ignored| ignored.eq_ignore_ascii_case(name)) => {}
            None => problems.push(format!("response was missing header {name}")),
        }
    }

    problems
}
