//! Lenient JSON extraction from free-form model output.
//!
//! Model responses arrive as text that is *supposed* to be JSON but is often
//! wrapped in markdown fences, followed by prose, or cut off mid-object. The
//! sanitizer finds the first complete top-level JSON value in that text and
//! parses it. It never fails: when nothing usable is found the caller's
//! fallback is returned, tagged so the caller can tell the two cases apart.
//!
//! ## Algorithm
//!
//! 1. Strip ```` ```json ```` and ```` ``` ```` fences.
//! 2. If the trimmed text starts with `[`, slice to the `]` that closes the first
//!    top-level array.
//! 3. Otherwise slice from the first `{` to its matching `}`.
//! 4. Parse the slice.
//! 5. On any failure log a warning with a preview of the original text and
//!    return the fallback.
//!
//! Bracket matching tracks depth and skips over JSON string literals, so a `}`
//! inside `"..."` does not close the object early.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use tracing::{error, warn};

/// Maximum number of characters of the raw response included in log lines.
const PREVIEW_CHARS: usize = 200;

/// Why the sanitizer had to fall back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeFailure {
    /// Nothing but whitespace (or fences) in the response.
    Empty,
    /// No `[` at the start and no `{` anywhere.
    NoJson,
    /// An opening bracket was found but never closed (truncated output).
    Unterminated,
    /// A bracketed span was found but did not parse into the expected shape.
    Malformed,
}

impl SanitizeFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            SanitizeFailure::Empty => "empty",
            SanitizeFailure::NoJson => "no_json",
            SanitizeFailure::Unterminated => "unterminated",
            SanitizeFailure::Malformed => "malformed",
        }
    }
}

impl core::fmt::Display for SanitizeFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`sanitize`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sanitized<T> {
    /// The response contained a JSON value of the expected shape.
    Parsed(T),
    /// The response was unusable; `value` is the caller's fallback.
    Fallback { value: T, reason: SanitizeFailure },
}

impl<T> Sanitized<T> {
    /// The parsed value, or the fallback.
    pub fn into_inner(self) -> T {
        match self {
            Sanitized::Parsed(v) => v,
            Sanitized::Fallback { value, .. } => value,
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Sanitized::Parsed(v) => v,
            Sanitized::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Sanitized::Fallback { .. })
    }

    pub fn failure(&self) -> Option<SanitizeFailure> {
        match self {
            Sanitized::Parsed(_) => None,
            Sanitized::Fallback { reason, .. } => Some(*reason),
        }
    }
}

/// Extract a JSON value of type `T` from raw model output.
///
/// Never panics and never returns an error; see the module docs.
pub fn sanitize<T: DeserializeOwned>(raw: &str, fallback: T) -> Sanitized<T> {
    let unfenced = strip_fences(raw);

    let parsed = extract_json_span(&unfenced).and_then(|span| {
        serde_json::from_str::<T>(span).map_err(|e| {
            warn!(error = %e, "extracted JSON span did not match the expected shape");
            SanitizeFailure::Malformed
        })
    });

    match parsed {
        Ok(value) => Sanitized::Parsed(value),
        Err(reason) => {
            warn!(
                reason = %reason,
                preview = %preview(raw),
                "AI response was not usable JSON; using fallback"
            );
            Sanitized::Fallback {
                value: fallback,
                reason,
            }
        }
    }
}

/// Remove markdown code fences (```` ```json ```` in any case, and bare ```` ``` ````).
pub fn strip_fences(raw: &str) -> String {
    let mut pieces = raw.split("```");
    let mut out = pieces.next().unwrap_or_default().to_string();
    for piece in pieces {
        let tagged = piece.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json"));
        out.push_str(if tagged { &piece[4..] } else { piece });
    }
    out
}

/// Locate the first complete top-level JSON array or object in `text`.
///
/// Returns the slice covering it, or why none could be found.
pub fn extract_json_span(text: &str) -> Result<&str, SanitizeFailure> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SanitizeFailure::Empty);
    }

    let (start, open, close) = if trimmed.starts_with('[') {
        (0, b'[', b']')
    } else {
        match trimmed.find('{') {
            Some(idx) => (idx, b'{', b'}'),
            None => return Err(SanitizeFailure::NoJson),
        }
    };

    let bytes = trimmed.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                // `open`/`close` are ASCII, so `idx + 1` is a char boundary.
                return Ok(&trimmed[start..=idx]);
            }
        }
    }

    Err(SanitizeFailure::Unterminated)
}

fn preview(raw: &str) -> String {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// Counts sanitizer fallbacks and escalates runs of them.
///
/// A single unparseable response is routine. Several in a row usually means
/// the model, prompt or provider changed underneath us, so every
/// `escalate_after` consecutive fallbacks an `error!` is emitted.
#[derive(Debug)]
pub struct FallbackMonitor {
    consecutive: AtomicU32,
    total: AtomicU64,
    escalate_after: u32,
}

impl Default for FallbackMonitor {
    fn default() -> Self {
        Self::new(3)
    }
}

impl FallbackMonitor {
    pub fn new(escalate_after: u32) -> Self {
        Self {
            consecutive: AtomicU32::new(0),
            total: AtomicU64::new(0),
            escalate_after: escalate_after.max(1),
        }
    }

    /// Record one sanitizer outcome for `source` (usually a job type name).
    pub fn observe<T>(&self, source: &'static str, outcome: &Sanitized<T>) {
        match outcome.failure() {
            None => {
                self.consecutive.store(0, Ordering::Relaxed);
            }
            Some(reason) => {
                self.total.fetch_add(1, Ordering::Relaxed);
                let run = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
                if run % self.escalate_after == 0 {
                    error!(
                        source,
                        consecutive = run,
                        reason = %reason,
                        "AI responses are repeatedly unparseable"
                    );
                }
            }
        }
    }

    /// Total fallbacks observed since startup.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Length of the current run of consecutive fallbacks.
    pub fn consecutive(&self) -> u32 {
        self.consecutive.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    #[test]
    fn strips_json_fence() {
        let out = sanitize::<Value>("```json\n{\"score\":80}\n```", json!({}));
        assert_eq!(out, Sanitized::Parsed(json!({"score": 80})));
    }

    #[test]
    fn fence_tag_is_stripped_in_any_case() {
        assert_eq!(strip_fences("```JSON\n[1, 2]\n```"), "\n[1, 2]\n");
        assert_eq!(strip_fences("```Json\n{}\n```"), "\n{}\n");

        let out = sanitize::<Value>("```JSON\n[\"a\", \"b\"]\n```", json!([]));
        assert_eq!(out, Sanitized::Parsed(json!(["a", "b"])));
    }

    #[test]
    fn truncated_object_falls_back() {
        let out = sanitize::<Value>("{\"score\":80, \"anal", json!({}));
        assert_eq!(
            out,
            Sanitized::Fallback {
                value: json!({}),
                reason: SanitizeFailure::Unterminated,
            }
        );
    }

    #[test]
    fn drops_trailing_prose_after_array() {
        let out = sanitize::<Value>("[{\"a\":1},{\"b\":[2]}] Let me know if you need more!", json!([]));
        assert_eq!(out.into_inner(), json!([{"a": 1}, {"b": [2]}]));
    }

    #[test]
    fn finds_object_after_leading_prose() {
        let raw = "Sure! Here is the analysis:\n{\"score\": 72, \"summary\": \"ok\"}\nThanks.";
        let out = sanitize::<Value>(raw, Value::Null);
        assert_eq!(out.into_inner(), json!({"score": 72, "summary": "ok"}));
    }

    #[test]
    fn braces_inside_strings_do_not_close_early() {
        let raw = r#"{"note": "use } and { freely", "quote": "she said \"}\"", "n": 1} trailing"#;
        let out = sanitize::<Value>(raw, Value::Null);
        assert_eq!(
            out.into_inner(),
            json!({"note": "use } and { freely", "quote": "she said \"}\"", "n": 1})
        );
    }

    #[test]
    fn empty_and_bracketless_text_fall_back() {
        assert_eq!(
            sanitize::<Value>("   ", json!(1)).failure(),
            Some(SanitizeFailure::Empty)
        );
        assert_eq!(
            sanitize::<Value>("```json\n```", json!(1)).failure(),
            Some(SanitizeFailure::Empty)
        );
        assert_eq!(
            sanitize::<Value>("I cannot help with that.", json!(1)).failure(),
            Some(SanitizeFailure::NoJson)
        );
    }

    #[test]
    fn shape_mismatch_is_malformed() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct Score {
            score: f64,
        }

        let out = sanitize::<Option<Score>>("{\"grade\": \"B\"}", None);
        assert_eq!(out.failure(), Some(SanitizeFailure::Malformed));
        assert_eq!(out.into_inner(), None);
    }

    #[test]
    fn object_preferred_when_text_does_not_start_with_bracket() {
        // The leading prose means the array branch is not taken.
        let out = sanitize::<Value>("ideas: [1, 2] and {\"k\": true}", Value::Null);
        assert_eq!(out.into_inner(), json!({"k": true}));
    }

    #[test]
    fn preview_is_bounded() {
        let long = "x".repeat(PREVIEW_CHARS * 2);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 1);
        assert!(p.ends_with('…'));
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn monitor_tracks_runs_and_resets() {
        let monitor = FallbackMonitor::new(2);
        let bad: Sanitized<Value> = Sanitized::Fallback {
            value: Value::Null,
            reason: SanitizeFailure::Malformed,
        };
        let good: Sanitized<Value> = Sanitized::Parsed(Value::Null);

        monitor.observe("test", &bad);
        monitor.observe("test", &bad);
        assert_eq!(monitor.consecutive(), 2);
        monitor.observe("test", &good);
        assert_eq!(monitor.consecutive(), 0);
        assert_eq!(monitor.total(), 2);
    }

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z{}\\[\\]\"\\\\ ]{0,12}".prop_map(Value::from),
        ]
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        arb_leaf().prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::from),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn arb_container() -> impl Strategy<Value = Value> {
        prop_oneof![
            prop::collection::vec(arb_json(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,6}", arb_json(), 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    }

    proptest! {
        #[test]
        fn clean_json_is_returned_unchanged(value in arb_container()) {
            let text = serde_json::to_string(&value).unwrap();
            let once = sanitize::<Value>(&text, Value::Null);
            prop_assert_eq!(&once, &Sanitized::Parsed(value.clone()));

            let again = sanitize::<Value>(&serde_json::to_string(once.value()).unwrap(), Value::Null);
            prop_assert_eq!(again.into_inner(), value);
        }

        #[test]
        fn never_panics_on_arbitrary_text(text in ".{0,200}") {
            let _ = sanitize::<Value>(&text, Value::Null);
        }
    }
}
