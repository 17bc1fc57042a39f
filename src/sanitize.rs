//! Content sanitization: platform token stripping, script neutralization,
//! PII redaction, and lightweight markdown-to-HTML conversion.
//!
//! The passes run in a fixed order, each over the output of the previous.
//! The converter is a best-effort filter, not a full HTML allowlist
//! sanitizer; output is trusted only inside a wrapping CSP. Running the
//! sanitizer over its own output yields the same HTML, which is what lets
//! live edits reuse the same path as the batch sync.

use regex::Regex;
use std::sync::LazyLock;

/// Result of sanitizing one block of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub html: String,
    pub redacted_pii: bool,
    pub had_script: bool,
    /// Raw mention tokens that were replaced with placeholders.
    pub removed_mentions: Vec<String>,
    /// Raw custom-emoji tokens that were replaced with placeholders.
    pub removed_emoji: Vec<String>,
}

static USER_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@!?\d{17,19}>").expect("hardcoded regex"));
static CHANNEL_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<#\d{17,19}>").expect("hardcoded regex"));
static ROLE_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@&\d{17,19}>").expect("hardcoded regex"));
static CUSTOM_EMOJI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<a?:\w+:\d{17,19}>").expect("hardcoded regex"));
static TIMESTAMP_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<t:\d{1,13}(?::[tTdDfFR])?>").expect("hardcoded regex"));

static SCRIPT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("hardcoded regex"));
static JS_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript:").expect("hardcoded regex"));
static EVENT_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i) on\w+=").expect("hardcoded regex"));

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("hardcoded regex")
});
static CARD_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{4}[ -]?){3}\d{4}\b").expect("hardcoded regex"));
static SSN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("hardcoded regex"));
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\+?1[-. ]?)?(?:\(\d{3}\)[-. ]?|\d{3}[-. ]?)\d{3}[-. ]?\d{4}\b")
        .expect("hardcoded regex")
});

// Code regions are lifted out before the inline passes so markdown inside
// them survives untouched. The alternation also recognizes already-rendered
// `<pre><code>`/`<code>` spans, which keeps a second sanitization pass from
// reformatting its own output.
static CODE_REGIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)```(?:[A-Za-z0-9_+\-]*\n)?(.*?)```|<pre><code>.*?</code></pre>|<code>[^<]*</code>|`([^`\n]+)`",
    )
    .expect("hardcoded regex")
});

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\*\*(.+?)\*\*").expect("hardcoded regex"));
static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*").expect("hardcoded regex"));
static STRIKETHROUGH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)~~(.+?)~~").expect("hardcoded regex"));
// Anchored on start-of-text or whitespace: URLs already emitted into an
// `href="…"` attribute or anchor text are preceded by `"` or `>` and are
// never matched again.
static BARE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|\s)(https?://[^\s<>"\x{E000}]+)"#).expect("hardcoded regex")
});

/// Placeholder delimiter for lifted code regions. Private-use, so the
/// inline passes cannot manufacture or destroy one.
const SHIELD: char = '\u{E000}';

/// Run the full sanitization pipeline over raw source text.
pub fn sanitize(input: &str) -> Sanitized {
    let mut removed_mentions = Vec::new();
    let mut removed_emoji = Vec::new();

    let text = input.replace("\r\n", "\n");

    // Pass 1: platform mention tokens.
    let text = collect_and_replace(&USER_MENTION, &text, "[User Mention]", &mut removed_mentions);
    let text = collect_and_replace(
        &CHANNEL_MENTION,
        &text,
        "[Channel Mention]",
        &mut removed_mentions,
    );
    let text = collect_and_replace(&ROLE_MENTION, &text, "[Role Mention]", &mut removed_mentions);

    // Pass 2: custom emoji tokens.
    let text = collect_and_replace(&CUSTOM_EMOJI, &text, "[Emoji]", &mut removed_emoji);

    // Pass 3: timestamp tokens.
    let text = TIMESTAMP_TOKEN.replace_all(&text, "[Timestamp]").into_owned();

    // Pass 4: neutralize scripting vectors.
    let had_script =
        SCRIPT_TAG.is_match(&text) || JS_SCHEME.is_match(&text) || EVENT_ATTR.is_match(&text);
    let text = SCRIPT_TAG.replace_all(&text, "");
    let text = JS_SCHEME.replace_all(&text, "javascript-removed:");
    let text = EVENT_ATTR.replace_all(&text, " data-removed-event=").into_owned();

    // Pass 5: PII redaction.
    let (text, redacted_pii) = redact_pii(&text);

    // Pass 6: markdown to HTML.
    let html = markdown_to_html(&text);

    Sanitized {
        html,
        redacted_pii,
        had_script,
        removed_mentions,
        removed_emoji,
    }
}

fn collect_and_replace(
    pattern: &Regex,
    text: &str,
    placeholder: &str,
    removed: &mut Vec<String>,
) -> String {
    pattern
        .replace_all(text, |caps: &regex::Captures| {
            removed.push(caps[0].to_string());
            placeholder.to_string()
        })
        .into_owned()
}

fn redact_pii(text: &str) -> (String, bool) {
    let mut redacted = false;
    let mut out = text.to_string();

    for (pattern, replacement) in [
        (&*EMAIL, "[Email Redacted]"),
        (&*CARD_NUMBER, "[Card Number Redacted]"),
        (&*SSN, "[SSN Redacted]"),
        (&*PHONE, "[Phone Redacted]"),
    ] {
        if pattern.is_match(&out) {
            redacted = true;
            out = pattern.replace_all(&out, replacement).into_owned();
        }
    }

    (out, redacted)
}

fn markdown_to_html(text: &str) -> String {
    // A literal shield char in the input would corrupt region restoration.
    let text = text.replace(SHIELD, "");

    let mut regions: Vec<String> = Vec::new();
    let text = CODE_REGIONS
        .replace_all(&text, |caps: &regex::Captures| {
            let html = if let Some(block) = caps.get(1) {
                format!("<pre><code>{}</code></pre>", block.as_str())
            } else if let Some(inline) = caps.get(2) {
                format!("<code>{}</code>", inline.as_str())
            } else {
                caps[0].to_string()
            };
            regions.push(html);
            format!("{SHIELD}{}{SHIELD}", regions.len() - 1)
        })
        .into_owned();

    let text = BOLD.replace_all(&text, "<strong>$1</strong>");
    let text = ITALIC.replace_all(&text, "<em>$1</em>");
    let text = STRIKETHROUGH.replace_all(&text, "<del>$1</del>");
    let text = BARE_URL.replace_all(&text, |caps: &regex::Captures| {
        format!(
            "{}<a href=\"{url}\" rel=\"noopener noreferrer\" target=\"_blank\">{url}</a>",
            &caps[1],
            url = &caps[2],
        )
    });
    let mut html = text.replace('\n', "<br>");

    for (index, region) in regions.iter().enumerate() {
        html = html.replace(&format!("{SHIELD}{index}{SHIELD}"), region);
    }

    html
}
