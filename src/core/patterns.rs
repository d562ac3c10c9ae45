//! Named, reusable text matchers.
//!
//! Intent classification over agent free text (completion, advance/delegate,
//! setup-bypass) and test-output classification across common runners. All
//! phrase tables live here so business logic never embeds literal patterns.

use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

/// A named set of patterns over a string, case-insensitive by default.
/// Individual patterns opt back into case sensitivity with `(?-i)`.
pub struct PhraseSet {
    pub name: &'static str,
    patterns: Vec<Regex>,
}

impl PhraseSet {
    fn new(name: &'static str, phrases: &[&str]) -> Self {
        let patterns = phrases
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .unwrap()
            })
            .collect();
        Self { name, patterns }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }
}

/// Phrases signalling the agent believes the phase is done.
pub static COMPLETION_INTENT: LazyLock<PhraseSet> = LazyLock::new(|| {
    PhraseSet::new(
        "completion_intent",
        &[
            r"phase\s+(is\s+)?complete",
            r"ready\s+for\s+(the\s+)?gate",
            r"submit(ting)?\s+for\s+review",
            r"all\s+requirements\s+(are\s+)?met",
            r"work\s+(is\s+)?finished",
            r"done\s+with\s+(this|the)\s+phase",
        ],
    )
});

/// Phrases signalling an attempt to advance the workflow or hand off.
pub static ADVANCE_INTENT: LazyLock<PhraseSet> = LazyLock::new(|| {
    PhraseSet::new(
        "advance_intent",
        &[
            r"\badvance\b",
            r"\bgate\b",
            r"\bdelegate\b",
            r"hand\s*-?\s*off",
            r"next\s+phase",
            r"move\s+(on\s+)?to\s+(the\s+)?next",
            r"proceed\s+to\s+\w+",
        ],
    )
});

/// Setup/inspection phrases that suppress intent classification entirely.
pub static SETUP_BYPASS: LazyLock<PhraseSet> = LazyLock::new(|| {
    PhraseSet::new(
        "setup_bypass",
        &[
            r"\bdiscover\b",
            r"\binit\b",
            r"\bconfigure\b",
            r"\bconfiguration\b",
            r"\bstatus\b",
            r"\bsetup\b",
            r"\binspect\b",
        ],
    )
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Completion,
    Advance,
    None,
}

/// Classify free text. Bypass phrases are checked first and short-circuit
/// all other classification for that text.
pub fn classify_intent(text: &str) -> Intent {
    if SETUP_BYPASS.matches(text) {
        return Intent::None;
    }
    if ADVANCE_INTENT.matches(text) {
        return Intent::Advance;
    }
    if COMPLETION_INTENT.matches(text) {
        return Intent::Completion;
    }
    Intent::None
}

/// Commands that execute a test run.
static TEST_COMMAND: LazyLock<PhraseSet> = LazyLock::new(|| {
    PhraseSet::new(
        "test_command",
        &[
            r"\bcargo\s+(test|nextest)\b",
            r"\bpytest\b",
            r"\bpython\d?\s+-m\s+pytest\b",
            r"\bnpm\s+(run\s+)?test\b",
            r"\bpnpm\s+(run\s+)?test\b",
            r"\byarn\s+(run\s+)?test\b",
            r"\bjest\b",
            r"\bvitest\b",
            r"\bgo\s+test\b",
            r"\bmvn\s+(verify|test)\b",
            r"\bgradle(w)?\s+test\b",
            r"\bmake\s+test\b",
        ],
    )
});

pub fn is_test_command(command: &str) -> bool {
    TEST_COMMAND.matches(command)
}

/// Success markers across common test runners.
static TEST_SUCCESS: LazyLock<PhraseSet> = LazyLock::new(|| {
    PhraseSet::new(
        "test_success",
        &[
            r"test result:\s*ok",
            r"\d+\s+passed",
            r"all\s+tests\s+passed",
            r"^ok\b",
            r"\bPASS\b",
            r"✓",
        ],
    )
});

/// Failure markers across common test runners. The bare FAILED/FAIL
/// markers opt out of the set's case-insensitive default: lowercase
/// "failed" appears in cargo's success summary (`... 0 failed`), so only
/// the runners' uppercase verdict words count as a failure signal.
static TEST_FAILURE: LazyLock<PhraseSet> = LazyLock::new(|| {
    PhraseSet::new(
        "test_failure",
        &[
            r"test result:\s*FAILED",
            r"[1-9]\d*\s+failed",
            r"(?-i)\bFAILED\b",
            r"(?-i)\bFAIL\b",
            r"assertion\s+failed",
            r"\bpanicked\s+at\b",
            r"\berror\[E\d+\]",
            r"Traceback \(most recent call last\)",
            r"✗",
            r"✖",
        ],
    )
});

/// Skip markers (informational; never count as pass or fail on their own).
static TEST_SKIP: LazyLock<PhraseSet> = LazyLock::new(|| {
    PhraseSet::new(
        "test_skip",
        &[r"\d+\s+skipped", r"\bignored\b", r"\bSKIP(PED)?\b"],
    )
});

pub fn has_success_signal(output: &str) -> bool {
    TEST_SUCCESS.matches(output)
}

pub fn has_failure_signal(output: &str) -> bool {
    TEST_FAILURE.matches(output)
}

pub fn has_skip_signal(output: &str) -> bool {
    TEST_SKIP.matches(output)
}
