//! Pure text-pattern classification of prompts.
//!
//! Decides whether the primary engine answers alone or the consensus
//! dialogue (and possibly agents) must run. No LLM call is involved —
//! classification is regex matching plus a length heuristic.

use once_cell::sync::Lazy;
use regex::RegexSet;

/// How a prompt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptClass {
    /// Canned identity answer, no engine call.
    Identity,
    /// Primary engine answers alone.
    Direct,
    /// Non-trivial: run the consensus dialogue.
    Work,
}

fn set(patterns: &[&str]) -> RegexSet {
    RegexSet::new(patterns.iter().map(|p| format!("(?i){p}"))).expect("static patterns compile")
}

/// Conversational patterns the primary engine handles alone.
static DIRECT_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    set(&[
        // greetings
        r"^hi$",
        r"^hello$",
        r"^hey$",
        r"^hi!$",
        r"^hello!$",
        r"^hey!$",
        r"^good morning",
        r"^good afternoon",
        r"^good evening",
        r"^howdy",
        r"^yo$",
        r"^sup$",
        r"^greetings",
        // farewells
        r"^bye$",
        r"^goodbye$",
        r"^see you",
        r"^later$",
        r"^cya$",
        r"^goodnight",
        r"^night$",
        // acknowledgments
        r"^ok$",
        r"^okay$",
        r"^sure$",
        r"^yes$",
        r"^no$",
        r"^yep$",
        r"^nope$",
        r"^thanks",
        r"^thank you",
        r"^thx$",
        r"^ty$",
        r"^got it",
        r"^understood",
        r"^i see",
        r"^makes sense",
        r"^cool$",
        r"^nice$",
        r"^great$",
        r"^awesome$",
        r"^perfect$",
        // meta
        r"^help$",
        r"^help me$",
        r"what commands",
        r"how to use",
        r"^status$",
        r"^version$",
        // simple questions
        r"^what time",
        r"^what date",
        r"^what day",
        r"^how are you",
        r"^how's it going",
        r"how are things",
        // conversation
        r"^really\??$",
        r"^interesting",
        r"^i think",
        r"^i believe",
        r"^that's",
        r"^what do you think",
        r"^do you think",
        r"^can you explain",
        r"^what does .* mean",
    ])
});

/// Identity questions get a canned answer.
static IDENTITY_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    set(&[
        r"who are you",
        r"what are you",
        r"tell me about yourself",
        r"what is hivemind",
        r"what's hivemind",
        r"what can you do",
        r"how do you work",
        r"introduce yourself",
    ])
});

/// Work categories that force the consensus dialogue.
static WORK_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    set(&[
        // work requests
        r"build",
        r"create",
        r"implement",
        r"develop",
        r"make me",
        r"write .* code",
        r"write .* script",
        r"write .* program",
        r"design",
        r"architect",
        r"structure",
        // code tasks
        r"fix .* bug",
        r"debug",
        r"refactor",
        r"optimize",
        r"add .* feature",
        r"update .* code",
        r"modify .* function",
        r"review .* code",
        r"code review",
        // security tasks
        r"pentest",
        r"penetration test",
        r"security audit",
        r"vulnerability",
        r"exploit",
        r"security scan",
        r"threat model",
        r"security review",
        // infrastructure tasks
        r"deploy",
        r"configure",
        r"set up .* server",
        r"kubernetes",
        r"docker",
        r"terraform",
        r"ansible",
        r"ci.?cd",
        r"pipeline",
        // qa tasks
        r"test",
        r"write .* tests",
        r"test coverage",
        r"performance test",
        r"load test",
        r"stress test",
        r"quality assurance",
        // analysis tasks
        r"analyze",
        r"review",
        r"assess",
        r"evaluate",
        r"audit",
        r"investigate",
        r"examine",
    ])
});

const SIMPLE_QUESTION_STARTERS: &[&str] = &[
    "what is",
    "what's",
    "who is",
    "who's",
    "when is",
    "when's",
    "where is",
    "where's",
    "why is",
    "why's",
    "how is",
    "how's",
    "can you explain",
    "could you tell me",
];

const WORK_INDICATORS: &[&str] = &[
    "code", "script", "program", "function", "class", "bug", "error", "deploy", "server",
    "database",
];

/// Classify a prompt.
///
/// Work patterns win over everything; identity and conversational patterns
/// stay direct; short inputs and plain questions without work indicators
/// stay direct; anything else is treated as work.
pub fn classify(input: &str) -> PromptClass {
    let normalized = input.trim().to_lowercase();

    if WORK_PATTERNS.is_match(&normalized) {
        return PromptClass::Work;
    }
    if IDENTITY_PATTERNS.is_match(&normalized) {
        return PromptClass::Identity;
    }
    if DIRECT_PATTERNS.is_match(&normalized) {
        return PromptClass::Direct;
    }

    // Short conversational inputs stay direct.
    if normalized.len() < 20 {
        return PromptClass::Direct;
    }

    // Plain questions stay direct unless they mention work artifacts.
    if SIMPLE_QUESTION_STARTERS
        .iter()
        .any(|starter| normalized.starts_with(starter))
        && !WORK_INDICATORS.iter().any(|w| normalized.contains(w))
    {
        return PromptClass::Direct;
    }

    PromptClass::Work
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greetings_are_direct() {
        assert_eq!(classify("hi"), PromptClass::Direct);
        assert_eq!(classify("Hello!"), PromptClass::Direct);
        assert_eq!(classify("good morning everyone"), PromptClass::Direct);
        assert_eq!(classify("thanks"), PromptClass::Direct);
    }

    #[test]
    fn test_identity_questions() {
        assert_eq!(classify("who are you?"), PromptClass::Identity);
        assert_eq!(classify("What is HIVEMIND"), PromptClass::Identity);
    }

    #[test]
    fn test_work_requests_need_dialogue() {
        assert_eq!(
            classify("implement a cache with LRU eviction"),
            PromptClass::Work
        );
        assert_eq!(classify("Build a backend API"), PromptClass::Work);
        assert_eq!(classify("run a pentest on staging"), PromptClass::Work);
        assert_eq!(
            classify("deploy the service to kubernetes"),
            PromptClass::Work
        );
    }

    #[test]
    fn test_work_patterns_beat_question_starters() {
        // A question that names a work artifact still goes to the dialogue.
        assert_eq!(
            classify("what is the best way to fix this recurring bug in my code"),
            PromptClass::Work
        );
    }

    #[test]
    fn test_plain_questions_stay_direct() {
        assert_eq!(
            classify("what is the capital of iceland anyway"),
            PromptClass::Direct
        );
    }

    #[test]
    fn test_short_unmatched_input_is_direct() {
        assert_eq!(classify("hmm, neat"), PromptClass::Direct);
    }

    #[test]
    fn test_long_unmatched_input_is_work() {
        let long = "please take a very close look at all of the things going on in this system and tell me everything";
        // "look at" matches no work pattern but the input is long and not a
        // simple question, so it escalates.
        assert_eq!(classify(long), PromptClass::Work);
    }
}
