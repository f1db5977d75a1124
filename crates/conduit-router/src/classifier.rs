//! Rule-based task classifier.
//!
//! Deterministic: the same text and context always yield the same
//! classification. The result is advisory input to the router.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use conduit_contracts::model::{Category, Classification, Complexity};

const SHELL_COMMANDS: &str = "ls|cd|pwd|ps|top|htop|kill|killall|pkill|df|du|free|cat|grep|find|chmod|chown|\
mkdir|rmdir|rm|cp|mv|touch|echo|whoami|uname|uptime|git|docker|systemctl|brew|apt|npm|cargo|curl|wget|ping|\
ifconfig|netstat|tail|head|tar|zip|unzip|ssh|open";

static LEADING_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^\s*(?:sudo\s+\S|(?:{SHELL_COMMANDS})(?:\s*$|\s*\||\s+[-/~.$]))"))
        .expect("leading command regex must compile")
});

static CHAINED_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?:\||&&)\s*(?:sudo\s+)?(?:{SHELL_COMMANDS})\b")).expect("chained command regex must compile")
});

static SYSTEM_PHRASES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:running processes|disk usage|disk space|kill (?:the )?process|cpu usage|memory usage|battery level|(?:open|launch|close|quit) (?:the )?(?:app|application)\b)",
    )
    .expect("system phrase regex must compile")
});

static FILE_VERBS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:open|read|write|create|delete|remove|move|copy|rename|list|save|edit|show|append)\b")
        .expect("file verb regex must compile")
});

static PATH_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s'`(])(?:~|\.{1,2})?/[\w.\-/]+|\b[\w\-]+\.[a-z0-9]{1,5}\b|\b(?:file|folder|directory)\b")
        .expect("path regex must compile")
});

static CODE_HINTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"```|\b(?:function|compile|compiler|refactor|bug|stack trace|traceback|rust|python|javascript|typescript|golang|java|sql|regex|unit test|segfault)\b|\bfn \w+\(|\bdef \w+\(",
    )
    .expect("code regex must compile")
});

static CREATIVE_HINTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:poem|story|lyrics|imagine|brainstorm|compose|haiku|fiction)\b").expect("creative regex must compile")
});

static ANALYSIS_HINTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:analy[sz]e|analysis|compare|evaluate|pros and cons|explain why|trade-?offs?)\b")
        .expect("analysis regex must compile")
});

static SIMPLE_HINTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:quick|quickly|briefly|brief)\b|tl;dr").expect("simple hint regex must compile"));

static COMPLEX_HINTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:step by step|in depth|in-depth|thoroughly|detailed)\b").expect("complex hint regex must compile")
});

static CONJUNCTIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\b(?:then|after that|finally|next|and also)\b|^\s*\d+[.)]\s").expect("conjunction regex must compile")
});

/// Caller-supplied context that can override the classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyContext {
    /// An explicit complexity, e.g. chosen by the user. Wins over every rule.
    #[serde(default)]
    pub complexity: Option<Complexity>,
}

/// Label a natural-language request.
pub fn classify(text: &str, context: &ClassifyContext) -> Classification {
    let lowered = text.to_lowercase();
    let category = category_of(text, &lowered);
    let complexity = complexity_of(&lowered, category, context);
    debug!(?category, ?complexity, "request classified");
    Classification { complexity, category }
}

fn category_of(original: &str, lowered: &str) -> Category {
    if LEADING_COMMAND.is_match(original) || CHAINED_COMMAND.is_match(original) || SYSTEM_PHRASES.is_match(lowered) {
        Category::SystemCommand
    } else if FILE_VERBS.is_match(lowered) && PATH_LIKE.is_match(lowered) {
        Category::FileOperation
    } else if CODE_HINTS.is_match(lowered) {
        Category::Code
    } else if CREATIVE_HINTS.is_match(lowered) {
        Category::Creative
    } else if ANALYSIS_HINTS.is_match(lowered) {
        Category::Analysis
    } else {
        Category::General
    }
}

fn complexity_of(lowered: &str, category: Category, context: &ClassifyContext) -> Complexity {
    if let Some(explicit) = context.complexity {
        return explicit;
    }
    if SIMPLE_HINTS.is_match(lowered) {
        return Complexity::Simple;
    }
    if COMPLEX_HINTS.is_match(lowered) {
        return Complexity::Complex;
    }
    match category {
        Category::Creative => return Complexity::Creative,
        Category::Analysis => return Complexity::Analytical,
        _ => {}
    }

    let steps = CONJUNCTIONS.find_iter(lowered).count();
    let words = lowered.split_whitespace().count();
    if steps >= 2 || words > 80 {
        Complexity::Complex
    } else if steps == 1 || words > 25 {
        Complexity::Moderate
    } else {
        Complexity::Simple
    }
}
