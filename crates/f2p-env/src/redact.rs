//! Secret sanitization for environment recipes.
//!
//! Recipes scraped from real repositories routinely carry API keys in
//! `ENV`/`ARG`/`export` lines. Every line that assigns a variable whose name
//! matches the denylist is blanked before the recipe reaches a build, an
//! image layer or a log.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Built-in secret-bearing variable name fragments.
pub const DEFAULT_SECRET_NAMES: &[&str] = &[
    "API_KEY",
    "APIKEY",
    "TOKEN",
    "SECRET",
    "PASSWORD",
    "PASSWD",
    "CREDENTIAL",
    "CREDENTIALS",
    "PRIVATE_KEY",
    "ACCESS_KEY",
];

/// `NAME=`, anywhere on the line. Word boundaries and `==` are checked by
/// hand so that adjacent assignments never share a separator.
static ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*=").unwrap());

/// Legacy Dockerfile `ENV NAME value` form.
static LEGACY_ENV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:#\s*)?ENV\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s+\S").unwrap()
});

fn segments(name: &str) -> Vec<String> {
    name.split('_')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_uppercase())
        .collect()
}

/// Denylist of secret-bearing variable names.
///
/// An entry matches a variable when the entry's `_`-separated segments occur
/// consecutively in the variable's segments, case-insensitively: `API_KEY`
/// matches `OPENAI_API_KEY` and `TOKEN` matches `HF_TOKEN`, but `TOKEN` does
/// not match `TOKENIZERS_PARALLELISM`.
#[derive(Debug, Clone)]
pub struct SecretPolicy {
    entries: Vec<Vec<String>>,
}

impl Default for SecretPolicy {
    fn default() -> Self {
        Self::with_extra(&[])
    }
}

impl SecretPolicy {
    /// Built-in names plus `extra`.
    pub fn with_extra(extra: &[String]) -> Self {
        let entries = DEFAULT_SECRET_NAMES
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
            .map(segments)
            .filter(|s| !s.is_empty())
            .collect();
        Self { entries }
    }

    pub fn is_secret(&self, variable: &str) -> bool {
        let name = segments(variable);
        self.entries.iter().any(|entry| {
            entry.len() <= name.len() && name.windows(entry.len()).any(|w| w == entry.as_slice())
        })
    }
}

/// One stripped line. Values are never recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Redaction {
    /// 1-based line number in the original recipe.
    pub line: usize,
    pub names: Vec<String>,
    /// Continuation lines that held the value of an assignment left
    /// dangling at the end of `line`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_lines: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SanitizedRecipe {
    pub text: String,
    pub redactions: Vec<Redaction>,
}

impl SanitizedRecipe {
    pub fn redacted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .redactions
            .iter()
            .flat_map(|r| r.names.iter().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Body of the `redactions.json` warning artifact.
    pub fn report(&self) -> RedactionReport {
        RedactionReport {
            redacted_lines: self.redactions.len(),
            redactions: self.redactions.clone(),
        }
    }
}

/// Warning artifact listing what was stripped from a recipe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedactionReport {
    pub redacted_lines: usize,
    pub redactions: Vec<Redaction>,
}

/// A variable assignment and everything after its name on the line.
struct Assignment<'a> {
    name: &'a str,
    rest: &'a str,
}

impl Assignment<'_> {
    /// The value starts on the next line.
    fn dangles(&self) -> bool {
        self.rest.trim() == "\\"
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn assignments(line: &str) -> Vec<Assignment<'_>> {
    let bytes = line.as_bytes();
    let mut found: Vec<Assignment<'_>> = ASSIGNMENT
        .find_iter(line)
        .filter(|m| m.start() == 0 || !is_word_byte(bytes[m.start() - 1]))
        .filter(|m| bytes.get(m.end()) != Some(&b'='))
        .map(|m| Assignment {
            name: &line[m.start()..m.end() - 1],
            rest: &line[m.end()..],
        })
        .collect();
    if let Some(m) = LEGACY_ENV.captures(line).and_then(|caps| caps.name("name")) {
        found.push(Assignment {
            name: m.as_str(),
            rest: line[m.end()..].trim_start(),
        });
    }
    found
}

fn continues(line: &str) -> bool {
    line.trim_end().ends_with('\\')
}

/// Blank `line` in place, keeping the surrounding instruction well formed.
fn push_blanked(out: &mut Vec<String>, line: &str) {
    if continues(line) {
        out.push("\\".to_string());
        return;
    }

    let in_continuation = out.last().map(|prev| continues(prev)).unwrap_or(false);
    if in_continuation {
        for prev in out.iter_mut().rev() {
            if prev.trim() == "\\" {
                prev.clear();
                continue;
            }
            if continues(prev) {
                let trimmed = prev.trim_end();
                *prev = trimmed[..trimmed.len() - 1].trim_end().to_string();
            }
            break;
        }
    }
    out.push(String::new());
}

/// Blank every line that assigns a denylisted variable.
///
/// Line numbers are preserved. A blanked line that carried a `\`
/// continuation keeps a bare `\`; a blanked line that closed a continuation
/// closes it on the nearest preceding kept line instead. When a secret's
/// value starts on the next line, that line is blanked too.
pub fn sanitize_recipe(recipe: &str, policy: &SecretPolicy) -> SanitizedRecipe {
    let mut out: Vec<String> = Vec::new();
    let mut redactions: Vec<Redaction> = Vec::new();
    let mut dangling: Option<usize> = None;

    for (idx, line) in recipe.lines().enumerate() {
        let secrets: Vec<Assignment<'_>> = assignments(line)
            .into_iter()
            .filter(|a| policy.is_secret(a.name))
            .collect();
        let holds_value = match dangling.take() {
            Some(at) => {
                redactions[at].value_lines.push(idx + 1);
                true
            }
            None => false,
        };

        if secrets.is_empty() {
            if holds_value {
                push_blanked(&mut out, line);
            } else {
                out.push(line.to_string());
            }
            continue;
        }

        let mut names: Vec<String> = secrets.iter().map(|a| a.name.to_string()).collect();
        names.dedup();
        if secrets.iter().any(Assignment::dangles) {
            dangling = Some(redactions.len());
        }
        redactions.push(Redaction {
            line: idx + 1,
            names,
            value_lines: Vec::new(),
        });
        push_blanked(&mut out, line);
    }

    let mut text = out.join("\n");
    if recipe.ends_with('\n') {
        text.push('\n');
    }

    SanitizedRecipe { text, redactions }
}
