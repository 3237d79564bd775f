//! The hygiene pass itself.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::lexer::{logical_lines, Token, TokenKind};
use super::snippet::{calls, has_path, uses_name, Item, ItemKind, LineEdit, Snippet};
use super::{HygieneConfig, HygieneError, ImportPolicy, ImportRule};

/// Upper bound on import/helper passes before giving up on a fixed point
const MAX_PASSES: usize = 16;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+.-]*[ \t]*\r?\n(.*?)```").expect("invalid fence pattern")
});

/// Symbols found unused during one pass. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings {
    /// Helper definitions removed
    pub dead_helpers: BTreeSet<String>,
    /// Import bindings removed
    pub removed_imports: BTreeSet<String>,
    /// Import statements prepended
    pub added_imports: BTreeSet<String>,
    /// Parameters of kept functions never referenced in their body (reported only)
    pub unused_parameters: BTreeSet<String>,
}

impl Findings {
    pub fn is_empty(&self) -> bool {
        self.dead_helpers.is_empty()
            && self.removed_imports.is_empty()
            && self.added_imports.is_empty()
            && self.unused_parameters.is_empty()
    }
}

/// Output of a successful pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cleaned {
    pub code: String,
    pub findings: Findings,
}

/// Deterministic sanitizer for generated snippets
#[derive(Debug, Clone)]
pub struct HygieneEngine {
    config: HygieneConfig,
}

impl Default for HygieneEngine {
    fn default() -> Self {
        Self::new(HygieneConfig::default())
    }
}

impl HygieneEngine {
    pub fn new(config: HygieneConfig) -> Self {
        Self { config }
    }

    /// Remove every banned substring, including ones formed by earlier removals
    pub fn scrub(&self, text: &str) -> String {
        let mut out = text.to_string();
        loop {
            let before = out.len();
            for token in self.config.banned_tokens.iter().filter(|t| !t.is_empty()) {
                if out.contains(token.as_str()) {
                    out = out.replace(token.as_str(), "");
                }
            }
            if out.len() == before {
                return out;
            }
        }
    }

    /// Run the full pass and return only the cleaned code
    pub fn clean(&self, raw: &str) -> Result<String, HygieneError> {
        self.inspect(raw).map(|cleaned| cleaned.code)
    }

    /// Run the full pass and return the cleaned code with its findings
    pub fn inspect(&self, raw: &str) -> Result<Cleaned, HygieneError> {
        let scrubbed = self.scrub(raw);
        let mut snippet = Snippet::new(extract_fence(&scrubbed));
        self.gate(&snippet)?;

        let mut findings = Findings::default();
        for _ in 0..MAX_PASSES {
            let next = self.enforce_mandatory(&snippet, &mut findings);
            let next = self.prune_optional(&next, &mut findings);
            let next = self.balance_symmetric(&next, &mut findings);
            let next = self.drop_dead_helpers(&next, &mut findings);
            if next == snippet {
                break;
            }
            snippet = next;
        }

        let collapsed = collapse_blank_lines(snippet.as_str());
        let cleaned = Snippet::new(format!("{}\n", self.scrub(&collapsed).trim()));
        self.gate(&cleaned)?;

        findings.unused_parameters = self.unused_parameters(&cleaned);
        Ok(Cleaned {
            code: cleaned.into_string(),
            findings,
        })
    }

    /// A function definition and a reference to the primary type must both be present
    fn gate(&self, snippet: &Snippet) -> Result<(), HygieneError> {
        let lines = logical_lines(snippet.as_str());
        let tokens: Vec<&Token<'_>> = lines.iter().flat_map(|l| l.tokens.iter()).collect();

        let has_def = tokens
            .windows(2)
            .any(|w| w[0].is_ident("def") && w[1].kind == TokenKind::Ident);
        if !has_def {
            return Err(HygieneError::invalid("no function definition"));
        }

        let path: Vec<&str> = self.config.primary_type.split('.').collect();
        if !has_path(tokens.iter().copied(), &path) {
            return Err(HygieneError::invalid(format!(
                "no reference to {}",
                self.config.primary_type
            )));
        }
        Ok(())
    }

    fn rules(&self, policy: ImportPolicy) -> impl Iterator<Item = &ImportRule> {
        self.config.imports.iter().filter(move |r| r.policy == policy)
    }

    fn enforce_mandatory(&self, snippet: &Snippet, findings: &mut Findings) -> Snippet {
        let items = snippet.items();
        let missing: Vec<String> = self
            .rules(ImportPolicy::Mandatory)
            .filter(|rule| is_used(&items, rule) && !is_bound(&items, &rule.binds))
            .map(|rule| rule.statement.clone())
            .collect();
        findings.added_imports.extend(missing.iter().cloned());
        snippet.prepend(&missing)
    }

    fn prune_optional(&self, snippet: &Snippet, findings: &mut Findings) -> Snippet {
        let items = snippet.items();
        let unused: Vec<&str> = self
            .rules(ImportPolicy::Optional)
            .filter(|rule| is_bound(&items, &rule.binds) && !is_used(&items, rule))
            .map(|rule| rule.binds.as_str())
            .collect();
        findings.removed_imports.extend(unused.iter().map(|s| s.to_string()));
        snippet.apply(unbind_edits(&items, &unused))
    }

    /// Add-if-used and remove-if-unused in one step so the two never fight
    fn balance_symmetric(&self, snippet: &Snippet, findings: &mut Findings) -> Snippet {
        let items = snippet.items();
        let mut missing = Vec::new();
        let mut unused = Vec::new();
        for rule in self.rules(ImportPolicy::Symmetric) {
            match (is_used(&items, rule), is_bound(&items, &rule.binds)) {
                (true, false) => missing.push(rule.statement.clone()),
                (false, true) => unused.push(rule.binds.as_str()),
                _ => {}
            }
        }
        findings.added_imports.extend(missing.iter().cloned());
        findings.removed_imports.extend(unused.iter().map(|s| s.to_string()));
        snippet.apply(unbind_edits(&items, &unused)).prepend(&missing)
    }

    /// Remove allow-listed helpers not reachable from non-helper code.
    ///
    /// Liveness is a fixed point over the unmodified snippet: a helper is live
    /// if non-helper code calls it or a live helper calls it. A helper called
    /// only by dead helpers is dead, whatever order the allow-list is in.
    fn drop_dead_helpers(&self, snippet: &Snippet, findings: &mut Findings) -> Snippet {
        let items = snippet.items();
        let helpers: BTreeSet<&str> = self.config.helpers.iter().map(String::as_str).collect();
        let is_helper = |item: &Item<'_>| item.function_name().is_some_and(|n| helpers.contains(n));

        let mut queue: Vec<&str> = items
            .iter()
            .filter(|item| !is_helper(*item))
            .flat_map(|item| calls(item.tokens()))
            .filter(|name| helpers.contains(name))
            .collect();
        let mut live: BTreeSet<&str> = BTreeSet::new();
        while let Some(name) = queue.pop() {
            if !live.insert(name) {
                continue;
            }
            for item in items.iter().filter(|i| i.function_name() == Some(name)) {
                queue.extend(
                    calls(item.tokens())
                        .into_iter()
                        .filter(|callee| helpers.contains(callee) && !live.contains(callee)),
                );
            }
        }

        let mut edits = Vec::new();
        for item in &items {
            if let Some(name) = item.function_name() {
                if helpers.contains(name) && !live.contains(name) {
                    findings.dead_helpers.insert(name.to_string());
                    edits.push(LineEdit {
                        start: item.start_line,
                        end: item.end_line,
                        replacement: Vec::new(),
                    });
                }
            }
        }
        snippet.apply(edits)
    }

    fn unused_parameters(&self, snippet: &Snippet) -> BTreeSet<String> {
        let mut unused = BTreeSet::new();
        for item in snippet.items() {
            let Some(name) = item.function_name() else {
                continue;
            };
            for param in item.parameters() {
                if matches!(param, "self" | "cls") || uses_name(item.body.iter(), param, None) {
                    continue;
                }
                unused.insert(format!("{}.{}", name, param));
            }
        }
        unused
    }
}

fn code_tokens<'s, 'a>(items: &'s [Item<'a>]) -> impl Iterator<Item = &'s Token<'a>> {
    items
        .iter()
        .filter(|item| !item.is_import())
        .flat_map(|item| item.tokens())
}

fn is_used(items: &[Item<'_>], rule: &ImportRule) -> bool {
    uses_name(code_tokens(items), &rule.binds, rule.usage.follower())
}

fn is_bound(items: &[Item<'_>], name: &str) -> bool {
    items.iter().any(|item| match &item.kind {
        ItemKind::Import(stmt) => stmt.binds(name),
        _ => false,
    })
}

/// Edits that drop the given bindings from every import statement holding them
fn unbind_edits(items: &[Item<'_>], names: &[&str]) -> Vec<LineEdit> {
    let mut edits = Vec::new();
    for item in items {
        let ItemKind::Import(stmt) = &item.kind else {
            continue;
        };
        if !names.iter().any(|n| stmt.binds(n)) {
            continue;
        }
        let mut remaining = Some(stmt.clone());
        for name in names {
            remaining = remaining.and_then(|s| if s.binds(name) { s.without(name) } else { Some(s) });
        }
        edits.push(LineEdit {
            start: item.start_line,
            end: item.end_line,
            replacement: remaining.map(|s| s.render()).into_iter().collect(),
        });
    }
    edits
}

/// Interior of the first language-tagged fence, or the whole text, trimmed
pub fn extract_fence(text: &str) -> &str {
    match FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => text.trim(),
    }
}

/// Collapse runs of blank lines to a single empty line.
///
/// Whitespace-only lines (including a lone `\r`) count as blank and are
/// emitted empty.
pub fn collapse_blank_lines(text: &str) -> String {
    let mut out = Vec::new();
    let mut previous_blank = false;
    for line in text.split('\n') {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        out.push(if blank { "" } else { line });
    }
    out.join("\n")
}
