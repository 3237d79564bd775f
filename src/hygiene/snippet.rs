//! Block structure of a snippet: imports, top-level functions, everything else.

use std::collections::BTreeSet;

use super::lexer::{logical_lines, LogicalLine, Token, TokenKind};

/// One name bound by an import statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportName {
    /// Dotted path as written (`numpy`, `os.path`, `Tuple`)
    pub path: String,
    pub alias: Option<String>,
    /// Name the statement introduces into the module namespace
    pub bound: String,
}

/// A parsed `import ...` or `from ... import ...` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStmt {
    /// Source module for `from` imports
    pub from: Option<String>,
    pub names: Vec<ImportName>,
    /// `from m import *`
    pub star: bool,
}

impl ImportStmt {
    pub fn binds(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.bound == name)
    }

    /// The statement with one binding removed, or `None` if nothing is left
    pub fn without(&self, name: &str) -> Option<ImportStmt> {
        let names: Vec<ImportName> = self
            .names
            .iter()
            .filter(|n| n.bound != name)
            .cloned()
            .collect();
        if names.is_empty() && !self.star {
            return None;
        }
        Some(ImportStmt {
            from: self.from.clone(),
            names,
            star: self.star,
        })
    }

    pub fn render(&self) -> String {
        let mut parts: Vec<String> = self
            .names
            .iter()
            .map(|n| match &n.alias {
                Some(alias) => format!("{} as {}", n.path, alias),
                None => n.path.clone(),
            })
            .collect();
        if self.star {
            parts.push("*".to_string());
        }
        match &self.from {
            Some(module) => format!("from {} import {}", module, parts.join(", ")),
            None => format!("import {}", parts.join(", ")),
        }
    }

    fn parse(tokens: &[Token<'_>]) -> Option<Self> {
        let first = tokens.first()?;
        if first.is_ident("import") {
            let names = parse_names(&tokens[1..], false);
            return Some(Self {
                from: None,
                names,
                star: false,
            });
        }
        if first.is_ident("from") {
            let split = tokens.iter().position(|t| t.is_ident("import"))?;
            let module: String = tokens[1..split].iter().map(|t| t.text).collect();
            let rest = &tokens[split + 1..];
            let star = rest.iter().any(|t| t.is_punct('*'));
            return Some(Self {
                from: Some(module),
                names: parse_names(rest, true),
                star,
            });
        }
        None
    }
}

/// Parse a comma-separated list of `dotted.path [as alias]`
fn parse_names(tokens: &[Token<'_>], from_import: bool) -> Vec<ImportName> {
    let mut names = Vec::new();
    for group in tokens.split(|t| t.is_punct(',')) {
        let group: Vec<&Token<'_>> = group
            .iter()
            .filter(|t| !t.is_punct('(') && !t.is_punct(')'))
            .collect();
        let as_pos = group.iter().position(|t| t.is_ident("as"));
        let path_tokens = &group[..as_pos.unwrap_or(group.len())];
        if path_tokens.is_empty() || path_tokens.iter().any(|t| t.is_punct('*')) {
            continue;
        }
        let path: String = path_tokens.iter().map(|t| t.text).collect();
        let alias = as_pos
            .and_then(|p| group.get(p + 1))
            .map(|t| t.text.to_string());
        let bound = match &alias {
            Some(alias) => alias.clone(),
            None if from_import => path.clone(),
            None => path.split('.').next().unwrap_or_default().to_string(),
        };
        names.push(ImportName { path, alias, bound });
    }
    names
}

/// What a top-level item is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    Import(ImportStmt),
    Function { name: String },
    Other,
}

/// A top-level item with its physical line span (inclusive)
#[derive(Debug, Clone)]
pub struct Item<'a> {
    pub kind: ItemKind,
    pub start_line: usize,
    pub end_line: usize,
    /// Header tokens (decorators and `def` line) for functions, all tokens otherwise
    pub header: Vec<Token<'a>>,
    /// Indented body tokens, empty for non-functions
    pub body: Vec<Token<'a>>,
}

impl<'a> Item<'a> {
    pub fn tokens(&self) -> impl Iterator<Item = &Token<'a>> {
        self.header.iter().chain(self.body.iter())
    }

    pub fn function_name(&self) -> Option<&str> {
        match &self.kind {
            ItemKind::Function { name } => Some(name),
            _ => None,
        }
    }

    pub fn is_import(&self) -> bool {
        matches!(self.kind, ItemKind::Import(_))
    }

    /// Parameter names declared in a function header
    pub fn parameters(&self) -> Vec<&'a str> {
        let Some(def) = self.header.iter().position(|t| t.is_ident("def")) else {
            return Vec::new();
        };
        let Some(open) = self.header[def..].iter().position(|t| t.is_punct('(')).map(|p| p + def) else {
            return Vec::new();
        };
        let mut params = Vec::new();
        let mut depth = 0usize;
        let mut expect_name = true;
        for token in &self.header[open..] {
            match token.text {
                "(" | "[" | "{" => {
                    depth += 1;
                    continue;
                }
                ")" | "]" | "}" => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                    continue;
                }
                _ => {}
            }
            if depth != 1 {
                continue;
            }
            if token.is_punct(',') {
                expect_name = true;
            } else if token.is_punct('*') || token.is_punct('/') {
                continue;
            } else if expect_name && token.kind == TokenKind::Ident {
                params.push(token.text);
                expect_name = false;
            } else {
                expect_name = false;
            }
        }
        params
    }
}

/// Call-style references: `name(` not preceded by `.` or `def`
pub fn calls<'t, 'a: 't>(tokens: impl IntoIterator<Item = &'t Token<'a>>) -> BTreeSet<&'a str> {
    let tokens: Vec<&Token<'a>> = tokens.into_iter().collect();
    let mut out = BTreeSet::new();
    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Ident {
            continue;
        }
        let followed = tokens.get(i + 1).is_some_and(|n| n.is_punct('('));
        let preceded = i > 0 && (tokens[i - 1].is_punct('.') || tokens[i - 1].is_ident("def"));
        if followed && !preceded {
            out.insert(token.text);
        }
    }
    out
}

/// `name` used as a free identifier, optionally followed by a specific character
pub fn uses_name<'t, 'a: 't>(
    tokens: impl IntoIterator<Item = &'t Token<'a>>,
    name: &str,
    followed_by: Option<char>,
) -> bool {
    let tokens: Vec<&Token<'a>> = tokens.into_iter().collect();
    tokens.iter().enumerate().any(|(i, token)| {
        token.is_ident(name)
            && !(i > 0 && tokens[i - 1].is_punct('.'))
            && match followed_by {
                Some(c) => tokens.get(i + 1).is_some_and(|n| n.is_punct(c)),
                None => true,
            }
    })
}

/// Dotted path such as `pd.DataFrame` appearing in code
pub fn has_path<'t, 'a: 't>(tokens: impl IntoIterator<Item = &'t Token<'a>>, path: &[&str]) -> bool {
    if path.is_empty() {
        return true;
    }
    let tokens: Vec<&Token<'a>> = tokens.into_iter().collect();
    let width = path.len() * 2 - 1;
    tokens.windows(width).any(|w| {
        w.iter().enumerate().all(|(i, t)| {
            if i % 2 == 0 {
                t.is_ident(path[i / 2])
            } else {
                t.is_punct('.')
            }
        })
    })
}

/// A line-level edit, applied against the current source
#[derive(Debug, Clone)]
pub struct LineEdit {
    pub start: usize,
    /// Inclusive
    pub end: usize,
    pub replacement: Vec<String>,
}

/// Source text plus on-demand structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    source: String,
}

impl Snippet {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn into_string(self) -> String {
        self.source
    }

    /// Parse top-level items
    pub fn items(&self) -> Vec<Item<'_>> {
        build_items(logical_lines(&self.source))
    }

    /// Apply non-overlapping edits
    pub fn apply(&self, mut edits: Vec<LineEdit>) -> Snippet {
        let mut lines: Vec<String> = self.source.split('\n').map(str::to_string).collect();
        edits.sort_by(|a, b| b.start.cmp(&a.start));
        for edit in edits {
            let end = edit.end.min(lines.len().saturating_sub(1));
            if edit.start > end {
                continue;
            }
            lines.splice(edit.start..=end, edit.replacement);
        }
        Snippet::new(lines.join("\n"))
    }

    /// Insert lines at the top
    pub fn prepend(&self, new_lines: &[String]) -> Snippet {
        if new_lines.is_empty() {
            return self.clone();
        }
        let mut head = new_lines.join("\n");
        let first_is_import = self.items().first().is_some_and(|i| i.is_import());
        if !first_is_import && !self.source.trim().is_empty() {
            head.push('\n');
        }
        Snippet::new(format!("{}\n{}", head, self.source))
    }
}

fn starts_function(line: &LogicalLine<'_>) -> bool {
    let t = &line.tokens;
    t.first().is_some_and(|t| t.is_ident("def"))
        || (t.first().is_some_and(|t| t.is_ident("async")) && t.get(1).is_some_and(|t| t.is_ident("def")))
}

fn function_name(line: &LogicalLine<'_>) -> String {
    line.tokens
        .iter()
        .position(|t| t.is_ident("def"))
        .and_then(|p| line.tokens.get(p + 1))
        .map(|t| t.text.to_string())
        .unwrap_or_default()
}

fn build_items(lines: Vec<LogicalLine<'_>>) -> Vec<Item<'_>> {
    let mut items = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];

        // Decorators attach to the function that follows them
        let mut j = i;
        while j < lines.len() && lines[j].indent == 0 && lines[j].tokens[0].is_punct('@') {
            j += 1;
        }

        if line.indent == 0 && j < lines.len() && lines[j].indent == 0 && starts_function(&lines[j]) {
            let mut header = Vec::new();
            for decorated in &lines[i..=j] {
                header.extend(decorated.tokens.iter().copied());
            }
            let mut k = j + 1;
            let mut body = Vec::new();
            while k < lines.len() && lines[k].indent > 0 {
                body.extend(lines[k].tokens.iter().copied());
                k += 1;
            }
            items.push(Item {
                kind: ItemKind::Function {
                    name: function_name(&lines[j]),
                },
                start_line: line.start_line,
                end_line: lines[k - 1].end_line,
                header,
                body,
            });
            i = k;
            continue;
        }

        let kind = if line.indent == 0 {
            ImportStmt::parse(&line.tokens)
                .map(ItemKind::Import)
                .unwrap_or(ItemKind::Other)
        } else {
            ItemKind::Other
        };
        items.push(Item {
            kind,
            start_line: line.start_line,
            end_line: line.end_line,
            header: line.tokens.clone(),
            body: Vec::new(),
        });
        i += 1;
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "import numpy as np\nfrom typing import (Tuple, Dict as D)\n\n@cache\ndef sma(x,\n        n):\n    return x.rolling(n).mean()\n\ndef alpha(df: pd.DataFrame, *, n: int = 3, **kw) -> Tuple[pd.Series, pd.Series]:\n    s = sma(df['close'], n)\n    return s, s.rank()\n";

    #[test]
    fn test_items_and_spans() {
        let snippet = Snippet::new(SRC);
        let items = snippet.items();

        assert_eq!(items.len(), 4);
        assert!(items[0].is_import());
        assert_eq!(items[2].function_name(), Some("sma"));
        assert_eq!((items[2].start_line, items[2].end_line), (3, 6));
        assert_eq!(items[3].function_name(), Some("alpha"));
        assert_eq!((items[3].start_line, items[3].end_line), (8, 10));
    }

    #[test]
    fn test_import_parsing_and_rendering() {
        let snippet = Snippet::new(SRC);
        let items = snippet.items();

        let ItemKind::Import(numpy) = &items[0].kind else {
            panic!("expected import");
        };
        assert!(numpy.binds("np"));
        assert!(!numpy.binds("numpy"));

        let ItemKind::Import(typing) = &items[1].kind else {
            panic!("expected import");
        };
        assert!(typing.binds("Tuple"));
        assert!(typing.binds("D"));
        assert_eq!(
            typing.without("Tuple").unwrap().render(),
            "from typing import Dict as D"
        );
        assert!(numpy.without("np").is_none());
    }

    #[test]
    fn test_calls_skip_methods_and_definitions() {
        let snippet = Snippet::new(SRC);
        let items = snippet.items();

        let in_alpha = calls(items[3].tokens());
        assert!(in_alpha.contains("sma"));
        assert!(!in_alpha.contains("rank"));
        assert!(!in_alpha.contains("alpha"));
    }

    #[test]
    fn test_parameters_and_paths() {
        let snippet = Snippet::new(SRC);
        let items = snippet.items();

        assert_eq!(items[3].parameters(), vec!["df", "n", "kw"]);
        assert_eq!(items[2].parameters(), vec!["x", "n"]);
        assert!(has_path(items[3].tokens(), &["pd", "DataFrame"]));
        assert!(uses_name(items[3].tokens(), "Tuple", Some('[')));
        assert!(!uses_name(items[3].tokens(), "np", Some('.')));
    }

    #[test]
    fn test_apply_and_prepend() {
        let snippet = Snippet::new("a\nb\nc\nd");
        let edited = snippet.apply(vec![
            LineEdit { start: 1, end: 2, replacement: vec![] },
            LineEdit { start: 3, end: 3, replacement: vec!["D".to_string()] },
        ]);
        assert_eq!(edited.as_str(), "a\nD");

        let code = Snippet::new("def f():\n    pass");
        assert_eq!(
            code.prepend(&["import pandas as pd".to_string()]).as_str(),
            "import pandas as pd\n\ndef f():\n    pass"
        );
    }
}
