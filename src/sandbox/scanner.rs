//! Static scan of component source for module imports and name references
//!
//! The scanner lexes the source just far enough to skip comments and string
//! literals, then walks logical statements to collect `import` targets and every
//! identifier reference. Expressions inside f-string braces are scanned as code.

use regex::Regex;
use std::sync::OnceLock;

/// A module pulled in by the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    pub module: String,
    pub line: usize,
}

/// An identifier referenced by the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRef {
    pub name: String,
    pub line: usize,
    /// Accessed as `something.name`
    pub attribute: bool,
}

/// Everything the isolation policy needs to judge a source text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceScan {
    pub modules: Vec<ModuleRef>,
    pub names: Vec<NameRef>,
}

impl SourceScan {
    /// Distinct top-level modules, in first-seen order
    pub fn module_names(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for m in &self.modules {
            if !seen.contains(&m.module) {
                seen.push(m.module.clone());
            }
        }
        seen
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str { text: String, formatted: bool },
    Punct(char),
    End,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

fn fstring_expr() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]+)\}").expect("f-string expression pattern"))
}

/// Scan source text
pub fn scan(source: &str) -> SourceScan {
    let tokens = lex(source, 1);
    let mut scan = SourceScan::default();
    collect(&tokens, &mut scan);
    scan
}

fn lex(source: &str, first_line: usize) -> Vec<Token> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut line = first_line;
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\n' => {
                if depth == 0 {
                    tokens.push(Token { tok: Tok::End, line });
                }
                line += 1;
                i += 1;
            }
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                line += 1;
                i += 2;
            }
            ';' => {
                tokens.push(Token { tok: Tok::End, line });
                i += 1;
            }
            '\'' | '"' => {
                let start_line = line;
                let formatted = matches!(
                    tokens.last(),
                    Some(Token { tok: Tok::Ident(prefix), .. })
                        if prefix.len() <= 2
                            && prefix.chars().any(|p| p == 'f' || p == 'F')
                            && prefix.chars().all(|p| "rRbBfFuU".contains(p))
                );
                if formatted {
                    tokens.pop();
                }
                let (text, next, newlines) = read_string(&chars, i);
                line += newlines;
                i = next;
                tokens.push(Token {
                    tok: Tok::Str { text, formatted },
                    line: start_line,
                });
            }
            c if c == '_' || c.is_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i] == '_' || chars[i].is_alphanumeric()) {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Ident(chars[start..i].iter().collect()),
                    line,
                });
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '.' || chars[i] == '_') {
                    i += 1;
                }
            }
            '(' | '[' | '{' => {
                depth += 1;
                tokens.push(Token { tok: Tok::Punct(c), line });
                i += 1;
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                tokens.push(Token { tok: Tok::Punct(c), line });
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            c => {
                tokens.push(Token { tok: Tok::Punct(c), line });
                i += 1;
            }
        }
    }

    tokens.push(Token { tok: Tok::End, line });
    tokens
}

/// Read a string literal starting at `start`; returns (content, next index, newlines)
fn read_string(chars: &[char], start: usize) -> (String, usize, usize) {
    let quote = chars[start];
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut i = if triple { start + 3 } else { start + 1 };
    let mut text = String::new();
    let mut newlines = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            if let Some(&escaped) = chars.get(i + 1) {
                if escaped == '\n' {
                    newlines += 1;
                }
                text.push(escaped);
            }
            i += 2;
            continue;
        }
        if c == quote {
            if !triple {
                return (text, i + 1, newlines);
            }
            if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                return (text, i + 3, newlines);
            }
        }
        if c == '\n' {
            newlines += 1;
            // Unterminated single-quoted string ends at the line break
            if !triple {
                return (text, i, newlines - 1);
            }
        }
        text.push(c);
        i += 1;
    }

    (text, i, newlines)
}

fn collect(tokens: &[Token], scan: &mut SourceScan) {
    let mut i = 0;
    while i < tokens.len() {
        let at_statement_start = i == 0
            || matches!(tokens[i - 1].tok, Tok::End | Tok::Punct(':'));

        match &tokens[i].tok {
            Tok::Ident(word) if at_statement_start && word == "import" => {
                i = parse_import(tokens, i + 1, scan);
                continue;
            }
            Tok::Ident(word) if at_statement_start && word == "from" => {
                i = parse_from(tokens, i + 1, scan);
                continue;
            }
            Tok::Ident(name) => {
                let attribute = i > 0 && tokens[i - 1].tok == Tok::Punct('.');
                if !attribute && (name == "__import__" || name == "import_module") {
                    if let (Some(Tok::Punct('(')), Some(Tok::Str { text, .. })) =
                        (tokens.get(i + 1).map(|t| &t.tok), tokens.get(i + 2).map(|t| &t.tok))
                    {
                        scan.modules.push(ModuleRef {
                            module: text.clone(),
                            line: tokens[i].line,
                        });
                    }
                }
                scan.names.push(NameRef {
                    name: name.clone(),
                    line: tokens[i].line,
                    attribute,
                });
            }
            Tok::Str { text, formatted: true } => {
                for cap in fstring_expr().captures_iter(text) {
                    let inner = lex(&cap[1], tokens[i].line);
                    let mut nested = SourceScan::default();
                    collect(&inner, &mut nested);
                    scan.names.extend(nested.names);
                }
            }
            _ => {}
        }
        i += 1;
    }
}

/// Read `a.b.c`; returns the dotted name and the next index
fn dotted_name(tokens: &[Token], mut i: usize) -> (Option<String>, usize) {
    let mut parts = Vec::new();
    while let Some(Tok::Ident(part)) = tokens.get(i).map(|t| &t.tok) {
        parts.push(part.clone());
        i += 1;
        if tokens.get(i).map(|t| &t.tok) == Some(&Tok::Punct('.')) {
            i += 1;
        } else {
            break;
        }
    }
    if parts.is_empty() {
        (None, i)
    } else {
        (Some(parts.join(".")), i)
    }
}

/// `import a.b as c, d`
fn parse_import(tokens: &[Token], mut i: usize, scan: &mut SourceScan) -> usize {
    loop {
        let line = tokens.get(i).map(|t| t.line).unwrap_or_default();
        let (name, next) = dotted_name(tokens, i);
        i = next;
        if let Some(module) = name {
            scan.modules.push(ModuleRef { module, line });
        }
        if matches!(tokens.get(i).map(|t| &t.tok), Some(Tok::Ident(w)) if w == "as") {
            i += 2;
        }
        if tokens.get(i).map(|t| &t.tok) == Some(&Tok::Punct(',')) {
            i += 1;
            continue;
        }
        return i;
    }
}

/// `from a.b import x`; relative imports stay inside the component package
fn parse_from(tokens: &[Token], i: usize, scan: &mut SourceScan) -> usize {
    if tokens.get(i).map(|t| &t.tok) == Some(&Tok::Punct('.')) {
        return i;
    }
    let line = tokens.get(i).map(|t| t.line).unwrap_or_default();
    let (name, next) = dotted_name(tokens, i);
    if let Some(module) = name {
        scan.modules.push(ModuleRef { module, line });
    }
    match tokens.get(next).map(|t| &t.tok) {
        Some(Tok::Ident(w)) if w == "import" => next + 1,
        _ => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modules(source: &str) -> Vec<String> {
        scan(source).modules.into_iter().map(|m| m.module).collect()
    }

    #[test]
    fn test_import_forms() {
        let source = "import os\nimport json, re as regex\nfrom collections.abc import Mapping\nfrom . import sibling\n";
        assert_eq!(modules(source), vec!["os", "json", "re", "collections.abc"]);
    }

    #[test]
    fn test_imports_inside_blocks_and_after_colon() {
        let source = "def build(self):\n    import subprocess\n    if True: import socket\n    return 1\n";
        assert_eq!(modules(source), vec!["subprocess", "socket"]);
    }

    #[test]
    fn test_comments_and_strings_are_ignored() {
        let source = "# import os\nx = 'import os'\ny = \"\"\"\nimport subprocess\n\"\"\"\n";
        assert!(modules(source).is_empty());
        let names: Vec<_> = scan(source).names.into_iter().map(|n| n.name).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn test_dynamic_import_literals() {
        let source = "m = __import__('os')\nimport importlib\nn = importlib.import_module(\"socket\")\n";
        let found = modules(source);
        assert!(found.contains(&"os".to_string()));
        assert!(found.contains(&"importlib".to_string()));
        // attribute call is still recorded through the importlib import itself
        assert!(!found.contains(&"socket".to_string()));
    }

    #[test]
    fn test_attribute_flag_and_lines() {
        let source = "a = 1\nresult = obj.eval(2)\nb = eval('1+1')\n";
        let evals: Vec<_> = scan(source)
            .names
            .into_iter()
            .filter(|n| n.name == "eval")
            .collect();
        assert_eq!(evals.len(), 2);
        assert!(evals[0].attribute);
        assert_eq!(evals[0].line, 2);
        assert!(!evals[1].attribute);
        assert_eq!(evals[1].line, 3);
    }

    #[test]
    fn test_fstring_expressions_are_scanned() {
        let source = "label = f\"value: {eval(expr)}\"\n";
        assert!(scan(source).names.iter().any(|n| n.name == "eval"));
    }

    #[test]
    fn test_multiline_parenthesised_import() {
        let source = "from typing import (\n    Any,\n    Dict,\n)\nimport os\n";
        let found = scan(source).modules;
        assert_eq!(found[0].module, "typing");
        assert_eq!(found[1].module, "os");
        assert_eq!(found[1].line, 5);
    }
}
