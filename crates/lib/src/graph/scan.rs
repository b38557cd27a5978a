//! Syntactic `#include` extraction.
//!
//! Directives are found by line matching after block comments are blanked out. No macro
//! expansion happens, and includes inside any conditional block are reported as well.
//! The conditional nesting is still tracked for one purpose: a quoted include that sits
//! under an `#if __has_include("x.h")` (or `#elif`) test for the same spelling is
//! marked optional.

use std::sync::LazyLock;

use regex::Regex;

static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"^\s*#\s*include\s*([<"])([^>"]+)[>"]"#).unwrap_or_else(|e| panic!("invalid include regex: {e}"))
});

static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^\s*#\s*(if|ifdef|ifndef|elif|elifdef|elifndef|else|endif)\b(.*)$")
    .unwrap_or_else(|e| panic!("invalid directive regex: {e}"))
});

static HAS_INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"__has_include\s*\(\s*[<"]([^>"]+)[>"]\s*\)"#)
    .unwrap_or_else(|e| panic!("invalid __has_include regex: {e}"))
});

/// One `#include` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
  /// The path between the delimiters.
  pub spelling: String,
  /// `<...>` rather than `"..."`.
  pub angled: bool,
  /// 1-based line number.
  pub line: usize,
  /// Guarded by a `__has_include` test on the same spelling.
  pub optional: bool,
}

/// Extract every include directive from a source text, in file order.
pub fn scan_includes(text: &str) -> Vec<IncludeDirective> {
  let text = blank_block_comments(text);

  // Each open conditional frame holds the spellings its active branch tests for.
  let mut frames: Vec<Vec<String>> = Vec::new();
  let mut directives = Vec::new();

  for (index, line) in text.lines().enumerate() {
    if let Some(caps) = INCLUDE_RE.captures(line) {
      let spelling = caps[2].trim().to_string();
      let angled = &caps[1] == "<";
      let optional = !angled && frames.iter().any(|f| f.contains(&spelling));
      directives.push(IncludeDirective {
        spelling,
        angled,
        line: index + 1,
        optional,
      });
      continue;
    }

    let Some(caps) = DIRECTIVE_RE.captures(line) else {
      continue;
    };
    let condition = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    match &caps[1] {
      "if" | "ifdef" | "ifndef" => frames.push(guarded_spellings(condition)),
      "elif" | "elifdef" | "elifndef" => {
        if let Some(top) = frames.last_mut() {
          *top = guarded_spellings(condition);
        }
      }
      "else" => {
        if let Some(top) = frames.last_mut() {
          top.clear();
        }
      }
      "endif" => {
        frames.pop();
      }
      _ => {}
    }
  }

  directives
}

fn guarded_spellings(condition: &str) -> Vec<String> {
  HAS_INCLUDE_RE
    .captures_iter(condition)
    .map(|c| c[1].trim().to_string())
    .collect()
}

/// Replace the contents of `/* ... */` comments with spaces, keeping line breaks.
fn blank_block_comments(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut chars = text.chars().peekable();
  let mut in_comment = false;

  while let Some(c) = chars.next() {
    if in_comment {
      if c == '*' && chars.peek() == Some(&'/') {
        chars.next();
        out.push_str("  ");
        in_comment = false;
      } else if c == '\n' {
        out.push('\n');
      } else {
        out.push(' ');
      }
    } else if c == '/' && chars.peek() == Some(&'*') {
      chars.next();
      out.push_str("  ");
      in_comment = true;
    } else {
      out.push(c);
    }
  }

  out
}
