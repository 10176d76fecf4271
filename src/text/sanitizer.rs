// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Turns a post body into runnable cart source.
//!
//! Mentions of the bot are removed using the index ranges the platform
//! reports, except where they sit inside a string literal. Typographic
//! quotes are straightened, HTML entities decoded and `#include` lines
//! dropped (the emulator would try to read them from disk).

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

fn include_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*#include\s\S*").expect("include regex must be valid"))
}

fn call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+\([^()\n]*\)").expect("call regex must be valid"))
}

fn straighten(c: char) -> char {
    match c {
        '\u{201C}' | '\u{201D}' => '"',
        '\u{2018}' | '\u{2019}' => '\'',
        other => other,
    }
}

/// Sanitize `text`, dropping code points in `remove` (code-point indices,
/// half-open) unless they fall inside a string literal.
///
/// `remove` does not need to be sorted.
pub fn sanitize(text: &str, remove: &[Range<usize>]) -> String {
    let mut ranges: Vec<Range<usize>> = remove.iter().filter(|r| !r.is_empty()).cloned().collect();
    ranges.sort_by_key(|r| r.start);

    let mut out = String::with_capacity(text.len());
    let mut next_range = 0;
    let mut open_quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text.chars().enumerate() {
        let c = straighten(c);

        while next_range < ranges.len() && i >= ranges[next_range].end {
            next_range += 1;
        }
        let in_range = ranges
            .get(next_range)
            .is_some_and(|r| r.contains(&i));
        if in_range && open_quote.is_none() {
            continue;
        }

        match open_quote {
            Some(quote) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    open_quote = None;
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    open_quote = Some(c);
                }
            }
        }

        out.push(c);
    }

    let decoded = out
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&");
    let without_includes = include_regex().replace_all(&decoded, "");
    let trimmed = without_includes.trim();

    match trimmed.strip_prefix('.') {
        Some(rest) => rest.to_string(),
        None => trimmed.to_string(),
    }
}

/// Rough check for whether a post was meant as a cart at all.
///
/// Used to stay quiet when a conversational mention fails to render.
pub fn looks_like_code(text: &str) -> bool {
    call_regex().is_match(text) || text.contains('=') || text.contains("?'") || text.contains("?\"")
}
