// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Re-chunks a cart's source into a thread of bounded-length posts.
//!
//! Every post starts with `@<tag> `. When the whole source fits in one post
//! it is emitted as-is. Otherwise tokens are packed greedily and every post
//! ends with a `--<index>/<total>` counter. Line breaks that followed a token
//! are preserved; any other whitespace run collapses to a single space.
//!
//! Lengths are measured in Unicode scalar values.

/// Maximum length of a single post.
pub const MAX_CHUNK_CHARS: usize = 240;

/// One post of a segmented source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Full post text, tag prefix and counter suffix included.
    pub text: String,
    /// 1-based position in the thread.
    pub sequence_index: usize,
    /// Number of posts in the thread.
    pub total_count: usize,
}

/// Whitespace that followed a token in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gap {
    /// Continuation of a token that was split to fit; joins without whitespace.
    None,
    Space,
    Newlines(usize),
}

impl Gap {
    fn render(self) -> String {
        match self {
            Gap::None => String::new(),
            Gap::Space => " ".to_string(),
            Gap::Newlines(n) => "\n".repeat(n),
        }
    }
}

/// A whitespace-delimited token and the gap that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    text: String,
    gap: Gap,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn tokenize(body: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut current = String::new();
    let mut newlines = 0;

    for c in body.trim().chars() {
        if c.is_whitespace() {
            if c == '\n' {
                newlines += 1;
            }
            if !current.is_empty() {
                tokens.push(Token {
                    text: std::mem::take(&mut current),
                    gap: Gap::Space,
                });
            }
        } else {
            if current.is_empty() {
                if let Some(last) = tokens.last_mut() {
                    if newlines > 0 {
                        last.gap = Gap::Newlines(newlines);
                    }
                }
                newlines = 0;
            }
            current.push(c);
        }
    }

    if !current.is_empty() {
        tokens.push(Token {
            text: current,
            gap: Gap::Space,
        });
    }

    tokens
}

/// Split tokens that can never fit in a post on their own.
fn split_oversized(tokens: Vec<Token>, budget: usize) -> Vec<Token> {
    let budget = budget.max(1);
    let mut out = Vec::with_capacity(tokens.len());

    for token in tokens {
        if char_len(&token.text) <= budget {
            out.push(token);
            continue;
        }

        let chars: Vec<char> = token.text.chars().collect();
        let pieces: Vec<String> = chars.chunks(budget).map(|c| c.iter().collect()).collect();
        let last = pieces.len() - 1;
        for (i, text) in pieces.into_iter().enumerate() {
            out.push(Token {
                text,
                gap: if i == last { token.gap } else { Gap::None },
            });
        }
    }

    out
}

fn digits(mut n: usize) -> usize {
    let mut count = 1;
    while n >= 10 {
        n /= 10;
        count += 1;
    }
    count
}

/// Pack tokens into posts, reserving room for a counter of `counter_digits` digits.
fn pack(tokens: &[Token], prefix: &str, counter_digits: usize) -> Vec<String> {
    // "--" + index + "/" + total
    let reserve = 3 + 2 * counter_digits;
    let mut posts: Vec<String> = Vec::new();
    let mut current = prefix.to_string();
    let mut current_len = char_len(prefix);
    let mut has_payload = false;

    for token in tokens {
        let token_len = char_len(&token.text);
        let mut separator = token.gap.render();

        if has_payload
            && current_len + token_len + char_len(&separator) + reserve > MAX_CHUNK_CHARS
        {
            current.push_str(&format!("--{}/", posts.len() + 1));
            posts.push(std::mem::replace(&mut current, prefix.to_string()));
            current_len = char_len(prefix);
        }

        // Only the first token of a post can get here; keep at least one break
        let room = MAX_CHUNK_CHARS.saturating_sub(current_len + token_len + reserve);
        if char_len(&separator) > room {
            separator = separator.chars().take(room.max(1)).collect();
        }

        current.push_str(&token.text);
        current.push_str(&separator);
        current_len += token_len + char_len(&separator);
        has_payload = true;
    }

    current.push_str(&format!("--{}/", posts.len() + 1));
    posts.push(current);
    posts
}

/// Segment `body` into posts tagged with `@tag`.
///
/// Returns the post texts in thread order.
pub fn segment(body: &str, tag: &str) -> Vec<String> {
    segment_chunks(body, tag)
        .into_iter()
        .map(|chunk| chunk.text)
        .collect()
}

/// Segment `body` into [`Chunk`]s tagged with `@tag`.
pub fn segment_chunks(body: &str, tag: &str) -> Vec<Chunk> {
    let prefix = format!("@{} ", tag);
    let body = body.trim();

    if body.is_empty() {
        return vec![Chunk {
            text: format!("@{}", tag),
            sequence_index: 1,
            total_count: 1,
        }];
    }

    if char_len(&prefix) + char_len(body) <= MAX_CHUNK_CHARS {
        return vec![Chunk {
            text: format!("{}{}", prefix, body),
            sequence_index: 1,
            total_count: 1,
        }];
    }

    let mut counter_digits = 2;
    loop {
        let reserve = 3 + 2 * counter_digits;
        // Longest token that fits next to the prefix, one trailing newline and the counter
        let token_budget = MAX_CHUNK_CHARS.saturating_sub(char_len(&prefix) + reserve + 1);
        let tokens = split_oversized(tokenize(body), token_budget);
        let posts = pack(&tokens, &prefix, counter_digits);

        if digits(posts.len()) > counter_digits {
            counter_digits = digits(posts.len());
            continue;
        }

        let total = posts.len();
        return posts
            .into_iter()
            .enumerate()
            .map(|(i, mut text)| {
                text.push_str(&total.to_string());
                Chunk {
                    text,
                    sequence_index: i + 1,
                    total_count: total,
                }
            })
            .collect();
    }
}
