// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Text processing for cart sources: cleaning inbound posts and
//! re-chunking source code into reply threads.

pub mod sanitizer;
pub mod segmenter;

pub use sanitizer::{looks_like_code, sanitize};
pub use segmenter::{segment, segment_chunks, Chunk, MAX_CHUNK_CHARS};
