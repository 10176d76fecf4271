// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// A per-run file that is removed when the guard goes out of scope.
///
/// The file does not need to exist yet; a missing file on drop is not an error.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(target: "cart_runner.render", path = %self.path.display(), "Removed scratch file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                target: "cart_runner.render",
                path = %self.path.display(),
                error = %e,
                "Could not remove scratch file"
            ),
        }
    }
}
