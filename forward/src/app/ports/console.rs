// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Operator-facing output, kept apart from diagnostic logging.
pub trait ConsolePort: Send + Sync {
    fn info(&self, line: &str);
    fn warn(&self, line: &str);
}
