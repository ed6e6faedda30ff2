// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod cli;
pub mod network;
pub mod process;
pub mod ssh;
pub mod terminal;
