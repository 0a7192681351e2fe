// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! GitHub App client issuing repository scoped installation tokens.

pub mod client;

pub use client::{parse_repository_url, validate_repository_url, GitHubClient};
