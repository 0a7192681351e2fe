// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource types watched by the controller.

pub mod gitrepository;

pub use gitrepository::GitRepository;
