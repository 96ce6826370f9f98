// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod convert;
pub mod engine;
pub mod message;
pub mod observe;
pub mod policy;
pub mod proxy;
pub mod session;
pub mod stream;
pub mod tables;
