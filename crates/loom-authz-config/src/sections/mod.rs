// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod audit;
mod client;
mod evaluator;
mod http;
mod logging;

pub use audit::{AuditConfig, AuditConfigLayer, AuditSinkKind, AuditStrategyKind};
pub use client::{ClientConfig, ClientConfigLayer};
pub use evaluator::{EvaluatorConfig, EvaluatorConfigLayer};
pub use http::{HttpConfig, HttpConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
