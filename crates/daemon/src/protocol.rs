// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The tool-invocation protocol.
//!
//! Wire format: one JSON request per line on stdin, one JSON response per
//! line on stdout. A request names a tool and carries an argument map; a
//! response returns a text block (plus optional structured data) or an
//! error with a machine-readable kind tag.

mod args;
mod request;

pub use args::*;
pub use request::{Request, Response, ToolResult, WireError};

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
