// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol for daemon communication.
//!
//! Wire format: one JSON object per line, UTF-8, `\n` terminator, 1 MiB
//! message cap. Unknown top-level fields are ignored on both sides.

mod command;
mod request;
mod response;
mod stream;
mod wire;

pub use command::Command;
pub use request::Request;
pub use response::Response;
pub use stream::{StreamEvent, StreamEventType};
pub use wire::{
    drain_oversized_line, read_message, write_message, ProtocolError, MAX_MESSAGE_BYTES,
};
