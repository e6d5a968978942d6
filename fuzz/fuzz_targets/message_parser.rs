//! Fuzz target for line parsing and framing
//!
//! Feeds arbitrary bytes through the line buffer and the parser; neither may
//! panic, and parsed lines must serialize back to a parseable line.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pibot::transport::LineBuffer;
use pibot::RawMessage;

fuzz_target!(|data: &[u8]| {
    let mut buffer = LineBuffer::new();
    buffer.extend(data);
    buffer.extend(b"\r\n");

    while let Some(line) = buffer.next_line() {
        let msg = RawMessage::parse(&line);
        if msg.is_empty() {
            continue;
        }
        let _ = RawMessage::parse(&msg.to_string());
    }
});
