//! Fuzz target for the session state machine
//!
//! Arbitrary server lines must never panic the session, whatever phase it
//! is in.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pibot::state::Session;
use pibot::{AuthMethod, BotConfig, RawMessage};

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };

    let mut config = BotConfig::new("irc.example.com", "#fuzz");
    config.auth.method = match selector % 3 {
        0 => AuthMethod::None,
        1 => AuthMethod::NickServ,
        _ => AuthMethod::Sasl,
    };
    config.auth.password = "secret".to_string();

    let mut session = Session::new(&config);
    session.begin();

    for line in String::from_utf8_lossy(rest).lines() {
        let _ = session.feed(&RawMessage::parse(line));
    }
});
