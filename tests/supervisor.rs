//! Socket-level tests for the connection supervisor.
//!
//! Each test plays the server on a local `TcpListener`.

use std::time::Duration;

use pibot::{Bot, BotConfig, BotError, User};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(10);

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn config(port: u16) -> BotConfig {
    let mut config = BotConfig::new("127.0.0.1", "#test");
    config.port = port;
    config.nick = "Bot".to_string();
    config.ping_timeout_secs = 1;
    config.reconnect_delay_secs = 0;
    config
}

struct Peer {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Peer {
        let (stream, _) = timeout(STEP, listener.accept()).await.unwrap().unwrap();
        let (reader, writer) = stream.into_split();
        Peer {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn next_line(&mut self) -> Option<String> {
        timeout(STEP, self.lines.next_line()).await.unwrap().unwrap()
    }

    /// Read until a line starting with `prefix` arrives.
    async fn expect(&mut self, prefix: &str) -> String {
        loop {
            match self.next_line().await {
                Some(line) if line.starts_with(prefix) => return line,
                Some(_) => continue,
                None => panic!("connection closed while waiting for {prefix:?}"),
            }
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n").await.unwrap();
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let result = timeout(STEP, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn test_registration_lines_sent_on_start() {
    let (listener, port) = listener().await;
    let bot = Bot::new(config(port));
    bot.raw("PRIVMSG #test :left over from before");

    bot.start().await.unwrap();
    let mut peer = Peer::accept(&listener).await;

    assert_eq!(peer.next_line().await.as_deref(), Some("NICK Bot"));
    assert_eq!(
        peer.next_line().await.as_deref(),
        Some("USER Bot Bot Bot :A Pi-powered IRC bot")
    );

    peer.send("PING :keepalive").await;
    assert_eq!(peer.expect("PONG").await, "PONG :keepalive");

    bot.stop();
}

#[tokio::test]
async fn test_ping_timeout_reconnects_once() {
    let (listener, port) = listener().await;
    let bot = Bot::new(config(port));

    bot.start().await.unwrap();
    let mut first = Peer::accept(&listener).await;
    first.expect("USER").await;

    first.send(":srv 001 Bot :Welcome").await;
    first.send(":Bot!bot@host JOIN #test").await;
    first.send(":srv 352 Bot #test alice h1 srv alice H :0 Alice").await;
    first.expect("WHO #test").await;
    eventually("alice to be tracked", || bot.members().len() == 1).await;
    assert_eq!(bot.members(), vec![User::new("alice", "alice", "h1")]);

    // Go silent; the watchdog fires after one second.
    let mut second = Peer::accept(&listener).await;
    assert_eq!(second.next_line().await.as_deref(), Some("NICK Bot"));

    let stats = bot.stats();
    assert_eq!(stats.starts, 2);
    assert_eq!(stats.stops, 1);
    assert_eq!(stats.generation, 2);
    assert!(bot.members().is_empty());
    assert!(!bot.is_joined());

    // The old connection is closed by the teardown.
    eventually_closed(&mut first).await;

    bot.stop();
}

async fn eventually_closed(peer: &mut Peer) {
    loop {
        match peer.next_line().await {
            None => return,
            Some(_) => continue,
        }
    }
}

#[tokio::test]
async fn test_fatal_error_halts_without_reconnect() {
    let (listener, port) = listener().await;
    let bot = Bot::new(config(port));

    bot.start().await.unwrap();
    let mut peer = Peer::accept(&listener).await;
    peer.expect("USER").await;

    peer.send(":srv 432 * Bot :Erroneous nickname").await;
    timeout(STEP, bot.halted()).await.expect("bot should halt");
    eventually_closed(&mut peer).await;

    let stats = bot.stats();
    assert_eq!(stats.starts, 1);
    assert_eq!(stats.stops, 1);
    assert!(!bot.is_connected());

    // Past the ping timeout nothing dials back in.
    let redial = timeout(Duration::from_millis(1500), listener.accept()).await;
    assert!(redial.is_err());
}

#[tokio::test]
async fn test_run_returns_after_stop() {
    let (listener, port) = listener().await;
    let bot = Bot::new(config(port));

    let runner = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.run().await })
    };
    let mut peer = Peer::accept(&listener).await;
    peer.expect("NICK").await;

    bot.stop();
    timeout(STEP, runner).await.unwrap().unwrap().unwrap();
    assert_eq!(bot.stats().stops, 1);
}

#[tokio::test]
async fn test_manual_reconnect() {
    let (listener, port) = listener().await;
    let mut config = config(port);
    config.ping_timeout_secs = 60;
    let bot = Bot::new(config);

    bot.start().await.unwrap();
    let mut first = Peer::accept(&listener).await;
    first.expect("USER").await;

    bot.reconnect(Duration::from_millis(50)).await.unwrap();
    let mut second = Peer::accept(&listener).await;
    second.expect("NICK Bot").await;
    eventually_closed(&mut first).await;

    let stats = bot.stats();
    assert_eq!((stats.starts, stats.stops), (2, 1));
    bot.stop();
}

#[tokio::test]
async fn test_start_reports_connect_failure() {
    let (listener, port) = listener().await;
    drop(listener);

    let bot = Bot::new(config(port));
    let err = bot.start().await.unwrap_err();
    assert!(matches!(err, BotError::Connect { .. }), "{err}");
    assert_eq!(bot.stats().starts, 0);
    timeout(STEP, bot.halted()).await.expect("failed start halts");
}

#[tokio::test]
async fn test_reconnect_not_blocked_by_stalled_writer() {
    let (listener, port) = listener().await;
    let bot = Bot::new(config(port));

    bot.start().await.unwrap();
    // Accepted but never read: the socket buffers fill and the sender stalls.
    let _first = Peer::accept(&listener).await;
    let filler = format!("PRIVMSG #test :{}", "x".repeat(400));
    for _ in 0..100_000 {
        bot.raw(filler.clone());
    }

    let mut second = Peer::accept(&listener).await;
    assert_eq!(second.next_line().await.as_deref(), Some("NICK Bot"));

    let stats = bot.stats();
    assert_eq!((stats.starts, stats.stops, stats.generation), (2, 1, 2));
    bot.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_reconnects_do_not_halt() {
    let (listener, port) = listener().await;
    let mut config = config(port);
    config.reconnect_delay_secs = 1;
    let bot = Bot::new(config);

    bot.start().await.unwrap();
    let mut peer = Peer::accept(&listener).await;
    peer.expect("USER").await;
    drop(peer);
    drop(listener);

    // Watchdog fires, then every redial is refused.
    let waiter = timeout(Duration::from_secs(4), bot.halted()).await;
    assert!(waiter.is_err(), "bot halted during recovery");
    let stats = bot.stats();
    assert_eq!((stats.starts, stats.stops), (1, 1));
    assert!(!bot.is_connected());

    bot.stop();
    timeout(STEP, bot.halted()).await.expect("stop halts");
}
