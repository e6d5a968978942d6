//! Connection supervisor: start, stop, reconnect and the ping-timeout
//! watchdog.
//!
//! Each successful [`Bot::start`] creates a new connection *generation*: a
//! socket, a [`CancellationToken`], a sender task and a receiver task. Only
//! the supervisor replaces or closes that generation. A ping timeout detected
//! by the receiver leads to exactly one teardown and, after the configured
//! delay, exactly one new start. Fatal protocol errors and manual
//! [`Bot::stop`] calls halt the bot instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bot::Bot;
use crate::dispatch::{Event, Hook};
use crate::error::Result;
use crate::transport::{self, ReceiveOutcome};

/// Counters describing the supervisor's history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    /// Connections successfully opened.
    pub starts: u64,
    /// Live connections torn down, for any reason.
    pub stops: u64,
    /// Generation of the current (or last) connection; 0 before the first.
    pub generation: u64,
}

#[derive(Debug)]
struct Link {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
pub(crate) struct Supervisor {
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
    /// Serializes start and the reconnect sequence.
    lifecycle: tokio::sync::Mutex<()>,
    halted: watch::Sender<bool>,
}

impl Supervisor {
    pub(crate) fn new() -> Self {
        let (halted, _) = watch::channel(true);
        Self {
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
            starts: AtomicU64::new(0),
            stops: AtomicU64::new(0),
            lifecycle: tokio::sync::Mutex::new(()),
            halted,
        }
    }

    pub(crate) fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            starts: self.starts.load(Ordering::Acquire),
            stops: self.stops.load(Ordering::Acquire),
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.link.lock().is_some()
    }

    fn current_generation(&self) -> Option<u64> {
        self.link.lock().as_ref().map(|l| l.generation)
    }

    /// Cancel the live generation, if any. Returns whether one existed.
    fn teardown(&self) -> bool {
        let Some(link) = self.link.lock().take() else {
            return false;
        };
        link.cancel.cancel();
        self.stops.fetch_add(1, Ordering::AcqRel);
        debug!(generation = link.generation, "Connection torn down.");
        true
    }

    fn is_halted(&self) -> bool {
        *self.halted.borrow()
    }
}

impl Bot {
    /// Open a connection and start the sender and receiver.
    ///
    /// A live connection is torn down first. Lines left in the dispatch
    /// queue and requests opened against the previous connection are
    /// discarded; registration (and CAP LS when SASL is configured) is
    /// queued for the new one.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.supervisor().lifecycle.lock().await;
        let started = self.start_locked().await;
        if started.is_err() {
            self.supervisor().halted.send_replace(true);
        }
        started
    }

    async fn start_locked(&self) -> Result<()> {
        let supervisor = self.supervisor();
        supervisor.teardown();

        let stale = self.queue().clear().await;
        if !stale.is_empty() {
            debug!(dropped = stale.len(), "Discarded lines queued for the previous connection.");
        }
        self.correlator().close_all();

        let addr = self.config().address();
        info!("Connecting to {}...", addr);
        let stream = transport::connect(&addr).await?;

        let registration = self.begin_session();
        let (reader, writer) = stream.into_split();
        let cancel = CancellationToken::new();
        let generation = supervisor.generation.fetch_add(1, Ordering::AcqRel) + 1;

        *supervisor.link.lock() = Some(Link {
            generation,
            cancel: cancel.clone(),
        });
        supervisor.starts.fetch_add(1, Ordering::AcqRel);
        supervisor.halted.send_replace(false);

        let bot = self.clone();
        tokio::spawn(transport::send_loop(
            writer,
            self.queue().clone(),
            cancel.clone(),
            move |line| {
                bot.fire(Hook::RawMessageSent, &Event::RawSent(line.to_owned()));
            },
        ));

        let bot = self.clone();
        let ping_timeout = self.config().ping_timeout();
        tokio::spawn(async move {
            let outcome =
                transport::receive_loop(reader, cancel, ping_timeout, |line| bot.handle_line(line))
                    .await;
            if let ReceiveOutcome::PingTimeout { idle } = outcome {
                bot.on_ping_timeout(generation, idle);
            }
        });

        for line in registration {
            self.raw(line);
        }
        info!(generation, "Connected to {}.", addr);
        Ok(())
    }

    /// Tear the connection down and halt. No reconnect follows.
    pub fn stop(&self) {
        let supervisor = self.supervisor();
        if supervisor.teardown() {
            info!("Disconnected from {}.", self.config().network);
        }
        supervisor.halted.send_replace(true);
    }

    /// Tear down, wait `delay`, start again.
    pub async fn reconnect(&self, delay: Duration) -> Result<()> {
        {
            let _lifecycle = self.supervisor().lifecycle.lock().await;
            self.supervisor().teardown();
        }
        tokio::time::sleep(delay).await;
        self.start().await
    }

    /// Resolves once the bot is stopped with no reconnect pending: after a
    /// fatal protocol error, a manual [`Bot::stop`], or a failed start.
    pub async fn halted(&self) {
        let mut rx = self.supervisor().halted.subscribe();
        // The sender lives as long as the bot, so this only errs if the bot
        // is gone, in which case there is nothing left to wait for.
        let _ = rx.wait_for(|halted| *halted).await;
    }

    /// Start, then wait until the bot halts.
    pub async fn run(&self) -> Result<()> {
        self.start().await?;
        self.halted().await;
        Ok(())
    }

    pub fn stats(&self) -> SupervisorStats {
        self.supervisor().stats()
    }

    /// Whether a connection generation is live.
    pub fn is_connected(&self) -> bool {
        self.supervisor().is_connected()
    }

    fn on_ping_timeout(&self, generation: u64, idle: Duration) {
        let supervisor = self.supervisor();
        if supervisor.current_generation() != Some(generation) {
            // Superseded while the receiver was winding down.
            return;
        }

        error!(
            generation,
            idle_secs = idle.as_secs(),
            "Ping timeout: nothing received for {}s. Reconnecting.",
            idle.as_secs()
        );

        let bot = self.clone();
        let delay = self.config().reconnect_delay();
        tokio::spawn(async move { bot.recover(generation, delay).await });
    }

    /// Reconnect after a ping timeout, retrying with the same fixed delay
    /// while the server cannot be reached.
    async fn recover(&self, generation: u64, delay: Duration) {
        let supervisor = self.supervisor();
        {
            let _lifecycle = supervisor.lifecycle.lock().await;
            if supervisor.current_generation() != Some(generation) {
                return;
            }
            supervisor.teardown();
        }

        loop {
            tokio::time::sleep(delay).await;

            let _lifecycle = supervisor.lifecycle.lock().await;
            if supervisor.is_connected() || supervisor.is_halted() {
                // Restarted or stopped by someone else during the delay.
                return;
            }
            match self.start_locked().await {
                Ok(()) => return,
                Err(e) => {
                    error!(error = %e, "Reconnect failed; retrying in {}s.", delay.as_secs());
                }
            }
        }
    }
}
