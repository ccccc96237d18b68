//! Process signals the supervisor reacts to.

use std::io;

/// What a received signal asks the supervisor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Stop the database and exit.
    Terminate(&'static str),
    /// Log diagnostics and keep running.
    Diagnostics,
}

#[cfg(unix)]
pub struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    diagnostics: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
            diagnostics: signal(SignalKind::user_defined1())?,
        })
    }

    pub async fn recv(&mut self) -> Received {
        tokio::select! {
            _ = self.interrupt.recv() => Received::Terminate("SIGINT"),
            _ = self.terminate.recv() => Received::Terminate("SIGTERM"),
            _ = self.quit.recv() => Received::Terminate("SIGQUIT"),
            _ = self.diagnostics.recv() => Received::Diagnostics,
        }
    }
}

#[cfg(not(unix))]
pub struct Signals;

#[cfg(not(unix))]
impl Signals {
    pub fn install() -> io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> Received {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Received::Terminate("ctrl-c"),
            Err(_) => std::future::pending().await,
        }
    }
}
