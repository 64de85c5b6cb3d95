use std::time::{Duration, Instant};

use tracing::trace;

use super::PoolableConnection;

#[derive(Debug)]
struct Idle<T> {
    at: Instant,
    inner: T,
}

impl<T> Idle<T> {
    fn new(inner: T) -> Self {
        Self {
            at: Instant::now(),
            inner,
        }
    }
}

/// Idle connections for a single endpoint, as a stack.
///
/// The most recently pushed connection is returned first: it is the least
/// likely to have been closed by the server.
#[derive(Debug)]
pub(super) struct IdleConnections<T> {
    inner: Vec<Idle<T>>,
}

impl<T> Default for IdleConnections<T> {
    fn default() -> Self {
        Self { inner: Vec::new() }
    }
}

impl<T> IdleConnections<T> {
    pub(super) fn push(&mut self, inner: T) {
        self.inner.push(Idle::new(inner));
    }

    /// Pop the most recently pushed open connection.
    ///
    /// Closed connections on top of the stack are discarded. If the top entry
    /// has been idle for longer than `idle_timeout`, every entry beneath it is
    /// older still, so the whole stack is discarded.
    pub(super) fn pop(&mut self, idle_timeout: Option<Duration>) -> Option<T>
    where
        T: PoolableConnection,
    {
        let mut expired_all = false;
        let mut idle_entry = None;

        if !self.is_empty() {
            let expired = idle_timeout
                .filter(|timeout| !timeout.is_zero())
                .and_then(|timeout| Instant::now().checked_sub(timeout));

            trace!("checking {} idle connections", self.len());

            while let Some(entry) = self.inner.pop() {
                if expired.map(|expired| entry.at < expired).unwrap_or(false) {
                    trace!("found expired connection");
                    expired_all = true;
                    break;
                }

                if entry.inner.is_open() {
                    trace!("found idle connection");
                    idle_entry = Some(entry.inner);
                    break;
                } else {
                    trace!("found closed connection");
                }
            }
        }

        if expired_all {
            self.clear();
        }

        idle_entry
    }

    /// Remove and return every idle connection.
    pub(super) fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.inner.drain(..).map(|entry| entry.inner)
    }

    pub(super) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(super) fn clear(&mut self) {
        self.inner.clear();
    }
}
