//! Concurrent multi-relay queries with first-match-wins resolution.
//!
//! A fetch operation opens its own connection to every configured relay,
//! subscribes every query on every connection that came up, and resolves each
//! query to the first accepted matching event from any relay. Queries that
//! nobody answers resolve to `None` at the soft deadline; a hard deadline
//! bounds the whole operation's wall-clock time.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::event::{Event, Filter};
use crate::relay::{NetOpts, RelayConn, RelayMessage};

/// Operation-level fetch failures. Absence of a matching event is not an
/// error; it surfaces as `None` in the result slots.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every connection attempt failed.
    #[error("no reachable relays")]
    NoReachableRelays,
}

type AcceptFn = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// One query raced across all reachable relays.
///
/// The `accept` predicate lets callers reject events whose content turns out
/// to be malformed; a rejected event simply does not match, and the search
/// continues on the same subscription.
#[derive(Clone)]
pub struct Query {
    pub filter: Filter,
    accept: AcceptFn,
}

impl Query {
    /// Query accepting any event the relay returns for `filter`.
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            accept: Arc::new(|_| true),
        }
    }

    /// Query with a content-validation predicate.
    pub fn with_accept<F>(filter: Filter, accept: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self {
            filter,
            accept: Arc::new(accept),
        }
    }
}

/// Deadlines for a fetch operation.
#[derive(Debug, Clone)]
pub struct FetchOpts {
    pub net: NetOpts,
    /// Per-query deadline: unresolved queries become `None` after this.
    pub soft_timeout: Duration,
    /// Whole-operation bound, applied even while several queries are pending.
    pub hard_timeout: Duration,
}

impl Default for FetchOpts {
    fn default() -> Self {
        Self {
            net: NetOpts::default(),
            soft_timeout: Duration::from_secs(4),
            hard_timeout: Duration::from_secs(15),
        }
    }
}

/// Fetch the first event matching `filter` from any of `relays`.
pub async fn fetch_first(
    relays: &[String],
    filter: Filter,
    opts: &FetchOpts,
) -> Result<Option<Event>, FetchError> {
    let mut slots = fetch_many(relays, vec![Query::new(filter)], opts).await?;
    Ok(slots.pop().flatten())
}

/// Race several queries over one shared set of relay connections.
///
/// Returns one slot per query, in query order. Fails only when not a single
/// relay could be reached; every other per-relay problem is logged and folded
/// into that relay dropping out of the race.
pub async fn fetch_many(
    relays: &[String],
    queries: Vec<Query>,
    opts: &FetchOpts,
) -> Result<Vec<Option<Event>>, FetchError> {
    // Phase 1: attempt a connection to every configured relay concurrently.
    let attempts = join_all(
        relays
            .iter()
            .map(|url| RelayConn::connect(url, &opts.net)),
    )
    .await;
    let mut conns = Vec::new();
    for (url, attempt) in relays.iter().zip(attempts) {
        match attempt {
            Ok(conn) => conns.push(conn),
            Err(e) => debug!(relay = %url, error = %e, "connect failed"),
        }
    }
    if conns.is_empty() {
        return Err(FetchError::NoReachableRelays);
    }
    if queries.is_empty() {
        for conn in conns {
            conn.close().await;
        }
        return Ok(Vec::new());
    }

    let start = Instant::now();
    let deadline = start + opts.soft_timeout.min(opts.hard_timeout);

    // Phase 2: subscribe every query on every live connection, then race.
    let accepts: Arc<Vec<AcceptFn>> = Arc::new(queries.iter().map(|q| q.accept.clone()).collect());
    let (tx, mut rx) = mpsc::channel::<(usize, Event)>(16);
    let mut readers = Vec::new();
    for mut conn in conns {
        let mut subscribed = true;
        for (idx, query) in queries.iter().enumerate() {
            if let Err(e) = conn.subscribe(&format!("q{idx}"), &query.filter).await {
                debug!(relay = %conn.url(), error = %e, "subscribe failed");
                subscribed = false;
                break;
            }
        }
        if !subscribed {
            conn.close().await;
            continue;
        }
        let tx = tx.clone();
        let accepts = accepts.clone();
        readers.push(tokio::spawn(async move {
            read_subscriptions(conn, accepts, tx).await;
        }));
    }
    drop(tx);

    let mut slots: Vec<Option<Event>> = vec![None; queries.len()];
    let mut pending = queries.len();
    while pending > 0 {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            recv = rx.recv() => match recv {
                Some((idx, ev)) => {
                    // First writer wins; later matches for the same query
                    // are ignored.
                    if slots[idx].is_none() {
                        slots[idx] = Some(ev);
                        pending -= 1;
                    }
                }
                None => {
                    // Every reader is gone. Unresolved queries still wait out
                    // the soft deadline before resolving to not-found.
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
            },
        }
    }

    // Teardown: dropping the reader tasks drops their connections, whichever
    // path ended the race.
    for handle in readers {
        handle.abort();
    }
    Ok(slots)
}

/// Forward accepted events from one connection into the race channel until
/// the connection ends or the race is over.
async fn read_subscriptions(
    mut conn: RelayConn,
    accepts: Arc<Vec<AcceptFn>>,
    tx: mpsc::Sender<(usize, Event)>,
) {
    while let Some(msg) = conn.next_message().await {
        match msg {
            Ok(RelayMessage::Event { sub_id, event }) => {
                let Some(idx) = sub_id.strip_prefix('q').and_then(|s| s.parse::<usize>().ok())
                else {
                    continue;
                };
                if idx >= accepts.len() {
                    continue;
                }
                if !(accepts[idx])(&event) {
                    debug!(relay = %conn.url(), sub = %sub_id, "event rejected by validator");
                    continue;
                }
                if tx.send((idx, event)).await.is_err() {
                    break;
                }
            }
            Ok(RelayMessage::Eose { sub_id }) => {
                // End of stored results is informational; live events may
                // still arrive on the same subscription.
                debug!(relay = %conn.url(), sub = %sub_id, "end of stored results");
            }
            Ok(_) => {}
            Err(e) => {
                debug!(relay = %conn.url(), error = %e, "read error");
                break;
            }
        }
    }
    conn.close().await;
}
