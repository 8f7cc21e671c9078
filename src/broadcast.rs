//! Fan-out publish of one signed event to many relays.
//!
//! Every relay gets its own connection and its own task; a dead or slow relay
//! can delay the aggregate result but never another relay's attempt, and a
//! failure on one never cancels the others.

use serde::Serialize;
use tracing::debug;

use crate::event::Event;
use crate::relay::{NetOpts, RelayConn};

/// Outcome of a single relay's publish attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayOutcome {
    pub url: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RelayOutcome {
    fn ok(url: &str) -> Self {
        Self {
            url: url.to_string(),
            success: true,
            error: None,
        }
    }

    fn failed(url: &str, error: String) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            error: Some(error),
        }
    }
}

/// Publish `ev` to every relay in `relays` concurrently.
///
/// Returns exactly one outcome per configured relay, in configured order,
/// regardless of the order tasks complete in. Each relay gets a single
/// attempt; there are no retries. The tasks are detached, so a caller that
/// stops polling the returned future does not cancel in-flight publishes.
pub async fn broadcast(ev: &Event, relays: &[String], opts: &NetOpts) -> Vec<RelayOutcome> {
    let mut handles = Vec::with_capacity(relays.len());
    for url in relays {
        let ev = ev.clone();
        let url = url.clone();
        let opts = opts.clone();
        handles.push(tokio::spawn(
            async move { publish_once(&ev, &url, &opts).await },
        ));
    }

    let mut outcomes = Vec::with_capacity(relays.len());
    for (url, handle) in relays.iter().zip(handles) {
        let outcome = match handle.await {
            Ok(Ok(())) => RelayOutcome::ok(url),
            Ok(Err(e)) => {
                debug!(relay = %url, error = %e, "publish failed");
                RelayOutcome::failed(url, e.to_string())
            }
            Err(e) => RelayOutcome::failed(url, format!("publish task failed: {e}")),
        };
        outcomes.push(outcome);
    }
    outcomes
}

/// Connect, publish, and close, in one task's scope. The connection is closed
/// whether or not the publish succeeded.
async fn publish_once(ev: &Event, url: &str, opts: &NetOpts) -> anyhow::Result<()> {
    let mut conn = RelayConn::connect(url, opts).await?;
    let result = conn.publish(ev, opts.ack_timeout).await;
    conn.close().await;
    result
}
