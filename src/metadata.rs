//! Profile and relay-list discovery over a shared relay set.
//!
//! Both queries ride the same fetch operation: one connection set, two
//! subscriptions, each resolved independently. The discovery relay set is an
//! explicit input; callers typically pass the configured `DISCOVERY_RELAYS`.

use serde::Deserialize;

use crate::event::{Event, Filter, KIND_PROFILE, KIND_RELAY_LIST};
use crate::fetch::{fetch_many, FetchError, FetchOpts, Query};

/// Profile metadata carried as JSON in a kind-0 event's content.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Profile {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub about: Option<String>,
    pub picture: Option<String>,
    pub nip05: Option<String>,
}

/// Read/write capability advertised for a relay list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMarker {
    Read,
    Write,
    ReadWrite,
}

impl RelayMarker {
    pub fn can_read(self) -> bool {
        matches!(self, RelayMarker::Read | RelayMarker::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, RelayMarker::Write | RelayMarker::ReadWrite)
    }
}

/// One `r` tag from a kind-10002 relay list event.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayEntry {
    pub url: String,
    pub marker: RelayMarker,
}

/// Aggregated discovery result. Each part is independently optional.
#[derive(Debug, Clone, Default)]
pub struct UserMetadata {
    pub profile: Option<Profile>,
    pub relay_list: Option<Vec<RelayEntry>>,
}

/// Fetch profile and relay-list metadata for `pubkey` concurrently.
pub async fn fetch_user_metadata(
    relays: &[String],
    pubkey: &str,
    opts: &FetchOpts,
) -> Result<UserMetadata, FetchError> {
    let queries = vec![
        // Events whose content is not a valid profile document do not match;
        // the search continues for a usable one.
        Query::with_accept(Filter::latest_by_author(KIND_PROFILE, pubkey), |ev| {
            parse_profile(ev).is_some()
        }),
        Query::new(Filter::latest_by_author(KIND_RELAY_LIST, pubkey)),
    ];
    let mut slots = fetch_many(relays, queries, opts).await?;
    let relay_ev = slots.pop().flatten();
    let profile_ev = slots.pop().flatten();
    Ok(UserMetadata {
        profile: profile_ev.as_ref().and_then(parse_profile),
        relay_list: relay_ev.as_ref().map(parse_relay_list),
    })
}

/// Parse a kind-0 event's content as a profile document.
pub fn parse_profile(ev: &Event) -> Option<Profile> {
    serde_json::from_str(&ev.content).ok()
}

/// Extract relay entries from a kind-10002 event's `r` tags.
pub fn parse_relay_list(ev: &Event) -> Vec<RelayEntry> {
    ev.tags
        .iter()
        .filter_map(|t| match t.0.as_slice() {
            [name, url] if name == "r" => Some(RelayEntry {
                url: url.clone(),
                marker: RelayMarker::ReadWrite,
            }),
            [name, url, marker, ..] if name == "r" => Some(RelayEntry {
                url: url.clone(),
                marker: match marker.as_str() {
                    "read" => RelayMarker::Read,
                    "write" => RelayMarker::Write,
                    _ => RelayMarker::ReadWrite,
                },
            }),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;
    use crate::relay::NetOpts;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use std::time::Duration;
    use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

    fn event(kind: u32, content: &str, tags: Vec<Tag>) -> Event {
        Event {
            id: format!("id{kind}"),
            pubkey: "p1".into(),
            kind,
            created_at: 1,
            tags,
            content: content.into(),
            sig: String::new(),
        }
    }

    #[test]
    fn profile_parses_known_fields_and_tolerates_extras() {
        let ev = event(
            KIND_PROFILE,
            "{\"name\":\"amy\",\"about\":\"hi\",\"lud16\":\"x@y\"}",
            vec![],
        );
        let p = parse_profile(&ev).unwrap();
        assert_eq!(p.name.as_deref(), Some("amy"));
        assert_eq!(p.about.as_deref(), Some("hi"));
        assert!(p.picture.is_none());
    }

    #[test]
    fn malformed_profile_content_is_rejected() {
        assert!(parse_profile(&event(KIND_PROFILE, "{not json", vec![])).is_none());
        assert!(parse_profile(&event(KIND_PROFILE, "null", vec![])).is_none());
    }

    #[test]
    fn relay_list_markers() {
        let ev = event(
            KIND_RELAY_LIST,
            "",
            vec![
                Tag::new(["r", "wss://a"]),
                Tag::new(["r", "wss://b", "read"]),
                Tag::new(["r", "wss://c", "write"]),
                Tag::new(["t", "unrelated"]),
            ],
        );
        let list = parse_relay_list(&ev);
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].marker, RelayMarker::ReadWrite);
        assert!(list[0].marker.can_read() && list[0].marker.can_write());
        assert_eq!(list[1].marker, RelayMarker::Read);
        assert!(!list[1].marker.can_write());
        assert_eq!(list[2].marker, RelayMarker::Write);
        assert!(!list[2].marker.can_read());
    }

    #[tokio::test]
    async fn metadata_queries_resolve_over_one_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut subs = vec![];
            while subs.len() < 2 {
                if let Some(Ok(TMsg::Text(txt))) = ws.next().await {
                    let val: Value = serde_json::from_str(&txt).unwrap();
                    if val[0] == "REQ" {
                        subs.push(val[1].as_str().unwrap().to_string());
                    }
                }
            }
            // A garbage profile first, then a good one, then the relay list.
            let bad = event(KIND_PROFILE, "{broken", vec![]);
            let good = event(KIND_PROFILE, "{\"name\":\"amy\"}", vec![]);
            let relays = event(
                KIND_RELAY_LIST,
                "",
                vec![Tag::new(["r", "wss://a"]), Tag::new(["r", "wss://b", "read"])],
            );
            for (sub, ev) in [(&subs[0], &bad), (&subs[0], &good), (&subs[1], &relays)] {
                ws.send(TMsg::Text(
                    serde_json::json!(["EVENT", sub, ev]).to_string(),
                ))
                .await
                .unwrap();
            }
            while let Some(msg) = ws.next().await {
                if msg.is_err() {
                    break;
                }
            }
        });

        let opts = FetchOpts {
            net: NetOpts {
                connect_timeout: Duration::from_millis(500),
                ack_timeout: Duration::from_millis(500),
                tor_socks: None,
            },
            soft_timeout: Duration::from_secs(2),
            hard_timeout: Duration::from_secs(5),
        };
        let url = format!("ws://{}", addr);
        let meta = fetch_user_metadata(&[url], "p1", &opts).await.unwrap();
        assert_eq!(meta.profile.unwrap().name.as_deref(), Some("amy"));
        assert_eq!(meta.relay_list.unwrap().len(), 2);
        handle.abort();
    }
}
