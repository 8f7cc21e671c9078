//! Nostr event model and subscription filters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind for profile metadata (JSON document in `content`).
pub const KIND_PROFILE: u32 = 0;
/// Kind for a plain short text note.
pub const KIND_NOTE: u32 = 1;
/// Kind for relay list metadata (`r` tags).
pub const KIND_RELAY_LIST: u32 = 10002;
/// Kind for a long-form article (replaceable, `d` tag).
pub const KIND_ARTICLE: u32 = 30023;
/// Kind for a Blossom upload authorization token.
pub const KIND_UPLOAD_AUTH: u32 = 24242;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and
/// the following elements hold data. Common examples include:
///
/// - `d` – unique identifier for replaceable events
/// - `t` – free-form topic or hashtag
/// - `r` – relay URL in relay list metadata
/// - `x` – hex content hash in upload authorizations
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from string-ish parts.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(parts.into_iter().map(Into::into).collect())
    }

    /// Return the tag value if the tag's discriminator matches `name`.
    pub fn value_for(&self, name: &str) -> Option<&str> {
        match self.0.as_slice() {
            [n, v, ..] if n == name => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Signed Nostr event as it travels over the wire.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "9f3a...",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["t", "news"], ["d", "slug"]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
///
/// Immutable once signed: the signature covers the canonical serialization of
/// the other fields, so nothing here is ever mutated after signing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash of the canonical form).
    pub id: String,
    /// Author public key (x-only, hex).
    pub pubkey: String,
    /// Kind number, e.g. `1` or `30023`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Arbitrary tags such as `d` (identifier) or `t` (topic).
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// First value of the first tag whose discriminator is `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags.iter().find_map(|t| t.value_for(name))
    }
}

/// Unsigned event payload handed to a [`crate::identity::Signer`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventTemplate {
    pub kind: u32,
    pub created_at: u64,
    pub tags: Vec<Tag>,
    pub content: String,
}

/// Subscription filter for `REQ` messages.
///
/// Only the fields the publisher needs are modeled: author, kind and a result
/// count limit. Unset fields are omitted from the JSON form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<u32>>,
    pub limit: Option<usize>,
}

impl Filter {
    /// Filter for the newest event of `kind` authored by `pubkey`.
    pub fn latest_by_author(kind: u32, pubkey: &str) -> Self {
        Filter {
            authors: Some(vec![pubkey.to_string()]),
            kinds: Some(vec![kind]),
            limit: Some(1),
        }
    }

    /// Encode the filter as the JSON object carried in a `REQ` message.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(a) = &self.authors {
            map.insert(
                "authors".into(),
                Value::Array(a.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(k) = &self.kinds {
            map.insert(
                "kinds".into(),
                Value::Array(k.iter().map(|v| Value::Number((*v).into())).collect()),
            );
        }
        if let Some(l) = self.limit {
            map.insert("limit".into(), Value::Number((l as u64).into()));
        }
        Value::Object(map)
    }
}
