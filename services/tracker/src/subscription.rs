//! Subscription rows and filter encoding.
//!
//! A subscription is one row of the `config` table: OAuth1 credentials plus
//! filter parameters.  The filter encoding is deliberately stable — set
//! members are sorted before joining — because the encoded string is both
//! the upstream POST body and the reconciler's change-detection token.

use serde::Deserialize;

use crate::oauth::{self, Credentials};

/// One parsed row of the `config` table.
///
/// Unknown keys in the stored JSON are ignored; a missing credential or a
/// non-string filter member is a deserialization error, which the reconciler
/// logs and retries on a later tick.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
    #[serde(flatten)]
    pub filter: FilterParams,
}

impl Subscription {
    pub fn credentials(&self) -> Credentials<'_> {
        Credentials {
            consumer_key: &self.consumer_key,
            consumer_secret: &self.consumer_secret,
            token: &self.access_token,
            token_secret: &self.access_secret,
        }
    }
}

/// Filter parameters recognized by the upstream filter endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FilterParams {
    #[serde(default)]
    pub follow: Vec<String>,
    #[serde(default)]
    pub track: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
}

impl FilterParams {
    /// Encode the filter as a form-urlencoded string with a canonical shape:
    /// keys in a fixed order, each set sorted and comma-joined, empty sets
    /// omitted.  Two filters with the same content always encode
    /// identically, so the result doubles as the subscription fingerprint.
    pub fn encode(&self) -> String {
        let keys = [
            ("follow", &self.follow),
            ("track", &self.track),
            ("locations", &self.locations),
        ];
        let mut pairs = Vec::new();
        for (key, values) in keys {
            if values.is_empty() {
                continue;
            }
            let mut sorted = values.clone();
            sorted.sort();
            pairs.push(format!("{}={}", key, form_encode(&sorted.join(","))));
        }
        pairs.join("&")
    }
}

/// Form-urlencode a value: RFC 3986 percent-encoding with spaces as `+`.
fn form_encode(value: &str) -> String {
    oauth::percent_encode(value).replace("%20", "+")
}
