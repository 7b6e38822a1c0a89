//! Client-side JWT inspection.
//!
//! Tokens are decoded without verifying the signature: the server verifies
//! signatures, the client only reads claims and checks expiry before
//! trusting them.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, deserialize_with = "string_or_number")]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "numeric_date")]
    pub exp: Option<i64>,
    #[serde(default, deserialize_with = "numeric_date")]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Authenticated user as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl Claims {
    pub fn user(&self) -> User {
        User {
            id: self.sub.clone().unwrap_or_default(),
            email: self.email.clone(),
            name: self.name.clone(),
        }
    }
}

// Some backends issue numeric subject ids.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// NumericDate may carry fractional seconds. Rounding up keeps `exp > now`
// exact for whole-second clocks.
fn numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.ceil() as i64)),
        _ => None,
    })
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')).ok()
}

/// Decode a JWT into its claims. Returns `None` for anything that is not
/// three base64url segments with a JSON object header and payload.
pub fn decode(token: &str) -> Option<Claims> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return None;
    }

    let header = decode_segment(segments[0])?;
    serde_json::from_slice::<Map<String, Value>>(&header).ok()?;

    let payload = decode_segment(segments[1])?;
    decode_segment(segments[2])?;

    serde_json::from_slice(&payload).ok()
}

/// A token is valid iff it decodes and its `exp` lies strictly after `now`
/// (unix seconds). Tokens without `exp` are never valid.
pub fn is_token_valid_at(token: &str, now: i64) -> bool {
    decode(token)
        .and_then(|c| c.exp)
        .map(|exp| exp > now)
        .unwrap_or(false)
}

pub fn is_token_valid(token: &str) -> bool {
    is_token_valid_at(token, chrono::Utc::now().timestamp())
}

/// Remaining lifetime of a token, or `None` if it is invalid or expired.
pub fn expires_in(token: &str) -> Option<chrono::Duration> {
    let exp = decode(token)?.exp?;
    let remaining = exp - chrono::Utc::now().timestamp();
    (remaining > 0).then(|| chrono::Duration::seconds(remaining))
}
