// Wire schema for the site API.
//
// Field names follow the JSON contract (`createdAt`, string `port`).
// Fields are loose here: older backends send `port` as a
// number, omit `createdAt`, or return `null` for `url`. Strict typing is
// applied in `wpfleet_core::convert`, never in this module.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A site as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSite {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    /// Reachable URL; `""` when the site is not running.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        serialize_with = "opt_string_or_empty"
    )]
    pub url: Option<String>,
    /// Host port, transmitted as a string; `""` when unassigned.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        serialize_with = "opt_string_or_empty"
    )]
    pub port: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
    /// ISO-8601 creation timestamp.
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub created_at: Option<String>,
    /// Last lifecycle failure, if any.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<String>,
}

/// `GET /api/sites` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteList {
    #[serde(default)]
    pub sites: Vec<ApiSite>,
    /// Registry version the list was read at (absent on older backends).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// `GET /api/sites/changes` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteChanges {
    pub version: u64,
    #[serde(default)]
    pub sites: Vec<ApiSite>,
}

/// `{ site }` envelope used by create and single-site reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub site: ApiSite,
}

/// Single-site body: wrapped `{ site }` or the bare object some
/// backends return from `GET /api/sites/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SiteBody {
    Wrapped(SiteEnvelope),
    Bare(ApiSite),
}

impl SiteBody {
    pub fn into_site(self) -> ApiSite {
        match self {
            Self::Wrapped(envelope) => envelope.site,
            Self::Bare(site) => site,
        }
    }
}

/// Acknowledgement for start / stop / delete.
///
/// Both fields are optional: a `204 No Content` delete yields the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<ApiSite>,
}

/// `POST /api/sites` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSiteRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Structured error payload: `{ "error": "...", "code": "busy" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

// ── Lenient (de)serializers ─────────────────────────────────────────

/// Scalar JSON value as a string; `null` becomes `""`.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(lenient_opt_string(deserializer)?.unwrap_or_default())
}

/// Scalar JSON value as an optional string. Numbers and booleans are
/// stringified; `null` and `""` become `None`.
fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) if s.is_empty() => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a scalar, got {other}"
            )));
        }
    })
}

#[allow(clippy::ref_option)]
fn opt_string_or_empty<S: Serializer>(
    value: &Option<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value.as_deref().unwrap_or(""))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn numeric_port_and_missing_fields_are_tolerated() {
        let site: ApiSite = serde_json::from_value(json!({
            "id": "abc123",
            "name": "Blog",
            "port": 8001,
            "url": null,
            "status": "running"
        }))
        .unwrap();

        assert_eq!(site.port.as_deref(), Some("8001"));
        assert_eq!(site.url, None);
        assert_eq!(site.created_at, None);
        assert_eq!(site.description, "");
    }

    #[test]
    fn absent_port_serializes_as_empty_string() {
        let site = ApiSite {
            id: "s1".into(),
            name: "Blog".into(),
            description: "My blog".into(),
            status: "created".into(),
            created_at: Some("2024-06-15T10:30:00Z".into()),
            ..ApiSite::default()
        };
        let value = serde_json::to_value(&site).unwrap();
        assert_eq!(value["port"], json!(""));
        assert_eq!(value["url"], json!(""));
        assert_eq!(value["createdAt"], json!("2024-06-15T10:30:00Z"));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn site_body_accepts_bare_and_wrapped_objects() {
        let bare: SiteBody = serde_json::from_value(json!({
            "id": "s1", "name": "Blog", "status": "created"
        }))
        .unwrap();
        let wrapped: SiteBody = serde_json::from_value(json!({
            "message": "Site created successfully",
            "site": { "id": "s1", "name": "Blog", "status": "created" }
        }))
        .unwrap();

        assert_eq!(bare.into_site().id, "s1");
        assert_eq!(wrapped.into_site().name, "Blog");
    }
}
