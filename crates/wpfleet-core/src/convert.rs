// ── Wire-to-domain conversions ──
//
// The only place where loose wire fields become strong types. Ports
// arrive as strings (or numbers), timestamps may be missing or naive,
// statuses may be anything Docker ever reported.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use wpfleet_api::ApiSite;

use crate::error::CoreError;
use crate::model::{Site, SiteId, SiteStatus};

// ── Helpers ────────────────────────────────────────────────────────

/// `"8000"` -> 8000. Empty, zero and unparseable values mean no port.
pub fn parse_port(raw: Option<&str>) -> Option<u16> {
    raw.and_then(|s| s.trim().parse::<u16>().ok())
        .filter(|p| *p != 0)
}

/// RFC 3339, or a naive ISO-8601 timestamp taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ── ApiSite -> Site ────────────────────────────────────────────────

/// Convert a wire site, substituting `now` for a missing or invalid
/// `createdAt`.
pub fn site_from_api(api: ApiSite, now: DateTime<Utc>) -> Result<Site, CoreError> {
    if api.id.trim().is_empty() {
        return Err(CoreError::Internal(format!(
            "site {:?} has no id",
            api.name
        )));
    }
    let status = SiteStatus::parse_lenient(&api.status);
    let port = parse_port(api.port.as_deref());
    let url = if status == SiteStatus::Running {
        api.url.filter(|u| !u.trim().is_empty())
    } else {
        None
    };
    let created_at = api
        .created_at
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(now);

    Ok(Site {
        id: SiteId::new(api.id),
        name: api.name,
        description: api.description,
        port,
        status,
        url,
        created_at,
        error: api.error,
    })
}

/// Convert a whole list, keeping order and sharing one `now`.
pub fn sites_from_api(list: Vec<ApiSite>) -> Result<Vec<Site>, CoreError> {
    let now = Utc::now();
    list.into_iter().map(|s| site_from_api(s, now)).collect()
}

// ── Site -> ApiSite ────────────────────────────────────────────────

impl From<&Site> for ApiSite {
    fn from(site: &Site) -> Self {
        ApiSite {
            id: site.id.to_string(),
            name: site.name.clone(),
            description: site.description.clone(),
            url: site.url.clone(),
            port: site.port.map(|p| p.to_string()),
            status: site.status.to_string(),
            created_at: Some(format_timestamp(&site.created_at)),
            error: site.error.clone(),
        }
    }
}
