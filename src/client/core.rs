// File: src/client/core.rs
use crate::client::CalendarSource;
use crate::client::transport::{self, HttpsClient};
use crate::config::Config;
use crate::model::RawEvent;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use http::{Method, Request, StatusCode, Uri, header};
use roxmltree::{Document, Node};
use std::time::Duration;
use tokio::sync::OnceCell;
use tower_http::auth::AddAuthorization;

const DAV_NS: &str = "DAV:";
const CALDAV_NS: &str = "urn:ietf:params:xml:ns:caldav";

const PRINCIPAL_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:current-user-principal/></d:prop></d:propfind>"#;

const HOME_SET_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav"><d:prop><c:calendar-home-set/></d:prop></d:propfind>"#;

const CALENDARS_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:displayname/><d:resourcetype/></d:prop></d:propfind>"#;

type AuthClient = AddAuthorization<HttpsClient>;

/// A calendar collection found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEntry {
    pub href: String,
    pub name: Option<String>,
}

/// Reads lesson events from a CalDAV calendar collection.
pub struct CalDavSource {
    client: AuthClient,
    base: Uri,
    calendar_name: Option<String>,
    /// Resolved collection URL; discovered on first fetch unless configured.
    calendar: OnceCell<Uri>,
    timeout: Duration,
}

impl CalDavSource {
    pub fn new(config: &Config) -> Result<Self> {
        let base: Uri = config
            .url
            .parse()
            .with_context(|| format!("Invalid CalDAV url '{}'", config.url))?;

        let calendar = OnceCell::new();
        if let Some(url) = &config.calendar_url {
            let uri: Uri = url
                .parse()
                .with_context(|| format!("Invalid calendar_url '{}'", url))?;
            let _ = calendar.set(uri);
        }

        let client = AddAuthorization::basic(
            transport::build_client()?,
            &config.username,
            &config.password,
        );

        Ok(Self {
            client,
            base,
            calendar_name: config.calendar_name.clone(),
            calendar,
            timeout: config.request_timeout(),
        })
    }

    async fn request(&self, method: Method, uri: &Uri, depth: Option<&str>, body: String) -> Result<String> {
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri.clone())
            .header(header::CONTENT_TYPE, "application/xml; charset=utf-8");
        if let Some(depth) = depth {
            builder = builder.header("Depth", depth);
        }
        let req = builder.body(body)?;

        let fetched = transport::send(self.client.clone(), req, self.timeout).await?;
        if fetched.status != StatusCode::MULTI_STATUS && !fetched.status.is_success() {
            anyhow::bail!("{} {} returned {}", method, uri, fetched.status);
        }
        Ok(fetched.body)
    }

    async fn propfind(&self, uri: &Uri, depth: &str, body: &str) -> Result<String> {
        let method = Method::from_bytes(b"PROPFIND")?;
        self.request(method, uri, Some(depth), body.to_string()).await
    }

    /// Lists the calendar collections of the authenticated user.
    pub async fn list_calendars(&self) -> Result<Vec<CalendarEntry>> {
        let xml = self.propfind(&self.base, "0", PRINCIPAL_BODY).await?;
        let principal = match first_href_in(&xml, DAV_NS, "current-user-principal")? {
            Some(href) => resolve_href(&self.base, &href)?,
            None => {
                log::debug!("No current-user-principal; searching from {}", self.base);
                self.base.clone()
            }
        };

        let xml = self.propfind(&principal, "0", HOME_SET_BODY).await?;
        let home = match first_href_in(&xml, CALDAV_NS, "calendar-home-set")? {
            Some(href) => resolve_href(&self.base, &href)?,
            None => principal,
        };

        let xml = self.propfind(&home, "1", CALENDARS_BODY).await?;
        parse_calendar_list(&xml)
    }

    /// Finds the collection to poll: the configured display name, else the first calendar.
    pub async fn discover_calendar(&self) -> Result<Uri> {
        let calendars = self.list_calendars().await?;

        let chosen = match &self.calendar_name {
            Some(wanted) => calendars.iter().find(|c| {
                c.name
                    .as_deref()
                    .is_some_and(|n| n.trim().eq_ignore_ascii_case(wanted.trim()))
            }),
            None => calendars.first(),
        };

        let Some(chosen) = chosen else {
            let names: Vec<&str> = calendars
                .iter()
                .map(|c| c.name.as_deref().unwrap_or(c.href.as_str()))
                .collect();
            anyhow::bail!(
                "Calendar {:?} not found (available: {})",
                self.calendar_name,
                names.join(", ")
            );
        };

        log::info!(
            "Using calendar '{}' at {}",
            chosen.name.as_deref().unwrap_or("?"),
            chosen.href
        );
        resolve_href(&self.base, &chosen.href)
    }

    async fn calendar(&self) -> Result<&Uri> {
        self.calendar
            .get_or_try_init(|| self.discover_calendar())
            .await
    }

    /// Fetches every event with an instance overlapping `[window_start, window_end]`.
    pub async fn fetch_window(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>> {
        let calendar = self.calendar().await?.clone();
        let body = calendar_query(window_start, window_end);
        let method = Method::from_bytes(b"REPORT")?;
        let xml = self.request(method, &calendar, Some("1"), body).await?;

        let mut events = Vec::new();
        for (href, data) in parse_calendar_data(&xml)? {
            match RawEvent::from_ics(&data) {
                Ok(parsed) => events.extend(parsed),
                Err(e) => log::warn!("Skipping malformed calendar object {}: {}", href, e),
            }
        }
        log::debug!("Fetched {} events from {}", events.len(), calendar);
        Ok(events)
    }
}

impl CalendarSource for CalDavSource {
    fn fetch(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<RawEvent>>> {
        Box::pin(self.fetch_window(window_start, window_end))
    }
}

fn calendar_query(window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> String {
    let fmt = "%Y%m%dT%H%M%SZ";
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop><d:getetag/><c:calendar-data/></d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">
        <c:time-range start="{}" end="{}"/>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#,
        window_start.format(fmt),
        window_end.format(fmt)
    )
}

/// Server hrefs are usually absolute paths; make them full URLs on the base host.
fn resolve_href(base: &Uri, href: &str) -> Result<Uri> {
    if let Ok(uri) = href.parse::<Uri>()
        && uri.scheme().is_some()
    {
        return Ok(uri);
    }
    let scheme = base.scheme_str().unwrap_or("https");
    let authority = base
        .authority()
        .ok_or_else(|| anyhow::anyhow!("Base url {} has no host", base))?;
    let path = if href.starts_with('/') {
        href.to_string()
    } else {
        format!("{}/{}", base.path().trim_end_matches('/'), href)
    };
    Ok(format!("{}://{}{}", scheme, authority, path).parse()?)
}

fn parse_xml(xml: &str) -> Result<Document<'_>> {
    Document::parse(xml).map_err(|e| anyhow::anyhow!("Invalid multistatus XML: {}", e))
}

fn text_of(node: Node<'_, '_>, ns: &str, name: &str) -> Option<String> {
    node.descendants()
        .find(|n| n.has_tag_name((ns, name)))
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn responses<'a, 'i>(doc: &'a Document<'i>) -> impl Iterator<Item = Node<'a, 'i>> {
    doc.descendants()
        .filter(|n| n.has_tag_name((DAV_NS, "response")))
}

/// The first `<d:href>` nested in a `<ns:prop_name>` property.
fn first_href_in(xml: &str, ns: &str, prop_name: &str) -> Result<Option<String>> {
    let doc = parse_xml(xml)?;
    Ok(doc
        .descendants()
        .find(|n| n.has_tag_name((ns, prop_name)))
        .and_then(|prop| text_of(prop, DAV_NS, "href")))
}

fn parse_calendar_list(xml: &str) -> Result<Vec<CalendarEntry>> {
    let doc = parse_xml(xml)?;
    let calendars = responses(&doc)
        .filter(|resp| {
            resp.descendants()
                .filter(|n| n.has_tag_name((DAV_NS, "resourcetype")))
                .any(|rt| rt.children().any(|c| c.has_tag_name((CALDAV_NS, "calendar"))))
        })
        .filter_map(|resp| {
            let href = resp
                .children()
                .find(|n| n.has_tag_name((DAV_NS, "href")))
                .and_then(|n| n.text())?
                .trim()
                .to_string();
            Some(CalendarEntry {
                href,
                name: text_of(resp, DAV_NS, "displayname"),
            })
        })
        .collect();
    Ok(calendars)
}

fn parse_calendar_data(xml: &str) -> Result<Vec<(String, String)>> {
    let doc = parse_xml(xml)?;
    Ok(responses(&doc)
        .filter_map(|resp| {
            let href = text_of(resp, DAV_NS, "href").unwrap_or_default();
            let data = resp
                .descendants()
                .find(|n| n.has_tag_name((CALDAV_NS, "calendar-data")))
                .and_then(|n| n.text())?;
            Some((href, data.to_string()))
        })
        .collect())
}
