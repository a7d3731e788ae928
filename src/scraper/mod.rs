pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::dates::{DateParser, YearPolicy};
use crate::models::Event;
use crate::venues::VenueProfile;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;
use tracing::{debug, info};

use self::cleaner::{apply_details, needs_details, row_to_event, CleanContext};
use self::http_client::HttpClient;
use self::parsers::{page_base_url, parse_detail_page, parse_listing_page};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable event source abstraction.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Venue id the events are attributed to.
    fn id(&self) -> &str;

    async fn fetch_events(&self) -> Result<Vec<Event>>;
}

// ── Generic HTML venue scraper ────────────────────────────────────────────────

pub struct VenueScraper {
    client: Arc<HttpClient>,
    profile: VenueProfile,
    year_policy: YearPolicy,
    description_max_chars: usize,
    /// Detail pages fetched per run; zero turns enrichment off.
    detail_page_limit: usize,
}

impl VenueScraper {
    pub fn new(
        client: Arc<HttpClient>,
        profile: VenueProfile,
        year_policy: YearPolicy,
        description_max_chars: usize,
    ) -> Self {
        Self {
            client,
            profile,
            year_policy,
            description_max_chars,
            detail_page_limit: 0,
        }
    }

    pub fn with_detail_pages(mut self, limit: usize) -> Self {
        self.detail_page_limit = limit;
        self
    }

    /// Visit event pages one at a time (each behind the client's polite
    /// delay) for events the listing left without a description.
    async fn fetch_details(&self, events: &mut [Event]) {
        let mut enriched = 0;
        let pending = events
            .iter_mut()
            .filter(|e| needs_details(e, &self.profile))
            .take(self.detail_page_limit);

        for event in pending {
            match self.client.get_text(&event.url).await {
                Ok(html) => {
                    let details = parse_detail_page(&html);
                    if apply_details(event, details, &self.profile, self.description_max_chars) {
                        enriched += 1;
                    }
                }
                Err(e) => debug!("{}: no details from {}: {}", self.profile.id, event.url, e),
            }
        }

        if enriched > 0 {
            info!("{}: {} events enriched from their own pages", self.profile.id, enriched);
        }
    }
}

#[async_trait]
impl EventSource for VenueScraper {
    fn id(&self) -> &str {
        &self.profile.id
    }

    async fn fetch_events(&self) -> Result<Vec<Event>> {
        let url = &self.profile.listing_url;
        debug!("{}: fetching {}", self.profile.id, url);

        let html = self
            .client
            .get_text(url)
            .await
            .with_context(|| format!("Failed to fetch listing page for {}", self.profile.id))?;

        let ctx = CleanContext {
            parser: DateParser::today(self.year_policy),
            base_url: None,
            description_max_chars: self.description_max_chars,
            scraped_at: Local::now().naive_local(),
        };
        let mut events = events_from_html(&html, &self.profile, ctx)?;
        if self.detail_page_limit > 0 {
            self.fetch_details(&mut events).await;
        }

        info!("{}: {} events on {}", self.profile.id, events.len(), url);
        Ok(events)
    }
}

/// Parse one listing page into normalized events. `ctx.base_url` is filled
/// from the page itself when left empty.
pub fn events_from_html(html: &str, profile: &VenueProfile, mut ctx: CleanContext) -> Result<Vec<Event>> {
    if ctx.base_url.is_none() {
        ctx.base_url = page_base_url(html, &profile.listing_url);
    }

    let rows = parse_listing_page(html, &profile.selectors)
        .with_context(|| format!("Failed to parse listing page for {}", profile.id))?;

    let total = rows.len();
    let events: Vec<Event> = rows
        .iter()
        .filter_map(|row| row_to_event(row, profile, &ctx))
        .collect();

    if events.len() < total {
        debug!("{}: kept {} of {} rows", profile.id, events.len(), total);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperConfig;
    use crate::venues::Catalogue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const LISTING: &str = r#"<html><body><ul>
        <li class="event"><h3>Delta Blues Revue</h3><span class="date">July 20, 2025</span>
            <a href="/events/blues">Details</a></li>
        <li class="event"><h3>Fado Evening</h3><span class="date">July 21, 2025</span>
            <p class="description">Portuguese fado with guitar and viola.</p>
            <a href="/events/fado">Details</a></li>
    </ul></body></html>"#;

    const BLUES_PAGE: &str = r#"<html><head>
        <meta property="og:description" content="A night of Delta blues with a full horn section.">
    </head><body></body></html>"#;

    /// Serve fixed pages on a local port; anything else is a 404.
    async fn serve(pages: Vec<(&'static str, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = match pages.iter().find(|(p, _)| *p == path) {
                    Some((_, body)) => ("200 OK", *body),
                    None => ("404 Not Found", ""),
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: text/html\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}")
    }

    fn scraper(base: &str) -> VenueScraper {
        let config = ScraperConfig {
            request_delay_ms: 0,
            jitter_ms: 0,
            max_retries: 0,
            ..ScraperConfig::default()
        };
        let mut profile = Catalogue::builtin().find("jericho-tavern").unwrap().clone();
        profile.listing_url = format!("{base}/events");
        VenueScraper::new(
            Arc::new(HttpClient::new(&config).unwrap()),
            profile,
            YearPolicy::RollForward,
            500,
        )
    }

    #[test]
    fn test_detail_pages_fill_missing_descriptions() {
        tokio_test::block_on(async {
            let base = serve(vec![("/events", LISTING), ("/events/blues", BLUES_PAGE)]).await;

            let events = scraper(&base).with_detail_pages(5).fetch_events().await.unwrap();
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].description, "A night of Delta blues with a full horn section.");
            assert_eq!(events[1].description, "Portuguese fado with guitar and viola.");

            let plain = scraper(&base).fetch_events().await.unwrap();
            assert_eq!(plain[0].description, "Delta Blues Revue");
        });
    }

    #[test]
    fn test_missing_listing_page_is_soft() {
        tokio_test::block_on(async {
            let base = serve(vec![]).await;
            let err = scraper(&base).fetch_events().await.unwrap_err();
            let fetch = err.downcast_ref::<http_client::FetchError>().unwrap();
            assert!(fetch.is_soft());
        });
    }
}
