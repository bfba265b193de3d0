//! Marketplace lookups for a cataloged stamp.
//!
//! Builds search links for the marketplaces enabled in `export_options`.
//! With a `MarketplaceClient`, it also reads eBay sold listings: the top
//! listing title is run through the title parser to fill blank fields, and
//! the average sold price fills a blank `price`.

use crate::config::ExportOptions;
use crate::database::models::{StampRecord, StampUpdate};
use crate::database::{Database, DatabaseError};
use crate::services::enrichment::{enrich_from_title, Enrichment};
use crate::services::metadata::UNKNOWN_COUNTRY;
use scraper::{Html, Selector};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const EBAY_URL: &str = "https://www.ebay.com";
const USER_AGENT: &str = "Mozilla/5.0";

/// eBay renders a hidden template item with this title first.
const EBAY_PLACEHOLDER_TITLE: &str = "Shop on eBay";

#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("marketplace request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("marketplace returned HTTP {0}")]
    Status(u16),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Marketplace {
    Ebay,
    Colnect,
    HipStamp,
    StampWorld,
}

impl Marketplace {
    pub const ALL: [Marketplace; 4] = [
        Marketplace::Ebay,
        Marketplace::Colnect,
        Marketplace::HipStamp,
        Marketplace::StampWorld,
    ];

    pub fn enabled(&self, options: &ExportOptions) -> bool {
        match self {
            Marketplace::Ebay => options.ebay,
            Marketplace::Colnect => options.colnect,
            Marketplace::HipStamp => options.hipstamp,
            Marketplace::StampWorld => options.stampworld,
        }
    }

    pub fn search_url(&self, query: &str) -> String {
        let q = urlencoding::encode(query);
        match self {
            Marketplace::Ebay => format!("{}/sch/i.html?_nkw={}&LH_Sold=1", EBAY_URL, q),
            Marketplace::Colnect => format!("https://colnect.com/en/stamps/list/{}", q),
            Marketplace::HipStamp => {
                format!("https://www.hipstamp.com/search?keywords={}&show=store_items", q)
            }
            Marketplace::StampWorld => format!("https://www.stampworld.com/en/search/?q={}", q),
        }
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Marketplace::Ebay => "eBay (sold)",
            Marketplace::Colnect => "Colnect",
            Marketplace::HipStamp => "HipStamp",
            Marketplace::StampWorld => "StampWorld",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchLink {
    pub marketplace: Marketplace,
    pub url: String,
}

/// Search text for a stamp: its name, country and year, or the image file
/// name with underscores as spaces when those are all blank.
pub fn search_query(record: &StampRecord) -> String {
    let fields = &record.fields;
    let parts: Vec<&str> = [&fields.name, &fields.country, &fields.year]
        .into_iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && *s != UNKNOWN_COUNTRY)
        .collect();
    if !parts.is_empty() {
        return parts.join(" ");
    }

    Path::new(&record.image_path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', " ").trim().to_string())
        .unwrap_or_default()
}

pub fn search_links(record: &StampRecord, options: &ExportOptions) -> Vec<SearchLink> {
    let query = search_query(record);
    Marketplace::ALL
        .into_iter()
        .filter(|marketplace| marketplace.enabled(options))
        .map(|marketplace| SearchLink {
            marketplace,
            url: marketplace.search_url(&query),
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SoldListings {
    pub titles: Vec<String>,
    pub prices: Vec<f64>,
}

impl SoldListings {
    pub fn top_title(&self) -> Option<&str> {
        self.titles.first().map(String::as_str)
    }

    pub fn average_price(&self) -> Option<f64> {
        if self.prices.is_empty() {
            return None;
        }
        Some(self.prices.iter().sum::<f64>() / self.prices.len() as f64)
    }
}

/// Source of sold listings for a search query.
pub trait MarketplaceClient: Send + Sync {
    fn sold_listings(&self, query: &str) -> Result<SoldListings, MarketplaceError>;
}

/// Reads eBay's sold-items search page.
pub struct EbayClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl EbayClient {
    pub fn new(timeout: Duration) -> Result<Self, MarketplaceError> {
        Self::with_base_url(EBAY_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, MarketplaceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl MarketplaceClient for EbayClient {
    fn sold_listings(&self, query: &str) -> Result<SoldListings, MarketplaceError> {
        let url = format!("{}/sch/i.html", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("_nkw", query), ("_sop", "13"), ("LH_Sold", "1")])
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(MarketplaceError::Status(status.as_u16()));
        }
        Ok(parse_sold_listings(&response.text()?))
    }
}

/// Listing titles and single prices from an eBay results page, in page
/// order. Price ranges ("$1.00 to $4.00") are not a sold price and are
/// skipped.
pub fn parse_sold_listings(html: &str) -> SoldListings {
    let document = Html::parse_document(html);
    let (Ok(item_selector), Ok(title_selector), Ok(price_selector)) = (
        Selector::parse(".s-item"),
        Selector::parse(".s-item__title"),
        Selector::parse(".s-item__price"),
    ) else {
        return SoldListings::default();
    };

    let mut listings = SoldListings::default();
    for item in document.select(&item_selector) {
        let title = item
            .select(&title_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        if title.is_empty() || title == EBAY_PLACEHOLDER_TITLE {
            continue;
        }
        listings.titles.push(title);

        let price = item
            .select(&price_selector)
            .next()
            .and_then(|el| parse_price(&el.text().collect::<String>()));
        if let Some(price) = price {
            listings.prices.push(price);
        }
    }
    listings
}

pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .trim_start_matches("US")
        .chars()
        .filter(|c| !matches!(c, '$' | ','))
        .collect();
    cleaned.trim().parse::<f64>().ok().filter(|p| p.is_finite() && *p >= 0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lookup {
    pub query: String,
    pub links: Vec<SearchLink>,
    /// `None` when no client was given, eBay is disabled, or the fetch failed.
    pub listings: Option<SoldListings>,
    pub filled: Vec<&'static str>,
    pub record: StampRecord,
}

/// Search links for stamp `id`, plus enrichment from eBay sold listings
/// when a client is given and eBay is enabled. Fields that already hold a
/// value are never overwritten. A failed fetch is logged and leaves the
/// record untouched.
pub fn lookup(
    db: &Database,
    id: i64,
    options: &ExportOptions,
    client: Option<&dyn MarketplaceClient>,
) -> Result<Lookup, MarketplaceError> {
    let record = db.stamps().get(id)?;
    let query = search_query(&record);
    let links = search_links(&record, options);

    let mut lookup = Lookup {
        query,
        links,
        listings: None,
        filled: Vec::new(),
        record,
    };

    let Some(client) = client.filter(|_| options.ebay) else {
        return Ok(lookup);
    };
    if lookup.query.is_empty() {
        return Ok(lookup);
    }

    let listings = match client.sold_listings(&lookup.query) {
        Ok(listings) => listings,
        Err(e) => {
            log::warn!("Sold-listing lookup for stamp {} failed: {}", id, e);
            return Ok(lookup);
        }
    };

    if let Some(title) = listings.top_title() {
        let Enrichment { record, filled } = enrich_from_title(db, id, title)?;
        lookup.record = record;
        lookup.filled = filled;
    }

    if let Some(average) = listings.average_price() {
        if lookup.record.fields.price.trim().is_empty() {
            let update = StampUpdate {
                price: Some(format!("{:.2}", average)),
                ..Default::default()
            };
            lookup.record = db.stamps().update(id, &update)?;
            lookup.filled.push("price");
        }
    }

    lookup.listings = Some(listings);
    Ok(lookup)
}
