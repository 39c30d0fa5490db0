use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which catalog endpoint the monitor scans for a site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSource {
    #[default]
    ProductsJson,
    Sitemap,
    Atom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub url: String,
    pub label: String,
    #[serde(default)]
    pub source: CatalogSource,
    /// Overrides the built-in option-slot mapping for this storefront.
    #[serde(default)]
    pub option_index: Option<usize>,
}

impl Site {
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// A product query. Exactly one resolution path is active: a direct URL
/// beats a known variant id, which beats a keyword scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub pos_keywords: Vec<String>,
    #[serde(default)]
    pub neg_keywords: Vec<String>,
    #[serde(default)]
    pub variant_id: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
    /// On an ambiguous multi-match, proceed with the first entry in
    /// most-recently-updated order instead of failing.
    #[serde(default = "default_true")]
    pub pick_first: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Product {
    fn default() -> Self {
        Self {
            query: None,
            pos_keywords: Vec::new(),
            neg_keywords: Vec::new(),
            variant_id: None,
            url: None,
            pick_first: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub address1: String,
    #[serde(default)]
    pub address2: String,
    pub city: String,
    pub country: String,
    pub province: String,
    pub zip: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub number: String,
    pub cvv: String,
    pub month: u32,
    pub year: u32,
    pub holder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub email: String,
    pub shipping: Address,
    /// `None` means billing matches shipping.
    #[serde(default)]
    pub billing: Option<Address>,
    pub card: Card,
}

impl Profile {
    pub fn billing_address(&self) -> &Address {
        self.billing.as_ref().unwrap_or(&self.shipping)
    }
}

/// One purchase attempt as supplied by the caller (task file or UI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub site: Site,
    pub product: Product,
    pub profile: Profile,
    #[serde(default)]
    pub sizes: Vec<String>,
    #[serde(default)]
    pub proxies: Vec<String>,
    #[serde(default = "default_monitor_delay")]
    pub monitor_delay_ms: u64,
    #[serde(default = "default_error_delay")]
    pub error_delay_ms: u64,
}

fn default_monitor_delay() -> u64 {
    1000
}

fn default_error_delay() -> u64 {
    2000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Monitoring,
    CheckingOut,
    Success,
    Failed,
    Stopped,
}

/// Append-only task log entry.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl TaskEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

/// A concrete purchasable variant the monitor settled on.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedProduct {
    pub title: String,
    pub handle: String,
    pub url: String,
    pub variant_id: u64,
    pub size: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Processing,
    SoldOut,
    Incompatible,
    RateLimited,
    Declined,
    UnsupportedPaymentMethod,
    UnknownError,
}

impl Classification {
    pub fn is_success(self) -> bool {
        matches!(self, Classification::Processing)
    }
}

/// Emitted to notification collaborators on every terminal classification.
/// Fields are filled with whatever context was available at that point.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeEvent {
    pub task_id: Uuid,
    pub success: bool,
    pub classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    pub store: String,
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_spec_defaults() {
        let spec: TaskSpec = serde_json::from_value(serde_json::json!({
            "site": { "url": "https://kith.com/", "label": "Kith" },
            "product": { "pos_keywords": ["FOO"] },
            "profile": {
                "name": "main",
                "email": "jane@example.com",
                "shipping": {
                    "first_name": "Jane",
                    "last_name": "Doe",
                    "address1": "1 Main St",
                    "city": "New York",
                    "country": "United States",
                    "province": "New York",
                    "zip": "10001",
                    "phone": "5555550123"
                },
                "card": {
                    "number": "4111111111111111",
                    "cvv": "123",
                    "month": 4,
                    "year": 2030,
                    "holder": "Jane Doe"
                }
            }
        }))
        .expect("task spec");
        assert_eq!(spec.site.source, CatalogSource::ProductsJson);
        assert_eq!(spec.site.base_url(), "https://kith.com");
        assert!(spec.product.pick_first);
        assert_eq!(spec.monitor_delay_ms, 1000);
        assert!(spec.profile.billing.is_none());
        assert_eq!(spec.profile.billing_address().city, "New York");
    }
}
