use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed feed: {0}")]
    Malformed(String),
}

/// One option/size combination of a product, as the feed exposes it.
#[derive(Debug, Clone, Deserialize)]
pub struct VariantRecord {
    pub id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub option1: Option<String>,
    #[serde(default)]
    pub option2: Option<String>,
    #[serde(default)]
    pub option3: Option<String>,
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub inventory_quantity: Option<i64>,
}

/// Internal catalog shape every source parses into before the keyword
/// matcher runs. Sitemap and Atom entries carry no variants; the locator
/// follows up with the product detail document for those.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub title: String,
    pub handle: String,
    pub url: Option<String>,
    pub updated_at: Option<String>,
    pub variants: Vec<VariantRecord>,
}

#[derive(Debug, Deserialize)]
struct ProductFeed {
    #[serde(default)]
    products: Vec<FeedProduct>,
}

#[derive(Debug, Deserialize)]
struct FeedProduct {
    title: String,
    handle: String,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    variants: Vec<VariantRecord>,
}

#[derive(Debug, Deserialize)]
struct ProductDetail {
    product: FeedProduct,
}

/// `/products.json` — the structured product feed.
pub fn parse_products_json(body: &str) -> Result<Vec<CatalogEntry>, FeedError> {
    let feed: ProductFeed =
        serde_json::from_str(body).map_err(|err| FeedError::Malformed(err.to_string()))?;
    Ok(feed.products.into_iter().map(entry_from_product).collect())
}

/// `/products/<handle>.json` — one product's detail document.
pub fn parse_product_detail(body: &str) -> Result<CatalogEntry, FeedError> {
    let detail: ProductDetail =
        serde_json::from_str(body).map_err(|err| FeedError::Malformed(err.to_string()))?;
    Ok(entry_from_product(detail.product))
}

fn entry_from_product(product: FeedProduct) -> CatalogEntry {
    CatalogEntry {
        title: product.title,
        handle: product.handle,
        url: None,
        updated_at: product.updated_at,
        variants: product.variants,
    }
}

/// `sitemap_products_1.xml` — product URLs plus image titles. Non-product
/// URLs (the sitemap's leading site-root entry in particular) are dropped.
pub fn parse_sitemap(body: &str) -> Result<Vec<CatalogEntry>, FeedError> {
    let document = Html::parse_document(body);
    let url_sel = selector("url");
    let mut entries = Vec::new();
    for node in document.select(&url_sel) {
        let Some(loc) = child_text(node, |name| name == "loc") else {
            continue;
        };
        if !loc.contains("/products/") {
            continue;
        }
        let title = child_text(node, |name| name.ends_with("title")).unwrap_or_default();
        let updated_at = child_text(node, |name| name == "lastmod");
        entries.push(CatalogEntry {
            handle: handle_from_url(&loc),
            title,
            url: Some(loc),
            updated_at,
            variants: Vec::new(),
        });
    }
    Ok(entries)
}

/// `collections/all.atom` — same entry shape, different envelope.
pub fn parse_atom(body: &str) -> Result<Vec<CatalogEntry>, FeedError> {
    let document = Html::parse_document(body);
    let entry_sel = selector("entry");
    let mut entries = Vec::new();
    for node in document.select(&entry_sel) {
        let Some(title) = child_text(node, |name| name == "title") else {
            continue;
        };
        let url = node
            .select(&selector("link"))
            .next()
            .and_then(|link| link.value().attr("href"))
            .map(str::to_string);
        let updated_at = child_text(node, |name| name == "updated");
        let handle = url.as_deref().map(handle_from_url).unwrap_or_default();
        entries.push(CatalogEntry {
            title,
            handle,
            url,
            updated_at,
            variants: Vec::new(),
        });
    }
    Ok(entries)
}

fn selector(css: &str) -> Selector {
    // only called with static element names
    Selector::parse(css).expect("static selector")
}

fn child_text(node: ElementRef<'_>, name_matches: impl Fn(&str) -> bool) -> Option<String> {
    node.descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| name_matches(el.value().name()))
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

fn handle_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn products_json_parses_variants() {
        let body = r#"{"products":[{"title":"Air Foo Low White","handle":"air-foo-low-white",
            "updated_at":"2020-02-01T00:00:00Z",
            "variants":[{"id":123,"option1":"9","inventory_quantity":3}]}]}"#;
        let entries = parse_products_json(body).expect("feed");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].handle, "air-foo-low-white");
        assert_eq!(entries[0].variants[0].id, 123);
        assert_eq!(entries[0].variants[0].option1.as_deref(), Some("9"));
    }

    #[test]
    fn products_json_tolerates_empty_catalog() {
        let entries = parse_products_json(r#"{"products":[]}"#).expect("feed");
        assert!(entries.is_empty());
    }

    #[test]
    fn products_json_rejects_garbage() {
        assert!(parse_products_json("<html>soft ban page</html>").is_err());
    }

    #[test]
    fn product_detail_parses() {
        let body = r#"{"product":{"title":"Air Foo","handle":"air-foo",
            "variants":[{"id":9,"option1":"10.5"}]}}"#;
        let entry = parse_product_detail(body).expect("detail");
        assert_eq!(entry.title, "Air Foo");
        assert_eq!(entry.variants.len(), 1);
    }

    #[test]
    fn sitemap_skips_non_product_urls() {
        let body = r#"<?xml version="1.0"?>
        <urlset>
          <url><loc>https://shop.example.com/</loc></url>
          <url>
            <loc>https://shop.example.com/products/air-foo-low-white</loc>
            <lastmod>2020-02-01</lastmod>
            <image:image><image:title>Air Foo Low White</image:title></image:image>
          </url>
        </urlset>"#;
        let entries = parse_sitemap(body).expect("sitemap");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].handle, "air-foo-low-white");
        assert_eq!(entries[0].title, "Air Foo Low White");
        assert!(entries[0].variants.is_empty());
    }

    #[test]
    fn atom_entries_parse() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
        <feed xmlns="http://www.w3.org/2005/Atom">
          <title>Products</title>
          <entry>
            <title>Air Foo Low White</title>
            <link href="https://shop.example.com/products/air-foo-low-white"/>
            <updated>2020-02-01T00:00:00Z</updated>
          </entry>
        </feed>"#;
        let entries = parse_atom(body).expect("atom");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Air Foo Low White");
        assert_eq!(entries[0].handle, "air-foo-low-white");
    }
}
