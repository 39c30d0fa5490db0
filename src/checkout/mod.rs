pub mod forms;
pub mod session;

use crate::http::build_client;
use crate::models::{Classification, Profile, ResolvedProduct, Site};
use crate::proxy::ProxyPool;
use crate::rfrl::resolve_first_reject_last;
use forms::Form;
use once_cell::sync::Lazy;
use reqwest::cookie::Jar;
use serde::{Deserialize, Serialize};
use session::CheckoutSession;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

static CARD_SESSION_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("CARD_SESSION_URL")
        .unwrap_or_else(|_| "https://elb.deposit.shopifycs.com/sessions".to_string())
});

fn shipping_poll_delay() -> Duration {
    let ms = std::env::var("SHIPPING_POLL_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(3000);
    Duration::from_millis(ms)
}

/// A checkout step failed on every egress point. Non-fatal for the task
/// unless every slot was soft-banned; the supervisor sends the rest back
/// to monitoring.
#[derive(Debug, Error)]
#[error("checkout step `{step}` failed: {detail}")]
pub struct CheckoutError {
    pub step: &'static str,
    pub detail: String,
    rate_limited: bool,
}

impl CheckoutError {
    fn step(step: &'static str, detail: impl Into<String>) -> Self {
        Self {
            step,
            detail: detail.into(),
            rate_limited: false,
        }
    }

    /// True when every egress point was soft-banned; the supervisor
    /// treats that as a burned task rather than a retryable failure.
    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited
    }
}

/// Terminal result of one checkout attempt, with whatever context was
/// gathered by the time the attempt ended.
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub classification: Classification,
    pub message: Option<String>,
    pub price: Option<String>,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone, Error)]
enum AttemptError {
    #[error("rate limited")]
    RateLimited,
    #[error("transport: {0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
struct Page {
    url: String,
    status: u16,
    body: String,
}

#[derive(Debug, Serialize)]
struct CardPayload {
    credit_card: CardFields,
}

#[derive(Debug, Serialize)]
struct CardFields {
    number: String,
    verification_value: String,
    name: String,
    month: u32,
    year: u32,
}

#[derive(Debug, Deserialize)]
struct CardSession {
    id: String,
}

/// Add-to-cart responses flagging an unbuyable variant.
fn cart_add_sold_out(status: u16, body: &str) -> bool {
    status == 422 || body.to_ascii_lowercase().contains("sold out")
}

/// Final-response classification ladder, in priority order.
fn classify(final_url: &str, body: &str) -> (Classification, Option<String>) {
    if session::is_processing(body) {
        return (Classification::Processing, None);
    }
    if final_url.contains("paypal.com") {
        return (Classification::UnsupportedPaymentMethod, None);
    }
    if let Some(reason) = session::scrape_notice_text(body) {
        return (Classification::Declined, Some(reason));
    }
    (Classification::UnknownError, None)
}

/// Drives one attempt through the storefront's checkout protocol. Every
/// network step is raced across the task's proxy pool; all racing clients
/// of the attempt share one cookie jar so the storefront session survives
/// whichever egress point wins.
pub struct Checkout {
    site: Site,
    profile: Profile,
    product: ResolvedProduct,
    pool: ProxyPool,
    jar: Arc<Jar>,
    captcha_token: Option<String>,
}

impl Checkout {
    pub fn new(
        site: Site,
        profile: Profile,
        product: ResolvedProduct,
        pool: ProxyPool,
        captcha_token: Option<String>,
    ) -> Self {
        Self {
            site,
            profile,
            product,
            pool,
            jar: Arc::new(Jar::default()),
            captcha_token,
        }
    }

    pub async fn run(&self) -> Result<CheckoutOutcome, CheckoutError> {
        // 1: reserve the variant
        let cart_url = format!("{}/cart/add.js", self.site.base_url());
        let add_form: Form = vec![
            ("id", self.product.variant_id.to_string()),
            ("qty", "1".to_string()),
        ];
        let referer = format!("{}/", self.site.base_url());
        let page = self.step("add_to_cart", &cart_url, Some(add_form), &referer).await?;
        if cart_add_sold_out(page.status, &page.body) {
            return Ok(self.outcome(Classification::SoldOut, None, None, None));
        }
        if !(200..300).contains(&page.status) {
            return Err(CheckoutError::step(
                "add_to_cart",
                format!("HTTP {}", page.status),
            ));
        }
        info!(target = "talaria.checkout", product = %self.product.title, "added to cart");

        // 2: cart confirmation redirects into the checkout document
        let cart_page_url = format!("{}/cart", self.site.base_url());
        let checkout_form: Form = vec![
            ("quantity", "1".to_string()),
            ("checkout", "Checkout".to_string()),
        ];
        let page = self
            .step("open_checkout", &cart_page_url, Some(checkout_form), &referer)
            .await?;
        if page.url.contains("stock_problems") {
            return Ok(self.outcome(Classification::SoldOut, None, None, Some(page.url)));
        }
        let Some(mut session) = CheckoutSession::from_cart_redirect(&page.url, &page.body) else {
            return Err(CheckoutError::step(
                "open_checkout",
                format!("no checkout url in redirect target {}", page.url),
            ));
        };
        debug!(
            target = "talaria.checkout",
            checkout_id = %session.checkout_id,
            store_id = %session.store_id,
            branch = ?session.branch,
            "checkout session opened"
        );

        // 3: contact + shipping address, branch fixed for the attempt
        let contact = forms::contact_form(session.branch, &self.profile, &session.authenticity_token);
        let checkout_url = session.checkout_url.clone();
        let referer = session.referer();
        let page = self
            .step("submit_contact", &checkout_url, Some(contact), &referer)
            .await?;
        if let Some(token) = session::scrape_authenticity_token(&page.body) {
            session.authenticity_token = token;
        }

        // 4: shipping method, polled or direct
        let (rate_id, rate_token) = match self.resolve_shipping(&session, &page.body).await? {
            Some(found) => found,
            None => {
                return Ok(self.outcome(
                    Classification::Incompatible,
                    None,
                    session.total_price.clone(),
                    Some(session.checkout_url.clone()),
                ));
            }
        };
        if let Some(token) = rate_token {
            session.authenticity_token = token;
        }
        let ship_form = forms::shipping_form(&session.authenticity_token, &rate_id);
        let page = self
            .step("submit_shipping", &checkout_url, Some(ship_form), &referer)
            .await?;
        if let Some(price) = session::scrape_total_price(&page.body) {
            session.total_price = Some(price);
        }
        if let Some(token) = session::scrape_authenticity_token(&page.body) {
            session.authenticity_token = token;
        }
        let Some(gateway) = session::scrape_payment_gateway(&page.body) else {
            return Err(CheckoutError::step(
                "submit_shipping",
                "payment gateway id not found",
            ));
        };

        // 5: card tokenization, independent of the storefront session
        let card_session = self.tokenize_card().await?;

        // 6: order submission
        let order = forms::payment_form(
            &session.authenticity_token,
            &gateway,
            &card_session,
            self.profile.billing_address(),
            session.total_price.as_deref(),
            self.captcha_token.as_deref(),
        );
        let page = self
            .step("submit_order", &checkout_url, Some(order), &referer)
            .await?;

        // 7: classification
        let (classification, message) = classify(&page.url, &page.body);
        info!(
            target = "talaria.checkout",
            ?classification,
            price = session.total_price.as_deref().unwrap_or(""),
            "checkout attempt finished"
        );
        Ok(self.outcome(
            classification,
            message,
            session.total_price.clone(),
            Some(session.checkout_url.clone()),
        ))
    }

    fn outcome(
        &self,
        classification: Classification,
        message: Option<String>,
        price: Option<String>,
        checkout_url: Option<String>,
    ) -> CheckoutOutcome {
        crate::metrics::record_outcome(classification);
        CheckoutOutcome {
            classification,
            message,
            price,
            checkout_url,
        }
    }

    /// Returns `(rate_id, refreshed_token)` or `None` when the storefront
    /// exposes neither a poll target nor a direct option — in which case
    /// the caller must classify `Incompatible` without further calls.
    async fn resolve_shipping(
        &self,
        session: &CheckoutSession,
        contact_body: &str,
    ) -> Result<Option<(String, Option<String>)>, CheckoutError> {
        if let Some(target) = session::scrape_shipping_poll_target(contact_body) {
            let poll_url = format!("{}{}", session.host, target);
            debug!(target = "talaria.checkout", poll_url = %poll_url, "polling shipping rates");
            tokio::time::sleep(shipping_poll_delay()).await;
            let referer = session.referer();
            let page = self.step("poll_shipping", &poll_url, None, &referer).await?;
            let Some(rate_id) = session::scrape_polled_shipping_method(&page.body) else {
                return Err(CheckoutError::step(
                    "poll_shipping",
                    "no shipping rate after poll",
                ));
            };
            let token = session::scrape_shipping_form_token(&page.body);
            return Ok(Some((rate_id, token)));
        }
        if let Some(rate_id) = session::scrape_direct_shipping_method(contact_body) {
            let token = session::scrape_authenticity_token(contact_body);
            return Ok(Some((rate_id, token)));
        }
        Ok(None)
    }

    async fn tokenize_card(&self) -> Result<String, CheckoutError> {
        let card = &self.profile.card;
        let payload = CardPayload {
            credit_card: CardFields {
                number: card.number.clone(),
                verification_value: card.cvv.clone(),
                name: card.holder.clone(),
                month: card.month,
                year: card.year,
            },
        };
        let payload = Arc::new(payload);
        let attempts = self
            .pool
            .attempts()
            .into_iter()
            .map(|proxy| {
                let payload = payload.clone();
                async move {
                    // fresh client: the tokenization endpoint must not see
                    // the storefront's cookie jar
                    let client = build_client(proxy.as_ref(), None);
                    let response = client
                        .post(CARD_SESSION_URL.as_str())
                        .json(&*payload)
                        .send()
                        .await
                        .map_err(|err| AttemptError::Transport(err.to_string()))?;
                    if !response.status().is_success() {
                        return Err(AttemptError::Transport(format!(
                            "HTTP {}",
                            response.status()
                        )));
                    }
                    let parsed: CardSession = response
                        .json()
                        .await
                        .map_err(|err| AttemptError::Transport(err.to_string()))?;
                    Ok(parsed.id)
                }
            })
            .collect();
        resolve_first_reject_last(attempts)
            .await
            .map_err(|errors| step_failure("tokenize_card", errors))
    }

    /// One raced network step: every proxy in the pool issues the same
    /// request, the first completed response wins. A soft-ban status on a
    /// single slot is that slot's failure only.
    async fn step(
        &self,
        step: &'static str,
        url: &str,
        form: Option<Form>,
        referer: &str,
    ) -> Result<Page, CheckoutError> {
        let started = Instant::now();
        let attempts = self
            .pool
            .attempts()
            .into_iter()
            .map(|proxy| {
                let url = url.to_string();
                let form = form.clone();
                let jar = Some(self.jar.clone());
                let referer = referer.to_string();
                async move {
                    let client = build_client(proxy.as_ref(), jar);
                    let request = match &form {
                        Some(fields) => client.post(&url).form(fields),
                        None => client.get(&url),
                    };
                    let response = request
                        .header("Referer", referer)
                        .send()
                        .await
                        .map_err(|err| AttemptError::Transport(err.to_string()))?;
                    let status = response.status().as_u16();
                    if matches!(status, 403 | 429 | 430) {
                        return Err(AttemptError::RateLimited);
                    }
                    let final_url = response.url().to_string();
                    let body = response
                        .text()
                        .await
                        .map_err(|err| AttemptError::Transport(err.to_string()))?;
                    Ok(Page {
                        url: final_url,
                        status,
                        body,
                    })
                }
            })
            .collect();
        let result = resolve_first_reject_last(attempts)
            .await
            .map_err(|errors| step_failure(step, errors));
        crate::metrics::checkout_step_elapsed(step, started.elapsed().as_millis());
        result
    }
}

fn step_failure(step: &'static str, errors: Vec<Option<AttemptError>>) -> CheckoutError {
    let rate_limited = !errors.is_empty()
        && errors
            .iter()
            .all(|e| matches!(e, Some(AttemptError::RateLimited)));
    let detail = errors
        .iter()
        .flatten()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    CheckoutError {
        step,
        detail: if detail.is_empty() {
            "no egress available".to_string()
        } else {
            detail
        },
        rate_limited,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Address, Card, CatalogSource};

    fn checkout() -> Checkout {
        Checkout::new(
            Site {
                url: "https://shop.example.com".to_string(),
                label: "test".to_string(),
                source: CatalogSource::ProductsJson,
                option_index: Some(1),
            },
            Profile {
                name: "main".to_string(),
                email: "jane@example.com".to_string(),
                shipping: Address {
                    first_name: "Jane".to_string(),
                    last_name: "Doe".to_string(),
                    address1: "1 Main St".to_string(),
                    address2: String::new(),
                    city: "New York".to_string(),
                    country: "United States".to_string(),
                    province: "New York".to_string(),
                    zip: "10001".to_string(),
                    phone: "5555550123".to_string(),
                },
                billing: None,
                card: Card {
                    number: "4111111111111111".to_string(),
                    cvv: "123".to_string(),
                    month: 4,
                    year: 2030,
                    holder: "Jane Doe".to_string(),
                },
            },
            ResolvedProduct {
                title: "Air Foo Low White".to_string(),
                handle: "air-foo-low-white".to_string(),
                url: "https://shop.example.com/products/air-foo-low-white".to_string(),
                variant_id: 111,
                size: "9".to_string(),
            },
            ProxyPool::default(),
            None,
        )
    }

    fn session() -> CheckoutSession {
        CheckoutSession::from_cart_redirect(
            "https://shop.example.com/1234567/checkouts/feedface",
            "",
        )
        .expect("session")
    }

    #[tokio::test]
    async fn shipping_page_without_markers_is_incompatible() {
        let body = "<html><body><p>pick up in store only</p></body></html>";
        let resolved = checkout()
            .resolve_shipping(&session(), body)
            .await
            .expect("no step error");
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn direct_shipping_option_needs_no_poll() {
        let body = r#"<input name="authenticity_token" value="tok-ship"/>
            <div class="content-box__row">
              <div class="radio-wrapper" data-shipping-method="shopify-Standard-10.00"></div>
            </div>"#;
        let (rate_id, token) = checkout()
            .resolve_shipping(&session(), body)
            .await
            .expect("no step error")
            .expect("rate found");
        assert_eq!(rate_id, "shopify-Standard-10.00");
        assert_eq!(token.as_deref(), Some("tok-ship"));
    }

    #[test]
    fn processing_marker_wins_over_notice() {
        let body = r#"<input name="step" value="processing"/>
            <div class="notice--warning"><p class="notice__text">ignored</p></div>"#;
        let (classification, message) =
            classify("https://checkout.shopify.com/1/checkouts/x", body);
        assert_eq!(classification, Classification::Processing);
        assert!(message.is_none());
    }

    #[test]
    fn paypal_redirect_is_unsupported_payment() {
        let (classification, _) = classify("https://www.paypal.com/checkoutnow?token=x", "<html></html>");
        assert_eq!(classification, Classification::UnsupportedPaymentMethod);
    }

    #[test]
    fn notice_text_classifies_declined_with_reason() {
        let body = r#"<div class="notice--warning">
            <p class="notice__text">Your card was declined</p></div>"#;
        let (classification, message) = classify("https://shop.example.com/1/checkouts/x", body);
        assert_eq!(classification, Classification::Declined);
        assert_eq!(message.as_deref(), Some("Your card was declined"));
    }

    #[test]
    fn anything_else_is_unknown() {
        let (classification, message) =
            classify("https://shop.example.com/1/checkouts/x", "<html><body/></html>");
        assert_eq!(classification, Classification::UnknownError);
        assert!(message.is_none());
    }

    #[test]
    fn cart_add_sold_out_detection() {
        assert!(cart_add_sold_out(422, "{}"));
        assert!(cart_add_sold_out(200, r#"{"description":"Sold out"}"#));
        assert!(!cart_add_sold_out(200, r#"{"id":123}"#));
    }

    #[test]
    fn step_failure_flags_unanimous_soft_ban() {
        let err = step_failure(
            "open_checkout",
            vec![Some(AttemptError::RateLimited), Some(AttemptError::RateLimited)],
        );
        assert!(err.is_rate_limited());

        let mixed = step_failure(
            "open_checkout",
            vec![
                Some(AttemptError::RateLimited),
                Some(AttemptError::Transport("timeout".to_string())),
            ],
        );
        assert!(!mixed.is_rate_limited());
        assert!(mixed.detail.contains("timeout"));
    }

    #[test]
    fn card_payload_shape() {
        let payload = CardPayload {
            credit_card: CardFields {
                number: "4111111111111111".to_string(),
                verification_value: "123".to_string(),
                name: "Jane Doe".to_string(),
                month: 4,
                year: 2030,
            },
        };
        let value = serde_json::to_value(&payload).expect("json");
        assert_eq!(value["credit_card"]["verification_value"], "123");
        assert_eq!(value["credit_card"]["month"], 4);
    }
}
