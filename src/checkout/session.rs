use once_cell::sync::Lazy;
use scraper::{Html, Selector};

/// Which structural checkout flavor the storefront serves, fixed once per
/// attempt when the cart redirects into checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    HostedCheckout,
    EmbeddedCheckout,
}

impl Branch {
    pub fn detect(checkout_host: &str) -> Self {
        if checkout_host.contains("checkout.shopify.com") {
            Branch::HostedCheckout
        } else {
            Branch::EmbeddedCheckout
        }
    }
}

/// Ephemeral state of one checkout attempt. Lives from cart redirect to
/// terminal outcome; the authenticity token is always the most recently
/// scraped value.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub host: String,
    pub checkout_id: String,
    pub store_id: String,
    pub branch: Branch,
    pub authenticity_token: String,
    pub total_price: Option<String>,
}

impl CheckoutSession {
    /// Builds the session from the cart's redirect target and document.
    /// Returns `None` when the URL does not look like a checkout.
    pub fn from_cart_redirect(final_url: &str, body: &str) -> Option<Self> {
        let checkout_id = final_url
            .split("checkouts/")
            .nth(1)?
            .split(['?', '#'])
            .next()?
            .to_string();
        let host = host_of(final_url)?;
        let store_id = final_url.split('/').nth(3).unwrap_or_default().to_string();
        let authenticity_token = scrape_authenticity_token(body).unwrap_or_default();
        Some(Self {
            checkout_url: final_url.to_string(),
            branch: Branch::detect(&host),
            host,
            checkout_id,
            store_id,
            authenticity_token,
            total_price: scrape_total_price(body),
        })
    }

    /// Referer header value the embedded checkout expects.
    pub fn referer(&self) -> String {
        format!("{}/{}/checkouts/{}", self.host, self.store_id, self.checkout_id)
    }
}

fn host_of(url: &str) -> Option<String> {
    let scheme_end = url.find("://")? + 3;
    let host_end = url[scheme_end..]
        .find('/')
        .map(|i| scheme_end + i)
        .unwrap_or(url.len());
    Some(url[..host_end].to_string())
}

static SEL_EDIT_CHECKOUT_TOKEN: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"form.edit_checkout input[name="authenticity_token"]"#)
        .expect("static selector")
});
static SEL_ANY_TOKEN: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[name="authenticity_token"]"#).expect("static selector"));
static SEL_TOTAL_PRICE_TEXT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#checkout_total_price").expect("static selector"));
static SEL_TOTAL_PRICE_INPUT: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"input[name="checkout[total_price]"]"#).expect("static selector")
});
static SEL_POLL_TARGET: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"div[data-poll-refresh="[data-step=shipping_method]"]"#)
        .expect("static selector")
});
static SEL_DIRECT_SHIPPING: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.content-box__row .radio-wrapper").expect("static selector")
});
static SEL_ANY_SHIPPING: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".radio-wrapper").expect("static selector"));
static SEL_SHIPPING_FORM_TOKEN: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"form[data-shipping-method-form="true"] input[name="authenticity_token"]"#)
        .expect("static selector")
});
static SEL_PAYMENT_GATEWAY: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"input[name="checkout[payment_gateway]"]"#).expect("static selector")
});
static SEL_STEP_INPUT: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[name="step"]"#).expect("static selector"));
static SEL_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("static selector"));
static SEL_NOTICE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.notice--warning p.notice__text").expect("static selector")
});

fn attr_of(body: &str, selector: &Selector, attr: &str) -> Option<String> {
    let document = Html::parse_document(body);
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

fn text_of(body: &str, selector: &Selector) -> Option<String> {
    let document = Html::parse_document(body);
    document
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Most recent CSRF token; the form-scoped field wins over a bare input.
pub fn scrape_authenticity_token(body: &str) -> Option<String> {
    attr_of(body, &SEL_EDIT_CHECKOUT_TOKEN, "value")
        .or_else(|| attr_of(body, &SEL_ANY_TOKEN, "value"))
}

pub fn scrape_total_price(body: &str) -> Option<String> {
    attr_of(body, &SEL_TOTAL_PRICE_INPUT, "value")
        .or_else(|| text_of(body, &SEL_TOTAL_PRICE_TEXT))
}

/// Relative URL the shipping step asks us to poll, when rates are still
/// being computed server-side.
pub fn scrape_shipping_poll_target(body: &str) -> Option<String> {
    attr_of(body, &SEL_POLL_TARGET, "data-poll-target")
}

/// A shipping rate offered directly in the response, no poll needed.
pub fn scrape_direct_shipping_method(body: &str) -> Option<String> {
    attr_of(body, &SEL_DIRECT_SHIPPING, "data-shipping-method")
}

/// Rate id on the re-fetched shipping page after a poll.
pub fn scrape_polled_shipping_method(body: &str) -> Option<String> {
    attr_of(body, &SEL_ANY_SHIPPING, "data-shipping-method")
}

pub fn scrape_shipping_form_token(body: &str) -> Option<String> {
    attr_of(body, &SEL_SHIPPING_FORM_TOKEN, "value")
        .or_else(|| scrape_authenticity_token(body))
}

pub fn scrape_payment_gateway(body: &str) -> Option<String> {
    attr_of(body, &SEL_PAYMENT_GATEWAY, "value")
}

/// Payment accepted, confirmation pending.
pub fn is_processing(body: &str) -> bool {
    if attr_of(body, &SEL_STEP_INPUT, "value").as_deref() == Some("processing") {
        return true;
    }
    text_of(body, &SEL_TITLE)
        .map(|t| t.contains("Processing"))
        .unwrap_or(false)
}

/// Human-readable decline/warning reason, when present.
pub fn scrape_notice_text(body: &str) -> Option<String> {
    text_of(body, &SEL_NOTICE)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CART_BODY: &str = r#"<html><body>
        <form class="edit_checkout" action="">
          <input name="authenticity_token" value="tok-abc123"/>
        </form>
        <span id="checkout_total_price">$220.00</span>
    </body></html>"#;

    #[test]
    fn builds_session_from_cart_redirect() {
        let url = "https://checkout.shopify.com/1234567/checkouts/deadbeefcafe?step=contact_information";
        let session = CheckoutSession::from_cart_redirect(url, CART_BODY).expect("session");
        assert_eq!(session.host, "https://checkout.shopify.com");
        assert_eq!(session.checkout_id, "deadbeefcafe");
        assert_eq!(session.store_id, "1234567");
        assert_eq!(session.branch, Branch::HostedCheckout);
        assert_eq!(session.authenticity_token, "tok-abc123");
        assert_eq!(session.total_price.as_deref(), Some("$220.00"));
    }

    #[test]
    fn embedded_host_selects_embedded_branch() {
        let url = "https://shop.example.com/1234567/checkouts/feedface";
        let session = CheckoutSession::from_cart_redirect(url, CART_BODY).expect("session");
        assert_eq!(session.branch, Branch::EmbeddedCheckout);
        assert_eq!(
            session.referer(),
            "https://shop.example.com/1234567/checkouts/feedface"
        );
    }

    #[test]
    fn non_checkout_url_is_rejected() {
        assert!(CheckoutSession::from_cart_redirect("https://shop.example.com/cart", "").is_none());
    }

    #[test]
    fn poll_target_and_direct_option_are_distinguished() {
        let poll_body = r#"<div data-poll-refresh="[data-step=shipping_method]"
            data-poll-target="/1234/checkouts/abc/shipping_rates?step=shipping_method"></div>"#;
        assert_eq!(
            scrape_shipping_poll_target(poll_body).as_deref(),
            Some("/1234/checkouts/abc/shipping_rates?step=shipping_method")
        );
        assert!(scrape_direct_shipping_method(poll_body).is_none());

        let direct_body = r#"<div class="content-box__row">
            <div class="radio-wrapper" data-shipping-method="shopify-Standard-10.00"></div>
        </div>"#;
        assert_eq!(
            scrape_direct_shipping_method(direct_body).as_deref(),
            Some("shopify-Standard-10.00")
        );
        assert!(scrape_shipping_poll_target(direct_body).is_none());
    }

    #[test]
    fn incompatible_page_has_neither_marker() {
        let body = "<html><body><p>pick up in store only</p></body></html>";
        assert!(scrape_shipping_poll_target(body).is_none());
        assert!(scrape_direct_shipping_method(body).is_none());
    }

    #[test]
    fn payment_page_anchors() {
        let body = r#"<form data-payment-form="">
            <input name="authenticity_token" value="tok-pay"/>
            <input name="checkout[payment_gateway]" value="987654"/>
            <input name="checkout[total_price]" value="22000"/>
        </form>"#;
        assert_eq!(scrape_payment_gateway(body).as_deref(), Some("987654"));
        assert_eq!(scrape_total_price(body).as_deref(), Some("22000"));
        assert_eq!(scrape_authenticity_token(body).as_deref(), Some("tok-pay"));
    }

    #[test]
    fn processing_markers() {
        assert!(is_processing(r#"<input name="step" value="processing"/>"#));
        assert!(is_processing("<title>Processing order</title>"));
        assert!(!is_processing("<title>Payment declined</title>"));
    }

    #[test]
    fn notice_text_is_scraped_verbatim() {
        let body = r#"<div class="notice notice--warning">
            <p class="notice__text">Your card was declined</p>
        </div>"#;
        assert_eq!(
            scrape_notice_text(body).as_deref(),
            Some("Your card was declined")
        );
        assert!(scrape_notice_text("<div class=\"notice\"></div>").is_none());
    }
}
