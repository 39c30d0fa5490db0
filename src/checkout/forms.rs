use crate::checkout::session::Branch;
use crate::models::{Address, Profile};

pub type Form = Vec<(&'static str, String)>;

/// `(NNN) NNN-NNNN` for ten-digit numbers, unchanged otherwise.
pub fn format_us_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        format!("({}) {}-{}", &digits[0..3], &digits[3..6], &digits[6..10])
    } else {
        raw.to_string()
    }
}

/// Contact/shipping submission for the attempt's checkout branch. The two
/// schemes use different field inventories and stay separate on purpose.
pub fn contact_form(branch: Branch, profile: &Profile, authenticity_token: &str) -> Form {
    match branch {
        Branch::HostedCheckout => hosted_contact_form(profile, authenticity_token),
        Branch::EmbeddedCheckout => embedded_contact_form(profile, authenticity_token),
    }
}

fn hosted_contact_form(profile: &Profile, token: &str) -> Form {
    let ship = &profile.shipping;
    vec![
        ("_method", "patch".to_string()),
        ("authenticity_token", token.to_string()),
        ("button", String::new()),
        ("checkout[client_details][browser_width]", "979".to_string()),
        ("checkout[client_details][browser_height]", "631".to_string()),
        ("checkout[client_details][javascript_enabled]", "1".to_string()),
        ("checkout[email]", profile.email.clone()),
        ("checkout[shipping_address][address1]", ship.address1.clone()),
        ("checkout[shipping_address][address2]", ship.address2.clone()),
        ("checkout[shipping_address][city]", ship.city.clone()),
        ("checkout[shipping_address][country]", ship.country.clone()),
        ("checkout[shipping_address][first_name]", ship.first_name.clone()),
        ("checkout[shipping_address][last_name]", ship.last_name.clone()),
        ("checkout[shipping_address][phone]", ship.phone.clone()),
        ("checkout[shipping_address][province]", ship.province.clone()),
        ("checkout[shipping_address][zip]", ship.zip.clone()),
        ("previous_step", "contact_information".to_string()),
        ("remember_me", "false".to_string()),
        ("step", "shipping_method".to_string()),
        ("utf8", "\u{2713}".to_string()),
    ]
}

fn embedded_contact_form(profile: &Profile, token: &str) -> Form {
    let ship = &profile.shipping;
    vec![
        ("utf8", "\u{2713}".to_string()),
        ("_method", "patch".to_string()),
        ("authenticity_token", token.to_string()),
        ("button", String::new()),
        ("checkout[email]", profile.email.clone()),
        ("checkout[shipping_address][first_name]", ship.first_name.clone()),
        ("checkout[shipping_address][last_name]", ship.last_name.clone()),
        ("checkout[shipping_address][company]", String::new()),
        ("checkout[shipping_address][address1]", ship.address1.clone()),
        ("checkout[shipping_address][address2]", ship.address2.clone()),
        ("checkout[shipping_address][city]", ship.city.clone()),
        ("checkout[shipping_address][country]", ship.country.clone()),
        ("checkout[shipping_address][province]", ship.province.clone()),
        ("checkout[shipping_address][zip]", ship.zip.clone()),
        ("checkout[shipping_address][phone]", format_us_phone(&ship.phone)),
        ("checkout[remember_me]", "0".to_string()),
        ("checkout[client_details][browser_width]", "979".to_string()),
        ("checkout[client_details][browser_height]", "631".to_string()),
        ("checkout[client_details][javascript_enabled]", "1".to_string()),
        ("previous_step", "contact_information".to_string()),
        ("step", "shipping_method".to_string()),
    ]
}

/// Shipping rate selection, advancing to the payment step.
pub fn shipping_form(authenticity_token: &str, rate_id: &str) -> Form {
    vec![
        ("utf8", "\u{2713}".to_string()),
        ("_method", "patch".to_string()),
        ("authenticity_token", authenticity_token.to_string()),
        ("button", String::new()),
        ("previous_step", "shipping_method".to_string()),
        ("step", "payment_method".to_string()),
        ("checkout[shipping_rate][id]", rate_id.to_string()),
    ]
}

/// Final order submission: tokenized card session, gateway id, billing
/// address and the quoted total.
pub fn payment_form(
    authenticity_token: &str,
    gateway_id: &str,
    card_session_id: &str,
    billing: &Address,
    total_price: Option<&str>,
    captcha_token: Option<&str>,
) -> Form {
    let mut form = vec![
        ("utf8", "\u{2713}".to_string()),
        ("_method", "patch".to_string()),
        ("authenticity_token", authenticity_token.to_string()),
        ("previous_step", "payment_method".to_string()),
        ("step", String::new()),
        ("s", card_session_id.to_string()),
        ("checkout[payment_gateway]", gateway_id.to_string()),
        ("checkout[credit_card][vault]", "false".to_string()),
        ("checkout[different_billing_address]", "false".to_string()),
        ("checkout[billing_address][first_name]", billing.first_name.clone()),
        ("checkout[billing_address][last_name]", billing.last_name.clone()),
        ("checkout[billing_address][company]", String::new()),
        ("checkout[billing_address][address1]", billing.address1.clone()),
        ("checkout[billing_address][address2]", billing.address2.clone()),
        ("checkout[billing_address][city]", billing.city.clone()),
        ("checkout[billing_address][country]", billing.country.clone()),
        ("checkout[billing_address][province]", billing.province.clone()),
        ("checkout[billing_address][zip]", billing.zip.clone()),
        ("checkout[billing_address][phone]", format_us_phone(&billing.phone)),
        ("complete", "1".to_string()),
        ("checkout[client_details][browser_width]", "979".to_string()),
        ("checkout[client_details][browser_height]", "631".to_string()),
        ("checkout[client_details][javascript_enabled]", "1".to_string()),
    ];
    if let Some(price) = total_price {
        form.push(("checkout[total_price]", price.to_string()));
    }
    if let Some(token) = captcha_token {
        form.push(("g-recaptcha-response", token.to_string()));
    }
    form
}
