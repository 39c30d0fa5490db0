use crate::models::Site;
use crate::monitor::feeds::VariantRecord;
use once_cell::sync::Lazy;
use rand::Rng;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VariantError {
    #[error("no option-index mapping for storefront `{0}`")]
    UnsupportedSiteVariant(String),
}

/// Which of the three option slots carries the size, per storefront.
static OPTION_INDEX_BY_HOST: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    HashMap::from([
        ("kith.com", 1),
        ("cncpts.com", 1),
        ("shop.bdgastore.com", 1),
        ("shop.extrabutterny.com", 1),
        ("shop.undefeated.com", 1),
        ("shopnicekicks.com", 1),
        ("sneakerpolitics.com", 1),
        ("deadstock.ca", 1),
        ("packershoes.com", 1),
        ("rsvpgallery.com", 1),
        ("a-ma-maniere.com", 1),
        ("xhibition.co", 1),
        ("atmosny.com", 1),
        ("12amrun.com", 1),
        ("funko-shop.com", 1),
    ])
});

fn host_of(url: &str) -> &str {
    let stripped = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.");
    stripped.split('/').next().unwrap_or(stripped)
}

/// Resolves the option slot (1-based) for a site. An explicit override on
/// the Site wins; unknown storefronts are a configuration error, fatal at
/// task creation.
pub fn option_index(site: &Site) -> Result<usize, VariantError> {
    if let Some(index) = site.option_index {
        if (1..=3).contains(&index) {
            return Ok(index);
        }
        return Err(VariantError::UnsupportedSiteVariant(site.url.clone()));
    }
    OPTION_INDEX_BY_HOST
        .get(host_of(&site.url))
        .copied()
        .ok_or_else(|| VariantError::UnsupportedSiteVariant(site.url.clone()))
}

fn option_slot<'a>(variant: &'a VariantRecord, index: usize) -> Option<&'a str> {
    match index {
        1 => variant.option1.as_deref(),
        2 => variant.option2.as_deref(),
        3 => variant.option3.as_deref(),
        _ => None,
    }
}

fn in_stock(variant: &VariantRecord) -> bool {
    variant.available.unwrap_or(false) || variant.inventory_quantity.unwrap_or(0) > 0
}

/// The subset of variants whose mapped option slot equals a requested
/// size token.
pub fn resolve_variants<'a>(
    variants: &'a [VariantRecord],
    sizes: &[String],
    index: usize,
) -> Vec<&'a VariantRecord> {
    variants
        .iter()
        .filter(|variant| {
            option_slot(variant, index)
                .map(|slot| sizes.iter().any(|size| slot.eq_ignore_ascii_case(size)))
                .unwrap_or(false)
        })
        .collect()
}

/// Picks one variant for the requested sizes.
///
/// `random` draws from the group, preferring in-stock variants when the
/// feed exposes availability. Exact slot equality is tried first; numeric
/// sizes fall back to a leading-digits prefix match so shoe sizes still
/// hit options styled like `9 / US`, and garment sizes fall back to a
/// word-prefix match so `S` still hits `Small`.
pub fn pick_variant(
    variants: &[VariantRecord],
    sizes: &[String],
    index: usize,
) -> Option<(u64, String)> {
    if variants.is_empty() {
        return None;
    }

    for size in sizes {
        if size.eq_ignore_ascii_case("random") {
            return Some(pick_random(variants, index));
        }
        if let Some(variant) = resolve_variants(variants, std::slice::from_ref(size), index)
            .into_iter()
            .next()
        {
            let label = option_slot(variant, index).unwrap_or(size).to_string();
            return Some((variant.id, label));
        }
        let fallback = if size.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            variants.iter().find(|variant| {
                option_slot(variant, index)
                    .map(|slot| {
                        slot.trim_start_matches(|c: char| !c.is_ascii_digit())
                            .starts_with(size.as_str())
                    })
                    .unwrap_or(false)
            })
        } else {
            // garment sizes: `S` matches `Small` but never `XS` or `9 / S`
            variants.iter().find(|variant| {
                option_slot(variant, index)
                    .map(|slot| {
                        let slot = slot.trim();
                        !slot.chars().any(|c| c.is_ascii_digit())
                            && slot
                                .get(..size.len())
                                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(size))
                    })
                    .unwrap_or(false)
            })
        };
        if let Some(variant) = fallback {
            let label = option_slot(variant, index).unwrap_or(size).to_string();
            return Some((variant.id, label));
        }
    }
    None
}

fn pick_random(variants: &[VariantRecord], index: usize) -> (u64, String) {
    let stocked: Vec<&VariantRecord> = variants.iter().filter(|v| in_stock(v)).collect();
    let group: Vec<&VariantRecord> = if stocked.is_empty() {
        variants.iter().collect()
    } else {
        stocked
    };
    let choice = group[rand::rng().random_range(0..group.len())];
    let label = option_slot(choice, index)
        .or(choice.title.as_deref())
        .unwrap_or("random")
        .to_string();
    (choice.id, label)
}
