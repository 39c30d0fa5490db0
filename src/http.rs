use crate::proxy::Proxy;
use reqwest::Client;
use reqwest::cookie::Jar;
use std::sync::Arc;
use std::time::Duration;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; WOW64; Trident/7.0; LCTE; rv:11.0) like Gecko";

/// Builds a client bound to one egress proxy (or direct when `None`).
/// Passing the same jar to every client of a checkout attempt keeps the
/// storefront session shared across racing egress points.
pub fn build_client(proxy: Option<&Proxy>, jar: Option<Arc<Jar>>) -> Client {
    let timeout = std::env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(15);
    let connect = std::env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5);
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .user_agent(USER_AGENT)
        .gzip(true);
    if let Some(proxy) = proxy {
        if let Ok(p) = proxy.to_reqwest() {
            builder = builder.proxy(p);
        }
    }
    if let Some(jar) = jar {
        builder = builder.cookie_provider(jar);
    }
    builder.build().unwrap_or_else(|_| Client::new())
}
