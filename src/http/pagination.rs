//! `?limit=N&marker=ID` query parsing and `links` envelope construction.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub marker: Option<String>,
}

impl PageQuery {
    pub fn limit_or_default(&self, default: usize) -> usize {
        self.limit.unwrap_or(default)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Link {
    pub href: String,
    pub rel: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    #[serde(flatten)]
    pub items: T,
    pub links: Vec<Link>,
}

/// Builds the `links` array: `self` always present, `next` only when
/// the page came back full.
pub fn links(self_href: &str, next_href: &str, returned: usize, limit: usize) -> Vec<Link> {
    let mut links = vec![Link {
        href: self_href.to_string(),
        rel: "self".to_string(),
    }];
    if returned == limit {
        links.push(Link {
            href: next_href.to_string(),
            rel: "next".to_string(),
        });
    }
    links
}
