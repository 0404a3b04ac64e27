use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use subreader::{Error, Fetch, FetchResponse, Result};

/// Canned responses keyed by URL.
#[derive(Default)]
pub struct FakeFetcher {
    pages: Mutex<HashMap<String, FetchResponse>>,
}

impl FakeFetcher {
    pub fn serve(&self, url: &str, content_type: &str, body: &str) {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            FetchResponse {
                content_type: content_type.to_string(),
                body: body.as_bytes().to_vec(),
            },
        );
    }
}

#[async_trait]
impl Fetch for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Fetch {
                url: url.to_string(),
                reason: "not served".to_string(),
            })
    }

    async fn probe(&self, url: &str) -> bool {
        self.pages.lock().unwrap().contains_key(url)
    }
}

pub fn rss(entries: &[(&str, &str)]) -> String {
    let items: String = entries
        .iter()
        .map(|(title, date)| {
            format!(
                "<item><title>{t}</title><guid>http://example.com/{t}</guid><link>http://example.com/{t}</link><pubDate>{d}</pubDate></item>",
                t = title,
                d = date
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Example</title><link>http://example.com/</link><description>x</description>{}</channel></rss>"#,
        items
    )
}
