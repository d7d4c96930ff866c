//! Static page scanning.
//!
//! Finds the code blocks on a page the way a badge would see them, without
//! observing a live DOM.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use url::Url;

use crate::detector::{self, CodeAnalysis};
use crate::{Error, PreviewConfig, Result};

/// Elements treated as code snippets
pub const CODE_BLOCK_SELECTOR: &str = r#"pre code, code[class*="language-"]"#;

/// A code block found on a page
#[derive(Debug, Clone, Serialize)]
pub struct CodeBlock {
    /// Position among the page's code blocks
    pub index: usize,
    pub code: String,
    /// Language named by a `language-*` or `lang-*` class on the block or its `<pre>`
    pub language: Option<String>,
    pub analysis: CodeAnalysis,
}

/// Every code block in `html`, in document order, each once.
pub fn extract_code_blocks(html: &str) -> Result<Vec<CodeBlock>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(CODE_BLOCK_SELECTOR)
        .map_err(|e| Error::Other(format!("Invalid code block selector: {:?}", e)))?;

    let mut seen = HashSet::new();
    let mut blocks = Vec::new();
    for element in document.select(&selector) {
        if !seen.insert(element.id()) {
            continue;
        }
        let code = element.text().collect::<String>();
        if code.trim().is_empty() {
            continue;
        }
        let language = language_hint(&element).or_else(|| {
            element
                .parent()
                .and_then(ElementRef::wrap)
                .filter(|p| p.value().name() == "pre")
                .and_then(|p| language_hint(&p))
        });
        blocks.push(CodeBlock {
            index: blocks.len(),
            analysis: detector::analyze(&code),
            code,
            language,
        });
    }
    log::debug!("found {} code blocks", blocks.len());
    Ok(blocks)
}

fn language_hint(element: &ElementRef) -> Option<String> {
    element.value().classes().find_map(|class| {
        class
            .strip_prefix("language-")
            .or_else(|| class.strip_prefix("lang-"))
            .filter(|lang| !lang.is_empty())
            .map(str::to_string)
    })
}

/// Download a page's HTML.
pub fn fetch_page(url: &str, config: &PreviewConfig) -> Result<String> {
    let client = Client::builder()
        .timeout(Duration::from_millis(config.fetch_timeout_ms))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| Error::InitializationError(format!("Failed to build HTTP client: {}", e)))?;

    let res = client
        .get(url)
        .send()
        .map_err(|e| Error::NetworkError(format!("HTTP GET failed: {}", e)))?
        .error_for_status()
        .map_err(|e| Error::NetworkError(format!("HTTP GET failed: {}", e)))?;

    res.text()
        .map_err(|e| Error::NetworkError(format!("Failed to read response body: {}", e)))
}

/// Read HTML from an http(s) URL or a local file path.
pub fn load_source(source: &str, config: &PreviewConfig) -> Result<String> {
    match Url::parse(source) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => fetch_page(url.as_str(), config),
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| Error::Other(format!("Not a local path: {}", source)))?;
            Ok(std::fs::read_to_string(path)?)
        }
        _ => Ok(std::fs::read_to_string(source)?),
    }
}
