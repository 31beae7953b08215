//! Resolution of externally referenced HTML fragments.
//!
//! Legacy bodies link out to sibling pages holding a figure or table
//! (`a05t1.htm`). The resolver turns such a target into a converted `body`
//! fragment: a previously converted `.xml` sibling in the cache directory
//! is reused as-is; otherwise the raw HTML is read locally or fetched once
//! over the network, persisted, decoded, and run through the same pipeline
//! as a nested document. Failures never abort the outer conversion; they
//! are logged and the reference simply produces no embedded asset.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::dom::Document;
use crate::error::{Error, Result};
use crate::pipeline::{Conversion, PipelineContext, convert_body};
use crate::rules::RuleTable;

/// Fragments may reference further fragments; one level is all the legacy
/// corpus contains, anything deeper is treated as a cycle.
const MAX_NESTING: u8 = 1;

/// Fetches and converts external HTML fragments, caching the results.
#[derive(Debug)]
pub struct FragmentResolver<'r> {
    cache_dir: PathBuf,
    base_url: Option<String>,
    rules: &'r RuleTable,
    depth: Cell<u8>,
}

impl<'r> FragmentResolver<'r> {
    pub fn new(cache_dir: impl Into<PathBuf>, rules: &'r RuleTable) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            base_url: None,
            rules,
            depth: Cell::new(0),
        }
    }

    /// Base URL that relative fragment hrefs are fetched against. Without
    /// one, only fragments already present in the cache directory resolve.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Resolve `href` to a converted fragment, or `None` when anything
    /// along the way fails.
    pub fn resolve(&self, href: &str, parent: &PipelineContext) -> Option<Conversion> {
        if self.depth.get() >= MAX_NESTING {
            warn!(href, "fragment nesting limit reached");
            return None;
        }
        let name = file_name_of(href)?;
        let local = self.cache_dir.join(&name);
        let cached = local.with_extension("xml");

        if let Ok(text) = fs::read_to_string(&cached) {
            match Document::parse_xml(&text) {
                Ok(doc) => {
                    if let Some(body) = doc.find(doc.root(), "body") {
                        debug!(cache = %cached.display(), "fragment cache hit");
                        return Some(Conversion {
                            doc,
                            body,
                            snapshots: Vec::new(),
                        });
                    }
                }
                Err(err) => {
                    warn!(cache = %cached.display(), %err, "discarding unreadable fragment cache");
                }
            }
        }

        let bytes = match self.load_raw(href, &local) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(href, %err, "fragment unavailable");
                return None;
            }
        };
        let html = decode(&bytes);

        let ctx = PipelineContext::new(format!("{}/{name}", parent.pid), parent.body_index);
        self.depth.set(self.depth.get() + 1);
        let converted = convert_body(&html, self.rules, &ctx, Some(self));
        self.depth.set(self.depth.get() - 1);

        match converted {
            Ok(conv) => {
                let xml = conv.doc.to_xml(conv.body);
                if let Err(err) = fs::write(&cached, xml) {
                    warn!(cache = %cached.display(), %err, "could not persist converted fragment");
                }
                Some(conv)
            }
            Err(err) => {
                warn!(href, %err, "fragment conversion failed");
                None
            }
        }
    }

    /// Raw fragment bytes: the local copy when present, otherwise one
    /// blocking download persisted to `local` before use.
    fn load_raw(&self, href: &str, local: &Path) -> Result<Vec<u8>> {
        if local.exists() {
            return Ok(fs::read(local)?);
        }
        let url = if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            let Some(base) = &self.base_url else {
                return Err(Error::Fetch(format!(
                    "no local copy and no base url for {href}"
                )));
            };
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                href.trim_start_matches('/')
            )
        };
        let response = reqwest::blocking::get(&url).map_err(|e| Error::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        let bytes = response.bytes().map_err(|e| Error::Fetch(e.to_string()))?;
        if let Some(dir) = local.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(local, &bytes)?;
        Ok(bytes.to_vec())
    }
}

/// Decode fragment bytes: UTF-8 when valid, otherwise the windows-1252
/// encoding the legacy corpus was authored in.
fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

/// Cache file name for a fragment href: basename with query stripped.
fn file_name_of(href: &str) -> Option<String> {
    let base = href.rsplit(['/', '\\']).next()?;
    let base = base.split(['?', '#']).next()?;
    if base.is_empty() {
        None
    } else {
        Some(base.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleTable {
        RuleTable::parse("fig|fig\ntab|table-wrap\nf|fn\nt|table-wrap\n").unwrap()
    }

    #[test]
    fn cached_xml_sibling_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a05t1.xml"),
            r#"<body><table-wrap id="t1"><table><tr><td>x</td></tr></table></table-wrap></body>"#,
        )
        .unwrap();

        let rules = rules();
        let resolver = FragmentResolver::new(dir.path(), &rules);
        let ctx = PipelineContext::new("pid", 1);
        let conv = resolver.resolve("/path/a05t1.htm", &ctx).unwrap();
        assert!(conv.doc.find(conv.body, "table-wrap").is_some());
    }

    #[test]
    fn local_html_is_converted_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a05t2.htm"),
            r#"<p>Tabela 2</p><table id="t2"><tr><td>y</td></tr></table>"#,
        )
        .unwrap();

        let rules = rules();
        let resolver = FragmentResolver::new(dir.path(), &rules);
        let ctx = PipelineContext::new("pid", 1);
        let conv = resolver.resolve("a05t2.htm", &ctx).unwrap();
        let xml = conv.doc.to_xml(conv.body);
        assert!(xml.contains(r#"<table-wrap id="t2">"#));
        // the converted form is cached for the next run
        assert!(dir.path().join("a05t2.xml").exists());
    }

    #[test]
    fn windows_1252_fragments_are_decoded() {
        let dir = tempfile::tempdir().unwrap();
        // "Região" in windows-1252
        fs::write(dir.path().join("a05f1.htm"), b"<p>Regi\xe3o</p>").unwrap();

        let rules = rules();
        let resolver = FragmentResolver::new(dir.path(), &rules);
        let ctx = PipelineContext::new("pid", 1);
        let conv = resolver.resolve("a05f1.htm", &ctx).unwrap();
        assert!(conv.doc.text_content(conv.body).contains("Região"));
    }

    #[test]
    fn missing_fragment_without_base_url_is_absorbed() {
        let dir = tempfile::tempdir().unwrap();
        let rules = rules();
        let resolver = FragmentResolver::new(dir.path(), &rules);
        let ctx = PipelineContext::new("pid", 1);
        assert!(resolver.resolve("nowhere.htm", &ctx).is_none());
    }

    #[test]
    fn nesting_limit_stops_recursion() {
        let dir = tempfile::tempdir().unwrap();
        let rules = rules();
        let resolver = FragmentResolver::new(dir.path(), &rules);
        resolver.depth.set(MAX_NESTING);
        let ctx = PipelineContext::new("pid", 1);
        assert!(resolver.resolve("a05t1.htm", &ctx).is_none());
    }
}
