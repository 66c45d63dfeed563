//! Widget auto-discovery.
//!
//! Turns a directory of widget sources into resource registrations. Each
//! source file may carry `@name: "..."`, `@description: "..."` and
//! `@uri: "..."` tags near its top; anything missing is derived from the
//! file name. The resource content is the pre-built bundle
//! `<assets_dir>/<stem>.js`, produced by an external build step and read
//! on every `resources/read`.
//!
//! Discovery never aborts startup for a single bad file: unreadable sources
//! fall back to derived metadata and missing bundles are served as a
//! diagnostic page.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::resources::{Produced, ResourceDefinition, ResourceEntry, ResourceProducer};
use crate::salt::SaltStore;
use crate::types::{McpError, RegistryError};

/// Source extensions picked up by the scanner.
pub const RECOGNIZED_EXTENSIONS: &[&str] = &["tsx", "ts", "jsx", "js"];

/// Type declaration files are never widgets.
pub const DECLARATION_SUFFIX: &str = ".d.ts";

/// Only this many leading lines are searched for metadata tags.
pub const METADATA_WINDOW_LINES: usize = 40;

pub const WIDGET_MIME_TYPE: &str = "text/html+skybridge";

const ACRONYMS: &[&str] = &["ui", "api", "url", "id", "html", "css", "json", "mcp", "sdk", "ai"];

/// File-name substring → description, first match wins.
const DESCRIPTIONS: &[(&str, &str)] = &[
    ("carousel", "Horizontally scrolling carousel of result cards"),
    ("map", "Interactive map showing result locations"),
    ("list", "Scrollable list of results"),
    ("detail", "Detailed view of a single item"),
    ("search", "Search form with live results"),
    ("form", "Form collecting structured input"),
    ("chart", "Chart visualizing numeric data"),
    ("hello", "Minimal greeting widget"),
];

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@(name|description|uri)\s*:\s*"([^"]*)""#).expect("tag pattern compiles")
});

/// Metadata read from the top of a widget source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredFileMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub uri_id: Option<String>,
}

/// Extract tags from the first [`METADATA_WINDOW_LINES`] lines. The first
/// occurrence of each tag wins; anything that doesn't match is ignored.
pub fn extract_metadata(source: &str) -> DiscoveredFileMetadata {
    let mut meta = DiscoveredFileMetadata::default();
    for line in source.lines().take(METADATA_WINDOW_LINES) {
        for cap in TAG.captures_iter(line) {
            let value = cap[2].trim();
            if value.is_empty() {
                continue;
            }
            let slot = match &cap[1] {
                "name" => &mut meta.name,
                "description" => &mut meta.description,
                _ => &mut meta.uri_id,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
    }
    meta
}

/// `hotel-search_results` → `Hotel Search Results`; known acronyms are
/// upper-cased (`map-ui` → `Map UI`).
pub fn display_name(stem: &str) -> String {
    stem.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let lower = part.to_lowercase();
            if ACRONYMS.contains(&lower.as_str()) {
                return lower.to_uppercase();
            }
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn default_description(stem: &str, display_name: &str) -> String {
    let lower = stem.to_lowercase();
    DESCRIPTIONS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, description)| description.to_string())
        .unwrap_or_else(|| format!("Interactive {} widget", display_name))
}

pub fn default_uri_id(stem: &str) -> String {
    format!("widget/{}.html", stem)
}

fn is_candidate(file_name: &str) -> bool {
    if file_name.starts_with('.') || file_name.ends_with(DECLARATION_SUFFIX) {
        return false;
    }
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| RECOGNIZED_EXTENSIONS.contains(&ext))
}

/// Where to look for widget sources and their bundles.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub source_dir: PathBuf,
    pub assets_dir: PathBuf,
}

/// One discovered widget, before registration.
#[derive(Debug, Clone)]
pub struct DiscoveredWidget {
    pub stem: String,
    pub source: PathBuf,
    pub bundle: PathBuf,
    pub definition: ResourceDefinition,
}

impl Discovery {
    pub fn new(source_dir: impl Into<PathBuf>, assets_dir: impl Into<PathBuf>) -> Self {
        Discovery {
            source_dir: source_dir.into(),
            assets_dir: assets_dir.into(),
        }
    }

    /// Candidate source files, sorted by file name.
    pub async fn candidates(&self) -> Vec<PathBuf> {
        let mut dir = match tokio::fs::read_dir(&self.source_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(
                    dir = %self.source_dir.display(),
                    error = %e,
                    "widget directory unavailable, no widgets discovered"
                );
                return Vec::new();
            }
        };

        let mut files = Vec::new();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %self.source_dir.display(), error = %e, "directory scan interrupted");
                    break;
                }
            };
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            let name = entry.file_name();
            if is_file && name.to_str().is_some_and(is_candidate) {
                files.push(entry.path());
            }
        }
        files.sort();
        files
    }

    /// Inspect one source file. An unreadable file still yields a widget
    /// with derived metadata; only an uninitialized salt is an error.
    pub async fn inspect(&self, source: &Path, salt: &SaltStore) -> Result<DiscoveredWidget, RegistryError> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        // `Path::file_stem` only strips the last extension, which is enough
        // because declaration files were filtered out already.
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name)
            .to_string();

        let metadata = match read_header(source).await {
            Ok(text) => extract_metadata(&text),
            Err(e) => {
                tracing::warn!(file = %source.display(), error = %e, "could not read widget metadata");
                DiscoveredFileMetadata::default()
            }
        };

        let name = metadata.name.unwrap_or_else(|| display_name(&stem));
        let description = metadata
            .description
            .unwrap_or_else(|| default_description(&stem, &name));
        let uri_id = metadata.uri_id.unwrap_or_else(|| default_uri_id(&stem));
        let uri = salt.uri_for(&uri_id)?;

        let definition = ResourceDefinition::new(uri, name, description.clone(), WIDGET_MIME_TYPE)
            .annotation("discovered", json!(true))
            .meta("openai/widgetDescription", json!(description));

        Ok(DiscoveredWidget {
            bundle: self.assets_dir.join(format!("{}.js", stem)),
            stem,
            source: source.to_path_buf(),
            definition,
        })
    }

    /// Scan the source directory and build one resource entry per widget.
    ///
    /// Only a salt read before initialization fails the scan.
    pub async fn discover(&self, salt: &SaltStore) -> Result<Vec<ResourceEntry>, RegistryError> {
        let mut entries = Vec::new();
        for source in self.candidates().await {
            let widget = self.inspect(&source, salt).await?;
            tracing::debug!(
                file = %widget.source.display(),
                uri = %widget.definition.uri,
                "discovered widget"
            );
            let producer: Arc<dyn ResourceProducer> = Arc::new(BundleProducer {
                stem: widget.stem,
                bundle: widget.bundle,
            });
            entries.push((widget.definition, producer));
        }
        tracing::info!(
            dir = %self.source_dir.display(),
            count = entries.len(),
            "widget discovery complete"
        );
        Ok(entries)
    }
}

/// Read the metadata window of a source file. Only the leading lines are
/// read, and bytes that are not UTF-8 are replaced rather than rejected.
async fn read_header(source: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(tokio::fs::File::open(source).await?);
    let mut header = String::new();
    let mut line = Vec::new();
    for _ in 0..METADATA_WINDOW_LINES {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        header.push_str(&String::from_utf8_lossy(&line));
    }
    Ok(header)
}

/// Keeps embedded text from closing the surrounding element early.
fn escape_closing_tags(text: &str) -> String {
    text.replace("</", "<\\/")
}

/// Serves a widget bundle wrapped in an HTML shell.
pub struct BundleProducer {
    stem: String,
    bundle: PathBuf,
}

impl BundleProducer {
    fn style_path(&self) -> PathBuf {
        self.bundle.with_extension("css")
    }

    fn diagnostic(&self, error: &std::io::Error) -> String {
        format!(
            "<div data-widget-error=\"{stem}\">\n  <strong>Widget \"{stem}\" is unavailable.</strong>\n  <pre>bundle {path}: {error}</pre>\n</div>\n",
            stem = self.stem,
            path = self.bundle.display(),
            error = error,
        )
    }
}

#[async_trait]
impl ResourceProducer for BundleProducer {
    async fn produce(&self, uri: &str) -> Result<Produced, McpError> {
        let script = match tokio::fs::read_to_string(&self.bundle).await {
            Ok(script) => script,
            Err(e) => {
                tracing::warn!(uri, bundle = %self.bundle.display(), error = %e, "widget bundle missing");
                return Ok(Produced::text(self.diagnostic(&e)));
            }
        };

        let mut html = format!("<div id=\"{}-root\"></div>\n", self.stem);
        if let Ok(css) = tokio::fs::read_to_string(self.style_path()).await {
            html.push_str(&format!("<style>\n{}\n</style>\n", escape_closing_tags(&css)));
        }
        html.push_str(&format!(
            "<script type=\"module\">\n{}\n</script>\n",
            escape_closing_tags(&script)
        ));
        Ok(Produced::text(html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceRegistry;
    use std::fs;

    fn salt() -> SaltStore {
        let salt = SaltStore::new("ui");
        salt.initialize_with(Some("test")).unwrap();
        salt
    }

    #[test]
    fn test_extract_metadata_tags() {
        let src = r#"/**
 * @name: "Hotel Map"
 * @description: "Hotels on a map"
 * @uri: "widget/hotels-map.html"
 */
export default function App() {}
"#;
        let meta = extract_metadata(src);
        assert_eq!(meta.name.as_deref(), Some("Hotel Map"));
        assert_eq!(meta.description.as_deref(), Some("Hotels on a map"));
        assert_eq!(meta.uri_id.as_deref(), Some("widget/hotels-map.html"));
    }

    #[test]
    fn test_extract_metadata_ignores_malformed_and_late_tags() {
        let mut src = String::from("// @name: unquoted\n// @title: \"unknown tag\"\n");
        for _ in 0..METADATA_WINDOW_LINES {
            src.push_str("const x = 1;\n");
        }
        src.push_str("// @description: \"too late\"\n");
        assert_eq!(extract_metadata(&src), DiscoveredFileMetadata::default());
    }

    #[test]
    fn test_extract_metadata_first_occurrence_wins() {
        let meta = extract_metadata("// @name: \"First\"\n// @name: \"Second\"\n");
        assert_eq!(meta.name.as_deref(), Some("First"));
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("hotel-search"), "Hotel Search");
        assert_eq!(display_name("map_ui"), "Map UI");
        assert_eq!(display_name("api-json-viewer"), "API JSON Viewer");
        assert_eq!(display_name("hello--world"), "Hello World");
    }

    #[test]
    fn test_default_description() {
        assert_eq!(
            default_description("hotel-carousel", "Hotel Carousel"),
            "Horizontally scrolling carousel of result cards"
        );
        assert_eq!(
            default_description("pizzaz", "Pizzaz"),
            "Interactive Pizzaz widget"
        );
    }

    #[test]
    fn test_candidate_filter() {
        assert!(is_candidate("hotel-map.tsx"));
        assert!(is_candidate("hello.js"));
        assert!(!is_candidate("types.d.ts"));
        assert!(!is_candidate(".hidden.tsx"));
        assert!(!is_candidate("README.md"));
    }

    #[tokio::test]
    async fn test_missing_directory_yields_nothing() {
        let discovery = Discovery::new("/nonexistent/widgets", "/nonexistent/assets");
        let entries = discovery.discover(&salt()).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_discover_requires_initialized_salt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.tsx"), "export {}").unwrap();
        let discovery = Discovery::new(dir.path(), dir.path());
        let result = discovery.discover(&SaltStore::new("ui")).await;
        assert!(matches!(result, Err(RegistryError::Salt(_))));
    }

    #[tokio::test]
    async fn test_discover_builds_definitions() {
        let src = tempfile::tempdir().unwrap();
        let assets = tempfile::tempdir().unwrap();
        fs::write(src.path().join("hotel-map.tsx"), "// @name: \"Hotels\"\n").unwrap();
        fs::write(src.path().join("search_list.jsx"), "export {}").unwrap();
        fs::write(src.path().join("env.d.ts"), "declare const x: number;").unwrap();
        fs::write(src.path().join(".draft.tsx"), "").unwrap();

        let entries = Discovery::new(src.path(), assets.path())
            .discover(&salt())
            .await
            .unwrap();
        let defs: Vec<&ResourceDefinition> = entries.iter().map(|(d, _)| d).collect();
        assert_eq!(defs.len(), 2);

        assert_eq!(defs[0].uri, "ui://widget/hotel-map.html?salt=test");
        assert_eq!(defs[0].name, "Hotels");
        assert_eq!(defs[0].description, "Interactive map showing result locations");
        assert_eq!(defs[0].mime_type, WIDGET_MIME_TYPE);

        assert_eq!(defs[1].uri, "ui://widget/search_list.html?salt=test");
        assert_eq!(defs[1].name, "Search List");
    }

    #[tokio::test]
    async fn test_tags_survive_non_utf8_tail() {
        let src = tempfile::tempdir().unwrap();
        let mut bytes = b"// @name: \"Hotel Map\"\n// @uri: \"widget/hotels.html\"\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        for _ in 0..100 {
            bytes.extend_from_slice(b"const filler = 1;\n");
        }
        fs::write(src.path().join("map.tsx"), &bytes).unwrap();

        let discovery = Discovery::new(src.path(), src.path());
        let widget = discovery
            .inspect(&src.path().join("map.tsx"), &salt())
            .await
            .unwrap();
        assert_eq!(widget.definition.name, "Hotel Map");
        assert_eq!(widget.definition.uri, "ui://widget/hotels.html?salt=test");
    }

    #[tokio::test]
    async fn test_uri_tag_with_query_keeps_salt_separate() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.tsx"), "// @uri: \"widget/a.html?v=2\"\n").unwrap();

        let entries = Discovery::new(src.path(), src.path())
            .discover(&salt())
            .await
            .unwrap();
        assert_eq!(entries[0].0.uri, "ui://widget/a.html?v=2&salt=test");

        let mut reg = ResourceRegistry::new();
        reg.register_all(entries).unwrap();
        let content = reg.read("ui://widget/a.html?v=2&salt=old").await.unwrap();
        assert_eq!(content.uri, "ui://widget/a.html?v=2&salt=test");
    }

    #[tokio::test]
    async fn test_bundle_cannot_close_script_element() {
        let src = tempfile::tempdir().unwrap();
        let assets = tempfile::tempdir().unwrap();
        fs::write(src.path().join("tricky.tsx"), "").unwrap();
        fs::write(assets.path().join("tricky.js"), "const s = \"</script><b>x</b>\";").unwrap();

        let entries = Discovery::new(src.path(), assets.path())
            .discover(&salt())
            .await
            .unwrap();
        let mut reg = ResourceRegistry::new();
        reg.register_all(entries).unwrap();
        let content = reg.read("ui://widget/tricky.html").await.unwrap();
        let html = content.text().unwrap();
        assert!(html.contains(r#"const s = "<\/script><b>x<\/b>";"#));
        assert_eq!(html.matches("</script>").count(), 1);
    }

    #[tokio::test]
    async fn test_missing_bundle_serves_diagnostic() {
        let src = tempfile::tempdir().unwrap();
        let assets = tempfile::tempdir().unwrap();
        fs::write(src.path().join("good.tsx"), "").unwrap();
        fs::write(src.path().join("broken.tsx"), "").unwrap();
        fs::write(assets.path().join("good.js"), "console.log('good')").unwrap();
        fs::write(assets.path().join("good.css"), ".root{}").unwrap();

        let entries = Discovery::new(src.path(), assets.path())
            .discover(&salt())
            .await
            .unwrap();
        let mut reg = ResourceRegistry::new();
        reg.register_all(entries).unwrap();
        assert_eq!(reg.len(), 2);

        let good = reg.read("ui://widget/good.html?salt=test").await.unwrap();
        let html = good.text().unwrap();
        assert!(html.contains("<div id=\"good-root\"></div>"));
        assert!(html.contains("<style>\n.root{}\n</style>"));
        assert!(html.contains("console.log('good')"));

        let broken = reg.read("ui://widget/broken.html?salt=test").await.unwrap();
        let html = broken.text().unwrap();
        assert!(html.contains("data-widget-error=\"broken\""));
        assert!(html.contains("broken.js"));
        assert!(reg.contains("ui://widget/broken.html"));
    }
}
