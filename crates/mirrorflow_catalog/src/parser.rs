//! Catalog Parser
//!
//! Normalises an extracted catalog `configs/` directory into canonical
//! [`OperatorEntry`] records. Each operator lives in its own subdirectory and may
//! use any of these layouts:
//!
//! ```text
//! configs/<op>/catalog.yaml            combined multi-document file (yaml or json stream)
//! configs/<op>/package.yaml            split package file ...
//! configs/<op>/channel.yaml            ... plus channel file(s)
//! configs/<op>/channels/<ch>.yaml      one file per channel
//! configs/<op>/index.txt               loosely structured text
//! ```
//!
//! Documents are grouped by the package they name, so one file or directory
//! holding several packages yields one entry per package. Parsing is pure. A
//! malformed operator is reported in [`ParseReport::skipped`] and never aborts
//! its siblings.

use mirrorflow_protocol::OperatorEntry;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

const SCHEMA_PACKAGE: &str = "olm.package";
const SCHEMA_CHANNEL: &str = "olm.channel";

/// Why one operator entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operator}: {message}")]
pub struct ParseError {
    pub operator: String,
    pub message: String,
}

impl ParseError {
    fn new(operator: &str, message: impl Into<String>) -> Self {
        Self {
            operator: operator.to_string(),
            message: message.into(),
        }
    }
}

/// Layout an operator entry was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogLayout {
    Combined,
    SplitFiles,
    ChannelDirectory,
    LooseText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOperator {
    pub entry: OperatorEntry,
    pub layout: CatalogLayout,
}

/// Result of parsing a whole `configs/` directory.
#[derive(Debug, Default)]
pub struct ParseReport {
    /// Sorted by operator name
    pub operators: Vec<OperatorEntry>,
    pub skipped: Vec<ParseError>,
}

/// Parse every operator under `configs_dir`.
///
/// Subdirectories are operators; loose structured files at the top level are
/// treated as single-operator combined files.
pub fn parse_configs_dir(configs_dir: &Path) -> std::io::Result<ParseReport> {
    let mut report = ParseReport::default();
    let mut entries: Vec<PathBuf> = fs::read_dir(configs_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    let mut seen: BTreeMap<String, OperatorEntry> = BTreeMap::new();
    for path in entries {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if label.starts_with('.') {
            continue;
        }

        let parsed = if path.is_dir() {
            parse_operator_dir(&path)
        } else if is_structured_file(&path) {
            parse_operator_file(&path)
        } else {
            continue;
        };

        for result in parsed {
            match result {
                Ok(op) => {
                    debug!("Parsed operator {} ({:?})", op.entry.name, op.layout);
                    seen.insert(op.entry.name.clone(), op.entry);
                }
                Err(err) => report.skipped.push(err),
            }
        }
    }

    report.operators = seen.into_values().collect();
    Ok(report)
}

/// Parse one operator directory, one result per package found in it.
pub fn parse_operator_dir(dir: &Path) -> Vec<Result<ParsedOperator, ParseError>> {
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "<unknown>".to_string());

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(2)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            !p.file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true)
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return vec![Err(ParseError::new(&dir_name, "operator directory is empty"))];
    }

    let mut packages = Packages::default();
    let mut used_loose = false;
    let mut used_channel_dir = false;
    let mut structured_files = 0usize;

    for file in &files {
        let in_channel_dir = file
            .parent()
            .map(|p| p != dir)
            .unwrap_or(false);
        let text = match fs::read_to_string(file) {
            Ok(text) => text,
            Err(e) => {
                let message = format!("{}: {}", file.display(), e);
                return vec![Err(ParseError::new(&dir_name, message))];
            }
        };

        let docs = if is_structured_file(file) {
            read_documents(file, &text)
        } else {
            None
        };

        match docs {
            Some(docs) => {
                structured_files += 1;
                used_channel_dir |= in_channel_dir;
                for doc in docs {
                    packages.absorb(&doc);
                }
            }
            None => {
                used_loose = true;
                packages.unnamed.absorb_loose_text(&text);
            }
        }
    }

    let layout = if used_loose && structured_files == 0 {
        CatalogLayout::LooseText
    } else if used_channel_dir {
        CatalogLayout::ChannelDirectory
    } else if structured_files > 1 {
        CatalogLayout::SplitFiles
    } else if used_loose {
        CatalogLayout::LooseText
    } else {
        CatalogLayout::Combined
    };

    packages.finish(&dir_name, layout)
}

/// Parse a single combined file that is not inside an operator directory.
pub fn parse_operator_file(file: &Path) -> Vec<Result<ParsedOperator, ParseError>> {
    let stem = file
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "<unknown>".to_string());
    let text = match fs::read_to_string(file) {
        Ok(text) => text,
        Err(e) => {
            let message = format!("{}: {}", file.display(), e);
            return vec![Err(ParseError::new(&stem, message))];
        }
    };

    let mut packages = Packages::default();
    let layout = match read_documents(file, &text) {
        Some(docs) => {
            for doc in docs {
                packages.absorb(&doc);
            }
            CatalogLayout::Combined
        }
        None => {
            packages.unnamed.absorb_loose_text(&text);
            CatalogLayout::LooseText
        }
    };
    packages.finish(&stem, layout)
}

fn is_structured_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}

/// Read every document of a yaml stream or json stream/array.
///
/// `None` when the file is not valid structured data.
fn read_documents(path: &Path, text: &str) -> Option<Vec<Value>> {
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let mut docs = Vec::new();

    if is_json {
        for item in serde_json::Deserializer::from_str(text).into_iter::<Value>() {
            match item.ok()? {
                Value::Array(items) => docs.extend(items),
                other => docs.push(other),
            }
        }
    } else {
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = Value::deserialize(document).ok()?;
            match value {
                Value::Null => {}
                Value::Array(items) => docs.extend(items),
                other => docs.push(other),
            }
        }
    }

    if docs.iter().any(|d| !d.is_object()) {
        return None;
    }
    Some(docs)
}

/// Package/channel facts of one parse unit, keyed by the package they name.
///
/// Documents that name no package land in `unnamed`; they are attributed to
/// the package when the unit declares exactly one.
#[derive(Debug, Default)]
struct Packages {
    named: BTreeMap<String, Accumulator>,
    unnamed: Accumulator,
}

impl Packages {
    fn target(&mut self, package: Option<&str>) -> &mut Accumulator {
        match package {
            Some(name) => self
                .named
                .entry(name.to_string())
                .or_insert_with(|| Accumulator {
                    package: Some(name.to_string()),
                    ..Accumulator::default()
                }),
            None => &mut self.unnamed,
        }
    }

    fn absorb(&mut self, doc: &Value) {
        let field = move |key: &str| doc.get(key).and_then(Value::as_str);
        match field("schema") {
            Some(SCHEMA_PACKAGE) => {
                let acc = self.target(field("name"));
                if let Some(ch) = field("defaultChannel") {
                    acc.default_channel = Some(ch.to_string());
                }
            }
            Some(SCHEMA_CHANNEL) => {
                if let Some(name) = field("name") {
                    self.target(field("package")).push_channel(name);
                }
            }
            Some(_) => {}
            None => self
                .target(field("packageName"))
                .absorb_legacy_manifest(doc),
        }
    }

    fn finish(
        self,
        fallback_name: &str,
        layout: CatalogLayout,
    ) -> Vec<Result<ParsedOperator, ParseError>> {
        let accumulators: Vec<Accumulator> = match self.named.len() {
            0 => vec![self.unnamed],
            1 => {
                let mut only = self.named.into_values().collect::<Vec<_>>();
                only[0].merge_unnamed(self.unnamed);
                only
            }
            n => {
                if self.unnamed.has_facts() {
                    debug!(
                        "{}: ignoring package-less documents among {} packages",
                        fallback_name, n
                    );
                }
                self.named.into_values().collect()
            }
        };

        accumulators
            .into_iter()
            .map(|acc| {
                acc.finish(fallback_name)
                    .map(|entry| ParsedOperator { entry, layout })
            })
            .collect()
    }
}

/// Collects package/channel facts of one operator.
#[derive(Debug, Default)]
struct Accumulator {
    package: Option<String>,
    default_channel: Option<String>,
    channels: Vec<String>,
}

impl Accumulator {
    fn push_channel(&mut self, name: &str) {
        if !name.is_empty() && !self.channels.iter().any(|c| c == name) {
            self.channels.push(name.to_string());
        }
    }

    fn has_facts(&self) -> bool {
        self.default_channel.is_some() || !self.channels.is_empty()
    }

    /// Fold in facts that named no package; the declared name wins.
    fn merge_unnamed(&mut self, unnamed: Accumulator) {
        if self.default_channel.is_none() {
            self.default_channel = unnamed.default_channel;
        }
        for channel in &unnamed.channels {
            self.push_channel(channel);
        }
    }

    fn absorb_legacy_manifest(&mut self, doc: &Value) {
        if let Some(ch) = doc.get("defaultChannel").and_then(Value::as_str) {
            self.default_channel = Some(ch.to_string());
        }
        if let Some(list) = doc.get("channels").and_then(Value::as_array) {
            for item in list {
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .or_else(|| item.as_str());
                if let Some(name) = name {
                    self.push_channel(name);
                }
            }
        }
    }

    fn absorb_loose_text(&mut self, text: &str) {
        if self.default_channel.is_none() {
            if let Some(cap) = default_channel_re().captures(text) {
                self.default_channel = Some(cap[1].to_string());
            }
        }
        if self.package.is_none() {
            if let Some(cap) = package_name_re().captures(text) {
                self.package = Some(cap[1].to_string());
            }
        }

        for chunk in split_chunks(text) {
            if chunk.contains(SCHEMA_PACKAGE) && self.package.is_none() {
                self.package = outermost_name(chunk);
            } else if chunk.contains(SCHEMA_CHANNEL) {
                if let Some(name) = outermost_name(chunk) {
                    self.push_channel(&name);
                }
            }
        }
    }

    fn finish(mut self, fallback_name: &str) -> Result<OperatorEntry, ParseError> {
        let name = self.package.take().unwrap_or_else(|| fallback_name.to_string());
        let default_channel = self
            .default_channel
            .take()
            .ok_or_else(|| ParseError::new(&name, "no defaultChannel found"))?;
        if !is_valid_token(&name) {
            return Err(ParseError::new(&name, "invalid operator name"));
        }
        if !is_valid_token(&default_channel) {
            return Err(ParseError::new(
                &name,
                format!("invalid defaultChannel '{}'", default_channel),
            ));
        }
        let mut channels = self.channels;
        if !channels.iter().any(|c| c == &default_channel) {
            channels.push(default_channel.clone());
        }
        channels.sort();
        Ok(OperatorEntry {
            name,
            default_channel,
            channels,
        })
    }
}

fn is_valid_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn default_channel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*"?defaultChannel"?\s*[:=]\s*"?([A-Za-z0-9._-]+)"?"#)
            .expect("static regex")
    })
}

fn package_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*"?packageName"?\s*[:=]\s*"?([A-Za-z0-9._-]+)"?"#)
            .expect("static regex")
    })
}

fn name_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^([ \t-]*)"?name"?\s*[:=]\s*"?([A-Za-z0-9._-]+)"?"#)
            .expect("static regex")
    })
}

/// Split on yaml document markers or blank lines.
fn split_chunks(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed == "---" || trimmed.is_empty() {
            if offset > start {
                chunks.push(&text[start..offset]);
            }
            start = offset + line.len();
        }
        offset += line.len();
    }
    if text.len() > start {
        chunks.push(&text[start..]);
    }
    chunks
}

/// The least-indented `name:` of a chunk (nested entries carry their own names).
fn outermost_name(chunk: &str) -> Option<String> {
    name_line_re()
        .captures_iter(chunk)
        .min_by_key(|cap| cap[1].len())
        .map(|cap| cap[2].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn single(mut results: Vec<Result<ParsedOperator, ParseError>>) -> ParsedOperator {
        assert_eq!(results.len(), 1, "expected one operator: {:?}", results);
        results.remove(0).unwrap()
    }

    #[test]
    fn test_combined_yaml() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "web-terminal/catalog.yaml",
            r#"---
schema: olm.package
name: web-terminal
defaultChannel: fast
---
schema: olm.channel
package: web-terminal
name: fast
entries:
  - name: web-terminal.v1.10.0
  - name: web-terminal.v1.11.0
---
schema: olm.bundle
name: web-terminal.v1.11.0
package: web-terminal
"#,
        );

        let op = single(parse_operator_dir(&temp.path().join("web-terminal")));
        assert_eq!(op.layout, CatalogLayout::Combined);
        assert_eq!(op.entry, OperatorEntry::new("web-terminal", "fast", ["fast"]));
    }

    #[test]
    fn test_combined_json_stream() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "cert-manager/catalog.json",
            r#"{"schema":"olm.package","name":"cert-manager","defaultChannel":"stable"}
{"schema":"olm.channel","package":"cert-manager","name":"stable","entries":[{"name":"cert-manager.v1.14.0"}]}
{"schema":"olm.channel","package":"cert-manager","name":"candidate","entries":[]}"#,
        );

        let op = single(parse_operator_dir(&temp.path().join("cert-manager")));
        assert_eq!(op.entry.default_channel, "stable");
        assert_eq!(op.entry.channels, vec!["candidate", "stable"]);
    }

    #[test]
    fn test_split_package_and_channel_files() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "odf-operator/package.yaml",
            "schema: olm.package\nname: odf-operator\ndefaultChannel: stable-4.16\n",
        );
        write(
            temp.path(),
            "odf-operator/channel.yaml",
            "schema: olm.channel\npackage: odf-operator\nname: stable-4.15\n---\nschema: olm.channel\npackage: odf-operator\nname: stable-4.16\n",
        );

        let op = single(parse_operator_dir(&temp.path().join("odf-operator")));
        assert_eq!(op.layout, CatalogLayout::SplitFiles);
        assert_eq!(op.entry.channels, vec!["stable-4.15", "stable-4.16"]);
    }

    #[test]
    fn test_channel_directory() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "gitops/package.yaml",
            "schema: olm.package\nname: openshift-gitops-operator\ndefaultChannel: latest\n",
        );
        write(
            temp.path(),
            "gitops/channels/latest.yaml",
            "schema: olm.channel\npackage: openshift-gitops-operator\nname: latest\n",
        );
        write(
            temp.path(),
            "gitops/channels/gitops-1.13.yaml",
            "schema: olm.channel\npackage: openshift-gitops-operator\nname: gitops-1.13\n",
        );

        let op = single(parse_operator_dir(&temp.path().join("gitops")));
        assert_eq!(op.layout, CatalogLayout::ChannelDirectory);
        assert_eq!(op.entry.name, "openshift-gitops-operator");
        assert_eq!(op.entry.channels, vec!["gitops-1.13", "latest"]);
    }

    #[test]
    fn test_legacy_package_manifest() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "etcd/etcd.package.yaml",
            "packageName: etcd\ndefaultChannel: singlenamespace-alpha\nchannels:\n  - name: singlenamespace-alpha\n    currentCSV: etcdoperator.v0.9.4\n  - name: clusterwide-alpha\n    currentCSV: etcdoperator.v0.9.4-clusterwide\n",
        );

        let op = single(parse_operator_dir(&temp.path().join("etcd")));
        assert_eq!(op.entry.name, "etcd");
        assert_eq!(
            op.entry.channels,
            vec!["clusterwide-alpha", "singlenamespace-alpha"]
        );
    }

    #[test]
    fn test_loose_text_layout() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "strimzi/index.txt",
            "schema: olm.package\nname: strimzi-kafka-operator\ndefaultChannel: stable\n\nschema: olm.channel\nname: stable\n  entries:\n    - name: strimzi-cluster-operator.v0.41.0\n\nschema: olm.channel\nname: strimzi-0.41.x\n",
        );

        let op = single(parse_operator_dir(&temp.path().join("strimzi")));
        assert_eq!(op.layout, CatalogLayout::LooseText);
        assert_eq!(op.entry.name, "strimzi-kafka-operator");
        assert_eq!(op.entry.channels, vec!["stable", "strimzi-0.41.x"]);
    }

    #[test]
    fn test_broken_yaml_falls_back_to_loose_text() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "grafana/catalog.yaml",
            "schema: olm.package\nname: grafana-operator\ndefaultChannel: v5\nrelatedImages: [unterminated\n",
        );

        let op = single(parse_operator_dir(&temp.path().join("grafana")));
        assert_eq!(op.entry.name, "grafana-operator");
        assert_eq!(op.entry.default_channel, "v5");
    }

    #[test]
    fn test_malformed_entry_is_isolated() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "good/catalog.yaml",
            "schema: olm.package\nname: good-operator\ndefaultChannel: stable\n",
        );
        write(
            temp.path(),
            "bad/catalog.yaml",
            "schema: olm.channel\nname: alpha\n",
        );
        write(temp.path(), "empty/.keep", "");

        let report = parse_configs_dir(temp.path()).unwrap();
        assert_eq!(report.operators.len(), 1);
        assert_eq!(report.operators[0].name, "good-operator");
        assert_eq!(report.skipped.len(), 2);
        assert!(report
            .skipped
            .iter()
            .any(|e| e.message.contains("no defaultChannel")));
    }

    #[test]
    fn test_top_level_file_is_parsed() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "argocd-operator.json",
            r#"[{"schema":"olm.package","name":"argocd-operator","defaultChannel":"alpha"}]"#,
        );
        write(temp.path(), "README.md", "not a catalog");

        let report = parse_configs_dir(temp.path()).unwrap();
        assert_eq!(report.operators.len(), 1);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_json_stream_with_several_packages() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "catalog.json",
            r#"{"schema":"olm.package","name":"alpha-op","defaultChannel":"stable"}
{"schema":"olm.channel","package":"alpha-op","name":"stable","entries":[]}
{"schema":"olm.package","name":"beta-op","defaultChannel":"fast"}
{"schema":"olm.channel","package":"beta-op","name":"fast","entries":[]}
{"schema":"olm.channel","package":"beta-op","name":"stable","entries":[]}"#,
        );

        let report = parse_configs_dir(temp.path()).unwrap();
        assert!(report.skipped.is_empty());
        assert_eq!(
            report.operators,
            vec![
                OperatorEntry::new("alpha-op", "stable", ["stable"]),
                OperatorEntry::new("beta-op", "fast", ["fast", "stable"]),
            ]
        );
    }

    #[test]
    fn test_directory_with_several_packages_reports_each() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "bundle/package.yaml",
            "schema: olm.package\nname: gamma-op\ndefaultChannel: v1\n---\nschema: olm.package\nname: delta-op\n",
        );

        let results = parse_operator_dir(&temp.path().join("bundle"));
        assert_eq!(results.len(), 2);
        let gamma = results
            .iter()
            .flatten()
            .find(|op| op.entry.name == "gamma-op")
            .unwrap();
        assert_eq!(gamma.entry.default_channel, "v1");
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(e) if e.operator == "delta-op")));
    }

    #[test]
    fn test_split_chunks_and_outermost_name() {
        let chunks = split_chunks("a: 1\n---\nname: x\n  - name: y\n\nname: z\n");
        assert_eq!(chunks.len(), 3);
        assert_eq!(outermost_name(chunks[1]).as_deref(), Some("x"));
    }
}
