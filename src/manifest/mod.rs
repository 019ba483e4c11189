use std::fs;
use std::io::Write;
use std::path::Path;

use clap::ValueEnum;
use log::{debug, info};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};

pub mod patterns;

pub use patterns::{UrlPatterns, normalize_url};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const EXPECTED_NAME: &str = "Bitrix24: Bad Advice";

const CONTENT_SCRIPTS: &str = "content_scripts";
const WEB_ACCESSIBLE_RESOURCES: &str = "web_accessible_resources";
const HOST_PERMISSIONS: &str = "host_permissions";
const MATCHES: &str = "matches";

/// How new patterns are combined with a pattern list already present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InjectionPolicy {
    /// Append patterns that are not already listed; keep everything else.
    #[default]
    Merge,
    /// Drop the existing list and write exactly the new pair.
    Replace,
}

/// An extension manifest held as an order-preserving JSON object. Only the
/// URL-pattern fields are ever touched; every other key round-trips as-is.
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    root: Map<String, Value>,
}

impl Manifest {
    pub fn parse(bytes: &[u8]) -> CoreResult<Self> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(root)) => Ok(Self { root }),
            Ok(other) => Err(CoreError::MalformedManifest(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
            Err(err) => Err(CoreError::MalformedManifest(err.to_string())),
        }
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let bytes = fs::read(path)
            .map_err(|e| CoreError::io(format!("reading {}", path.display()), e))?;
        Self::parse(&bytes)
    }

    pub fn name(&self) -> Option<&str> {
        self.root.get("name").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub fn validate(&self, expected_name: &str) -> CoreResult<()> {
        match self.name() {
            Some(name) if name == expected_name => Ok(()),
            found => Err(CoreError::IdentityMismatch {
                expected: expected_name.to_owned(),
                found: found.map(str::to_owned),
            }),
        }
    }

    /// Inject both patterns into every `content_scripts[*].matches`,
    /// `web_accessible_resources[*].matches` and the top-level
    /// `host_permissions`.
    ///
    /// Record arrays that are absent are not created; a missing or non-array
    /// `matches`/`host_permissions` becomes exactly the new pair.
    pub fn apply_patterns(&mut self, patterns: &UrlPatterns, policy: InjectionPolicy) {
        let new = patterns.patterns();

        for key in [CONTENT_SCRIPTS, WEB_ACCESSIBLE_RESOURCES] {
            let Some(Value::Array(records)) = self.root.get_mut(key) else {
                debug!("manifest: no {key} array, leaving it out");
                continue;
            };
            let mut touched = 0;
            for record in records.iter_mut() {
                if let Value::Object(fields) = record {
                    inject(fields, MATCHES, &new, policy);
                    touched += 1;
                }
            }
            debug!("manifest: updated {touched} {key} entries");
        }

        inject(&mut self.root, HOST_PERMISSIONS, &new, policy);
        info!(
            "manifest: injected {} and {} ({:?})",
            new[0], new[1], policy
        );
    }

    pub fn to_pretty_bytes(&self) -> CoreResult<Vec<u8>> {
        serde_json::to_vec_pretty(&self.root)
            .map_err(|e| CoreError::MalformedManifest(format!("serialization failed: {e}")))
    }

    /// Serialize in memory, then swap the result in over `path`. The staging
    /// file is created exclusively with a random name, so it never replaces a
    /// file shipped next to the manifest. The manifest keeps its permissions.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let bytes = self.to_pretty_bytes()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let writing =
            |e: std::io::Error| CoreError::io(format!("writing {}", path.display()), e);
        let mut staging = tempfile::Builder::new()
            .prefix(".manifest-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(writing)?;
        staging.write_all(&bytes).map_err(writing)?;
        if let Ok(meta) = fs::metadata(path) {
            staging
                .as_file()
                .set_permissions(meta.permissions())
                .map_err(writing)?;
        }
        staging
            .persist(path)
            .map_err(|e| CoreError::io(format!("replacing {}", path.display()), e.error))?;
        debug!("manifest: saved {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

fn inject(fields: &mut Map<String, Value>, key: &str, new: &[String; 2], policy: InjectionPolicy) {
    if policy == InjectionPolicy::Merge
        && let Some(Value::Array(existing)) = fields.get_mut(key)
    {
        add_unique(existing, new);
        return;
    }
    fields.insert(
        key.to_owned(),
        Value::Array(new.iter().cloned().map(Value::String).collect()),
    );
}

fn add_unique(list: &mut Vec<Value>, values: &[String]) {
    for value in values {
        let present = list.iter().any(|item| item.as_str() == Some(value.as_str()));
        if !present {
            list.push(Value::String(value.clone()));
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(value: Value) -> Manifest {
        Manifest::parse(value.to_string().as_bytes()).unwrap()
    }

    fn sample() -> Manifest {
        manifest(json!({
            "manifest_version": 3,
            "name": EXPECTED_NAME,
            "version": "1.4.2",
            "permissions": ["storage", "tabs"],
            "content_scripts": [
                {
                    "matches": ["http://old.example/*"],
                    "js": ["content.js"],
                    "css": ["content.css"],
                    "run_at": "document_idle"
                },
                { "js": ["second.js"] }
            ],
            "web_accessible_resources": [
                { "resources": ["img/*.png"], "matches": ["https://old.example/*"] }
            ],
            "icons": { "16": "icon16.png", "128": "icon128.png" }
        }))
    }

    fn patterns() -> UrlPatterns {
        normalize_url("new.example").unwrap()
    }

    fn strings(value: Option<&Value>) -> Vec<&str> {
        value
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    #[test]
    fn accepts_expected_name_only() {
        assert!(sample().validate(EXPECTED_NAME).is_ok());

        for value in [json!({"name": "Other"}), json!({}), json!({"name": 42})] {
            let m = manifest(value);
            let before = m.clone();
            let err = m.validate(EXPECTED_NAME).unwrap_err();
            assert!(matches!(err, CoreError::IdentityMismatch { .. }));
            assert_eq!(m, before);
        }
    }

    #[test]
    fn rejects_unparseable_or_non_object_manifests() {
        for raw in [&b"{ not json"[..], b"[1, 2]", b"\"name\"", b""] {
            assert!(matches!(
                Manifest::parse(raw),
                Err(CoreError::MalformedManifest(_))
            ));
        }
    }

    #[test]
    fn merge_appends_to_existing_matches() {
        let mut m = sample();
        m.apply_patterns(&patterns(), InjectionPolicy::Merge);

        let scripts = m.get("content_scripts").unwrap().as_array().unwrap();
        assert_eq!(
            strings(scripts[0].get("matches")),
            vec![
                "http://old.example/*",
                "http://new.example/*",
                "https://new.example/*"
            ]
        );
        assert_eq!(
            strings(scripts[1].get("matches")),
            vec!["http://new.example/*", "https://new.example/*"]
        );

        let resources = m.get("web_accessible_resources").unwrap().as_array().unwrap();
        assert_eq!(
            strings(resources[0].get("matches")),
            vec![
                "https://old.example/*",
                "http://new.example/*",
                "https://new.example/*"
            ]
        );
        assert_eq!(
            strings(m.get("host_permissions")),
            vec!["http://new.example/*", "https://new.example/*"]
        );
    }

    #[test]
    fn replace_discards_existing_matches() {
        let mut m = sample();
        m.apply_patterns(&patterns(), InjectionPolicy::Replace);

        let scripts = m.get("content_scripts").unwrap().as_array().unwrap();
        assert_eq!(
            strings(scripts[0].get("matches")),
            vec!["http://new.example/*", "https://new.example/*"]
        );
        let resources = m.get("web_accessible_resources").unwrap().as_array().unwrap();
        assert_eq!(
            strings(resources[0].get("matches")),
            vec!["http://new.example/*", "https://new.example/*"]
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let mut once = sample();
        once.apply_patterns(&patterns(), InjectionPolicy::Merge);
        let mut twice = once.clone();
        twice.apply_patterns(&patterns(), InjectionPolicy::Merge);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_keeps_duplicates_already_present_and_non_strings() {
        let mut m = manifest(json!({
            "name": EXPECTED_NAME,
            "host_permissions": ["https://new.example/*", 7, "<all_urls>"]
        }));
        m.apply_patterns(&patterns(), InjectionPolicy::Merge);
        assert_eq!(
            m.get("host_permissions").unwrap(),
            &json!(["https://new.example/*", 7, "<all_urls>", "http://new.example/*"])
        );
    }

    #[test]
    fn non_array_matches_is_overwritten() {
        let mut m = manifest(json!({
            "name": EXPECTED_NAME,
            "content_scripts": [{ "matches": "http://x/*", "js": ["a.js"] }, "bogus"],
            "host_permissions": "http://x/*"
        }));
        m.apply_patterns(&patterns(), InjectionPolicy::Merge);
        assert_eq!(
            m.get("content_scripts").unwrap(),
            &json!([
                { "matches": ["http://new.example/*", "https://new.example/*"], "js": ["a.js"] },
                "bogus"
            ])
        );
        assert_eq!(
            strings(m.get("host_permissions")),
            vec!["http://new.example/*", "https://new.example/*"]
        );
    }

    #[test]
    fn absent_record_arrays_are_not_created() {
        let mut m = manifest(json!({ "name": EXPECTED_NAME }));
        m.apply_patterns(&patterns(), InjectionPolicy::Merge);
        assert!(m.get("content_scripts").is_none());
        assert!(m.get("web_accessible_resources").is_none());
        assert!(m.get("host_permissions").is_some());
    }

    #[test]
    fn untouched_fields_survive_in_order() {
        let before = sample();
        let mut after = before.clone();
        after.apply_patterns(&patterns(), InjectionPolicy::Merge);

        for key in ["manifest_version", "name", "version", "permissions", "icons"] {
            assert_eq!(before.get(key), after.get(key), "{key}");
        }
        let scripts_before = before.get("content_scripts").unwrap();
        let scripts_after = after.get("content_scripts").unwrap();
        for field in ["js", "css", "run_at"] {
            assert_eq!(scripts_before[0].get(field), scripts_after[0].get(field));
        }

        let keys: Vec<&String> = after.root.keys().collect();
        assert_eq!(
            keys,
            vec![
                "manifest_version",
                "name",
                "version",
                "permissions",
                "content_scripts",
                "web_accessible_resources",
                "icons",
                "host_permissions"
            ]
        );
    }

    #[test]
    fn pretty_output_uses_two_space_indent() {
        let m = manifest(json!({ "name": "x", "version": "1" }));
        let text = String::from_utf8(m.to_pretty_bytes().unwrap()).unwrap();
        assert_eq!(text, "{\n  \"name\": \"x\",\n  \"version\": \"1\"\n}");
    }

    #[test]
    fn save_replaces_file_without_leftovers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(MANIFEST_FILE);
        fs::write(&path, "{\"name\": \"old\"}").unwrap();

        let mut m = Manifest::load(&path).unwrap();
        m.apply_patterns(&patterns(), InjectionPolicy::Merge);
        m.save(&path).unwrap();

        let reloaded = Manifest::load(&path).unwrap();
        assert_eq!(reloaded, m);
        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(MANIFEST_FILE)]);
    }

    #[test]
    fn save_leaves_neighbouring_files_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(MANIFEST_FILE);
        fs::write(&path, "{\"name\": \"old\"}").unwrap();
        let shipped = tmp.path().join("manifest.json.tmp");
        fs::write(&shipped, b"shipped with the extension").unwrap();

        let mut m = Manifest::load(&path).unwrap();
        m.apply_patterns(&patterns(), InjectionPolicy::Replace);
        m.save(&path).unwrap();

        assert_eq!(fs::read(&shipped).unwrap(), b"shipped with the extension");
        assert_eq!(Manifest::load(&path).unwrap(), m);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn save_keeps_manifest_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(MANIFEST_FILE);
        fs::write(&path, "{\"name\": \"old\"}").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        Manifest::load(&path).unwrap().save(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
