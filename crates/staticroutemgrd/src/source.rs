//! Manifest directory watcher.
//!
//! Reads `StaticRoute` documents from `*.yaml` / `*.yml` files and turns
//! differences between successive scans into dispatcher events.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use staticroute_common::KeyOp;
use tracing::{debug, info, warn};

use crate::dispatcher::{Observation, RouteEvent};
use crate::error::{MgrError, Result};
use crate::types::{DesiredRouteSpec, RawRouteSpec};

/// API group/version of the resource
pub const API_VERSION: &str = "networking.digitalocean.com/v1";

/// Resource kind handled by this controller
pub const KIND: &str = "StaticRoute";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    api_version: Option<String>,
    metadata: Metadata,
    #[serde(default)]
    spec: RawRouteSpec,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
}

/// Result of one directory scan.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub specs: BTreeMap<String, DesiredRouteSpec>,
    /// Resources present on disk whose spec was rejected
    pub invalid: BTreeSet<String>,
}

/// Polls a directory of manifests.
pub struct ManifestSource {
    dir: PathBuf,
    known: BTreeMap<String, DesiredRouteSpec>,
    scanned: bool,
}

impl ManifestSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            known: BTreeMap::new(),
            scanned: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Specs seen by the last successful poll.
    pub fn known(&self) -> &BTreeMap<String, DesiredRouteSpec> {
        &self.known
    }

    /// Reads every manifest file in the directory.
    ///
    /// A file that cannot be read or is not valid YAML fails the scan; a
    /// document with an invalid spec is only logged.
    pub fn scan(&self) -> Result<ScanResult> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_manifest(p))
            .collect();
        paths.sort();

        let mut result = ScanResult::default();
        for path in paths {
            let content = fs::read_to_string(&path)?;
            parse_manifests(&path, &content, &mut result)?;
        }
        Ok(result)
    }

    /// Scans the directory and returns events for everything that changed
    /// since the previous poll. The first poll reports every resource as
    /// resumed.
    pub fn poll(&mut self) -> Result<Vec<RouteEvent>> {
        let ScanResult { mut specs, invalid } = self.scan()?;

        // a broken edit keeps the last good spec
        for name in &invalid {
            if let Some(previous) = self.known.get(name) {
                specs.entry(name.clone()).or_insert_with(|| previous.clone());
            }
        }

        let mut events = Vec::new();
        if !self.scanned {
            for (name, spec) in &specs {
                events.push(KeyOp::set(name.clone(), Observation::resumed(spec.clone())));
            }
            info!(
                "Initial scan of {}: {} resources",
                self.dir.display(),
                specs.len()
            );
        } else {
            for (name, spec) in &specs {
                if self.known.get(name) != Some(spec) {
                    debug!("Resource {} changed", name);
                    events.push(KeyOp::set(name.clone(), Observation::observed(spec.clone())));
                }
            }
            for name in self.known.keys() {
                if !specs.contains_key(name) {
                    debug!("Resource {} removed", name);
                    events.push(KeyOp::del(name.clone(), Observation::deleted()));
                }
            }
        }

        self.known = specs;
        self.scanned = true;
        Ok(events)
    }
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn parse_manifests(path: &Path, content: &str, result: &mut ScanResult) -> Result<()> {
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| MgrError::manifest(path, e.to_string()))?;
        if value.is_null() {
            continue;
        }
        if value.get("kind").and_then(|k| k.as_str()) != Some(KIND) {
            continue;
        }

        let manifest: Manifest = match serde_yaml::from_value(value) {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping malformed {} in {}: {}", KIND, path.display(), e);
                continue;
            }
        };
        let name = manifest.metadata.name;
        if let Some(version) = manifest.api_version.as_deref() {
            if version != API_VERSION {
                warn!("{} {} uses apiVersion {}, expected {}", KIND, name, version, API_VERSION);
            }
        }

        match DesiredRouteSpec::try_from(manifest.spec) {
            Ok(spec) => {
                if result.specs.insert(name.clone(), spec).is_some() {
                    warn!("Duplicate {} {}; last definition wins", KIND, name);
                }
                result.invalid.remove(&name);
            }
            Err(source) => {
                let err = MgrError::Spec {
                    resource: name.clone(),
                    source,
                };
                warn!("Skipping {}: {}", path.display(), err);
                result.invalid.insert(name);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GatewaySource;
    use pretty_assertions::assert_eq;
    use staticroute_common::Operation;

    const ROUTE: &str = r#"
apiVersion: networking.digitalocean.com/v1
kind: StaticRoute
metadata:
  name: static-route-test
spec:
  destinations: ["10.42.10.0/24"]
  gateway: "10.0.2.100"
"#;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_scan_multi_document() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "routes.yaml",
            &format!(
                "{}---\nkind: ConfigMap\nmetadata:\n  name: other\n---\n{}",
                ROUTE,
                r#"
kind: StaticRoute
metadata:
  name: legacy
spec:
  destination: 10.9.0.0/16
  clusterService: egress-gw
"#
            ),
        );
        write(dir.path(), "notes.txt", ROUTE);

        let result = ManifestSource::new(dir.path()).scan().unwrap();
        assert_eq!(result.specs.len(), 2);
        assert_eq!(
            result.specs["legacy"].gateway,
            GatewaySource::ClusterService("egress-gw".to_string())
        );
        assert!(result.specs["static-route-test"]
            .destinations
            .contains("10.42.10.0/24"));
    }

    #[test]
    fn test_invalid_spec_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "bad.yml",
            "kind: StaticRoute\nmetadata:\n  name: broken\nspec:\n  destinations: [\"10.0.0.0/8\"]\n",
        );
        let result = ManifestSource::new(dir.path()).scan().unwrap();
        assert!(result.specs.is_empty());
        assert!(result.invalid.contains("broken"));
    }

    #[test]
    fn test_yaml_syntax_error_fails_scan() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.yaml", "kind: [StaticRoute\n");
        let err = ManifestSource::new(dir.path()).scan().unwrap_err();
        assert!(matches!(err, MgrError::Manifest { .. }));
    }

    #[test]
    fn test_poll_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "route.yaml", ROUTE);
        let mut source = ManifestSource::new(dir.path());

        let events = source.poll().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, Operation::Set);
        assert!(events[0].data.resumed);

        assert!(source.poll().unwrap().is_empty());

        write(dir.path(), "route.yaml", &ROUTE.replace("10.0.2.100", "10.0.2.101"));
        let events = source.poll().unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].data.resumed);
        assert_eq!(
            events[0].data.spec.as_ref().map(|s| s.gateway.to_string()),
            Some("10.0.2.101".to_string())
        );

        fs::remove_file(dir.path().join("route.yaml")).unwrap();
        let events = source.poll().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, Operation::Del);
        assert_eq!(events[0].key, "static-route-test");
    }

    #[test]
    fn test_broken_edit_keeps_last_good_spec() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "route.yaml", ROUTE);
        let mut source = ManifestSource::new(dir.path());
        source.poll().unwrap();

        write(
            dir.path(),
            "route.yaml",
            &ROUTE.replace("  gateway: \"10.0.2.100\"\n", ""),
        );
        assert!(source.poll().unwrap().is_empty());
        assert!(source.known().contains_key("static-route-test"));
    }
}
