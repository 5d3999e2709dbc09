//! Packages
//!
//! A package groups files, declares custom types, libraries, and
//! package-level validators, and depends on other packages with versioned
//! constraints. Load order is topological over dependencies and
//! `load_after` hints; files within a package load in `load_order`.

use crate::error::{Result, TabuluaError};
use crate::registry::{naming, CustomTypeSpec};
use crate::validator::ValidatorSpec;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::fmt;

/// A `cmp_version` predicate: `<op>x.y.z`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionPred {
    pub op: CmpOp,
    pub version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

impl VersionPred {
    pub fn parse(src: &str) -> Result<Self> {
        const OPS: [(&str, CmpOp); 6] = [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            ("<=", CmpOp::Le),
            (">=", CmpOp::Ge),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
        ];
        let (op_src, op) = OPS
            .iter()
            .find(|(sym, _)| src.starts_with(sym))
            .ok_or_else(|| TabuluaError::InvalidVersionReq(src.to_string()))?;
        let version = Version::parse(&src[op_src.len()..])
            .map_err(|_| TabuluaError::InvalidVersionReq(src.to_string()))?;
        Ok(Self { op: *op, version })
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self.op {
            CmpOp::Eq => version == &self.version,
            CmpOp::Ne => version != &self.version,
            CmpOp::Lt => version < &self.version,
            CmpOp::Le => version <= &self.version,
            CmpOp::Gt => version > &self.version,
            CmpOp::Ge => version >= &self.version,
        }
    }
}

impl fmt::Display for VersionPred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.symbol(), self.version)
    }
}

impl TryFrom<String> for VersionPred {
    type Error = TabuluaError;

    fn try_from(src: String) -> Result<Self> {
        Self::parse(&src)
    }
}

impl From<VersionPred> for String {
    fn from(pred: VersionPred) -> Self {
        pred.to_string()
    }
}

/// A dependency on another package, with version-range predicates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub req: Vec<VersionPred>,
}

impl Dependency {
    pub fn matches(&self, version: &Version) -> bool {
        self.req.iter().all(|pred| pred.matches(version))
    }
}

/// A package manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Dotted package identifier (`game.items`)
    pub id: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    /// Packages that must load before this one, beyond the dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_after: Vec<String>,
    /// File load order within the package
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_types: Vec<CustomTypeSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<ValidatorSpec>,
}

impl PackageManifest {
    pub fn new(id: impl Into<String>, version: Version) -> Result<Self> {
        let id = id.into();
        if !naming::is_name(&id) {
            return Err(TabuluaError::InvalidPackageId(id));
        }
        Ok(Self {
            id,
            version,
            dependencies: Vec::new(),
            load_after: Vec::new(),
            load_order: Vec::new(),
            custom_types: Vec::new(),
            validators: Vec::new(),
        })
    }
}

/// Order packages for loading: every dependency and `load_after` target
/// precedes its dependents; ties keep declaration order. Dependency
/// presence and version predicates are checked first.
pub fn resolve_load_order(packages: &[PackageManifest]) -> Result<Vec<&PackageManifest>> {
    let mut by_id: HashMap<&str, usize> = HashMap::new();
    for (i, package) in packages.iter().enumerate() {
        if !naming::is_name(&package.id) {
            return Err(TabuluaError::InvalidPackageId(package.id.clone()));
        }
        if by_id.insert(&package.id, i).is_some() {
            return Err(TabuluaError::InvalidPackageId(format!(
                "{} declared twice",
                package.id
            )));
        }
    }

    // edges: prerequisite -> dependent
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); packages.len()];
    let mut indegree = vec![0usize; packages.len()];
    for (i, package) in packages.iter().enumerate() {
        for dep in &package.dependencies {
            let Some(&j) = by_id.get(dep.id.as_str()) else {
                return Err(TabuluaError::MissingDependency {
                    package: package.id.clone(),
                    dependency: dep.id.clone(),
                });
            };
            if !dep.matches(&packages[j].version) {
                let required = dep
                    .req
                    .iter()
                    .map(VersionPred::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                return Err(TabuluaError::DependencyVersion {
                    package: package.id.clone(),
                    dependency: dep.id.clone(),
                    required,
                    found: packages[j].version.to_string(),
                });
            }
            edges[j].push(i);
            indegree[i] += 1;
        }
        // load_after hints only order packages that are actually present
        for after in &package.load_after {
            if let Some(&j) = by_id.get(after.as_str()) {
                edges[j].push(i);
                indegree[i] += 1;
            }
        }
    }

    let mut ready: BinaryHeap<std::cmp::Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| std::cmp::Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(packages.len());
    while let Some(std::cmp::Reverse(i)) = ready.pop() {
        order.push(&packages[i]);
        for &next in &edges[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(std::cmp::Reverse(next));
            }
        }
    }

    if order.len() != packages.len() {
        let stuck = packages
            .iter()
            .filter(|p| order.iter().all(|o| o.id != p.id))
            .map(|p| p.id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(TabuluaError::PackageCycle(stuck));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(id: &str, version: &str) -> PackageManifest {
        PackageManifest::new(id, Version::parse(version).unwrap()).unwrap()
    }

    fn depend(manifest: &mut PackageManifest, id: &str, req: &[&str]) {
        manifest.dependencies.push(Dependency {
            id: id.to_string(),
            req: req.iter().map(|s| VersionPred::parse(s).unwrap()).collect(),
        });
    }

    #[test]
    fn test_version_predicates() {
        let pred = VersionPred::parse(">=1.2.0").unwrap();
        assert!(pred.matches(&Version::parse("1.2.0").unwrap()));
        assert!(pred.matches(&Version::parse("2.0.0").unwrap()));
        assert!(!pred.matches(&Version::parse("1.1.9").unwrap()));
        assert!(VersionPred::parse("1.2.0").is_err());
    }

    #[test]
    fn test_load_order_follows_dependencies() {
        let mut a = package("game.items", "1.0.0");
        let base = package("game.core", "2.1.0");
        depend(&mut a, "game.core", &[">=2.0.0", "<3.0.0"]);
        let pkgs = [a, base];
        let order = resolve_load_order(&pkgs).unwrap();
        let ids: Vec<&str> = order.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["game.core", "game.items"]);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut a = package("game.items", "1.0.0");
        let base = package("game.core", "1.9.0");
        depend(&mut a, "game.core", &[">=2.0.0"]);
        assert!(matches!(
            resolve_load_order(&[a, base]),
            Err(TabuluaError::DependencyVersion { .. })
        ));
    }

    #[test]
    fn test_missing_dependency() {
        let mut a = package("game.items", "1.0.0");
        depend(&mut a, "game.core", &[]);
        assert!(matches!(
            resolve_load_order(&[a]),
            Err(TabuluaError::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut a = package("pkg.a", "1.0.0");
        let mut b = package("pkg.b", "1.0.0");
        depend(&mut a, "pkg.b", &[]);
        depend(&mut b, "pkg.a", &[]);
        assert!(matches!(
            resolve_load_order(&[a, b]),
            Err(TabuluaError::PackageCycle(_))
        ));
    }

    #[test]
    fn test_load_after_orders_without_dependency() {
        let mut a = package("pkg.a", "1.0.0");
        let b = package("pkg.b", "1.0.0");
        a.load_after.push("pkg.b".to_string());
        let pkgs = [a, b];
        let order = resolve_load_order(&pkgs).unwrap();
        let ids: Vec<&str> = order.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["pkg.b", "pkg.a"]);
    }

    #[test]
    fn test_manifest_deserializes() {
        let manifest: PackageManifest = serde_json::from_str(
            r#"{
                "id": "game.core",
                "version": "1.2.3",
                "dependencies": [{"id": "game.base", "req": [">=1.0.0"]}],
                "custom_types": [{"name": "Hp", "parent": "integer", "min": 0}],
                "validators": ["self.hp > 0", {"expr": "count > 0", "level": "warn"}]
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.id, "game.core");
        assert_eq!(manifest.custom_types[0].constraints.min, Some(0.0));
        assert_eq!(manifest.validators.len(), 2);
    }

    #[test]
    fn test_bad_package_id() {
        assert!(PackageManifest::new("Bad..id", Version::new(1, 0, 0)).is_err());
    }
}
