//! Project manifest (`envy.toml`) and recipe document parsing.
//!
//! The manifest hands the engine an ordered list of package configurations
//! plus cache/depot metadata. Recipe documents use the same package grammar
//! and add verb commands, product declarations, and dependency tables.

use crate::cfg::{PkgCfg, Source};
use crate::key::parse_identity;
use crate::options::{options_from_toml, serialize_options};
use crate::phase::Phase;
use crate::{ConfigError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Parsed project manifest.
#[derive(Debug)]
pub struct Manifest {
    pub cache_root: Option<Utf8PathBuf>,
    pub depots: Vec<String>,
    pub packages: Vec<Arc<PkgCfg>>,
    pub path: Utf8PathBuf,
}

/// Optional per-verb subprocess commands. Absent slots fall back to the
/// engine defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerbCommands {
    pub fetch: Option<String>,
    pub stage: Option<String>,
    pub build: Option<String>,
    pub install: Option<String>,
    pub check: Option<String>,
    pub deploy: Option<String>,
}

impl VerbCommands {
    pub fn is_empty(&self) -> bool {
        self == &VerbCommands::default()
    }
}

/// A parsed recipe document: the package's artifact sources, verb commands,
/// products, and declared dependencies.
#[derive(Debug)]
pub struct RecipeDoc {
    pub identity: String,
    pub sources: Vec<Source>,
    pub verbs: VerbCommands,
    pub products: BTreeMap<String, String>,
    pub deps: Vec<Arc<PkgCfg>>,
}

impl Manifest {
    /// Locate `envy.toml` by walking up from `start`.
    pub fn discover(start: &Utf8Path) -> Option<Utf8PathBuf> {
        let mut dir = Some(start);
        while let Some(d) = dir {
            let candidate = d.join("envy.toml");
            if candidate.is_file() {
                return Some(candidate);
            }
            dir = d.parent();
        }
        None
    }

    pub fn load(path: &Utf8Path) -> Result<Manifest> {
        let text = std::fs::read_to_string(path.as_std_path()).map_err(|source| {
            ConfigError::Io {
                path: path.to_string(),
                source,
            }
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Utf8Path) -> Result<Manifest> {
        let root: toml::Table = text.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        let base_dir = path.parent().unwrap_or(Utf8Path::new(".")).to_path_buf();

        let mut cache_root = None;
        let mut depots = Vec::new();
        if let Some(meta) = root.get("envy") {
            let meta = expect_table(meta, "envy", path)?;
            if let Some(v) = meta.get("cache_root") {
                cache_root = Some(Utf8PathBuf::from(expect_str(v, "cache_root", path)?));
            }
            if let Some(v) = meta.get("depots") {
                let arr = v.as_array().ok_or_else(|| ConfigError::Parse {
                    path: path.to_string(),
                    reason: "envy.depots must be an array of strings".to_string(),
                })?;
                for item in arr {
                    depots.push(expect_str(item, "depots entry", path)?.to_string());
                }
            }
        }

        let mut packages = Vec::new();
        if let Some(pkgs) = root.get("package") {
            let arr = pkgs.as_array().ok_or_else(|| ConfigError::Parse {
                path: path.to_string(),
                reason: "package must be an array of tables".to_string(),
            })?;
            for entry in arr {
                let table = expect_table(entry, "package", path)?;
                packages.push(parse_package_decl(table, &base_dir, Some(path), None)?);
            }
        }

        Ok(Manifest {
            cache_root,
            depots,
            packages,
            path: path.to_path_buf(),
        })
    }
}

impl RecipeDoc {
    pub fn load(path: &Utf8Path, parent: Option<Arc<PkgCfg>>) -> Result<RecipeDoc> {
        let text = std::fs::read_to_string(path.as_std_path()).map_err(|source| {
            ConfigError::Io {
                path: path.to_string(),
                source,
            }
        })?;
        Self::parse(&text, path, parent)
    }

    pub fn parse(text: &str, path: &Utf8Path, parent: Option<Arc<PkgCfg>>) -> Result<RecipeDoc> {
        let root: toml::Table = text.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        let base_dir = path.parent().unwrap_or(Utf8Path::new(".")).to_path_buf();

        let identity = root
            .get("identity")
            .map(|v| expect_str(v, "identity", path))
            .transpose()?
            .ok_or_else(|| ConfigError::MissingField {
                field: "identity",
                context: path.to_string(),
            })?
            .to_string();
        parse_identity(&identity)?;

        let mut sources = Vec::new();
        if let Some(src) = root.get("source") {
            sources.push(parse_source(src, root.get("sha256"), &identity, &base_dir, path)?);
        }
        if let Some(list) = root.get("sources") {
            let arr = list.as_array().ok_or_else(|| ConfigError::Parse {
                path: path.to_string(),
                reason: "sources must be an array".to_string(),
            })?;
            for src in arr {
                sources.push(parse_source(src, None, &identity, &base_dir, path)?);
            }
        }

        let mut verbs = VerbCommands::default();
        if let Some(v) = root.get("verbs") {
            let table = expect_table(v, "verbs", path)?;
            let slot = |name: &'static str| -> Result<Option<String>> {
                table
                    .get(name)
                    .map(|v| expect_str(v, name, path).map(str::to_string))
                    .transpose()
            };
            verbs.fetch = slot("fetch")?;
            verbs.stage = slot("stage")?;
            verbs.build = slot("build")?;
            verbs.install = slot("install")?;
            verbs.check = slot("check")?;
            verbs.deploy = slot("deploy")?;
        }

        let mut products = BTreeMap::new();
        if let Some(v) = root.get("products") {
            let table = expect_table(v, "products", path)?;
            for (name, value) in table {
                products.insert(name.clone(), expect_str(value, "product", path)?.to_string());
            }
        }

        let mut deps = Vec::new();
        if let Some(v) = root.get("deps") {
            let arr = v.as_array().ok_or_else(|| ConfigError::Parse {
                path: path.to_string(),
                reason: "deps must be an array of tables".to_string(),
            })?;
            for entry in arr {
                let table = expect_table(entry, "deps", path)?;
                deps.push(parse_package_decl(
                    table,
                    &base_dir,
                    Some(path),
                    parent.clone(),
                )?);
            }
        }

        Ok(RecipeDoc {
            identity,
            sources,
            verbs,
            products,
            deps,
        })
    }
}

/// Parse one `[[package]]` / `[[deps]]` table into a pool configuration.
pub fn parse_package_decl(
    table: &toml::Table,
    base_dir: &Utf8Path,
    declaring_file: Option<&Utf8Path>,
    parent: Option<Arc<PkgCfg>>,
) -> Result<Arc<PkgCfg>> {
    let identity = table
        .get("identity")
        .map(|v| expect_str(v, "identity", declaring_file.unwrap_or(Utf8Path::new("?"))))
        .transpose()?
        .ok_or_else(|| ConfigError::MissingField {
            field: "identity",
            context: declaring_file
                .map(|p| p.to_string())
                .unwrap_or_else(|| "package declaration".to_string()),
        })?
        .to_string();
    parse_identity(&identity)?;
    let ctx = declaring_file.unwrap_or(Utf8Path::new("?"));

    let serialized_options = match table.get("options") {
        Some(toml::Value::Table(t)) => serialize_options(&options_from_toml(t)?)?,
        Some(other) => {
            return Err(ConfigError::BadOptions(format!(
                "options for {identity} must be a table, got {other}"
            )))
        }
        None => "{}".to_string(),
    };

    let needed_by = table
        .get("needed_by")
        .map(|v| expect_str(v, "needed_by", ctx).and_then(Phase::parse))
        .transpose()?;

    let product = table
        .get("product")
        .map(|v| expect_str(v, "product", ctx).map(str::to_string))
        .transpose()?;

    let reference = table
        .get("reference")
        .map(|v| {
            v.as_bool().ok_or_else(|| ConfigError::Parse {
                path: ctx.to_string(),
                reason: format!("reference for {identity} must be a boolean"),
            })
        })
        .transpose()?
        .unwrap_or(false);

    let weak = table
        .get("weak")
        .map(|v| {
            let weak_table = expect_table(v, "weak", ctx)?;
            parse_package_decl(weak_table, base_dir, declaring_file, parent.clone())
        })
        .transpose()?;

    let source = match table.get("source") {
        Some(src) => {
            if reference || weak.is_some() {
                return Err(ConfigError::InvalidSource {
                    identity,
                    reason: "weak/reference dependencies must not declare a source".to_string(),
                });
            }
            parse_source(src, table.get("sha256"), &identity, base_dir, ctx)?
        }
        None => {
            if !reference && weak.is_none() {
                return Err(ConfigError::MissingField {
                    field: "source",
                    context: format!("{identity} (declare source, reference, or weak)"),
                });
            }
            Source::WeakRef
        }
    };

    PkgCfg {
        identity,
        source,
        serialized_options,
        needed_by,
        parent,
        weak,
        source_dependencies: Vec::new(),
        product,
        declaring_file: declaring_file.map(Utf8Path::to_path_buf),
    }
    .into_pool()
}

/// Parse a `source` value, string or table.
fn parse_source(
    value: &toml::Value,
    outer_sha256: Option<&toml::Value>,
    identity: &str,
    base_dir: &Utf8Path,
    ctx: &Utf8Path,
) -> Result<Source> {
    let sha256 = outer_sha256
        .map(|v| match v {
            toml::Value::String(s) => Ok(s.clone()),
            other => Err(ConfigError::InvalidSource {
                identity: identity.to_string(),
                reason: format!("sha256 must be a string, got {other}"),
            }),
        })
        .transpose()?;

    match value {
        toml::Value::String(s) => Ok(classify_source_string(s, sha256, base_dir)),
        toml::Value::Table(t) => parse_source_table(t, sha256, identity, base_dir, ctx),
        other => Err(ConfigError::InvalidSource {
            identity: identity.to_string(),
            reason: format!("source must be a string or table, got {other}"),
        }),
    }
}

fn classify_source_string(s: &str, sha256: Option<String>, base_dir: &Utf8Path) -> Source {
    let lower = s.to_ascii_lowercase();
    let path_part = lower.split(['?', '#']).next().unwrap_or(&lower);
    if lower.starts_with("git://") || lower.starts_with("git+ssh://") || path_part.ends_with(".git")
    {
        return Source::Git {
            url: s.to_string(),
            reference: "HEAD".to_string(),
            subdir: None,
        };
    }
    for scheme in ["s3://", "https://", "http://", "ftps://", "ftp://", "file://"] {
        if lower.starts_with(scheme) {
            return Source::Remote {
                url: s.to_string(),
                sha256,
                subdir: None,
            };
        }
    }
    let path = Utf8PathBuf::from(s);
    let path = if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    };
    Source::Local { path }
}

fn parse_source_table(
    table: &toml::Table,
    sha256: Option<String>,
    identity: &str,
    base_dir: &Utf8Path,
    ctx: &Utf8Path,
) -> Result<Source> {
    let invalid = |reason: String| ConfigError::InvalidSource {
        identity: identity.to_string(),
        reason,
    };

    let sha256 = match table.get("sha256") {
        Some(toml::Value::String(s)) => Some(s.clone()),
        Some(other) => return Err(invalid(format!("sha256 must be a string, got {other}"))),
        None => sha256,
    };

    let subdir = table
        .get("subdir")
        .map(|v| expect_str(v, "subdir", ctx).map(str::to_string))
        .transpose()?;

    // A fetch command and a dependencies array imply each other.
    let fetch = table.get("fetch");
    let dependencies = table.get("dependencies");
    match (fetch, dependencies) {
        (Some(cmd), Some(deps)) => {
            let command = expect_str(cmd, "fetch", ctx)?.to_string();
            let deps = deps
                .as_array()
                .ok_or_else(|| invalid("dependencies must be an array of identities".into()))?
                .iter()
                .map(|v| expect_str(v, "dependency", ctx).map(str::to_string))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Source::FetchCommand {
                command,
                dependencies: deps,
            });
        }
        (Some(_), None) => {
            return Err(invalid(
                "source with a fetch command requires a dependencies array".into(),
            ))
        }
        (None, Some(_)) => {
            return Err(invalid(
                "source with dependencies requires a fetch command".into(),
            ))
        }
        (None, None) => {}
    }

    if let Some(url) = table.get("url") {
        return Ok(Source::Remote {
            url: expect_str(url, "url", ctx)?.to_string(),
            sha256,
            subdir,
        });
    }
    if let Some(git) = table.get("git") {
        let reference = table
            .get("ref")
            .map(|v| expect_str(v, "ref", ctx).map(str::to_string))
            .transpose()?
            .unwrap_or_else(|| "HEAD".to_string());
        return Ok(Source::Git {
            url: expect_str(git, "git", ctx)?.to_string(),
            reference,
            subdir,
        });
    }
    if let Some(path) = table.get("path") {
        let p = Utf8PathBuf::from(expect_str(path, "path", ctx)?);
        let p = if p.is_absolute() { p } else { base_dir.join(p) };
        return Ok(Source::Local { path: p });
    }

    Err(invalid(
        "source table must declare url, git, path, or fetch".into(),
    ))
}

fn expect_str<'v>(value: &'v toml::Value, field: &str, ctx: &Utf8Path) -> Result<&'v str> {
    value.as_str().ok_or_else(|| ConfigError::Parse {
        path: ctx.to_string(),
        reason: format!("{field} must be a string, got {value}"),
    })
}

fn expect_table<'v>(value: &'v toml::Value, field: &str, ctx: &Utf8Path) -> Result<&'v toml::Table> {
    value.as_table().ok_or_else(|| ConfigError::Parse {
        path: ctx.to_string(),
        reason: format!("{field} must be a table"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_manifest(text: &str) -> Manifest {
        Manifest::parse(text, Utf8Path::new("/proj/envy.toml")).unwrap()
    }

    #[test]
    fn minimal_manifest() {
        let m = parse_manifest(
            r#"
            [[package]]
            identity = "acme.tool@v1"
            source = "https://example.com/tool.tar.gz"
            "#,
        );
        assert_eq!(m.packages.len(), 1);
        let pkg = &m.packages[0];
        assert_eq!(pkg.identity, "acme.tool@v1");
        assert_eq!(pkg.serialized_options, "{}");
        assert!(matches!(
            pkg.source,
            Source::Remote { ref url, .. } if url == "https://example.com/tool.tar.gz"
        ));
    }

    #[test]
    fn manifest_metadata() {
        let m = parse_manifest(
            r#"
            [envy]
            cache_root = "/var/cache/envy"
            depots = ["https://depot.example.com/index.txt"]
            "#,
        );
        assert_eq!(m.cache_root.as_deref().unwrap(), "/var/cache/envy");
        assert_eq!(m.depots.len(), 1);
    }

    #[test]
    fn options_serialize_canonically() {
        let m = parse_manifest(
            r#"
            [[package]]
            identity = "acme.tool@v1"
            source = "https://example.com/t.tar.gz"
            options = { zeta = 1, alpha = "x" }
            "#,
        );
        assert_eq!(m.packages[0].serialized_options, r#"{alpha="x",zeta=1}"#);
        assert_eq!(
            m.packages[0].format_key(),
            r#"acme.tool@v1{alpha="x",zeta=1}"#
        );
    }

    #[test]
    fn git_source_forms() {
        let m = parse_manifest(
            r#"
            [[package]]
            identity = "acme.lib@v2"
            source = { git = "https://github.com/acme/lib.git", ref = "v2.0" }

            [[package]]
            identity = "acme.lib2@v1"
            source = "git://host/repo"
            "#,
        );
        assert!(matches!(
            m.packages[0].source,
            Source::Git { ref reference, .. } if reference == "v2.0"
        ));
        assert!(m.packages[1].is_git());
    }

    #[test]
    fn git_suffix_with_query_classifies() {
        let m = parse_manifest(
            r#"
            [[package]]
            identity = "acme.lib@v1"
            source = "https://host/repo.git?branch=x"
            "#,
        );
        assert!(m.packages[0].is_git());
    }

    #[test]
    fn local_source_resolves_relative_to_manifest() {
        let m = parse_manifest(
            r#"
            [[package]]
            identity = "local.tool@v1"
            source = "vendor/tool"
            "#,
        );
        assert!(matches!(
            m.packages[0].source,
            Source::Local { ref path } if path == "/proj/vendor/tool"
        ));
    }

    #[test]
    fn fetch_requires_dependencies_and_vice_versa() {
        let bad = Manifest::parse(
            r#"
            [[package]]
            identity = "acme.gen@v1"
            source = { fetch = "python gen.py" }
            "#,
            Utf8Path::new("/proj/envy.toml"),
        );
        assert!(bad.is_err());

        let bad2 = Manifest::parse(
            r#"
            [[package]]
            identity = "acme.gen@v1"
            source = { dependencies = ["acme.tool@v1"] }
            "#,
            Utf8Path::new("/proj/envy.toml"),
        );
        assert!(bad2.is_err());

        let good = parse_manifest(
            r#"
            [[package]]
            identity = "acme.gen@v1"
            source = { fetch = "python gen.py", dependencies = ["acme.tool@v1"] }
            "#,
        );
        assert!(matches!(
            good.packages[0].source,
            Source::FetchCommand { ref dependencies, .. } if dependencies.len() == 1
        ));
    }

    #[test]
    fn sha256_must_be_string() {
        let bad = Manifest::parse(
            r#"
            [[package]]
            identity = "acme.tool@v1"
            source = "https://example.com/t.tar.gz"
            sha256 = 42
            "#,
            Utf8Path::new("/proj/envy.toml"),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn weak_and_reference_forms() {
        let m = parse_manifest(
            r#"
            [[package]]
            identity = "ns.util@v1"
            reference = true

            [[package]]
            identity = "ns.util2@v1"
            weak = { identity = "ns.util2@fallback", source = "https://example.com/u.tar.gz" }
            "#,
        );
        assert!(m.packages[0].is_weak_reference());
        assert!(m.packages[0].weak.is_none());

        assert!(m.packages[1].is_weak_reference());
        let fallback = m.packages[1].weak.as_ref().unwrap();
        assert_eq!(fallback.identity, "ns.util2@fallback");
        assert!(fallback.is_remote());
    }

    #[test]
    fn same_identity_different_options_is_legal() {
        let m = parse_manifest(
            r#"
            [[package]]
            identity = "acme.tool@v1"
            source = "https://example.com/t.tar.gz"
            options = { a = 1 }

            [[package]]
            identity = "acme.tool@v1"
            source = "https://example.com/t.tar.gz"
            options = { a = 2 }
            "#,
        );
        assert_ne!(m.packages[0].format_key(), m.packages[1].format_key());
    }

    #[test]
    fn recipe_doc_full() {
        let doc = RecipeDoc::parse(
            r#"
            identity = "acme.tool@v1"
            source = "https://example.com/tool.tar.gz"
            sha256 = "00ff"

            [verbs]
            build = "make -j"
            install = "make install PREFIX=$ENVY_INSTALL_DIR"

            [products]
            tool = "bin/tool"

            [[deps]]
            identity = "acme.dep@v1"
            source = "https://example.com/dep.tar.gz"
            needed_by = "fetch"
            "#,
            Utf8Path::new("/proj/recipes/tool.toml"),
            None,
        )
        .unwrap();

        assert_eq!(doc.identity, "acme.tool@v1");
        assert_eq!(doc.sources.len(), 1);
        assert!(matches!(
            doc.sources[0],
            Source::Remote { ref sha256, .. } if sha256.as_deref() == Some("00ff")
        ));
        assert_eq!(doc.verbs.build.as_deref(), Some("make -j"));
        assert!(doc.verbs.fetch.is_none());
        assert_eq!(doc.products.get("tool").unwrap(), "bin/tool");
        assert_eq!(doc.deps.len(), 1);
        assert_eq!(doc.deps[0].needed_by, Some(Phase::Fetch));
    }

    #[test]
    fn recipe_requires_identity() {
        let err = RecipeDoc::parse(
            r#"source = "https://example.com/x.tar.gz""#,
            Utf8Path::new("/r.toml"),
            None,
        );
        assert!(err.is_err());
    }
}
