//! Language profiles and the registry that resolves them.
//!
//! A profile fixes everything needed to run one language: the container
//! image, the source file extension and the build-and-run template. The
//! registry is built once at startup (builtin table plus configuration
//! entries) and is read-only afterwards.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{info, warn};

/// How a language turns a source file into a running program.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildAndRun {
    /// `program args... <source>`
    Interpret {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// `compiler flags... <source> -o <artifact>`, then run the artifact.
    Compile {
        compiler: String,
        #[serde(default)]
        flags: Vec<String>,
    },
    /// `compiler <source>`, then `runtime -cp <dir> <unit>` where the unit is
    /// the source file stem.
    ClassPath { compiler: String, runtime: String },
}

/// Static configuration for one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageProfile {
    pub id: String,
    pub image: String,
    /// Source file extension, without the leading dot.
    pub source_extension: String,
    pub build_and_run: BuildAndRun,
    /// Fixed source file stem. When unset the workspace run id is used.
    pub entry_point: Option<String>,
}

/// A profile as written in configuration (the id is the map key).
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileSpec {
    pub image: String,
    pub extension: String,
    pub build_and_run: BuildAndRun,
    #[serde(default)]
    pub entry_point: Option<String>,
}

impl LanguageProfile {
    fn from_spec(id: &str, spec: ProfileSpec) -> Self {
        Self {
            id: id.to_string(),
            image: spec.image,
            source_extension: spec.extension.trim_start_matches('.').to_string(),
            build_and_run: spec.build_and_run,
            entry_point: spec.entry_point,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("empty language id".into());
        }
        if self.image.is_empty() {
            return Err("empty image reference".into());
        }
        if self.source_extension.is_empty() {
            return Err("empty source extension".into());
        }
        if let Some(entry) = &self.entry_point {
            let valid = !entry.is_empty()
                && entry
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(format!("invalid entry point '{entry}'"));
            }
        }
        Ok(())
    }
}

/// Immutable map from language id to profile.
#[derive(Debug, Clone)]
pub struct Registry {
    profiles: HashMap<String, LanguageProfile>,
}

impl Registry {
    /// The builtin table: python, javascript, cpp and java.
    pub fn builtin() -> Self {
        let profiles = builtin_profiles()
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        Self { profiles }
    }

    /// Builtin table with configuration entries merged on top.
    ///
    /// Configured profiles override builtin ones on id collision. Invalid
    /// entries are logged and skipped.
    pub fn with_overrides(extra: &HashMap<String, ProfileSpec>) -> Self {
        let mut registry = Self::builtin();
        for (id, spec) in extra {
            let profile = LanguageProfile::from_spec(id, spec.clone());
            if let Err(reason) = profile.validate() {
                warn!(language = %id, %reason, "Skipping invalid language profile");
                continue;
            }
            if registry.profiles.contains_key(id) {
                info!(language = %id, "Configured profile overrides builtin language");
            }
            registry.profiles.insert(id.clone(), profile);
        }
        registry
    }

    /// Resolve a language id. Pure; no side effects.
    pub fn lookup(&self, language_id: &str) -> Option<&LanguageProfile> {
        self.profiles.get(language_id)
    }

    /// Supported language ids, sorted.
    pub fn languages(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.profiles.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_profiles() -> Vec<LanguageProfile> {
    let interpret = |id: &str, image: &str, ext: &str, program: &str| LanguageProfile {
        id: id.into(),
        image: image.into(),
        source_extension: ext.into(),
        build_and_run: BuildAndRun::Interpret {
            program: program.into(),
            args: Vec::new(),
        },
        entry_point: None,
    };

    vec![
        interpret("python", "python:3.9", "py", "python"),
        interpret("javascript", "node:latest", "js", "node"),
        LanguageProfile {
            id: "cpp".into(),
            image: "gcc:latest".into(),
            source_extension: "cpp".into(),
            build_and_run: BuildAndRun::Compile {
                compiler: "g++".into(),
                flags: Vec::new(),
            },
            entry_point: None,
        },
        LanguageProfile {
            id: "java".into(),
            image: "openjdk:latest".into(),
            source_extension: "java".into(),
            build_and_run: BuildAndRun::ClassPath {
                compiler: "javac".into(),
                runtime: "java".into(),
            },
            entry_point: Some("Main".into()),
        },
    ]
}
