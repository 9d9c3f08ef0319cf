//! Rule definitions, pack loading, and trigger matching.
//!
//! Rules are data, not behavior: each pack is a YAML document listing rules
//! with cheap triggers (file globs, optional code regexes) that decide
//! whether a rule is a *candidate* for a file. Candidates gate the external
//! analysis call; they are never a final verdict.

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::warn;

use crate::types::IssueLevel;

/// Cheap heuristics deciding whether a rule is a candidate for a file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuleTriggers {
    /// Glob patterns matched against the file path. Empty = any file.
    #[serde(default)]
    pub file_patterns: Vec<String>,
    /// Regexes matched against raw content. Empty = path match is enough.
    #[serde(default)]
    pub code_patterns: Vec<String>,
}

/// A single review rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub level: IssueLevel,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub checklist: Vec<String>,
    #[serde(default)]
    pub fix: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub triggers: RuleTriggers,
}

/// A named, versioned set of rules loaded from YAML.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RulePack {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RulePack {
    pub fn parse(yaml: &str) -> anyhow::Result<Self> {
        let pack: RulePack = serde_yaml::from_str(yaml)?;
        Ok(pack)
    }

    pub fn parse_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }
}

/// Built-in packs embedded at compile time.
static BUILTIN_PACKS: &[(&str, &str)] = &[
    ("general", include_str!("packs/general.yaml")),
    ("python", include_str!("packs/python.yaml")),
];

/// Names of all built-in packs.
pub fn builtin_pack_names() -> Vec<&'static str> {
    BUILTIN_PACKS.iter().map(|(name, _)| *name).collect()
}

/// Load the named packs, in order. Unknown names are an error: the caller
/// asked for rules that do not exist, which is a configuration problem.
pub fn load_packs(names: &[String]) -> anyhow::Result<Vec<RulePack>> {
    let mut packs = Vec::with_capacity(names.len());
    for name in names {
        let yaml = BUILTIN_PACKS
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, yaml)| *yaml)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown rule pack {:?} (available: {})",
                    name,
                    builtin_pack_names().join(", ")
                )
            })?;
        let pack = RulePack::parse(yaml)
            .map_err(|e| anyhow::anyhow!("parsing built-in pack {:?}: {}", name, e))?;
        packs.push(pack);
    }
    Ok(packs)
}

/// Load custom rules from a directory, one YAML rule per file.
///
/// Missing directory yields an empty pack. A file that fails to parse is
/// skipped with a warning; custom rule typos should not kill the run.
pub fn load_custom_rules(dir: &Path) -> RulePack {
    let mut rules = Vec::new();

    if dir.is_dir() {
        let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_file()
                    && e.path().extension().and_then(|x| x.to_str()) == Some("yaml")
            })
            .map(|e| e.path().to_path_buf())
            .collect();
        paths.sort();

        for path in paths {
            match std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_yaml::from_str::<Rule>(&s).map_err(anyhow::Error::from))
            {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!("skipping custom rule {:?}: {}", path, e),
            }
        }
    }

    RulePack {
        name: "custom".to_string(),
        version: "local".to_string(),
        rules,
    }
}

/// A rule with pre-compiled matchers.
struct IndexedRule {
    rule: Rule,
    files: GlobSet,
    code: Vec<Regex>,
}

/// Immutable index from triggers to candidate rules.
///
/// Matching is a pure function of (file path, file content, rule set):
/// the index holds no per-run state.
pub struct RuleIndex {
    rules: Vec<IndexedRule>,
}

impl RuleIndex {
    /// Compose packs and build the index.
    ///
    /// Packs compose by rule id with later packs overriding earlier ones.
    /// Disabled ids are removed before compilation. A rule with a malformed
    /// glob or regex is disabled with a warning; it never aborts the run.
    pub fn build(packs: &[RulePack], disabled: &HashSet<String>) -> Self {
        let mut by_id: BTreeMap<String, Rule> = BTreeMap::new();
        for pack in packs {
            for rule in &pack.rules {
                by_id.insert(rule.id.clone(), rule.clone());
            }
        }

        let mut rules = Vec::with_capacity(by_id.len());
        for (_, rule) in by_id {
            if disabled.contains(&rule.id) {
                continue;
            }
            match compile(rule) {
                Ok(indexed) => rules.push(indexed),
                Err((id, e)) => warn!("disabling rule {:?}: {}", id, e),
            }
        }

        Self { rules }
    }

    /// Candidate rules for a file: the file pattern matches the path and,
    /// when code patterns are declared, at least one matches the content.
    ///
    /// Code patterns are a permissive pre-filter; a false positive costs one
    /// external call, a false negative silences a rule entirely, so they
    /// should err on the side of matching.
    pub fn candidates(&self, path: &Path, content: &str) -> Vec<&Rule> {
        let mut out = Vec::new();
        for indexed in &self.rules {
            if !indexed.files.is_empty() && !indexed.files.is_match(path) {
                continue;
            }
            if !indexed.code.is_empty() && !indexed.code.iter().any(|re| re.is_match(content)) {
                continue;
            }
            out.push(&indexed.rule);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Enabled rules in id order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|r| &r.rule)
    }
}

fn compile(rule: Rule) -> Result<IndexedRule, (String, anyhow::Error)> {
    let mut builder = GlobSetBuilder::new();
    for pattern in &rule.triggers.file_patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => {
                return Err((
                    rule.id.clone(),
                    anyhow::anyhow!("invalid file pattern {:?}: {}", pattern, e),
                ))
            }
        }
    }
    let files = match builder.build() {
        Ok(set) => set,
        Err(e) => return Err((rule.id.clone(), anyhow::anyhow!("building glob set: {}", e))),
    };

    let mut code = Vec::with_capacity(rule.triggers.code_patterns.len());
    for pattern in &rule.triggers.code_patterns {
        match Regex::new(pattern) {
            Ok(re) => code.push(re),
            Err(e) => {
                return Err((
                    rule.id.clone(),
                    anyhow::anyhow!("invalid code pattern {:?}: {}", pattern, e),
                ))
            }
        }
    }

    Ok(IndexedRule { rule, files, code })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn rule(id: &str, file_patterns: &[&str], code_patterns: &[&str]) -> Rule {
        Rule {
            id: id.to_string(),
            name: id.to_string(),
            level: IssueLevel::Major,
            category: String::new(),
            description: String::new(),
            checklist: Vec::new(),
            fix: None,
            tags: Vec::new(),
            triggers: RuleTriggers {
                file_patterns: file_patterns.iter().map(|s| s.to_string()).collect(),
                code_patterns: code_patterns.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    fn pack(name: &str, rules: Vec<Rule>) -> RulePack {
        RulePack {
            name: name.to_string(),
            version: "test".to_string(),
            rules,
        }
    }

    #[test]
    fn test_path_only_match() {
        let index = RuleIndex::build(
            &[pack("p", vec![rule("p/views", &["**/views.py"], &[])])],
            &HashSet::new(),
        );

        let path = PathBuf::from("app/views.py");
        assert_eq!(index.candidates(&path, "x = 1").len(), 1);

        let other = PathBuf::from("app/models.py");
        assert!(index.candidates(&other, "x = 1").is_empty());
    }

    #[test]
    fn test_code_pattern_narrows_match() {
        let index = RuleIndex::build(
            &[pack(
                "p",
                vec![rule("p/raw-sql", &["**/*.py"], &[r"\.raw\("])],
            )],
            &HashSet::new(),
        );

        let path = PathBuf::from("db.py");
        assert_eq!(index.candidates(&path, "Model.objects.raw(q)").len(), 1);
        assert!(index.candidates(&path, "Model.objects.all()").is_empty());
    }

    #[test]
    fn test_matching_is_deterministic() {
        let index = RuleIndex::build(
            &[pack(
                "p",
                vec![
                    rule("p/a", &["**/*.py"], &[]),
                    rule("p/b", &["**/*.py"], &["import os"]),
                ],
            )],
            &HashSet::new(),
        );

        let path = PathBuf::from("m.py");
        let first: Vec<String> = index
            .candidates(&path, "import os")
            .iter()
            .map(|r| r.id.clone())
            .collect();
        let second: Vec<String> = index
            .candidates(&path, "import os")
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["p/a".to_string(), "p/b".to_string()]);
    }

    #[test]
    fn test_disabled_rules_removed() {
        let disabled: HashSet<String> = ["p/a".to_string()].into_iter().collect();
        let index = RuleIndex::build(
            &[pack(
                "p",
                vec![rule("p/a", &["**/*.py"], &[]), rule("p/b", &["**/*.py"], &[])],
            )],
            &disabled,
        );

        let path = PathBuf::from("m.py");
        let ids: Vec<&str> = index
            .candidates(&path, "")
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["p/b"]);
    }

    #[test]
    fn test_malformed_pattern_disables_only_that_rule() {
        let index = RuleIndex::build(
            &[pack(
                "p",
                vec![
                    rule("p/bad", &["**/*.py"], &["[unclosed"]),
                    rule("p/good", &["**/*.py"], &[]),
                ],
            )],
            &HashSet::new(),
        );

        assert_eq!(index.len(), 1);
        let path = PathBuf::from("m.py");
        assert_eq!(index.candidates(&path, "")[0].id, "p/good");
    }

    #[test]
    fn test_later_pack_overrides_earlier() {
        let base = pack("base", vec![rule("shared/x", &["**/*.py"], &[])]);
        let mut override_rule = rule("shared/x", &["**/*.py"], &[]);
        override_rule.level = IssueLevel::Critical;
        let overlay = pack("overlay", vec![override_rule]);

        let index = RuleIndex::build(&[base, overlay], &HashSet::new());
        let path = PathBuf::from("m.py");
        let candidates = index.candidates(&path, "");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].level, IssueLevel::Critical);
    }

    #[test]
    fn test_candidate_ids_unique() {
        let index = RuleIndex::build(
            &[
                pack("a", vec![rule("shared/x", &["**/*.py"], &[])]),
                pack("b", vec![rule("shared/x", &["**/*.py"], &[])]),
            ],
            &HashSet::new(),
        );

        let path = PathBuf::from("m.py");
        assert_eq!(index.candidates(&path, "").len(), 1);
    }

    #[test]
    fn test_builtin_packs_parse() {
        for name in builtin_pack_names() {
            let packs = load_packs(&[name.to_string()]).unwrap();
            assert!(!packs[0].rules.is_empty(), "pack {} has no rules", name);
        }
    }

    #[test]
    fn test_unknown_pack_is_error() {
        assert!(load_packs(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_load_custom_rules_missing_dir() {
        let pack = load_custom_rules(Path::new("/nonexistent/rules"));
        assert!(pack.rules.is_empty());
        assert_eq!(pack.name, "custom");
    }
}
