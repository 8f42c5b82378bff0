// SPDX-License-Identifier: MIT

//! Planner: maps classifications to destination paths, resolves
//! collisions, emits plan artifacts.
//!
//! Never overwrites: every collision gets a `_v2`, `_v3`, … suffix,
//! deterministic over source-path order. Emits a machine plan (JSON)
//! and a human review plan (Markdown).

use chrono::Local;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::model::{
    Action, ActionCounts, Category, Classification, ClassificationSource, FileRecord, Plan,
    PlanItem,
};
use crate::scanner::ScanStats;
use crate::{ArquivistaError, Result};

/// Full base-name length cap (stem + dot + extension)
pub const MAX_BASENAME_LEN: usize = 200;

/// Highest `_vN` suffix tried before a collision is given up
pub const MAX_VERSION: u32 = 999;

const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Sanitize a file name component: forbidden and control characters
/// removed, internal whitespace collapsed to `_`, leading/trailing
/// whitespace and dots stripped. Idempotent.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !FORBIDDEN_CHARS.contains(c) && !c.is_control())
        .collect();

    let trimmed = cleaned.trim_matches(|c: char| c.is_whitespace() || c == '.');

    let mut out = String::with_capacity(trimmed.len());
    let mut in_space = false;
    for c in trimmed.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
                in_space = true;
            }
        } else {
            out.push(c);
            in_space = false;
        }
    }

    out
}

/// Truncate so `stem.ext` fits the base-name cap, preserving the
/// extension; cuts on a char boundary.
fn fit_base_name(stem: &str, extension: &str) -> String {
    let full_len = if extension.is_empty() {
        stem.len()
    } else {
        stem.len() + 1 + extension.len()
    };

    if full_len <= MAX_BASENAME_LEN {
        return join_name(stem, extension);
    }

    let room = MAX_BASENAME_LEN.saturating_sub(if extension.is_empty() {
        0
    } else {
        extension.len() + 1
    });

    let mut cut = room.min(stem.len());
    while cut > 0 && !stem.is_char_boundary(cut) {
        cut -= 1;
    }

    join_name(stem[..cut].trim_end_matches(['_', '.']), extension)
}

fn join_name(stem: &str, extension: &str) -> String {
    if extension.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{extension}")
    }
}

fn split_version_suffix(stem: &str) -> &str {
    if let Some((base, suffix)) = stem.rsplit_once("_v") {
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return base;
        }
    }
    stem
}

/// Find the first non-colliding path for `candidate`, appending
/// `_v2`, `_v3`, … before the extension. `is_taken` decides what
/// counts as a collision (live filesystem, other plan items, or
/// both). The first conflict starts at `_v2`.
pub fn next_free_path(
    candidate: &Path,
    is_taken: impl Fn(&Path) -> bool,
) -> Result<PathBuf> {
    if !is_taken(candidate) {
        return Ok(candidate.to_path_buf());
    }

    let parent = candidate.parent().unwrap_or_else(|| Path::new(""));
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = candidate
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = split_version_suffix(&stem);

    for version in 2..=MAX_VERSION {
        let versioned = parent.join(join_name(&format!("{base}_v{version}"), &extension));
        if !is_taken(&versioned) {
            return Ok(versioned);
        }
    }

    Err(ArquivistaError::Collision(format!(
        "no free name for {} after {MAX_VERSION} attempts",
        candidate.display()
    )))
}

/// Execution plan generator.
pub struct Planner {
    base_root: PathBuf,
    plans_dir: PathBuf,
    min_confidence: u8,
    copy_mode: bool,
}

impl Planner {
    pub fn new(base_root: PathBuf, plans_dir: PathBuf, min_confidence: u8, copy_mode: bool) -> Self {
        Self {
            base_root,
            plans_dir,
            min_confidence,
            copy_mode,
        }
    }

    /// Build a plan from classified records.
    ///
    /// Items are ordered by source path so collision suffixes are
    /// stable across runs on the same inputs.
    pub fn build_plan(&self, mut pairs: Vec<(FileRecord, Classification)>) -> Result<Plan> {
        pairs.sort_by(|a, b| a.0.path.cmp(&b.0.path));

        let mut items = Vec::with_capacity(pairs.len());
        let mut counts = ActionCounts::default();
        let mut taken: HashSet<PathBuf> = HashSet::new();

        for (record, classification) in &pairs {
            let item = self.plan_item(record, classification, &taken);
            if let Some(dest) = &item.dest {
                taken.insert(dest.clone());
            }
            counts.record(item.action);
            items.push(item);
        }

        let now = Local::now();
        Ok(Plan {
            id: format!("plan_{}", now.format("%Y%m%d_%H%M%S")),
            generated_at: now,
            base_root: self.base_root.clone(),
            counts,
            items,
        })
    }

    fn plan_item(
        &self,
        record: &FileRecord,
        classification: &Classification,
        taken: &HashSet<PathBuf>,
    ) -> PlanItem {
        let below_gate = classification.confidence < self.min_confidence;

        let (category, reason) = if below_gate {
            if classification.category == Category::Inbox {
                // Already bound for the inbox with nothing to say:
                // leave the file where it is.
                return self.skip_item(
                    record,
                    classification,
                    format!(
                        "confidence {} below threshold {}; already inbox",
                        classification.confidence, self.min_confidence
                    ),
                );
            }
            (
                Category::Inbox,
                format!(
                    "confidence {} below threshold {}; proposed category was {}",
                    classification.confidence, self.min_confidence, classification.category
                ),
            )
        } else {
            (classification.category, classification.rationale.clone())
        };

        let dest_dir = self.destination_dir(category, classification);
        let file_name = self.destination_name(record, classification, category);
        let candidate = dest_dir.join(file_name);

        if candidate == record.path {
            return self.skip_item(record, classification, "already at destination".to_string());
        }

        let dest = match next_free_path(&candidate, |p| p.exists() || taken.contains(p)) {
            Ok(dest) => dest,
            Err(e) => {
                return self.skip_item(record, classification, format!("collision: {e}"));
            }
        };

        let action = if self.copy_mode {
            Action::Copy
        } else if dest.parent() == record.path.parent() {
            Action::Rename
        } else {
            Action::Move
        };

        PlanItem {
            action,
            source: record.path.clone(),
            dest: Some(dest),
            reason,
            confidence: classification.confidence,
            rule_id: match &classification.source {
                ClassificationSource::Rule(id) => Some(id.clone()),
                _ => None,
            },
            llm_used: !matches!(classification.source, ClassificationSource::Rule(_)),
            size: record.size,
            sha256: record.sha256.clone(),
        }
    }

    fn skip_item(
        &self,
        record: &FileRecord,
        classification: &Classification,
        reason: String,
    ) -> PlanItem {
        PlanItem {
            action: Action::Skip,
            source: record.path.clone(),
            dest: None,
            reason,
            confidence: classification.confidence,
            rule_id: match &classification.source {
                ClassificationSource::Rule(id) => Some(id.clone()),
                _ => None,
            },
            llm_used: !matches!(classification.source, ClassificationSource::Rule(_)),
            size: record.size,
            sha256: record.sha256.clone(),
        }
    }

    /// `<base>/<Category>/<Subcategory>/<Year>/`, subcategory and
    /// year segments omitted when empty or zero. Files routed to the
    /// inbox land flat for review.
    fn destination_dir(&self, category: Category, classification: &Classification) -> PathBuf {
        let mut dir = self.base_root.join(category.as_str());

        if category == Category::Inbox {
            return dir;
        }

        for segment in classification.subcategory.split('/') {
            let clean = sanitize_name(segment);
            if !clean.is_empty() {
                dir.push(clean);
            }
        }

        if classification.year != 0 {
            dir.push(classification.year.to_string());
        }

        dir
    }

    fn destination_name(
        &self,
        record: &FileRecord,
        classification: &Classification,
        category: Category,
    ) -> String {
        let mut stem = sanitize_name(&classification.suggested_name);
        if stem.is_empty() {
            // Degenerate suggestion: rebuild from the record.
            let date = record.modified.format("%Y-%m-%d");
            let subject = sanitize_name(
                &record
                    .path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "file".to_string()),
            );
            stem = format!("{date}__{category}__{subject}");
        }

        fit_base_name(&stem, &record.extension)
    }

    /// Write the machine and human plan artifacts; returns their
    /// paths.
    pub fn write_artifacts(
        &self,
        plan: &Plan,
        scan_stats: Option<&ScanStats>,
        rule_hits: &BTreeMap<String, u64>,
    ) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(&self.plans_dir)?;

        let json_path = self.plans_dir.join(format!("{}.json", plan.id));
        plan.save(&json_path)?;

        let md_path = self.plans_dir.join(format!("{}.md", plan.id));
        std::fs::write(&md_path, self.render_markdown(plan, scan_stats, rule_hits))?;

        info!("plan saved to {:?} and {:?}", json_path, md_path);
        Ok((json_path, md_path))
    }

    fn render_markdown(
        &self,
        plan: &Plan,
        scan_stats: Option<&ScanStats>,
        rule_hits: &BTreeMap<String, u64>,
    ) -> String {
        let mut lines = vec![
            "# Execution Plan".to_string(),
            String::new(),
            format!("- Plan id: `{}`", plan.id),
            format!(
                "- Generated: {}",
                plan.generated_at.format("%Y-%m-%d %H:%M:%S")
            ),
            format!("- Base root: `{}`", plan.base_root.display()),
            String::new(),
            "## Summary".to_string(),
            String::new(),
            format!("- Total items: {}", plan.counts.total()),
            format!("- MOVE: {}", plan.counts.moves),
            format!("- COPY: {}", plan.counts.copies),
            format!("- RENAME: {}", plan.counts.renames),
            format!("- SKIP: {}", plan.counts.skips),
        ];

        let by_category = self.category_counts(plan);
        if !by_category.is_empty() {
            lines.push(String::new());
            lines.push("## By category".to_string());
            lines.push(String::new());
            for (category, count) in &by_category {
                lines.push(format!("- {category}: {count}"));
            }
        }

        if let Some(stats) = scan_stats {
            lines.push(String::new());
            lines.push("## Scan".to_string());
            lines.push(String::new());
            lines.push(format!("- Files scanned: {}", stats.files_scanned));
            lines.push(format!("- Files excluded: {}", stats.files_excluded));
            lines.push(format!(
                "- Directories skipped: {}",
                stats.directories_skipped
            ));
            lines.push(format!("- Total bytes: {}", stats.total_size_bytes));
        }

        if !rule_hits.is_empty() {
            lines.push(String::new());
            lines.push("## Rule hits".to_string());
            lines.push(String::new());
            for (rule_id, count) in rule_hits {
                lines.push(format!("- `{rule_id}`: {count}"));
            }
        }

        lines.push(String::new());
        lines.push("## Items".to_string());
        lines.push(String::new());

        for (i, item) in plan.items.iter().enumerate() {
            lines.push(format!("### {}. {}", i + 1, item.action));
            lines.push(String::new());
            lines.push(format!("- **Source**: `{}`", item.source.display()));
            if let Some(dest) = &item.dest {
                lines.push(format!("- **Destination**: `{}`", dest.display()));
            }
            lines.push(format!("- **Confidence**: {}%", item.confidence));
            if let Some(rule_id) = &item.rule_id {
                lines.push(format!("- **Rule**: `{rule_id}`"));
            }
            if item.llm_used {
                lines.push("- **LLM used**: yes".to_string());
            }
            if !item.reason.is_empty() {
                lines.push(format!("- **Reason**: {}", item.reason));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }

    fn category_counts(&self, plan: &Plan) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for item in &plan.items {
            let Some(dest) = &item.dest else { continue };
            if let Ok(relative) = dest.strip_prefix(&self.base_root) {
                if let Some(category) = relative.components().next() {
                    *counts
                        .entry(category.as_os_str().to_string_lossy().into_owned())
                        .or_insert(0) += 1;
                }
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(path: &str, size: u64) -> FileRecord {
        let path = PathBuf::from(path);
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        FileRecord {
            path,
            size,
            modified: Local.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
            created: None,
            extension,
            mime: "application/octet-stream".to_string(),
            sha256: "a".repeat(64),
            excerpt: None,
        }
    }

    fn classification(category: Category, confidence: u8) -> Classification {
        Classification {
            category,
            subcategory: String::new(),
            subject: "Test".to_string(),
            year: 2024,
            suggested_name: format!("2024-06-01__{category}__Test"),
            confidence,
            rationale: "test".to_string(),
            source: ClassificationSource::Llm,
        }
    }

    fn planner(base: &Path) -> Planner {
        Planner::new(base.to_path_buf(), base.join("plans"), 85, false)
    }

    #[test]
    fn sanitize_removes_forbidden_characters() {
        let result = sanitize_name("inv<oi>ce: 2024 | \"final\"?.pdf");
        for c in FORBIDDEN_CHARS {
            assert!(!result.contains(*c), "contains {c}");
        }
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_name("a  b\tc"), "a_b_c");
    }

    #[test]
    fn sanitize_strips_leading_trailing_dots_and_space() {
        assert_eq!(sanitize_name("  ..name..  "), "name");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for input in [
            "inv<oi>ce: 2024 | final?.pdf",
            "  spaced   out  ",
            "..dots..",
            "já_limpo",
            "mixed: <\\ everything */> .. here",
        ] {
            let once = sanitize_name(input);
            assert_eq!(sanitize_name(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn fit_base_name_preserves_extension() {
        let long_stem = "x".repeat(300);
        let result = fit_base_name(&long_stem, "pdf");
        assert!(result.len() <= MAX_BASENAME_LEN);
        assert!(result.ends_with(".pdf"));
    }

    #[test]
    fn versioning_starts_at_v2_and_increments() {
        let taken: HashSet<PathBuf> = [
            PathBuf::from("/dst/name.pdf"),
            PathBuf::from("/dst/name_v2.pdf"),
        ]
        .into();

        let result =
            next_free_path(Path::new("/dst/name.pdf"), |p| taken.contains(p)).unwrap();
        assert_eq!(result, PathBuf::from("/dst/name_v3.pdf"));
    }

    #[test]
    fn versioning_not_applied_without_collision() {
        let result = next_free_path(Path::new("/dst/free.pdf"), |_| false).unwrap();
        assert_eq!(result, PathBuf::from("/dst/free.pdf"));
    }

    #[test]
    fn destination_layout_omits_empty_segments() {
        let dir = tempfile::tempdir().unwrap();
        let planner = planner(dir.path());

        let mut c = classification(Category::Financas, 90);
        c.subcategory = "Notas_Fiscais".to_string();
        let plan = planner
            .build_plan(vec![(record("/in/invoice_2024.pdf", 4096), c)])
            .unwrap();
        let dest = plan.items[0].dest.as_ref().unwrap();
        assert!(dest.starts_with(
            dir.path()
                .join("02_Financas")
                .join("Notas_Fiscais")
                .join("2024")
        ));

        // No subcategory, year 0: both segments omitted.
        let mut c = classification(Category::Estudos, 90);
        c.year = 0;
        let plan = planner
            .build_plan(vec![(record("/in/apostila.pdf", 4096), c)])
            .unwrap();
        let dest = plan.items[0].dest.as_ref().unwrap();
        assert_eq!(dest.parent().unwrap(), dir.path().join("03_Estudos"));
    }

    #[test]
    fn nested_subcategory_builds_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let planner = planner(dir.path());

        let mut c = classification(Category::Pessoal, 95);
        c.subcategory = "Midia/Imagens".to_string();
        let plan = planner
            .build_plan(vec![(record("/in/IMG_0001.jpg", 2 << 20), c)])
            .unwrap();
        let dest = plan.items[0].dest.as_ref().unwrap();
        assert!(dest.starts_with(
            dir.path()
                .join("05_Pessoal")
                .join("Midia")
                .join("Imagens")
                .join("2024")
        ));
    }

    #[test]
    fn low_confidence_routes_to_inbox_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        let planner = planner(dir.path());

        let plan = planner
            .build_plan(vec![(
                record("/in/doc.pdf", 4096),
                classification(Category::Trabalho, 70),
            )])
            .unwrap();

        let item = &plan.items[0];
        assert_eq!(item.action, Action::Move);
        let dest = item.dest.as_ref().unwrap();
        assert!(dest.starts_with(dir.path().join("90_Inbox_Organizar")));
        assert!(item.reason.contains("01_Trabalho"));
        assert!(item.reason.contains("70"));
    }

    #[test]
    fn low_confidence_inbox_classification_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let planner = planner(dir.path());

        let plan = planner
            .build_plan(vec![(
                record("/in/doc.pdf", 4096),
                classification(Category::Inbox, 0),
            )])
            .unwrap();

        assert_eq!(plan.items[0].action, Action::Skip);
        assert!(plan.items[0].dest.is_none());
    }

    #[test]
    fn copy_mode_emits_copy_actions() {
        let dir = tempfile::tempdir().unwrap();
        let planner = Planner::new(dir.path().to_path_buf(), dir.path().join("plans"), 85, true);

        let plan = planner
            .build_plan(vec![(
                record("/in/doc.pdf", 4096),
                classification(Category::Estudos, 90),
            )])
            .unwrap();
        assert_eq!(plan.items[0].action, Action::Copy);
    }

    #[test]
    fn same_directory_different_name_is_rename() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("03_Estudos").join("2024");
        std::fs::create_dir_all(&base).unwrap();
        let source = base.join("old_name.pdf");
        std::fs::write(&source, b"x").unwrap();

        let planner = planner(dir.path());
        let plan = planner
            .build_plan(vec![(
                record(source.to_str().unwrap(), 4096),
                classification(Category::Estudos, 90),
            )])
            .unwrap();
        assert_eq!(plan.items[0].action, Action::Rename);
    }

    #[test]
    fn colliding_destinations_get_stable_version_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let planner = planner(dir.path());

        let pairs = || {
            vec![
                (
                    record("/in/a.pdf", 4096),
                    classification(Category::Estudos, 90),
                ),
                (
                    record("/in/sub/a.pdf", 4096),
                    classification(Category::Estudos, 90),
                ),
            ]
        };

        let plan1 = planner.build_plan(pairs()).unwrap();
        let plan2 = planner.build_plan(pairs()).unwrap();

        let dests1: Vec<_> = plan1.items.iter().map(|i| i.dest.clone()).collect();
        let dests2: Vec<_> = plan2.items.iter().map(|i| i.dest.clone()).collect();

        // No two items share a destination; order of suffixing is
        // stable across runs.
        assert_ne!(dests1[0], dests1[1]);
        assert_eq!(dests1, dests2);
        let second = dests1[1].as_ref().unwrap().to_string_lossy().into_owned();
        assert!(second.contains("_v2"), "expected _v2 in {second}");
    }

    #[test]
    fn all_destinations_lie_under_base_root() {
        let dir = tempfile::tempdir().unwrap();
        let planner = planner(dir.path());

        let plan = planner
            .build_plan(vec![
                (
                    record("/in/a.pdf", 4096),
                    classification(Category::Estudos, 90),
                ),
                (
                    record("/in/b.pdf", 4096),
                    classification(Category::Trabalho, 40),
                ),
            ])
            .unwrap();

        for item in &plan.items {
            if let Some(dest) = &item.dest {
                assert!(dest.starts_with(dir.path()));
            }
        }
    }

    #[test]
    fn forbidden_characters_never_reach_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let planner = planner(dir.path());

        let mut c = classification(Category::Estudos, 90);
        c.suggested_name = "2024-06-01__03_Estudos__bad<name>:with|stuff?".to_string();
        let plan = planner
            .build_plan(vec![(record("/in/weird.pdf", 4096), c)])
            .unwrap();

        let name = plan.items[0]
            .dest
            .as_ref()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        for c in FORBIDDEN_CHARS {
            assert!(!name.contains(*c));
        }
    }

    #[test]
    fn artifacts_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let planner = planner(dir.path());
        let plan = planner
            .build_plan(vec![(
                record("/in/a.pdf", 4096),
                classification(Category::Estudos, 90),
            )])
            .unwrap();

        let (json_path, md_path) = planner
            .write_artifacts(&plan, None, &BTreeMap::new())
            .unwrap();
        assert!(json_path.exists());
        assert!(md_path.exists());

        let loaded = Plan::load(&json_path).unwrap();
        assert_eq!(loaded, plan);

        let md = std::fs::read_to_string(&md_path).unwrap();
        assert!(md.contains("# Execution Plan"));
        assert!(md.contains("MOVE: 1"));
    }
}
