// SPDX-License-Identifier: MIT

//! Executor: applies a persisted plan under the safety policy.
//!
//! Dry-run by default. Never deletes or truncates a source except the
//! unlink completing a verified cross-device MOVE; never opens an
//! existing destination for writing. Every item yields exactly one
//! ExecutionResult; the manifest is flushed atomically even on early
//! exits.

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};

use crate::model::{
    Action, ExecMode, ExecStatus, ExecutionResult, Manifest, Plan, PlanItem,
};
use crate::planner::next_free_path;
use crate::scanner::hash_file;
use crate::{ArquivistaError, Result};

/// Executes a plan loaded from its persisted form.
pub struct Executor {
    mode: ExecMode,
    logs_dir: PathBuf,
    deadline: Option<Instant>,
}

impl Executor {
    pub fn new(mode: ExecMode, logs_dir: PathBuf) -> Self {
        Self {
            mode,
            logs_dir,
            deadline: None,
        }
    }

    /// Stop starting new items once this instant passes. In-flight
    /// items complete.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Execute every item in plan order. Returns the manifest and the
    /// path it was persisted to.
    pub fn execute(&self, plan: &Plan) -> Result<(Manifest, PathBuf)> {
        fs::create_dir_all(&self.logs_dir)?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let manifest_path = self.logs_dir.join(format!("manifest_{stamp}.json"));
        let log_path = self.logs_dir.join(format!("run_{stamp}.log"));
        let mut run_log = RunLog::open(&log_path)?;

        let manifest = Arc::new(Mutex::new(Manifest::new(plan, self.mode)));
        let mut guard = ManifestGuard::new(Arc::clone(&manifest), manifest_path.clone());

        for item in &plan.items {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    warn!("run deadline reached, leaving remaining items for a re-run");
                    run_log.note("deadline reached; remaining items not started");
                    break;
                }
            }

            let result = self.execute_item(item);
            run_log.record(item, &result);
            manifest
                .lock()
                .expect("manifest lock poisoned")
                .results
                .push(result);
        }

        manifest
            .lock()
            .expect("manifest lock poisoned")
            .finished_at = Some(Local::now());

        guard.flush()?;
        run_log.finish()?;

        let manifest = manifest
            .lock()
            .expect("manifest lock poisoned")
            .clone();
        info!(
            "execute finished: {} applied, {} skipped, {} failed, {} dry-run",
            manifest.count(ExecStatus::Applied),
            manifest.count(ExecStatus::Skipped),
            manifest.count(ExecStatus::Failed),
            manifest.count(ExecStatus::DryRun),
        );

        Ok((manifest, manifest_path))
    }

    fn execute_item(&self, item: &PlanItem) -> ExecutionResult {
        if self.mode == ExecMode::DryRun {
            info!("[DRY-RUN] {} {:?} -> {:?}", item.action, item.source, item.dest);
            return result(item, item.dest.clone(), ExecStatus::DryRun, None, None);
        }

        if item.action == Action::Skip {
            return result(
                item,
                None,
                ExecStatus::Skipped,
                None,
                Some(item.reason.clone()),
            );
        }

        // verifying: the source must still be the file we planned on.
        match self.verify_source(item) {
            SourceState::Intact => {}
            SourceState::AlreadyCompleted(dest) => {
                return result(
                    item,
                    Some(dest),
                    ExecStatus::Skipped,
                    None,
                    Some("destination already holds verified content".to_string()),
                );
            }
            SourceState::Changed(detail) => {
                return result(
                    item,
                    None,
                    ExecStatus::Skipped,
                    Some("source_changed".to_string()),
                    Some(detail),
                );
            }
            SourceState::Vanished => {
                return result(
                    item,
                    None,
                    ExecStatus::Failed,
                    Some("source_changed".to_string()),
                    Some("source no longer exists".to_string()),
                );
            }
        }

        let Some(planned_dest) = &item.dest else {
            return result(
                item,
                None,
                ExecStatus::Failed,
                Some("plan".to_string()),
                Some(format!("{} item without destination", item.action)),
            );
        };

        // acting: parent dir, live collision re-check, then the
        // mutation primitive.
        match self.apply(item, planned_dest) {
            Ok(final_dest) => {
                info!("{} {:?} -> {:?}", item.action, item.source, final_dest);
                result(item, Some(final_dest), ExecStatus::Applied, None, None)
            }
            Err(e) => {
                warn!("{} failed for {:?}: {e}", item.action, item.source);
                result(
                    item,
                    None,
                    ExecStatus::Failed,
                    Some(e.kind().to_string()),
                    Some(e.to_string()),
                )
            }
        }
    }

    fn verify_source(&self, item: &PlanItem) -> SourceState {
        if !item.source.exists() {
            // A prior partial run may have completed this item:
            // trust the filesystem, not in-memory state.
            if let Some(dest) = &item.dest {
                if dest.exists() {
                    if let Ok(hash) = hash_file(dest) {
                        if hash == item.sha256 {
                            return SourceState::AlreadyCompleted(dest.clone());
                        }
                    }
                }
            }
            return SourceState::Vanished;
        }

        let size = match fs::metadata(&item.source) {
            Ok(m) => m.len(),
            Err(e) => return SourceState::Changed(format!("cannot stat source: {e}")),
        };
        if size != item.size {
            return SourceState::Changed(format!(
                "size changed since plan time: {} -> {size}",
                item.size
            ));
        }

        match hash_file(&item.source) {
            Ok(hash) if hash == item.sha256 => SourceState::Intact,
            Ok(_) => SourceState::Changed("content changed since plan time".to_string()),
            Err(e) => SourceState::Changed(format!("cannot hash source: {e}")),
        }
    }

    fn apply(&self, item: &PlanItem, planned_dest: &Path) -> Result<PathBuf> {
        if let Some(parent) = planned_dest.parent() {
            fs::create_dir_all(parent)?;
        }

        // verifying-dest: a new collision may have appeared since
        // plan time; re-version against the live filesystem.
        let final_dest = next_free_path(planned_dest, |p| p.exists())?;

        match item.action {
            Action::Move | Action::Rename => move_file(&item.source, &final_dest, &item.sha256)?,
            Action::Copy => copy_file(&item.source, &final_dest, &item.sha256)?,
            Action::Skip => unreachable!("skip handled before apply"),
        }

        Ok(final_dest)
    }
}

enum SourceState {
    Intact,
    AlreadyCompleted(PathBuf),
    Changed(String),
    Vanished,
}

fn result(
    item: &PlanItem,
    final_dest: Option<PathBuf>,
    status: ExecStatus,
    error_kind: Option<String>,
    detail: Option<String>,
) -> ExecutionResult {
    ExecutionResult {
        source: item.source.clone(),
        planned_dest: item.dest.clone(),
        final_dest,
        status,
        error_kind,
        detail,
        timestamp: Local::now(),
    }
}

/// MOVE: rename when the filesystem allows it, otherwise copy, verify
/// the copy's hash, and only then unlink the source. Any failure
/// before the unlink leaves the source untouched and removes a
/// half-written destination.
fn move_file(source: &Path, dest: &Path, expected_hash: &str) -> Result<()> {
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }

    copy_file(source, dest, expected_hash)?;
    fs::remove_file(source)?;
    Ok(())
}

/// COPY: write to a destination that did not exist, then verify the
/// hash. A mismatch removes the copy and fails the item; the source
/// is never touched.
fn copy_file(source: &Path, dest: &Path, expected_hash: &str) -> Result<()> {
    if let Err(e) = write_copy(source, dest) {
        let _ = fs::remove_file(dest);
        return Err(e);
    }

    let actual = match hash_file(dest) {
        Ok(hash) => hash,
        Err(e) => {
            let _ = fs::remove_file(dest);
            return Err(e);
        }
    };

    if actual != expected_hash {
        let _ = fs::remove_file(dest);
        return Err(ArquivistaError::Integrity(format!(
            "hash mismatch after copy to {}",
            dest.display()
        )));
    }

    Ok(())
}

fn write_copy(source: &Path, dest: &Path) -> Result<()> {
    let mut reader = File::open(source)?;
    // create_new: a destination existing at operation start is never
    // opened for writing.
    let mut writer = OpenOptions::new().write(true).create_new(true).open(dest)?;
    std::io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    Ok(())
}

/// Flushes the manifest atomically (temp + rename). The Drop impl
/// covers panic and early-error paths with a best-effort flush so a
/// partial run still leaves a manifest behind.
struct ManifestGuard {
    manifest: Arc<Mutex<Manifest>>,
    path: PathBuf,
    flushed: bool,
}

impl ManifestGuard {
    fn new(manifest: Arc<Mutex<Manifest>>, path: PathBuf) -> Self {
        Self {
            manifest,
            path,
            flushed: false,
        }
    }

    fn write(&self) -> Result<()> {
        // Recover from poisoning: the flush-on-drop path runs exactly
        // when a panic may have poisoned the lock.
        let manifest = match self.manifest.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let json = serde_json::to_string_pretty(&manifest)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.write()?;
        self.flushed = true;
        Ok(())
    }
}

impl Drop for ManifestGuard {
    fn drop(&mut self) {
        if !self.flushed {
            if let Err(e) = self.write() {
                warn!("failed to flush partial manifest to {:?}: {e}", self.path);
            }
        }
    }
}

/// Textual per-item run log, appended as items execute.
struct RunLog {
    writer: std::io::BufWriter<File>,
}

impl RunLog {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: std::io::BufWriter::new(file),
        })
    }

    fn record(&mut self, item: &PlanItem, result: &ExecutionResult) {
        let status = match result.status {
            ExecStatus::Applied => "APPLIED",
            ExecStatus::DryRun => "DRY-RUN",
            ExecStatus::Skipped => "SKIPPED",
            ExecStatus::Failed => "FAILED",
        };
        let dest = result
            .final_dest
            .as_ref()
            .or(item.dest.as_ref())
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "-".to_string());

        let line = format!(
            "{} [{status}] {} {} -> {}{}",
            result.timestamp.format("%Y-%m-%d %H:%M:%S"),
            item.action,
            item.source.display(),
            dest,
            result
                .detail
                .as_ref()
                .map(|d| format!(" ({d})"))
                .unwrap_or_default(),
        );
        if let Err(e) = writeln!(self.writer, "{line}") {
            warn!("run log write failed: {e}");
        }
    }

    fn note(&mut self, message: &str) {
        let _ = writeln!(
            self.writer,
            "{} [NOTE] {message}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn write_source(dir: &Path, name: &str, content: &[u8]) -> (PathBuf, String) {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        let hash = hash_file(&path).unwrap();
        (path, hash)
    }

    fn move_item(source: PathBuf, dest: PathBuf, sha256: String, size: u64) -> PlanItem {
        PlanItem {
            action: Action::Move,
            source,
            dest: Some(dest),
            reason: "test".to_string(),
            confidence: 95,
            rule_id: None,
            llm_used: false,
            size,
            sha256,
        }
    }

    fn plan_with(base_root: PathBuf, items: Vec<PlanItem>) -> Plan {
        let mut counts = crate::model::ActionCounts::default();
        for item in &items {
            counts.record(item.action);
        }
        Plan {
            id: "plan_test".to_string(),
            generated_at: Local::now(),
            base_root,
            counts,
            items,
        }
    }

    #[test]
    fn dry_run_mutates_nothing_and_reports_every_item() {
        let dir = tempfile::tempdir().unwrap();
        let (source, hash) = write_source(dir.path(), "a.txt", b"hello dry run");
        let dest = dir.path().join("out").join("a.txt");

        let plan = plan_with(
            dir.path().to_path_buf(),
            vec![move_item(source.clone(), dest.clone(), hash, 13)],
        );

        let executor = Executor::new(ExecMode::DryRun, dir.path().join("logs"));
        let (manifest, manifest_path) = executor.execute(&plan).unwrap();

        assert!(source.exists());
        assert!(!dest.exists());
        assert_eq!(manifest.results.len(), 1);
        assert!(manifest
            .results
            .iter()
            .all(|r| r.status == ExecStatus::DryRun));
        assert!(manifest_path.exists());
        assert!(!manifest_path.with_extension("json.tmp").exists());
    }

    #[test]
    fn apply_moves_file_and_preserves_content() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"invoice body".to_vec();
        let (source, hash) = write_source(dir.path(), "invoice.txt", &content);
        let dest = dir.path().join("02_Financas").join("invoice.txt");

        let plan = plan_with(
            dir.path().to_path_buf(),
            vec![move_item(source.clone(), dest.clone(), hash, content.len() as u64)],
        );

        let executor = Executor::new(ExecMode::Apply, dir.path().join("logs"));
        let (manifest, _) = executor.execute(&plan).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&dest).unwrap(), content);
        assert_eq!(manifest.count(ExecStatus::Applied), 1);
        assert_eq!(manifest.results[0].final_dest.as_ref().unwrap(), &dest);
    }

    #[test]
    fn live_collision_is_reversioned_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let (source, hash) = write_source(dir.path(), "a.txt", b"new content!");
        let dest_dir = dir.path().join("out");
        fs::create_dir_all(&dest_dir).unwrap();
        let dest = dest_dir.join("a.txt");
        fs::write(&dest, b"pre-existing").unwrap();

        let plan = plan_with(
            dir.path().to_path_buf(),
            vec![move_item(source, dest.clone(), hash, 12)],
        );

        let executor = Executor::new(ExecMode::Apply, dir.path().join("logs"));
        let (manifest, _) = executor.execute(&plan).unwrap();

        // Pre-existing destination untouched, new file versioned.
        assert_eq!(fs::read(&dest).unwrap(), b"pre-existing");
        let final_dest = manifest.results[0].final_dest.clone().unwrap();
        assert_eq!(final_dest, dest_dir.join("a_v2.txt"));
        assert_eq!(fs::read(final_dest).unwrap(), b"new content!");
    }

    #[test]
    fn changed_source_is_skipped_with_source_changed() {
        let dir = tempfile::tempdir().unwrap();
        let (source, hash) = write_source(dir.path(), "a.txt", b"planned state");
        let dest = dir.path().join("out").join("a.txt");

        let plan = plan_with(
            dir.path().to_path_buf(),
            vec![move_item(source.clone(), dest.clone(), hash, 13)],
        );

        // Source rewritten between plan and execute.
        fs::write(&source, b"tampered after planning").unwrap();

        let executor = Executor::new(ExecMode::Apply, dir.path().join("logs"));
        let (manifest, _) = executor.execute(&plan).unwrap();

        assert_eq!(manifest.results[0].status, ExecStatus::Skipped);
        assert_eq!(
            manifest.results[0].error_kind.as_deref(),
            Some("source_changed")
        );
        assert!(source.exists());
        assert!(!dest.exists());
    }

    #[test]
    fn vanished_source_fails_without_creating_destination() {
        let dir = tempfile::tempdir().unwrap();
        let (source, hash) = write_source(dir.path(), "a.txt", b"will vanish..");
        let dest = dir.path().join("out").join("a.txt");
        fs::remove_file(&source).unwrap();

        let plan = plan_with(
            dir.path().to_path_buf(),
            vec![move_item(source, dest.clone(), hash, 13)],
        );

        let executor = Executor::new(ExecMode::Apply, dir.path().join("logs"));
        let (manifest, _) = executor.execute(&plan).unwrap();

        assert_eq!(manifest.results[0].status, ExecStatus::Failed);
        assert_eq!(
            manifest.results[0].error_kind.as_deref(),
            Some("source_changed")
        );
        assert!(!dest.exists());
    }

    #[test]
    fn rerun_after_apply_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"stable content";
        let (source, hash) = write_source(dir.path(), "a.txt", content);
        let dest = dir.path().join("out").join("a.txt");

        let plan = plan_with(
            dir.path().to_path_buf(),
            vec![move_item(source, dest.clone(), hash, content.len() as u64)],
        );

        let executor = Executor::new(ExecMode::Apply, dir.path().join("logs"));
        let (first, _) = executor.execute(&plan).unwrap();
        assert_eq!(first.count(ExecStatus::Applied), 1);

        let files_after_first: BTreeSet<PathBuf> = walk(dir.path().join("out"));

        let (second, _) = executor.execute(&plan).unwrap();
        assert_eq!(second.count(ExecStatus::Applied), 0);
        assert_eq!(second.count(ExecStatus::Skipped), 1);
        assert_eq!(walk(dir.path().join("out")), files_after_first);
    }

    #[test]
    fn skip_items_have_no_filesystem_effect() {
        let dir = tempfile::tempdir().unwrap();
        let (source, hash) = write_source(dir.path(), "a.txt", b"stay put ok?!");

        let plan = plan_with(
            dir.path().to_path_buf(),
            vec![PlanItem {
                action: Action::Skip,
                source: source.clone(),
                dest: None,
                reason: "below confidence threshold".to_string(),
                confidence: 40,
                rule_id: None,
                llm_used: true,
                size: 13,
                sha256: hash,
            }],
        );

        let executor = Executor::new(ExecMode::Apply, dir.path().join("logs"));
        let (manifest, _) = executor.execute(&plan).unwrap();

        assert!(source.exists());
        assert_eq!(manifest.results[0].status, ExecStatus::Skipped);
        assert!(manifest.results[0].error_kind.is_none());
    }

    #[test]
    fn expired_deadline_starts_no_items_but_flushes_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let (source, hash) = write_source(dir.path(), "a.txt", b"left in place");
        let dest = dir.path().join("out").join("a.txt");

        let plan = plan_with(
            dir.path().to_path_buf(),
            vec![move_item(source.clone(), dest.clone(), hash, 13)],
        );

        let executor = Executor::new(ExecMode::Apply, dir.path().join("logs"))
            .with_deadline(Some(Instant::now()));
        let (manifest, manifest_path) = executor.execute(&plan).unwrap();

        assert!(manifest.results.is_empty());
        assert!(source.exists());
        assert!(!dest.exists());
        assert!(manifest_path.exists());
    }

    #[test]
    fn run_log_is_written_alongside_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let (source, hash) = write_source(dir.path(), "a.txt", b"logged content");
        let dest = dir.path().join("out").join("a.txt");

        let plan = plan_with(
            dir.path().to_path_buf(),
            vec![move_item(source, dest, hash, 14)],
        );

        let logs_dir = dir.path().join("logs");
        let executor = Executor::new(ExecMode::Apply, logs_dir.clone());
        executor.execute(&plan).unwrap();

        let log = fs::read_dir(&logs_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().starts_with("run_"))
            .expect("run log present");
        let text = fs::read_to_string(log.path()).unwrap();
        assert!(text.contains("[APPLIED] MOVE"));
    }

    fn walk(root: PathBuf) -> BTreeSet<PathBuf> {
        let mut out = BTreeSet::new();
        if root.is_dir() {
            for entry in walkdir::WalkDir::new(root) {
                let entry = entry.unwrap();
                if entry.file_type().is_file() {
                    out.insert(entry.into_path());
                }
            }
        }
        out
    }
}
