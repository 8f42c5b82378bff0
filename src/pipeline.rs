// SPDX-License-Identifier: MIT

//! Bounded-queue pipeline: Scan → Extract → Rule-match → LLM.
//!
//! The scan walks on a blocking thread and feeds a bounded channel.
//! A small pool of extract workers enriches records and runs rule
//! matching inline; unresolved records flow to the LLM stage, whose
//! own semaphore bounds backend concurrency. Results are collected
//! and ordered by source path so planning is deterministic.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::extractor::Extractor;
use crate::llm::{fallback_classification, LlmClassifier};
use crate::model::{Classification, FileRecord};
use crate::rules::RuleEngine;
use crate::scanner::{ScanStats, Scanner};
use crate::{ArquivistaError, Result};

/// Capacity of the inter-stage queues
const QUEUE_CAPACITY: usize = 256;
/// Extract worker pool size
const EXTRACT_WORKERS: usize = 4;

/// Everything the planner needs from one pipeline run.
pub struct PipelineOutput {
    /// Classified records, ordered by source path
    pub pairs: Vec<(FileRecord, Classification)>,
    pub scan_stats: ScanStats,
    pub rule_hits: BTreeMap<String, u64>,
}

/// Run the classification pipeline over the given roots.
///
/// `classifier` is `None` in rules-only mode; records no rule matches
/// then fall back to the inbox with confidence 0. `file_timeout`
/// bounds one file's extraction and one file's classification; a
/// file that exceeds it continues without an excerpt or falls back
/// to the inbox instead of stalling the run.
pub async fn run(
    roots: Vec<PathBuf>,
    scanner: Scanner,
    extractor: Arc<Extractor>,
    rules: Arc<RuleEngine>,
    classifier: Option<Arc<LlmClassifier>>,
    file_timeout: Duration,
    cancel: CancellationToken,
) -> Result<PipelineOutput> {
    let (scan_tx, scan_rx) = mpsc::channel::<FileRecord>(QUEUE_CAPACITY);
    let (resolved_tx, mut resolved_rx) =
        mpsc::channel::<(FileRecord, Classification)>(QUEUE_CAPACITY);
    let (llm_tx, llm_rx) = mpsc::channel::<FileRecord>(QUEUE_CAPACITY);

    // Scan: blocking walk, one record at a time into the bounded
    // queue.
    let scan_cancel = cancel.clone();
    let scan_handle = tokio::task::spawn_blocking(move || -> Result<ScanStats> {
        let mut stats = ScanStats::default();
        for root in &roots {
            let mut iter = scanner.scan(root)?;
            for record in iter.by_ref() {
                if scan_cancel.is_cancelled() {
                    break;
                }
                if scan_tx.blocking_send(record).is_err() {
                    break;
                }
            }
            let root_stats = iter.into_stats();
            stats.files_scanned += root_stats.files_scanned;
            stats.files_excluded += root_stats.files_excluded;
            stats.directories_skipped += root_stats.directories_skipped;
            stats.total_size_bytes += root_stats.total_size_bytes;
        }
        Ok(stats)
    });

    // Extract workers: enrich, then rule-match inline.
    let scan_rx = Arc::new(Mutex::new(scan_rx));
    let mut extract_handles = Vec::with_capacity(EXTRACT_WORKERS);
    for worker in 0..EXTRACT_WORKERS {
        let scan_rx = Arc::clone(&scan_rx);
        let extractor = Arc::clone(&extractor);
        let rules = Arc::clone(&rules);
        let resolved_tx = resolved_tx.clone();
        let llm_tx = llm_tx.clone();
        let cancel = cancel.clone();

        extract_handles.push(tokio::spawn(async move {
            loop {
                let record = {
                    let mut rx = scan_rx.lock().await;
                    tokio::select! {
                        _ = cancel.cancelled() => None,
                        record = rx.recv() => record,
                    }
                };
                let Some(record) = record else { break };

                let extractor = Arc::clone(&extractor);
                let input = record.clone();
                let record = match tokio::time::timeout(
                    file_timeout,
                    tokio::task::spawn_blocking(move || {
                        let mut record = input;
                        extractor.enrich(&mut record);
                        record
                    }),
                )
                .await
                {
                    Ok(Ok(record)) => record,
                    Ok(Err(e)) => {
                        warn!("extract worker {worker} lost a record: {e}");
                        continue;
                    }
                    Err(_) => {
                        // The blocking task is abandoned to finish on
                        // its thread; the file goes on with an empty
                        // excerpt, like any other extraction failure.
                        warn!(
                            "extraction exceeded {file_timeout:?} for {:?}, continuing without excerpt",
                            record.path
                        );
                        let mut record = record;
                        record.excerpt = Some(String::new());
                        record
                    }
                };

                let sent = match rules.classify(&record) {
                    Some(classification) => {
                        resolved_tx.send((record, classification)).await.is_ok()
                    }
                    None => llm_tx.send(record).await.is_ok(),
                };
                if !sent {
                    break;
                }
            }
            debug!("extract worker {worker} finished");
        }));
    }
    drop(resolved_tx);
    drop(llm_tx);

    // LLM stage: unresolved records, bounded by the classifier's own
    // semaphore and rate limiter.
    let llm_cancel = cancel.clone();
    let llm_handle = tokio::spawn(async move {
        let mut llm_rx = llm_rx;
        let mut in_flight = JoinSet::new();

        loop {
            let record = tokio::select! {
                _ = llm_cancel.cancelled() => None,
                record = llm_rx.recv() => record,
            };
            let Some(record) = record else { break };

            match &classifier {
                Some(classifier) => {
                    let classifier = Arc::clone(classifier);
                    in_flight.spawn(async move {
                        let classification = match tokio::time::timeout(
                            file_timeout,
                            classifier.classify(&record),
                        )
                        .await
                        {
                            Ok(classification) => classification,
                            Err(_) => fallback_classification(
                                &record,
                                "classification exceeded the per-file budget",
                            ),
                        };
                        (record, classification)
                    });
                }
                None => {
                    let classification =
                        fallback_classification(&record, "no rule matched in rules-only mode");
                    in_flight.spawn(async move { (record, classification) });
                }
            }
        }

        let mut resolved = Vec::new();
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(pair) => resolved.push(pair),
                Err(e) => warn!("classification task failed: {e}"),
            }
        }
        resolved
    });

    // Collect rule-resolved pairs as they stream out.
    let mut pairs = Vec::new();
    while let Some(pair) = resolved_rx.recv().await {
        pairs.push(pair);
    }

    for handle in extract_handles {
        if let Err(e) = handle.await {
            warn!("extract worker panicked: {e}");
        }
    }

    match llm_handle.await {
        Ok(resolved) => pairs.extend(resolved),
        Err(e) => warn!("llm stage panicked: {e}"),
    }

    let scan_stats = scan_handle
        .await
        .map_err(|e| ArquivistaError::Io(std::io::Error::other(e)))??;

    pairs.sort_by(|a, b| a.0.path.cmp(&b.0.path));

    Ok(PipelineOutput {
        pairs,
        scan_stats,
        rule_hits: rules.hit_counts(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtractorConfig, ScannerConfig};
    use crate::model::{Category, ClassificationSource};
    use std::fs;

    const RULES: &str = r#"
rules:
  - id: notes
    pattern: "*.md"
    category: 03_Estudos
    confidence: 95
"#;

    async fn run_rules_only(root: &std::path::Path) -> PipelineOutput {
        run(
            vec![root.to_path_buf()],
            Scanner::new(&ScannerConfig::default()),
            Arc::new(Extractor::new(&ExtractorConfig::default())),
            Arc::new(RuleEngine::from_yaml(RULES).unwrap()),
            None,
            Duration::from_secs(60),
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn matched_records_carry_rule_classifications() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("study.md"), "x".repeat(2048)).unwrap();

        let output = run_rules_only(dir.path()).await;
        assert_eq!(output.pairs.len(), 1);
        let (record, classification) = &output.pairs[0];
        assert_eq!(record.extension, "md");
        assert_eq!(classification.category, Category::Estudos);
        assert_eq!(
            classification.source,
            ClassificationSource::Rule("notes".to_string())
        );
        assert_eq!(output.rule_hits.get("notes"), Some(&1));
    }

    #[tokio::test]
    async fn unmatched_records_fall_back_in_rules_only_mode() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mystery.dat"), "x".repeat(2048)).unwrap();

        let output = run_rules_only(dir.path()).await;
        assert_eq!(output.pairs.len(), 1);
        let (_, classification) = &output.pairs[0];
        assert_eq!(classification.category, Category::Inbox);
        assert_eq!(classification.confidence, 0);
        assert_eq!(classification.source, ClassificationSource::Fallback);
    }

    #[tokio::test]
    async fn output_is_ordered_by_source_path() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.md", "a.md", "b.md"] {
            fs::write(dir.path().join(name), "x".repeat(2048)).unwrap();
        }

        let output = run_rules_only(dir.path()).await;
        let names: Vec<String> = output
            .pairs
            .iter()
            .map(|(r, _)| r.base_name())
            .collect();
        assert_eq!(names, vec!["a.md", "b.md", "c.md"]);
    }

    #[tokio::test]
    async fn empty_root_yields_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_rules_only(dir.path()).await;
        assert!(output.pairs.is_empty());
        assert_eq!(output.scan_stats.files_scanned, 0);
    }

    #[tokio::test]
    async fn cancellation_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            fs::write(dir.path().join(format!("f{i}.md")), "x".repeat(2048)).unwrap();
        }

        let cancel = CancellationToken::new();
        cancel.cancel();

        let output = run(
            vec![dir.path().to_path_buf()],
            Scanner::new(&ScannerConfig::default()),
            Arc::new(Extractor::new(&ExtractorConfig::default())),
            Arc::new(RuleEngine::from_yaml(RULES).unwrap()),
            None,
            Duration::from_secs(60),
            cancel,
        )
        .await
        .unwrap();

        // A pre-cancelled run classifies nothing.
        assert!(output.pairs.is_empty());
    }

    struct StalledBackend;

    #[async_trait::async_trait]
    impl crate::llm::backend::LlmBackend for StalledBackend {
        fn name(&self) -> &'static str {
            "stalled"
        }

        fn model(&self) -> &str {
            "stalled-model"
        }

        async fn health_check(&self) -> crate::Result<()> {
            Ok(())
        }

        async fn generate(&self, _prompt: &str) -> crate::Result<String> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn stalled_classification_falls_back_within_the_file_budget() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mystery.dat"), "x".repeat(2048)).unwrap();

        let classifier = crate::llm::LlmClassifier::new(
            Arc::new(StalledBackend),
            &crate::config::LlmConfig::default(),
        );

        let output = run(
            vec![dir.path().to_path_buf()],
            Scanner::new(&ScannerConfig::default()),
            Arc::new(Extractor::new(&ExtractorConfig::default())),
            Arc::new(RuleEngine::from_yaml(RULES).unwrap()),
            Some(Arc::new(classifier)),
            Duration::from_millis(100),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(output.pairs.len(), 1);
        let (_, classification) = &output.pairs[0];
        assert_eq!(classification.category, Category::Inbox);
        assert_eq!(classification.source, ClassificationSource::Fallback);
        assert!(classification.rationale.contains("per-file budget"));
    }
}
