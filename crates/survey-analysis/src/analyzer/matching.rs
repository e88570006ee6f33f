//! Change detection and dispatch of matching work.

use std::collections::BTreeMap;
use std::mem;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use survey_core::{AnalysisResult, Error, IgnoreLock as _, ResponseAnalysis, ResponseRecord, Result};

use crate::client::LlmClient;

/// Worker count used when none is configured.
pub const DEFAULT_WORKERS: usize = 4;

/// Analyses keyed by response id.
pub type AnalysisMap = BTreeMap<String, ResponseAnalysis>;

/// Batch size for `dirty` responses when none is configured.
pub fn auto_batch_size(dirty: usize) -> usize {
    if dirty > 100 {
        20
    } else if dirty < 10 {
        dirty.max(1)
    } else {
        10
    }
}

/// Worker count for `dirty` responses in batches of `batch_size`.
pub fn auto_workers(dirty: usize, batch_size: usize) -> usize {
    dirty.div_ceil(batch_size.max(1)).clamp(1, DEFAULT_WORKERS)
}

/// Splits responses into analyses carried over from `previous` and those that
/// need matching.
///
/// A response is carried over only when the previous run holds an analysis
/// for the same id with the same content hash.
pub fn partition(
    responses: &[ResponseRecord],
    previous: Option<&AnalysisResult>,
) -> (AnalysisMap, Vec<ResponseRecord>) {
    let mut unchanged = AnalysisMap::new();
    let mut dirty = Vec::new();

    for response in responses {
        let prior = previous
            .and_then(|result| result.response_analyses.get(&response.id))
            .filter(|analysis| analysis.response.content_hash == response.content_hash);
        match prior {
            Some(analysis) => {
                tracing::debug!(response_id = %response.id, "Reusing previous analysis");
                unchanged.insert(response.id.clone(), analysis.clone());
            }
            None => dirty.push(response.clone()),
        }
    }

    (unchanged, dirty)
}

fn texts(responses: &[ResponseRecord]) -> Vec<String> {
    responses.iter().map(|response| response.text.clone()).collect()
}

fn into_analyses(responses: &[ResponseRecord], mut assignments: Vec<Vec<String>>) -> Vec<ResponseAnalysis> {
    assignments.resize(responses.len(), Vec::new());
    responses
        .iter()
        .cloned()
        .zip(assignments)
        .map(|(response, themes)| ResponseAnalysis::new(response, themes))
        .collect()
}

/// Matches `dirty` one batch after another.
///
/// # Errors
/// Returns the first batch error.
pub async fn match_serial(
    client: &LlmClient,
    dirty: &[ResponseRecord],
    themes: &[String],
    context_prompt: &str,
    batch_size: usize,
) -> Result<AnalysisMap> {
    tracing::info!(responses = dirty.len(), batch_size, "Matching responses to themes");
    let assignments = client
        .match_batch(&texts(dirty), themes, context_prompt, batch_size)
        .await?;

    Ok(into_analyses(dirty, assignments)
        .into_iter()
        .map(|analysis| (analysis.response.id.clone(), analysis))
        .collect())
}

/// Matches `dirty` with at most `workers` batches in flight.
///
/// Every batch runs to completion. If any of them failed the partial results
/// are discarded and all failures are reported together.
///
/// # Errors
/// Returns [`Error::BatchProcessing`] listing every failed batch.
pub async fn match_parallel(
    client: &Arc<LlmClient>,
    dirty: &[ResponseRecord],
    themes: &[String],
    context_prompt: &str,
    batch_size: usize,
    workers: usize,
) -> Result<AnalysisMap> {
    let batch_size = batch_size.max(1);
    tracing::info!(
        responses = dirty.len(),
        batch_size,
        workers,
        "Matching responses to themes in parallel"
    );

    let themes: Arc<[String]> = Arc::from(themes);
    let context_prompt: Arc<str> = Arc::from(context_prompt);
    let results = Arc::new(Mutex::new(AnalysisMap::new()));
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut join_set = JoinSet::new();

    for (index, batch) in dirty.chunks(batch_size).enumerate() {
        let batch = batch.to_vec();
        let client = Arc::clone(client);
        let themes = Arc::clone(&themes);
        let context_prompt = Arc::clone(&context_prompt);
        let semaphore = Arc::clone(&semaphore);
        let results = Arc::clone(&results);

        join_set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|err| format!("failed to process batch {index}: {err}"))?;
            tracing::debug!(batch = index, size = batch.len(), "Processing batch");

            let assignments = client
                .match_batch(&texts(&batch), &themes, &context_prompt, batch.len())
                .await
                .map_err(|err| format!("failed to process batch {index}: {err}"))?;

            let analyses = into_analyses(&batch, assignments);
            {
                let mut shared = results.lock_ignore_poison();
                for analysis in analyses {
                    shared.insert(analysis.response.id.clone(), analysis);
                }
            }
            tracing::debug!(batch = index, size = batch.len(), "Batch processed");
            Ok::<(), String>(())
        });
    }

    let mut failures = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(message)) => failures.push(message),
            Err(err) => failures.push(format!("batch task failed: {err}")),
        }
    }

    if !failures.is_empty() {
        failures.sort();
        return Err(Error::BatchProcessing(failures));
    }

    let matched = mem::take(&mut *results.lock_ignore_poison());
    Ok(matched)
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_batch_size() {
        assert_eq!(auto_batch_size(3), 3);
        assert_eq!(auto_batch_size(10), 10);
        assert_eq!(auto_batch_size(100), 10);
        assert_eq!(auto_batch_size(101), 20);
    }

    #[test]
    fn test_auto_workers() {
        assert_eq!(auto_workers(3, 3), 1);
        assert_eq!(auto_workers(25, 10), 3);
        assert_eq!(auto_workers(500, 20), DEFAULT_WORKERS);
    }

    #[test]
    fn test_partition_by_hash() {
        let kept = ResponseRecord::new(2, "same text");
        let edited = ResponseRecord::new(3, "old text");
        let mut previous = AnalysisResult::new(vec!["Parking".to_owned()]);
        for record in [&kept, &edited] {
            previous.response_analyses.insert(
                record.id.clone(),
                ResponseAnalysis::new(record.clone(), vec!["Parking".to_owned()]),
            );
        }

        let responses = vec![
            kept.clone(),
            ResponseRecord::new(3, "new text"),
            ResponseRecord::new(4, "brand new"),
        ];
        let (unchanged, dirty) = partition(&responses, Some(&previous));

        assert_eq!(unchanged.len(), 1);
        assert!(unchanged.contains_key("R2"));
        let dirty_ids: Vec<&str> = dirty.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(dirty_ids, vec!["R3", "R4"]);

        let (unchanged, dirty) = partition(&responses, None);
        assert!(unchanged.is_empty());
        assert_eq!(dirty.len(), 3);
    }

    #[test]
    fn test_into_analyses_pads_missing_assignments() {
        let records = vec![ResponseRecord::new(2, "a"), ResponseRecord::new(3, "b")];
        let analyses = into_analyses(&records, vec![vec!["Parking".to_owned()]]);
        assert_eq!(analyses.len(), 2);
        assert_eq!(analyses[0].themes, vec!["Parking"]);
        assert!(analyses[1].themes.is_empty());
    }
}
