// src/analysis.rs

use crate::caption::{load_image, Captioner};
use crate::error::{AnalysisError, CaptionError};
use crate::index::{scan_images, PostIndex};
use crate::model::{AnalysisSummary, CaptionRecord, FailedImage, Record, ScanSummary};
use crate::parser::parse_record;
use crate::table::{Table, ID_COLUMN};
use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Field some prompts make the model echo back; the injected `id` replaces it
const ECHOED_ID_FIELD: &str = "Image ID";

pub const POST_ID_COLUMN: &str = "post_id";

/// Everything one captioning run needs
pub struct AnalysisConfig {
    pub image_folder: PathBuf,
    pub instructions: String,
    pub prompt: String,
    pub output: PathBuf,
    pub workers: usize,
    /// Extra attempts after a failed model call
    pub retries: u32,
    pub retry_backoff: Duration,
    /// When set, rows get a `post_id` column looked up by relative path
    pub index: Option<PostIndex>,
}

/// Captions every qualifying image under the folder, in parallel, and writes
/// one CSV row per parsed answer.
///
/// Images that fail to load, call, or parse are logged and listed in the
/// summary; they never abort the run.
pub fn run_analysis(
    config: &AnalysisConfig,
    captioner: &dyn Captioner,
) -> Result<AnalysisSummary, AnalysisError> {
    if !config.image_folder.is_dir() {
        return Err(AnalysisError::DirectoryNotFound(config.image_folder.clone()));
    }

    let mut scan = ScanSummary::default();
    let files = scan_images(&config.image_folder, &mut scan);
    info!(
        "Captioning {} images with {} workers",
        files.len(),
        config.workers
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()?;

    let bar = ProgressBar::new(files.len() as u64);
    bar.set_message("Processing images");

    let outcomes: Vec<Result<CaptionRecord, FailedImage>> = pool.install(|| {
        files
            .par_iter()
            .progress_with(bar.clone())
            .map(|relative| analyze_image(config, captioner, relative))
            .collect()
    });
    bar.finish_with_message("Captioning complete");

    let mut summary = AnalysisSummary {
        images: files.len(),
        output: config.output.clone(),
        ..AnalysisSummary::default()
    };
    summary
        .failures
        .extend(scan.skipped.into_iter().map(|s| FailedImage {
            path: PathBuf::from(s.path),
            reason: s.reason,
        }));

    let mut records = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(record) => records.push(record),
            Err(failure) => summary.failures.push(failure),
        }
    }

    let (table, dropped) = Table::from_records(records);
    summary.records = table.rows.len();
    summary.duplicates_dropped = dropped;
    table.write_csv(&config.output)?;
    info!(
        "Wrote {} rows to {}",
        summary.records,
        config.output.display()
    );
    Ok(summary)
}

fn analyze_image(
    config: &AnalysisConfig,
    captioner: &dyn Captioner,
    relative: &str,
) -> Result<CaptionRecord, FailedImage> {
    let path = config.image_folder.join(relative);
    let fail = |reason: String| {
        warn!("Error processing image {}: {}", relative, reason);
        FailedImage {
            path: PathBuf::from(relative),
            reason,
        }
    };

    let image = load_image(&path).map_err(|e| fail(e.to_string()))?;
    let raw = caption_with_retry(config, &path, || {
        captioner.caption(&config.instructions, &config.prompt, &image)
    })
    .map_err(|e| fail(e.to_string()))?;
    let mut parsed = parse_record(&raw, Some(relative)).map_err(|e| fail(e.to_string()))?;
    parsed.shift_remove(ECHOED_ID_FIELD);
    parsed.shift_remove(ID_COLUMN);

    let fields = match &config.index {
        Some(index) => {
            let mut fields = Record::new();
            fields.insert(
                POST_ID_COLUMN.to_string(),
                index.get(relative).unwrap_or_default().to_string(),
            );
            fields.extend(parsed);
            fields
        }
        None => parsed,
    };

    Ok(CaptionRecord {
        id: relative.to_string(),
        fields,
    })
}

/// Runs `call` once plus up to `config.retries` more times, backing off linearly.
fn caption_with_retry(
    config: &AnalysisConfig,
    path: &Path,
    call: impl Fn() -> Result<String, CaptionError>,
) -> Result<String, CaptionError> {
    let mut attempt = 0;
    loop {
        match call() {
            Ok(text) => return Ok(text),
            Err(e) if attempt < config.retries => {
                attempt += 1;
                warn!(
                    "Model call for {} failed ({}), retry {}/{}",
                    path.display(),
                    e,
                    attempt,
                    config.retries
                );
                thread::sleep(config.retry_backoff * attempt);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caption::EncodedImage;
    use image::RgbImage;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const ANSWER: &str = "```json\n{\"Image ID\": \"x.png\", \"1\": \"Oppose\", \"2\": \"Yes\",}\n```";

    struct Canned(&'static str);

    impl Captioner for Canned {
        fn caption(&self, _: &str, _: &str, _: &EncodedImage) -> Result<String, CaptionError> {
            Ok(self.0.to_string())
        }
    }

    /// Fails the first `failures` calls, then answers.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl Captioner for Flaky {
        fn caption(&self, _: &str, _: &str, _: &EncodedImage) -> Result<String, CaptionError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(CaptionError::EmptyResponse)
            } else {
                Ok(ANSWER.to_string())
            }
        }
    }

    fn image_at(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::new(2, 2).save(path).unwrap();
    }

    fn config(dir: &TempDir) -> AnalysisConfig {
        AnalysisConfig {
            image_folder: dir.path().join("assets"),
            instructions: "instructions".to_string(),
            prompt: "prompt".to_string(),
            output: dir.path().join("out.csv"),
            workers: 4,
            retries: 0,
            retry_backoff: Duration::ZERO,
            index: None,
        }
    }

    #[test]
    fn parsed_rows_are_written_with_id_first() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("assets");
        image_at(&root, "Save_LBI/b.png");
        image_at(&root, "Save_LBI/a.png");
        image_at(&root, "Green_Oceans/c.png");
        fs::write(root.join("notes.txt"), "ignored").unwrap();
        fs::write(root.join("broken.png"), "not an image").unwrap();

        let config = config(&dir);
        let summary = run_analysis(&config, &Canned(ANSWER)).unwrap();

        assert_eq!(summary.images, 4);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].path, PathBuf::from("broken.png"));
        assert_eq!(
            fs::read_to_string(&config.output).unwrap(),
            "id,1,2\n\
             Green_Oceans/c.png,Oppose,Yes\n\
             Save_LBI/a.png,Oppose,Yes\n\
             Save_LBI/b.png,Oppose,Yes\n"
        );
    }

    #[test]
    fn unparseable_answers_are_dropped() {
        let dir = TempDir::new().unwrap();
        image_at(&dir.path().join("assets"), "a.png");

        let config = config(&dir);
        let summary = run_analysis(&config, &Canned("I cannot help with that.")).unwrap();
        assert_eq!(summary.records, 0);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(fs::read_to_string(&config.output).unwrap(), "id\n");
    }

    #[test]
    fn failed_calls_are_retried_up_to_the_limit() {
        let dir = TempDir::new().unwrap();
        image_at(&dir.path().join("assets"), "a.png");
        let mut config = config(&dir);

        let flaky = Flaky {
            failures: 1,
            calls: AtomicUsize::new(0),
        };
        let summary = run_analysis(&config, &flaky).unwrap();
        assert_eq!(summary.records, 0);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);

        config.retries = 2;
        let flaky = Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let summary = run_analysis(&config, &flaky).unwrap();
        assert_eq!(summary.records, 1);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn post_ids_are_joined_from_the_index() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("assets");
        image_at(&root, "Save_LBI/a.png");
        image_at(&root, "Save_LBI/b.png");

        let mut index = PostIndex::default();
        index.insert_raw("Save_LBI/a.png", "SLBI-0001");
        let mut config = config(&dir);
        config.index = Some(index);

        run_analysis(&config, &Canned("{\"1\": \"x\"}")).unwrap();
        assert_eq!(
            fs::read_to_string(&config.output).unwrap(),
            "id,post_id,1\nSave_LBI/a.png,SLBI-0001,x\nSave_LBI/b.png,,x\n"
        );
    }

    #[test]
    fn missing_folder_is_fatal() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            run_analysis(&config(&dir), &Canned(ANSWER)),
            Err(AnalysisError::DirectoryNotFound(_))
        ));
    }
}
