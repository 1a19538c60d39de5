//! Request/response dump to JSONL files
//!
//! Every exchange a run made (baselines, replays, variants, fuzz cases) is written
//! to one JSONL file per step, plus an `index.json` listing.
//!
//! ```text
//! dumps/
//! ├── 00_reset.jsonl
//! ├── 01_transfer.jsonl
//! └── index.json
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::report::{Execution, StepResult, TestReport};

/// Headers masked in dumps.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "x-auth-token",
    "cookie",
    "proxy-authorization",
];

const MASK: &str = "***";

/// Which part of a step produced the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExchangeKind {
    Baseline,
    Replay { attempt: u32 },
    Variant { label: String },
    Fuzz { case: String },
}

/// One line of a dump file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpRecord {
    pub step_id: String,
    pub exchange: ExchangeKind,
    pub execution: Execution,
}

/// Written as `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpIndex {
    pub total: u64,
    pub steps: Vec<DumpStepEntry>,
    pub dump_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpStepEntry {
    pub step_id: String,
    /// Filename within the dump directory
    pub file: String,
    pub count: u64,
}

/// Write every exchange in `report` to per-step JSONL files.
///
/// # Errors
///
/// Returns error if the directory cannot be created or files cannot be written.
pub fn write_dump(
    report: &TestReport,
    dump_dir: &Path,
    mask_headers: bool,
) -> Result<DumpIndex, DumpError> {
    std::fs::create_dir_all(dump_dir)
        .map_err(|e| DumpError::Io(format!("create {}: {e}", dump_dir.display())))?;

    let mut entries = Vec::with_capacity(report.steps.len());
    let mut total: u64 = 0;

    for step in &report.steps {
        let filename = step_filename(step);
        let filepath = dump_dir.join(&filename);
        let file = std::fs::File::create(&filepath)
            .map_err(|e| DumpError::Io(format!("create {}: {e}", filepath.display())))?;
        let mut writer = std::io::BufWriter::new(file);

        let records = records_for(step);
        let count = records.len() as u64;
        total += count;

        for mut record in records {
            if mask_headers {
                mask_execution(&mut record.execution);
            }
            let line =
                serde_json::to_string(&record).map_err(|e| DumpError::Serialize(e.to_string()))?;
            writeln!(writer, "{line}")
                .map_err(|e| DumpError::Io(format!("write {}: {e}", filepath.display())))?;
        }
        writer
            .flush()
            .map_err(|e| DumpError::Io(format!("flush {}: {e}", filepath.display())))?;

        entries.push(DumpStepEntry {
            step_id: step.step_id.clone(),
            file: filename,
            count,
        });
    }

    let index = DumpIndex {
        total,
        steps: entries,
        dump_dir: dump_dir.to_path_buf(),
    };
    let index_path = dump_dir.join("index.json");
    let index_json =
        serde_json::to_string_pretty(&index).map_err(|e| DumpError::Serialize(e.to_string()))?;
    std::fs::write(&index_path, index_json)
        .map_err(|e| DumpError::Io(format!("write {}: {e}", index_path.display())))?;

    Ok(index)
}

fn records_for(step: &StepResult) -> Vec<DumpRecord> {
    let record = |exchange, execution: &Execution| DumpRecord {
        step_id: step.step_id.clone(),
        exchange,
        execution: execution.clone(),
    };
    let mut records = vec![record(ExchangeKind::Baseline, &step.execution)];
    if let Some(retry) = &step.retry {
        for (attempt, replay) in (2u32..).zip(&retry.replays) {
            records.push(record(ExchangeKind::Replay { attempt }, replay));
        }
    }
    for variant in &step.variants {
        records.push(record(
            ExchangeKind::Variant {
                label: variant.label.clone(),
            },
            &variant.execution,
        ));
    }
    for fuzz in &step.fuzz {
        records.push(record(
            ExchangeKind::Fuzz {
                case: fuzz.case.label.clone(),
            },
            &fuzz.execution,
        ));
    }
    records
}

/// Longest step id kept in a filename.
const MAX_ID_LEN: usize = 120;

/// `3`, `"open account"` -> `03_open_account.jsonl`
fn step_filename(step: &StepResult) -> String {
    let sanitized: String = step
        .step_id
        .chars()
        .take(MAX_ID_LEN)
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' => c,
            _ => '_',
        })
        .collect();
    format!("{:02}_{sanitized}.jsonl", step.index)
}

fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|&h| name.eq_ignore_ascii_case(h))
}

fn mask_execution(execution: &mut Execution) {
    for (name, value) in &mut execution.request_headers {
        if is_sensitive_header(name) {
            *value = MASK.to_string();
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
}
