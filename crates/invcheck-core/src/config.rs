//! Loading and validating test specifications
//!
//! Documents are parsed into a generic JSON value first, validated against
//! the JSON Schema derived from [`TestSpecification`], then deserialized and
//! checked for cross-field problems (duplicate ids, forward references,
//! unknown invariant names).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::invariant::InvariantKind;
use crate::spec::TestSpecification;
use crate::template;

/// Largest accepted `numeric_max`; random sampling draws up to twice it.
pub const MAX_NUMERIC_MAX: f64 = 1.0e15;
pub const MAX_RETRY_ATTEMPTS: u32 = 100;
pub const MAX_RANDOM_SAMPLES: u32 = 10_000;
pub const MAX_OVERSIZED_LEN: usize = 10_000_000;

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
    Toml,
}

impl Format {
    /// Detect from the file extension, then by content.
    ///
    /// Unknown extensions: leading `{` means JSON, otherwise YAML.
    #[must_use]
    pub fn detect(path: &Path, content: &str) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Self::Yaml,
            "json" => Self::Json,
            "toml" => Self::Toml,
            _ if content.trim_start().starts_with('{') => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// Load a specification from disk.
///
/// # Errors
///
/// Returns error if the file cannot be read, parsed, or fails validation
pub fn load(path: &Path) -> Result<TestSpecification, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
    from_str(&content, Format::detect(path, &content))
}

/// Parse and validate a specification document.
///
/// # Errors
///
/// Returns error if the document cannot be parsed or fails validation
pub fn from_str(content: &str, format: Format) -> Result<TestSpecification, ConfigError> {
    let raw: serde_json::Value = match format {
        Format::Yaml => serde_yml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Invalid YAML: {e}")))?,
        Format::Json => serde_json::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Invalid JSON: {e}")))?,
        Format::Toml => toml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Invalid TOML: {e}")))?,
    };

    check_schema(&raw)?;

    let spec: TestSpecification =
        serde_json::from_value(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&spec)?;
    Ok(spec)
}

fn check_schema(raw: &serde_json::Value) -> Result<(), ConfigError> {
    let schema = schemars::schema_for!(TestSpecification);
    let validator = jsonschema::validator_for(schema.as_value())
        .map_err(|e| ConfigError::Schema(vec![format!("schema compilation: {e}")]))?;
    let errors: Vec<String> = validator
        .iter_errors(raw)
        .take(10)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Schema(errors))
    }
}

/// Semantic checks the schema cannot express.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] listing every problem found
pub fn validate(spec: &TestSpecification) -> Result<(), ConfigError> {
    let mut problems = Vec::new();

    if !(spec.base_url.starts_with("http://") || spec.base_url.starts_with("https://")) {
        problems.push(format!(
            "base_url must start with http:// or https://, got '{}'",
            spec.base_url
        ));
    }
    if !(spec.timeout_secs.is_finite() && spec.timeout_secs > 0.0) {
        problems.push(format!("timeout_secs must be positive, got {}", spec.timeout_secs));
    }
    if spec.steps.is_empty() {
        problems.push("specification has no steps".to_string());
    }
    if let Some(source) = &spec.snapshot {
        if !source.resource.starts_with('/') {
            problems.push(format!(
                "snapshot resource must start with '/', got '{}'",
                source.resource
            ));
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in &spec.steps {
        let id = step.id.as_str();
        if id.is_empty() || id.contains('.') || id.contains(char::is_whitespace) {
            problems.push(format!(
                "step id '{id}' must be non-empty without dots or whitespace"
            ));
        }
        if !step.path.starts_with('/') {
            problems.push(format!("step '{id}': path must start with '/'"));
        }
        for name in &step.invariants {
            if name.parse::<InvariantKind>().is_err() {
                problems.push(format!("step '{id}': unknown invariant '{name}'"));
            }
        }
        if let Some(status) = step.expect_status {
            if !(100..=599).contains(&status) {
                problems.push(format!("step '{id}': expect_status {status} out of range"));
            }
        }
        if let Some(retry) = &step.retry {
            if !(2..=MAX_RETRY_ATTEMPTS).contains(&retry.attempts) {
                problems.push(format!(
                    "step '{id}': retry attempts must be between 2 and {MAX_RETRY_ATTEMPTS}, got {}",
                    retry.attempts
                ));
            }
        }
        if let Some(fuzz) = &step.fuzz {
            if fuzz.workers == 0 {
                problems.push(format!("step '{id}': fuzz workers must be at least 1"));
            }
            if fuzz.kinds.is_empty() && fuzz.random.is_none() {
                problems.push(format!("step '{id}': fuzz policy generates no cases"));
            }
            if let Some(max) = fuzz.numeric_max {
                if !(max.is_finite() && (0.0..=MAX_NUMERIC_MAX).contains(&max)) {
                    problems.push(format!(
                        "step '{id}': numeric_max must be between 0 and {MAX_NUMERIC_MAX:e}, got {max}"
                    ));
                }
            }
            if fuzz.oversized_len > MAX_OVERSIZED_LEN {
                problems.push(format!(
                    "step '{id}': oversized_len must be at most {MAX_OVERSIZED_LEN}"
                ));
            }
            if let Some(random) = &fuzz.random {
                if random.samples > MAX_RANDOM_SAMPLES {
                    problems.push(format!(
                        "step '{id}': random samples must be at most {MAX_RANDOM_SAMPLES}"
                    ));
                }
            }
        }
        if step.has_variants() && !step.method.has_body() {
            problems.push(format!("step '{id}': payload variants need a method with a body"));
        }
        if step.valid_cases.iter().any(|case| !case.is_object()) {
            problems.push(format!("step '{id}': valid_cases must be objects"));
        }

        let mut references = template::referenced_steps(&step.path);
        if let Some(body) = &step.body {
            references.extend(template::referenced_steps_in_value(body));
        }
        for value in step.headers.values() {
            references.extend(template::referenced_steps(value));
        }
        for case in &step.valid_cases {
            references.extend(template::referenced_steps_in_value(case));
        }
        if let Some(resource) = &step.snapshot {
            references.extend(template::referenced_steps(resource));
        }
        if let Some(reset) = step.fuzz.as_ref().and_then(|f| f.reset.as_ref()) {
            references.extend(template::referenced_steps(&reset.path));
            if let Some(body) = &reset.body {
                references.extend(template::referenced_steps_in_value(body));
            }
            for value in reset.headers.values() {
                references.extend(template::referenced_steps(value));
            }
        }
        for target in references {
            if !seen.contains(target) {
                problems.push(format!(
                    "step '{id}': references '{target}', which is not an earlier step"
                ));
            }
        }

        if !seen.insert(id) {
            problems.push(format!("duplicate step id '{id}'"));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(problems))
    }
}

/// Starter specification written by `invcheck init`.
#[must_use]
pub fn example() -> &'static str {
    r#"# invcheck test specification

# Service under test
base_url: "http://127.0.0.1:5000"
timeout_secs: 5.0

# Sent with every request (auth, bug toggles)
headers:
  Content-Type: application/json
  # X-Bug-Negative-Balance: "1"

# Where observable state is read from
snapshot:
  resource: /balance
  fields_pointer: /accounts

steps:
  - id: reset
    method: POST
    path: /reset
    invariants: [status_code_expected]

  - id: transfer
    method: POST
    path: /transfer
    body: { from: A, to: B, amount: 50 }
    invariants: [balance_conservation, no_negative_balance, status_code_expected]

  - id: transfer_variants
    method: POST
    path: /transfer
    body: { from: A, to: B, amount: 20 }
    # Extra valid bodies, plus amount/10, amount*10 and 1 derived from `body`
    valid_cases:
      - { from: B, to: A, amount: 5 }
    amount_variants: true
    invariants: [balance_conservation, no_negative_balance]

  - id: transfer_retry
    method: POST
    path: /transfer
    body: { from: A, to: B, amount: 10 }
    retry:
      attempts: 3
      strategy: { kind: immediate }
    invariants: [no_duplicate_side_effect_on_retry]

  - id: transfer_fuzz
    method: POST
    path: /transfer
    body: { from: A, to: B, amount: 10 }
    fuzz:
      kinds: [drop_required_field, wrong_type, boundary_numeric, null_required_field]
      numeric_max: 1000000
      reset: { method: POST, path: /reset }

  # Bug-demo step: passes only if the violation is detected
  # - id: overdraft
  #   method: POST
  #   path: /transfer
  #   headers: { X-Bug-Negative-Balance: "1" }
  #   body: { from: A, to: B, amount: 150 }
  #   invariants: [no_negative_balance]
  #   expect: fail
"#
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {}: {}", .0.display(), .1)]
    Io(PathBuf, String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Schema violation: {}", .0.join("; "))]
    Schema(Vec<String>),
    #[error("Invalid specification: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
