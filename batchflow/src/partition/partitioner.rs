//! Splitting a job input into per-file partitions.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::{ExecutionContext, JobParameters, ERROR_FILE_KEY, INPUT_FILE_KEY};
use crate::errors::{BatchError, Result};

/// Job parameter naming an input directory.
pub const INPUT_DIR_PARAM: &str = "input.dir";
/// Job parameter naming a single input file.
pub const INPUT_FILE_PARAM: &str = "input.file";

/// What a job reads: a directory expanded with a pattern, or one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Directory to expand.
    pub input_dir: Option<PathBuf>,
    /// Single input file.
    pub input_file: Option<PathBuf>,
    /// File name pattern applied inside `input_dir`.
    pub pattern: String,
}

impl InputSpec {
    /// An input spec for a directory.
    #[must_use]
    pub fn dir(path: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            input_dir: Some(path.into()),
            input_file: None,
            pattern: pattern.into(),
        }
    }

    /// An input spec for one file.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: None,
            input_file: Some(path.into()),
            pattern: String::new(),
        }
    }

    /// Reads `input.dir` / `input.file` from job parameters.
    #[must_use]
    pub fn from_parameters(parameters: &JobParameters, pattern: &str) -> Self {
        Self {
            input_dir: parameters.get_string(INPUT_DIR_PARAM).map(PathBuf::from),
            input_file: parameters.get_string(INPUT_FILE_PARAM).map(PathBuf::from),
            pattern: pattern.to_string(),
        }
    }
}

/// One partition: an input resource and its error file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    /// Partition name (`partition<i>`).
    pub name: String,
    /// Input resource.
    pub input: PathBuf,
    /// Error sink resource, derived from the input.
    pub error_file: PathBuf,
}

impl PartitionPlan {
    /// The execution context that carries this plan into a step.
    #[must_use]
    pub fn to_context(&self) -> ExecutionContext {
        let mut context = ExecutionContext::new();
        context.put_string(INPUT_FILE_KEY, self.input.display().to_string());
        context.put_string(ERROR_FILE_KEY, self.error_file.display().to_string());
        context
    }

    /// Rebuilds a plan from a step's context.
    #[must_use]
    pub fn from_context(name: impl Into<String>, context: &ExecutionContext) -> Option<Self> {
        Some(Self {
            name: name.into(),
            input: PathBuf::from(context.get_string(INPUT_FILE_KEY)?),
            error_file: PathBuf::from(context.get_string(ERROR_FILE_KEY)?),
        })
    }
}

/// Expands a directory and pattern into files.
pub trait ResourceResolver: Send + Sync {
    /// Returns the matching files in a stable order.
    fn resolve(&self, dir: &Path, pattern: &str) -> Result<Vec<PathBuf>>;
}

/// Resolves patterns with `glob`, sorted by path.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobResolver;

impl ResourceResolver for GlobResolver {
    fn resolve(&self, dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
        let escaped = glob::Pattern::escape(&dir.display().to_string());
        let full = format!("{escaped}/{pattern}");
        let paths = glob::glob(&full)
            .map_err(|e| BatchError::configuration(format!("invalid pattern '{full}': {e}")))?;
        let mut files = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Unreadable path while expanding input"),
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Turns an [`InputSpec`] into ordered [`PartitionPlan`]s.
#[derive(Clone)]
pub struct Partitioner {
    resolver: Arc<dyn ResourceResolver>,
    error_suffix: String,
}

impl std::fmt::Debug for Partitioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partitioner")
            .field("error_suffix", &self.error_suffix)
            .finish_non_exhaustive()
    }
}

impl Default for Partitioner {
    fn default() -> Self {
        Self::new(Arc::new(GlobResolver), "-errors.csv")
    }
}

impl Partitioner {
    /// Creates a partitioner.
    #[must_use]
    pub fn new(resolver: Arc<dyn ResourceResolver>, error_suffix: impl Into<String>) -> Self {
        Self {
            resolver,
            error_suffix: error_suffix.into(),
        }
    }

    /// The error file path for `input`: same folder, `<stem><suffix>`.
    #[must_use]
    pub fn error_file_for(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = format!("{stem}{}", self.error_suffix);
        input
            .parent()
            .map_or_else(|| PathBuf::from(&name), |dir| dir.join(&name))
    }

    /// Computes the partition plans for `spec`.
    ///
    /// A directory takes precedence over a single file. Files that are
    /// themselves error files are left out.
    pub fn partition(&self, spec: &InputSpec) -> Result<Vec<PartitionPlan>> {
        let inputs = match (&spec.input_dir, &spec.input_file) {
            (Some(dir), _) => {
                if !dir.is_dir() {
                    return Err(BatchError::resource(
                        dir.display().to_string(),
                        format!("Input directory does not exist: {}", dir.display()),
                    ));
                }
                self.resolver
                    .resolve(dir, &spec.pattern)?
                    .into_iter()
                    .filter(|p| !self.is_error_file(p))
                    .collect()
            }
            (None, Some(file)) => vec![file.clone()],
            (None, None) => {
                return Err(BatchError::configuration(format!(
                    "Either '{INPUT_DIR_PARAM}' or '{INPUT_FILE_PARAM}' is mandatory"
                )))
            }
        };
        if inputs.is_empty() {
            warn!(?spec, "No input resources matched");
        }

        inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| -> Result<PartitionPlan> {
                let input = std::fs::canonicalize(&input).map_err(|e| {
                    BatchError::resource(
                        input.display().to_string(),
                        format!("Resource does not exist: {} ({e})", input.display()),
                    )
                })?;
                let plan = PartitionPlan {
                    name: format!("partition{i}"),
                    error_file: self.error_file_for(&input),
                    input,
                };
                debug!(partition = %plan.name, input = %plan.input.display(), "Planned partition");
                Ok(plan)
            })
            .collect()
    }

    fn is_error_file(&self, path: &Path) -> bool {
        !self.error_suffix.is_empty()
            && path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with(&self.error_suffix))
    }
}
