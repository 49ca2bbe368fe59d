//! Case identification shared by the pipeline and the analysis subsystem.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Operator-supplied inputs of one investigation.
///
/// Fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseInputs {
    /// Stable identifier for the case; used in persisted manifests
    pub case_id: String,
    /// Path to the memory dump under investigation
    pub dump_path: PathBuf,
    /// Operating system hint (e.g. "windows", "linux")
    #[serde(default)]
    pub os_hint: String,
    /// What the operator asked to find out
    #[serde(default)]
    pub operator_prompt: String,
}

impl CaseInputs {
    pub fn new(
        case_id: impl Into<String>,
        dump_path: impl Into<PathBuf>,
        os_hint: impl Into<String>,
        operator_prompt: impl Into<String>,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            dump_path: dump_path.into(),
            os_hint: os_hint.into(),
            operator_prompt: operator_prompt.into(),
        }
    }
}
