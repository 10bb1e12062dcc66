//! Patient-visit records and readmission classification.
//!
//! Records are owned by the external store and never written back. The
//! readmission status is kept as the raw categorical code; [`ReadmissionStatus`]
//! classifies it without rejecting codes outside the known set.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Status codes counted as a readmission by every rate in the catalog.
pub const READMITTED_CODES: &[&str] = &["YES", ">30"];

/// Status codes kept by the readmission-risk summary. Distinct from
/// [`READMITTED_CODES`]: `">30"` and `"<30"` are excluded here.
pub const RISK_COHORT_CODES: &[&str] = &["YES", "NO"];

/// One hospital encounter as stored in the `patient_data` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientVisitRecord {
    #[serde(rename = "patient_nbr")]
    pub patient_id: i64,
    /// Bucketed age label, e.g. `"[70-80)"`.
    pub age: Option<String>,
    pub race: Option<String>,
    pub time_in_hospital: i32,
    pub num_medications: i32,
    pub num_lab_procedures: i32,
    pub insulin: Option<String>,
    pub readmitted: Option<String>,
}

/// Categorical outcome of a visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadmissionStatus {
    No,
    Within30Days,
    After30Days,
    /// Legacy undifferentiated "readmitted".
    Yes,
    /// Any code outside the known set, passed through untouched.
    Other(String),
}

impl ReadmissionStatus {
    pub fn parse(code: &str) -> Self {
        match code {
            "NO" => Self::No,
            "<30" => Self::Within30Days,
            ">30" => Self::After30Days,
            "YES" => Self::Yes,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::No => "NO",
            Self::Within30Days => "<30",
            Self::After30Days => ">30",
            Self::Yes => "YES",
            Self::Other(code) => code,
        }
    }

    pub fn is_readmitted(&self) -> bool {
        READMITTED_CODES.contains(&self.code())
    }

    pub fn in_risk_cohort(&self) -> bool {
        RISK_COHORT_CODES.contains(&self.code())
    }
}

/// Shared "was this visit followed by a readmission" predicate.
pub fn is_readmitted(code: &str) -> bool {
    ReadmissionStatus::parse(code).is_readmitted()
}

/// Predicate for the risk-summary cohort (`YES`/`NO` only).
pub fn in_risk_cohort(code: &str) -> bool {
    ReadmissionStatus::parse(code).in_risk_cohort()
}

/// Raw row of the diabetes dataset export. Unused columns are ignored.
#[derive(Debug, Deserialize)]
struct CsvRow {
    patient_nbr: i64,
    race: Option<String>,
    age: Option<String>,
    time_in_hospital: i32,
    num_lab_procedures: i32,
    num_medications: i32,
    insulin: Option<String>,
    readmitted: Option<String>,
}

/// The export marks missing categorical values with `?`.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty() && v != "?")
}

impl From<CsvRow> for PatientVisitRecord {
    fn from(row: CsvRow) -> Self {
        Self {
            patient_id: row.patient_nbr,
            age: present(row.age),
            race: present(row.race),
            time_in_hospital: row.time_in_hospital,
            num_medications: row.num_medications,
            num_lab_procedures: row.num_lab_procedures,
            insulin: present(row.insulin),
            readmitted: present(row.readmitted),
        }
    }
}

/// Loads patient-visit records from a dataset CSV with a header row.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<PatientVisitRecord>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);

    let mut records = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        let row: CsvRow =
            result.with_context(|| format!("{}: bad record {}", path.display(), line + 1))?;
        records.push(row.into());
    }

    debug!(path = %path.display(), records = records.len(), "Loaded CSV records");
    Ok(records)
}
