//! Report formatting.
//!
//! Turns query rows into console text sections or the dashboard's JSON shape.
//! Displayed floats are rounded to one decimal; missing aggregates count as 0.

use serde::{Serialize, Serializer};
use tracing::error;

use crate::queries::{
    AgeGroupRow, AgeReadmission, BasicStats, BucketCount, InsulinImpact, LongStayRow,
    MedicationImpactRow, OverallAverages, QueryError, RaceRow, ReadmissionCount, RiskSummaryRow,
};

/// Console reporting policy: a failed query is logged and reported as no data.
///
/// After this point a store outage and an empty store look the same; callers
/// that need the difference should match on the `Result` instead.
pub fn or_empty<T: Default>(result: Result<T, QueryError>) -> T {
    result.unwrap_or_else(|e| {
        error!(query = e.query, error = %e, "Query failed, reporting no data");
        T::default()
    })
}

/// Rounds to one decimal place.
pub fn round1(value: f64) -> f64 {
    format!("{value:.1}").parse().unwrap_or(value)
}

/// `part / total * 100`, or 0 when `total` is 0.
pub fn pct(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

/// Formats an integer with `,` thousands separators.
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn one_decimal(value: Option<f64>) -> String {
    format!("{:.1}", value.unwrap_or(0.0))
}

fn or_na(value: Option<&str>) -> &str {
    value.unwrap_or("N/A")
}

/// One dashboard average. Present values serialize rounded to one decimal;
/// a missing value serializes as integer `0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Average(pub Option<f64>);

impl Serialize for Average {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(v) => serializer.serialize_f64(round1(v)),
            None => serializer.serialize_u8(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Averages {
    pub avg_stay: Average,
    pub avg_meds: Average,
    pub avg_labs: Average,
}

impl From<Option<&OverallAverages>> for Averages {
    fn from(avg: Option<&OverallAverages>) -> Self {
        Averages {
            avg_stay: Average(avg.and_then(|a| a.avg_stay)),
            avg_meds: Average(avg.and_then(|a| a.avg_meds)),
            avg_labs: Average(avg.and_then(|a| a.avg_labs)),
        }
    }
}

/// Body of `GET /api/stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_patients: u64,
    pub readmission_stats: Vec<ReadmissionCount>,
    pub averages: Averages,
}

impl DashboardStats {
    pub fn new(
        total_patients: u64,
        readmission_stats: Vec<ReadmissionCount>,
        averages: Option<&OverallAverages>,
    ) -> Self {
        Self {
            total_patients,
            readmission_stats,
            averages: averages.into(),
        }
    }
}

impl From<BasicStats> for DashboardStats {
    fn from(stats: BasicStats) -> Self {
        DashboardStats::new(
            stats.total_patients,
            stats.readmission,
            stats.averages.as_ref(),
        )
    }
}

// Console sections. Each returns the full text, one line per `\n`.

pub fn format_total(total: u64) -> String {
    format!("Total Patients: {total}\n")
}

pub fn format_readmission_rates(rows: &[ReadmissionCount], total: u64) -> String {
    let mut out = String::from("\nReadmission rates:\n");
    for row in rows {
        out.push_str(&format!(
            "   {}: {} patients ({:.1}%)\n",
            or_na(row.status.as_deref()),
            row.count,
            pct(row.count, total)
        ));
    }
    out
}

pub fn format_average_stay(avg: Option<&OverallAverages>) -> String {
    format!(
        "Average hospital stay: {} days\n",
        one_decimal(avg.and_then(|a| a.avg_stay))
    )
}

pub fn format_risk_summary(rows: &[RiskSummaryRow]) -> String {
    let mut out = String::from("Readmission Risk Analysis Results:\n");
    for row in rows {
        out.push_str(&format!("   {} patients:\n", or_na(row.status.as_deref())));
        out.push_str(&format!("     Count: {}\n", thousands(row.patient_count)));
        out.push_str(&format!("     Avg Medications: {}\n", one_decimal(row.avg_medications)));
        out.push_str(&format!("     Avg Hospital Stay: {} days\n", one_decimal(row.avg_stay)));
        out.push_str(&format!(
            "     Avg Lab Procedures: {}\n",
            one_decimal(row.avg_lab_procedures)
        ));
        out.push('\n');
    }
    out
}

pub fn format_medication_impact(rows: &[MedicationImpactRow]) -> String {
    let mut out = String::from("Medication Impact Analysis:\n");
    for row in rows {
        out.push_str(&format!("   {} medications:\n", row.bucket));
        out.push_str(&format!("     Patients: {}\n", thousands(row.total_patients)));
        out.push_str(&format!("     Readmission rate: {:.1}%\n", row.readmission_rate()));
        out.push_str(&format!("     Avg stay: {} days\n", one_decimal(row.avg_stay)));
        out.push('\n');
    }
    out
}

pub fn format_age_groups(rows: &[AgeGroupRow]) -> String {
    let mut out = String::from("Age Group Analysis:\n");
    for row in rows {
        let rate = row.readmission_rate.unwrap_or(0.0) * 100.0;
        out.push_str(&format!("   {}:\n", or_na(row.age.as_deref())));
        out.push_str(&format!("     Patients: {}\n", thousands(row.total_patients)));
        out.push_str(&format!("     Readmission rate: {rate:.1}%\n"));
        out.push_str(&format!("     Avg medications: {}\n", one_decimal(row.avg_medications)));
        out.push_str(&format!("     Avg stay: {} days\n", one_decimal(row.avg_stay)));
        out.push('\n');
    }
    out
}

pub fn format_long_stays(rows: &[LongStayRow]) -> String {
    let mut out = String::from("\n1. PATIENTS WITH LONGEST HOSPITAL STAYS:\n");
    for row in rows {
        out.push_str(&format!(
            "   Patient {}: {} days, Age: {}, Readmitted: {}\n",
            row.patient_id,
            row.time_in_hospital,
            or_na(row.age.as_deref()),
            or_na(row.readmitted.as_deref())
        ));
    }
    out
}

pub fn format_age_breakdown(ages: &[AgeReadmission]) -> String {
    let mut out = String::from("\n2. READMISSION RATES BY AGE GROUP:\n");
    for age in ages {
        out.push_str(&format!(
            "   {}: {:.1}% readmission rate ({} patients)\n",
            or_na(age.age.as_deref()),
            age.readmission_rate(),
            age.total()
        ));
    }
    out
}

pub fn format_medication_distribution(
    avg_medications: Option<f64>,
    rows: &[BucketCount],
) -> String {
    let mut out = String::from("\n3. MEDICATION ANALYSIS:\n");
    out.push_str(&format!(
        "   Average medications per patient: {}\n",
        one_decimal(avg_medications)
    ));
    out.push_str("   Medication distribution:\n");
    for row in rows {
        out.push_str(&format!("     {} meds: {} patients\n", row.bucket, row.count));
    }
    out
}

pub fn format_insulin_impact(rows: &[InsulinImpact]) -> String {
    let mut out = String::from("\n4. INSULIN IMPACT ON READMISSION:\n");
    for row in rows {
        if let Some(rate) = row.readmission_rate() {
            out.push_str(&format!(
                "   {}: {rate:.1}% readmission rate\n",
                or_na(row.insulin.as_deref())
            ));
        }
    }
    out
}

pub fn format_race_breakdown(rows: &[RaceRow]) -> String {
    let mut out = String::from("\n5. RACE ANALYSIS:\n");
    for row in rows {
        let Some(race) = row.race.as_deref().filter(|r| !r.is_empty()) else {
            continue;
        };
        out.push_str(&format!("   {race}:\n"));
        out.push_str(&format!("     Patients: {}\n", row.count));
        out.push_str(&format!("     Avg stay: {} days\n", one_decimal(row.avg_stay)));
        out.push_str(&format!("     Avg meds: {}\n", one_decimal(row.avg_meds)));
        out.push_str(&format!("     Avg labs: {}\n", one_decimal(row.avg_labs)));
    }
    out
}
