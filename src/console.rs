//! Console reports, one per CLI subcommand.
//!
//! Each report runs its queries in sequence and returns the printable text.
//! Query failures are absorbed by [`or_empty`], so a report always completes.

use chrono::{DateTime, Utc};

use crate::queries;
use crate::report::{self, or_empty, thousands};
use crate::store::RecordStore;

const RULE: &str = "============================================================";

/// Record count only.
pub async fn explore(store: &dyn RecordStore) -> String {
    let total = or_empty(queries::total_patients(store).await);
    format!("Connected to record store\nTotal patients: {total}\n")
}

/// Total, readmission status breakdown and average stay.
pub async fn analyze(store: &dyn RecordStore) -> String {
    let total = or_empty(queries::total_patients(store).await);
    let readmission = or_empty(queries::readmission_counts(store).await);
    let averages = or_empty(queries::overall_averages(store).await);

    let mut out = String::from("=== DIABETES DATA ANALYSIS ===\n");
    out.push_str(&report::format_total(total));
    out.push_str(&report::format_readmission_rates(&readmission, total));
    out.push_str(&report::format_average_stay(averages.as_ref()));
    out
}

/// The five specific questions: long stays, age, medications, insulin, race.
pub async fn questions(store: &dyn RecordStore) -> String {
    let mut out = String::from("=== SPECIFIC DIABETES DATA QUERIES ===\n");

    let long_stays = or_empty(queries::longest_stays(store).await);
    out.push_str(&report::format_long_stays(&long_stays));

    let ages = or_empty(queries::age_readmission_breakdown(store).await);
    out.push_str(&report::format_age_breakdown(&ages));

    let averages = or_empty(queries::overall_averages(store).await);
    let distribution = or_empty(queries::medication_distribution(store).await);
    out.push_str(&report::format_medication_distribution(
        averages.and_then(|a| a.avg_meds),
        &distribution,
    ));

    let insulin = or_empty(queries::insulin_impact(store).await);
    out.push_str(&report::format_insulin_impact(&insulin));

    let races = or_empty(queries::race_breakdown(store).await);
    out.push_str(&report::format_race_breakdown(&races));
    out
}

/// Advanced summary: risk cohort, medication impact and age groups.
pub async fn summary(store: &dyn RecordStore, generated_at: DateTime<Utc>) -> String {
    let mut out = format!("{RULE}\nDIABETES DATA ANALYSIS SUMMARY REPORT\n{RULE}\n");
    let total = or_empty(queries::total_patients(store).await);
    out.push_str(&format!("Total patients analyzed: {}\n", thousands(total)));
    out.push_str(&format!(
        "Generated at: {}\n",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    out.push_str("\nAnalyzing readmission risk factors...\n");
    let risk = or_empty(queries::readmission_risk(store).await);
    out.push_str(&report::format_risk_summary(&risk));

    out.push_str("\nAnalyzing medication impact on readmission...\n");
    let impact = or_empty(queries::medication_impact(store).await);
    out.push_str(&report::format_medication_impact(&impact));

    out.push_str("\nAnalyzing age group patterns...\n");
    let ages = or_empty(queries::age_groups(store).await);
    out.push_str(&report::format_age_groups(&ages));

    out.push_str(&format!("{RULE}\nAnalysis complete!\n"));
    out
}
