//! The metric query catalog.
//!
//! Every query is a fixed pipeline run against a [`RecordStore`] and decoded
//! into its own row type. Failures come back as a [`QueryError`]; deciding
//! whether that means "show nothing" or "fail the request" is left to the
//! caller.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pipeline::{
    Accumulator, Boundaries, BucketId, Expr, Filter, GroupKey, Pipeline, SortOrder, SortSpec,
};
use crate::record::{READMITTED_CODES, RISK_COHORT_CODES, is_readmitted};
use crate::report::pct;
use crate::store::{RecordStore, StoreError, decode_rows};

/// Boundaries for the medication-impact buckets; anything from 100 up is `"20+"`.
pub const IMPACT_BOUNDARIES: [i64; 6] = [0, 5, 10, 15, 20, 100];
pub const IMPACT_DEFAULT: &str = "20+";

pub const DISTRIBUTION_BOUNDARIES: [i64; 6] = [0, 10, 20, 30, 40, 50];
pub const DISTRIBUTION_DEFAULT: &str = "50+";

pub const LONG_STAY_LIMIT: usize = 10;

#[derive(Debug, thiserror::Error)]
#[error("{query} query failed: {source}")]
pub struct QueryError {
    pub query: &'static str,
    #[source]
    pub source: StoreError,
}

impl QueryError {
    fn wrap(query: &'static str) -> impl FnOnce(StoreError) -> QueryError {
        move |source| QueryError { query, source }
    }
}

fn boundaries(values: &[i64], query: &'static str) -> Result<Boundaries, QueryError> {
    Boundaries::new(values.to_vec()).map_err(|e| QueryError {
        query,
        source: StoreError::Query(e.to_string()),
    })
}

fn readmitted_indicator() -> Expr {
    Expr::Indicator {
        field: "readmitted",
        values: READMITTED_CODES,
    }
}

async fn run<T: serde::de::DeserializeOwned>(
    store: &dyn RecordStore,
    query: &'static str,
    pipeline: Pipeline,
) -> Result<Vec<T>, QueryError> {
    let docs = store
        .aggregate(&pipeline)
        .await
        .map_err(QueryError::wrap(query))?;
    debug!(query, backend = store.backend(), rows = docs.len(), "Query finished");
    decode_rows(docs).map_err(QueryError::wrap(query))
}

// ---- totals and dashboard composite ----

pub async fn total_patients(store: &dyn RecordStore) -> Result<u64, QueryError> {
    store
        .count(&Filter::All)
        .await
        .map_err(QueryError::wrap("total_patients"))
}

/// Visit count per raw readmission status, in store order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadmissionCount {
    #[serde(rename = "_id")]
    pub status: Option<String>,
    pub count: u64,
}

pub async fn readmission_counts(
    store: &dyn RecordStore,
) -> Result<Vec<ReadmissionCount>, QueryError> {
    let pipeline = Pipeline::new().group(
        GroupKey::Field("readmitted"),
        vec![("count", Accumulator::Count)],
    );
    run(store, "readmission_counts", pipeline).await
}

/// Collection-wide averages; each is `None` when no record has the field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverallAverages {
    pub avg_stay: Option<f64>,
    pub avg_meds: Option<f64>,
    pub avg_labs: Option<f64>,
}

/// `None` when the collection is empty.
pub async fn overall_averages(
    store: &dyn RecordStore,
) -> Result<Option<OverallAverages>, QueryError> {
    let pipeline = Pipeline::new().group(
        GroupKey::Null,
        vec![
            ("avg_stay", Accumulator::Avg(Expr::Field("time_in_hospital"))),
            ("avg_meds", Accumulator::Avg(Expr::Field("num_medications"))),
            ("avg_labs", Accumulator::Avg(Expr::Field("num_lab_procedures"))),
        ],
    );
    let rows: Vec<OverallAverages> = run(store, "overall_averages", pipeline).await?;
    Ok(rows.into_iter().next())
}

/// Inputs of the dashboard's `/api/stats` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicStats {
    pub total_patients: u64,
    pub readmission: Vec<ReadmissionCount>,
    pub averages: Option<OverallAverages>,
}

pub async fn basic_stats(store: &dyn RecordStore) -> Result<BasicStats, QueryError> {
    Ok(BasicStats {
        total_patients: total_patients(store).await?,
        readmission: readmission_counts(store).await?,
        averages: overall_averages(store).await?,
    })
}

// ---- 1. readmission risk summary ----

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RiskSummaryRow {
    #[serde(rename = "_id")]
    pub status: Option<String>,
    pub patient_count: u64,
    pub avg_medications: Option<f64>,
    pub avg_stay: Option<f64>,
    pub avg_lab_procedures: Option<f64>,
}

impl From<&RiskSummaryRow> for ReadmissionCount {
    fn from(row: &RiskSummaryRow) -> Self {
        ReadmissionCount {
            status: row.status.clone(),
            count: row.patient_count,
        }
    }
}

/// Per-status profile of the `YES`/`NO` cohort, largest group first.
pub async fn readmission_risk(store: &dyn RecordStore) -> Result<Vec<RiskSummaryRow>, QueryError> {
    let pipeline = Pipeline::new()
        .matching(Filter::FieldIn {
            field: "readmitted",
            values: RISK_COHORT_CODES,
        })
        .group(
            GroupKey::Field("readmitted"),
            vec![
                ("avg_medications", Accumulator::Avg(Expr::Field("num_medications"))),
                ("avg_stay", Accumulator::Avg(Expr::Field("time_in_hospital"))),
                ("avg_lab_procedures", Accumulator::Avg(Expr::Field("num_lab_procedures"))),
                ("patient_count", Accumulator::Count),
            ],
        )
        .sort(SortSpec::by("patient_count", SortOrder::Descending));
    run(store, "readmission_risk", pipeline).await
}

// ---- 2. medication-bucketed impact ----

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MedicationImpactRow {
    #[serde(rename = "_id")]
    pub bucket: BucketId,
    pub total_patients: u64,
    pub readmitted_count: u64,
    pub avg_stay: Option<f64>,
}

impl MedicationImpactRow {
    pub fn readmission_rate(&self) -> f64 {
        pct(self.readmitted_count, self.total_patients)
    }
}

pub async fn medication_impact(
    store: &dyn RecordStore,
) -> Result<Vec<MedicationImpactRow>, QueryError> {
    let boundaries = boundaries(&IMPACT_BOUNDARIES, "medication_impact")?;
    let pipeline = Pipeline::new()
        .bucket(
            "num_medications",
            boundaries,
            IMPACT_DEFAULT,
            vec![
                ("total_patients", Accumulator::Count),
                ("readmitted_count", Accumulator::Sum(readmitted_indicator())),
                ("avg_stay", Accumulator::Avg(Expr::Field("time_in_hospital"))),
            ],
        )
        .sort(SortSpec::by("_id", SortOrder::Ascending));
    run(store, "medication_impact", pipeline).await
}

// ---- 3. age-group summary ----

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgeGroupRow {
    #[serde(rename = "_id")]
    pub age: Option<String>,
    pub total_patients: u64,
    /// Fraction in `[0, 1]`.
    pub readmission_rate: Option<f64>,
    pub avg_medications: Option<f64>,
    pub avg_stay: Option<f64>,
}

pub async fn age_groups(store: &dyn RecordStore) -> Result<Vec<AgeGroupRow>, QueryError> {
    let pipeline = Pipeline::new()
        .group(
            GroupKey::Field("age"),
            vec![
                ("total_patients", Accumulator::Count),
                ("readmission_rate", Accumulator::Avg(readmitted_indicator())),
                ("avg_medications", Accumulator::Avg(Expr::Field("num_medications"))),
                ("avg_stay", Accumulator::Avg(Expr::Field("time_in_hospital"))),
            ],
        )
        .sort(SortSpec::by("_id", SortOrder::Ascending));
    run(store, "age_groups", pipeline).await
}

// ---- 4. long-stay ranking ----

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LongStayRow {
    #[serde(rename = "patient_nbr")]
    pub patient_id: i64,
    pub time_in_hospital: i64,
    pub age: Option<String>,
    pub readmitted: Option<String>,
}

pub async fn longest_stays(store: &dyn RecordStore) -> Result<Vec<LongStayRow>, QueryError> {
    let sort = SortSpec::by("time_in_hospital", SortOrder::Descending);
    let docs = store
        .find_sorted(&sort, LONG_STAY_LIMIT)
        .await
        .map_err(QueryError::wrap("longest_stays"))?;
    decode_rows(docs).map_err(QueryError::wrap("longest_stays"))
}

// ---- 5. age x readmission breakdown ----

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgeStatusKey {
    pub age: Option<String>,
    pub readmitted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgeStatusCount {
    #[serde(rename = "_id")]
    pub key: AgeStatusKey,
    pub count: u64,
}

pub async fn age_status_counts(
    store: &dyn RecordStore,
) -> Result<Vec<AgeStatusCount>, QueryError> {
    let pipeline = Pipeline::new()
        .group(
            GroupKey::Composite(&[("age", "age"), ("readmitted", "readmitted")]),
            vec![("count", Accumulator::Count)],
        )
        .sort(SortSpec::by("_id.age", SortOrder::Ascending));
    run(store, "age_status_counts", pipeline).await
}

/// Status counts for one age group.
#[derive(Debug, Clone, PartialEq)]
pub struct AgeReadmission {
    pub age: Option<String>,
    /// `(status, count)` in the order the statuses were first seen.
    pub by_status: Vec<(Option<String>, u64)>,
}

impl AgeReadmission {
    pub fn total(&self) -> u64 {
        self.by_status.iter().map(|(_, n)| n).sum()
    }

    /// Percentage of visits in this age group classified as readmitted.
    pub fn readmission_rate(&self) -> f64 {
        let readmitted = self
            .by_status
            .iter()
            .filter(|(status, _)| status.as_deref().is_some_and(is_readmitted))
            .map(|(_, n)| n)
            .sum();
        pct(readmitted, self.total())
    }
}

/// Folds `(age, status) -> count` rows into one entry per age, keeping row order.
pub fn assemble_age_breakdown(rows: Vec<AgeStatusCount>) -> Vec<AgeReadmission> {
    let mut out: Vec<AgeReadmission> = Vec::new();
    for row in rows {
        let AgeStatusKey { age, readmitted } = row.key;
        let i = match out.iter().position(|e| e.age == age) {
            Some(i) => i,
            None => {
                out.push(AgeReadmission {
                    age,
                    by_status: Vec::new(),
                });
                out.len() - 1
            }
        };
        let entry = &mut out[i];
        match entry.by_status.iter_mut().find(|(s, _)| *s == readmitted) {
            Some((_, n)) => *n += row.count,
            None => entry.by_status.push((readmitted, row.count)),
        }
    }
    out
}

pub async fn age_readmission_breakdown(
    store: &dyn RecordStore,
) -> Result<Vec<AgeReadmission>, QueryError> {
    Ok(assemble_age_breakdown(age_status_counts(store).await?))
}

// ---- 6. medication distribution ----

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BucketCount {
    #[serde(rename = "_id")]
    pub bucket: BucketId,
    pub count: u64,
}

pub async fn medication_distribution(
    store: &dyn RecordStore,
) -> Result<Vec<BucketCount>, QueryError> {
    let boundaries = boundaries(&DISTRIBUTION_BOUNDARIES, "medication_distribution")?;
    let pipeline = Pipeline::new().bucket(
        "num_medications",
        boundaries,
        DISTRIBUTION_DEFAULT,
        vec![("count", Accumulator::Count)],
    );
    run(store, "medication_distribution", pipeline).await
}

// ---- 7. insulin impact ----

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InsulinStatusKey {
    pub insulin: Option<String>,
    pub readmitted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InsulinStatusCount {
    #[serde(rename = "_id")]
    pub key: InsulinStatusKey,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsulinImpact {
    pub insulin: Option<String>,
    pub total: u64,
    pub readmitted_count: u64,
}

impl InsulinImpact {
    /// `None` for an empty group, which reports skip.
    pub fn readmission_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| pct(self.readmitted_count, self.total))
    }
}

pub async fn insulin_status_counts(
    store: &dyn RecordStore,
) -> Result<Vec<InsulinStatusCount>, QueryError> {
    let pipeline = Pipeline::new().group(
        GroupKey::Composite(&[("insulin", "insulin"), ("readmitted", "readmitted")]),
        vec![("count", Accumulator::Count)],
    );
    run(store, "insulin_status_counts", pipeline).await
}

/// Folds `(insulin, status) -> count` rows into totals per insulin level.
pub fn assemble_insulin_impact(rows: Vec<InsulinStatusCount>) -> Vec<InsulinImpact> {
    let mut out: Vec<InsulinImpact> = Vec::new();
    for row in rows {
        let InsulinStatusKey {
            insulin,
            readmitted,
        } = row.key;
        let i = match out.iter().position(|e| e.insulin == insulin) {
            Some(i) => i,
            None => {
                out.push(InsulinImpact {
                    insulin,
                    total: 0,
                    readmitted_count: 0,
                });
                out.len() - 1
            }
        };
        out[i].total += row.count;
        if readmitted.as_deref().is_some_and(is_readmitted) {
            out[i].readmitted_count += row.count;
        }
    }
    out
}

pub async fn insulin_impact(store: &dyn RecordStore) -> Result<Vec<InsulinImpact>, QueryError> {
    Ok(assemble_insulin_impact(insulin_status_counts(store).await?))
}

// ---- 8. race breakdown ----

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RaceRow {
    #[serde(rename = "_id")]
    pub race: Option<String>,
    pub avg_stay: Option<f64>,
    pub avg_meds: Option<f64>,
    pub avg_labs: Option<f64>,
    pub count: u64,
}

pub async fn race_breakdown(store: &dyn RecordStore) -> Result<Vec<RaceRow>, QueryError> {
    let pipeline = Pipeline::new()
        .group(
            GroupKey::Field("race"),
            vec![
                ("avg_stay", Accumulator::Avg(Expr::Field("time_in_hospital"))),
                ("avg_meds", Accumulator::Avg(Expr::Field("num_medications"))),
                ("avg_labs", Accumulator::Avg(Expr::Field("num_lab_procedures"))),
                ("count", Accumulator::Count),
            ],
        )
        .sort(SortSpec::by("count", SortOrder::Descending));
    run(store, "race_breakdown", pipeline).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PatientVisitRecord;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use mongodb::bson::Document;

    fn visit(
        id: i64,
        age: &str,
        race: Option<&str>,
        stay: i32,
        meds: i32,
        labs: i32,
        insulin: &str,
        readmitted: &str,
    ) -> PatientVisitRecord {
        PatientVisitRecord {
            patient_id: id,
            age: Some(age.to_string()),
            race: race.map(str::to_string),
            time_in_hospital: stay,
            num_medications: meds,
            num_lab_procedures: labs,
            insulin: Some(insulin.to_string()),
            readmitted: Some(readmitted.to_string()),
        }
    }

    fn sample() -> MemoryStore {
        MemoryStore::from_records(&[
            visit(1, "[70-80)", Some("Caucasian"), 3, 12, 40, "No", "NO"),
            visit(2, "[70-80)", Some("Caucasian"), 8, 22, 50, "Up", ">30"),
            visit(3, "[50-60)", Some("AfricanAmerican"), 1, 4, 30, "No", "<30"),
            visit(4, "[50-60)", None, 14, 150, 70, "Steady", "YES"),
            visit(5, "[60-70)", Some("Caucasian"), 5, 9, 45, "Up", "NO"),
        ])
        .unwrap()
    }

    struct Unreachable;

    #[async_trait]
    impl RecordStore for Unreachable {
        fn backend(&self) -> &'static str {
            "unreachable"
        }
        async fn count(&self, _: &Filter) -> Result<u64, StoreError> {
            Err(StoreError::Connection("timed out".into()))
        }
        async fn aggregate(&self, _: &Pipeline) -> Result<Vec<Document>, StoreError> {
            Err(StoreError::Connection("timed out".into()))
        }
        async fn find_sorted(&self, _: &SortSpec, _: usize) -> Result<Vec<Document>, StoreError> {
            Err(StoreError::Connection("timed out".into()))
        }
    }

    fn age_row(age: &str, status: &str, count: u64) -> AgeStatusCount {
        AgeStatusCount {
            key: AgeStatusKey {
                age: Some(age.into()),
                readmitted: Some(status.into()),
            },
            count,
        }
    }

    fn insulin_row(insulin: &str, status: &str, count: u64) -> InsulinStatusCount {
        InsulinStatusCount {
            key: InsulinStatusKey {
                insulin: Some(insulin.into()),
                readmitted: Some(status.into()),
            },
            count,
        }
    }

    #[tokio::test]
    async fn test_readmission_risk_excludes_other_statuses() {
        let rows = readmission_risk(&sample()).await.unwrap();
        let statuses: Vec<_> = rows.iter().map(|r| r.status.as_deref().unwrap()).collect();
        assert_eq!(statuses, vec!["NO", "YES"]);
        assert_eq!(rows[0].patient_count, 2);
        assert_eq!(rows[0].avg_stay, Some(4.0));
    }

    #[tokio::test]
    async fn test_medication_impact_buckets() {
        let rows = medication_impact(&sample()).await.unwrap();
        let buckets: Vec<_> = rows.iter().map(|r| r.bucket.to_string()).collect();
        assert_eq!(buckets, vec!["0", "5", "10", "20", "20+"]);

        let twenty = &rows[3];
        assert_eq!(twenty.total_patients, 1);
        assert_eq!(twenty.readmitted_count, 1);
        assert_eq!(twenty.readmission_rate(), 100.0);

        let overflow = &rows[4];
        assert_eq!(overflow.bucket, BucketId::Default("20+".into()));
        assert_eq!(overflow.readmitted_count, 1);
    }

    #[tokio::test]
    async fn test_age_groups_sorted_with_indicator_rate() {
        let rows = age_groups(&sample()).await.unwrap();
        let ages: Vec<_> = rows.iter().map(|r| r.age.as_deref().unwrap()).collect();
        assert_eq!(ages, vec!["[50-60)", "[60-70)", "[70-80)"]);
        assert_eq!(rows[0].readmission_rate, Some(0.5));
        assert_eq!(rows[1].readmission_rate, Some(0.0));
        assert_eq!(rows[2].readmission_rate, Some(0.5));
    }

    #[tokio::test]
    async fn test_longest_stays_ranked() {
        let rows = longest_stays(&sample()).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].patient_id, 4);
        assert_eq!(rows[0].time_in_hospital, 14);
        assert_eq!(rows[4].time_in_hospital, 1);
    }

    #[tokio::test]
    async fn test_longest_stays_caps_at_ten() {
        let records: Vec<_> = (0..25)
            .map(|i| visit(i, "[40-50)", None, i as i32, 1, 1, "No", "NO"))
            .collect();
        let store = MemoryStore::from_records(&records).unwrap();
        let rows = longest_stays(&store).await.unwrap();
        assert_eq!(rows.len(), LONG_STAY_LIMIT);
        assert_eq!(rows[0].time_in_hospital, 24);
    }

    #[tokio::test]
    async fn test_age_breakdown_from_store() {
        let ages = age_readmission_breakdown(&sample()).await.unwrap();
        assert_eq!(ages.len(), 3);
        assert_eq!(ages[2].age.as_deref(), Some("[70-80)"));
        assert_eq!(ages[2].total(), 2);
        assert_eq!(ages[2].readmission_rate(), 50.0);
    }

    #[test]
    fn test_assemble_age_breakdown_counts_yes_and_after_30() {
        let ages = assemble_age_breakdown(vec![
            age_row("[60-70)", "NO", 60),
            age_row("[60-70)", "YES", 10),
            age_row("[60-70)", ">30", 20),
            age_row("[60-70)", "<30", 10),
        ]);
        assert_eq!(ages.len(), 1);
        assert_eq!(ages[0].total(), 100);
        assert_eq!(ages[0].readmission_rate(), 30.0);
    }

    #[tokio::test]
    async fn test_medication_distribution() {
        let rows = medication_distribution(&sample()).await.unwrap();
        let pairs: Vec<_> = rows
            .iter()
            .map(|r| (r.bucket.to_string(), r.count))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("0".to_string(), 2),
                ("10".to_string(), 1),
                ("20".to_string(), 1),
                ("50+".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_insulin_rates() {
        let impact = assemble_insulin_impact(vec![
            insulin_row("No", "NO", 50),
            insulin_row("No", "YES", 50),
            insulin_row("Up", "NO", 90),
            insulin_row("Up", ">30", 10),
        ]);
        assert_eq!(impact.len(), 2);
        assert_eq!(impact[0].insulin.as_deref(), Some("No"));
        assert_eq!(impact[0].readmission_rate(), Some(50.0));
        assert_eq!(impact[1].insulin.as_deref(), Some("Up"));
        assert_eq!(impact[1].readmission_rate(), Some(10.0));
    }

    #[test]
    fn test_insulin_empty_group_has_no_rate() {
        let impact = InsulinImpact {
            insulin: Some("Down".into()),
            total: 0,
            readmitted_count: 0,
        };
        assert_eq!(impact.readmission_rate(), None);
    }

    #[tokio::test]
    async fn test_race_breakdown_sorted_by_count() {
        let rows = race_breakdown(&sample()).await.unwrap();
        assert_eq!(rows[0].race.as_deref(), Some("Caucasian"));
        assert_eq!(rows[0].count, 3);
        assert!(rows.iter().any(|r| r.race.is_none()));
    }

    #[tokio::test]
    async fn test_basic_stats_on_empty_store() {
        let stats = basic_stats(&MemoryStore::default()).await.unwrap();
        assert_eq!(stats.total_patients, 0);
        assert!(stats.readmission.is_empty());
        assert_eq!(stats.averages, None);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_a_typed_error() {
        let err = readmission_risk(&Unreachable).await.unwrap_err();
        assert_eq!(err.query, "readmission_risk");
        assert!(matches!(err.source, StoreError::Connection(_)));

        let err = basic_stats(&Unreachable).await.unwrap_err();
        assert_eq!(err.query, "total_patients");
    }
}
