//! Declarative aggregation pipelines.
//!
//! Queries describe what to compute as a list of [`Stage`]s. A pipeline can be
//! rendered into the document store's stage documents, or evaluated directly
//! by [`crate::store::MemoryStore`].

use mongodb::bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record filter used by match stages and counts.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    /// Field value is one of the given strings.
    FieldIn {
        field: &'static str,
        values: &'static [&'static str],
    },
}

impl Filter {
    pub fn to_document(&self) -> Document {
        match self {
            Filter::All => Document::new(),
            Filter::FieldIn { field, values } => {
                let mut filter = Document::new();
                filter.insert(*field, doc! { "$in": values.to_vec() });
                filter
            }
        }
    }
}

/// Per-record value fed into an accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(&'static str),
    /// 1 when the string field is one of `values`, else 0.
    Indicator {
        field: &'static str,
        values: &'static [&'static str],
    },
}

impl Expr {
    pub fn to_bson(&self) -> Bson {
        match self {
            Expr::Field(field) => Bson::String(format!("${field}")),
            Expr::Indicator { field, values } => Bson::Document(doc! {
                "$cond": [
                    { "$in": [format!("${field}"), values.to_vec()] },
                    1,
                    0
                ]
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Count,
    Sum(Expr),
    Avg(Expr),
}

impl Accumulator {
    pub fn to_bson(&self) -> Bson {
        let acc = match self {
            Accumulator::Count => doc! { "$sum": 1 },
            Accumulator::Sum(expr) => doc! { "$sum": expr.to_bson() },
            Accumulator::Avg(expr) => doc! { "$avg": expr.to_bson() },
        };
        Bson::Document(acc)
    }
}

/// Named accumulator outputs of a group or bucket stage.
pub type Outputs = Vec<(&'static str, Accumulator)>;

fn outputs_document(outputs: &Outputs) -> Document {
    let mut out = Document::new();
    for (name, acc) in outputs {
        out.insert(*name, acc.to_bson());
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// A single group over all records.
    Null,
    Field(&'static str),
    /// Composite key of `(name, field)` pairs.
    Composite(&'static [(&'static str, &'static str)]),
}

impl GroupKey {
    pub fn to_bson(&self) -> Bson {
        match self {
            GroupKey::Null => Bson::Null,
            GroupKey::Field(field) => Bson::String(format!("${field}")),
            GroupKey::Composite(parts) => {
                let mut key = Document::new();
                for (name, field) in parts.iter() {
                    key.insert(*name, format!("${field}"));
                }
                Bson::Document(key)
            }
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BoundaryError {
    #[error("bucket boundaries need at least two values, got {0}")]
    TooFew(usize),
    #[error("bucket boundaries must be strictly ascending (at index {0})")]
    NotAscending(usize),
}

/// Strictly ascending bucket boundaries. Bucket `i` covers `[b(i), b(i+1))`.
#[derive(Debug, Clone, PartialEq)]
pub struct Boundaries(Vec<i64>);

impl Boundaries {
    pub fn new(values: Vec<i64>) -> Result<Self, BoundaryError> {
        if values.len() < 2 {
            return Err(BoundaryError::TooFew(values.len()));
        }
        if let Some(i) = values.windows(2).position(|w| w[0] >= w[1]) {
            return Err(BoundaryError::NotAscending(i + 1));
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    /// Index of the bucket holding `value`, or `None` for the default bucket.
    pub fn index_of(&self, value: f64) -> Option<usize> {
        self.0
            .windows(2)
            .position(|w| w[0] as f64 <= value && value < w[1] as f64)
    }
}

/// Bucket identity: the lower bound of an explicit range, or the overflow label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BucketId {
    Lower(i64),
    Default(String),
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketId::Lower(bound) => write!(f, "{bound}"),
            BucketId::Default(label) => f.write_str(label),
        }
    }
}

/// Assigns `value` to its bucket; anything outside the boundaries goes to `default`.
pub fn bucket_for(boundaries: &Boundaries, value: f64, default: &str) -> BucketId {
    match boundaries.index_of(value) {
        Some(i) => BucketId::Lower(boundaries.as_slice()[i]),
        None => BucketId::Default(default.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn direction(self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// Ordered sort keys; paths may be dotted (`"_id.age"`).
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec(pub Vec<(&'static str, SortOrder)>);

impl SortSpec {
    pub fn by(path: &'static str, order: SortOrder) -> Self {
        Self(vec![(path, order)])
    }

    pub fn to_document(&self) -> Document {
        let mut out = Document::new();
        for (path, order) in &self.0 {
            out.insert(*path, order.direction());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Group {
        key: GroupKey,
        outputs: Outputs,
    },
    Bucket {
        group_by: &'static str,
        boundaries: Boundaries,
        default: &'static str,
        outputs: Outputs,
    },
    Sort(SortSpec),
}

impl Stage {
    pub fn to_document(&self) -> Document {
        match self {
            Stage::Match(filter) => doc! { "$match": filter.to_document() },
            Stage::Group { key, outputs } => {
                let mut group = doc! { "_id": key.to_bson() };
                for (name, value) in outputs_document(outputs) {
                    group.insert(name, value);
                }
                doc! { "$group": group }
            }
            Stage::Bucket {
                group_by,
                boundaries,
                default,
                outputs,
            } => doc! {
                "$bucket": {
                    "groupBy": format!("${group_by}"),
                    "boundaries": boundaries.as_slice().to_vec(),
                    "default": *default,
                    "output": outputs_document(outputs)
                }
            },
            Stage::Sort(spec) => doc! { "$sort": spec.to_document() },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matching(mut self, filter: Filter) -> Self {
        self.stages.push(Stage::Match(filter));
        self
    }

    pub fn group(mut self, key: GroupKey, outputs: Outputs) -> Self {
        self.stages.push(Stage::Group { key, outputs });
        self
    }

    pub fn bucket(
        mut self,
        group_by: &'static str,
        boundaries: Boundaries,
        default: &'static str,
        outputs: Outputs,
    ) -> Self {
        self.stages.push(Stage::Bucket {
            group_by,
            boundaries,
            default,
            outputs,
        });
        self
    }

    pub fn sort(mut self, spec: SortSpec) -> Self {
        self.stages.push(Stage::Sort(spec));
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn to_documents(&self) -> Vec<Document> {
        self.stages.iter().map(Stage::to_document).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(values: &[i64]) -> Boundaries {
        Boundaries::new(values.to_vec()).unwrap()
    }

    #[test]
    fn test_boundaries_reject_unsorted() {
        assert_eq!(
            Boundaries::new(vec![0, 10, 10, 20]),
            Err(BoundaryError::NotAscending(2))
        );
        assert_eq!(Boundaries::new(vec![5]), Err(BoundaryError::TooFew(1)));
    }

    #[test]
    fn test_every_value_lands_in_its_range() {
        let b = bounds(&[0, 10, 20, 30, 40, 50]);
        for v in 0..50 {
            let expected = (v / 10) * 10;
            assert_eq!(bucket_for(&b, v as f64, "50+"), BucketId::Lower(expected));
        }
    }

    #[test]
    fn test_values_outside_fall_to_default() {
        let b = bounds(&[0, 5, 10, 15, 20, 100]);
        let default = BucketId::Default("20+".into());
        assert_eq!(bucket_for(&b, 100.0, "20+"), default);
        assert_eq!(bucket_for(&b, 250.0, "20+"), default);
        assert_eq!(bucket_for(&b, -1.0, "20+"), default);
        assert_eq!(bucket_for(&b, 99.0, "20+"), BucketId::Lower(20));
    }

    #[test]
    fn test_bucket_stage_document() {
        let stage = Stage::Bucket {
            group_by: "num_medications",
            boundaries: bounds(&[0, 10, 20]),
            default: "20+",
            outputs: vec![("count", Accumulator::Count)],
        };
        assert_eq!(
            stage.to_document(),
            doc! {
                "$bucket": {
                    "groupBy": "$num_medications",
                    "boundaries": [0_i64, 10_i64, 20_i64],
                    "default": "20+",
                    "output": { "count": { "$sum": 1 } }
                }
            }
        );
    }

    #[test]
    fn test_indicator_renders_conditional_sum() {
        let acc = Accumulator::Sum(Expr::Indicator {
            field: "readmitted",
            values: &["YES", ">30"],
        });
        assert_eq!(
            acc.to_bson(),
            Bson::Document(doc! {
                "$sum": { "$cond": [ { "$in": ["$readmitted", ["YES", ">30"]] }, 1, 0 ] }
            })
        );
    }

    #[test]
    fn test_group_with_composite_key_and_sort() {
        let pipeline = Pipeline::new()
            .group(
                GroupKey::Composite(&[("age", "age"), ("readmitted", "readmitted")]),
                vec![("count", Accumulator::Count)],
            )
            .sort(SortSpec::by("_id.age", SortOrder::Ascending));

        assert_eq!(
            pipeline.to_documents(),
            vec![
                doc! { "$group": {
                    "_id": { "age": "$age", "readmitted": "$readmitted" },
                    "count": { "$sum": 1 }
                } },
                doc! { "$sort": { "_id.age": 1 } },
            ]
        );
    }

    #[test]
    fn test_match_filter_document() {
        let filter = Filter::FieldIn {
            field: "readmitted",
            values: &["YES", "NO"],
        };
        assert_eq!(
            Stage::Match(filter).to_document(),
            doc! { "$match": { "readmitted": { "$in": ["YES", "NO"] } } }
        );
    }

    #[test]
    fn test_bucket_id_display() {
        assert_eq!(BucketId::Lower(10).to_string(), "10");
        assert_eq!(BucketId::Default("50+".into()).to_string(), "50+");
    }
}
