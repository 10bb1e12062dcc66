use async_trait::async_trait;
use mongodb::bson::{self, Bson, Document};
use std::cmp::Ordering;

use super::{RecordStore, StoreError};
use crate::pipeline::{
    Accumulator, Boundaries, Expr, Filter, GroupKey, Outputs, Pipeline, SortOrder, SortSpec, Stage,
};
use crate::record::PatientVisitRecord;

/// Evaluates pipelines over documents held in memory.
///
/// Follows the document store's semantics where the queries depend on them:
/// groups come out in first-seen order, `$avg` over no numeric values is null,
/// only non-empty buckets are emitted, and numbers sort before strings.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    docs: Vec<Document>,
}

impl MemoryStore {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs }
    }

    pub fn from_records(records: &[PatientVisitRecord]) -> Result<Self, StoreError> {
        let docs = records
            .iter()
            .map(|r| bson::to_document(r).map_err(|e| StoreError::Decode(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { docs })
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Resolves a dotted path such as `"_id.age"`.
fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn string_in(doc: &Document, field: &str, values: &[&str]) -> bool {
    matches!(lookup(doc, field), Some(Bson::String(s)) if values.contains(&s.as_str()))
}

fn matches(filter: &Filter, doc: &Document) -> bool {
    match filter {
        Filter::All => true,
        Filter::FieldIn { field, values } => string_in(doc, field, values),
    }
}

fn eval(expr: &Expr, doc: &Document) -> Bson {
    match expr {
        Expr::Field(field) => lookup(doc, field).cloned().unwrap_or(Bson::Null),
        Expr::Indicator { field, values } => Bson::Int32(string_in(doc, field, values) as i32),
    }
}

fn group_key(key: &GroupKey, doc: &Document) -> Bson {
    match key {
        GroupKey::Null => Bson::Null,
        GroupKey::Field(field) => lookup(doc, field).cloned().unwrap_or(Bson::Null),
        GroupKey::Composite(parts) => {
            // Missing fields are left out of the composite key.
            let mut out = Document::new();
            for (name, field) in parts.iter() {
                if let Some(value) = lookup(doc, field) {
                    out.insert(*name, value.clone());
                }
            }
            Bson::Document(out)
        }
    }
}

#[derive(Debug, Clone)]
enum AccState {
    Count(i64),
    Sum { int: i64, float: f64, is_float: bool },
    Avg { total: f64, n: u64 },
}

impl AccState {
    fn new(acc: &Accumulator) -> Self {
        match acc {
            Accumulator::Count => AccState::Count(0),
            Accumulator::Sum(_) => AccState::Sum {
                int: 0,
                float: 0.0,
                is_float: false,
            },
            Accumulator::Avg(_) => AccState::Avg { total: 0.0, n: 0 },
        }
    }

    fn add(&mut self, acc: &Accumulator, doc: &Document) {
        match (self, acc) {
            (AccState::Count(n), _) => *n += 1,
            (AccState::Sum { int, float, is_float }, Accumulator::Sum(expr)) => {
                match eval(expr, doc) {
                    Bson::Int32(v) => *int += v as i64,
                    Bson::Int64(v) => *int += v,
                    Bson::Double(v) => {
                        *float += v;
                        *is_float = true;
                    }
                    _ => {}
                }
            }
            (AccState::Avg { total, n }, Accumulator::Avg(expr)) => {
                if let Some(v) = as_f64(&eval(expr, doc)) {
                    *total += v;
                    *n += 1;
                }
            }
            _ => {}
        }
    }

    fn finish(&self) -> Bson {
        match *self {
            AccState::Count(n) => Bson::Int64(n),
            AccState::Sum {
                int,
                float,
                is_float,
            } => {
                if is_float {
                    Bson::Double(int as f64 + float)
                } else {
                    Bson::Int64(int)
                }
            }
            AccState::Avg { n: 0, .. } => Bson::Null,
            AccState::Avg { total, n } => Bson::Double(total / n as f64),
        }
    }
}

struct Accumulators<'a> {
    outputs: &'a Outputs,
    states: Vec<AccState>,
}

impl<'a> Accumulators<'a> {
    fn new(outputs: &'a Outputs) -> Self {
        let states = outputs.iter().map(|(_, acc)| AccState::new(acc)).collect();
        Self { outputs, states }
    }

    fn add(&mut self, doc: &Document) {
        for (state, (_, acc)) in self.states.iter_mut().zip(self.outputs) {
            state.add(acc, doc);
        }
    }

    fn into_document(self, id: Bson) -> Document {
        let mut out = Document::new();
        out.insert("_id", id);
        for (state, (name, _)) in self.states.iter().zip(self.outputs) {
            out.insert(*name, state.finish());
        }
        out
    }
}

fn run_group(docs: Vec<Document>, key: &GroupKey, outputs: &Outputs) -> Vec<Document> {
    let mut groups: Vec<(Bson, Accumulators)> = Vec::new();
    for doc in &docs {
        let id = group_key(key, doc);
        let slot = match groups.iter().position(|(k, _)| *k == id) {
            Some(i) => i,
            None => {
                groups.push((id, Accumulators::new(outputs)));
                groups.len() - 1
            }
        };
        groups[slot].1.add(doc);
    }
    groups
        .into_iter()
        .map(|(id, accs)| accs.into_document(id))
        .collect()
}

fn run_bucket(
    docs: Vec<Document>,
    group_by: &str,
    boundaries: &Boundaries,
    default: &str,
    outputs: &Outputs,
) -> Vec<Document> {
    let bounds = boundaries.as_slice();
    // One slot per explicit range, plus the default bucket last.
    let mut slots: Vec<Option<Accumulators>> = (0..bounds.len()).map(|_| None).collect();

    for doc in &docs {
        let index = lookup(doc, group_by)
            .and_then(as_f64)
            .and_then(|v| boundaries.index_of(v))
            .unwrap_or(bounds.len() - 1);
        slots[index]
            .get_or_insert_with(|| Accumulators::new(outputs))
            .add(doc);
    }

    slots
        .into_iter()
        .enumerate()
        .filter_map(|(i, slot)| {
            let id = if i + 1 < bounds.len() {
                Bson::Int64(bounds[i])
            } else {
                Bson::String(default.to_string())
            };
            slot.map(|accs| accs.into_document(id))
        })
        .collect()
}

/// Cross-type ordering: null, then numbers, then strings, then documents.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::Null | Bson::Undefined => 0,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 1,
        Bson::String(_) => 2,
        Bson::Document(_) => 3,
        _ => 4,
    }
}

fn compare(a: &Bson, b: &Bson) -> Ordering {
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => type_rank(a).cmp(&type_rank(b)),
        },
    }
}

fn sort_docs(docs: &mut [Document], spec: &SortSpec) {
    docs.sort_by(|a, b| {
        for (path, order) in &spec.0 {
            let ord = compare(
                lookup(a, path).unwrap_or(&Bson::Null),
                lookup(b, path).unwrap_or(&Bson::Null),
            );
            let ord = match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.docs.iter().filter(|d| matches(filter, d)).count() as u64)
    }

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>, StoreError> {
        let mut docs = self.docs.clone();
        for stage in pipeline.stages() {
            docs = match stage {
                Stage::Match(filter) => docs.into_iter().filter(|d| matches(filter, d)).collect(),
                Stage::Group { key, outputs } => run_group(docs, key, outputs),
                Stage::Bucket {
                    group_by,
                    boundaries,
                    default,
                    outputs,
                } => run_bucket(docs, group_by, boundaries, default, outputs),
                Stage::Sort(spec) => {
                    sort_docs(&mut docs, spec);
                    docs
                }
            };
        }
        Ok(docs)
    }

    async fn find_sorted(
        &self,
        sort: &SortSpec,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let mut docs = self.docs.clone();
        sort_docs(&mut docs, sort);
        docs.truncate(limit);
        Ok(docs)
    }
}
