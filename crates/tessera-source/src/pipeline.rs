use bson::{Bson, Document, doc};

use crate::error::SourceError;
use crate::matcher::{self, eval_expr, lookup_path, sort_cmp};

/// Run an aggregation pipeline over a document set.
///
/// Covers the stage vocabulary the scan layer and its users emit:
/// `$match`, `$sort`, `$skip`, `$limit`, `$count`, `$group`, `$project`.
pub fn run_pipeline(stages: &[Document], docs: Vec<Document>) -> Result<Vec<Document>, SourceError> {
    let mut current = docs;
    for stage in stages {
        let (name, spec) = match stage.iter().next() {
            Some(entry) if stage.len() == 1 => entry,
            _ => {
                return Err(SourceError::Query(
                    "pipeline stage must have exactly one key".into(),
                ));
            }
        };
        current = match name.as_str() {
            "$match" => match_stage(spec, current)?,
            "$sort" => sort_stage(spec, current)?,
            "$skip" => skip_stage(spec, current)?,
            "$limit" => limit_stage(spec, current)?,
            "$count" => count_stage(spec, current)?,
            "$group" => group_stage(spec, current)?,
            "$project" => project_stage(spec, current)?,
            other => {
                return Err(SourceError::Query(format!(
                    "unsupported pipeline stage: {other}"
                )));
            }
        };
    }
    Ok(current)
}

fn match_stage(spec: &Bson, docs: Vec<Document>) -> Result<Vec<Document>, SourceError> {
    let filter = expect_document(spec, "$match")?;
    let mut result = Vec::with_capacity(docs.len());
    for document in docs {
        if matcher::matches(filter, &document)? {
            result.push(document);
        }
    }
    Ok(result)
}

fn sort_stage(spec: &Bson, mut docs: Vec<Document>) -> Result<Vec<Document>, SourceError> {
    let spec = expect_document(spec, "$sort")?;
    let mut keys = Vec::with_capacity(spec.len());
    for (field, direction) in spec.iter() {
        let ascending = match direction {
            Bson::Int32(1) | Bson::Int64(1) => true,
            Bson::Int32(-1) | Bson::Int64(-1) => false,
            _ => {
                return Err(SourceError::Query(
                    "$sort direction must be 1 or -1".into(),
                ));
            }
        };
        keys.push((field.clone(), ascending));
    }
    docs.sort_by(|a, b| {
        for (field, ascending) in &keys {
            let ord = sort_cmp(lookup_path(a, field), lookup_path(b, field));
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(docs)
}

fn stage_count(spec: &Bson, stage: &str) -> Result<usize, SourceError> {
    match spec {
        Bson::Int32(n) if *n >= 0 => Ok(*n as usize),
        Bson::Int64(n) if *n >= 0 => Ok(*n as usize),
        _ => Err(SourceError::Query(format!(
            "{stage} value must be a non-negative integer"
        ))),
    }
}

fn skip_stage(spec: &Bson, docs: Vec<Document>) -> Result<Vec<Document>, SourceError> {
    let n = stage_count(spec, "$skip")?;
    Ok(docs.into_iter().skip(n).collect())
}

fn limit_stage(spec: &Bson, mut docs: Vec<Document>) -> Result<Vec<Document>, SourceError> {
    let n = stage_count(spec, "$limit")?;
    docs.truncate(n);
    Ok(docs)
}

/// `$count` yields no documents at all over an empty input.
fn count_stage(spec: &Bson, docs: Vec<Document>) -> Result<Vec<Document>, SourceError> {
    let name = match spec {
        Bson::String(s) if !s.is_empty() => s,
        _ => {
            return Err(SourceError::Query(
                "$count value must be a non-empty string".into(),
            ));
        }
    };
    if docs.is_empty() {
        return Ok(vec![]);
    }
    Ok(vec![doc! { name.clone(): docs.len() as i64 }])
}

// ── $group ──────────────────────────────────────────────────────

enum Accumulator {
    Sum { total: f64, integral: bool },
    CondCount { count: i64 },
    Min(Option<Bson>),
    Max(Option<Bson>),
    Avg { total: f64, count: i64 },
}

impl Accumulator {
    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum { total, integral } => {
                if integral {
                    Bson::Int64(total as i64)
                } else {
                    Bson::Double(total)
                }
            }
            Accumulator::CondCount { count } => Bson::Int64(count),
            Accumulator::Min(v) | Accumulator::Max(v) => v.unwrap_or(Bson::Null),
            Accumulator::Avg { total, count } => {
                if count == 0 {
                    Bson::Null
                } else {
                    Bson::Double(total / count as f64)
                }
            }
        }
    }
}

fn numeric(value: &Bson) -> Option<(f64, bool)> {
    match value {
        Bson::Int32(v) => Some((*v as f64, true)),
        Bson::Int64(v) => Some((*v as f64, true)),
        Bson::Double(v) => Some((*v, false)),
        Bson::Decimal128(v) => v.to_string().parse::<f64>().ok().map(|f| (f, false)),
        _ => None,
    }
}

fn group_stage(spec: &Bson, docs: Vec<Document>) -> Result<Vec<Document>, SourceError> {
    let spec = expect_document(spec, "$group")?;
    let id_spec = spec
        .get("_id")
        .ok_or_else(|| SourceError::Query("$group requires an _id specification".into()))?;

    // Accumulator specs, in declaration order.
    let mut accumulator_specs = Vec::new();
    for (name, value) in spec.iter() {
        if name == "_id" {
            continue;
        }
        let acc = match value {
            Bson::Document(d) if d.len() == 1 => {
                let (op, operand) = d.iter().next().unwrap();
                (name.clone(), op.clone(), operand.clone())
            }
            _ => {
                return Err(SourceError::Query(format!(
                    "invalid accumulator for field {name}"
                )));
            }
        };
        accumulator_specs.push(acc);
    }

    // Group documents by key, preserving first-seen order.
    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();
    for document in &docs {
        let key = group_key(id_spec, document)?;
        let position = groups.iter().position(|(k, _)| *k == key);
        let index = match position {
            Some(i) => i,
            None => {
                let initial = accumulator_specs
                    .iter()
                    .map(|(_, op, operand)| new_accumulator(op, operand))
                    .collect::<Result<Vec<_>, _>>()?;
                groups.push((key, initial));
                groups.len() - 1
            }
        };
        for (slot, (_, _, operand)) in groups[index].1.iter_mut().zip(&accumulator_specs) {
            accumulate(slot, operand, document)?;
        }
    }

    let mut result = Vec::with_capacity(groups.len());
    for (key, accumulators) in groups {
        let mut out = Document::new();
        out.insert("_id", key);
        for ((name, _, _), acc) in accumulator_specs.iter().zip(accumulators) {
            out.insert(name.clone(), acc.finish());
        }
        result.push(out);
    }
    Ok(result)
}

fn group_key(id_spec: &Bson, document: &Document) -> Result<Bson, SourceError> {
    match id_spec {
        Bson::Null => Ok(Bson::Null),
        Bson::Document(fields) => {
            let mut key = Document::new();
            for (name, expr) in fields.iter() {
                key.insert(name.clone(), eval_expr(expr, document)?);
            }
            Ok(Bson::Document(key))
        }
        expr => eval_expr(expr, document),
    }
}

fn new_accumulator(op: &str, operand: &Bson) -> Result<Accumulator, SourceError> {
    match op {
        "$sum" => match operand {
            Bson::Document(_) => Ok(Accumulator::CondCount { count: 0 }),
            _ => Ok(Accumulator::Sum {
                total: 0.0,
                integral: true,
            }),
        },
        "$min" => Ok(Accumulator::Min(None)),
        "$max" => Ok(Accumulator::Max(None)),
        "$avg" => Ok(Accumulator::Avg {
            total: 0.0,
            count: 0,
        }),
        other => Err(SourceError::Query(format!(
            "unsupported accumulator: {other}"
        ))),
    }
}

fn accumulate(
    accumulator: &mut Accumulator,
    operand: &Bson,
    document: &Document,
) -> Result<(), SourceError> {
    match accumulator {
        Accumulator::Sum { total, integral } => {
            let value = eval_expr(operand, document)?;
            if let Some((v, is_int)) = numeric(&value) {
                *total += v;
                *integral = *integral && is_int;
            }
        }
        Accumulator::CondCount { count } => {
            let value = eval_expr(operand, document)?;
            if let Some((v, _)) = numeric(&value) {
                *count += v as i64;
            }
        }
        Accumulator::Min(slot) => {
            let value = eval_expr(operand, document)?;
            if !matches!(value, Bson::Null) {
                let replace = match slot {
                    Some(current) => {
                        matcher::compare_bson(&value, current) == Some(std::cmp::Ordering::Less)
                    }
                    None => true,
                };
                if replace {
                    *slot = Some(value);
                }
            }
        }
        Accumulator::Max(slot) => {
            let value = eval_expr(operand, document)?;
            if !matches!(value, Bson::Null) {
                let replace = match slot {
                    Some(current) => {
                        matcher::compare_bson(&value, current) == Some(std::cmp::Ordering::Greater)
                    }
                    None => true,
                };
                if replace {
                    *slot = Some(value);
                }
            }
        }
        Accumulator::Avg { total, count } => {
            let value = eval_expr(operand, document)?;
            if let Some((v, _)) = numeric(&value) {
                *total += v;
                *count += 1;
            }
        }
    }
    Ok(())
}

// ── $project ────────────────────────────────────────────────────

fn project_stage(spec: &Bson, docs: Vec<Document>) -> Result<Vec<Document>, SourceError> {
    let spec = expect_document(spec, "$project")?;
    let mut result = Vec::with_capacity(docs.len());
    for document in docs {
        let mut out = Document::new();
        let mut id_suppressed = false;
        for (name, value) in spec.iter() {
            match value {
                Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false) => {
                    if name == "_id" {
                        id_suppressed = true;
                    }
                }
                Bson::Int32(1) | Bson::Int64(1) | Bson::Boolean(true) => {
                    if let Some(v) = lookup_path(&document, name) {
                        out.insert(name.clone(), v.clone());
                    }
                }
                expr => {
                    let v = eval_expr(expr, &document)?;
                    if !matches!(v, Bson::Null) {
                        out.insert(name.clone(), v);
                    }
                }
            }
        }
        if !id_suppressed && !spec.contains_key("_id") {
            if let Some(id) = document.get("_id") {
                out.insert("_id", id.clone());
            }
        }
        result.push(out);
    }
    Ok(result)
}

fn expect_document<'a>(spec: &'a Bson, stage: &str) -> Result<&'a Document, SourceError> {
    match spec {
        Bson::Document(d) => Ok(d),
        _ => Err(SourceError::Query(format!("{stage} spec must be a document"))),
    }
}
