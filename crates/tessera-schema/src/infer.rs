use std::collections::BTreeMap;

use bson::Bson;

use crate::types::ColumnType;

pub(crate) const MAX_DEPTH: usize = 5;
const MAX_ARRAY_ELEMENTS_TO_SCAN: usize = 10;

/// Infer a column type from a single document element.
///
/// Arrays and documents map to VARCHAR here; the schema walker gives them
/// richer LIST/STRUCT types when it can. Null, undefined and the exotic
/// types also land on VARCHAR, the universal spillover target.
pub fn infer_scalar(value: &Bson) -> ColumnType {
    match value {
        Bson::String(_) => ColumnType::Varchar,
        Bson::Int32(_) | Bson::Int64(_) => ColumnType::Bigint,
        Bson::Double(_) | Bson::Decimal128(_) => ColumnType::Double,
        Bson::Boolean(_) => ColumnType::Boolean,
        Bson::DateTime(dt) => {
            // DATE when the time component is midnight UTC, TIMESTAMP otherwise.
            let seconds = dt.timestamp_millis() / 1000;
            if seconds % 86400 == 0 {
                ColumnType::Date
            } else {
                ColumnType::Timestamp
            }
        }
        Bson::ObjectId(_) => ColumnType::Varchar,
        Bson::Binary(_) => ColumnType::Blob,
        Bson::Array(_) => ColumnType::Varchar,
        Bson::Document(_) => ColumnType::Varchar,
        _ => ColumnType::Varchar,
    }
}

/// Resolve one winning type from the samples recorded for a path.
pub fn resolve(samples: &[ColumnType]) -> ColumnType {
    if samples.is_empty() {
        return ColumnType::Varchar;
    }
    if samples.iter().all(|t| *t == samples[0]) {
        return samples[0].clone();
    }

    // Any LIST wins; deepest nesting first, first encountered breaks ties.
    let mut deepest: Option<&ColumnType> = None;
    let mut max_depth = 0;
    for ty in samples {
        if let ColumnType::List(_) = ty {
            let depth = ty.list_depth();
            if depth > max_depth {
                max_depth = depth;
                deepest = Some(ty);
            }
        }
    }
    if let Some(ty) = deepest {
        return ty.clone();
    }

    if let Some(ty) = samples.iter().find(|t| matches!(t, ColumnType::Struct(_))) {
        return ty.clone();
    }

    // Frequency-weighted pick over the scalar candidates. DOUBLE subsumes
    // integers; VARCHAR is the universal fallback and needs a strong
    // majority to win outright.
    let total = samples.len();
    let count = |wanted: &ColumnType| samples.iter().filter(|t| *t == wanted).count();
    let varchar = count(&ColumnType::Varchar);
    let double = count(&ColumnType::Double);
    let bigint = count(&ColumnType::Bigint);
    let boolean = count(&ColumnType::Boolean);
    let timestamp = count(&ColumnType::Timestamp);

    if varchar > total * 7 / 10 {
        return ColumnType::Varchar;
    }
    if double > 0 && double >= total * 3 / 10 {
        return ColumnType::Double;
    }
    if bigint > 0 && bigint >= total * 3 / 10 {
        return ColumnType::Bigint;
    }
    if boolean >= total * 7 / 10 {
        return ColumnType::Boolean;
    }
    if timestamp >= total * 7 / 10 {
        return ColumnType::Timestamp;
    }
    if double > 0 {
        return ColumnType::Double;
    }
    if bigint > 0 {
        return ColumnType::Bigint;
    }
    if boolean > 0 {
        return ColumnType::Boolean;
    }
    if timestamp > 0 {
        return ColumnType::Timestamp;
    }
    ColumnType::Varchar
}

/// Infer the column type for an array value found during sampling.
pub(crate) fn infer_array(elements: &[Bson], depth: usize) -> ColumnType {
    if elements.is_empty() {
        return ColumnType::Varchar;
    }
    match &elements[0] {
        Bson::Document(_) => match infer_struct_from_array(elements, depth) {
            s @ ColumnType::Struct(_) => ColumnType::List(Box::new(s)),
            _ => ColumnType::Varchar,
        },
        Bson::Array(_) => match infer_nested_array(elements, depth) {
            l @ ColumnType::List(_) => ColumnType::List(Box::new(l)),
            _ => ColumnType::Varchar,
        },
        first => ColumnType::List(Box::new(infer_scalar(first))),
    }
}

/// STRUCT inference for an array of documents: merge fields across the
/// first few elements, resolving conflicts per field. Nested documents and
/// arrays inside the struct collapse to VARCHAR.
pub(crate) fn infer_struct_from_array(elements: &[Bson], depth: usize) -> ColumnType {
    if depth > MAX_DEPTH {
        return ColumnType::Varchar;
    }

    let mut fields: BTreeMap<String, Vec<ColumnType>> = BTreeMap::new();
    for element in elements.iter().take(MAX_ARRAY_ELEMENTS_TO_SCAN) {
        let document = match element {
            Bson::Document(d) => d,
            _ => return ColumnType::Varchar,
        };
        for (name, value) in document.iter() {
            let field_type = match value {
                Bson::Document(_) | Bson::Array(_) => ColumnType::Varchar,
                scalar => infer_scalar(scalar),
            };
            fields.entry(name.clone()).or_default().push(field_type);
        }
    }

    if fields.is_empty() {
        return ColumnType::Varchar;
    }
    ColumnType::Struct(
        fields
            .into_iter()
            .map(|(name, samples)| (name, resolve(&samples)))
            .collect(),
    )
}

/// LIST inference for an array of arrays, keyed by the first element chain.
pub(crate) fn infer_nested_array(elements: &[Bson], depth: usize) -> ColumnType {
    if depth > MAX_DEPTH {
        return ColumnType::Varchar;
    }
    let inner = match elements.first() {
        Some(Bson::Array(inner)) if !inner.is_empty() => inner,
        _ => return ColumnType::Varchar,
    };
    match &inner[0] {
        Bson::Document(_) => match infer_struct_from_array(inner, depth + 1) {
            s @ ColumnType::Struct(_) => ColumnType::List(Box::new(s)),
            _ => ColumnType::Varchar,
        },
        Bson::Array(_) => match infer_nested_array(inner, depth + 1) {
            t @ (ColumnType::List(_) | ColumnType::Varchar) => ColumnType::List(Box::new(t)),
            _ => ColumnType::Varchar,
        },
        first => ColumnType::List(Box::new(infer_scalar(first))),
    }
}
