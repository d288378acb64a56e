use std::cmp::Ordering;

use bson::{Bson, Document};
use regex::Regex;

use crate::error::SourceError;

/// Navigate a dotted path through nested documents.
/// A non-document value mid-chain means the path does not resolve.
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let value = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(value);
        }
        match value {
            Bson::Document(sub) => current = sub,
            _ => return None,
        }
    }
    None
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        Bson::Decimal128(v) => v.to_string().parse::<f64>().ok(),
        _ => None,
    }
}

/// Equality with cross-type numeric comparison. Null equals null only.
pub fn bson_eq(a: &Bson, b: &Bson) -> bool {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x == y;
    }
    a == b
}

/// Partial ordering between two values. `None` means the types are not
/// comparable, which makes every range operator evaluate to false.
pub fn compare_bson(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            Some(x.timestamp_millis().cmp(&y.timestamp_millis()))
        }
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        _ => None,
    }
}

/// Total ordering used by `$sort`: missing and null sort first,
/// incomparable pairs are treated as equal.
pub fn sort_cmp(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let a = a.filter(|v| !matches!(v, Bson::Null));
    let b = b.filter(|v| !matches!(v, Bson::Null));
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_bson(x, y).unwrap_or(Ordering::Equal),
    }
}

/// Evaluate a filter document against a document.
///
/// Supports implicit equality, operator sub-documents
/// (`$eq $ne $gt $gte $lt $lte $in $exists $regex`), `$and`/`$or`
/// arrays, and `$expr`. Unknown operators are an error.
pub fn matches(filter: &Document, doc: &Document) -> Result<bool, SourceError> {
    for (key, value) in filter.iter() {
        let matched = match key.as_str() {
            "$and" => logical_array(value, doc, true)?,
            "$or" => logical_array(value, doc, false)?,
            "$expr" => truthy(&eval_expr(value, doc)?),
            k if k.starts_with('$') => {
                return Err(SourceError::Query(format!(
                    "unknown top-level operator: {k}"
                )));
            }
            path => field_condition(path, value, doc)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn logical_array(value: &Bson, doc: &Document, all: bool) -> Result<bool, SourceError> {
    let array = match value {
        Bson::Array(a) => a,
        _ => return Err(SourceError::Query("$and/$or value must be an array".into())),
    };
    if array.is_empty() {
        return Err(SourceError::Query("$and/$or array must not be empty".into()));
    }
    for element in array {
        let sub = match element {
            Bson::Document(d) => d,
            _ => {
                return Err(SourceError::Query(
                    "$and/$or array elements must be documents".into(),
                ));
            }
        };
        let matched = matches(sub, doc)?;
        if all && !matched {
            return Ok(false);
        }
        if !all && matched {
            return Ok(true);
        }
    }
    Ok(all)
}

fn field_condition(path: &str, condition: &Bson, doc: &Document) -> Result<bool, SourceError> {
    // An operator document starts with a `$` key; anything else is implicit $eq.
    if let Bson::Document(sub) = condition {
        let is_operator_doc = sub.keys().next().map(|k| k.starts_with('$')).unwrap_or(false);
        if is_operator_doc {
            return operator_doc(path, sub, doc);
        }
    }
    Ok(field_eq(path, condition, doc))
}

/// `{path: null}` matches both an explicit null and a missing field.
fn field_eq(path: &str, expected: &Bson, doc: &Document) -> bool {
    match lookup_path(doc, path) {
        Some(actual) => bson_eq(actual, expected),
        None => matches!(expected, Bson::Null),
    }
}

fn operator_doc(path: &str, operators: &Document, doc: &Document) -> Result<bool, SourceError> {
    if operators.contains_key("$regex") {
        return regex_condition(path, operators, doc);
    }

    for (op, operand) in operators.iter() {
        let matched = match op.as_str() {
            "$eq" => field_eq(path, operand, doc),
            "$ne" => !field_eq(path, operand, doc),
            "$gt" | "$gte" | "$lt" | "$lte" => {
                let actual = lookup_path(doc, path);
                match actual {
                    Some(actual) => match compare_bson(actual, operand) {
                        Some(ord) => match op.as_str() {
                            "$gt" => ord == Ordering::Greater,
                            "$gte" => ord != Ordering::Less,
                            "$lt" => ord == Ordering::Less,
                            _ => ord != Ordering::Greater,
                        },
                        None => false,
                    },
                    None => false,
                }
            }
            "$in" => {
                let values = match operand {
                    Bson::Array(a) => a,
                    _ => return Err(SourceError::Query("$in value must be an array".into())),
                };
                match lookup_path(doc, path) {
                    Some(actual) => values.iter().any(|v| bson_eq(actual, v)),
                    None => values.iter().any(|v| matches!(v, Bson::Null)),
                }
            }
            "$exists" => {
                let expected = match operand {
                    Bson::Boolean(b) => *b,
                    _ => return Err(SourceError::Query("$exists value must be a boolean".into())),
                };
                lookup_path(doc, path).is_some() == expected
            }
            "$options" => {
                return Err(SourceError::Query("$options without $regex".into()));
            }
            other => {
                return Err(SourceError::Query(format!("unknown field operator: {other}")));
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn regex_condition(path: &str, operators: &Document, doc: &Document) -> Result<bool, SourceError> {
    let pattern = match operators.get("$regex") {
        Some(Bson::String(p)) => p,
        _ => return Err(SourceError::Query("$regex value must be a string".into())),
    };
    let options = match operators.get("$options") {
        None => None,
        Some(Bson::String(o)) => Some(o.as_str()),
        Some(_) => return Err(SourceError::Query("$options value must be a string".into())),
    };
    for (key, _) in operators.iter() {
        if key != "$regex" && key != "$options" {
            return Err(SourceError::Query(format!(
                "unexpected key alongside $regex: {key}"
            )));
        }
    }

    let full_pattern = match options {
        Some(opts) => {
            let mut prefix = String::with_capacity(4 + opts.len() + pattern.len());
            prefix.push_str("(?");
            for ch in opts.chars() {
                match ch {
                    'i' | 's' | 'm' | 'x' => prefix.push(ch),
                    c => {
                        return Err(SourceError::Query(format!("unknown regex option: {c}")));
                    }
                }
            }
            prefix.push(')');
            prefix.push_str(pattern);
            prefix
        }
        None => pattern.clone(),
    };
    let re = Regex::new(&full_pattern)
        .map_err(|e| SourceError::Query(format!("invalid regex pattern: {e}")))?;

    match lookup_path(doc, path) {
        Some(Bson::String(s)) => Ok(re.is_match(s)),
        _ => Ok(false),
    }
}

// ── $expr evaluation ────────────────────────────────────────────

pub fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(b) => *b,
        Bson::Int32(v) => *v != 0,
        Bson::Int64(v) => *v != 0,
        Bson::Double(v) => *v != 0.0,
        _ => true,
    }
}

/// Evaluate an aggregation expression against a document.
/// `"$path"` strings are field references; operator documents cover the
/// vocabulary the pushdown layer emits.
pub fn eval_expr(expr: &Bson, doc: &Document) -> Result<Bson, SourceError> {
    match expr {
        Bson::String(s) if s.starts_with('$') => {
            Ok(lookup_path(doc, &s[1..]).cloned().unwrap_or(Bson::Null))
        }
        Bson::Document(operator) => {
            let (op, operand) = match operator.iter().next() {
                Some(entry) if operator.len() == 1 => entry,
                _ => {
                    return Err(SourceError::Query(
                        "expression operator must have exactly one key".into(),
                    ));
                }
            };
            eval_operator(op, operand, doc)
        }
        other => Ok(other.clone()),
    }
}

fn operand_list(operand: &Bson) -> Vec<&Bson> {
    match operand {
        Bson::Array(args) => args.iter().collect(),
        other => vec![other],
    }
}

fn eval_operator(op: &str, operand: &Bson, doc: &Document) -> Result<Bson, SourceError> {
    match op {
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            let args = operand_list(operand);
            if args.len() != 2 {
                return Err(SourceError::Query(format!("{op} expects two arguments")));
            }
            let left = eval_expr(args[0], doc)?;
            let right = eval_expr(args[1], doc)?;
            let result = match op {
                "$eq" => bson_eq(&left, &right),
                "$ne" => !bson_eq(&left, &right),
                _ => match compare_bson(&left, &right) {
                    Some(ord) => match op {
                        "$gt" => ord == Ordering::Greater,
                        "$gte" => ord != Ordering::Less,
                        "$lt" => ord == Ordering::Less,
                        _ => ord != Ordering::Greater,
                    },
                    None => false,
                },
            };
            Ok(Bson::Boolean(result))
        }
        "$and" => {
            let args = operand_list(operand);
            for arg in args {
                if !truthy(&eval_expr(arg, doc)?) {
                    return Ok(Bson::Boolean(false));
                }
            }
            Ok(Bson::Boolean(true))
        }
        "$cond" => {
            let args = operand_list(operand);
            if args.len() != 3 {
                return Err(SourceError::Query("$cond expects three arguments".into()));
            }
            if truthy(&eval_expr(args[0], doc)?) {
                eval_expr(args[1], doc)
            } else {
                eval_expr(args[2], doc)
            }
        }
        "$strLenCP" => {
            let args = operand_list(operand);
            if args.len() != 1 {
                return Err(SourceError::Query("$strLenCP expects one argument".into()));
            }
            match eval_expr(args[0], doc)? {
                Bson::String(s) => Ok(Bson::Int64(s.chars().count() as i64)),
                _ => Ok(Bson::Null),
            }
        }
        "$substrCP" => {
            let args = operand_list(operand);
            if args.len() != 3 {
                return Err(SourceError::Query("$substrCP expects three arguments".into()));
            }
            let input = eval_expr(args[0], doc)?;
            let start = eval_expr(args[1], doc)?;
            let count = eval_expr(args[2], doc)?;
            let (s, start, count) = match (input, as_f64(&start), as_f64(&count)) {
                (Bson::String(s), Some(start), Some(count)) if start >= 0.0 && count >= 0.0 => {
                    (s, start as usize, count as usize)
                }
                _ => return Ok(Bson::Null),
            };
            let result: String = s.chars().skip(start).take(count).collect();
            Ok(Bson::String(result))
        }
        other => Err(SourceError::Query(format!(
            "unknown expression operator: {other}"
        ))),
    }
}
