use bson::{Bson, Document, doc, oid::ObjectId};
use tessera_batch::Cell;
use tessera_schema::ResolvedSchema;

use crate::predicate::{CompareOp, TableFilter, TableFilterSet};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// True for `_id`, nested `._id` paths, and the `<name>_id` foreign-key
/// pattern.
pub fn is_object_id_column(column: &str) -> bool {
    if column == "_id" {
        return true;
    }
    if column.len() > 4 && column.ends_with("._id") {
        return true;
    }
    column.len() > 3 && column.ends_with("_id")
}

pub fn is_object_id_hex(value: &str) -> bool {
    value.len() == 24 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Convert an engine constant to its wire value. String constants on
/// object-id columns that look like 24-hex ids become native ObjectIds so
/// the server compares ids, not strings.
pub fn cell_to_bson(cell: &Cell, column: &str) -> Bson {
    match cell {
        Cell::Null => Bson::Null,
        Cell::Varchar(s) => {
            if is_object_id_column(column) && is_object_id_hex(s) {
                match ObjectId::parse_str(s) {
                    Ok(oid) => Bson::ObjectId(oid),
                    Err(_) => Bson::String(s.clone()),
                }
            } else {
                Bson::String(s.clone())
            }
        }
        Cell::Bigint(v) => Bson::Int64(*v),
        Cell::Hugeint(v) => Bson::Int64(*v as i64),
        Cell::Double(v) => Bson::Double(*v),
        Cell::Boolean(v) => Bson::Boolean(*v),
        Cell::Date(days) => Bson::DateTime(bson::DateTime::from_millis(
            *days as i64 * MILLIS_PER_DAY,
        )),
        Cell::Timestamp(micros) => Bson::DateTime(bson::DateTime::from_millis(micros / 1000)),
        Cell::Blob(bytes) => Bson::Binary(bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: bytes.clone(),
        }),
        Cell::List(_) | Cell::Struct(_) => Bson::Null,
    }
}

fn compare_op_key(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "$eq",
        CompareOp::NotEq => "$ne",
        CompareOp::Lt => "$lt",
        CompareOp::LtEq => "$lte",
        CompareOp::Gt => "$gt",
        CompareOp::GtEq => "$gte",
    }
}

/// Convert one predicate to a filter document rooted at `path`.
/// An empty document means the predicate could not be translated.
fn convert_single(filter: &TableFilter, path: &str) -> Document {
    match filter {
        TableFilter::Comparison {
            op: CompareOp::Eq,
            value,
        } => {
            doc! { path: cell_to_bson(value, path) }
        }
        TableFilter::Comparison { op, value } => {
            doc! { path: { compare_op_key(*op): cell_to_bson(value, path) } }
        }
        TableFilter::In(values) => {
            if values.is_empty() {
                return Document::new();
            }
            let array: Vec<Bson> = values.iter().map(|v| cell_to_bson(v, path)).collect();
            doc! { path: { "$in": array } }
        }
        TableFilter::IsNull => doc! { path: Bson::Null },
        TableFilter::IsNotNull => doc! { path: { "$ne": Bson::Null } },
        TableFilter::And(children) => {
            // Conditions on one column merge into a single operator document.
            let mut merged = Document::new();
            for child in children {
                let child_doc = convert_single(child, path);
                for (key, value) in child_doc.iter() {
                    if key == path {
                        match value {
                            Bson::Document(ops) => {
                                for (op, v) in ops.iter() {
                                    merged.insert(op.clone(), v.clone());
                                }
                            }
                            bare => {
                                merged.insert("$eq", bare.clone());
                            }
                        }
                    } else {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            if merged.is_empty() {
                return Document::new();
            }
            doc! { path: merged }
        }
        TableFilter::Or(children) => {
            // All-equality disjunctions fold into $in.
            let mut equality_values = Vec::new();
            let mut all_equality = true;
            for child in children {
                match child {
                    TableFilter::Comparison {
                        op: CompareOp::Eq,
                        value,
                    } => equality_values.push(cell_to_bson(value, path)),
                    _ => {
                        all_equality = false;
                        break;
                    }
                }
            }
            if all_equality && equality_values.len() > 1 {
                return doc! { path: { "$in": equality_values } };
            }

            let mut disjuncts = Vec::new();
            for child in children {
                let child_doc = convert_single(child, path);
                if !child_doc.is_empty() {
                    disjuncts.push(Bson::Document(child_doc));
                }
            }
            if disjuncts.is_empty() {
                return Document::new();
            }
            doc! { "$or": disjuncts }
        }
        TableFilter::StructField { child, filter } => {
            convert_single(filter, &format!("{path}.{child}"))
        }
        TableFilter::Optional(inner) => convert_single(inner, path),
        TableFilter::Dynamic(slot) => match slot.lock().unwrap().as_ref() {
            Some(inner) => convert_single(inner, path),
            None => Document::new(),
        },
    }
}

/// Translate a pushed filter set into a native find filter.
///
/// One accumulator per document path; multiple predicates on a path merge
/// their operator dictionaries. Top-level operators (`$or`) become sibling
/// conjuncts. The result is the single conjunct itself, or
/// `{$and: [...]}` when more than one remains. Empty when nothing
/// translated.
pub fn build_find_filter(filters: &TableFilterSet, schema: &ResolvedSchema) -> Document {
    if filters.is_empty() {
        return Document::new();
    }

    // Per-path accumulators in first-appearance order, plus top-level
    // operator conjuncts.
    let mut paths: Vec<String> = Vec::new();
    let mut conditions: Vec<Vec<Bson>> = Vec::new();
    let mut globals: Vec<Document> = Vec::new();

    for (&column, filter) in &filters.filters {
        if column >= schema.len() {
            continue;
        }
        let name = &schema.column_names[column];
        let path = schema.path_of(name);

        let filter_doc = convert_single(filter, path);
        if filter_doc.is_empty() {
            continue;
        }

        let first_key = match filter_doc.keys().next() {
            Some(k) => k.clone(),
            None => continue,
        };
        if first_key.starts_with('$') {
            globals.push(filter_doc);
            continue;
        }

        // Struct-field filters root their document at the child path, so
        // the accumulator keys off the produced root, not the column path.
        let condition = match filter_doc.get(&first_key) {
            Some(v) => v.clone(),
            None => continue,
        };
        match paths.iter().position(|p| *p == first_key) {
            Some(i) => conditions[i].push(condition),
            None => {
                paths.push(first_key);
                conditions.push(vec![condition]);
            }
        }
    }

    let mut conjuncts: Vec<Document> = Vec::new();
    for (path, conds) in paths.into_iter().zip(conditions) {
        if conds.len() == 1 {
            let mut single = Document::new();
            single.insert(path, conds.into_iter().next().unwrap());
            conjuncts.push(single);
            continue;
        }
        // Merge operator dictionaries; bare equalities become $eq keys.
        let mut merged = Document::new();
        for cond in conds {
            match cond {
                Bson::Document(ops) => {
                    for (op, value) in ops.iter() {
                        merged.insert(op.clone(), value.clone());
                    }
                }
                bare => {
                    merged.insert("$eq", bare);
                }
            }
        }
        let mut entry = Document::new();
        entry.insert(path, Bson::Document(merged));
        conjuncts.push(entry);
    }
    conjuncts.extend(globals);

    combine_conjuncts(conjuncts)
}

/// Zero conjuncts: empty filter. One: itself. More: `{$and: [...]}`.
pub fn combine_conjuncts(conjuncts: Vec<Document>) -> Document {
    match conjuncts.len() {
        0 => Document::new(),
        1 => conjuncts.into_iter().next().unwrap(),
        _ => {
            let terms: Vec<Bson> = conjuncts.into_iter().map(Bson::Document).collect();
            doc! { "$and": terms }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tessera_schema::{ColumnSpec, ExplicitColumns, parse_explicit_columns};

    use super::*;

    fn schema(columns: &[(&str, &str)]) -> ResolvedSchema {
        parse_explicit_columns(&ExplicitColumns {
            columns: columns
                .iter()
                .map(|(n, t)| (n.to_string(), ColumnSpec::Type(t.to_string())))
                .collect(),
        })
        .unwrap()
    }

    #[test]
    fn equality_is_bare() {
        let schema = schema(&[("status", "VARCHAR")]);
        let mut filters = TableFilterSet::new();
        filters.insert(0, TableFilter::eq(Cell::Varchar("A".into())));
        let out = build_find_filter(&filters, &schema);
        assert_eq!(out, doc! { "status": "A" });
    }

    #[test]
    fn range_comparison() {
        let schema = schema(&[("age", "BIGINT")]);
        let mut filters = TableFilterSet::new();
        filters.insert(
            0,
            TableFilter::Comparison {
                op: CompareOp::Gt,
                value: Cell::Bigint(21),
            },
        );
        let out = build_find_filter(&filters, &schema);
        assert_eq!(out, doc! { "age": { "$gt": 21_i64 } });
    }

    #[test]
    fn conjunction_merges_operator_keys() {
        let schema = schema(&[("score", "BIGINT")]);
        let mut filters = TableFilterSet::new();
        filters.insert(
            0,
            TableFilter::And(vec![
                TableFilter::Comparison {
                    op: CompareOp::Gt,
                    value: Cell::Bigint(10),
                },
                TableFilter::Comparison {
                    op: CompareOp::Lt,
                    value: Cell::Bigint(90),
                },
            ]),
        );
        let out = build_find_filter(&filters, &schema);
        assert_eq!(out, doc! { "score": { "$gt": 10_i64, "$lt": 90_i64 } });
    }

    #[test]
    fn or_of_equalities_folds_to_in() {
        let schema = schema(&[("status", "VARCHAR")]);
        let mut filters = TableFilterSet::new();
        filters.insert(
            0,
            TableFilter::Or(vec![
                TableFilter::eq(Cell::Varchar("A".into())),
                TableFilter::eq(Cell::Varchar("B".into())),
            ]),
        );
        let out = build_find_filter(&filters, &schema);
        assert_eq!(out, doc! { "status": { "$in": ["A", "B"] } });
    }

    #[test]
    fn mixed_or_stays_or() {
        let schema = schema(&[("age", "BIGINT")]);
        let mut filters = TableFilterSet::new();
        filters.insert(
            0,
            TableFilter::Or(vec![
                TableFilter::eq(Cell::Bigint(1)),
                TableFilter::Comparison {
                    op: CompareOp::Gt,
                    value: Cell::Bigint(90),
                },
            ]),
        );
        let out = build_find_filter(&filters, &schema);
        assert_eq!(
            out,
            doc! { "$or": [ { "age": 1_i64 }, { "age": { "$gt": 90_i64 } } ] }
        );
    }

    #[test]
    fn null_checks() {
        let schema = schema(&[("a", "VARCHAR"), ("b", "VARCHAR")]);
        let mut filters = TableFilterSet::new();
        filters.insert(0, TableFilter::IsNull);
        filters.insert(1, TableFilter::IsNotNull);
        let out = build_find_filter(&filters, &schema);
        assert_eq!(
            out,
            doc! { "$and": [ { "a": Bson::Null }, { "b": { "$ne": Bson::Null } } ] }
        );
    }

    #[test]
    fn empty_in_is_skipped() {
        let schema = schema(&[("x", "BIGINT")]);
        let mut filters = TableFilterSet::new();
        filters.insert(0, TableFilter::In(vec![]));
        assert!(build_find_filter(&filters, &schema).is_empty());
    }

    #[test]
    fn object_id_heuristic() {
        let schema = schema(&[("_id", "VARCHAR")]);
        let mut filters = TableFilterSet::new();
        filters.insert(
            0,
            TableFilter::eq(Cell::Varchar("507f1f77bcf86cd799439011".into())),
        );
        let out = build_find_filter(&filters, &schema);
        let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        assert_eq!(out, doc! { "_id": oid });
    }

    #[test]
    fn object_id_heuristic_in_sets_and_foreign_keys() {
        let schema = schema(&[("customer_id", "VARCHAR")]);
        let mut filters = TableFilterSet::new();
        filters.insert(
            0,
            TableFilter::In(vec![
                Cell::Varchar("507f1f77bcf86cd799439011".into()),
                Cell::Varchar("not-an-oid".into()),
            ]),
        );
        let out = build_find_filter(&filters, &schema);
        let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        assert_eq!(
            out,
            doc! { "customer_id": { "$in": [Bson::ObjectId(oid), Bson::String("not-an-oid".into())] } }
        );
    }

    #[test]
    fn short_string_on_id_column_stays_string() {
        let schema = schema(&[("_id", "VARCHAR")]);
        let mut filters = TableFilterSet::new();
        filters.insert(0, TableFilter::eq(Cell::Varchar("abc".into())));
        let out = build_find_filter(&filters, &schema);
        assert_eq!(out, doc! { "_id": "abc" });
    }

    #[test]
    fn struct_field_uses_dotted_path() {
        let schema = schema(&[("addr", "STRUCT(city VARCHAR)")]);
        let mut filters = TableFilterSet::new();
        filters.insert(
            0,
            TableFilter::StructField {
                child: "city".into(),
                filter: Box::new(TableFilter::eq(Cell::Varchar("X".into()))),
            },
        );
        let out = build_find_filter(&filters, &schema);
        assert_eq!(out, doc! { "addr.city": "X" });
    }

    #[test]
    fn dynamic_filter_translates_only_when_set() {
        let schema = schema(&[("x", "BIGINT")]);
        let slot = Arc::new(Mutex::new(None));
        let mut filters = TableFilterSet::new();
        filters.insert(0, TableFilter::Dynamic(slot.clone()));
        assert!(build_find_filter(&filters, &schema).is_empty());

        *slot.lock().unwrap() = Some(TableFilter::eq(Cell::Bigint(5)));
        assert_eq!(build_find_filter(&filters, &schema), doc! { "x": 5_i64 });
    }

    #[test]
    fn multiple_columns_become_and() {
        let schema = schema(&[("a", "BIGINT"), ("b", "VARCHAR")]);
        let mut filters = TableFilterSet::new();
        filters.insert(0, TableFilter::eq(Cell::Bigint(1)));
        filters.insert(1, TableFilter::eq(Cell::Varchar("x".into())));
        let out = build_find_filter(&filters, &schema);
        assert_eq!(out, doc! { "$and": [ { "a": 1_i64 }, { "b": "x" } ] });
    }

    #[test]
    fn translation_is_idempotent() {
        let schema = schema(&[("a", "BIGINT"), ("b", "VARCHAR")]);
        let mut filters = TableFilterSet::new();
        filters.insert(
            0,
            TableFilter::And(vec![
                TableFilter::Comparison {
                    op: CompareOp::GtEq,
                    value: Cell::Bigint(1),
                },
                TableFilter::Comparison {
                    op: CompareOp::Lt,
                    value: Cell::Bigint(10),
                },
            ]),
        );
        filters.insert(
            1,
            TableFilter::Or(vec![
                TableFilter::eq(Cell::Varchar("x".into())),
                TableFilter::eq(Cell::Varchar("y".into())),
            ]),
        );
        let first = build_find_filter(&filters, &schema);
        let second = build_find_filter(&filters, &schema);
        assert_eq!(first, second);
    }

    #[test]
    fn nested_path_from_path_map() {
        let mut schema = schema(&[("addr_city", "VARCHAR")]);
        schema
            .path_map
            .insert("addr_city".into(), "addr.city".into());
        let mut filters = TableFilterSet::new();
        filters.insert(0, TableFilter::eq(Cell::Varchar("X".into())));
        let out = build_find_filter(&filters, &schema);
        assert_eq!(out, doc! { "addr.city": "X" });
    }
}
