use std::sync::Arc;

use bson::doc;
use tessera_scan::{DocumentCatalog, ScanError, clear_cache};
use tessera_source::{DocumentSource, MemorySource};

fn catalog(uri: &str, database: Option<&str>) -> (MemorySource, DocumentCatalog<MemorySource>) {
    let src = MemorySource::connect(uri).unwrap();
    src.clear();
    let catalog = DocumentCatalog::new(Arc::new(src.clone()), uri, database.map(String::from));
    (src, catalog)
}

#[test]
fn collection_list_is_cached_until_cleared() {
    let (src, catalog) = catalog("mem://catalog-cache", None);
    src.insert_many("shop", "orders", vec![doc! { "_id": 1 }]);

    assert_eq!(catalog.collection_names("shop").unwrap(), vec!["orders"]);

    // New collections stay invisible while the cache holds.
    src.create_collection("shop", "customers");
    assert_eq!(catalog.collection_names("shop").unwrap(), vec!["orders"]);

    catalog.clear_cache();
    assert_eq!(
        catalog.collection_names("shop").unwrap(),
        vec!["customers", "orders"]
    );
}

#[test]
fn cache_miss_is_not_an_error() {
    let (_src, catalog) = catalog("mem://catalog-miss", None);
    assert_eq!(
        catalog.collection_names("nowhere").unwrap(),
        Vec::<String>::new()
    );
}

#[test]
fn schema_names_with_pinned_database() {
    let (src, catalog) = catalog("mem://catalog-pinned", Some("shop"));
    src.create_database("shop");
    src.create_database("other");
    assert_eq!(catalog.schema_names(), vec!["shop"]);
}

#[test]
fn schema_names_skip_system_databases() {
    let (src, catalog) = catalog("mem://catalog-system", None);
    src.create_database("admin");
    src.create_database("local");
    src.create_database("config");
    src.create_database("shop");
    assert_eq!(catalog.schema_names(), vec!["shop"]);
}

#[test]
fn view_sql_escapes_quotes() {
    let uri = "mem://catalog'quoted";
    let src = MemorySource::connect(uri).unwrap();
    src.clear();
    let catalog = DocumentCatalog::new(Arc::new(src), uri, None);
    let sql = catalog.view_sql("shop", "ord'ers");
    assert_eq!(
        sql,
        "SELECT * FROM mongo_scan('mem://catalog''quoted', 'shop', 'ord''ers')"
    );
    // Second call comes from the view-info cache.
    assert_eq!(catalog.view_sql("shop", "ord'ers"), sql);
}

#[test]
fn collection_lookup_is_case_insensitive() {
    let (src, catalog) = catalog("mem://catalog-ci", None);
    src.create_collection("shop", "Orders");
    assert_eq!(
        catalog.find_collection("shop", "orders").unwrap(),
        Some("Orders".to_string())
    );
    assert_eq!(catalog.find_collection("shop", "missing").unwrap(), None);
}

#[test]
fn writes_are_rejected() {
    let (_src, catalog) = catalog("mem://catalog-writes", None);
    assert!(matches!(
        catalog.create_table("t"),
        Err(ScanError::NotImplemented(_))
    ));
    assert!(matches!(
        catalog.create_index("i"),
        Err(ScanError::NotImplemented(_))
    ));
    assert!(matches!(
        catalog.insert("t"),
        Err(ScanError::NotImplemented(_))
    ));
    assert!(matches!(
        catalog.update("t"),
        Err(ScanError::NotImplemented(_))
    ));
    assert!(matches!(
        catalog.delete("t"),
        Err(ScanError::NotImplemented(_))
    ));
}

#[test]
fn clear_cache_function_reports_success() {
    let (_src, catalog) = catalog("mem://catalog-clear-fn", None);
    assert!(clear_cache(&catalog));
}
