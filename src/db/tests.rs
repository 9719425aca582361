use super::*;
use crate::metrics::CounterMetrics;
use crate::query::Predicate;
use crate::schema::{AttributeType, CascadePolicy, EntityDescriptor, RelationshipDescriptor};
use std::sync::atomic::Ordering;

fn library_schema() -> Arc<SchemaContext> {
    Arc::new(
        SchemaContext::builder()
            .entity(
                EntityDescriptor::new("Shelf", 1)
                    .attribute("label", AttributeType::String)
                    .relationship(
                        RelationshipDescriptor::to_many("books", "Book")
                            .cascade(CascadePolicy::All)
                            .inverse("shelf"),
                    ),
            )
            .entity(
                EntityDescriptor::new("Book", 2)
                    .attribute("title", AttributeType::String)
                    .attribute("pages", AttributeType::Int)
                    .relationship(RelationshipDescriptor::to_one("shelf", "Shelf").inverse("books"))
                    .natural_order(["title"]),
            )
            .build()
            .expect("schema"),
    )
}

fn book(id: i64, title: &str, pages: i64) -> Record {
    Record::new("Book", id).with("title", title).with("pages", pages)
}

#[test]
fn save_find_round_trip() {
    let db = Db::open(library_schema(), DbOptions::default()).expect("open");
    let mut shelf = Record::new("Shelf", 1)
        .with("label", "fiction")
        .with_many("books", vec![book(2, "Dune", 412), book(1, "Arrakis", 99)]);
    let reference = db.save(&mut shelf).expect("save");

    let found = db.find("Shelf", 1).expect("find").expect("stored");
    let titles: Vec<_> = found
        .many("books")
        .expect("hydrated")
        .iter()
        .map(|b| b.attribute("title").cloned())
        .collect();
    assert_eq!(titles, vec![Some(Value::from("Arrakis")), Some(Value::from("Dune"))]);
    assert_eq!(db.find_by_reference(reference).expect("by reference").identifier(), &Value::Int(1));

    let child = db.find("Book", 2).expect("find").expect("stored");
    assert_eq!(child.one("shelf").map(Record::identifier), Some(&Value::Int(1)));
    assert!(db.find("Book", 42).expect("find").is_none());
}

#[test]
fn delete_removes_cascaded_children() {
    let db = Db::open(library_schema(), DbOptions::default()).expect("open");
    let mut shelf = Record::new("Shelf", 1).with_many("books", vec![book(1, "A", 1), book(2, "B", 2)]);
    db.save(&mut shelf).expect("save");

    db.delete(&shelf).expect("delete");
    assert!(db.find("Book", 1).expect("find").is_none());
    assert!(db.find("Book", 2).expect("find").is_none());
    assert!(db.delete(&shelf).expect_err("second delete").is_not_found());
}

#[test]
fn config_overrides_reach_the_engine() {
    let config = DbConfig::from_toml_str("lazy_page_size = 3\nidle_query_cache_capacity = 0\n")
        .expect("config");
    let metrics = Arc::new(CounterMetrics::default());
    let options = config.apply(DbOptions::default().metrics(metrics.clone()));
    assert_eq!(options.lazy_page_size, 3);

    let db = Db::open(library_schema(), options).expect("open");
    let mut shelf = Record::new("Shelf", 1).with_many("books", vec![book(1, "A", 1)]);
    db.save(&mut shelf).expect("save");
    assert_eq!(metrics.entities_saved.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.cascade_saves.load(Ordering::Relaxed), 1);

    struct Quiet;
    impl QueryListener for Quiet {
        fn on_item_added(&self, _: &Record) {}
        fn on_item_updated(&self, _: &Record) {}
        fn on_item_removed(&self, _: &Record) {}
    }
    let query = Query::builder("Book").build().expect("query");
    let listener: Arc<dyn QueryListener> = Arc::new(Quiet);
    db.listen(&query, listener.clone()).expect("listen");
    assert_eq!(db.cache().live_len(), 1);
    assert!(db.unlisten(&query, &listener).expect("unlisten"));
    // Idle cache disabled: nothing is retained after the last listener leaves.
    assert_eq!(db.cache().idle_len(), 0);
}

#[test]
fn count_ignores_paging() {
    let db = Db::open(library_schema(), DbOptions::default()).expect("open");
    for id in 0..10 {
        db.save(&mut book(id, &format!("t{id}"), id * 10)).expect("save");
    }
    let query = Query::builder("Book")
        .filter(Predicate::ge("pages", 50))
        .max_results(2)
        .build()
        .expect("query");
    assert_eq!(db.execute(&query).expect("execute").len(), 2);
    assert_eq!(db.count(&query).expect("count"), 5);
}
