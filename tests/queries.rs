use penumbra::query::Selection;
use penumbra::{
    AggregateFunction, AttributeType, Db, DbOptions, EntityDescriptor, Predicate, Query, Record,
    Result, Row, SchemaContext, Value,
};
use std::sync::Arc;

const REGIONS: [&str; 5] = ["north", "south", "east", "west", "central"];

fn sales_schema() -> Arc<SchemaContext> {
    Arc::new(
        SchemaContext::builder()
            .entity(
                EntityDescriptor::new("Sale", 1)
                    .attribute("region", AttributeType::String)
                    .attribute("customer", AttributeType::String)
                    .attribute("amount", AttributeType::Int)
                    .attribute("status", AttributeType::String),
            )
            .build()
            .expect("schema"),
    )
}

fn sale(id: i64, region: &str, customer: &str, amount: i64) -> Record {
    Record::new("Sale", id)
        .with("region", region)
        .with("customer", customer)
        .with("amount", amount)
        .with("status", "open")
}

fn seeded(count: i64) -> Db {
    let db = Db::open(sales_schema(), DbOptions::default().parallel_scan(true)).expect("open");
    for id in 0..count {
        let region = REGIONS[(id % 5) as usize];
        let mut record = sale(id, region, &format!("c{}", id % 7), id);
        db.save(&mut record).expect("save");
    }
    db
}

fn ids(db: &Db, query: &Query) -> Result<Vec<Value>> {
    Ok(db
        .execute(query)?
        .records()
        .expect("records")
        .into_iter()
        .map(|r| r.identifier().clone())
        .collect())
}

fn column<'a>(rows: &'a [Row], name: &str) -> Vec<&'a Value> {
    rows.iter().map(|row| &row[name]).collect()
}

#[test]
fn filters_order_and_limits() -> Result<()> {
    let db = seeded(50);
    let query = Query::builder("Sale")
        .filter(Predicate::eq("region", "north"))
        .filter(Predicate::ge("amount", 10))
        .order_desc("amount")
        .first_row(1)
        .max_results(3)
        .build()?;
    assert_eq!(ids(&db, &query)?, vec![Value::Int(40), Value::Int(35), Value::Int(30)]);

    let result = db.execute(&query)?;
    assert_eq!(result.number_of_results, 8);
    assert_eq!(db.count(&query)?, 8);
    Ok(())
}

#[test]
fn unordered_paging_returns_a_bounded_window() -> Result<()> {
    let db = seeded(30);
    let query = Query::builder("Sale").first_row(5).max_results(10).build()?;
    let result = db.execute(&query)?;
    assert_eq!(result.len(), 10);
    assert_eq!(result.number_of_results, 30);
    Ok(())
}

#[test]
fn distinct_records_compare_attributes_only() -> Result<()> {
    let db = Db::open(sales_schema(), DbOptions::default())?;
    for (id, amount) in [(1, 5), (2, 5), (3, 7), (4, 5)] {
        db.save(&mut sale(id, "north", "acme", amount))?;
    }
    let query = Query::builder("Sale")
        .distinct()
        .order_asc("amount")
        .build()?;
    let result = db.execute(&query)?;
    assert_eq!(result.number_of_results, 2);
    let amounts: Vec<_> = result
        .records()
        .expect("records")
        .into_iter()
        .map(|r| r.attribute("amount").cloned())
        .collect();
    assert_eq!(amounts, vec![Some(Value::Int(5)), Some(Value::Int(7))]);
    Ok(())
}

#[test]
fn projections_return_selected_columns() -> Result<()> {
    let db = seeded(20);
    let query = Query::builder("Sale")
        .select("customer")
        .select("amount")
        .filter(Predicate::lt("amount", 10))
        .order_desc("amount")
        .max_results(3)
        .build()?;
    let result = db.execute(&query)?;
    let rows = result.rows().expect("rows");
    assert_eq!(rows.len(), 3);
    assert_eq!(column(rows, "amount"), vec![&Value::Int(9), &Value::Int(8), &Value::Int(7)]);
    assert!(rows.iter().all(|row| row.len() == 2 && !row.contains_key("region")));

    let distinct = Query::builder("Sale").select("region").distinct().build()?;
    assert_eq!(db.count(&distinct)?, 5);
    Ok(())
}

#[test]
fn grouping_counts_large_inputs() -> Result<()> {
    let db = seeded(10_000);
    let query = Query::builder("Sale")
        .select("region")
        .count_all()
        .group_by("region")
        .order_asc("region")
        .build()?;
    let result = db.execute(&query)?;
    let rows = result.rows().expect("rows");
    assert_eq!(rows.len(), 5);
    assert_eq!(
        column(rows, "region"),
        vec![
            &Value::from("central"),
            &Value::from("east"),
            &Value::from("north"),
            &Value::from("south"),
            &Value::from("west"),
        ]
    );
    assert!(rows.iter().all(|row| row["count(*)"] == Value::Int(2_000)));
    Ok(())
}

#[test]
fn aggregates_with_aliases() -> Result<()> {
    let db = seeded(10);
    let query = Query::builder("Sale")
        .filter(Predicate::is_in("region", ["north", "south"]))
        .aggregate(AggregateFunction::Sum, Some("amount"), Some("total"))
        .min("amount")
        .max("amount")
        .avg("amount")
        .build()?;
    let result = db.execute(&query)?;
    let rows = result.rows().expect("rows");
    assert_eq!(rows.len(), 1);
    // north: 0, 5; south: 1, 6
    assert_eq!(rows[0]["total"], Value::Int(12));
    assert_eq!(rows[0]["min(amount)"], Value::Int(0));
    assert_eq!(rows[0]["max(amount)"], Value::Int(6));
    assert_eq!(rows[0]["avg(amount)"], Value::Float(3.0));
    Ok(())
}

#[test]
fn empty_ungrouped_aggregate_still_yields_a_row() -> Result<()> {
    let db = seeded(5);
    let query = Query::builder("Sale")
        .filter(Predicate::gt("amount", 1_000))
        .count_all()
        .sum("amount")
        .build()?;
    let result = db.execute(&query)?;
    let rows = result.rows().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["count(*)"], Value::Int(0));
    assert_eq!(rows[0]["sum(amount)"], Value::Null);
    Ok(())
}

#[test]
fn grouped_count_ignores_paging() -> Result<()> {
    let db = seeded(40);
    let query = Query::builder("Sale")
        .select("region")
        .count_all()
        .group_by("region")
        .max_results(2)
        .build()?;
    assert_eq!(db.execute(&query)?.len(), 2);
    assert_eq!(db.count(&query)?, 5);
    Ok(())
}

#[test]
fn update_and_delete_queries() -> Result<()> {
    let db = seeded(25);
    let close_north = Query::builder("Sale")
        .filter(Predicate::eq("region", "north"))
        .set("status", "closed")
        .build()?;
    assert_eq!(db.execute_update(&close_north)?, 5);

    let closed = Query::builder("Sale")
        .filter(Predicate::eq("status", "closed"))
        .build()?;
    assert_eq!(db.count(&closed)?, 5);
    assert_eq!(
        db.find("Sale", 5)?.and_then(|r| r.attribute("status").cloned()),
        Some(Value::from("closed"))
    );

    let limited = Query::builder("Sale")
        .filter(Predicate::eq("status", "closed"))
        .order_asc("amount")
        .max_results(2)
        .build()?;
    assert_eq!(db.execute_delete(&limited)?, 2);
    assert!(db.find("Sale", 0)?.is_none());
    assert!(db.find("Sale", 5)?.is_none());
    assert_eq!(db.count(&closed)?, 3);
    Ok(())
}

#[test]
fn invalid_queries_are_rejected() -> Result<()> {
    let db = seeded(1);
    let unknown = Query::builder("Sale")
        .filter(Predicate::eq("colour", "red"))
        .build()?;
    assert_eq!(db.execute(&unknown).unwrap_err().code(), "UnknownAttribute");

    let no_entity = Query::builder("Refund").build()?;
    assert_eq!(db.execute(&no_entity).unwrap_err().code(), "UnknownEntity");

    let no_updates = Query::builder("Sale").build()?;
    assert!(db.execute_update(&no_updates).is_err());

    let aliased = Query::builder("Sale")
        .aggregate(AggregateFunction::Count, None, Some("n"))
        .build()?;
    assert_eq!(
        aliased.selections,
        vec![Selection::Aggregate {
            function: AggregateFunction::Count,
            attribute: None,
            alias: Some("n".to_owned()),
        }]
    );
    Ok(())
}

fn priced_db(prices: &[Value]) -> Db {
    let schema = SchemaContext::builder()
        .entity(EntityDescriptor::new("Item", 1).attribute("price", AttributeType::Float))
        .build()
        .expect("schema");
    let db = Db::open(Arc::new(schema), DbOptions::default()).expect("open");
    for (id, price) in prices.iter().enumerate() {
        db.save(&mut Record::new("Item", id as i64).with("price", price.clone()))
            .expect("save");
    }
    db
}

#[test]
fn integer_and_float_prices_are_one_value() -> Result<()> {
    let db = priced_db(&[Value::Int(1), Value::Float(1.0), Value::Float(2.5)]);
    let ones = Query::builder("Item").filter(Predicate::eq("price", 1)).build()?;
    assert_eq!(db.count(&ones)?, 2);

    let grouped = Query::builder("Item")
        .select("price")
        .count_all()
        .group_by("price")
        .order_asc("price")
        .build()?;
    let result = db.execute(&grouped)?;
    let rows = result.rows().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(column(rows, "count(*)"), vec![&Value::Int(2), &Value::Int(1)]);

    let distinct = Query::builder("Item").select("price").distinct().build()?;
    assert_eq!(db.execute(&distinct)?.number_of_results, 2);
    Ok(())
}

#[test]
fn mixed_numeric_order_is_numeric() -> Result<()> {
    let db = priced_db(&[Value::Int(5), Value::Float(1.5), Value::Int(2)]);
    let query = Query::builder("Item").order_asc("price").build()?;
    assert_eq!(ids(&db, &query)?, vec![Value::Int(1), Value::Int(2), Value::Int(0)]);
    Ok(())
}
