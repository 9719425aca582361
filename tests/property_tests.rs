use penumbra::query::{CollectedItems, Collector};
use penumbra::{
    AttributeType, CascadePolicy, Db, DbOptions, EntityDescriptor, PartitionId, Query, Record,
    RecordOffset, Reference, RelationshipDescriptor, SchemaContext, Value,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const BOARDS: i64 = 4;
const TICKETS: i64 = 12;

#[derive(Debug, Clone)]
enum Operation {
    AttachFromChild { ticket: i64, board: i64 },
    DetachFromChild { ticket: i64 },
    ReplaceChildren { board: i64, tickets: Vec<i64> },
    DeleteTicket { ticket: i64 },
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (0..TICKETS, 0..BOARDS).prop_map(|(ticket, board)| Operation::AttachFromChild { ticket, board }),
        (0..TICKETS).prop_map(|ticket| Operation::DetachFromChild { ticket }),
        (0..BOARDS, prop::collection::vec(0..TICKETS, 0..4))
            .prop_map(|(board, tickets)| Operation::ReplaceChildren { board, tickets }),
        (0..TICKETS).prop_map(|ticket| Operation::DeleteTicket { ticket }),
    ]
}

fn tracker_schema() -> Arc<SchemaContext> {
    Arc::new(
        SchemaContext::builder()
            .entity(
                EntityDescriptor::new("Board", 1).relationship(
                    RelationshipDescriptor::to_many("tickets", "Ticket")
                        .cascade(CascadePolicy::Save)
                        .inverse("board"),
                ),
            )
            .entity(
                EntityDescriptor::new("Ticket", 2)
                    .relationship(RelationshipDescriptor::to_one("board", "Board").inverse("tickets")),
            )
            .build()
            .expect("schema"),
    )
}

fn ids(db: &Db, record: &Record, relationship: &str) -> BTreeSet<Value> {
    db.relationship_references(record, relationship)
        .expect("references")
        .into_iter()
        .map(|r| r.identifier().clone())
        .collect()
}

fn apply(db: &Db, op: &Operation) {
    match op {
        Operation::AttachFromChild { ticket, board } => {
            let mut record =
                Record::new("Ticket", *ticket).with_one("board", Some(Record::new("Board", *board)));
            db.save(&mut record).expect("save ticket");
        }
        Operation::DetachFromChild { ticket } => {
            let mut record = Record::new("Ticket", *ticket).with_one("board", None);
            db.save(&mut record).expect("detach ticket");
        }
        Operation::ReplaceChildren { board, tickets } => {
            let children = tickets.iter().map(|t| Record::new("Ticket", *t)).collect();
            let mut record = Record::new("Board", *board).with_many("tickets", children);
            db.save(&mut record).expect("save board");
        }
        Operation::DeleteTicket { ticket } => match db.delete(&Record::new("Ticket", *ticket)) {
            Ok(()) => {}
            Err(err) => assert!(err.is_not_found(), "unexpected {err}"),
        },
    }
}

fn arb_amounts() -> impl Strategy<Value = Vec<(i64, String)>> {
    prop::collection::vec((0i64..20, "[a-c]"), 0..60)
}

fn entity() -> Arc<EntityDescriptor> {
    Arc::new(
        EntityDescriptor::new("Sale", 1)
            .attribute("amount", AttributeType::Int)
            .attribute("region", AttributeType::String),
    )
}

fn sales(amounts: &[(i64, String)]) -> Vec<(Reference, Record)> {
    amounts
        .iter()
        .enumerate()
        .map(|(i, (amount, region))| {
            (
                Reference::new(PartitionId(1), RecordOffset(i as u64)),
                Record::new("Sale", i as i64)
                    .with("amount", *amount)
                    .with("region", region.as_str()),
            )
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_relationships_stay_symmetric(ops in prop::collection::vec(arb_operation(), 1..40)) {
        let db = Db::open(tracker_schema(), DbOptions::default()).unwrap();
        for board in 0..BOARDS {
            db.save(&mut Record::new("Board", board)).unwrap();
        }
        for op in &ops {
            apply(&db, op);
        }

        let mut owner_of = BTreeMap::new();
        for board in 0..BOARDS {
            for ticket in ids(&db, &Record::new("Board", board), "tickets") {
                prop_assert!(owner_of.insert(ticket, board).is_none());
            }
        }
        for ticket in 0..TICKETS {
            let back = ids(&db, &Record::new("Ticket", ticket), "board");
            prop_assert!(back.len() <= 1);
            let expected: BTreeSet<Value> = owner_of
                .get(&Value::Int(ticket))
                .map(|board| Value::Int(*board))
                .into_iter()
                .collect();
            prop_assert_eq!(back, expected);
        }
    }

    #[test]
    fn prop_ordered_window_matches_full_sort(
        amounts in arb_amounts(),
        first_row in 0usize..5,
        max_results in 0usize..8,
    ) {
        let query = Query::builder("Sale")
            .order_desc("amount")
            .first_row(first_row)
            .max_results(max_results)
            .build()
            .unwrap();
        let collector = Collector::for_query(&query, entity(), 1_000);
        for (reference, record) in sales(&amounts) {
            collector.collect(reference, record).unwrap();
            prop_assert!(collector.retained() <= first_row + max_results);
        }
        let results = collector.finalize_results();
        prop_assert_eq!(results.number_of_results, amounts.len());

        let mut expected: Vec<(usize, i64)> = amounts.iter().map(|(a, _)| *a).enumerate().collect();
        expected.sort_by(|a, b| b.1.cmp(&a.1));
        let expected: Vec<Value> = expected
            .into_iter()
            .skip(first_row)
            .take(max_results)
            .map(|(i, _)| Value::Int(i as i64))
            .collect();
        let CollectedItems::Records(records) = results.items else {
            panic!("plain query yields records");
        };
        let got: Vec<Value> = records.iter().map(|(_, r)| r.identifier().clone()).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_group_counts_cover_every_record(amounts in arb_amounts()) {
        let query = Query::builder("Sale")
            .select("region")
            .count_all()
            .sum("amount")
            .group_by("region")
            .build()
            .unwrap();
        let collector = Collector::for_query(&query, entity(), 1_000);
        for (reference, record) in sales(&amounts) {
            collector.collect(reference, record).unwrap();
        }
        let results = collector.finalize_results();
        let CollectedItems::Rows(rows) = results.items else {
            panic!("grouping query yields rows");
        };
        let distinct: BTreeSet<&String> = amounts.iter().map(|(_, r)| r).collect();
        prop_assert_eq!(rows.len(), distinct.len());

        let counted: i64 = rows
            .iter()
            .map(|row| match row["count(*)"] {
                Value::Int(n) => n,
                _ => 0,
            })
            .sum();
        prop_assert_eq!(counted, amounts.len() as i64);
        let summed: i64 = rows
            .iter()
            .map(|row| match row["sum(amount)"] {
                Value::Int(n) => n,
                _ => 0,
            })
            .sum();
        prop_assert_eq!(summed, amounts.iter().map(|(a, _)| a).sum::<i64>());
    }

    #[test]
    fn prop_retention_is_capped(count in 0usize..50, cap in 0usize..20) {
        let query = Query::builder("Sale").build().unwrap();
        let amounts: Vec<(i64, String)> = (0..count).map(|i| (i as i64, "a".to_owned())).collect();
        let collector = Collector::for_query(&query, entity(), cap);
        for (reference, record) in sales(&amounts) {
            collector.collect(reference, record).unwrap();
        }
        let results = collector.finalize_results();
        match results.cached_references {
            Some(references) => {
                prop_assert!(count <= cap);
                prop_assert_eq!(references.len(), count);
            }
            None => prop_assert!(count > cap),
        }
    }
}
