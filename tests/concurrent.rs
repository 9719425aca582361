use penumbra::{
    AttributeType, CascadePolicy, Db, DbOptions, EntityDescriptor, Predicate, Query,
    QueryListener, Record, RelationshipDescriptor, Result, SchemaContext, Value,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const NUM_THREADS: usize = 8;
const OPERATIONS_PER_THREAD: usize = 200;
const BOARDS: i64 = 4;
const TICKETS: i64 = 32;

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
                    .attribute("state", AttributeType::String)
                    .relationship(RelationshipDescriptor::to_one("board", "Board").inverse("tickets")),
            )
            .build()
            .expect("schema"),
    )
}

fn open_db() -> Arc<Db> {
    Arc::new(
        Db::open(
            tracker_schema(),
            DbOptions::default().lock_stripes(16).parallel_scan(true),
        )
        .expect("open"),
    )
}

fn ids(db: &Db, record: &Record, relationship: &str) -> BTreeSet<Value> {
    db.relationship_references(record, relationship)
        .expect("references")
        .into_iter()
        .map(|r| r.identifier().clone())
        .collect()
}

/// Every ticket has at most one board, and both sides agree.
fn assert_symmetric(db: &Db) {
    let mut owners = BTreeSet::new();
    for board in 0..BOARDS {
        let board_record = Record::new("Board", board);
        for ticket in ids(db, &board_record, "tickets") {
            assert!(owners.insert(ticket.clone()), "ticket {ticket} on two boards");
            let back = ids(db, &Record::new("Ticket", ticket.clone()), "board");
            assert_eq!(back, BTreeSet::from([Value::Int(board)]));
        }
    }
    for ticket in 0..TICKETS {
        let back = ids(db, &Record::new("Ticket", ticket), "board");
        assert!(back.len() <= 1);
        if back.is_empty() {
            assert!(!owners.contains(&Value::Int(ticket)));
        }
    }
}

#[test]
fn concurrent_parent_saves_stay_symmetric() -> Result<()> {
    let db = open_db();
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let mut handles = vec![];

    for thread_id in 0..NUM_THREADS {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            let board = thread_id as i64 + 100;
            let tickets = (0..10)
                .map(|i| Record::new("Ticket", board * 1_000 + i).with("state", "open"))
                .collect();
            let mut record = Record::new("Board", board).with_many("tickets", tickets);
            db.save(&mut record).map(|_| ())
        }));
    }
    for handle in handles {
        handle.join().expect("thread panicked")?;
    }

    for thread_id in 0..NUM_THREADS {
        let board = Record::new("Board", thread_id as i64 + 100);
        assert_eq!(ids(&db, &board, "tickets").len(), 10);
    }
    let all = Query::builder("Ticket").build()?;
    assert_eq!(db.count(&all)?, NUM_THREADS * 10);
    Ok(())
}

#[test]
fn concurrent_moves_never_leave_a_child_with_two_parents() -> Result<()> {
    let db = open_db();
    for board in 0..BOARDS {
        db.save(&mut Record::new("Board", board))?;
    }
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let mut handles = vec![];

    for thread_id in 0..NUM_THREADS {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            let mut rng = ChaCha8Rng::seed_from_u64(thread_id as u64);
            barrier.wait();
            for _ in 0..OPERATIONS_PER_THREAD {
                let ticket = rng.gen_range(0..TICKETS);
                let board = rng.gen_range(0..BOARDS);
                if rng.gen_bool(0.8) {
                    // Attach from the to-one side.
                    let mut record = Record::new("Ticket", ticket)
                        .with("state", "open")
                        .with_one("board", Some(Record::new("Board", board)));
                    db.save(&mut record)?;
                } else {
                    // Attach from the to-many side; the board keeps only this ticket.
                    let mut parent = Record::new("Board", board).with_many(
                        "tickets",
                        vec![Record::new("Ticket", ticket).with("state", "open")],
                    );
                    db.save(&mut parent)?;
                }
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().expect("thread panicked")?;
    }

    assert_symmetric(&db);
    Ok(())
}

#[derive(Default)]
struct Counter {
    added: AtomicUsize,
    removed: AtomicUsize,
}

impl QueryListener for Counter {
    fn on_item_added(&self, _: &Record) {
        self.added.fetch_add(1, Ordering::SeqCst);
    }

    fn on_item_updated(&self, _: &Record) {}

    fn on_item_removed(&self, _: &Record) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn listeners_and_queries_run_alongside_writers() -> Result<()> {
    let db = open_db();
    let counter = Arc::new(Counter::default());
    let open = Query::builder("Ticket")
        .filter(Predicate::eq("state", "open"))
        .build()?;
    db.listen(&open, counter.clone())?;

    let barrier = Arc::new(Barrier::new(NUM_THREADS + 1));
    let mut handles = vec![];
    for thread_id in 0..NUM_THREADS {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            for i in 0..OPERATIONS_PER_THREAD {
                let id = (thread_id * OPERATIONS_PER_THREAD + i) as i64;
                db.save(&mut Record::new("Ticket", id).with("state", "open"))?;
                if i % 2 == 0 {
                    db.save(&mut Record::new("Ticket", id).with("state", "closed"))?;
                }
            }
            Ok(())
        }));
    }

    let reader = {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        let open = open.clone();
        thread::spawn(move || -> Result<()> {
            barrier.wait();
            for _ in 0..20 {
                let result = db.execute(&open)?;
                assert!(result.number_of_results <= NUM_THREADS * OPERATIONS_PER_THREAD);
            }
            Ok(())
        })
    };

    for handle in handles {
        handle.join().expect("writer panicked")?;
    }
    reader.join().expect("reader panicked")?;

    let total = NUM_THREADS * OPERATIONS_PER_THREAD;
    assert_eq!(counter.added.load(Ordering::SeqCst), total);
    assert_eq!(counter.removed.load(Ordering::SeqCst), total / 2);
    assert_eq!(db.count(&open)?, total / 2);

    let signature = open.signature()?;
    let entry = db.cache().get(signature).expect("live");
    assert_eq!(entry.references().map(|refs| refs.len()), Some(total / 2));
    Ok(())
}
