//! Demo command implementation.
//!
//! Each scenario runs a short scripted workload and records, after every
//! step, what an index holds at the latest commit.

use super::{CliError, OutputFormat};
use serde::Serialize;
use vinedb_core::{
    CollectionId, CoreResult, Database, RecordId, SessionState, StatsSnapshot,
};
use vinedb_testkit::{committed_entries, scenarios};

/// One step of a scenario.
#[derive(Debug, Serialize)]
pub struct DemoStep {
    /// What the step did.
    pub action: String,
    /// `ok`, or the error the engine returned.
    pub outcome: String,
    /// `key -> record` pairs of the watched index after the step.
    pub entries: Vec<String>,
}

/// Scenario report.
#[derive(Debug, Serialize)]
pub struct DemoReport {
    /// Scenario name.
    pub scenario: String,
    /// Index shown after each step.
    pub index: String,
    /// Steps in order.
    pub steps: Vec<DemoStep>,
    /// Engine counters at the end.
    pub stats: StatsSnapshot,
}

struct Recorder<'a> {
    db: &'a Database,
    index: &'static str,
    steps: Vec<DemoStep>,
}

impl<'a> Recorder<'a> {
    fn new(db: &'a Database, index: &'static str) -> Self {
        Self {
            db,
            index,
            steps: Vec::new(),
        }
    }

    fn step<T>(&mut self, action: &str, result: CoreResult<T>) -> Option<T> {
        let (outcome, value) = match result {
            Ok(value) => ("ok".to_string(), Some(value)),
            Err(err) => (err.to_string(), None),
        };
        let entries = committed_entries(self.db, self.index)
            .into_iter()
            .map(|(key, rid)| format!("{key} -> {rid}"))
            .collect();
        self.steps.push(DemoStep {
            action: action.to_string(),
            outcome,
            entries,
        });
        value
    }

    fn finish(self, scenario: &str) -> DemoReport {
        DemoReport {
            scenario: scenario.to_string(),
            index: self.index.to_string(),
            steps: self.steps,
            stats: self.db.stats(),
        }
    }
}

/// Runs the demo command.
pub fn run(scenario: &str, format: OutputFormat) -> Result<(), CliError> {
    let report = match scenario {
        "tags" => tags(),
        "graph" => graph(),
        "unique" => unique(),
        "nested" => nested(),
        other => return Err(CliError::UnknownScenario(other.to_string())),
    };

    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => tracing::error!(error = %err, "failed to serialize report"),
        },
        OutputFormat::Text => print_text_output(&report),
    }
    Ok(())
}

fn tags() -> DemoReport {
    let db = scenarios::tagged_database();
    let mut rec = Recorder::new(&db, "Doc.tags");

    let rid = rec.step(
        "insert doc with tags [db, rust]",
        db.transaction(|txn| {
            let record = txn.new_record("Doc")?;
            let mut tags = record.list_mut("tags")?;
            tags.push("db");
            tags.push("rust");
            drop(tags);
            Ok(record.id())
        }),
    );
    if let Some(rid) = rid {
        rec.step(
            "push and remove 'tmp', append a second 'rust'",
            db.transaction(|txn| {
                let mut tags = txn.load(rid)?.list_mut("tags")?;
                tags.push("tmp");
                tags.remove_value(&"tmp".into());
                tags.push("rust");
                Ok(())
            }),
        );
        rec.step(
            "remove the first 'rust'",
            db.transaction(|txn| {
                txn.load(rid)?
                    .list_mut("tags")?
                    .remove_value(&"rust".into());
                Ok(())
            }),
        );
        rec.step("delete the doc", db.transaction(|txn| txn.delete(rid)));
    }
    rec.finish("tags")
}

fn graph() -> DemoReport {
    let db = scenarios::graph_database();
    let mut rec = Recorder::new(&db, "Vertex.edges");
    let far = |p| RecordId::new(CollectionId::new(99), p);

    let rid = rec.step(
        "add edge to #99:1 and paired edge #99:2 -> #99:3",
        db.transaction(|txn| {
            let record = txn.new_record("Vertex")?;
            let mut edges = record.link_bag_mut("edges")?;
            edges.add(far(1));
            edges.add_pair(far(2), far(3));
            drop(edges);
            Ok(record.id())
        }),
    );
    if let Some(rid) = rid {
        rec.step(
            "remove the paired edge by its primary #99:2",
            db.transaction(|txn| {
                txn.load(rid)?.link_bag_mut("edges")?.remove(far(2));
                Ok(())
            }),
        );
    }
    rec.finish("graph")
}

fn unique() -> DemoReport {
    let db = scenarios::people_database();
    let mut rec = Recorder::new(&db, "Person.name");

    let ids = rec.step(
        "insert ann and bob",
        db.transaction(|txn| {
            let mut ids = Vec::new();
            for name in ["ann", "bob"] {
                let record = txn.new_record("Person")?;
                record.set_property("name", name);
                ids.push(record.id());
            }
            Ok(ids)
        }),
    );
    if let Some(ids) = ids {
        rec.step(
            "swap their names in one transaction",
            db.transaction(|txn| {
                txn.load(ids[0])?.set_property("name", "bob");
                txn.load(ids[1])?.set_property("name", "ann");
                Ok(())
            }),
        );
        rec.step(
            "rename both to 'cy'",
            db.transaction(|txn| {
                for &rid in &ids {
                    txn.load(rid)?.set_property("name", "cy");
                }
                Ok(())
            }),
        );
    }
    rec.finish("unique")
}

fn nested() -> DemoReport {
    let db = scenarios::people_database();
    let mut rec = Recorder::new(&db, "Person.name");
    let mut session = db.session();

    rec.step("begin (depth 1)", session.begin());
    rec.step(
        "insert 'outer'",
        session
            .transaction()
            .and_then(|txn| Ok(txn.new_record("Person")?.set_property("name", "outer"))),
    );
    rec.step("begin (depth 2)", session.begin());
    rec.step("rollback at depth 2", session.rollback());
    rec.step("begin after nested rollback", session.begin());
    rec.step("commit the outer scope", session.commit());
    debug_assert_eq!(session.state(), SessionState::Idle);
    rec.step("begin a fresh transaction", session.begin());
    rec.step(
        "insert 'fresh'",
        session
            .transaction()
            .and_then(|txn| Ok(txn.new_record("Person")?.set_property("name", "fresh"))),
    );
    rec.step("commit", session.commit());
    rec.finish("nested")
}

fn print_text_output(report: &DemoReport) {
    println!("=== Scenario: {} (index {}) ===", report.scenario, report.index);
    for (i, step) in report.steps.iter().enumerate() {
        println!("\n{}. {} [{}]", i + 1, step.action, step.outcome);
        if step.entries.is_empty() {
            println!("   (index empty)");
        }
        for entry in &step.entries {
            println!("   {entry}");
        }
    }
    println!(
        "\nCommitted: {}  Rolled back: {}  Conflicts: {}  Uniqueness violations: {}",
        report.stats.transactions_committed,
        report.stats.transactions_rolled_back,
        report.stats.conflicts,
        report.stats.uniqueness_violations
    );
}
