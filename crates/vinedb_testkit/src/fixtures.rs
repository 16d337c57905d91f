//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases,
//! common schemas and logging.

use std::sync::Once;
use vinedb_core::{
    Config, Database, ExtractionMode, IndexDefinition, IndexField, IndexKey, IndexKind,
    IndexType, PropertyType, RecordId, Value,
};

/// A test database.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a test database with a custom configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            db: Database::open_with_config(config).expect("Failed to open in-memory database"),
        }
    }

    /// Creates a class, panicking on failure.
    pub fn class(self, name: &str) -> Self {
        self.db.create_class(name).expect("Failed to create class");
        self
    }

    /// Creates an index, panicking on failure.
    pub fn index(self, definition: IndexDefinition) -> Self {
        self.db.create_index(definition).expect("Failed to create index");
        self
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use vinedb_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         db.create_class("Person").unwrap();
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

static LOGGING: Once = Once::new();

/// Installs a `tracing` subscriber writing through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
/// Honors `RUST_LOG`, defaulting to `warn`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Index definition builders.
pub mod schema {
    use super::*;

    /// A single-property index.
    pub fn property_index(
        name: &str,
        class: &str,
        property: &str,
        key_type: PropertyType,
        index_type: IndexType,
    ) -> IndexDefinition {
        IndexDefinition::new(
            name,
            class,
            IndexKind::Property(IndexField::new(property, key_type)),
            index_type,
        )
        .expect("Invalid property index")
    }

    /// A composite index over scalar properties.
    pub fn composite_index(
        name: &str,
        class: &str,
        fields: &[(&str, PropertyType)],
        index_type: IndexType,
    ) -> IndexDefinition {
        IndexDefinition::new(
            name,
            class,
            IndexKind::Composite(
                fields
                    .iter()
                    .map(|(path, key_type)| IndexField::new(*path, *key_type))
                    .collect(),
            ),
            index_type,
        )
        .expect("Invalid composite index")
    }

    /// An index over the items of a collection property.
    pub fn collection_index(
        name: &str,
        class: &str,
        property: &str,
        item_type: PropertyType,
        mode: ExtractionMode,
        index_type: IndexType,
    ) -> IndexDefinition {
        IndexDefinition::new(
            name,
            class,
            IndexKind::Collection(IndexField::collection(property, item_type, mode)),
            index_type,
        )
        .expect("Invalid collection index")
    }

    /// An index over the identities held by a LinkBag property.
    pub fn link_bag_index(name: &str, class: &str, property: &str) -> IndexDefinition {
        IndexDefinition::new(
            name,
            class,
            IndexKind::LinkBag(IndexField::collection(
                property,
                PropertyType::Link,
                ExtractionMode::Elements,
            )),
            IndexType::NotUnique,
        )
        .expect("Invalid LinkBag index")
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// `Person` with a unique `name` index and a non-unique `age` index.
    pub fn people_database() -> TestDatabase {
        TestDatabase::memory()
            .class("Person")
            .index(schema::property_index(
                "Person.name",
                "Person",
                "name",
                PropertyType::String,
                IndexType::Unique,
            ))
            .index(schema::property_index(
                "Person.age",
                "Person",
                "age",
                PropertyType::Integer,
                IndexType::NotUnique,
            ))
    }

    /// `Doc` with a non-unique index over the elements of `tags`.
    pub fn tagged_database() -> TestDatabase {
        TestDatabase::memory()
            .class("Doc")
            .index(schema::collection_index(
                "Doc.tags",
                "Doc",
                "tags",
                PropertyType::String,
                ExtractionMode::Elements,
                IndexType::NotUnique,
            ))
    }

    /// `Vertex` with a LinkBag index over `edges`.
    pub fn graph_database() -> TestDatabase {
        TestDatabase::memory()
            .class("Vertex")
            .index(schema::link_bag_index("Vertex.edges", "Vertex", "edges"))
    }

    /// Inserts one record per value of `property` in a single transaction.
    pub fn insert_values<V>(db: &Database, class: &str, property: &str, values: V) -> Vec<RecordId>
    where
        V: IntoIterator,
        V::Item: Into<Value>,
    {
        db.transaction(|txn| {
            let mut ids = Vec::new();
            for value in values {
                let record = txn.new_record(class)?;
                record.set_property(property, value);
                ids.push(record.id());
            }
            Ok(ids)
        })
        .expect("Failed to insert records")
    }
}

/// Committed (key, record) pairs of an index, in key order.
pub fn committed_entries(db: &Database, index: &str) -> Vec<(IndexKey, RecordId)> {
    let index = db.index(index).expect("Unknown index");
    let mut txn = db.begin().expect("Failed to begin");
    let op = txn.atomic_operation().expect("Failed to flush");
    let keys = index.stream_keys(op);
    index
        .stream_entries(op, &keys, true)
        .expect("Failed to stream entries")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database() {
        let test_db = TestDatabase::memory().class("Person");
        assert_eq!(test_db.classes(), vec!["Person".to_string()]);
    }

    #[test]
    fn test_with_temp_db() {
        with_temp_db(|db| {
            assert!(db.is_open());
            assert_eq!(db.active_transactions(), 0);
        });
    }

    #[test]
    fn test_people_scenario() {
        init_test_logging();
        let db = scenarios::people_database();
        scenarios::insert_values(&db, "Person", "name", ["ann", "bob"]);
        let entries = committed_entries(&db, "Person.name");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, IndexKey::single("ann"));
    }

    #[test]
    fn test_init_logging_twice() {
        init_test_logging();
        init_test_logging();
    }
}
