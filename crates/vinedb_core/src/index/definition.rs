//! Index definitions: which keys a record produces.

use super::collate::Collation;
use super::key::IndexKey;
use crate::error::{CoreError, CoreResult};
use crate::record::PropertySource;
use crate::value::{PropertyType, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Uniqueness policy and storage layout of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    /// Ordered, at most one record per key.
    Unique,
    /// Ordered, any number of records per key.
    NotUnique,
    /// Hashed, at most one record per key. No range queries.
    UniqueHash,
    /// Hashed, any number of records per key. No range queries.
    NotUniqueHash,
}

impl IndexType {
    /// Returns true if a key may map to at most one record.
    #[must_use]
    pub const fn is_unique(self) -> bool {
        matches!(self, IndexType::Unique | IndexType::UniqueHash)
    }

    /// Returns true for hashed layouts.
    #[must_use]
    pub const fn is_hash(self) -> bool {
        matches!(self, IndexType::UniqueHash | IndexType::NotUniqueHash)
    }

    /// Returns the canonical name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            IndexType::Unique => "UNIQUE",
            IndexType::NotUnique => "NOTUNIQUE",
            IndexType::UniqueHash => "UNIQUE_HASH_INDEX",
            IndexType::NotUniqueHash => "NOTUNIQUE_HASH_INDEX",
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UNIQUE" => Ok(IndexType::Unique),
            "NOTUNIQUE" => Ok(IndexType::NotUnique),
            "UNIQUE_HASH_INDEX" => Ok(IndexType::UniqueHash),
            "NOTUNIQUE_HASH_INDEX" => Ok(IndexType::NotUniqueHash),
            other => Err(format!("unknown index type '{other}'")),
        }
    }
}

/// What a collection-valued field contributes to the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionMode {
    /// One key per list or set element (map values for maps).
    Elements,
    /// One key per map key.
    MapKeys,
    /// One key per map value.
    MapValues,
}

/// One indexed property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexField {
    path: String,
    key_type: PropertyType,
    collation: Collation,
    extraction: Option<ExtractionMode>,
}

impl IndexField {
    /// A scalar field. `path` may be dotted to reach into embedded records.
    pub fn new(path: impl Into<String>, key_type: PropertyType) -> Self {
        Self {
            path: path.into(),
            key_type,
            collation: Collation::Default,
            extraction: None,
        }
    }

    /// A collection field contributing one key per extracted item, each
    /// converted to `item_type`.
    pub fn collection(path: impl Into<String>, item_type: PropertyType, mode: ExtractionMode) -> Self {
        Self {
            path: path.into(),
            key_type: item_type,
            collation: Collation::Default,
            extraction: Some(mode),
        }
    }

    /// Sets the collation.
    #[must_use]
    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }

    /// Returns the property path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the top-level property the path starts at.
    #[must_use]
    pub fn root(&self) -> &str {
        self.path.split('.').next().unwrap_or(&self.path)
    }

    /// Returns true if the path reaches into an embedded record.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.path.contains('.')
    }

    /// Returns the key type (the item type for collection fields).
    #[must_use]
    pub fn key_type(&self) -> PropertyType {
        self.key_type
    }

    /// Returns the collation.
    #[must_use]
    pub fn collation(&self) -> Collation {
        self.collation
    }

    /// Returns the extraction mode of a collection field.
    #[must_use]
    pub fn extraction(&self) -> Option<ExtractionMode> {
        self.extraction
    }

    /// Returns true for collection fields.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.extraction.is_some()
    }

    pub(crate) fn resolve<'a, S: PropertySource + ?Sized>(&self, source: &'a S) -> Option<&'a Value> {
        let mut parts = self.path.split('.');
        let mut value = source.property(parts.next()?)?;
        for part in parts {
            value = value.as_embedded()?.get(part)?;
        }
        Some(value)
    }

    /// Converts one value to this field's key form.
    fn key_value(&self, index: &str, value: &Value) -> CoreResult<Value> {
        let target = self.key_target();
        let converted = target
            .convert(value)
            .ok_or_else(|| CoreError::key_conversion(index, value.to_string(), target.name()))?;
        Ok(self.collation.apply(converted))
    }

    fn key_target(&self) -> PropertyType {
        if self.key_type.is_collection() {
            PropertyType::Any
        } else {
            self.key_type
        }
    }

    /// Returns true if, among the items of `container`, only those equal
    /// to `item` produce its key.
    pub(crate) fn is_exact_item(&self, container: &Value, item: &Value) -> bool {
        if self.collation != Collation::Default && matches!(item, Value::String(_)) {
            return false;
        }
        match (container, self.key_target()) {
            (_, PropertyType::Any) => true,
            (Value::Map(_), PropertyType::String) => self.extraction == Some(ExtractionMode::MapKeys),
            (Value::LinkBag(_), PropertyType::Link) => true,
            _ => false,
        }
    }

    /// Returns true if `container` still holds an item equal to `item`.
    pub(crate) fn holds_item(&self, container: &Value, item: &Value) -> bool {
        match (container, item) {
            (Value::List(l), _) => l.contains(item),
            (Value::Set(s), _) => s.contains(item),
            (Value::Map(m), Value::String(key)) if self.extraction == Some(ExtractionMode::MapKeys) => {
                m.contains_key(key)
            }
            (Value::Map(m), _) => m.contains_value(item),
            (Value::LinkBag(b), Value::Link(rid)) => b.references(*rid),
            (Value::LinkBag(_), _) => false,
            (scalar, _) => scalar == item,
        }
    }

    pub(crate) fn items(&self, value: &Value) -> Vec<Value> {
        match value {
            Value::Null => Vec::new(),
            Value::List(l) => l.iter().cloned().collect(),
            Value::Set(s) => s.iter().cloned().collect(),
            Value::Map(m) => match self.extraction {
                Some(ExtractionMode::MapKeys) => {
                    m.keys().map(|k| Value::String(k.clone())).collect()
                }
                _ => m.values().cloned().collect(),
            },
            Value::LinkBag(b) => b.iter().flat_map(|e| e.links()).map(Value::Link).collect(),
            scalar => vec![scalar.clone()],
        }
    }
}

/// Shape of an index: how fields combine into keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKind {
    /// One scalar property.
    Property(IndexField),
    /// Several properties, compared in order. At most one may be a
    /// collection field; it contributes one key per item.
    Composite(Vec<IndexField>),
    /// One key per item of a list, set or map.
    Collection(IndexField),
    /// One key per identity held in a LinkBag. Paired entries contribute
    /// both their primary and secondary identity.
    LinkBag(IndexField),
}

/// Full description of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    name: String,
    class: String,
    kind: IndexKind,
    index_type: IndexType,
    ignore_null_values: Option<bool>,
}

impl IndexDefinition {
    /// Creates a definition, validating the field layout.
    pub fn new(
        name: impl Into<String>,
        class: impl Into<String>,
        kind: IndexKind,
        index_type: IndexType,
    ) -> CoreResult<Self> {
        let kind = match kind {
            IndexKind::Composite(fields) => {
                if fields.is_empty() {
                    return Err(CoreError::invalid_operation("composite index without fields"));
                }
                if fields.iter().filter(|f| f.is_collection()).count() > 1 {
                    return Err(CoreError::invalid_operation(
                        "composite index with more than one collection field",
                    ));
                }
                IndexKind::Composite(fields)
            }
            IndexKind::Collection(field) => IndexKind::Collection(with_default_extraction(field)),
            IndexKind::LinkBag(field) => IndexKind::LinkBag(with_default_extraction(field)),
            IndexKind::Property(field) if field.is_collection() => {
                return Err(CoreError::invalid_operation(format!(
                    "property index on collection field '{}'",
                    field.path
                )));
            }
            property => property,
        };
        Ok(Self {
            name: name.into(),
            class: class.into(),
            kind,
            index_type,
            ignore_null_values: None,
        })
    }

    /// Sets the null policy. Without it the database default applies.
    #[must_use]
    pub fn with_ignore_null_values(mut self, ignore: bool) -> Self {
        self.ignore_null_values = Some(ignore);
        self
    }

    pub(crate) fn apply_default_null_policy(&mut self, ignore: bool) {
        self.ignore_null_values.get_or_insert(ignore);
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the indexed class.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Returns the index shape.
    #[must_use]
    pub fn kind(&self) -> &IndexKind {
        &self.kind
    }

    /// Returns the index type.
    #[must_use]
    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Returns true if records with null key parts are left out.
    #[must_use]
    pub fn ignore_null_values(&self) -> bool {
        self.ignore_null_values.unwrap_or(false)
    }

    /// Returns the fields in key order.
    #[must_use]
    pub fn fields(&self) -> &[IndexField] {
        match &self.kind {
            IndexKind::Property(f) | IndexKind::Collection(f) | IndexKind::LinkBag(f) => {
                std::slice::from_ref(f)
            }
            IndexKind::Composite(fields) => fields,
        }
    }

    /// Returns true if changing `property` may change this index's keys.
    #[must_use]
    pub fn depends_on(&self, property: &str) -> bool {
        self.fields().iter().any(|f| f.root() == property)
    }

    /// The collection field and its position in the key, if any.
    #[must_use]
    pub fn collection_field(&self) -> Option<(usize, &IndexField)> {
        self.fields()
            .iter()
            .enumerate()
            .find(|(_, f)| f.is_collection())
    }

    /// Every key `source` produces under this definition.
    pub fn keys_for<S: PropertySource + ?Sized>(&self, source: &S) -> CoreResult<BTreeSet<IndexKey>> {
        match &self.kind {
            IndexKind::Property(field) => self.property_keys(field, source),
            IndexKind::Composite(fields) => self.composite_keys(fields, source, None),
            IndexKind::Collection(field) | IndexKind::LinkBag(field) => {
                let Some(value) = field.resolve(source) else {
                    return Ok(BTreeSet::new());
                };
                let mut keys = BTreeSet::new();
                for item in field.items(value) {
                    if let Some(key) = self.item_key(field, &item)? {
                        keys.insert(key);
                    }
                }
                Ok(keys)
            }
        }
    }

    /// Keys contributed by one collection item, with the other fields of
    /// a composite taken from `source`.
    pub(crate) fn keys_for_item<S: PropertySource + ?Sized>(
        &self,
        source: &S,
        item: &Value,
    ) -> CoreResult<BTreeSet<IndexKey>> {
        match &self.kind {
            IndexKind::Property(_) => Err(CoreError::invalid_operation(format!(
                "index '{}' has no collection field",
                self.name
            ))),
            IndexKind::Composite(fields) => self.composite_keys(fields, source, Some(item)),
            IndexKind::Collection(field) | IndexKind::LinkBag(field) => {
                Ok(self.item_key(field, item)?.into_iter().collect())
            }
        }
    }

    /// Converts a caller-supplied (possibly partial) key to stored form.
    pub fn normalize_key(&self, key: &IndexKey) -> CoreResult<IndexKey> {
        let fields = self.fields();
        if key.len() > fields.len() {
            return Err(CoreError::invalid_operation(format!(
                "key {key} has more fields than index '{}'",
                self.name
            )));
        }
        key.fields()
            .iter()
            .zip(fields)
            .map(|(value, field)| field.key_value(&self.name, value))
            .collect::<CoreResult<Vec<_>>>()
            .map(IndexKey::new)
    }

    pub(crate) fn set_collation(&mut self, path: &str, collation: Collation) -> CoreResult<()> {
        let name = self.name.clone();
        let field = match &mut self.kind {
            IndexKind::Property(f) | IndexKind::Collection(f) | IndexKind::LinkBag(f) => {
                Some(f).filter(|f| f.path == path)
            }
            IndexKind::Composite(fields) => fields.iter_mut().find(|f| f.path == path),
        };
        match field {
            Some(field) => {
                field.collation = collation;
                Ok(())
            }
            None => Err(CoreError::PropertyNotIndexed {
                index: name,
                property: path.to_string(),
            }),
        }
    }

    fn property_keys<S: PropertySource + ?Sized>(
        &self,
        field: &IndexField,
        source: &S,
    ) -> CoreResult<BTreeSet<IndexKey>> {
        let value = field.resolve(source).unwrap_or(&Value::Null);
        if value.is_null() && self.ignore_null_values() {
            return Ok(BTreeSet::new());
        }
        let key = IndexKey::single(field.key_value(&self.name, value)?);
        Ok(BTreeSet::from([key]))
    }

    fn item_key(&self, field: &IndexField, item: &Value) -> CoreResult<Option<IndexKey>> {
        if item.is_null() && self.ignore_null_values() {
            return Ok(None);
        }
        Ok(Some(IndexKey::single(field.key_value(&self.name, item)?)))
    }

    /// Builds composite keys. With `only_item`, the collection field
    /// contributes just that item instead of its full contents.
    fn composite_keys<S: PropertySource + ?Sized>(
        &self,
        fields: &[IndexField],
        source: &S,
        only_item: Option<&Value>,
    ) -> CoreResult<BTreeSet<IndexKey>> {
        let ignore_nulls = self.ignore_null_values();
        let mut parts: Vec<Vec<Value>> = Vec::with_capacity(fields.len());
        for field in fields {
            let raw: Vec<Value> = if field.is_collection() {
                match (only_item, field.resolve(source)) {
                    (Some(item), _) => vec![item.clone()],
                    (None, None | Some(Value::Null)) => vec![Value::Null],
                    (None, Some(value)) => field.items(value),
                }
            } else {
                vec![field.resolve(source).cloned().unwrap_or(Value::Null)]
            };
            let mut converted = Vec::with_capacity(raw.len());
            for value in &raw {
                if value.is_null() && ignore_nulls {
                    continue;
                }
                converted.push(field.key_value(&self.name, value)?);
            }
            if converted.is_empty() {
                return Ok(BTreeSet::new());
            }
            parts.push(converted);
        }

        let mut keys: Vec<Vec<Value>> = vec![Vec::with_capacity(fields.len())];
        for part in parts {
            if let [single] = part.as_slice() {
                for key in &mut keys {
                    key.push(single.clone());
                }
            } else {
                keys = keys
                    .into_iter()
                    .flat_map(|prefix| {
                        part.iter().map(move |v| {
                            let mut key = prefix.clone();
                            key.push(v.clone());
                            key
                        })
                    })
                    .collect();
            }
        }
        Ok(keys.into_iter().map(IndexKey::new).collect())
    }
}

fn with_default_extraction(mut field: IndexField) -> IndexField {
    field.extraction.get_or_insert(ExtractionMode::Elements);
    field
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracked::{LinkBag, TrackedList, TrackedMap};
    use crate::types::{CollectionId, RecordId};
    use crate::value::{EmbeddedRecord, PropertyMap};

    fn props(entries: &[(&str, Value)]) -> PropertyMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn composite(ignore_nulls: bool) -> IndexDefinition {
        IndexDefinition::new(
            "c",
            "Doc",
            IndexKind::Composite(vec![
                IndexField::new("f1", PropertyType::Integer),
                IndexField::new("f2", PropertyType::Integer),
                IndexField::new("f3", PropertyType::Integer),
            ]),
            IndexType::NotUnique,
        )
        .unwrap()
        .with_ignore_null_values(ignore_nulls)
    }

    #[test]
    fn composite_null_is_indexed_unless_ignored() {
        let source = props(&[("f1", 1.into()), ("f2", 2.into())]);
        let keys = composite(false).keys_for(&source).unwrap();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec![IndexKey::new(vec![1.into(), 2.into(), Value::Null])]
        );
        assert!(composite(true).keys_for(&source).unwrap().is_empty());
    }

    #[test]
    fn collection_produces_one_key_per_distinct_item() {
        let def = IndexDefinition::new(
            "tags",
            "Doc",
            IndexKind::Collection(IndexField::collection(
                "tags",
                PropertyType::String,
                ExtractionMode::Elements,
            )),
            IndexType::NotUnique,
        )
        .unwrap();
        let list: TrackedList = ["a", "b", "a"].into_iter().collect();
        let keys = def.keys_for(&props(&[("tags", Value::List(list))])).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(def.keys_for(&PropertyMap::new()).unwrap().is_empty());
    }

    #[test]
    fn map_extraction_modes() {
        let map: TrackedMap = [("k1", "v1"), ("k2", "v2")].into_iter().collect();
        let source = props(&[("m", Value::Map(map))]);
        let by_key = IndexDefinition::new(
            "mk",
            "Doc",
            IndexKind::Collection(IndexField::collection("m", PropertyType::String, ExtractionMode::MapKeys)),
            IndexType::NotUnique,
        )
        .unwrap();
        let by_value = IndexDefinition::new(
            "mv",
            "Doc",
            IndexKind::Collection(IndexField::collection(
                "m",
                PropertyType::String,
                ExtractionMode::MapValues,
            )),
            IndexType::NotUnique,
        )
        .unwrap();
        assert!(by_key.keys_for(&source).unwrap().contains(&IndexKey::single("k1")));
        assert!(by_value.keys_for(&source).unwrap().contains(&IndexKey::single("v2")));
    }

    #[test]
    fn link_bag_indexes_both_halves_of_pairs() {
        let rid = |p| RecordId::new(CollectionId::new(4), p);
        let mut bag = LinkBag::new();
        bag.add(rid(1));
        bag.add_pair(rid(2), rid(3));
        let def = IndexDefinition::new(
            "out",
            "V",
            IndexKind::LinkBag(IndexField::collection("out", PropertyType::Link, ExtractionMode::Elements)),
            IndexType::NotUnique,
        )
        .unwrap();
        let keys = def.keys_for(&props(&[("out", Value::LinkBag(bag))])).unwrap();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn unconvertible_value_is_key_conversion() {
        let def = IndexDefinition::new(
            "age",
            "Person",
            IndexKind::Property(IndexField::new("age", PropertyType::Integer)),
            IndexType::NotUnique,
        )
        .unwrap();
        let err = def.keys_for(&props(&[("age", "tt".into())])).unwrap_err();
        assert!(matches!(err, CoreError::KeyConversion { .. }));
        let keys = def.keys_for(&props(&[("age", "42".into())])).unwrap();
        assert!(keys.contains(&IndexKey::single(42)));
    }

    #[test]
    fn nested_path_reads_embedded_record() {
        let def = IndexDefinition::new(
            "city",
            "Person",
            IndexKind::Property(
                IndexField::new("address.city", PropertyType::String)
                    .with_collation(Collation::CaseInsensitive),
            ),
            IndexType::NotUnique,
        )
        .unwrap();
        let address = EmbeddedRecord::new().with("city", "Rome");
        let keys = def.keys_for(&props(&[("address", address.into())])).unwrap();
        assert!(keys.contains(&IndexKey::single("rome")));
        assert!(def.depends_on("address"));
    }

    #[test]
    fn composite_with_collection_field_multiplies_keys() {
        let def = IndexDefinition::new(
            "ct",
            "Doc",
            IndexKind::Composite(vec![
                IndexField::new("owner", PropertyType::String),
                IndexField::collection("tags", PropertyType::String, ExtractionMode::Elements),
            ]),
            IndexType::NotUnique,
        )
        .unwrap();
        let tags: TrackedList = ["x", "y"].into_iter().collect();
        let source = props(&[("owner", "ann".into()), ("tags", Value::List(tags))]);
        let keys = def.keys_for(&source).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&IndexKey::composite(["ann", "y"])));
        let item = def.keys_for_item(&source, &Value::from("z")).unwrap();
        assert!(item.contains(&IndexKey::composite(["ann", "z"])));
    }

    #[test]
    fn rejects_two_collection_fields() {
        let result = IndexDefinition::new(
            "bad",
            "Doc",
            IndexKind::Composite(vec![
                IndexField::collection("a", PropertyType::String, ExtractionMode::Elements),
                IndexField::collection("b", PropertyType::String, ExtractionMode::Elements),
            ]),
            IndexType::NotUnique,
        );
        assert!(result.is_err());
    }
}
