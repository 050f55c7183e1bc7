use std::collections::{BTreeMap, HashMap};

use super::Table;
use crate::connection::DedupKey;
use crate::error::{PkgDbError, Result};

/// The table set for one physical database
///
/// Every connection sharing a dedup key registers into the same partition, so
/// foreign keys between packages resolve and schema operations cover all of
/// them at once.
#[derive(Debug, Clone)]
pub struct MetadataPartition {
    key: DedupKey,
    tables: Vec<Table>,
    index: HashMap<String, usize>,
}

impl MetadataPartition {
    #[must_use]
    pub fn new(key: DedupKey) -> Self {
        Self { key, tables: Vec::new(), index: HashMap::new() }
    }

    #[must_use]
    pub fn key(&self) -> &DedupKey {
        &self.key
    }

    /// Registered tables in declaration order
    #[must_use]
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    #[must_use]
    pub fn table(&self, full_name: &str) -> Option<&Table> {
        self.index.get(full_name).map(|&i| &self.tables[i])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn register(&mut self, table: Table) -> Result<()> {
        if let Some(&existing) = self.index.get(&table.full_name) {
            return Err(PkgDbError::schema(format!(
                "table '{}' is already registered in '{}' by connection '{}'",
                table.full_name, self.key, self.tables[existing].connection
            )));
        }
        self.index.insert(table.full_name.clone(), self.tables.len());
        self.tables.push(table);
        Ok(())
    }

    /// Tables ordered so every foreign-key target precedes its referrers
    ///
    /// Declaration order breaks ties. Targets outside the partition impose no
    /// ordering.
    pub fn sorted_tables(&self) -> Result<Vec<&Table>> {
        let count = self.tables.len();
        let mut remaining = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (i, table) in self.tables.iter().enumerate() {
            let mut seen = Vec::new();
            for target in table.dependencies() {
                if let Some(&j) = self.index.get(target) {
                    if !seen.contains(&j) {
                        seen.push(j);
                        remaining[i] += 1;
                        dependents[j].push(i);
                    }
                }
            }
        }

        let mut placed = vec![false; count];
        let mut sorted = Vec::with_capacity(count);
        while sorted.len() < count {
            let Some(next) = (0..count).find(|&i| !placed[i] && remaining[i] == 0) else {
                let cycle: Vec<&str> = (0..count)
                    .filter(|&i| !placed[i])
                    .map(|i| self.tables[i].full_name.as_str())
                    .collect();
                return Err(PkgDbError::schema(format!(
                    "foreign key cycle in '{}' among tables: {}",
                    self.key,
                    cycle.join(", ")
                )));
            };
            placed[next] = true;
            for &dependent in &dependents[next] {
                remaining[dependent] -= 1;
            }
            sorted.push(&self.tables[next]);
        }
        Ok(sorted)
    }
}

/// All metadata partitions, keyed by dedup key
#[derive(Debug, Clone, Default)]
pub struct PartitionStore {
    partitions: BTreeMap<DedupKey, MetadataPartition>,
}

impl PartitionStore {
    /// Get the partition for `key`, creating an empty one on first use
    pub fn partition_for(&mut self, key: &DedupKey) -> &mut MetadataPartition {
        self.partitions
            .entry(key.clone())
            .or_insert_with(|| MetadataPartition::new(key.clone()))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetadataPartition> {
        self.partitions.get(key)
    }

    pub fn register(&mut self, table: Table) -> Result<()> {
        let key = table.dedup_key.clone();
        self.partition_for(&key).register(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetadataPartition> {
        self.partitions.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};

    fn table(full_name: &str, refs: &[&str]) -> Table {
        let mut columns = vec![Column::id("id")];
        for target in refs {
            columns.push(
                Column::new(format!("{target}_id"), ColumnType::Integer).references(*target, "id"),
            );
        }
        Table {
            name: full_name.to_string(),
            full_name: full_name.to_string(),
            connection: "app".to_string(),
            dedup_key: DedupKey::new("db:3306/shared"),
            columns,
        }
    }

    fn names<'a>(tables: &[&'a Table]) -> Vec<&'a str> {
        tables.iter().map(|t| t.full_name.as_str()).collect()
    }

    #[test]
    fn test_sorted_tables_targets_first() {
        let mut partition = MetadataPartition::new(DedupKey::new("db:3306/shared"));
        partition.register(table("line_items", &["orders"])).unwrap();
        partition.register(table("comments", &["posts", "users"])).unwrap();
        partition.register(table("orders", &[])).unwrap();
        partition.register(table("posts", &["users"])).unwrap();
        partition.register(table("users", &[])).unwrap();

        let sorted = partition.sorted_tables().unwrap();
        assert_eq!(names(&sorted), vec!["orders", "line_items", "users", "posts", "comments"]);
    }

    #[test]
    fn test_sorted_tables_ignores_outside_targets_and_self() {
        let mut partition = MetadataPartition::new(DedupKey::new("k"));
        partition.register(table("b", &["elsewhere", "b"])).unwrap();
        partition.register(table("a", &[])).unwrap();
        assert_eq!(names(&partition.sorted_tables().unwrap()), vec!["b", "a"]);
    }

    #[test]
    fn test_sorted_tables_cycle_is_error() {
        let mut partition = MetadataPartition::new(DedupKey::new("k"));
        partition.register(table("a", &["b"])).unwrap();
        partition.register(table("b", &["a"])).unwrap();
        partition.register(table("c", &[])).unwrap();
        let err = partition.sorted_tables().unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_ERROR");
        assert!(err.message().contains("a, b"));
    }

    #[test]
    fn test_duplicate_full_name_rejected() {
        let mut partition = MetadataPartition::new(DedupKey::new("k"));
        partition.register(table("posts", &[])).unwrap();
        let err = partition.register(table("posts", &[])).unwrap_err();
        assert!(err.message().contains("already registered"));
        assert_eq!(partition.len(), 1);
    }

    #[test]
    fn test_store_routes_by_key() {
        let mut store = PartitionStore::default();
        store.register(table("orders", &[])).unwrap();
        store.partition_for(&DedupKey::new("sqlite:///other.db"));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("db:3306/shared").map(MetadataPartition::len), Some(1));
        assert!(store.get("sqlite:///other.db").is_some_and(MetadataPartition::is_empty));
    }
}
