use crate::model::{GroupKey, GroupLayout, Partition, Row};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("unknown group {0}")]
    UnknownGroup(GroupKey),
    #[error("row {id} not found in group {key}")]
    UnknownRow { key: GroupKey, id: u32 },
    #[error("column {col} out of range (month has {len} dates)")]
    ColumnOutOfRange { col: usize, len: usize },
    #[error("no row ids left in group {0}")]
    IdsExhausted(GroupKey),
}

type Slot = (Partition, GroupKey);

/// In-memory attendance grid for one stage: both partitions, every group,
/// aligned to one date axis.
#[derive(Debug, Clone)]
pub struct AttendanceStore {
    layout: GroupLayout,
    dates: Vec<NaiveDate>,
    groups: BTreeMap<Slot, Vec<Row>>,
    selected: BTreeMap<Slot, BTreeSet<u32>>,
}

impl AttendanceStore {
    pub fn new(layout: GroupLayout, dates: Vec<NaiveDate>) -> Self {
        let mut groups = BTreeMap::new();
        for partition in Partition::ALL {
            for key in layout.keys() {
                groups.insert((partition, key), Vec::new());
            }
        }
        Self {
            layout,
            dates,
            groups,
            selected: BTreeMap::new(),
        }
    }

    pub fn layout(&self) -> &GroupLayout {
        &self.layout
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self, partition: Partition, key: GroupKey) -> Result<&[Row], StoreError> {
        self.groups
            .get(&(partition, key))
            .map(|v| v.as_slice())
            .ok_or(StoreError::UnknownGroup(key))
    }

    /// Every (partition, key, rows) triple, members first, keys ascending.
    pub fn iter_groups(&self) -> impl Iterator<Item = (Partition, GroupKey, &[Row])> + '_ {
        self.groups
            .iter()
            .map(|((partition, key), rows)| (*partition, *key, rows.as_slice()))
    }

    pub fn row_count(&self) -> usize {
        self.groups.values().map(|v| v.len()).sum()
    }

    fn group_mut(&mut self, partition: Partition, key: GroupKey) -> Result<&mut Vec<Row>, StoreError> {
        self.groups
            .get_mut(&(partition, key))
            .ok_or(StoreError::UnknownGroup(key))
    }

    fn next_id(rows: &[Row], key: GroupKey) -> Result<u32, StoreError> {
        rows.iter()
            .map(|r| r.id)
            .max()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or(StoreError::IdsExhausted(key))
    }

    pub fn add_row(&mut self, partition: Partition, key: GroupKey, name: &str) -> Result<u32, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        let width = self.dates.len();
        let rows = self.group_mut(partition, key)?;
        let id = Self::next_id(rows, key)?;
        rows.push(Row {
            id,
            name: name.to_string(),
            attendance: vec![false; width],
        });
        Ok(id)
    }

    /// Adds one row per non-blank line of `text`. Blank lines are skipped.
    pub fn bulk_import(&mut self, partition: Partition, key: GroupKey, text: &str) -> Result<Vec<u32>, StoreError> {
        let width = self.dates.len();
        let rows = self.group_mut(partition, key)?;
        let mut ids = Vec::new();
        for line in text.lines() {
            let name = line.trim();
            if name.is_empty() {
                continue;
            }
            let id = Self::next_id(rows, key)?;
            rows.push(Row {
                id,
                name: name.to_string(),
                attendance: vec![false; width],
            });
            ids.push(id);
        }
        Ok(ids)
    }

    /// Flips one attendance cell and returns its new value.
    pub fn toggle(&mut self, partition: Partition, key: GroupKey, id: u32, col: usize) -> Result<bool, StoreError> {
        let len = self.dates.len();
        if col >= len {
            return Err(StoreError::ColumnOutOfRange { col, len });
        }
        let row = self
            .group_mut(partition, key)?
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::UnknownRow { key, id })?;
        row.attendance[col] = !row.attendance[col];
        Ok(row.attendance[col])
    }

    pub fn set_selected(&mut self, partition: Partition, key: GroupKey, id: u32, on: bool) -> Result<(), StoreError> {
        if !self.rows(partition, key)?.iter().any(|r| r.id == id) {
            return Err(StoreError::UnknownRow { key, id });
        }
        let set = self.selected.entry((partition, key)).or_default();
        if on {
            set.insert(id);
        } else {
            set.remove(&id);
        }
        Ok(())
    }

    pub fn select_all(&mut self, partition: Partition, key: GroupKey) -> Result<(), StoreError> {
        let ids: BTreeSet<u32> = self.rows(partition, key)?.iter().map(|r| r.id).collect();
        self.selected.insert((partition, key), ids);
        Ok(())
    }

    pub fn clear_selection(&mut self, partition: Partition, key: GroupKey) -> Result<(), StoreError> {
        self.rows(partition, key)?;
        self.selected.remove(&(partition, key));
        Ok(())
    }

    pub fn selected(&self, partition: Partition, key: GroupKey) -> Vec<u32> {
        self.selected
            .get(&(partition, key))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_selected(&self, partition: Partition, key: GroupKey, id: u32) -> bool {
        self.selected
            .get(&(partition, key))
            .is_some_and(|s| s.contains(&id))
    }

    /// Removes the selected rows of one group; returns how many were removed.
    pub fn delete_selected(&mut self, partition: Partition, key: GroupKey) -> Result<usize, StoreError> {
        let picked = self.selected.remove(&(partition, key)).unwrap_or_default();
        let rows = self.group_mut(partition, key)?;
        let before = rows.len();
        rows.retain(|r| !picked.contains(&r.id));
        Ok(before - rows.len())
    }

    pub fn delete_row(&mut self, partition: Partition, key: GroupKey, id: u32) -> Result<(), StoreError> {
        let rows = self.group_mut(partition, key)?;
        let Some(pos) = rows.iter().position(|r| r.id == id) else {
            return Err(StoreError::UnknownRow { key, id });
        };
        rows.remove(pos);
        if let Some(set) = self.selected.get_mut(&(partition, key)) {
            set.remove(&id);
        }
        Ok(())
    }

    pub fn delete_all(&mut self, partition: Partition, key: GroupKey) -> Result<usize, StoreError> {
        let rows = self.group_mut(partition, key)?;
        let n = rows.len();
        rows.clear();
        self.selected.remove(&(partition, key));
        Ok(n)
    }

    /// Present count per date column for one group.
    pub fn present_by_date(&self, partition: Partition, key: GroupKey) -> Result<Vec<usize>, StoreError> {
        let rows = self.rows(partition, key)?;
        Ok((0..self.dates.len())
            .map(|col| rows.iter().filter(|r| r.attendance.get(col).copied().unwrap_or(false)).count())
            .collect())
    }

    /// Inserts a row recovered from storage. The id is kept when it is free in
    /// the destination group and below `u32::MAX`, otherwise the max+1 rule
    /// applies. Attendance is padded or truncated to the current axis.
    pub(crate) fn restore_row(
        &mut self,
        partition: Partition,
        key: GroupKey,
        id: Option<u32>,
        name: String,
        mut attendance: Vec<bool>,
    ) -> Result<u32, StoreError> {
        attendance.resize(self.dates.len(), false);
        let rows = self.group_mut(partition, key)?;
        let id = match id {
            Some(id) if id > 0 && id < u32::MAX && !rows.iter().any(|r| r.id == id) => id,
            _ => Self::next_id(rows, key)?,
        };
        rows.push(Row { id, name, attendance });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::fridays_in_month;

    fn store() -> AttendanceStore {
        AttendanceStore::new(
            GroupLayout::Categories {
                categories: vec!["Boys", "Girls"],
                grades: vec!["7", "8", "9"],
            },
            fridays_in_month(2025, 1),
        )
    }

    const K: GroupKey = GroupKey::Category { category: 0, grade: 1 };

    #[test]
    fn add_trims_and_rejects_blank() {
        let mut s = store();
        assert_eq!(s.add_row(Partition::Members, K, "  Mina  "), Ok(1));
        assert_eq!(s.add_row(Partition::Members, K, "   "), Err(StoreError::EmptyName));
        let rows = s.rows(Partition::Members, K).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Mina");
        assert_eq!(rows[0].attendance, vec![false; 4]);
    }

    #[test]
    fn unknown_group_is_rejected() {
        let mut s = store();
        let bad = GroupKey::Category { category: 5, grade: 0 };
        assert_eq!(s.add_row(Partition::Members, bad, "x"), Err(StoreError::UnknownGroup(bad)));
        assert_eq!(
            s.add_row(Partition::Members, GroupKey::Grade(0), "x"),
            Err(StoreError::UnknownGroup(GroupKey::Grade(0)))
        );
    }

    #[test]
    fn bulk_import_counts_non_blank_lines_and_continues_ids() {
        let mut s = store();
        s.add_row(Partition::Members, K, "a").expect("add");
        s.add_row(Partition::Members, K, "b").expect("add");
        s.delete_row(Partition::Members, K, 1).expect("delete");
        let ids = s
            .bulk_import(Partition::Members, K, "Peter\n\n  \nJohn\r\n  Mary \n")
            .expect("import");
        assert_eq!(ids, vec![3, 4, 5]);
        let names: Vec<&str> = s
            .rows(Partition::Members, K)
            .expect("rows")
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "Peter", "John", "Mary"]);
    }

    #[test]
    fn ids_are_per_group_and_partition() {
        let mut s = store();
        assert_eq!(s.add_row(Partition::Members, K, "a"), Ok(1));
        assert_eq!(s.add_row(Partition::Servants, K, "b"), Ok(1));
        let other = GroupKey::Category { category: 1, grade: 1 };
        assert_eq!(s.add_row(Partition::Members, other, "c"), Ok(1));
        assert_eq!(s.add_row(Partition::Members, K, "d"), Ok(2));
    }

    #[test]
    fn toggle_flips_and_bounds_checks() {
        let mut s = store();
        let id = s.add_row(Partition::Servants, K, "Abanoub").expect("add");
        assert_eq!(s.toggle(Partition::Servants, K, id, 2), Ok(true));
        assert_eq!(s.toggle(Partition::Servants, K, id, 2), Ok(false));
        assert_eq!(s.toggle(Partition::Servants, K, id, 3), Ok(true));
        assert_eq!(
            s.toggle(Partition::Servants, K, id, 4),
            Err(StoreError::ColumnOutOfRange { col: 4, len: 4 })
        );
        assert_eq!(
            s.toggle(Partition::Servants, K, 99, 0),
            Err(StoreError::UnknownRow { key: K, id: 99 })
        );
        assert_eq!(s.present_by_date(Partition::Servants, K), Ok(vec![0, 0, 0, 1]));
    }

    #[test]
    fn select_all_then_delete_selected_only_touches_that_group() {
        let mut s = store();
        let other = GroupKey::Category { category: 1, grade: 1 };
        s.bulk_import(Partition::Members, K, "a\nb\nc").expect("import");
        s.bulk_import(Partition::Members, other, "d\ne").expect("import");
        s.bulk_import(Partition::Servants, K, "f").expect("import");

        s.select_all(Partition::Members, K).expect("select");
        assert_eq!(s.selected(Partition::Members, K), vec![1, 2, 3]);
        assert_eq!(s.delete_selected(Partition::Members, K), Ok(3));

        assert!(s.rows(Partition::Members, K).expect("rows").is_empty());
        assert_eq!(s.rows(Partition::Members, other).expect("rows").len(), 2);
        assert_eq!(s.rows(Partition::Servants, K).expect("rows").len(), 1);
        assert!(s.selected(Partition::Members, K).is_empty());
    }

    #[test]
    fn partial_selection_and_delete_all() {
        let mut s = store();
        s.bulk_import(Partition::Members, K, "a\nb\nc").expect("import");
        s.set_selected(Partition::Members, K, 2, true).expect("select");
        s.set_selected(Partition::Members, K, 3, true).expect("select");
        s.set_selected(Partition::Members, K, 3, false).expect("unselect");
        assert!(s.is_selected(Partition::Members, K, 2));
        assert_eq!(s.delete_selected(Partition::Members, K), Ok(1));
        let ids: Vec<u32> = s.rows(Partition::Members, K).expect("rows").iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);

        assert_eq!(
            s.set_selected(Partition::Members, K, 2, true),
            Err(StoreError::UnknownRow { key: K, id: 2 })
        );
        assert_eq!(s.delete_all(Partition::Members, K), Ok(2));
        assert_eq!(s.row_count(), 0);
    }

    #[test]
    fn restore_keeps_free_ids_and_reassigns_collisions() {
        let mut s = store();
        assert_eq!(s.restore_row(Partition::Members, K, Some(7), "a".into(), vec![true]), Ok(7));
        assert_eq!(s.restore_row(Partition::Members, K, Some(7), "b".into(), vec![]), Ok(8));
        assert_eq!(s.restore_row(Partition::Members, K, None, "c".into(), vec![]), Ok(9));
        let rows = s.rows(Partition::Members, K).expect("rows");
        assert_eq!(rows[0].attendance, vec![true, false, false, false]);
    }

    #[test]
    fn top_id_is_never_restored_and_adding_after_it_is_checked() {
        let mut s = store();
        assert_eq!(s.restore_row(Partition::Members, K, Some(u32::MAX), "Max".into(), vec![]), Ok(1));
        assert_eq!(s.add_row(Partition::Members, K, "Next"), Ok(2));

        assert_eq!(
            s.restore_row(Partition::Servants, K, Some(u32::MAX - 1), "Edge".into(), vec![]),
            Ok(u32::MAX - 1)
        );
        assert_eq!(s.add_row(Partition::Servants, K, "Last"), Ok(u32::MAX));
        assert_eq!(s.add_row(Partition::Servants, K, "Over"), Err(StoreError::IdsExhausted(K)));
        assert_eq!(
            s.bulk_import(Partition::Servants, K, "a\nb"),
            Err(StoreError::IdsExhausted(K))
        );
        assert_eq!(s.rows(Partition::Servants, K).expect("rows").len(), 2);
    }
}
