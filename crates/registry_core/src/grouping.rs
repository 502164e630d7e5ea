//! Streaming group-by over rows already ordered by group key.
//!
//! # Responsibility
//! - Fold flat one-to-many query rows into group records with nested,
//!   order-preserving member lists in a single forward pass.
//!
//! # Invariants
//! - Input must be ordered by group key (case-insensitive). This is not
//!   checked: a key that reappears after a different key opens a second group
//!   with the same key.
//! - Member order within a group is the input order.
//! - Group keys are compared case-insensitively; the first row of a group
//!   supplies its key and metadata.
//! - SQL that feeds this module orders by the `GROUP_KEY` collation, which
//!   every pooled connection registers with [`compare_keys`], so database
//!   order and key equality agree for non-ASCII keys too.

use log::trace;
use serde::Serialize;
use std::cmp::Ordering;

/// SQLite collation ordering keys by [`compare_keys`].
pub const GROUP_KEY_COLLATION: &str = "GROUP_KEY";

/// One relational tuple that belongs to a group.
pub trait FlatRow {
    /// Group-level fields, taken from the first row of each group.
    type Group;
    /// Per-row fields appended to the group's member list.
    type Member;

    fn group_key(&self) -> &str;
    fn split(self) -> (Self::Group, Self::Member);
}

/// One output group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRecord<G, M> {
    pub key: String,
    pub metadata: G,
    pub members: Vec<M>,
}

impl<G, M> GroupRecord<G, M> {
    fn open<R>(row: R) -> Self
    where
        R: FlatRow<Group = G, Member = M>,
    {
        let key = row.group_key().to_string();
        let (metadata, member) = row.split();
        Self {
            key,
            metadata,
            members: vec![member],
        }
    }
}

/// Case-insensitive key comparison.
pub fn keys_match(left: &str, right: &str) -> bool {
    left.eq_ignore_ascii_case(right)
        || left
            .chars()
            .flat_map(char::to_lowercase)
            .eq(right.chars().flat_map(char::to_lowercase))
}

/// Orders keys by their lowercase form. Keys that compare equal are exactly
/// the keys [`keys_match`] accepts.
pub fn compare_keys(left: &str, right: &str) -> Ordering {
    left.chars()
        .flat_map(char::to_lowercase)
        .cmp(right.chars().flat_map(char::to_lowercase))
}

struct Accumulator<G, M> {
    groups: Vec<GroupRecord<G, M>>,
    rows: usize,
}

impl<G, M> Accumulator<G, M> {
    fn new() -> Self {
        Self {
            groups: Vec::new(),
            rows: 0,
        }
    }

    fn push<R>(&mut self, row: R)
    where
        R: FlatRow<Group = G, Member = M>,
    {
        self.rows += 1;
        let continues_last = self
            .groups
            .last()
            .is_some_and(|last| keys_match(&last.key, row.group_key()));

        if continues_last {
            let (_, member) = row.split();
            if let Some(last) = self.groups.last_mut() {
                last.members.push(member);
            }
        } else {
            self.groups.push(GroupRecord::open(row));
        }
    }

    fn finish(self) -> Vec<GroupRecord<G, M>> {
        trace!(
            "event=group_rows module=grouping status=ok rows={} groups={}",
            self.rows,
            self.groups.len()
        );
        self.groups
    }
}

/// Groups `rows` in one pass, holding every group in memory.
pub fn aggregate<R, I>(rows: I) -> Vec<GroupRecord<R::Group, R::Member>>
where
    R: FlatRow,
    I: IntoIterator<Item = R>,
{
    let mut acc = Accumulator::new();
    for row in rows {
        acc.push(row);
    }
    acc.finish()
}

/// Groups fallible rows, stopping at the first row error.
///
/// Fits `rusqlite::MappedRows` directly.
pub fn try_aggregate<R, E, I>(rows: I) -> Result<Vec<GroupRecord<R::Group, R::Member>>, E>
where
    R: FlatRow,
    I: IntoIterator<Item = Result<R, E>>,
{
    let mut acc = Accumulator::new();
    for row in rows {
        acc.push(row?);
    }
    Ok(acc.finish())
}

/// Lazy variant: yields each group once the next key differs or input ends.
pub struct GroupedRows<I>
where
    I: Iterator,
    I::Item: FlatRow,
{
    rows: I,
    pending: Option<GroupRecord<<I::Item as FlatRow>::Group, <I::Item as FlatRow>::Member>>,
}

impl<I> Iterator for GroupedRows<I>
where
    I: Iterator,
    I::Item: FlatRow,
{
    type Item = GroupRecord<<I::Item as FlatRow>::Group, <I::Item as FlatRow>::Member>;

    fn next(&mut self) -> Option<Self::Item> {
        for row in self.rows.by_ref() {
            let continues_pending = self
                .pending
                .as_ref()
                .is_some_and(|group| keys_match(&group.key, row.group_key()));

            if continues_pending {
                let (_, member) = row.split();
                if let Some(group) = self.pending.as_mut() {
                    group.members.push(member);
                }
            } else if let Some(finished) = self.pending.replace(GroupRecord::open(row)) {
                return Some(finished);
            }
        }
        self.pending.take()
    }
}

pub fn group_rows<I>(rows: I) -> GroupedRows<I::IntoIter>
where
    I: IntoIterator,
    I::Item: FlatRow,
{
    GroupedRows {
        rows: rows.into_iter(),
        pending: None,
    }
}

#[cfg(test)]
mod tests {
    use super::{aggregate, compare_keys, group_rows, keys_match, try_aggregate, FlatRow};
    use std::cmp::Ordering;

    #[derive(Debug, Clone)]
    struct Row {
        key: &'static str,
        name: &'static str,
    }

    impl FlatRow for Row {
        type Group = ();
        type Member = &'static str;

        fn group_key(&self) -> &str {
            self.key
        }

        fn split(self) -> (Self::Group, Self::Member) {
            ((), self.name)
        }
    }

    fn row(key: &'static str, name: &'static str) -> Row {
        Row { key, name }
    }

    #[test]
    fn keys_compare_case_insensitively() {
        assert!(keys_match("hasPart", "HASPART"));
        assert!(keys_match("Ärger", "ärger"));
        assert!(!keys_match("is", "isVersionOf"));
    }

    #[test]
    fn key_order_agrees_with_key_matching() {
        assert_eq!(compare_keys("Émission", "émission"), Ordering::Equal);
        assert_eq!(compare_keys("Ñu", "émission"), Ordering::Greater);
        assert_eq!(compare_keys("is", "IsVersionOf"), Ordering::Less);

        let mut keys = vec!["émission", "Ñu", "Émission", "hasPart"];
        keys.sort_by(|a, b| compare_keys(a, b));
        let rows: Vec<_> = keys.into_iter().map(|key| row(key, key)).collect();
        assert_eq!(aggregate(rows).len(), 3);
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(aggregate(Vec::<Row>::new()).is_empty());
        assert_eq!(group_rows(Vec::<Row>::new()).count(), 0);
    }

    #[test]
    fn case_variants_of_one_key_stay_in_one_group() {
        let groups = aggregate(vec![row("Is", "a"), row("is", "b"), row("IS", "c")]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "Is");
        assert_eq!(groups[0].members, vec!["a", "b", "c"]);
    }

    #[test]
    fn lazy_grouping_matches_eager_grouping() {
        let rows = vec![
            row("is", "isIdenticalTo"),
            row("hasPart", "isDescribedBy"),
            row("hasPart", "isVersionOf"),
            row("is", "isHomologTo"),
        ];
        let eager = aggregate(rows.clone());
        let lazy: Vec<_> = group_rows(rows).collect();
        assert_eq!(eager, lazy);
        assert_eq!(lazy.len(), 3);
    }

    #[test]
    fn try_aggregate_stops_at_first_error() {
        let rows: Vec<Result<Row, &str>> =
            vec![Ok(row("is", "a")), Err("broken"), Ok(row("is", "b"))];
        assert_eq!(try_aggregate(rows), Err("broken"));
    }
}
