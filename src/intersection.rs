//! Origin↔destination column projection
//!
//! When the shadow table's columns have drifted from the source's (dropped
//! columns, renames), the copy and the mirror triggers must project source
//! rows onto the shadow's shape. [`Intersection`] is that projection: the
//! sorted shared columns, plus the declared renames appended in a stable
//! order so `origin_columns` and `dest_columns` stay positionally aligned.

/// A pure value derived from two column lists and the rename list. It is
/// recomputed wherever freshness matters (each chunk, trigger install), so
/// a rename declared mid-copy routes data on the next chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intersection {
    /// Columns present in both tables, sorted, excluding rename targets.
    pub intersection: Vec<String>,
    /// Rename sources, ordered by original column name.
    pub origin_renames: Vec<String>,
    /// Rename targets, in the same order as `origin_renames`.
    pub dest_renames: Vec<String>,
}

impl Intersection {
    pub fn new(
        origin_columns: &[String],
        dest_columns: &[String],
        renames: &[(String, String)],
    ) -> Self {
        let mut sorted_renames: Vec<(String, String)> = renames.to_vec();
        sorted_renames.sort();

        let mut intersection: Vec<String> = origin_columns
            .iter()
            .filter(|col| dest_columns.contains(col))
            .filter(|col| !sorted_renames.iter().any(|(_, new)| new == *col))
            .cloned()
            .collect();
        intersection.sort();
        intersection.dedup();

        Self {
            intersection,
            origin_renames: sorted_renames.iter().map(|(old, _)| old.clone()).collect(),
            dest_renames: sorted_renames.into_iter().map(|(_, new)| new).collect(),
        }
    }

    /// The columns selected from the source table.
    pub fn origin_columns(&self) -> Vec<String> {
        let mut cols = self.intersection.clone();
        cols.extend(self.origin_renames.iter().cloned());
        cols
    }

    /// The columns written to the shadow table, position-for-position with
    /// [`origin_columns`](Self::origin_columns).
    pub fn dest_columns(&self) -> Vec<String> {
        let mut cols = self.intersection.clone();
        cols.extend(self.dest_renames.iter().cloned());
        cols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_shared_columns_are_sorted() {
        let ix = Intersection::new(&cols(&["zip", "id", "name"]), &cols(&["name", "zip", "id"]), &[]);
        assert_eq!(ix.intersection, cols(&["id", "name", "zip"]));
        assert_eq!(ix.origin_columns(), ix.dest_columns());
    }

    #[test]
    fn test_rename_appends_aligned_pair() {
        let ix = Intersection::new(
            &cols(&["id", "name", "zip"]),
            &cols(&["id", "name", "zipcode"]),
            &[("zip".to_string(), "zipcode".to_string())],
        );
        assert_eq!(ix.intersection, cols(&["id", "name"]));
        assert_eq!(ix.origin_columns(), cols(&["id", "name", "zip"]));
        assert_eq!(ix.dest_columns(), cols(&["id", "name", "zipcode"]));
    }

    #[test]
    fn test_renames_ordered_by_original_name() {
        let ix = Intersection::new(
            &cols(&["id", "zip", "addr"]),
            &cols(&["id", "zipcode", "address"]),
            &[
                ("zip".to_string(), "zipcode".to_string()),
                ("addr".to_string(), "address".to_string()),
            ],
        );
        assert_eq!(ix.origin_renames, cols(&["addr", "zip"]));
        assert_eq!(ix.dest_renames, cols(&["address", "zipcode"]));
    }

    #[test]
    fn test_rename_target_excluded_from_shared_set() {
        // The target can land in both tables (the source may grow the new
        // column later); it must not be double-counted.
        let ix = Intersection::new(
            &cols(&["id", "zip", "zipcode"]),
            &cols(&["id", "zipcode"]),
            &[("zip".to_string(), "zipcode".to_string())],
        );
        assert_eq!(ix.intersection, cols(&["id"]));
        assert_eq!(ix.origin_columns(), cols(&["id", "zip"]));
        assert_eq!(ix.dest_columns(), cols(&["id", "zipcode"]));
    }

    #[test]
    fn test_dropped_column_leaves_projection() {
        let ix = Intersection::new(
            &cols(&["id", "name", "state"]),
            &cols(&["id", "name"]),
            &[],
        );
        assert_eq!(ix.origin_columns(), cols(&["id", "name"]));
    }

    proptest! {
        /// The two projections always have equal length and renames stay
        /// positionally paired.
        #[test]
        fn prop_projections_stay_aligned(
            origin in prop::collection::btree_set("[a-z]{1,8}", 0..12),
            dest in prop::collection::btree_set("[a-z]{1,8}", 0..12),
            renames in prop::collection::vec(("[a-z]{1,8}", "[a-z]{1,8}"), 0..4),
        ) {
            let origin: Vec<String> = origin.into_iter().collect();
            let dest: Vec<String> = dest.into_iter().collect();
            let ix = Intersection::new(&origin, &dest, &renames);

            let origin_cols = ix.origin_columns();
            let dest_cols = ix.dest_columns();
            prop_assert_eq!(origin_cols.len(), dest_cols.len());

            let shared = ix.intersection.len();
            for (i, (old, new)) in ix.origin_renames.iter().zip(&ix.dest_renames).enumerate() {
                prop_assert_eq!(&origin_cols[shared + i], old);
                prop_assert_eq!(&dest_cols[shared + i], new);
            }
        }
    }
}
