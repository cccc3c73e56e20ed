use std::collections::{BTreeMap, BTreeSet};

use super::model::{Exposure, MetadataValue};

// ---------------------------------------------------------------------------
// Filter predicate: which unique values are selected per column
// ---------------------------------------------------------------------------

/// Per-column selection state: maps column_name → set of selected values.
/// A column absent from the map is unconstrained.
pub type FilterState = BTreeMap<String, BTreeSet<MetadataValue>>;

/// Initialise a [`FilterState`] with all values selected (i.e., show every order).
pub fn init_filter_state(exposure: &Exposure) -> FilterState {
    exposure
        .unique_values
        .iter()
        .map(|(col, vals)| (col.clone(), vals.clone()))
        .collect()
}

/// Return positions (into `exposure.orders`) of orders that pass all
/// active filters.
///
/// An order passes a column filter when:
/// * The column is not present in `filters` → passes (no constraint)
/// * The filter set for that column is empty → nothing selected → fails
/// * The order's value for that column is in the selected set → passes
pub fn filtered_indices(exposure: &Exposure, filters: &FilterState) -> Vec<usize> {
    exposure
        .orders
        .iter()
        .enumerate()
        .filter(|(_, order)| {
            filters.iter().all(|(col, selected)| {
                if selected.is_empty() {
                    return false;
                }
                // Everything selected → no effective filter
                let all_selected = exposure
                    .unique_values
                    .get(col)
                    .is_some_and(|all| all.is_subset(selected));
                if all_selected {
                    return true;
                }
                // An order without this column only passes if Null is selected
                let value = order.metadata.get(col).unwrap_or(&MetadataValue::Null);
                selected.contains(value)
            })
        })
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{EchelleOrder, ORDER_COLUMN};

    fn exposure() -> Exposure {
        let orders = (40..44)
            .map(|n| {
                let mut o = EchelleOrder::new(n, vec![1.0], vec![0.1], vec![5000.0]);
                if n % 2 == 0 {
                    o.metadata
                        .insert("fiber".to_string(), MetadataValue::String("sci".into()));
                }
                o
            })
            .collect();
        Exposure::from_orders(BTreeMap::new(), orders)
    }

    #[test]
    fn test_initial_state_shows_everything() {
        let exp = exposure();
        let state = init_filter_state(&exp);
        assert_eq!(filtered_indices(&exp, &state), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_subset_of_orders() {
        let exp = exposure();
        let mut state = init_filter_state(&exp);
        let selected = state.get_mut(ORDER_COLUMN).unwrap();
        selected.remove(&MetadataValue::Integer(41));
        selected.remove(&MetadataValue::Integer(43));
        assert_eq!(filtered_indices(&exp, &state), vec![0, 2]);
    }

    #[test]
    fn test_empty_selection_hides_all() {
        let exp = exposure();
        let mut state = init_filter_state(&exp);
        state.get_mut(ORDER_COLUMN).unwrap().clear();
        assert!(filtered_indices(&exp, &state).is_empty());
    }

    #[test]
    fn test_missing_column_requires_null() {
        let exp = exposure();
        let mut state = FilterState::new();
        state.insert(
            "fiber".to_string(),
            BTreeSet::from([MetadataValue::Null]),
        );
        assert_eq!(filtered_indices(&exp, &state), vec![1, 3]);
    }
}
