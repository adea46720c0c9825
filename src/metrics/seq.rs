//! Ordered-sequence helpers.
//!
//! Lag/lead over slices already sorted by (partition key, order), with
//! partition boundaries detected by adjacent key inequality.

/// Previous item's value within the same partition, None at partition
/// starts.
pub fn lag_within<T, K: PartialEq>(
    items: &[T],
    key: impl Fn(&T) -> K,
    value: impl Fn(&T) -> Option<i64>,
) -> Vec<Option<i64>> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            if index == 0 || key(&items[index - 1]) != key(item) {
                None
            } else {
                value(&items[index - 1])
            }
        })
        .collect()
}

/// Next item's value within the same partition, None at partition ends.
pub fn lead_within<T, K: PartialEq>(
    items: &[T],
    key: impl Fn(&T) -> K,
    value: impl Fn(&T) -> Option<i64>,
) -> Vec<Option<i64>> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            if index + 1 == items.len() || key(&items[index + 1]) != key(item) {
                None
            } else {
                value(&items[index + 1])
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_respects_partition_boundaries() {
        let items = vec![("a", 10), ("a", 20), ("a", 30), ("b", 40), ("b", 50)];

        let lagged = lag_within(&items, |i| i.0, |i| Some(i.1));

        assert_eq!(lagged, vec![None, Some(10), Some(20), None, Some(40)]);
    }

    #[test]
    fn lead_respects_partition_boundaries() {
        let items = vec![("a", 10), ("a", 20), ("b", 30)];

        let led = lead_within(&items, |i| i.0, |i| Some(i.1));

        assert_eq!(led, vec![Some(20), None, None]);
    }

    #[test]
    fn null_values_pass_through() {
        let items: Vec<(&str, Option<i64>)> = vec![("a", None), ("a", Some(5))];

        let lagged = lag_within(&items, |i| i.0, |i| i.1);

        assert_eq!(lagged, vec![None, None]);
    }
}
