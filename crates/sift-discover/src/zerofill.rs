//! Timeseries gap filling

use std::collections::BTreeMap;

use crate::executor::Row;

/// Output key holding the bucket start in epoch seconds.
pub const TIME_KEY: &str = "time";

/// One row per `rollup` slot over `[start, end]`.
///
/// `start` is aligned down to the rollup and the range runs one slot past the
/// aligned `end`. Rows sharing a slot are kept in their original order; slots
/// without rows get a row holding only the time.
pub fn zerofill(rows: Vec<Row>, start: i64, end: i64, rollup: i64) -> Vec<Row> {
    if rollup <= 0 {
        return rows;
    }

    let mut by_time: BTreeMap<i64, Vec<Row>> = BTreeMap::new();
    for row in rows {
        let Some(time) = row.get(TIME_KEY).and_then(|t| t.as_i64()) else {
            continue;
        };
        by_time.entry(time).or_default().push(row);
    }

    let first = start.div_euclid(rollup) * rollup;
    let last = end.div_euclid(rollup) * rollup + rollup;
    let mut filled = Vec::new();
    let mut slot = first;
    while slot < last {
        match by_time.remove(&slot) {
            Some(found) => filled.extend(found),
            None => {
                let mut empty = Row::new();
                empty.insert(TIME_KEY.to_string(), slot.into());
                filled.push(empty);
            }
        }
        slot += rollup;
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn times(rows: &[Row]) -> Vec<i64> {
        rows.iter().map(|r| r[TIME_KEY].as_i64().unwrap()).collect()
    }

    #[test]
    fn test_fills_missing_slots() {
        let rows = vec![row(json!({"time": 60, "count": 4}))];
        let filled = zerofill(rows, 0, 120, 60);
        assert_eq!(times(&filled), vec![0, 60, 120]);
        assert_eq!(filled[1]["count"], 4);
        assert!(filled[0].get("count").is_none());
    }

    #[test]
    fn test_aligns_start_down() {
        let filled = zerofill(Vec::new(), 95, 130, 60);
        assert_eq!(times(&filled), vec![60, 120]);
    }

    #[test]
    fn test_keeps_rows_sharing_a_slot() {
        let rows = vec![
            row(json!({"time": 0, "count": 1, "release": "a"})),
            row(json!({"time": 0, "count": 2, "release": "b"})),
        ];
        let filled = zerofill(rows, 0, 0, 60);
        assert_eq!(filled.len(), 2);
        assert_eq!(filled[1]["release"], "b");
    }

    #[test]
    fn test_zero_rollup_is_passthrough() {
        let rows = vec![row(json!({"time": 7}))];
        assert_eq!(zerofill(rows.clone(), 0, 100, 0), rows);
    }
}
