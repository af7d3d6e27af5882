use models::{Direction, TradeRecord};
use std::collections::HashMap;

/// Sort trades by execution time.
///
/// The key is `(timestamp, original_index)`, so trades executed at the same
/// instant keep the order in which they appeared in the source file.
pub fn sort_chronologically(mut records: Vec<TradeRecord>) -> Vec<TradeRecord> {
    records.sort_by_key(|r| r.execution_rank);
    records
}

/// Two trades conflict when they are on the same instrument but trade in
/// opposite directions (Buy/Cover against Short/Sell).
pub fn conflicts(a: &TradeRecord, b: &TradeRecord) -> bool {
    a.instrument_id == b.instrument_id && a.direction() != b.direction()
}

/// A non-empty run of chronologically ordered trades in which no instrument
/// is traded both long and short.
///
/// The downstream trade upload reads such a mix as a box position when there
/// is no prior position, so each group is uploaded as its own file.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeGroup {
    records: Vec<TradeRecord>,
}

impl TradeGroup {
    pub fn records(&self) -> &[TradeRecord] {
        &self.records
    }

    pub fn first(&self) -> &TradeRecord {
        // non-empty by construction
        &self.records[0]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TradeRecord> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<TradeRecord> {
        self.records
    }
}

impl<'a> IntoIterator for &'a TradeGroup {
    type Item = &'a TradeRecord;
    type IntoIter = std::slice::Iter<'a, TradeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Split chronologically sorted trades into consecutive groups free of box
/// positions.
///
/// Greedy: trades are appended to the current group until one conflicts with
/// a trade already in it; that trade then opens the next group. Group
/// membership and order are fully determined by the input, and concatenating
/// the groups gives back the input. Empty input yields no groups.
pub fn partition_into_groups(sorted_records: Vec<TradeRecord>) -> Vec<TradeGroup> {
    let mut groups = Vec::new();
    let mut current: Vec<TradeRecord> = Vec::new();
    // Direction already taken by each instrument in the current group.
    let mut seen: HashMap<String, Direction> = HashMap::new();

    for record in sorted_records {
        let direction = record.direction();
        let opens_box = seen
            .get(&record.instrument_id)
            .is_some_and(|d| *d != direction);

        if opens_box {
            groups.push(TradeGroup {
                records: std::mem::take(&mut current),
            });
            seen.clear();
        }

        seen.insert(record.instrument_id.clone(), direction);
        current.push(record);
    }

    if !current.is_empty() {
        groups.push(TradeGroup { records: current });
    }

    tracing::debug!(groups = groups.len(), "partitioned trades");
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use models::{ExecutionRank, Side, COMMISSION_CODE};
    use proptest::prelude::*;

    fn at(seconds: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 10, 25)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + chrono::Duration::seconds(seconds)
    }

    fn trade(instrument: &str, side: Side, seconds: i64, index: usize) -> TradeRecord {
        let day = NaiveDate::from_ymd_opt(2018, 10, 25).unwrap();
        TradeRecord {
            instrument_id: instrument.to_string(),
            side,
            quantity: 1.0,
            price: 100.0,
            trade_date: day,
            settlement_date: day,
            commission_code: COMMISSION_CODE.to_string(),
            commission_amount: 0.0,
            execution_rank: ExecutionRank::new(at(seconds), index),
        }
    }

    /// Trades already in execution order, one second apart.
    fn sequence(trades: &[(&str, Side)]) -> Vec<TradeRecord> {
        trades
            .iter()
            .enumerate()
            .map(|(i, (instrument, side))| trade(instrument, *side, i as i64, i))
            .collect()
    }

    fn shape(groups: &[TradeGroup]) -> Vec<Vec<(String, Side)>> {
        groups
            .iter()
            .map(|g| g.iter().map(|r| (r.instrument_id.clone(), r.side)).collect())
            .collect()
    }

    #[test]
    fn test_sort_orders_by_timestamp() {
        let records = vec![
            trade("A", Side::Buy, 30, 0),
            trade("B", Side::Buy, 10, 1),
            trade("C", Side::Buy, 20, 2),
        ];
        let sorted = sort_chronologically(records);
        let ids: Vec<_> = sorted.iter().map(|r| r.instrument_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C", "A"]);
    }

    #[test]
    fn test_sort_keeps_file_order_for_equal_timestamps() {
        let records = vec![
            trade("A", Side::Buy, 5, 0),
            trade("B", Side::Sell, 0, 1),
            trade("C", Side::Short, 5, 2),
            trade("D", Side::Cover, 5, 3),
        ];
        let sorted = sort_chronologically(records);
        let ids: Vec<_> = sorted.iter().map(|r| r.instrument_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", "C", "D"]);
    }

    #[test]
    fn test_buy_then_sell_splits() {
        let groups = partition_into_groups(sequence(&[("A", Side::Buy), ("A", Side::Sell)]));
        assert_eq!(
            shape(&groups),
            vec![
                vec![("A".to_string(), Side::Buy)],
                vec![("A".to_string(), Side::Sell)],
            ]
        );
    }

    #[test]
    fn test_cover_after_buy_is_same_direction() {
        let groups = partition_into_groups(sequence(&[
            ("A", Side::Buy),
            ("B", Side::Short),
            ("A", Side::Cover),
        ]));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn test_short_then_buy_splits() {
        let groups = partition_into_groups(sequence(&[("A", Side::Short), ("A", Side::Buy)]));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].first().side, Side::Short);
        assert_eq!(groups[1].first().side, Side::Buy);
    }

    #[test]
    fn test_cover_conflicts_with_short() {
        let groups = partition_into_groups(sequence(&[("A", Side::Short), ("A", Side::Cover)]));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_duplicate_buys_stay_together() {
        let groups = partition_into_groups(sequence(&[
            ("A", Side::Buy),
            ("A", Side::Buy),
            ("A", Side::Sell),
        ]));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
        assert_eq!(groups[1].first().side, Side::Sell);
    }

    #[test]
    fn test_empty_input_gives_no_groups() {
        assert!(partition_into_groups(Vec::new()).is_empty());
    }

    #[test]
    fn test_conflict_resets_other_instruments() {
        // After the split on A, B may trade short again in the new group.
        let groups = partition_into_groups(sequence(&[
            ("B", Side::Buy),
            ("A", Side::Buy),
            ("A", Side::Sell),
            ("B", Side::Sell),
        ]));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 2);
    }

    #[test]
    fn test_twenty_trades_split_seven_and_thirteen() {
        let trades = [
            ("HIV8 Index", Side::Buy),
            ("HIV8 Index", Side::Buy),
            ("ESZ8 Index", Side::Short),
            ("HIV8 Index", Side::Cover),
            ("NQZ8 Index", Side::Buy),
            ("ESZ8 Index", Side::Sell),
            ("GXH9 Index", Side::Cover),
            ("GXH9 Index", Side::Sell),
            ("HIV8 Index", Side::Sell),
            ("HIV8 Index", Side::Short),
            ("ESZ8 Index", Side::Short),
            ("NQZ8 Index", Side::Cover),
            ("GXH9 Index", Side::Short),
            ("VXX8 Index", Side::Buy),
            ("VXX8 Index", Side::Buy),
            ("HUV8 Index", Side::Sell),
            ("ESZ8 Index", Side::Sell),
            ("NQZ8 Index", Side::Buy),
            ("HUV8 Index", Side::Short),
            ("ESZ9 Index", Side::Cover),
        ];
        let groups = partition_into_groups(sequence(&trades));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 7);
        assert_eq!(groups[1].len(), 13);
        assert_eq!(groups[0].records()[6].instrument_id, "GXH9 Index");
        assert_eq!(groups[0].records()[6].side, Side::Cover);
        assert_eq!(groups[1].first().instrument_id, "GXH9 Index");
        assert_eq!(groups[1].first().side, Side::Sell);
    }

    fn arb_side() -> impl Strategy<Value = Side> {
        prop_oneof![
            Just(Side::Buy),
            Just(Side::Cover),
            Just(Side::Short),
            Just(Side::Sell),
        ]
    }

    fn arb_trades() -> impl Strategy<Value = Vec<TradeRecord>> {
        prop::collection::vec((0usize..4, arb_side(), 0i64..6), 0..40).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (instrument, side, seconds))| {
                    trade(["A", "B", "C", "D"][instrument], side, seconds, i)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_sort_is_idempotent(trades in arb_trades()) {
            let once = sort_chronologically(trades);
            let twice = sort_chronologically(once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_sort_is_stable_for_equal_timestamps(trades in arb_trades()) {
            let sorted = sort_chronologically(trades);
            for pair in sorted.windows(2) {
                let (a, b) = (&pair[0].execution_rank, &pair[1].execution_rank);
                prop_assert!(a.timestamp <= b.timestamp);
                if a.timestamp == b.timestamp {
                    prop_assert!(a.original_index < b.original_index);
                }
            }
        }

        #[test]
        fn prop_groups_concatenate_to_input(trades in arb_trades()) {
            let sorted = sort_chronologically(trades);
            let groups = partition_into_groups(sorted.clone());
            let flattened: Vec<TradeRecord> =
                groups.into_iter().flat_map(TradeGroup::into_records).collect();
            prop_assert_eq!(flattened, sorted);
        }

        #[test]
        fn prop_groups_are_conflict_free(trades in arb_trades()) {
            let groups = partition_into_groups(sort_chronologically(trades));
            for group in &groups {
                prop_assert!(!group.records().is_empty());
                for (i, a) in group.iter().enumerate() {
                    for b in &group.records()[i + 1..] {
                        prop_assert!(!conflicts(a, b));
                    }
                }
            }
        }

        #[test]
        fn prop_adjacent_groups_cannot_merge(trades in arb_trades()) {
            let groups = partition_into_groups(sort_chronologically(trades));
            for pair in groups.windows(2) {
                let opener = pair[1].first();
                prop_assert!(pair[0].iter().any(|r| conflicts(r, opener)));
            }
        }

        #[test]
        fn prop_partition_is_deterministic(trades in arb_trades()) {
            let sorted = sort_chronologically(trades);
            prop_assert_eq!(
                partition_into_groups(sorted.clone()),
                partition_into_groups(sorted)
            );
        }
    }
}
