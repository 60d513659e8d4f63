use std::collections::BTreeMap;
use std::sync::Arc;
use crate::interfaces::Clock;
use crate::types::{EntityId, PriceQuote, PriceSnapshot, SourceId};

/// Merges per-source quotes for one entity into a canonical snapshot.
pub struct SnapshotAggregator {
    clock: Arc<dyn Clock>,
}

impl SnapshotAggregator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        SnapshotAggregator { clock }
    }

    pub fn aggregate(
        &self,
        entity_id: EntityId,
        quotes: BTreeMap<SourceId, PriceQuote>,
    ) -> PriceSnapshot {
        let (best_price, best_source_id) = match select_best(&quotes) {
            Some(best) => (best.price, Some(best.source_id.clone())),
            None => (None, None),
        };

        let max_discount = quotes
            .values()
            .filter(|q| q.available)
            .map(|q| q.discount_percent)
            .max()
            .unwrap_or(0);

        PriceSnapshot {
            entity_id,
            timestamp: self.clock.now(),
            per_source: quotes,
            best_price,
            best_source_id,
            max_discount,
        }
    }
}

/// Cheapest available priced quote; ties go to the higher discount, then the smaller source id.
pub fn select_best(quotes: &BTreeMap<SourceId, PriceQuote>) -> Option<&PriceQuote> {
    quotes
        .values()
        .filter(|q| q.available && q.price.is_some())
        .min_by(|a, b| {
            a.price
                .cmp(&b.price)
                .then_with(|| b.discount_percent.cmp(&a.discount_percent))
                .then_with(|| a.source_id.cmp(&b.source_id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::ManualClock;
    use crate::types::Price;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn aggregator() -> SnapshotAggregator {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        SnapshotAggregator::new(Arc::new(clock))
    }

    fn quote(source: &str, price: &str, discount: u8) -> PriceQuote {
        let p: Price = price.parse().unwrap();
        PriceQuote::available(SourceId::from(source), p, p, discount)
    }

    fn quotes(list: Vec<PriceQuote>) -> BTreeMap<SourceId, PriceQuote> {
        list.into_iter().map(|q| (q.source_id.clone(), q)).collect()
    }

    #[test]
    fn equal_price_goes_to_higher_discount() {
        let mut unavailable = PriceQuote::unavailable(SourceId::from("C"));
        unavailable.price = Some("8".parse().unwrap());
        let snapshot = aggregator().aggregate(
            EntityId::from("620"),
            quotes(vec![quote("A", "10", 0), quote("B", "10", 20), unavailable]),
        );

        assert_eq!(snapshot.best_price, Some("10".parse().unwrap()));
        assert_eq!(snapshot.best_source_id, Some(SourceId::from("B")));
        assert_eq!(snapshot.max_discount, 20);
        assert_eq!(snapshot.per_source.len(), 3);
    }

    #[test]
    fn all_unavailable_has_no_best() {
        let snapshot = aggregator().aggregate(
            EntityId::from("620"),
            quotes(vec![
                PriceQuote::unavailable(SourceId::from("A")),
                PriceQuote::unavailable(SourceId::from("B")),
            ]),
        );
        assert_eq!(snapshot.best_price, None);
        assert_eq!(snapshot.best_source_id, None);
        assert_eq!(snapshot.max_discount, 0);
    }

    #[test]
    fn full_tie_goes_to_smallest_source_id() {
        let snapshot = aggregator().aggregate(
            EntityId::from("1"),
            quotes(vec![quote("steam", "5", 10), quote("cheapshark", "5", 10)]),
        );
        assert_eq!(snapshot.best_source_id, Some(SourceId::from("cheapshark")));
    }

    #[test]
    fn max_discount_is_independent_of_best_source() {
        let snapshot = aggregator().aggregate(
            EntityId::from("1"),
            quotes(vec![quote("A", "3", 0), quote("B", "4", 60)]),
        );
        assert_eq!(snapshot.best_source_id, Some(SourceId::from("A")));
        assert_eq!(snapshot.max_discount, 60);
    }

    #[test]
    fn timestamp_comes_from_clock() {
        let snapshot = aggregator().aggregate(EntityId::from("1"), BTreeMap::new());
        assert_eq!(snapshot.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    proptest! {
        #[test]
        fn best_price_is_minimum_available_price(
            entries in proptest::collection::vec((0i64..10_000, 0u8..=100, any::<bool>()), 0..8)
        ) {
            let list: Vec<PriceQuote> = entries
                .iter()
                .enumerate()
                .map(|(i, (cents, discount, available))| {
                    let p = Price::from_minor_units(*cents);
                    let source = SourceId::new(format!("s{}", i));
                    let mut q = PriceQuote::available(source, p, p, *discount);
                    q.available = *available;
                    q
                })
                .collect();

            let expected = list.iter().filter(|q| q.available).filter_map(|q| q.price).min();
            let expected_discount = list
                .iter()
                .filter(|q| q.available)
                .map(|q| q.discount_percent)
                .max()
                .unwrap_or(0);
            let snapshot = aggregator().aggregate(EntityId::from("x"), quotes(list));

            prop_assert_eq!(snapshot.best_price, expected);
            prop_assert_eq!(snapshot.best_source_id.is_some(), expected.is_some());
            prop_assert_eq!(snapshot.max_discount, expected_discount);
            if let Some(best) = snapshot.best_quote() {
                prop_assert!(best.available);
                prop_assert_eq!(best.price, snapshot.best_price);
            }
        }
    }
}
