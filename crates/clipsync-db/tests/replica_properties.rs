//! Property tests for the replica store and document projections.

use chrono::{DateTime, TimeZone, Utc};
use clipsync_db::{Document, Item, ItemId, MediaRef, ReplicaStore, Run};
use proptest::prelude::*;
use std::collections::HashMap;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[derive(Clone, Debug)]
enum Op {
    Upsert { id: u8, secs: i64, text: String },
    Remove { id: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..16, 0i64..50, "[a-z]{0,4}").prop_map(|(id, secs, text)| Op::Upsert { id, secs, text }),
        1 => (0u8..16).prop_map(|id| Op::Remove { id }),
    ]
}

fn is_newest_first(items: &[Item]) -> bool {
    items.windows(2).all(|w| w[0].created_at >= w[1].created_at)
}

proptest! {
    #[test]
    fn prop_order_and_uniqueness(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let mut store = ReplicaStore::new();
        let mut model: HashMap<u8, (i64, String)> = HashMap::new();

        for op in ops {
            match op {
                Op::Upsert { id, secs, text } => {
                    store.upsert(Item::new(ItemId::new(id.to_string()), Document::text(text.clone()), at(secs)));
                    model.insert(id, (secs, text));
                }
                Op::Remove { id } => {
                    store.remove(&ItemId::new(id.to_string()));
                    model.remove(&id);
                }
            }
            let all = store.all();
            prop_assert!(is_newest_first(&all));
            prop_assert_eq!(all.len(), model.len());
        }

        for (id, (secs, text)) in model {
            let item = store.get(&ItemId::new(id.to_string())).cloned();
            prop_assert!(item.is_some());
            let item = item.unwrap();
            prop_assert_eq!(item.created_at, at(secs));
            prop_assert_eq!(item.plain_text(), text);
        }
    }

    #[test]
    fn prop_upsert_twice_equals_once(ops in prop::collection::vec(op_strategy(), 0..32)) {
        let mut once = ReplicaStore::new();
        let mut twice = ReplicaStore::new();
        for op in ops {
            match op {
                Op::Upsert { id, secs, text } => {
                    let item = Item::new(ItemId::new(id.to_string()), Document::text(text), at(secs));
                    once.upsert(item.clone());
                    twice.upsert(item.clone());
                    twice.upsert(item);
                }
                Op::Remove { id } => {
                    once.remove(&ItemId::new(id.to_string()));
                    twice.remove(&ItemId::new(id.to_string()));
                    twice.remove(&ItemId::new(id.to_string()));
                }
            }
        }
        prop_assert_eq!(once.all(), twice.all());
    }

    #[test]
    fn prop_media_never_reaches_plain_text(
        parts in prop::collection::vec(prop_oneof!["[a-z ]{0,5}".prop_map(Some), Just(None)], 0..12)
    ) {
        let runs: Vec<Run> = parts
            .iter()
            .map(|part| match part {
                Some(text) => Run::text(text.clone()),
                None => Run::image(MediaRef::new("https://cdn.example/x.png")),
            })
            .collect();
        let expected: String = parts.iter().flatten().cloned().collect();
        let doc = Document::from_runs(runs);

        prop_assert_eq!(doc.to_plain_text(), expected.clone());
        prop_assert_eq!(Document::normalize(&doc.to_raw()), doc);
    }
}

#[test]
fn older_item_lands_at_tail() {
    let mut store = ReplicaStore::new();
    store.upsert(Item::new(ItemId::new("new"), Document::text("n"), at(100)));
    store.upsert(Item::new(ItemId::new("mid"), Document::text("m"), at(50)));
    store.upsert(Item::new(ItemId::new("ancient"), Document::text("a"), at(-1000)));

    let ids: Vec<_> = store.ids().into_iter().map(|id| id.0).collect();
    assert_eq!(ids, vec!["new", "mid", "ancient"]);
}
