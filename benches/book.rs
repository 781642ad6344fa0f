use criterion::{black_box, criterion_group, criterion_main, Criterion};

use depthsync::engine::analytics::AnalyticsView;
use depthsync::engine::book::OrderBookStore;
use depthsync::engine::types::Side;
use depthsync::market_data::sequencer::EventSequencer;
use depthsync::market_data::types::DiffEvent;
use depthsync::PriceLevel;

fn seeded_book(levels: i64) -> OrderBookStore {
    let mut book = OrderBookStore::new();
    for i in 0..levels {
        book.apply_level(Side::Bid, 10_000 - i, 1 + i as u64);
        book.apply_level(Side::Ask, 10_001 + i, 1 + i as u64);
    }
    book
}

fn bench_apply_level(c: &mut Criterion) {
    let mut book = seeded_book(1000);
    let mut i = 0i64;
    c.bench_function("apply_level_upsert_delete", |b| {
        b.iter(|| {
            let price = 9_000 + (i % 1000);
            book.apply_level(Side::Bid, black_box(price), black_box((i % 3) as u64));
            i += 1;
        })
    });
}

fn bench_queries(c: &mut Criterion) {
    let book = seeded_book(1000);
    c.bench_function("top_levels_20", |b| b.iter(|| black_box(book.top_levels(black_box(20)))));
    c.bench_function("book_pressure_20", |b| {
        b.iter(|| black_box(AnalyticsView::new(&book, 100).book_pressure(black_box(20))))
    });
}

fn bench_sequencer(c: &mut Criterion) {
    c.bench_function("ingest_synced_event", |b| {
        let mut book = seeded_book(1000);
        let mut seq = EventSequencer::new();
        seq.set_anchor(0, &mut book);
        let mut u = 0u64;
        b.iter(|| {
            let event = DiffEvent {
                first_update_id: u + 1,
                final_update_id: u + 5,
                prev_final_update_id: Some(u),
                bids: vec![PriceLevel::new(9_990, u % 7)],
                asks: vec![PriceLevel::new(10_010, u % 5)],
            };
            u += 5;
            let _ = black_box(seq.ingest(event, &mut book));
        })
    });
}

criterion_group!(benches, bench_apply_level, bench_queries, bench_sequencer);
criterion_main!(benches);
