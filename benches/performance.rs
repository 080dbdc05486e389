//! Performance benchmarks for the equity sim execution core
//!
//! Run with: `cargo bench`
//! View results: `open target/criterion/report/index.html`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use equity_sim_core::ledger::Ledger;
use equity_sim_core::orders::{OrderStatus, OrderStore, Side};

fn benchmark_reserve_cash(c: &mut Criterion) {
    let ledger = Ledger::open_in_memory().unwrap();
    let account = ledger.create_account("bench_user", 1_000_000_000).unwrap();
    c.bench_function("ledger_reserve_then_release_cash", |b| {
        b.iter(|| {
            ledger.reserve_cash(&account.account_id, 1_000, "bench").unwrap();
            ledger.release_cash(&account.account_id, black_box(1_000), "bench").unwrap();
        })
    });
}

fn benchmark_apply_buy_fill(c: &mut Criterion) {
    let ledger = Ledger::open_in_memory().unwrap();
    let account = ledger.create_account("bench_user", 1_000_000_000).unwrap();
    c.bench_function("ledger_apply_buy_fill", |b| {
        b.iter(|| {
            ledger
                .apply_buy_fill(&account.account_id, "005930", black_box(1), black_box(70_000))
                .unwrap();
        })
    });
}

fn benchmark_order_insert(c: &mut Criterion) {
    let store = OrderStore::open_in_memory().unwrap();
    c.bench_function("order_store_insert", |b| {
        b.iter(|| {
            store
                .insert(Side::Buy, "acc_bench", "005930", black_box(70_000), black_box(1), OrderStatus::Pending)
                .unwrap();
        })
    });
}

criterion_group!(benches, benchmark_reserve_cash, benchmark_apply_buy_fill, benchmark_order_insert);
criterion_main!(benches);
