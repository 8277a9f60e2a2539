use std::collections::BTreeMap;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use stockflow_core::{PartyId, ProductId};
use stockflow_ledger::{Customer, OrderLineRequest, OrderRequest, StockKey, allocate};

/// Order with `lines` products where every line needs a seller/distributor split.
fn split_order(lines: usize) -> (OrderRequest, BTreeMap<StockKey, i64>) {
    let request = OrderRequest {
        seller_id: PartyId::new(),
        distributor_id: PartyId::new(),
        customer: Customer::new("Bench Customer", None),
        lines: (0..lines)
            .map(|_| OrderLineRequest::new(ProductId::new(), 10, 4599))
            .collect(),
    };

    let mut on_hand = BTreeMap::new();
    for line in &request.lines {
        on_hand.insert(request.seller_key(line.product_id), 3);
        on_hand.insert(request.distributor_key(line.product_id), 20);
    }
    (request, on_hand)
}

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");
    for lines in [1usize, 10, 100] {
        let (request, on_hand) = split_order(lines);
        group.bench_with_input(BenchmarkId::from_parameter(lines), &lines, |b, _| {
            b.iter(|| allocate(black_box(&request), black_box(&on_hand)))
        });
    }
    group.finish();
}

fn bench_stock_keys(c: &mut Criterion) {
    let (request, _) = split_order(100);
    c.bench_function("stock_keys/100", |b| b.iter(|| black_box(&request).stock_keys()));
}

criterion_group!(benches, bench_allocate, bench_stock_keys);
criterion_main!(benches);
