use chrono::{Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rust_decimal::Decimal;

use rxstock_core::AggregateId;
use rxstock_inventory::{
    BatchInput, Classification, InventoryCommand, Product, ProductDetails, ProductId,
    RegisterProduct, UnitSettings, allocate,
};

fn product_with_batches(count: usize) -> Product {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let product_id = ProductId::new(AggregateId::new());
    let mut product = Product::empty(product_id);
    product
        .execute(&InventoryCommand::RegisterProduct(RegisterProduct {
            product_id,
            details: ProductDetails {
                name: "Paracetamol 500mg".to_string(),
                code: "PCM-500".to_string(),
                brand: None,
                classification: Classification::OverTheCounter,
                reorder_threshold: 100,
                units: UnitSettings::default(),
            },
            occurred_at: start,
        }))
        .unwrap();

    for i in 0..count {
        // Interleave expiry dates so the sort has work to do.
        let days = ((i * 7919) % 720) as i64 + 30;
        let input = BatchInput::new(
            format!("LOT-{i}"),
            start + Duration::days(days),
            25,
            Decimal::new(120, 2),
            Decimal::new(350, 2),
        );
        product.restock(input, start).unwrap();
    }
    product
}

fn bench_allocate(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    let mut group = c.benchmark_group("allocate");

    for count in [10usize, 100, 1_000] {
        let product = product_with_batches(count);
        let requested = (count as u64 * 25) / 2;
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &product, |b, product| {
            b.iter(|| {
                allocate(
                    product.id_typed(),
                    black_box(product.batches()),
                    black_box(requested),
                    now,
                )
                .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_reduce_stock(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    let product = product_with_batches(500);

    c.bench_function("reduce_stock/500_batches", |b| {
        b.iter_batched(
            || product.clone(),
            |mut p| p.reduce_stock(black_box(40), now).unwrap(),
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_allocate, bench_reduce_stock);
criterion_main!(benches);
