//! Resolution Benchmarks
//!
//! Hot paths that run on every lookup or at bootstrap:
//! - Connection normalization (dedup key derivation)
//! - Dedup key resolution through the registry facade
//! - Full aggregation of a multi-package application

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pkgdb::connection::normalize;
use pkgdb::{aggregate, Package, RawConnection, Registry, TableDef, Target};

fn postgres(database: &str) -> RawConnection {
    RawConnection {
        driver: Some("postgres".into()),
        host: Some("db.internal".into()),
        port: Some(5432),
        database: Some(database.into()),
        username: Some("app".into()),
        password: Some("secret".into()),
        ..RawConnection::default()
    }
}

fn packages() -> Vec<Package> {
    (0..20)
        .map(|i| {
            let name = format!("pkg{i}");
            Package::new(name.clone())
                .main(i == 0)
                .default_connection(name.clone())
                .connection(name.clone(), postgres(&format!("db{}", i % 4)))
                .declare_table(TableDef::new(format!("{name}.items")))
        })
        .collect()
}

fn registry() -> Registry {
    aggregate(packages()).expect("Failed to aggregate packages")
}

fn bench_normalize(c: &mut Criterion) {
    let raw = postgres("app");
    c.bench_function("normalize_network_connection", |b| {
        b.iter(|| normalize(black_box("main"), black_box(&raw), black_box("app")));
    });
}

fn bench_resolve_key(c: &mut Criterion) {
    let registry = registry();

    c.bench_function("resolve_key_by_name", |b| {
        b.iter(|| registry.resolve_key(Target::named(black_box("pkg7"))));
    });

    c.bench_function("resolve_key_default", |b| {
        b.iter(|| registry.resolve_key(black_box(Target::default())));
    });

    c.bench_function("table_full_name_dotted", |b| {
        b.iter(|| registry.table_full_name(black_box("pkg3.items"), None));
    });
}

fn bench_aggregate(c: &mut Criterion) {
    c.bench_function("aggregate_20_packages", |b| {
        b.iter_batched(packages, aggregate, criterion::BatchSize::SmallInput);
    });
}

criterion_group!(benches, bench_normalize, bench_resolve_key, bench_aggregate);
criterion_main!(benches);
