//! Negotiate Hot Path Benchmarks
//!
//! Measures the per-request work done before and after Kerberos: header
//! classification, subnet checks, channel binding setup and realm routing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use negotiate_idp::negotiate::binding::{ChannelBinding, ChannelBindingSet};
use negotiate_idp::negotiate::eligibility::{EligibilityFilter, Subnet};
use negotiate_idp::negotiate::engine::{NegotiationEngine, ServicePrincipal, UnavailableAcceptor};
use negotiate_idp::negotiate::realm::RealmTable;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

const SHA256_HASH: &str =
    "AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89";

/// Benchmark classification of `Authorization` headers
fn bench_engine_attempt(c: &mut Criterion) {
    let engine = NegotiationEngine::new(
        Arc::new(UnavailableAcceptor),
        "/etc/krb5.keytab".into(),
        ServicePrincipal::Default,
    );

    let mut group = c.benchmark_group("engine_attempt");

    for (name, header) in [
        ("no_token", None),
        ("basic", Some("Basic YWxpY2U6d29uZGVybGFuZA==")),
        ("negotiate", Some("Negotiate YIIGfwYGKwYBBQUCoIIGczCCBm+gMDAuBgkqhkiC9xIBAgIGCSqGSIb3")),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &header, |b, header| {
            b.iter(|| {
                let outcome = engine.attempt(black_box(*header));
                black_box(outcome).ok();
            });
        });
    }

    group.finish();
}

/// Benchmark subnet membership checks
fn bench_subnet_check(c: &mut Criterion) {
    let subnets: Vec<String> = ["10.0.0.0/8", "192.168.0.0/16", "2001:db8::/32"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let filter = EligibilityFilter::from_config(Some(subnets.as_slice())).unwrap();
    let subnet: Subnet = "10.0.0.0/8".parse().unwrap();

    let mut group = c.benchmark_group("subnet");

    let v4: IpAddr = "10.20.30.40".parse().unwrap();
    let v6: IpAddr = "2001:db8::1".parse().unwrap();
    let miss: IpAddr = "172.16.0.1".parse().unwrap();

    group.bench_function("contains_v4", |b| {
        b.iter(|| black_box(subnet.contains(black_box(v4))));
    });

    for (name, ip) in [("match_v4", v4), ("match_v6", v6), ("miss", miss)] {
        group.bench_with_input(BenchmarkId::new("check_mask", name), &ip, |b, ip| {
            b.iter(|| black_box(filter.check_mask(black_box(Some(*ip)))));
        });
    }

    group.finish();
}

/// Benchmark channel binding setup
fn bench_channel_binding(c: &mut Criterion) {
    let hashes = [SHA256_HASH; 4];

    c.bench_function("binding_set_parse", |b| {
        b.iter(|| black_box(ChannelBindingSet::parse(black_box(&hashes)).ok()));
    });

    let stripped = SHA256_HASH.replace(':', "");
    c.bench_function("binding_build", |b| {
        b.iter(|| black_box(ChannelBinding::build(black_box(&stripped)).ok()));
    });
}

/// Benchmark realm routing
fn bench_realm_route(c: &mut Criterion) {
    let mut entries: BTreeMap<String, String> = (0..32)
        .map(|i| (format!("REALM{}.EXAMPLE.COM", i), format!("ldap-{}", i)))
        .collect();
    entries.insert("*".into(), "ldap-default".into());
    let table = RealmTable::new(&entries);

    let mut group = c.benchmark_group("realm_route");

    for principal in ["alice@REALM7.EXAMPLE.COM", "bob@OTHER.ORG", "no-realm"] {
        group.bench_with_input(
            BenchmarkId::from_parameter(principal),
            &principal,
            |b, principal| {
                b.iter(|| black_box(table.route(black_box(principal))));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_engine_attempt,
    bench_subnet_check,
    bench_channel_binding,
    bench_realm_route,
);
criterion_main!(benches);
