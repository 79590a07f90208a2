//! 감사 로그 파서 벤치마크
//!
//! pgaudit 메시지, PostgreSQL 로그 라인, JSON 행 파서의 처리량을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use querywatch_core::pipeline::QueryParser;
use querywatch_pipeline::{JsonRowParser, PgAuditParser, PostgresLogLineParser};

/// pgaudit 짧은 메시지
const AUDIT_SHORT: &[u8] = b"AUDIT: SESSION,1,1,READ,SELECT,,,SELECT 1";

/// pgaudit 긴 메시지 (쉼표가 들어간 SQL 포함)
const AUDIT_LONG: &[u8] = b"AUDIT: OBJECT,42,3,WRITE,UPDATE,TABLE,public.accounts,UPDATE accounts SET balance = balance - 100, updated_at = now(), note = 'transfer, pending' WHERE id IN (SELECT account_id FROM transfers WHERE status = 'queued' AND created_at > now() - interval '5 minutes');,<not logged>";

/// 감사 레코드가 들어 있는 로그 라인
const LOGLINE_AUDIT: &[u8] = b"2024-01-15 12:00:00.123 UTC:10.0.0.5(52144):app@shop:[4711]:LOG:  AUDIT: SESSION,1,1,READ,SELECT,TABLE,public.users,SELECT * FROM users WHERE id = 1 OR 1=1;";

/// 감사 레코드가 아닌 로그 라인 (건너뛰는 비용)
const LOGLINE_OTHER: &[u8] =
    b"2024-01-15 12:00:00.123 UTC:10.0.0.5(52144):app@shop:[4711]:LOG:  checkpoint complete";

/// JSON 행 (중첩 필드 포함)
const JSON_ROW: &[u8] = br#"{"event_message":"AUDIT: SESSION,1,1,READ,SELECT,TABLE,public.orders,SELECT id, total FROM orders WHERE customer_id = 7","timestamp":1705320000000000,"parsed":{"user_name":"app","database_name":"shop","session_id":"65a5a1c0.1267","connection_from":"10.0.0.5:52144"}}"#;

fn bench_pgaudit(c: &mut Criterion) {
    let parser = PgAuditParser::new();

    let mut group = c.benchmark_group("pgaudit");
    group.throughput(Throughput::Elements(1));
    group.bench_function("short", |b| {
        b.iter(|| parser.parse(black_box(AUDIT_SHORT)).unwrap())
    });
    group.bench_function("long_with_parameter", |b| {
        b.iter(|| parser.parse(black_box(AUDIT_LONG)).unwrap())
    });

    group.throughput(Throughput::Elements(1000));
    group.bench_function("throughput_1000", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                parser.parse(black_box(AUDIT_SHORT)).unwrap();
            }
        })
    });
    group.finish();
}

fn bench_logline(c: &mut Criterion) {
    let parser = PostgresLogLineParser::new();

    let mut group = c.benchmark_group("postgres_log");
    group.throughput(Throughput::Elements(1));
    for (name, line) in [("audit", LOGLINE_AUDIT), ("non_audit", LOGLINE_OTHER)] {
        group.bench_with_input(BenchmarkId::from_parameter(name), line, |b, line| {
            b.iter(|| parser.parse(black_box(line)).unwrap())
        });
    }
    group.finish();
}

fn bench_json(c: &mut Criterion) {
    let parser = JsonRowParser::default();

    let mut group = c.benchmark_group("json_row");
    group.throughput(Throughput::Bytes(JSON_ROW.len() as u64));
    group.bench_function("nested_fields", |b| {
        b.iter(|| parser.parse(black_box(JSON_ROW)).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_pgaudit, bench_logline, bench_json);
criterion_main!(benches);
