use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dbvault::cipher::{CipherEngine, EncryptionKey};
use dbvault::compression::{compress_with_level, decompress};
use dbvault::envelope::Envelope;

/// Roughly what pg_dump emits: DDL followed by COPY rows
fn synthetic_dump(rows: usize) -> Vec<u8> {
    let mut sql = String::from(
        "CREATE TABLE public.page_views (id bigint NOT NULL, path text, viewed_at timestamptz);\n\
         COPY public.page_views (id, path, viewed_at) FROM stdin;\n",
    );
    for i in 0..rows {
        sql.push_str(&format!(
            "{}\t/dashboard/{}\t2024-06-{:02} 12:{:02}:00+00\n",
            i,
            i % 97,
            i % 28 + 1,
            i % 60
        ));
    }
    sql.push_str("\\.\n");
    sql.into_bytes()
}

fn benchmark_compression(c: &mut Criterion) {
    let dump = synthetic_dump(20_000);
    let mut group = c.benchmark_group("compression");
    group.throughput(Throughput::Bytes(dump.len() as u64));

    for level in [1u32, 6, 9] {
        group.bench_with_input(BenchmarkId::new("gzip", level), &level, |b, &level| {
            b.iter(|| compress_with_level(black_box(&dump), level).unwrap())
        });
    }

    let compressed = compress_with_level(&dump, 6).unwrap();
    group.bench_function("gunzip", |b| b.iter(|| decompress(black_box(&compressed)).unwrap()));
    group.finish();
}

fn benchmark_cipher(c: &mut Criterion) {
    let engine = CipherEngine::new(&EncryptionKey::new([3u8; 32]));
    let mut group = c.benchmark_group("cipher");

    for size in [4 * 1024usize, 1024 * 1024, 8 * 1024 * 1024] {
        let plaintext = vec![0x42u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("seal", size), &plaintext, |b, plaintext| {
            b.iter(|| engine.seal(black_box(plaintext)).unwrap())
        });

        let payload = engine.seal(&plaintext).unwrap();
        group.bench_with_input(BenchmarkId::new("open", size), &payload, |b, payload| {
            b.iter(|| {
                let envelope = Envelope::from_bytes(black_box(payload)).unwrap();
                engine.open(&envelope).unwrap()
            })
        });
    }
    group.finish();
}

fn benchmark_full_pipeline(c: &mut Criterion) {
    let engine = CipherEngine::new(&EncryptionKey::new([3u8; 32]));
    let dump = synthetic_dump(20_000);

    c.bench_function("seal_dump", |b| {
        b.iter(|| {
            let compressed = compress_with_level(black_box(&dump), 6).unwrap();
            engine.seal(&compressed).unwrap()
        })
    });

    let payload = engine.seal(&compress_with_level(&dump, 6).unwrap()).unwrap();
    c.bench_function("open_dump", |b| {
        b.iter(|| {
            let envelope = Envelope::from_bytes(black_box(&payload)).unwrap();
            decompress(&engine.open(&envelope).unwrap()).unwrap()
        })
    });
}

criterion_group!(
    benches,
    benchmark_compression,
    benchmark_cipher,
    benchmark_full_pipeline
);
criterion_main!(benches);
