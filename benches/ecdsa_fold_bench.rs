use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ecdsa_fold::{
    hash_message, Engine, EngineConfig, PublicParameters, SignatureInstance, SigningKey,
};

fn signatures(count: usize) -> Vec<SignatureInstance> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let key = SigningKey::random(&mut rng);
            key.sign_digest(&hash_message(format!("bench message {}", i).as_bytes()))
        })
        .collect()
}

fn bench_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("setup");
    group.sample_size(10);
    group.bench_function("generate_params", |b| {
        b.iter(|| black_box(PublicParameters::setup_with_seed([7u8; 32]).unwrap()));
    });
    group.finish();
}

fn bench_prove_and_verify(c: &mut Criterion) {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let params = engine.setup_with_seed([7u8; 32]).unwrap();

    let mut prove = c.benchmark_group("prove");
    prove.sample_size(10);
    for count in [1usize, 2, 4, 8] {
        let batch = signatures(count);
        prove.bench_with_input(BenchmarkId::from_parameter(count), &batch, |b, batch| {
            b.iter(|| black_box(engine.prove(&params, black_box(batch)).unwrap()));
        });
    }
    prove.finish();

    let mut verify = c.benchmark_group("verify");
    verify.sample_size(10);
    for count in [1usize, 2, 4, 8] {
        let batch = signatures(count);
        let proof = engine.prove(&params, &batch).unwrap();
        verify.bench_with_input(BenchmarkId::from_parameter(count), &batch, |b, batch| {
            b.iter(|| {
                let accepted = engine.verify(&params, black_box(&proof), black_box(batch));
                black_box(accepted.unwrap());
            });
        });
    }
    verify.finish();
}

criterion_group!(benches, bench_setup, bench_prove_and_verify);
criterion_main!(benches);
