use criterion::{criterion_group, BatchSize, Criterion};
use drynx_cryptography::{
    elgamal::{encrypt_vector, Keypair},
    shuffle::shuffle,
};
use rand::{rngs::StdRng, SeedableRng};
use std::hint::black_box;

fn benchmark_shuffle_verify(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let keys = Keypair::generate(&mut rng);
    for n in [10usize, 100] {
        let values: Vec<i64> = (0..n as i64).collect();
        c.bench_function(&format!("{}/n={}", module_path!(), n), |b| {
            b.iter_batched(
                || {
                    let (inputs, _) = encrypt_vector(&mut rng, &keys.public, &values);
                    let (outputs, proof) =
                        shuffle(&mut rng, &keys.public, &inputs, None, b"bench").unwrap();
                    (inputs, outputs, proof)
                },
                |(inputs, outputs, proof)| {
                    black_box(proof.verify(&keys.public, &inputs, &outputs, b"bench"))
                },
                BatchSize::SmallInput,
            );
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = benchmark_shuffle_verify
}
