use criterion::{criterion_group, BatchSize, Criterion};
use drynx_cryptography::{
    elgamal::{encrypt_with_nonce, Keypair},
    range::{RangeProof, RangeSigner},
};
use rand::{rngs::StdRng, SeedableRng};
use std::hint::black_box;

fn benchmark_range_proof(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let keys = Keypair::generate(&mut rng);
    for (u, l) in [(2u64, 8usize), (16, 2)] {
        for signers in [1usize, 3] {
            let published: Vec<_> = (0..signers)
                .map(|_| RangeSigner::new(&mut rng, u).published().clone())
                .collect();
            let ys: Vec<_> = published.iter().map(|p| p.public).collect();
            c.bench_function(
                &format!("{}/u={} l={} signers={}", module_path!(), u, l, signers),
                |b| {
                    b.iter_batched(
                        || {
                            let (ct, r) = encrypt_with_nonce(&mut rng, &keys.public, 200);
                            RangeProof::prove_aggregated(
                                &mut rng,
                                &published,
                                u,
                                l,
                                200,
                                &r,
                                &keys.public,
                                ct,
                                b"bench",
                            )
                            .unwrap()
                        },
                        |proof| black_box(proof.verify(u, l, &ys, &keys.public, b"bench")),
                        BatchSize::SmallInput,
                    );
                },
            );
        }
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = benchmark_range_proof
}
