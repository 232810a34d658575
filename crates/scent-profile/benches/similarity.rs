use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scent_profile::{calculate_similarity, ProfileBuilder, QuizResponse};

fn responses(seed: usize) -> Vec<QuizResponse> {
    let traits = ["bold", "fresh", "romantic", "woody", "calm", "spicy", "floral", "earthy"];
    (0..6)
        .map(|i| {
            let a = traits[(seed + i) % traits.len()];
            let b = traits[(seed + i * 3 + 1) % traits.len()];
            QuizResponse::new(format!("q{i}"), [a, b], [0.6, 0.4])
        })
        .collect()
}

fn bench_generate_profile(c: &mut Criterion) {
    let builder = ProfileBuilder::new();
    let input = responses(1);
    c.bench_function("generate_profile_6_responses", |b| {
        b.iter(|| builder.generate_profile(black_box(&input), "bench"));
    });
}

fn bench_similarity(c: &mut Criterion) {
    let builder = ProfileBuilder::new();
    let query = builder.generate_profile(&responses(0), "q");
    let candidates: Vec<_> = (0..20)
        .map(|i| builder.generate_profile(&responses(i), "c"))
        .collect();

    c.bench_function("similarity_single", |b| {
        b.iter(|| calculate_similarity(black_box(&query), black_box(&candidates[3])));
    });
    c.bench_function("similarity_batch_20", |b| {
        b.iter(|| {
            candidates
                .iter()
                .map(|c| calculate_similarity(&query, c))
                .sum::<f64>()
        });
    });
}

criterion_group!(benches, bench_generate_profile, bench_similarity);
criterion_main!(benches);
