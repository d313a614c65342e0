use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use zk_circuit_pipeline::{
    Argument, CircuitCatalog, CompileOptions, Pipeline, PipelineConfig, ProofSystem,
};

fn sample_arguments(name: &str) -> Vec<Argument> {
    match name {
        "empty" => vec![],
        "a_square" => vec![2u64.into()],
        "only_assert" => vec![20u64.into()],
        "basic_age_check" => vec![20u64.into(), 5u64.into()],
        "basic_age_check_plus_field" | "basic_age_check_plus_field_multiple" => {
            vec![20u64.into(), 5u64.into(), 3u64.into()]
        }
        _ => vec![20u64.into(), 5u64.into(), Argument::array(1..=100)],
    }
}

fn bench_system(c: &mut Criterion, proof_system: ProofSystem) {
    let config = PipelineConfig {
        proof_system,
        ..Default::default()
    };
    let pipeline = Pipeline::new(config).unwrap();
    let catalog = CircuitCatalog::builtin();

    let mut prove = c.benchmark_group(format!("Bench Prove: Verifiable Method ({proof_system})"));
    prove.sample_size(10);
    for definition in catalog.iter() {
        let artifact = pipeline
            .compile(definition, &CompileOptions::default())
            .unwrap();
        let keys = pipeline.setup(&artifact).unwrap();
        let (witness, _) = pipeline
            .compute_witness(&artifact, &sample_arguments(&definition.name))
            .unwrap();
        prove.bench_function(BenchmarkId::new("Circuit", &definition.name), |b| {
            b.iter(|| {
                pipeline
                    .prove(black_box(&artifact), black_box(&witness), &keys.proving_key)
                    .unwrap()
            })
        });
    }
    prove.finish();

    let mut verify = c.benchmark_group(format!("Bench Verify: Verifiable Method ({proof_system})"));
    for definition in catalog.iter() {
        let run = pipeline
            .run(definition, &sample_arguments(&definition.name))
            .unwrap();
        assert!(run.verified);
        verify.bench_function(BenchmarkId::new("Circuit", &definition.name), |b| {
            b.iter(|| {
                assert!(run
                    .keys
                    .verification_key
                    .verify(black_box(&run.proof), black_box(&run.witness.public_inputs))
                    .unwrap())
            })
        });
    }
    verify.finish();
}

fn bench_snark(c: &mut Criterion) {
    bench_system(c, ProofSystem::SpartanSnark);
}

fn bench_nizk(c: &mut Criterion) {
    bench_system(c, ProofSystem::SpartanNizk);
}

criterion_group!(benches, bench_snark, bench_nizk);
criterion_main!(benches);
