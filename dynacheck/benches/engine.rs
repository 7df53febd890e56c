use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use async_trait::async_trait;
use dynacheck::{
    Check, CheckConfig, CheckError, CheckResult, Engine, EngineConfigBuilder, RunContext,
    ScheduledCheck,
};

/// A check that passes straight away, so only the engine is measured
#[derive(Debug, Default)]
struct Noop {
    config: CheckConfig,
}

#[async_trait]
impl Check for Noop {
    fn check_type(&self) -> &'static str {
        "noop"
    }

    fn init(&mut self, config: CheckConfig, _definition: &[u8]) -> Result<(), CheckError> {
        self.config = config;
        Ok(())
    }

    async fn run(&self, _ctx: RunContext, result: CheckResult) -> CheckResult {
        result.pass()
    }

    fn config(&self) -> CheckConfig {
        self.config.clone()
    }
}

fn batch(size: usize) -> Vec<ScheduledCheck> {
    (0..size)
        .map(|index| {
            let mut check = Noop::default();
            check
                .init(
                    CheckConfig::new(format!("noop-{}", index), "noop".to_string(), "bench".to_string(), 1.0),
                    b"{}",
                )
                .unwrap();
            ScheduledCheck::new(Box::new(check))
        })
        .collect()
}

fn engine_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let engine = Engine::new(EngineConfigBuilder::default().build().unwrap());

    let mut fan_out = c.benchmark_group("Fan out");
    for size in [1, 16, 256] {
        let checks = batch(size);
        fan_out.bench_with_input(BenchmarkId::from_parameter(size), &checks, |b, checks| {
            b.iter(|| rt.block_on(engine.run_batch(black_box(checks))));
        });
    }
    fan_out.finish();
}

criterion_group!(benches, engine_benchmark);
criterion_main!(benches);
