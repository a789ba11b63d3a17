use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dlc::emitter::CppEmitter;
use dlc::pass::PassId;
use dlc::pipeline::{compile, CompileOptions};
use dlc::tree::Program;

// KPI-aligned benchmark scenarios.

const SIMPLE_CHAIN: &str = r#"{
  "platform": { "domain": "Audio", "rate": 44100 },
  "nodes": [
    { "block": { "name": "A", "type": "signal", "domain": "Audio", "default": 0.0 } },
    { "block": { "name": "B", "type": "signal", "domain": "Audio", "default": 0.0 } },
    { "block": { "name": "C", "type": "signal", "domain": "Audio", "default": 0.0 } },
    { "stream": { "members": [ { "name": { "name": "A" } }, { "name": { "name": "B" } }, { "name": { "name": "C" } } ] } }
  ]
}"#;

const MULTIRATE: &str = r#"{
  "platform": { "domain": "Audio", "domainOrder": ["Audio", "Control"], "rate": 44100 },
  "nodes": [
    { "block": { "name": "ControlDomain", "type": "_domainDefinition", "domainName": "Control", "rate": 100 } },
    { "block": { "name": "In", "type": "signal", "domain": "Audio", "default": 0.0 } },
    { "block": { "name": "Slow", "type": "signal", "domain": "Audio", "rate": 100, "default": 0.0 } },
    { "block": { "name": "Fast", "type": "signal", "domain": "Audio", "rate": 88200, "default": 0.0 } },
    { "block": { "name": "Link", "type": "signalbridge", "inputDomain": "Audio", "outputDomain": "Control", "default": 0.0 } },
    { "block": { "name": "Meter", "type": "signal", "domain": "Control", "default": 0.0 } },
    { "stream": { "members": [ { "name": { "name": "In" } }, { "name": { "name": "Fast" } }, { "name": { "name": "Slow" } } ] } },
    { "stream": { "members": [ { "name": { "name": "In" } }, { "name": { "name": "Link" } }, { "name": { "name": "Meter" } } ] } }
  ]
}"#;

const MODULES: &str = r#"{
  "platform": { "domain": "Audio", "rate": 44100 },
  "nodes": [
    { "block": { "name": "Osc", "type": "signal", "domain": "Audio", "default": 0.0 } },
    { "block": { "name": "Spk", "type": "signal", "domain": "Audio", "default": 0.0 } },
    { "block": { "name": "Gain", "type": "module",
        "blocks": [
          { "name": "In", "type": "signal", "default": 0.0 },
          { "name": "Out", "type": "signal", "default": 0.0 },
          { "name": "Amount", "type": "signal", "default": 0.5 }
        ],
        "ports": [
          { "name": "Input", "type": "mainInput", "block": "In" },
          { "name": "Output", "type": "mainOutput", "block": "Out" },
          { "name": "Amount", "type": "propertyInput", "block": "Amount" }
        ],
        "streams": [ { "members": [
          { "expression": { "type": "Multiply", "left": { "name": { "name": "In" } }, "right": { "name": { "name": "Amount" } } } },
          { "name": { "name": "Out" } }
        ] } ] } },
    { "stream": { "members": [
        { "name": { "name": "Osc" } },
        { "function": { "name": "Gain", "ports": [ { "name": "Amount", "value": { "value": 2.0 } } ] } },
        { "name": { "name": "Spk" } }
      ] } }
  ]
}"#;

fn scenarios() -> Vec<(&'static str, &'static str)> {
    vec![
        ("simple_chain", SIMPLE_CHAIN),
        ("multirate", MULTIRATE),
        ("modules", MODULES),
    ]
}

/// A program of `n` independent two-member streams over shared signals.
fn generate_scaling_tree(n_streams: usize) -> String {
    let mut nodes = Vec::new();
    for i in 0..=n_streams {
        nodes.push(format!(
            r#"{{"block": {{"name": "S{}", "type": "signal", "domain": "Audio", "default": 0.0}}}}"#,
            i
        ));
    }
    for i in 0..n_streams {
        nodes.push(format!(
            r#"{{"stream": {{"members": [{{"name": {{"name": "S{}"}}}}, {{"name": {{"name": "S{}"}}}}]}}}}"#,
            i,
            i + 1
        ));
    }
    format!(
        r#"{{"platform": {{"domain": "Audio", "rate": 44100}}, "nodes": [{}]}}"#,
        nodes.join(", ")
    )
}

// KPI: tree parsing latency.
fn bench_kpi_parse_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/parse_latency");

    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| black_box(Program::from_json(black_box(source)).ok()));
        });
    }

    group.finish();
}

// KPI: full compile latency (validate -> lower -> assemble -> render).
fn bench_kpi_full_compile_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/full_compile_latency");
    let options = CompileOptions::default();

    for (name, source) in scenarios() {
        let Ok(program) = Program::from_json(source) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::from_parameter(name), &program, |b, program| {
            b.iter(|| black_box(compile(black_box(program), &CppEmitter, &options).ok()));
        });
    }

    group.finish();
}

// KPI: lowering scaling vs number of streams.
fn bench_kpi_lower_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/lower_scaling");
    let options = CompileOptions {
        terminal: PassId::Assemble,
        ..CompileOptions::default()
    };

    for n_streams in [1_usize, 10, 50, 200] {
        let Ok(program) = Program::from_json(&generate_scaling_tree(n_streams)) else {
            continue;
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}streams", n_streams)),
            &program,
            |b, program| {
                b.iter(|| black_box(compile(black_box(program), &CppEmitter, &options).ok()));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_kpi_parse_latency,
    bench_kpi_full_compile_latency,
    bench_kpi_lower_scaling,
);
criterion_main!(benches);
