use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::Value;

use bioforge_ai::sanitize;

fn bench_sanitize(c: &mut Criterion) {
    let fenced = format!(
        "```json\n{{\"score\": 80, \"summary\": \"{}\", \"findings\": [\"a\", \"b\", \"c\"]}}\n```",
        "lorem ipsum ".repeat(50)
    );
    let prose = format!(
        "Sure, here is the result.\n[{}]\nLet me know if you need anything else.",
        (0..50)
            .map(|i| format!("{{\"title\": \"idea {i}\", \"description\": \"text with }} and {{\"}}"))
            .collect::<Vec<_>>()
            .join(",")
    );
    let truncated = fenced[..fenced.len() / 2].to_string();

    c.bench_function("sanitize_fenced_object", |b| {
        b.iter(|| sanitize::<Value>(black_box(&fenced), Value::Null))
    });
    c.bench_function("sanitize_array_with_prose", |b| {
        b.iter(|| sanitize::<Value>(black_box(&prose), Value::Null))
    });
    c.bench_function("sanitize_truncated_fallback", |b| {
        b.iter(|| sanitize::<Value>(black_box(&truncated), Value::Null))
    });
}

criterion_group!(benches, bench_sanitize);
criterion_main!(benches);
