use criterion::{black_box, criterion_group, criterion_main, Criterion};

// Hot paths on the requester side. Run with:
//    cargo bench

const REACT_SNIPPET: &str = r#"import React, { useState, useEffect } from 'react';

export default function TodoList({ initial }) {
  const [items, setItems] = useState(initial);
  const [draft, setDraft] = useState('');
  useEffect(() => { document.title = `${items.length} todos`; }, [items]);
  return (
    <div className="todos">
      <input value={draft} onChange={(e) => setDraft(e.target.value)} />
      <button onClick={() => setItems([...items, draft])}>Add</button>
      <ul>{items.map((item, i) => <li key={i}>{item}</li>)}</ul>
    </div>
  );
}"#;

const VUE_SNIPPET: &str = r#"<template>
  <div class="counter">
    <button @click="count++">Count: {{ count }}</button>
    <p v-if="count > 5">That's a lot</p>
  </div>
</template>
<script>
export default { data() { return { count: 0 }; } };
</script>"#;

const VANILLA_SNIPPET: &str = r#"const list = document.querySelector('#list');
for (let i = 0; i < 10; i++) {
  const li = document.createElement('li');
  li.textContent = 'Item ' + i;
  list.appendChild(li);
}"#;

fn bench_detect(c: &mut Criterion) {
    c.bench_function("detect_react", |b| b.iter(|| comarkup::detect(black_box(REACT_SNIPPET))));
    c.bench_function("detect_vue", |b| b.iter(|| comarkup::detect(black_box(VUE_SNIPPET))));
    c.bench_function("detect_vanilla", |b| b.iter(|| comarkup::detect(black_box(VANILLA_SNIPPET))));

    // Large inputs: a snippet repeated until it looks like a whole page of code
    let large = VANILLA_SNIPPET.repeat(200);
    c.bench_function("analyze_large_vanilla", |b| b.iter(|| comarkup::analyze(black_box(&large))));
}

fn bench_transpile(c: &mut Criterion) {
    c.bench_function("jsx_transpile", |b| {
        b.iter(|| comarkup::jsx::transpile(black_box(REACT_SNIPPET)).unwrap())
    });
    c.bench_function("wrap_react", |b| {
        b.iter(|| comarkup::wrappers::wrap(black_box(REACT_SNIPPET), comarkup::FrameworkId::React).unwrap())
    });
}

fn bench_template(c: &mut Criterion) {
    use comarkup::template::{RenderRequest, Templates};

    let templates = Templates::default();
    let request = RenderRequest {
        content: Some("<ul id=\"list\"></ul>".to_string()),
        script: Some(VANILLA_SNIPPET.to_string()),
        style: Some("li { color: red; }".to_string()),
    };
    c.bench_function("template_render_vanilla", |b| {
        b.iter(|| templates.render(comarkup::FrameworkId::Vanilla, black_box(&request)))
    });
}

criterion_group!(benches, bench_detect, bench_transpile, bench_template);
criterion_main!(benches);
