use criterion::{black_box, criterion_group, criterion_main, Criterion};
use graphalign::{Aligner, Alignment, Edge, Graph, Node};

/// Chain of single-base bubbles: REF/ALT pairs between anchor nodes.
fn bubble_chain(bubbles: u64) -> Graph {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let mut id = 1u64;
    nodes.push(Node::new(id, b"ACGTACGT"));
    for _ in 0..bubbles {
        let anchor = id;
        let ref_node = id + 1;
        let alt_node = id + 2;
        let next = id + 3;
        nodes.push(Node::new(ref_node, b"A"));
        nodes.push(Node::new(alt_node, b"G"));
        nodes.push(Node::new(next, b"ACGTACGT"));
        edges.push(Edge::forward(anchor, ref_node));
        edges.push(Edge::forward(anchor, alt_node));
        edges.push(Edge::forward(ref_node, next));
        edges.push(Edge::forward(alt_node, next));
        id = next;
    }
    Graph::from_parts(nodes, edges)
}

fn read_through(bubbles: u64) -> String {
    let mut read = String::from("ACGTACGT");
    for _ in 0..bubbles {
        read.push('A');
        read.push_str("ACGTACGT");
    }
    read
}

fn bench_local(c: &mut Criterion) {
    let graph = bubble_chain(8);
    let read = read_through(8);
    let aligner = Aligner::default();
    c.bench_function("local_align_bubble_chain", |b| {
        b.iter(|| {
            let mut aln = Alignment::from_sequence(&read);
            aligner.align(&mut aln, black_box(&graph), false).unwrap();
            aln.score
        })
    });
}

fn bench_pinned_multi(c: &mut Criterion) {
    let graph = bubble_chain(8);
    let read = read_through(8);
    let aligner = Aligner::default();
    c.bench_function("pinned_multi_bubble_chain", |b| {
        b.iter(|| {
            let mut aln = Alignment::from_sequence(&read);
            aligner
                .align_pinned_multi(&mut aln, black_box(&graph), false, 4, 5)
                .unwrap()
                .len()
        })
    });
}

fn bench_banded_global(c: &mut Criterion) {
    let graph = bubble_chain(8);
    let read = read_through(8);
    let aligner = Aligner::default();
    c.bench_function("banded_global_bubble_chain", |b| {
        b.iter(|| {
            let mut aln = Alignment::from_sequence(&read);
            aligner
                .align_global_banded(&mut aln, black_box(&graph), 2, true)
                .unwrap();
            aln.score
        })
    });
}

criterion_group!(benches, bench_local, bench_pinned_multi, bench_banded_global);
criterion_main!(benches);
