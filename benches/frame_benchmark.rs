use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use linkrelay::protocol::{DataType, Frame, FrameDecoder};

const POS: DataType = DataType::new(*b"POS");

/// create a push frame with a payload of `len` bytes
fn create_push(len: usize) -> Frame {
    Frame::Push {
        data_type: POS,
        payload: (0..len).map(|i| i as u8).collect(),
    }
}

/// encoding benchmark
fn bench_encode(c: &mut Criterion) {
    let frame = create_push(384);

    let mut group = c.benchmark_group("Encode");
    group.throughput(Throughput::Elements(1));

    group.bench_function("Push384", |b| {
        b.iter(|| black_box(black_box(&frame).encode().unwrap()))
    });

    group.bench_function("Pull", |b| {
        let pull = Frame::Pull { data_type: POS };
        b.iter(|| black_box(black_box(&pull).encode().unwrap()))
    });

    group.finish();
}

/// parsing benchmark
fn bench_parse(c: &mut Criterion) {
    let bytes = create_push(384).encode().unwrap();

    let mut group = c.benchmark_group("Parse");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("Push384", |b| {
        b.iter(|| black_box(Frame::parse(black_box(&bytes)).unwrap()))
    });

    group.finish();
}

/// stream resegmentation benchmark: many small frames split across reads
fn bench_decoder(c: &mut Criterion) {
    let mut stream = Vec::new();
    for i in 0..64 {
        stream.extend(create_push(i % 16).encode().unwrap());
        stream.extend(Frame::Pull { data_type: POS }.encode().unwrap());
    }

    let mut group = c.benchmark_group("Decoder");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("chunked_2048", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            let mut frames = 0;
            for chunk in black_box(&stream).chunks(2048) {
                decoder.extend(chunk);
                while let Some(frame) = decoder.next_frame().unwrap() {
                    black_box(&frame);
                    frames += 1;
                }
            }
            frames
        })
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_parse, bench_decoder);
criterion_main!(benches);
