use bytes::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio_util::codec::{Decoder, Encoder};

use hl7_listener::hl7::{self, Location, Message};
use hl7_listener::MllpCodec;

const ADT: &str = "MSH|^~\\&|EPIC|EPICADT|SMS|SMSADT|199912271408|CHARRIS|ADT^A04|1817457|D|2.5|\rPID||0493575^^^2^ID 1|454721||DOE^JOHN^^^^|DOE^JOHN^^^^|19480203|M||B|254 MYSTREET AVE^^MYTOWN^OH^44123^USA||(216)123-4567|||M|NON|400003403~1129086|\rNK1||ROE^MARIE^^^^|SPO||(216)123-4567||EC|||||||||||||||||||||||||||\rPV1||O|168 ~219~C~PMA^^^^^^^^^||||277^ALLEN MYLASTNAME^BONNIE^^^^|||||||||| ||2688684|||||||||||||||||||||||||199912271408||||||002376853";

fn bench_simple_decode(c: &mut Criterion) {
    // the simplest frame we could hope to receive (an ACK byte), to check overheads
    c.bench_function("decode ack byte", |b| {
        b.iter(|| {
            let mut msg = BytesMut::from(&b"\x0B\x06\x1C\x0D"[..]);
            let mut codec = MllpCodec::new();
            black_box(codec.decode(&mut msg).unwrap());
        })
    });
}

fn bench_message_decode(c: &mut Criterion) {
    let mut framed = BytesMut::new();
    MllpCodec::new()
        .encode(BytesMut::from(ADT), &mut framed)
        .unwrap();

    c.bench_function("decode adt", |b| {
        b.iter(|| {
            let mut msg = framed.clone();
            let mut codec = MllpCodec::new();
            black_box(codec.decode(&mut msg).unwrap());
        })
    });

    c.bench_function("decode adt in 64 byte reads", |b| {
        b.iter(|| {
            let mut codec = MllpCodec::new();
            let mut buf = BytesMut::new();
            let mut frames = 0;
            for chunk in framed.chunks(64) {
                buf.extend_from_slice(chunk);
                while codec.decode(&mut buf).unwrap().is_some() {
                    frames += 1;
                }
            }
            black_box(frames)
        })
    });
}

fn bench_simple_encode(c: &mut Criterion) {
    c.bench_function("encode ack byte", |b| {
        b.iter(|| {
            let msg = BytesMut::from("\x06");
            let mut codec = MllpCodec::new();
            let mut buf = BytesMut::with_capacity(0);
            black_box(codec.encode(msg, &mut buf).unwrap());
        })
    });
}

fn bench_resolve(c: &mut Criterion) {
    let message = Message::parse(ADT).unwrap();
    let location: Location = "PID-11.3".parse().unwrap();

    c.bench_function("parse location", |b| {
        b.iter(|| black_box("PID-3[2].1.2".parse::<Location>().unwrap()))
    });
    c.bench_function("query parsed message", |b| {
        b.iter(|| black_box(message.query(&location)))
    });
    c.bench_function("resolve from raw text", |b| {
        b.iter(|| black_box(hl7::resolve(ADT, "MSH-9.2").unwrap()))
    });
}

criterion_group!(
    benches,
    bench_simple_decode,
    bench_message_decode,
    bench_simple_encode,
    bench_resolve
);
criterion_main!(benches);
