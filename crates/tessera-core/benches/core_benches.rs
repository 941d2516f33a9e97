use criterion::{Criterion, black_box, criterion_group, criterion_main};

use tessera_core::codec::{Decodable, Encodable};
use tessera_core::merkle;
use tessera_core::types::{Hash256, OutPoint, Transaction, TxInput, TxOutput};

fn sample_tx(inputs: usize) -> Transaction {
    Transaction {
        version: 1,
        inputs: (0..inputs)
            .map(|i| TxInput {
                prevout: OutPoint::new(Hash256([i as u8; 32]), i as u32),
                script_sig: vec![0xAB; 107],
                sequence: u32::MAX,
            })
            .collect(),
        outputs: vec![TxOutput { value: 50_0000_0000, script_pubkey: vec![0x76; 25] }],
        locktime: 0,
    }
}

fn bench_codec(c: &mut Criterion) {
    let tx = sample_tx(4);
    let encoded = tx.encode();

    c.bench_function("encode_tx_4in", |b| b.iter(|| black_box(&tx).encode()));
    c.bench_function("decode_tx_4in", |b| {
        b.iter(|| Transaction::decode(black_box(&encoded)).unwrap())
    });
    c.bench_function("txid_4in", |b| b.iter(|| black_box(&tx).txid()));
}

fn bench_merkle(c: &mut Criterion) {
    let leaves: Vec<Hash256> = (0..1_000u32)
        .map(|i| {
            let mut bytes = [0u8; 32];
            bytes[..4].copy_from_slice(&i.to_le_bytes());
            Hash256(bytes)
        })
        .collect();

    c.bench_function("merkle_root_1000", |b| {
        b.iter(|| merkle::merkle_root(black_box(&leaves)))
    });
}

criterion_group!(benches, bench_codec, bench_merkle);
criterion_main!(benches);
