use criterion::{Criterion, criterion_group, criterion_main};
use payments::{PaymentConfirmation, SignatureLayout, SignatureVerifier, sign};

const SECRET: &str = "bench_secret";

fn confirmation(signature: String) -> PaymentConfirmation {
    PaymentConfirmation {
        provider_order_id: "order_0000000001".to_string(),
        provider_payment_id: "pay_0000000001".to_string(),
        signature,
    }
}

fn bench_verify_valid(c: &mut Criterion) {
    let verifier = SignatureVerifier::new(Some(SECRET), false);
    let signature = sign(
        SECRET,
        SignatureLayout::PaymentThenOrder,
        "order_0000000001",
        "pay_0000000001",
    )
    .unwrap();
    let confirmation = confirmation(signature);

    c.bench_function("payments/verify_valid", |b| {
        b.iter(|| {
            verifier
                .verify(&confirmation, SignatureLayout::PaymentThenOrder)
                .unwrap()
        });
    });
}

fn bench_verify_invalid(c: &mut Criterion) {
    let verifier = SignatureVerifier::new(Some(SECRET), false);
    let confirmation = confirmation("00".repeat(32));

    c.bench_function("payments/verify_invalid", |b| {
        b.iter(|| {
            verifier
                .verify(&confirmation, SignatureLayout::PaymentThenOrder)
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_verify_valid, bench_verify_invalid);
criterion_main!(benches);
