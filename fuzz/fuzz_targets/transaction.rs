#![no_main]
use kuasha::Transaction;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(tx) = Transaction::decode(data) {
        let _ = tx.is_verified();
        let _ = tx.payload_bytes();
    }
});
