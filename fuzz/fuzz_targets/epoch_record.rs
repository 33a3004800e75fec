#![no_main]
use kuasha::EpochRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = EpochRecord::decode(data) {
        let encoded = record.encode().expect("decoded record must re-encode");
        assert_eq!(EpochRecord::decode(&encoded), Ok(record));
    }
});
