// This file is part of Kuasha and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

use std::time::Duration;

use thiserror::Error;

/// Wire size of an encoded [`EpochRecord`].
pub const EPOCH_RECORD_LEN: usize = 16;

/// Default wall-clock length of one directory epoch.
pub const DEFAULT_EPOCH_PERIOD: Duration = Duration::from_secs(20 * 60);

/// Default number of ledger heights spanning one epoch.
pub const DEFAULT_EPOCH_INTERVAL: u64 = 5;

/// Failures decoding or encoding the fixed-size epoch record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("epoch record is {actual} bytes, expected {EPOCH_RECORD_LEN}")]
    Length { actual: usize },
    #[error("unterminated varint in epoch record")]
    Varint,
    #[error("varint does not fit its 8-byte field")]
    Overflow,
}

/// Raw on-chain epoch record: the current epoch identifier and the ledger
/// height at which it began. Produced by the ledger state machine; read-only
/// on this side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochRecord {
    pub epoch: u64,
    pub starting_height: i64,
}

impl EpochRecord {
    /// Encodes as exactly 16 bytes: an unsigned varint epoch in the first
    /// 8-byte half, a zigzag-signed varint starting height in the second.
    /// Unused pad bytes are zero.
    pub fn encode(&self) -> Result<[u8; EPOCH_RECORD_LEN], RecordError> {
        let mut out = [0u8; EPOCH_RECORD_LEN];
        put_uvarint(&mut out[..8], self.epoch)?;
        put_uvarint(&mut out[8..], zigzag(self.starting_height))?;
        Ok(out)
    }

    /// Decodes a raw record, rejecting any input that is not exactly
    /// [`EPOCH_RECORD_LEN`] bytes.
    pub fn decode(raw: &[u8]) -> Result<Self, RecordError> {
        if raw.len() != EPOCH_RECORD_LEN {
            return Err(RecordError::Length { actual: raw.len() });
        }
        let epoch = take_uvarint(&raw[..8])?;
        let starting_height = unzigzag(take_uvarint(&raw[8..])?);
        Ok(Self {
            epoch,
            starting_height,
        })
    }
}

fn put_uvarint(field: &mut [u8], mut value: u64) -> Result<(), RecordError> {
    let mut idx = 0usize;
    loop {
        if idx >= field.len() {
            return Err(RecordError::Overflow);
        }
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        field[idx] = byte;
        idx += 1;
        if value == 0 {
            return Ok(());
        }
    }
}

fn take_uvarint(field: &[u8]) -> Result<u64, RecordError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for &byte in field {
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(RecordError::Varint)
}

fn zigzag(value: i64) -> u64 {
    ((value as u64) << 1) ^ ((value >> 63) as u64)
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Converts elapsed ledger heights into advisory wall-clock durations.
///
/// Height-based elapsed time is immune to clock skew between client and
/// ledger; the wall-clock conversion here is for pacing and UI only and must
/// never drive a protocol-correctness decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochClock {
    period: Duration,
    interval: u64,
}

impl EpochClock {
    #[must_use]
    pub const fn new(period: Duration, interval: u64) -> Self {
        Self { period, interval }
    }

    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Splits the epoch period into (elapsed, remaining) from the number of
    /// heights elapsed since the epoch began. Heights beyond the configured
    /// interval are clamped; division rounds toward zero.
    #[must_use]
    pub fn split(&self, elapsed_height: u64) -> (Duration, Duration) {
        let interval = self.interval.max(1);
        let clamped = elapsed_height.min(interval);
        let nanos = self.period.as_nanos() * u128::from(clamped) / u128::from(interval);
        let elapsed = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        (elapsed, self.period.saturating_sub(elapsed))
    }
}

impl Default for EpochClock {
    fn default() -> Self {
        Self::new(DEFAULT_EPOCH_PERIOD, DEFAULT_EPOCH_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip() {
        for record in [
            EpochRecord {
                epoch: 0,
                starting_height: 0,
            },
            EpochRecord {
                epoch: 5,
                starting_height: 100,
            },
            EpochRecord {
                epoch: 1 << 40,
                starting_height: -7,
            },
            EpochRecord {
                epoch: u64::from(u32::MAX),
                starting_height: i64::from(i32::MAX),
            },
        ] {
            let encoded = record.encode().expect("encode");
            assert_eq!(EpochRecord::decode(&encoded).expect("decode"), record);
        }
    }

    #[test]
    fn known_record_layout() {
        // uvarint(5) = [0x05]; zigzag(100) = 200 = [0xc8, 0x01].
        let record = EpochRecord {
            epoch: 5,
            starting_height: 100,
        }
        .encode()
        .expect("encode");
        let mut expected = [0u8; EPOCH_RECORD_LEN];
        expected[0] = 0x05;
        expected[8] = 0xc8;
        expected[9] = 0x01;
        assert_eq!(record, expected);

        let decoded = EpochRecord::decode(&expected).expect("decode");
        assert_eq!(decoded.epoch, 5);
        assert_eq!(decoded.starting_height, 100);
    }

    #[test]
    fn rejects_wrong_length() {
        for len in [0usize, 8, 15, 17, 32] {
            let raw = vec![0u8; len];
            assert_eq!(
                EpochRecord::decode(&raw),
                Err(RecordError::Length { actual: len })
            );
        }
    }

    #[test]
    fn rejects_unterminated_varint() {
        let raw = [0x80u8; EPOCH_RECORD_LEN];
        assert_eq!(EpochRecord::decode(&raw), Err(RecordError::Varint));
    }

    #[test]
    fn rejects_oversized_epoch() {
        // Needs nine varint bytes, one more than the field holds.
        let record = EpochRecord {
            epoch: u64::MAX,
            starting_height: 0,
        };
        assert_eq!(record.encode(), Err(RecordError::Overflow));
    }

    #[test]
    fn clock_clamps_and_splits() {
        let clock = EpochClock::new(Duration::from_secs(20 * 60), 5);

        // Seven heights clamp to the five-height interval: epoch fully elapsed.
        let (elapsed, remaining) = clock.split(7);
        assert_eq!(elapsed, Duration::from_secs(20 * 60));
        assert_eq!(remaining, Duration::ZERO);

        let (elapsed, remaining) = clock.split(2);
        assert_eq!(elapsed, Duration::from_secs(8 * 60));
        assert_eq!(remaining, Duration::from_secs(12 * 60));

        let (elapsed, remaining) = clock.split(0);
        assert_eq!(elapsed, Duration::ZERO);
        assert_eq!(remaining, Duration::from_secs(20 * 60));
    }

    #[test]
    fn clock_guards_zero_interval() {
        let clock = EpochClock::new(Duration::from_secs(60), 0);
        let (elapsed, remaining) = clock.split(3);
        assert_eq!(elapsed, Duration::from_secs(60));
        assert_eq!(remaining, Duration::ZERO);
    }
}
