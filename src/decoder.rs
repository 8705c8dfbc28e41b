use crate::{
    metrics,
    protocol::{Frame, RawFrame, ReadingFrame, DTYPE_SOC, DTYPE_VOLTAGE},
    store::TelemetryStore,
};
use std::sync::Arc;

/// What a single frame did to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Reading stored; carries the decoded value.
    Stored { arm: u8, k: u8, dtype: u8, value: f64 },
    SlaveCounts([u8; 4]),
    /// Notice frame (alarm, balance, missing data); nothing stored.
    Logged,
    /// Dropped without touching the store.
    Discarded,
}

/// Applies classified frames to a shared [`TelemetryStore`].
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    store: Arc<TelemetryStore>,
}

impl FrameDecoder {
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    pub fn apply(&self, raw: &RawFrame) -> Outcome {
        let Some(frame) = Frame::classify(raw) else {
            log::warn!("Unexpected frame length {} - frame={raw}", raw.len());
            return Outcome::Discarded;
        };
        match frame {
            Frame::Reading(reading) => self.apply_reading(&reading, raw),
            Frame::SlaveCounts(counts) => {
                self.store.set_arm_slave_counts(counts);
                Outcome::SlaveCounts(counts)
            }
            Frame::ControllerAlarm => {
                log::info!("Controller alarm: {raw}");
                Outcome::Logged
            }
            Frame::ShortAlarm => {
                log::info!("Arm alarm: {raw}");
                Outcome::Logged
            }
            Frame::BalanceCommand => {
                log::info!("Balance command: {raw}");
                Outcome::Logged
            }
            Frame::MissingData => {
                log::info!("Missing data marker: {raw}");
                Outcome::Logged
            }
            Frame::Unclassified => {
                log::debug!("Unclassified short frame: {raw}");
                Outcome::Discarded
            }
        }
    }

    fn apply_reading(&self, reading: &ReadingFrame, raw: &RawFrame) -> Outcome {
        if !reading.has_valid_arm() {
            log::warn!("Invalid arm {} - frame={raw}", reading.arm);
            return Outcome::Discarded;
        }
        self.store.note_row(reading.k);

        let ReadingFrame { arm, k, dtype, .. } = *reading;
        let value = reading.value();
        self.store.put(arm, k, dtype, value);

        if dtype == DTYPE_VOLTAGE && !reading.is_arm_row() {
            match metrics::soc(value) {
                Some(soc) => self.store.put(arm, k, DTYPE_SOC, soc),
                None => log::warn!("SOC not computed for voltage {value} - frame={raw}"),
            }
        }
        Outcome::Stored {
            arm,
            k,
            dtype,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(Arc::new(TelemetryStore::new()))
    }

    fn reading(k: u8, dtype: u8, arm: u8, digits: [u8; 6]) -> RawFrame {
        let mut bytes = vec![0x80, k, dtype, arm];
        bytes.extend_from_slice(&digits);
        bytes.push(0);
        RawFrame::new(bytes)
    }

    #[test]
    fn battery_voltage_round_trip_with_soc() {
        let decoder = decoder();
        let outcome = decoder.apply(&reading(5, 10, 2, [0, 1, 3, 0, 0, 0]));
        let Outcome::Stored { value, .. } = outcome else {
            panic!("unexpected {outcome:?}");
        };
        assert_eq!(decoder.store().get(2, 5, 10), Some(value));
        assert_eq!(decoder.store().get(2, 5, 126), metrics::soc(13.0));
    }

    #[test]
    fn arm_current_has_no_soc() {
        let decoder = decoder();
        decoder.apply(&reading(2, 10, 1, [0, 0, 2, 5, 0, 0]));
        assert_eq!(decoder.store().get(1, 2, 10), Some(2.5));
        assert_eq!(decoder.store().get(1, 2, 126), None);
    }

    #[test]
    fn humidity_soh_and_ntc_channels() {
        let decoder = decoder();
        decoder.apply(&reading(2, 11, 3, [0, 6, 5, 1, 2, 0]));
        decoder.apply(&reading(4, 11, 3, [1, 0, 0, 0, 0, 0]));
        decoder.apply(&reading(4, 14, 3, [0, 2, 5, 5, 0, 0]));
        let store = decoder.store();
        assert_eq!(store.get(3, 2, 11), Some(65.12));
        assert_eq!(store.get(3, 4, 11), Some(100.0));
        assert_eq!(store.get(3, 4, 14), Some(25.5));
    }

    #[test]
    fn invalid_arm_is_discarded_without_mutation() {
        let decoder = decoder();
        assert_eq!(
            decoder.apply(&reading(2, 10, 5, [0, 1, 2, 0, 0, 0])),
            Outcome::Discarded
        );
        assert!(decoder.store().get_all().is_empty());
        assert_eq!(decoder.store().last_k(), None);
    }

    #[test]
    fn slave_count_frame_sets_all_arms() {
        let decoder = decoder();
        let outcome = decoder.apply(&RawFrame::new(vec![0x80, 0x7E, 0, 0, 7, 0]));
        assert_eq!(outcome, Outcome::SlaveCounts([0, 0, 7, 0]));
        assert_eq!(decoder.store().arm_slave_counts(), [0, 0, 7, 0]);
    }

    #[test]
    fn notices_do_not_touch_the_store() {
        let decoder = decoder();
        for bytes in [
            vec![0x80, 0x03, 0x7F, 0, 0],
            vec![0x80, 0x05, 0x0F, 0, 0, 0],
            vec![0x80, 0x02, 0x7D, 0, 0, 0],
            vec![0x80, 0x04, 0x7D, 0, 0, 0, 0],
        ] {
            assert_eq!(decoder.apply(&RawFrame::new(bytes)), Outcome::Logged);
        }
        assert!(decoder.store().get_all().is_empty());
        assert_eq!(decoder.store().arm_slave_counts(), [0; 4]);
    }
}
